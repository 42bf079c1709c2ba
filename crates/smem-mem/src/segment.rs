//! `MemSegment`: a per-rank reservation of a contiguous VA window sized
//! `rankCount x perRankSize`, split into per-rank sub-windows.
//!
//! The four backing/import mechanisms from spec.md table 4.3 are modeled
//! as a tagged variant rather than virtual-inheritance classes, per the
//! redesign note in spec.md §9: one `MemSegment` enum, one shared
//! `SegmentCommon` carrying the bookkeeping every variant needs, and a
//! `SegmentOps` trait exposing the operations a caller drives.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use smem_types::{align_up, Error, PageTableKind, Result, Tier};
use tracing::{debug, info, warn};

use crate::exchange::{ExchangeDescriptor, ExchangeMaterial, SegmentKind};
use crate::registry::{Backing, SharedBackingRegistry};
use crate::slice::MemSlice;

/// Configuration for reserving one segment.
#[derive(Debug, Clone)]
pub struct SegmentOptions {
    pub tier: Tier,
    /// Start of this segment's GVA window. Host and device segments in
    /// the same entity use disjoint `base` values so a bare address is
    /// enough to tell which tier it belongs to, the way the original's
    /// host and device address spaces never overlap even with numerically
    /// identical offsets.
    pub base: u64,
    pub per_rank_size: u64,
    pub rank_count: u32,
    pub rank_id: u32,
    pub align: u64,
}

/// The fields and bookkeeping every segment variant shares: the slice
/// table, the export cache (export idempotence, invariant 5), the queued
/// and installed imports (import idempotence, invariant 6), and the
/// simulated backing.
pub struct SegmentCommon {
    options: SegmentOptions,
    allocated: u64,
    next_index: u16,
    next_nonce: u64,
    slice_table: HashMap<u16, MemSlice>,
    export_cache: HashMap<u16, Vec<u8>>,
    /// Descriptors that have been `Import`-ed but not yet installed by `Mmap`.
    pending_imports: Vec<ExchangeDescriptor>,
    /// Descriptors already installed, so a repeat `Import` + `Mmap` is a no-op.
    imported_keys: std::collections::HashSet<(u32, u16)>,
    /// `(owner_rank, slice_index) -> region` for everything currently mapped
    /// into this segment's view of the GVA, including our own slices.
    mapped: HashMap<(u32, u16), MappedRegion>,
    registry: SharedBackingRegistry,
}

/// One slice's placement within its owning rank's sub-window, alongside the
/// backing it maps to. `offset_within_rank` is what lets `resolve()` tell
/// two same-rank slices apart instead of only ever finding the first one.
struct MappedRegion {
    offset_within_rank: u64,
    backing: Backing,
}

impl SegmentCommon {
    fn new(options: SegmentOptions, registry: SharedBackingRegistry) -> Self {
        SegmentCommon {
            options,
            allocated: 0,
            next_index: 0,
            next_nonce: 0,
            slice_table: HashMap::new(),
            export_cache: HashMap::new(),
            pending_imports: Vec::new(),
            imported_keys: std::collections::HashSet::new(),
            mapped: HashMap::new(),
            registry,
        }
    }

    fn local_base(&self) -> u64 {
        self.options.base + self.options.per_rank_size * u64::from(self.options.rank_id)
    }

    fn rank_base(&self, rank: u32) -> u64 {
        self.options.base + self.options.per_rank_size * u64::from(rank)
    }

    fn total(&self) -> u64 {
        self.options.per_rank_size * u64::from(self.options.rank_count)
    }

    fn allocate(&mut self, size: u64) -> Result<MemSlice> {
        if size == 0 {
            return Err(Error::InvalidParam("allocation size must be non-zero".into()));
        }
        if size % self.options.align != 0 {
            return Err(Error::InvalidParam(format!(
                "size {size} is not a multiple of the tier page size {}",
                self.options.align
            )));
        }
        let aligned = align_up(size, self.options.align);
        if self.allocated + aligned > self.options.per_rank_size {
            return Err(Error::InvalidParam(format!(
                "allocating {aligned} bytes would exceed per-rank window of {} (already allocated {})",
                self.options.per_rank_size, self.allocated
            )));
        }
        if self.next_index == u16::MAX {
            return Err(Error::MallocFailed("slice index space exhausted".into()));
        }

        let index = self.next_index;
        self.next_index += 1;
        let nonce = self.next_nonce;
        self.next_nonce += 1;

        let va = self.local_base() + self.allocated;
        let slice = MemSlice::new(nonce, index, self.options.tier, PageTableKind::Fabric, va, aligned);
        self.allocated += aligned;
        self.slice_table.insert(index, slice);

        let backing: Backing = Arc::new(RwLock::new(vec![0u8; aligned as usize]));
        self.registry.publish(self.options.rank_id, index, backing.clone());
        let offset_within_rank = slice.va() - self.local_base();
        self.mapped.insert((self.options.rank_id, index), MappedRegion { offset_within_rank, backing });

        debug!(index, va, aligned, "allocated slice");
        Ok(slice)
    }

    fn release_slice(&mut self, id: u64) -> Result<()> {
        let index = MemSlice::index_from_id(id);
        let slice = self
            .slice_table
            .get(&index)
            .ok_or_else(|| Error::NotExist(format!("no live slice at index {index}")))?;
        if !slice.validate_id(id) {
            return Err(Error::InvalidParam("slice handle magic mismatch".into()));
        }
        self.slice_table.remove(&index);
        self.export_cache.remove(&index);
        self.mapped.remove(&(self.options.rank_id, index));
        self.registry.withdraw(self.options.rank_id, index);
        Ok(())
    }

    fn validate_id(&self, id: u64) -> Option<MemSlice> {
        let index = MemSlice::index_from_id(id);
        self.slice_table
            .get(&index)
            .filter(|slice| slice.validate_id(id))
            .copied()
    }

    fn export_slice(
        &mut self,
        slice_index: u16,
        magic: u64,
        kind: SegmentKind,
        owner_device_id: u64,
        material: ExchangeMaterial,
    ) -> Result<Vec<u8>> {
        if let Some(cached) = self.export_cache.get(&slice_index) {
            return Ok(cached.clone());
        }
        let slice = self
            .slice_table
            .get(&slice_index)
            .ok_or_else(|| Error::NotExist(format!("no live slice at index {slice_index}")))?;
        let descriptor = ExchangeDescriptor {
            magic,
            version: smem_types::constants::EXCHANGE_DESCRIPTOR_VERSION,
            owner_rank_id: self.options.rank_id,
            offset_within_rank: slice.va() - self.local_base(),
            size: slice.size(),
            slice_index,
            kind,
            tier: self.options.tier,
            owner_device_id,
            material,
        };
        let bytes = descriptor.encode();
        self.export_cache.insert(slice_index, bytes.clone());
        Ok(bytes)
    }

    fn import(&mut self, descriptors: &[Vec<u8>]) -> Result<()> {
        let mut local_present = false;
        let mut parsed = Vec::with_capacity(descriptors.len());
        for bytes in descriptors {
            let descriptor = ExchangeDescriptor::decode(bytes)?;
            if descriptor.owner_rank_id == self.options.rank_id {
                local_present = true;
            }
            parsed.push(descriptor);
        }
        if !local_present {
            return Err(Error::InvalidParam(
                "descriptor set does not include the local rank's own slice".into(),
            ));
        }
        for descriptor in parsed {
            if descriptor.owner_rank_id == self.options.rank_id {
                continue;
            }
            let key = (descriptor.owner_rank_id, descriptor.slice_index);
            if self.imported_keys.contains(&key) {
                continue; // import idempotence: already installed.
            }
            if !self.pending_imports.iter().any(|d| {
                d.owner_rank_id == descriptor.owner_rank_id && d.slice_index == descriptor.slice_index
            }) {
                self.pending_imports.push(descriptor);
            }
        }
        Ok(())
    }

    fn mmap(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_imports);
        let mut still_pending = Vec::new();
        for descriptor in pending {
            let key = (descriptor.owner_rank_id, descriptor.slice_index);
            if self.imported_keys.contains(&key) {
                continue;
            }
            match self.registry.lookup(descriptor.owner_rank_id, descriptor.slice_index) {
                Some(backing) => {
                    self.mapped.insert(
                        key,
                        MappedRegion { offset_within_rank: descriptor.offset_within_rank, backing },
                    );
                    self.imported_keys.insert(key);
                    info!(
                        owner = descriptor.owner_rank_id,
                        slice = descriptor.slice_index,
                        "mapped peer slice"
                    );
                }
                None => {
                    warn!(
                        owner = descriptor.owner_rank_id,
                        slice = descriptor.slice_index,
                        "peer backing not yet available, retry on next Mmap"
                    );
                    still_pending.push(descriptor);
                }
            }
        }
        self.pending_imports = still_pending;
        Ok(())
    }

    fn unmap(&mut self) {
        let own_rank = self.options.rank_id;
        self.mapped.retain(|&(rank, _), _| rank == own_rank);
        self.imported_keys.clear();
    }

    fn remove_imported(&mut self, ranks: &[u32]) {
        for &rank in ranks {
            if rank == self.options.rank_id {
                continue;
            }
            self.mapped.retain(|&(r, _), _| r != rank);
            self.imported_keys.retain(|&(r, _)| r != rank);
        }
    }

    fn memory_in_range(&self, addr: u64, len: u64) -> bool {
        let Some(rel) = addr.checked_sub(self.options.base) else {
            return false;
        };
        match rel.checked_add(len) {
            Some(end) => end <= self.total(),
            None => false,
        }
    }

    fn rank_id_by_addr(&self, addr: u64, len: u64) -> u32 {
        if !self.memory_in_range(addr, len) {
            return self.options.rank_id;
        }
        let rel = addr - self.options.base;
        (rel / self.options.per_rank_size) as u32
    }

    /// Reads `len` bytes starting at absolute GVA offset `addr`, as seen by
    /// this segment's own mapped set (own slices plus anything `Mmap`-ed).
    fn read(&self, addr: u64, len: u64) -> Result<Vec<u8>> {
        let (rank, slice_index, local_off) = self.resolve(addr, len)?;
        let region = self
            .mapped
            .get(&(rank, slice_index))
            .ok_or_else(|| Error::InvalidParam(format!("address {addr:#x} is not mapped")))?;
        let guard = region.backing.read();
        Ok(guard[local_off as usize..local_off as usize + len as usize].to_vec())
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<()> {
        let (rank, slice_index, local_off) = self.resolve(addr, data.len() as u64)?;
        let region = self
            .mapped
            .get(&(rank, slice_index))
            .ok_or_else(|| Error::InvalidParam(format!("address {addr:#x} is not mapped")))?;
        let mut guard = region.backing.write();
        guard[local_off as usize..local_off as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn resolve(&self, addr: u64, len: u64) -> Result<(u32, u16, u64)> {
        if !self.memory_in_range(addr, len) {
            return Err(Error::InvalidParam(format!(
                "range [{addr:#x}, {:#x}) is outside this segment's GVA window",
                addr + len
            )));
        }
        let rank = self.rank_id_by_addr(addr, len);
        let rank_off = addr - self.rank_base(rank);
        // Slices never overlap within a rank's window, and every byte of an
        // allocated slice is backed, so whichever slice's own
        // [offset_within_rank, offset_within_rank + backing.len()) span
        // contains this offset is the unambiguous target.
        for (&(owner, slice_index), region) in &self.mapped {
            if owner != rank {
                continue;
            }
            let Some(within) = rank_off.checked_sub(region.offset_within_rank) else {
                continue;
            };
            let backing_len = region.backing.read().len() as u64;
            if within < backing_len && within + len <= backing_len {
                return Ok((owner, slice_index, within));
            }
        }
        Err(Error::InvalidParam(format!(
            "address {addr:#x} does not fall inside any mapped slice"
        )))
    }
}

/// Which backing/import mechanism a segment uses. A tagged variant
/// instead of four virtual-inheritance classes (spec.md §9).
pub enum MemSegment {
    HbmLegacyIpc(SegmentCommon),
    HbmVmm(SegmentCommon),
    HostConn(SegmentCommon),
    HostSdma(SegmentCommon),
}

/// The shared capability surface every segment variant exposes.
pub trait SegmentOps: Send + Sync {
    fn allocate(&mut self, size: u64) -> Result<MemSlice>;
    fn release_slice(&mut self, id: u64) -> Result<()>;
    fn validate_id(&self, id: u64) -> Option<MemSlice>;
    fn export(&mut self, slice_index: u16) -> Result<Vec<u8>>;
    fn import(&mut self, descriptors: &[Vec<u8>]) -> Result<()>;
    fn mmap(&mut self) -> Result<()>;
    fn unmap(&mut self);
    fn remove_imported(&mut self, ranks: &[u32]);
    fn memory_in_range(&self, addr: u64, len: u64) -> bool;
    fn get_rank_id_by_addr(&self, addr: u64, len: u64) -> u32;
    fn read(&self, addr: u64, len: u64) -> Result<Vec<u8>>;
    fn write(&self, addr: u64, data: &[u8]) -> Result<()>;
    fn rank_id(&self) -> u32;
    fn per_rank_size(&self) -> u64;
    /// The canonical "reserved" pointer `Entity.ReserveMemorySpace` hands
    /// back for this segment: this rank's own sub-window base.
    fn local_base(&self) -> u64;
}

impl MemSegment {
    #[must_use]
    pub fn new(kind: SegmentKind, options: SegmentOptions, registry: SharedBackingRegistry) -> Self {
        let common = SegmentCommon::new(options, registry);
        match kind {
            SegmentKind::HbmLegacyIpc => MemSegment::HbmLegacyIpc(common),
            SegmentKind::HbmVmm => MemSegment::HbmVmm(common),
            SegmentKind::HostConn => MemSegment::HostConn(common),
            SegmentKind::HostSdma => MemSegment::HostSdma(common),
        }
    }

    fn common(&self) -> &SegmentCommon {
        match self {
            MemSegment::HbmLegacyIpc(c)
            | MemSegment::HbmVmm(c)
            | MemSegment::HostConn(c)
            | MemSegment::HostSdma(c) => c,
        }
    }

    fn common_mut(&mut self) -> &mut SegmentCommon {
        match self {
            MemSegment::HbmLegacyIpc(c)
            | MemSegment::HbmVmm(c)
            | MemSegment::HostConn(c)
            | MemSegment::HostSdma(c) => c,
        }
    }

    fn kind(&self) -> SegmentKind {
        match self {
            MemSegment::HbmLegacyIpc(_) => SegmentKind::HbmLegacyIpc,
            MemSegment::HbmVmm(_) => SegmentKind::HbmVmm,
            MemSegment::HostConn(_) => SegmentKind::HostConn,
            MemSegment::HostSdma(_) => SegmentKind::HostSdma,
        }
    }

    fn magic(&self) -> u64 {
        match self.kind() {
            SegmentKind::HbmLegacyIpc => smem_types::constants::HBM_SLICE_LEGACY_IPC_MAGIC,
            SegmentKind::HbmVmm => smem_types::constants::HBM_SLICE_VMM_MAGIC,
            SegmentKind::HostConn | SegmentKind::HostSdma => smem_types::constants::DRAM_SLICE_MAGIC,
        }
    }

    fn material_for(&self, slice: &MemSlice) -> ExchangeMaterial {
        let rank = self.common().options.rank_id;
        match self.kind() {
            SegmentKind::HbmLegacyIpc => {
                ExchangeMaterial::IpcName(format!("hybm-ipc-r{}-s{}", rank, slice.index()))
            }
            SegmentKind::HbmVmm => ExchangeMaterial::VmmShareHandle(slice.va() ^ 0x5A5A_5A5A),
            SegmentKind::HostConn => {
                let mut key = vec![0u8; 16];
                key[..8].copy_from_slice(&slice.va().to_le_bytes());
                key[8..].copy_from_slice(&slice.size().to_le_bytes());
                ExchangeMaterial::MemoryKey(key)
            }
            SegmentKind::HostSdma => ExchangeMaterial::GvmKey(slice.va() ^ 0xA5A5_A5A5),
        }
    }

    fn owner_device_id(&self) -> u64 {
        u64::from(self.common().options.rank_id)
    }
}

impl SegmentOps for MemSegment {
    fn allocate(&mut self, size: u64) -> Result<MemSlice> {
        self.common_mut().allocate(size)
    }

    fn release_slice(&mut self, id: u64) -> Result<()> {
        self.common_mut().release_slice(id)
    }

    fn validate_id(&self, id: u64) -> Option<MemSlice> {
        self.common().validate_id(id)
    }

    fn export(&mut self, slice_index: u16) -> Result<Vec<u8>> {
        let slice = *self
            .common()
            .slice_table
            .get(&slice_index)
            .ok_or_else(|| Error::NotExist(format!("no live slice at index {slice_index}")))?;
        let magic = self.magic();
        let kind = self.kind();
        let material = self.material_for(&slice);
        let device_id = self.owner_device_id();
        self.common_mut().export_slice(slice_index, magic, kind, device_id, material)
    }

    fn import(&mut self, descriptors: &[Vec<u8>]) -> Result<()> {
        self.common_mut().import(descriptors)
    }

    fn mmap(&mut self) -> Result<()> {
        self.common_mut().mmap()
    }

    fn unmap(&mut self) {
        self.common_mut().unmap();
    }

    fn remove_imported(&mut self, ranks: &[u32]) {
        self.common_mut().remove_imported(ranks);
    }

    fn memory_in_range(&self, addr: u64, len: u64) -> bool {
        self.common().memory_in_range(addr, len)
    }

    fn get_rank_id_by_addr(&self, addr: u64, len: u64) -> u32 {
        self.common().rank_id_by_addr(addr, len)
    }

    fn read(&self, addr: u64, len: u64) -> Result<Vec<u8>> {
        self.common().read(addr, len)
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<()> {
        self.common().write(addr, data)
    }

    fn rank_id(&self) -> u32 {
        self.common().options.rank_id
    }

    fn per_rank_size(&self) -> u64 {
        self.common().options.per_rank_size
    }

    fn local_base(&self) -> u64 {
        self.common().local_base()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(rank_id: u32) -> SegmentOptions {
        SegmentOptions {
            tier: Tier::HostDram,
            base: 0,
            per_rank_size: 4 * 1024 * 1024,
            rank_count: 2,
            rank_id,
            align: 2 * 1024 * 1024,
        }
    }

    #[test]
    fn sub_window_matches_rank_and_addr_lookup_agrees() {
        let registry = SharedBackingRegistry::new();
        let seg = MemSegment::new(SegmentKind::HostConn, opts(1), registry);
        assert_eq!(seg.get_rank_id_by_addr(4 * 1024 * 1024, 1024), 1);
        assert_eq!(seg.get_rank_id_by_addr(4 * 1024 * 1024 + 4096, 1024), 1);
        assert_eq!(seg.get_rank_id_by_addr(0, 1024), 0);
    }

    #[test]
    fn export_is_idempotent() {
        let registry = SharedBackingRegistry::new();
        let mut seg = MemSegment::new(SegmentKind::HbmVmm, opts(0), registry);
        let slice = seg.allocate(2 * 1024 * 1024).unwrap();
        let a = seg.export(slice.index()).unwrap();
        let b = seg.export(slice.index()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn alloc_respects_alignment_and_capacity() {
        let registry = SharedBackingRegistry::new();
        let mut seg = MemSegment::new(SegmentKind::HostConn, opts(0), registry);
        assert!(matches!(seg.allocate(3 * 1024 * 1024), Err(Error::InvalidParam(_))));
        assert!(seg.allocate(2 * 1024 * 1024).is_ok());
        assert!(seg.allocate(2 * 1024 * 1024).is_ok());
        assert!(matches!(seg.allocate(2 * 1024 * 1024), Err(Error::InvalidParam(_))));
    }

    #[test]
    fn import_then_mmap_then_unmap_then_mmap_is_idempotent() {
        let registry = SharedBackingRegistry::new();
        let mut owner = MemSegment::new(SegmentKind::HostConn, opts(0), registry.clone());
        let slice = owner.allocate(2 * 1024 * 1024).unwrap();
        owner.write(slice.va(), &[0xA5u8; 16]).unwrap();
        let owner_desc = owner.export(slice.index()).unwrap();

        let mut peer = MemSegment::new(SegmentKind::HostConn, opts(1), registry);
        // peer must include its own (empty) descriptor set entry for itself.
        let peer_slice = peer.allocate(2 * 1024 * 1024).unwrap();
        let peer_desc = peer.export(peer_slice.index()).unwrap();

        peer.import(&[owner_desc.clone(), peer_desc.clone()]).unwrap();
        peer.mmap().unwrap();
        let read_back = peer.read(slice.va(), 16).unwrap();
        assert_eq!(read_back, vec![0xA5u8; 16]);

        peer.unmap();
        peer.mmap().unwrap();
        let read_back_again = peer.read(slice.va(), 16).unwrap();
        assert_eq!(read_back_again, vec![0xA5u8; 16]);
    }
}
