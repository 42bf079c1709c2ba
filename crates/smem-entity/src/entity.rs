//! `MemEntity`: one caller-visible shared-VA-space object, composing a
//! host segment, a device segment (or both), a transport, and the
//! tag-routed copy engine behind the lifecycle state machine in
//! `spec.md §4.7`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use smem_dataop::{ComposeDataOp, Copy2dParams, CopyParams, EnabledOperators, EntityTagInfo, Scene};
use smem_mem::{MemSegment, MemSlice, SegmentKind, SegmentOps, SegmentOptions, SharedBackingRegistry};
use smem_transport::{MemoryRegion, TransportManager, TransportOptions};
use smem_types::{CopyDirection, Error, OpTypeMask, RankId, Result, Tier};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::envelope::EntityEnvelope;
use crate::options::EntityOptions;
use crate::state::EntityState;

/// Default wait for a peer's listener/connection to become reachable
/// during `import_entity_exchange_info`. Generous for a loopback-TCP
/// transport in a single test process; a real deployment would make this
/// caller-configurable the way `WaitForConnected` takes an explicit
/// timeout in spec.md §5.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn enabled_operators(mask: OpTypeMask) -> EnabledOperators {
    EnabledOperators {
        sdma: mask.contains(OpTypeMask::SDMA),
        device_rdma: mask.contains(OpTypeMask::DEVICE_RDMA),
        host_rdma: mask.contains(OpTypeMask::HOST_RDMA),
        host_urma: mask.contains(OpTypeMask::HOST_URMA),
    }
}

fn segment_options(tier: Tier, base: u64, per_rank_size: u64, align: u64, options: &EntityOptions) -> SegmentOptions {
    SegmentOptions {
        tier,
        base,
        per_rank_size,
        rank_count: options.rank_count,
        rank_id: options.rank_id.0,
        align,
    }
}

/// One rank's view of a shared-VA-space entity. Owns up to two segments
/// (host DRAM, device HBM), the transport those segments' non-SDMA
/// operators drive, and the composite copy engine that routes between
/// them per `EntityTagInfo`'s policy.
pub struct MemEntity {
    options: EntityOptions,
    host: Option<AsyncMutex<MemSegment>>,
    device: Option<AsyncMutex<MemSegment>>,
    transport: Arc<dyn TransportManager>,
    compose: ComposeDataOp,
    tag_info: Arc<EntityTagInfo>,
    state: SyncMutex<EntityState>,
    last_host_slice: SyncMutex<Option<MemSlice>>,
    last_device_slice: SyncMutex<Option<MemSlice>>,
}

impl MemEntity {
    /// `spec.md §4.7 Initialize`: validates `options`, builds both
    /// segments eagerly (their `RangePool`-equivalent bookkeeping costs
    /// nothing until `AllocLocalMemory` is actually called), wires tag
    /// policy, and builds the composite copy engine.
    pub async fn initialize(
        options: EntityOptions,
        registry: SharedBackingRegistry,
        transport: Arc<dyn TransportManager>,
    ) -> Result<Self> {
        options.validate()?;

        let tag_info = Arc::new(EntityTagInfo::new());
        if let Some(tag) = &options.tag {
            tag_info.add_rank_tag(options.rank_id, tag)?;
        }
        if let Some(csv) = &options.tag_op_info_csv {
            tag_info.add_tag_op_info_csv(csv)?;
        }

        let host = if options.host_size > 0 {
            let opts = segment_options(
                Tier::HostDram,
                crate::options::HOST_GVA_BASE,
                options.host_size,
                smem_types::constants::HOST_LARGE_PAGE_SIZE,
                &options,
            );
            Some(AsyncMutex::new(MemSegment::new(SegmentKind::HostConn, opts, registry.clone())))
        } else {
            None
        };
        let device = if options.hbm_size > 0 {
            let opts = segment_options(
                Tier::DeviceHbm,
                crate::options::DEVICE_GVA_BASE,
                options.hbm_size,
                smem_types::constants::DEVICE_LARGE_PAGE_SIZE,
                &options,
            );
            Some(AsyncMutex::new(MemSegment::new(SegmentKind::HbmVmm, opts, registry)))
        } else {
            None
        };

        transport
            .open_device(&TransportOptions { local_rank: options.rank_id, nic: options.transport_nic.clone() })
            .await?;

        let compose = ComposeDataOp::build(
            options.scene,
            enabled_operators(options.allowed_ops),
            options.rank_id,
            transport.clone(),
            tag_info.clone(),
        );

        info!(rank = options.rank_id.0, "entity initialized");
        Ok(MemEntity {
            options,
            host,
            device,
            transport,
            compose,
            tag_info,
            state: SyncMutex::new(EntityState::Initialized),
            last_host_slice: SyncMutex::new(None),
            last_device_slice: SyncMutex::new(None),
        })
    }

    #[must_use]
    pub fn rank_id(&self) -> RankId {
        self.options.rank_id
    }

    #[must_use]
    pub fn state(&self) -> EntityState {
        *self.state.lock()
    }

    #[must_use]
    pub fn tag_info(&self) -> &Arc<EntityTagInfo> {
        &self.tag_info
    }

    fn require_state(&self, allowed: &[EntityState], what: &str) -> Result<()> {
        let current = *self.state.lock();
        if allowed.contains(&current) {
            Ok(())
        } else {
            Err(Error::NotInitialized(format!("{what} is not valid in state {current:?}")))
        }
    }

    fn segment(&self, tier: Tier) -> Result<&AsyncMutex<MemSegment>> {
        match tier {
            Tier::HostDram => self.host.as_ref(),
            Tier::DeviceHbm => self.device.as_ref(),
        }
        .ok_or_else(|| Error::InvalidParam(format!("entity has no {tier:?} segment")))
    }

    /// `ReserveMemorySpace`: reports the canonical reserved pointer — the
    /// host segment's own sub-window base, or the device segment's if
    /// this entity has no host segment.
    pub async fn reserve_memory_space(&self) -> Result<u64> {
        self.require_state(&[EntityState::Initialized], "reserve_memory_space")?;
        let reserved = if let Some(host) = &self.host {
            host.lock().await.local_base()
        } else if let Some(device) = &self.device {
            device.lock().await.local_base()
        } else {
            return Err(Error::InvalidParam("entity has neither a host nor a device segment".into()));
        };
        *self.state.lock() = EntityState::Reserved;
        Ok(reserved)
    }

    /// `AllocLocalMemory`: allocates `size` bytes in `tier`'s segment and
    /// remembers the slice as the tier's most recently allocated one, so
    /// `export_exchange_info` has something to publish without the
    /// caller naming an index.
    pub async fn alloc_local_memory(&self, tier: Tier, size: u64) -> Result<MemSlice> {
        self.require_state(&[EntityState::Reserved, EntityState::Allocated], "alloc_local_memory")?;
        let segment = self.segment(tier)?;
        let slice = segment.lock().await.allocate(size)?;
        match tier {
            Tier::HostDram => *self.last_host_slice.lock() = Some(slice),
            Tier::DeviceHbm => *self.last_device_slice.lock() = Some(slice),
        }
        *self.state.lock() = EntityState::Allocated;
        debug!(rank = self.options.rank_id.0, ?tier, size, "allocated local memory");
        Ok(slice)
    }

    /// `ExportExchangeInfo(slice, &desc)`: publishes one slice's wire
    /// descriptor.
    pub async fn export_slice(&self, tier: Tier, slice_index: u16) -> Result<Vec<u8>> {
        self.segment(tier)?.lock().await.export(slice_index)
    }

    /// `ExportExchangeInfo(&desc)` (entity flavor): combines this rank's
    /// transport NIC with the most recently allocated slice's descriptor
    /// for each tier into one envelope.
    pub async fn export_exchange_info(&self) -> Result<Vec<u8>> {
        self.require_state(
            &[EntityState::Allocated, EntityState::Exported, EntityState::Connected, EntityState::Operating],
            "export_exchange_info",
        )?;
        let device_desc = match *self.last_device_slice.lock() {
            Some(slice) => Some(self.export_slice(Tier::DeviceHbm, slice.index()).await?),
            None => None,
        };
        let host_desc = match *self.last_host_slice.lock() {
            Some(slice) => Some(self.export_slice(Tier::HostDram, slice.index()).await?),
            None => None,
        };
        let envelope = EntityEnvelope {
            owner_rank_id: self.options.rank_id.0,
            transport_nic: self.transport.nic(),
            device_desc,
            host_desc,
        };
        *self.state.lock() = EntityState::Exported;
        Ok(envelope.encode())
    }

    /// `ImportExchangeInfo`: queues one tier's peer slice descriptor set.
    /// The caller must include this rank's own export for that tier
    /// among `descriptors` (invariant enforced by `Segment::Import`).
    pub async fn import_exchange_info(&self, tier: Tier, descriptors: &[Vec<u8>]) -> Result<()> {
        self.segment(tier)?.lock().await.import(descriptors)
    }

    /// `ImportEntityExchangeInfo`: decodes a peer's entity envelope,
    /// imports whichever tiers it carries (combined with our own export
    /// for that tier, to satisfy the local-presence invariant), and
    /// connects the transport to the peer.
    pub async fn import_entity_exchange_info(&self, peer_bytes: &[u8]) -> Result<EntityEnvelope> {
        let envelope = EntityEnvelope::decode(peer_bytes)?;
        let peer_rank = RankId(envelope.owner_rank_id);

        if let Some(peer_device) = &envelope.device_desc {
            if self.device.is_some() {
                let mut set = Vec::with_capacity(2);
                if let Some(slice) = *self.last_device_slice.lock() {
                    set.push(self.export_slice(Tier::DeviceHbm, slice.index()).await?);
                }
                set.push(peer_device.clone());
                self.import_exchange_info(Tier::DeviceHbm, &set).await?;
            }
        }
        if let Some(peer_host) = &envelope.host_desc {
            if self.host.is_some() {
                let mut set = Vec::with_capacity(2);
                if let Some(slice) = *self.last_host_slice.lock() {
                    set.push(self.export_slice(Tier::HostDram, slice.index()).await?);
                }
                set.push(peer_host.clone());
                self.import_exchange_info(Tier::HostDram, &set).await?;
            }
        }

        if peer_rank != self.options.rank_id && !self.transport.is_connected(peer_rank) {
            self.transport.connect(peer_rank, CONNECT_TIMEOUT).await?;
        }
        *self.state.lock() = EntityState::Connected;
        Ok(envelope)
    }

    /// `Mmap`: installs every queued import on whichever segments exist.
    pub async fn mmap(&self) -> Result<()> {
        if let Some(host) = &self.host {
            host.lock().await.mmap()?;
        }
        if let Some(device) = &self.device {
            device.lock().await.mmap()?;
        }
        *self.state.lock() = EntityState::Operating;
        Ok(())
    }

    /// `Unmap`: closes every installed mapping on both segments.
    pub async fn unmap(&self) -> Result<()> {
        if let Some(host) = &self.host {
            host.lock().await.unmap();
        }
        if let Some(device) = &self.device {
            device.lock().await.unmap();
        }
        Ok(())
    }

    /// `RemoveImported(ranks)`: forwarded to both segments.
    pub async fn remove_imported(&self, ranks: &[u32]) -> Result<()> {
        if let Some(host) = &self.host {
            host.lock().await.remove_imported(ranks);
        }
        if let Some(device) = &self.device {
            device.lock().await.remove_imported(ranks);
        }
        Ok(())
    }

    /// Finds the tier whose GVA window contains `addr`. `memory_in_range`
    /// needs a live segment reference; since the check is a synchronous
    /// read, a `try_lock` suffices here and avoids taking the async lock
    /// twice just to classify an address.
    fn tier_for_addr(&self, addr: u64, len: u64) -> Result<Tier> {
        if let Some(host) = &self.host {
            if host.try_lock().is_ok_and(|g| g.memory_in_range(addr, len)) {
                return Ok(Tier::HostDram);
            }
        }
        if let Some(device) = &self.device {
            if device.try_lock().is_ok_and(|g| g.memory_in_range(addr, len)) {
                return Ok(Tier::DeviceHbm);
            }
        }
        Err(Error::InvalidParam(format!(
            "address {addr:#x} is not within any of this entity's segment windows"
        )))
    }

    /// `CopyData`: resolves `src_addr`/`dest_addr` to their owning tiers
    /// independently, so a host-tier source and a device-tier destination
    /// (or vice versa) both resolve and dispatch through `ComposeDataOp`
    /// with one `SegmentOps` reference per side. When both addresses land
    /// in the same tier that is a single lock; when they differ, both
    /// segments are locked in a fixed host-then-device order so that two
    /// entities copying in opposite directions at once can never deadlock
    /// against each other.
    pub async fn copy_data(&self, src_addr: u64, dest_addr: u64, len: u64, direction: CopyDirection) -> Result<()> {
        self.require_state(&[EntityState::Connected, EntityState::Operating], "copy_data")?;
        let src_tier = self.tier_for_addr(src_addr, len)?;
        let dest_tier = self.tier_for_addr(dest_addr, len)?;

        if src_tier == dest_tier {
            let guard = self.segment(src_tier)?.lock().await;
            let params = CopyParams {
                src_rank: RankId(guard.get_rank_id_by_addr(src_addr, len)),
                src_addr,
                dest_rank: RankId(guard.get_rank_id_by_addr(dest_addr, len)),
                dest_addr,
                len,
                direction,
                cross_tier: false,
            };
            self.compose.data_copy(&*guard, &*guard, params).await
        } else {
            let host_guard = self.segment(Tier::HostDram)?.lock().await;
            let device_guard = self.segment(Tier::DeviceHbm)?.lock().await;
            let (src_guard, dest_guard): (&MemSegment, &MemSegment) = match src_tier {
                Tier::HostDram => (&host_guard, &device_guard),
                Tier::DeviceHbm => (&device_guard, &host_guard),
            };
            let params = CopyParams {
                src_rank: RankId(src_guard.get_rank_id_by_addr(src_addr, len)),
                src_addr,
                dest_rank: RankId(dest_guard.get_rank_id_by_addr(dest_addr, len)),
                dest_addr,
                len,
                direction,
                cross_tier: true,
            };
            self.compose.data_copy(src_guard, dest_guard, params).await
        }
    }

    /// `CopyData` 2D variant; same independent per-address tier
    /// resolution and lock ordering as `copy_data`.
    pub async fn copy_data_2d(
        &self,
        src_addr: u64,
        src_pitch: u64,
        dest_addr: u64,
        dest_pitch: u64,
        width: u64,
        height: u64,
        direction: CopyDirection,
    ) -> Result<()> {
        self.require_state(&[EntityState::Connected, EntityState::Operating], "copy_data_2d")?;
        let src_tier = self.tier_for_addr(src_addr, width)?;
        let dest_tier = self.tier_for_addr(dest_addr, width)?;

        if src_tier == dest_tier {
            let guard = self.segment(src_tier)?.lock().await;
            let params = Copy2dParams {
                src_rank: RankId(guard.get_rank_id_by_addr(src_addr, width)),
                src_addr,
                src_pitch,
                dest_rank: RankId(guard.get_rank_id_by_addr(dest_addr, width)),
                dest_addr,
                dest_pitch,
                width,
                height,
                direction,
                cross_tier: false,
            };
            self.compose.data_copy_2d(&*guard, &*guard, params).await
        } else {
            let host_guard = self.segment(Tier::HostDram)?.lock().await;
            let device_guard = self.segment(Tier::DeviceHbm)?.lock().await;
            let (src_guard, dest_guard): (&MemSegment, &MemSegment) = match src_tier {
                Tier::HostDram => (&host_guard, &device_guard),
                Tier::DeviceHbm => (&device_guard, &host_guard),
            };
            let params = Copy2dParams {
                src_rank: RankId(src_guard.get_rank_id_by_addr(src_addr, width)),
                src_addr,
                src_pitch,
                dest_rank: RankId(dest_guard.get_rank_id_by_addr(dest_addr, width)),
                dest_addr,
                dest_pitch,
                width,
                height,
                direction,
                cross_tier: true,
            };
            self.compose.data_copy_2d(src_guard, dest_guard, params).await
        }
    }

    /// `smem_bm_ptr_by_mem_type`: the GVA address of `peer_rank`'s
    /// sub-window within `tier`'s segment.
    pub async fn ptr_by_mem_type(&self, tier: Tier, peer_rank: RankId) -> Result<u64> {
        let segment = self.segment(tier)?.lock().await;
        let own_rank = segment.rank_id();
        let per_rank = segment.per_rank_size();
        let own_base = segment.local_base();
        let delta = i128::from(peer_rank.0) - i128::from(own_rank);
        let shifted = i128::from(own_base) + delta * i128::from(per_rank);
        u64::try_from(shifted)
            .map_err(|_| Error::InvalidParam(format!("peer rank {peer_rank} has no representable address in this tier")))
    }

    /// `smem_bm_ptr`: same as `ptr_by_mem_type`, defaulting to the device
    /// tier if present (matching `ReserveMemorySpace`'s host-preferred
    /// default would instead prefer host; this picks whichever single
    /// tier the entity actually has when only one is configured).
    pub async fn ptr(&self, peer_rank: RankId) -> Result<u64> {
        if self.device.is_some() {
            self.ptr_by_mem_type(Tier::DeviceHbm, peer_rank).await
        } else {
            self.ptr_by_mem_type(Tier::HostDram, peer_rank).await
        }
    }

    /// `smem_bm_get_local_mem_size`: total per-rank window size across
    /// whichever tiers this entity owns.
    #[must_use]
    pub fn local_mem_size(&self) -> u64 {
        self.options.host_size + self.options.hbm_size
    }

    /// Reads `len` bytes at `addr` out of whichever segment owns that
    /// address's window. Exposed mainly for callers that need to inspect
    /// a slice's contents directly (tests, the CLI's reporting commands)
    /// rather than through a copy.
    pub async fn read(&self, tier: Tier, addr: u64, len: u64) -> Result<Vec<u8>> {
        self.segment(tier)?.lock().await.read(addr, len)
    }

    /// Writes `data` at `addr` in `tier`'s segment.
    pub async fn write(&self, tier: Tier, addr: u64, data: &[u8]) -> Result<()> {
        self.segment(tier)?.lock().await.write(addr, data)
    }

    /// Registers `local_addr`/`size` with the transport so a peer's
    /// one-sided RDMA/TCP read or write can address it directly. Exposed
    /// separately from `alloc_local_memory` since not every tier's
    /// backing needs transport registration (SDMA-only deployments
    /// never call it).
    pub async fn register_with_transport(&self, local_addr: u64, size: u64) -> Result<()> {
        self.transport.register_memory(MemoryRegion { local_addr, size }).await.map(|_| ())
    }

    /// `Leave` / `UnInitialize`: unmaps everything, closes the
    /// transport, and returns the entity to `Uninitialized`. Best-effort
    /// on the transport close, matching spec.md §4.7's "a call that
    /// fails after partial mutation restores the invariants it can".
    pub async fn leave(&self) -> Result<()> {
        *self.state.lock() = EntityState::Leaving;
        let unmap_result = self.unmap().await;
        let close_result = self.transport.close_device().await;
        *self.state.lock() = EntityState::Uninitialized;
        unmap_result?;
        close_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smem_transport::NullTransportManager;

    fn host_only_options(rank_id: u32, rank_count: u32) -> EntityOptions {
        EntityOptions {
            rank_id: RankId(rank_id),
            rank_count,
            device_id: smem_types::DeviceId(0),
            host_size: 4 * 1024 * 1024,
            hbm_size: 0,
            allowed_ops: OpTypeMask::SDMA,
            scene: Scene::Normal,
            tag: None,
            tag_op_info_csv: None,
            transport_nic: format!("loop{rank_id}"),
        }
    }

    async fn entity(rank_id: u32, rank_count: u32, registry: SharedBackingRegistry) -> MemEntity {
        let transport: Arc<dyn TransportManager> = Arc::new(NullTransportManager::new());
        MemEntity::initialize(host_only_options(rank_id, rank_count), registry, transport)
            .await
            .unwrap()
    }

    fn host_and_device_options(rank_id: u32, rank_count: u32) -> EntityOptions {
        EntityOptions { hbm_size: 4 * 1024 * 1024, ..host_only_options(rank_id, rank_count) }
    }

    async fn dual_tier_entity(rank_id: u32, rank_count: u32, registry: SharedBackingRegistry) -> MemEntity {
        let transport: Arc<dyn TransportManager> = Arc::new(NullTransportManager::new());
        MemEntity::initialize(host_and_device_options(rank_id, rank_count), registry, transport)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn single_rank_alloc_export_import_mmap_copy_round_trips() {
        let registry = SharedBackingRegistry::new();
        let e = entity(0, 1, registry).await;
        assert_eq!(e.state(), EntityState::Initialized);

        e.reserve_memory_space().await.unwrap();
        assert_eq!(e.state(), EntityState::Reserved);

        let a = e.alloc_local_memory(Tier::HostDram, 4096).await.unwrap();
        let b = e.alloc_local_memory(Tier::HostDram, 4096).await.unwrap();
        assert_eq!(e.state(), EntityState::Allocated);

        let own_envelope = e.export_exchange_info().await.unwrap();
        let peer = e.import_entity_exchange_info(&own_envelope).await.unwrap();
        assert_eq!(peer.owner_rank_id, 0);
        e.mmap().await.unwrap();
        assert_eq!(e.state(), EntityState::Operating);

        e.segment(Tier::HostDram).unwrap().lock().await.write(a.va(), &[42u8; 8]).unwrap();
        e.copy_data(a.va(), b.va(), 8, CopyDirection::Push).await.unwrap();
        let out = e.segment(Tier::HostDram).unwrap().lock().await.read(b.va(), 8).unwrap();
        assert_eq!(out, vec![42u8; 8]);
    }

    #[tokio::test]
    async fn copy_data_bridges_host_and_device_tiers() {
        let registry = SharedBackingRegistry::new();
        let e = dual_tier_entity(0, 1, registry).await;
        e.reserve_memory_space().await.unwrap();

        let host_slice = e.alloc_local_memory(Tier::HostDram, 4096).await.unwrap();
        let device_slice = e.alloc_local_memory(Tier::DeviceHbm, 4096).await.unwrap();

        let own_envelope = e.export_exchange_info().await.unwrap();
        e.import_entity_exchange_info(&own_envelope).await.unwrap();
        e.mmap().await.unwrap();

        e.write(Tier::HostDram, host_slice.va(), &[9u8; 16]).await.unwrap();
        e.copy_data(host_slice.va(), device_slice.va(), 16, CopyDirection::Push).await.unwrap();
        let out = e.read(Tier::DeviceHbm, device_slice.va(), 16).await.unwrap();
        assert_eq!(out, vec![9u8; 16]);

        // and the reverse direction, device source to host destination.
        let host_slice2 = e.alloc_local_memory(Tier::HostDram, 4096).await.unwrap();
        e.write(Tier::DeviceHbm, device_slice.va(), &[3u8; 8]).await.unwrap();
        e.copy_data(device_slice.va(), host_slice2.va(), 8, CopyDirection::Push).await.unwrap();
        let back = e.read(Tier::HostDram, host_slice2.va(), 8).await.unwrap();
        assert_eq!(back, vec![3u8; 8]);
    }

    #[tokio::test]
    async fn two_ranks_exchange_descriptors_and_copy_across_windows() {
        let registry = SharedBackingRegistry::new();
        let e0 = entity(0, 2, registry.clone()).await;
        let e1 = entity(1, 2, registry).await;

        e0.reserve_memory_space().await.unwrap();
        e1.reserve_memory_space().await.unwrap();
        let s0 = e0.alloc_local_memory(Tier::HostDram, 4096).await.unwrap();
        let s1 = e1.alloc_local_memory(Tier::HostDram, 4096).await.unwrap();

        let env0 = e0.export_exchange_info().await.unwrap();
        let env1 = e1.export_exchange_info().await.unwrap();

        e0.import_entity_exchange_info(&env1).await.unwrap();
        e1.import_entity_exchange_info(&env0).await.unwrap();
        e0.mmap().await.unwrap();
        e1.mmap().await.unwrap();

        e0.segment(Tier::HostDram).unwrap().lock().await.write(s0.va(), &[7u8; 4]).unwrap();
        // rank 0 pushes into rank 1's slice, addressed through rank 0's own
        // mapped view of rank 1's sub-window.
        e0.copy_data(s0.va(), s1.va(), 4, CopyDirection::Push).await.unwrap();
        let seen = e1.segment(Tier::HostDram).unwrap().lock().await.read(s1.va(), 4).unwrap();
        assert_eq!(seen, vec![7u8; 4]);
    }

    #[tokio::test]
    async fn alloc_before_reserve_is_rejected() {
        let registry = SharedBackingRegistry::new();
        let e = entity(0, 1, registry).await;
        let result = e.alloc_local_memory(Tier::HostDram, 4096).await;
        assert!(matches!(result, Err(Error::NotInitialized(_))));
    }

    #[tokio::test]
    async fn alloc_on_tier_with_no_segment_is_rejected() {
        let registry = SharedBackingRegistry::new();
        let e = entity(0, 1, registry).await;
        e.reserve_memory_space().await.unwrap();
        let result = e.alloc_local_memory(Tier::DeviceHbm, 4096).await;
        assert!(matches!(result, Err(Error::InvalidParam(_))));
    }
}
