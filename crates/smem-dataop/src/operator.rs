//! `DataOperator`: the per-transport copy engine `ComposeDataOp` dispatches
//! to. Every address pair is resolved through `SegmentOps`, which already
//! sees any rank's bytes it has mapped (its own slices, or slices it has
//! `Import`-ed and `Mmap`-ed) via `smem-mem`'s `SharedBackingRegistry`
//! substitution — so every operator here ultimately moves bytes the same
//! way, and what actually distinguishes SDMA from the RDMA-class operators
//! is which preconditions each enforces and which tag/priority bucket
//! `ComposeDataOp` sorts it into, exactly as in the original. A copy's
//! source and destination addresses can live in different segments (a
//! host-tier source, a device-tier destination), so every entry point
//! takes one `SegmentOps` reference per side rather than a single shared
//! one; same-tier callers simply pass the same segment for both. A
//! cross-tier copy (`CopyParams::cross_tier`) stages through the
//! operator's own scratch pool instead of reading-then-writing directly,
//! matching spec.md §4.4.1's "stage through scratch" path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use smem_mem::SegmentOps;
use smem_rangepool::RangePool;
use smem_transport::TransportManager;
use smem_types::{Error, RankId, Result};
use tracing::debug;

use crate::params::{BatchCopyParams, Copy2dParams, CopyParams};

/// Handle for an in-flight async copy, returned by `data_copy_async` and
/// consumed by `wait`. Only SDMA supports true async in the original; the
/// other operators' `data_copy_async` degrades to synchronous completion.
pub type WaitId = i64;

/// Nominal scratch pool size every operator allocates at construction and
/// releases when dropped, matching spec.md §4.4.1's "bounded HBM scratch
/// region (nominal 128 MiB) ... Created in `Initialize`, released in
/// `UnInitialize`" (§4.4.3 gives the host-RDMA operator's pool the same
/// nominal size).
pub const DEFAULT_SCRATCH_SIZE: u64 = 128 * 1024 * 1024;

const SCRATCH_ALIGN: u64 = 4096;

#[async_trait]
pub trait DataOperator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn data_copy(&self, src_segment: &dyn SegmentOps, dest_segment: &dyn SegmentOps, params: CopyParams) -> Result<()>;

    async fn data_copy_2d(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: Copy2dParams,
    ) -> Result<()>;

    async fn batch_data_copy(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: &BatchCopyParams,
    ) -> Result<()>;

    async fn data_copy_async(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: CopyParams,
    ) -> Result<WaitId>;

    async fn wait(&self, wait_id: WaitId) -> Result<()>;
}

fn move_bytes(src_segment: &dyn SegmentOps, dest_segment: &dyn SegmentOps, params: CopyParams) -> Result<()> {
    let data = src_segment.read(params.src_addr, params.len)?;
    dest_segment.write(params.dest_addr, &data)
}

fn move_bytes_2d(src_segment: &dyn SegmentOps, dest_segment: &dyn SegmentOps, params: Copy2dParams) -> Result<()> {
    for row in 0..params.height {
        let src = params.src_addr + row * params.src_pitch;
        let dest = params.dest_addr + row * params.dest_pitch;
        let data = src_segment.read(src, params.width)?;
        dest_segment.write(dest, &data)?;
    }
    Ok(())
}

/// The allocator/scratch layer spec.md §2 calls out as shared machinery
/// between segments and operators: a `RangePool` carving a boxed byte
/// buffer. A cross-tier copy stages through one chunk of this pool at a
/// time — allocate, copy in, copy out, release — instead of reading the
/// source and writing the destination directly, so the staged region is
/// never shared between two copies in flight (invariant §3.7) and is
/// always released once the copy through it completes.
struct Scratch {
    pool: RangePool,
    backing: Arc<RwLock<Vec<u8>>>,
}

impl Scratch {
    fn new(size: u64) -> Self {
        Scratch { pool: RangePool::new(0, size, SCRATCH_ALIGN), backing: Arc::new(RwLock::new(vec![0u8; size as usize])) }
    }

    /// Copies `len` bytes from `src_addr` in `src_segment` to `dest_addr`
    /// in `dest_segment` by staging through one or more scratch chunks,
    /// the way `HostDataOpSDMA` stages a tier mismatch through its scratch
    /// HBM pool before issuing the cross-GVM G2G descriptor. A transfer
    /// larger than the pool is split into pool-sized chunks; each chunk's
    /// scratch allocation is released as soon as that chunk's copy
    /// completes, never held across more than one chunk.
    fn stage_copy(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        mut src_addr: u64,
        mut dest_addr: u64,
        mut remaining: u64,
    ) -> Result<()> {
        let chunk_cap = self.pool.total().max(1);
        while remaining > 0 {
            let chunk = remaining.min(chunk_cap);
            let elem = self.pool.allocate(chunk)?;
            let offset = elem.offset() as usize;
            let data = src_segment.read(src_addr, chunk)?;
            self.backing.write()[offset..offset + chunk as usize].copy_from_slice(&data);
            let staged = self.backing.read()[offset..offset + chunk as usize].to_vec();
            let result = dest_segment.write(dest_addr, &staged);
            drop(elem);
            result?;

            src_addr += chunk;
            dest_addr += chunk;
            remaining -= chunk;
        }
        Ok(())
    }
}

fn execute_copy(src_segment: &dyn SegmentOps, dest_segment: &dyn SegmentOps, params: CopyParams, scratch: &Scratch) -> Result<()> {
    if params.cross_tier {
        scratch.stage_copy(src_segment, dest_segment, params.src_addr, params.dest_addr, params.len)
    } else {
        move_bytes(src_segment, dest_segment, params)
    }
}

fn execute_copy_2d(
    src_segment: &dyn SegmentOps,
    dest_segment: &dyn SegmentOps,
    params: Copy2dParams,
    scratch: &Scratch,
) -> Result<()> {
    if !params.cross_tier {
        return move_bytes_2d(src_segment, dest_segment, params);
    }
    for row in 0..params.height {
        let src = params.src_addr + row * params.src_pitch;
        let dest = params.dest_addr + row * params.dest_pitch;
        scratch.stage_copy(src_segment, dest_segment, src, dest, params.width)?;
    }
    Ok(())
}

/// Merges contiguous runs in `ops` into single wider copies — the way
/// `HostDataOpSDMA::BatchDataCopy` detects `src+len == nextSrc && dst+len
/// == nextDst` and concatenates them into one G2G descriptor instead of
/// submitting one per input pair (spec.md §4.4.1 Batch; scenario S4).
/// Runs only merge when rank pair, direction, and tier-crossing all match,
/// since those determine which single descriptor could possibly cover
/// both halves.
pub(crate) fn compact_contiguous_runs(ops: &[CopyParams]) -> Vec<CopyParams> {
    let mut runs: Vec<CopyParams> = Vec::new();
    for &op in ops {
        if let Some(last) = runs.last_mut() {
            let contiguous = last.src_rank == op.src_rank
                && last.dest_rank == op.dest_rank
                && last.direction == op.direction
                && last.cross_tier == op.cross_tier
                && last.src_addr + last.len == op.src_addr
                && last.dest_addr + last.len == op.dest_addr;
            if contiguous {
                last.len += op.len;
                continue;
            }
        }
        runs.push(op);
    }
    runs
}

/// Tracks completion of async handles. Since every copy here is actually
/// synchronous under the hood, `data_copy_async` finishes before it
/// returns and `wait` only ever confirms that.
#[derive(Default)]
struct WaitTable {
    next_id: AtomicI64,
    done: Mutex<HashMap<i64, Result<()>>>,
}

impl WaitTable {
    fn record(&self, outcome: Result<()>) -> WaitId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.done.lock().insert(id, outcome);
        id
    }

    fn take(&self, id: WaitId) -> Result<()> {
        self.done
            .lock()
            .remove(&id)
            .ok_or_else(|| Error::NotExist(format!("no such wait id {id}")))?
    }
}

/// Same-process memcpy between two already-mapped GVA addresses, possibly
/// in different tiers' segments. Grounded on `HostDataOpSDMA`'s G2G copy
/// path: same-tier endpoints go straight through as a single descriptor
/// (`execute_copy`'s direct branch — the "Direct G2G" case in spec.md
/// §4.4.1), a tier mismatch stages through `scratch` (the "Stage through
/// scratch" case), and `batch_data_copy` compacts contiguous input pairs
/// into fewer descriptors before executing them.
pub struct SdmaDataOperator {
    waits: WaitTable,
    scratch: Scratch,
}

impl SdmaDataOperator {
    #[must_use]
    pub fn new() -> Self {
        Self::with_scratch_size(DEFAULT_SCRATCH_SIZE)
    }

    /// Builds an operator with a non-default scratch pool size; callers
    /// that stage many small cross-tier copies in tests use this to avoid
    /// paying for a full 128 MiB buffer per operator instance.
    #[must_use]
    pub fn with_scratch_size(scratch_size: u64) -> Self {
        SdmaDataOperator { waits: WaitTable::default(), scratch: Scratch::new(scratch_size) }
    }
}

impl Default for SdmaDataOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataOperator for SdmaDataOperator {
    fn name(&self) -> &'static str {
        "SDMA"
    }

    async fn data_copy(&self, src_segment: &dyn SegmentOps, dest_segment: &dyn SegmentOps, params: CopyParams) -> Result<()> {
        execute_copy(src_segment, dest_segment, params, &self.scratch)
    }

    async fn data_copy_2d(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: Copy2dParams,
    ) -> Result<()> {
        execute_copy_2d(src_segment, dest_segment, params, &self.scratch)
    }

    async fn batch_data_copy(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: &BatchCopyParams,
    ) -> Result<()> {
        let runs = compact_contiguous_runs(&params.ops);
        debug!(ops = params.ops.len(), descriptors = runs.len(), "SDMA batch compacted into descriptors");
        for run in runs {
            execute_copy(src_segment, dest_segment, run, &self.scratch)?;
        }
        Ok(())
    }

    async fn data_copy_async(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: CopyParams,
    ) -> Result<WaitId> {
        let outcome = execute_copy(src_segment, dest_segment, params, &self.scratch);
        Ok(self.waits.record(outcome))
    }

    async fn wait(&self, wait_id: WaitId) -> Result<()> {
        self.waits.take(wait_id)
    }
}

/// Shared shape of the two RDMA-class operators: both require the remote
/// rank to be `connect`-ed first (the original's precondition on issuing
/// `ReadRemote`/`WriteRemote`), then move bytes through the shared GVA
/// view the same way SDMA does (staging through their own scratch pool on
/// a tier mismatch, per spec.md §4.4.2/§4.4.3), since this workspace has
/// no separate process to actually cross — see `DESIGN.md`.
struct RdmaCore {
    name: &'static str,
    transport: Arc<dyn TransportManager>,
    local_rank: RankId,
    scratch: Scratch,
}

impl RdmaCore {
    fn remote_of(&self, src_rank: RankId, dest_rank: RankId) -> Result<Option<RankId>> {
        match (src_rank == self.local_rank, dest_rank == self.local_rank) {
            (true, true) => Ok(None),
            (true, false) => Ok(Some(dest_rank)),
            (false, true) => Ok(Some(src_rank)),
            (false, false) => Err(Error::NotSupported(format!(
                "{} cannot bridge two remote ranks ({src_rank} -> {dest_rank}) directly",
                self.name
            ))),
        }
    }

    fn ensure_connected(&self, src_rank: RankId, dest_rank: RankId) -> Result<()> {
        if let Some(remote) = self.remote_of(src_rank, dest_rank)? {
            if !self.transport.is_connected(remote) {
                return Err(Error::TransportError(format!(
                    "{} has no connection to rank {remote}",
                    self.name
                )));
            }
            debug!(op = self.name, remote = remote.0, "rdma copy gated on live connection");
        }
        Ok(())
    }

    fn copy(&self, src_segment: &dyn SegmentOps, dest_segment: &dyn SegmentOps, params: CopyParams) -> Result<()> {
        self.ensure_connected(params.src_rank, params.dest_rank)?;
        execute_copy(src_segment, dest_segment, params, &self.scratch)
    }

    fn copy_2d(&self, src_segment: &dyn SegmentOps, dest_segment: &dyn SegmentOps, params: Copy2dParams) -> Result<()> {
        self.ensure_connected(params.src_rank, params.dest_rank)?;
        execute_copy_2d(src_segment, dest_segment, params, &self.scratch)
    }
}

/// Device-to-device RDMA operator.
pub struct DeviceRdmaDataOperator {
    core: RdmaCore,
    waits: WaitTable,
}

impl DeviceRdmaDataOperator {
    #[must_use]
    pub fn new(local_rank: RankId, transport: Arc<dyn TransportManager>) -> Self {
        Self::with_scratch_size(local_rank, transport, DEFAULT_SCRATCH_SIZE)
    }

    #[must_use]
    pub fn with_scratch_size(local_rank: RankId, transport: Arc<dyn TransportManager>, scratch_size: u64) -> Self {
        DeviceRdmaDataOperator {
            core: RdmaCore { name: "DEV_RDMA", transport, local_rank, scratch: Scratch::new(scratch_size) },
            waits: WaitTable::default(),
        }
    }
}

#[async_trait]
impl DataOperator for DeviceRdmaDataOperator {
    fn name(&self) -> &'static str {
        "DEV_RDMA"
    }

    async fn data_copy(&self, src_segment: &dyn SegmentOps, dest_segment: &dyn SegmentOps, params: CopyParams) -> Result<()> {
        self.core.copy(src_segment, dest_segment, params)
    }

    async fn data_copy_2d(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: Copy2dParams,
    ) -> Result<()> {
        self.core.copy_2d(src_segment, dest_segment, params)
    }

    async fn batch_data_copy(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: &BatchCopyParams,
    ) -> Result<()> {
        for op in &params.ops {
            self.core.copy(src_segment, dest_segment, *op)?;
        }
        Ok(())
    }

    async fn data_copy_async(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: CopyParams,
    ) -> Result<WaitId> {
        let outcome = self.core.copy(src_segment, dest_segment, params);
        Ok(self.waits.record(outcome))
    }

    async fn wait(&self, wait_id: WaitId) -> Result<()> {
        self.waits.take(wait_id)
    }
}

/// Host-side RDMA/URMA/TCP-fallback operator. Functionally identical to
/// `DeviceRdmaDataOperator` here; the original's three host transports
/// (RDMA/URMA/TCP) share one `HostDataOpRdma` implementation and are
/// distinguished only by which `TransportManager` they're constructed
/// with, which this mirrors.
pub struct HostRdmaDataOperator {
    core: RdmaCore,
    waits: WaitTable,
}

impl HostRdmaDataOperator {
    #[must_use]
    pub fn new(local_rank: RankId, transport: Arc<dyn TransportManager>) -> Self {
        Self::with_scratch_size(local_rank, transport, DEFAULT_SCRATCH_SIZE)
    }

    #[must_use]
    pub fn with_scratch_size(local_rank: RankId, transport: Arc<dyn TransportManager>, scratch_size: u64) -> Self {
        HostRdmaDataOperator {
            core: RdmaCore { name: "HOST_RDMA", transport, local_rank, scratch: Scratch::new(scratch_size) },
            waits: WaitTable::default(),
        }
    }
}

#[async_trait]
impl DataOperator for HostRdmaDataOperator {
    fn name(&self) -> &'static str {
        "HOST_RDMA"
    }

    async fn data_copy(&self, src_segment: &dyn SegmentOps, dest_segment: &dyn SegmentOps, params: CopyParams) -> Result<()> {
        self.core.copy(src_segment, dest_segment, params)
    }

    async fn data_copy_2d(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: Copy2dParams,
    ) -> Result<()> {
        self.core.copy_2d(src_segment, dest_segment, params)
    }

    async fn batch_data_copy(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: &BatchCopyParams,
    ) -> Result<()> {
        for op in &params.ops {
            self.core.copy(src_segment, dest_segment, *op)?;
        }
        Ok(())
    }

    async fn data_copy_async(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: CopyParams,
    ) -> Result<WaitId> {
        let outcome = self.core.copy(src_segment, dest_segment, params);
        Ok(self.waits.record(outcome))
    }

    async fn wait(&self, wait_id: WaitId) -> Result<()> {
        self.waits.take(wait_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smem_mem::{MemSegment, SegmentKind, SegmentOptions, SharedBackingRegistry};
    use smem_transport::NullTransportManager;
    use smem_types::{CopyDirection, Tier};

    const TEST_SCRATCH: u64 = 64 * 1024;

    fn opts(tier: Tier, rank_id: u32) -> SegmentOptions {
        SegmentOptions {
            tier,
            base: 0,
            per_rank_size: 4 * 1024 * 1024,
            rank_count: 1,
            rank_id,
            align: 4096,
        }
    }

    #[tokio::test]
    async fn sdma_copies_within_one_segment() {
        let registry = SharedBackingRegistry::new();
        let mut segment = MemSegment::new(SegmentKind::HostConn, opts(Tier::HostDram, 0), registry);
        let a = segment.allocate(4096).unwrap();
        let b = segment.allocate(4096).unwrap();
        segment.write(a.va(), &[3u8; 8]).unwrap();

        let op = SdmaDataOperator::with_scratch_size(TEST_SCRATCH);
        op.data_copy(
            &segment,
            &segment,
            CopyParams {
                src_rank: RankId(0),
                src_addr: a.va(),
                dest_rank: RankId(0),
                dest_addr: b.va(),
                len: 8,
                direction: CopyDirection::Push,
                cross_tier: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(segment.read(b.va(), 8).unwrap(), vec![3u8; 8]);
    }

    #[tokio::test]
    async fn sdma_copies_across_host_and_device_segments() {
        let registry = SharedBackingRegistry::new();
        let mut host = MemSegment::new(SegmentKind::HostConn, opts(Tier::HostDram, 0), registry.clone());
        let mut device = MemSegment::new(SegmentKind::HbmVmm, opts(Tier::DeviceHbm, 0), registry);
        let src = host.allocate(4096).unwrap();
        let dest = device.allocate(4096).unwrap();
        host.write(src.va(), &[11u8; 16]).unwrap();

        let op = SdmaDataOperator::with_scratch_size(TEST_SCRATCH);
        op.data_copy(
            &host,
            &device,
            CopyParams {
                src_rank: RankId(0),
                src_addr: src.va(),
                dest_rank: RankId(0),
                dest_addr: dest.va(),
                len: 16,
                direction: CopyDirection::Push,
                cross_tier: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(device.read(dest.va(), 16).unwrap(), vec![11u8; 16]);
    }

    #[tokio::test]
    async fn cross_tier_copy_larger_than_one_scratch_chunk_still_completes() {
        // Scratch pool is much smaller than the transfer, so stage_copy
        // must loop over several chunks and still move every byte.
        let registry = SharedBackingRegistry::new();
        let mut host = MemSegment::new(SegmentKind::HostConn, opts(Tier::HostDram, 0), registry.clone());
        let mut device = MemSegment::new(SegmentKind::HbmVmm, opts(Tier::DeviceHbm, 0), registry);
        let len = 256 * 1024u64;
        let src = host.allocate(len).unwrap();
        let dest = device.allocate(len).unwrap();
        let pattern: Vec<u8> = (0..len as usize).map(|i| (i % 251) as u8).collect();
        host.write(src.va(), &pattern).unwrap();

        let op = SdmaDataOperator::with_scratch_size(16 * 1024);
        op.data_copy(
            &host,
            &device,
            CopyParams {
                src_rank: RankId(0),
                src_addr: src.va(),
                dest_rank: RankId(0),
                dest_addr: dest.va(),
                len,
                direction: CopyDirection::Push,
                cross_tier: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(device.read(dest.va(), len).unwrap(), pattern);
    }

    #[tokio::test]
    async fn scratch_is_released_after_each_staged_copy() {
        // Invariant §3.7: the staged region is released once the whole
        // copy completes, so the pool's full capacity is free again and a
        // second, independent cross-tier copy of the same size succeeds.
        let registry = SharedBackingRegistry::new();
        let mut host = MemSegment::new(SegmentKind::HostConn, opts(Tier::HostDram, 0), registry.clone());
        let mut device = MemSegment::new(SegmentKind::HbmVmm, opts(Tier::DeviceHbm, 0), registry);
        let a = host.allocate(4096).unwrap();
        let b = host.allocate(4096).unwrap();
        let dest = device.allocate(4096).unwrap();
        host.write(a.va(), &[1u8; 4096]).unwrap();
        host.write(b.va(), &[2u8; 4096]).unwrap();

        let op = SdmaDataOperator::with_scratch_size(4096);
        let params = |src_addr: u64| CopyParams {
            src_rank: RankId(0),
            src_addr,
            dest_rank: RankId(0),
            dest_addr: dest.va(),
            len: 4096,
            direction: CopyDirection::Push,
            cross_tier: true,
        };
        op.data_copy(&host, &device, params(a.va())).await.unwrap();
        assert_eq!(device.read(dest.va(), 4096).unwrap(), vec![1u8; 4096]);
        op.data_copy(&host, &device, params(b.va())).await.unwrap();
        assert_eq!(device.read(dest.va(), 4096).unwrap(), vec![2u8; 4096]);
    }

    #[tokio::test]
    async fn rdma_copy_fails_without_connection() {
        let registry = SharedBackingRegistry::new();
        let segment = MemSegment::new(SegmentKind::HostConn, opts(Tier::HostDram, 0), registry);
        let transport: Arc<dyn TransportManager> = Arc::new(NullTransportManager::new());
        let op = DeviceRdmaDataOperator::with_scratch_size(RankId(0), transport, TEST_SCRATCH);
        let result = op
            .data_copy(
                &segment,
                &segment,
                CopyParams {
                    src_rank: RankId(0),
                    src_addr: 0,
                    dest_rank: RankId(1),
                    dest_addr: 0,
                    len: 8,
                    direction: CopyDirection::Push,
                    cross_tier: false,
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn async_copy_then_wait_reports_completion() {
        let registry = SharedBackingRegistry::new();
        let mut segment = MemSegment::new(SegmentKind::HostConn, opts(Tier::HostDram, 0), registry);
        let a = segment.allocate(4096).unwrap();
        let b = segment.allocate(4096).unwrap();
        segment.write(a.va(), &[9u8; 4]).unwrap();

        let op = SdmaDataOperator::with_scratch_size(TEST_SCRATCH);
        let id = op
            .data_copy_async(
                &segment,
                &segment,
                CopyParams {
                    src_rank: RankId(0),
                    src_addr: a.va(),
                    dest_rank: RankId(0),
                    dest_addr: b.va(),
                    len: 4,
                    direction: CopyDirection::Push,
                    cross_tier: false,
                },
            )
            .await
            .unwrap();
        op.wait(id).await.unwrap();
        assert_eq!(segment.read(b.va(), 4).unwrap(), vec![9u8; 4]);
    }

    #[tokio::test]
    async fn batch_copy_moves_every_contiguous_range() {
        let registry = SharedBackingRegistry::new();
        let mut segment = MemSegment::new(SegmentKind::HostConn, opts(Tier::HostDram, 0), registry);
        let src = segment.allocate(4096).unwrap();
        let dest = segment.allocate(4096).unwrap();
        let n = 16u64;
        segment.write(src.va(), &(0..(3 * n) as usize).map(|i| i as u8).collect::<Vec<_>>()).unwrap();

        let op = SdmaDataOperator::with_scratch_size(TEST_SCRATCH);
        let ops = (0..3)
            .map(|i| CopyParams {
                src_rank: RankId(0),
                src_addr: src.va() + i * n,
                dest_rank: RankId(0),
                dest_addr: dest.va() + i * n,
                len: n,
                direction: CopyDirection::Push,
                cross_tier: false,
            })
            .collect();
        op.batch_data_copy(&segment, &segment, &BatchCopyParams { ops }).await.unwrap();

        let expected: Vec<u8> = (0..(3 * n) as usize).map(|i| i as u8).collect();
        assert_eq!(segment.read(dest.va(), 3 * n).unwrap(), expected);
    }

    #[test]
    fn batch_compaction_merges_three_contiguous_ranges_into_one_descriptor() {
        // Scenario S4: three contiguous (src, dst, n) triples compact into
        // exactly one descriptor with len = 3n.
        let n = 16u64;
        let ops: Vec<CopyParams> = (0..3)
            .map(|i| CopyParams {
                src_rank: RankId(0),
                src_addr: 0x1000 + i * n,
                dest_rank: RankId(0),
                dest_addr: 0x2000 + i * n,
                len: n,
                direction: CopyDirection::Push,
                cross_tier: false,
            })
            .collect();
        let runs = compact_contiguous_runs(&ops);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len, 3 * n);
        assert_eq!(runs[0].src_addr, 0x1000);
        assert_eq!(runs[0].dest_addr, 0x2000);
    }

    #[test]
    fn batch_compaction_keeps_non_contiguous_ranges_separate() {
        let ops = vec![
            CopyParams {
                src_rank: RankId(0),
                src_addr: 0x1000,
                dest_rank: RankId(0),
                dest_addr: 0x2000,
                len: 16,
                direction: CopyDirection::Push,
                cross_tier: false,
            },
            CopyParams {
                src_rank: RankId(0),
                src_addr: 0x3000, // not contiguous with the first run
                dest_rank: RankId(0),
                dest_addr: 0x2010,
                len: 16,
                direction: CopyDirection::Push,
                cross_tier: false,
            },
        ];
        let runs = compact_contiguous_runs(&ops);
        assert_eq!(runs.len(), 2);
    }
}
