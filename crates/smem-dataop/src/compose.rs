//! `ComposeDataOp`: picks which `DataOperator` actually performs a copy.
//!
//! Grounded on `HostComposeDataOp::DataCopy`/`GetPrioritedDataOperators`:
//! the `"trans"` scene shortcuts straight to SDMA-or-device-RDMA and
//! nothing else; otherwise the tag pair's `OpTypeMask` is intersected
//! with whichever operators were actually constructed, tried in the
//! fixed order SDMA, DEV_RDMA, HOST_RDMA, HOST_URMA, stopping at the
//! first success and returning the last error if every candidate fails.

use std::sync::Arc;

use smem_mem::SegmentOps;
use smem_transport::TransportManager;
use smem_types::{Error, OpTypeMask, RankId, Result};
use tracing::{debug, error, info};

use crate::operator::{DataOperator, DeviceRdmaDataOperator, HostRdmaDataOperator, SdmaDataOperator, WaitId};
use crate::params::{BatchCopyParams, Copy2dParams, CopyParams, Scene};
use crate::tag_info::EntityTagInfo;

/// Which operators `ComposeDataOp` was built with. Mirrors
/// `hybm_options.bmDataOpType`: a caller enables only the transports it
/// actually has hardware/connectivity for.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnabledOperators {
    pub sdma: bool,
    pub device_rdma: bool,
    pub host_rdma: bool,
    pub host_urma: bool,
}

pub struct ComposeDataOp {
    scene: Scene,
    sdma: Option<Arc<dyn DataOperator>>,
    device_rdma: Option<Arc<dyn DataOperator>>,
    host_rdma: Option<Arc<dyn DataOperator>>,
    tag_info: Arc<EntityTagInfo>,
}

impl ComposeDataOp {
    #[must_use]
    pub fn new(
        scene: Scene,
        sdma: Option<Arc<dyn DataOperator>>,
        device_rdma: Option<Arc<dyn DataOperator>>,
        host_rdma: Option<Arc<dyn DataOperator>>,
        tag_info: Arc<EntityTagInfo>,
    ) -> Self {
        ComposeDataOp { scene, sdma, device_rdma, host_rdma, tag_info }
    }

    /// Builds only the operators `enabled` asks for, the way
    /// `HostComposeDataOp::Initialize` conditionally constructs each one
    /// from `options_.bmDataOpType`'s bitmask.
    #[must_use]
    pub fn build(
        scene: Scene,
        enabled: EnabledOperators,
        local_rank: RankId,
        transport: Arc<dyn TransportManager>,
        tag_info: Arc<EntityTagInfo>,
    ) -> Self {
        let sdma: Option<Arc<dyn DataOperator>> = enabled.sdma.then(|| {
            info!("initializing SDMA data operator");
            Arc::new(SdmaDataOperator::new()) as Arc<dyn DataOperator>
        });
        let device_rdma: Option<Arc<dyn DataOperator>> = enabled.device_rdma.then(|| {
            info!("initializing device RDMA data operator");
            Arc::new(DeviceRdmaDataOperator::new(local_rank, transport.clone())) as Arc<dyn DataOperator>
        });
        let host_rdma: Option<Arc<dyn DataOperator>> = (enabled.host_rdma || enabled.host_urma).then(|| {
            info!("initializing host RDMA/URMA data operator");
            Arc::new(HostRdmaDataOperator::new(local_rank, transport)) as Arc<dyn DataOperator>
        });
        ComposeDataOp::new(scene, sdma, device_rdma, host_rdma, tag_info)
    }

    /// Ordered, tag-policy-filtered candidate list for one rank pair.
    /// HOST_URMA shares `host_rdma`'s operator instance, same as the
    /// original routes both through one `HostDataOpRdma`.
    fn prioritized_operators(&self, src: RankId, dest: RankId) -> Vec<Arc<dyn DataOperator>> {
        let op_types = self.tag_info.get_rank2rank_op_type(src, dest);
        let mut ops = Vec::with_capacity(4);
        if let Some(op) = &self.sdma {
            if op_types.contains(OpTypeMask::SDMA) {
                ops.push(op.clone());
            }
        }
        if let Some(op) = &self.device_rdma {
            if op_types.contains(OpTypeMask::DEVICE_RDMA) {
                ops.push(op.clone());
            }
        }
        if let Some(op) = &self.host_rdma {
            if op_types.contains(OpTypeMask::HOST_RDMA) {
                ops.push(op.clone());
            }
        }
        if let Some(op) = &self.host_rdma {
            if op_types.contains(OpTypeMask::HOST_URMA) {
                ops.push(op.clone());
            }
        }
        ops
    }

    fn trans_operators(&self) -> Result<Arc<dyn DataOperator>> {
        self.sdma
            .clone()
            .or_else(|| self.device_rdma.clone())
            .ok_or_else(|| Error::InvalidParam("only SDMA or DEV_RDMA support the trans scene".into()))
    }

    pub async fn data_copy(&self, src_segment: &dyn SegmentOps, dest_segment: &dyn SegmentOps, params: CopyParams) -> Result<()> {
        if self.scene == Scene::Trans {
            return self.trans_operators()?.data_copy(src_segment, dest_segment, params).await;
        }

        let candidates = self.prioritized_operators(params.src_rank, params.dest_rank);
        if candidates.is_empty() {
            error!(
                src = params.src_rank.0,
                dest = params.dest_rank.0,
                "no data operator available for this rank pair"
            );
            return Err(Error::InvalidParam(format!(
                "no data operator available from rank {} to rank {}",
                params.src_rank, params.dest_rank
            )));
        }

        let mut last_err = None;
        for op in candidates {
            debug!(op = op.name(), "trying data copy");
            match op.data_copy(src_segment, dest_segment, params).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    error!(op = op.name(), %err, "data copy failed, trying next operator");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::InvalidParam("all data operators failed".into())))
    }

    pub async fn data_copy_2d(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: Copy2dParams,
    ) -> Result<()> {
        let candidates = if self.scene == Scene::Trans {
            vec![self.trans_operators()?]
        } else {
            self.prioritized_operators(params.src_rank, params.dest_rank)
        };
        let mut last_err = None;
        for op in &candidates {
            match op.data_copy_2d(src_segment, dest_segment, params).await {
                Ok(()) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::InvalidParam("no data operator available".into())))
    }

    pub async fn batch_data_copy(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: &BatchCopyParams,
    ) -> Result<()> {
        if self.scene == Scene::Trans {
            return self.trans_operators()?.batch_data_copy(src_segment, dest_segment, params).await;
        }
        // A batch may mix rank pairs; group candidates by the batch's
        // dominant pair would require per-op dispatch, so conservatively
        // use the first op's pair to pick operators, same as the original
        // (which resolves priority once per `BatchDataCopy` call).
        let (src, dest) = params
            .ops
            .first()
            .map(|op| (op.src_rank, op.dest_rank))
            .ok_or_else(|| Error::InvalidParam("batch copy with no operations".into()))?;
        let candidates = self.prioritized_operators(src, dest);
        if candidates.is_empty() {
            return Err(Error::InvalidParam(format!(
                "no data operator available from rank {src} to rank {dest}"
            )));
        }
        let mut last_err = None;
        for op in candidates {
            match op.batch_data_copy(src_segment, dest_segment, params).await {
                Ok(()) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::InvalidParam("all data operators failed".into())))
    }

    pub async fn data_copy_async(
        &self,
        src_segment: &dyn SegmentOps,
        dest_segment: &dyn SegmentOps,
        params: CopyParams,
    ) -> Result<(String, WaitId)> {
        let candidates = self.prioritized_operators(params.src_rank, params.dest_rank);
        let mut last_err = None;
        for op in candidates {
            match op.data_copy_async(src_segment, dest_segment, params).await {
                Ok(id) => return Ok((op.name().to_string(), id)),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::InvalidParam("no data operator available".into())))
    }

    /// Waits only ever target SDMA, matching the original's comment that
    /// the other transports have no async completion to wait on.
    pub async fn wait(&self, wait_id: WaitId) -> Result<()> {
        match &self.sdma {
            Some(op) => op.wait(wait_id).await,
            None => Err(Error::NotSupported("no SDMA data operator configured".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{DeviceRdmaDataOperator, SdmaDataOperator};
    use smem_mem::{MemSegment, SegmentKind, SegmentOptions, SharedBackingRegistry};
    use smem_transport::NullTransportManager;
    use smem_types::{CopyDirection, Tier};

    fn opts(rank_id: u32) -> SegmentOptions {
        SegmentOptions { tier: Tier::HostDram, base: 0, per_rank_size: 1024 * 1024, rank_count: 1, rank_id, align: 4096 }
    }

    fn compose(sdma: bool, device_rdma: bool, tag_info: Arc<EntityTagInfo>) -> ComposeDataOp {
        let sdma_op: Option<Arc<dyn DataOperator>> = if sdma { Some(Arc::new(SdmaDataOperator::new())) } else { None };
        let dev_op: Option<Arc<dyn DataOperator>> = if device_rdma {
            let transport: Arc<dyn smem_transport::TransportManager> = Arc::new(NullTransportManager::new());
            Some(Arc::new(DeviceRdmaDataOperator::new(RankId(0), transport)))
        } else {
            None
        };
        ComposeDataOp::new(Scene::Normal, sdma_op, dev_op, None, tag_info)
    }

    #[tokio::test]
    async fn falls_back_to_next_operator_when_first_is_unavailable() {
        let registry = SharedBackingRegistry::new();
        let mut segment = MemSegment::new(SegmentKind::HostConn, opts(0), registry);
        let a = segment.allocate(4096).unwrap();
        let b = segment.allocate(4096).unwrap();
        segment.write(a.va(), &[5u8; 4]).unwrap();

        let tag_info = Arc::new(EntityTagInfo::new());
        let op = compose(true, false, tag_info);
        op.data_copy(
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
        assert_eq!(segment.read(b.va(), 4).unwrap(), vec![5u8; 4]);
    }

    /// Wraps a real operator and fails its first `fail_first_n` calls to
    /// `data_copy` with a synthetic `TransportError`, counting every
    /// attempt. Used to exercise the fallback-on-error path (spec.md §8 S6)
    /// without a real transport to fail against.
    struct FlakyOperator {
        inner: Arc<dyn DataOperator>,
        name: &'static str,
        fail_first_n: usize,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DataOperator for FlakyOperator {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn data_copy(&self, src_segment: &dyn SegmentOps, dest_segment: &dyn SegmentOps, params: CopyParams) -> Result<()> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err(Error::TransportError(format!("{} injected failure #{n}", self.name)));
            }
            self.inner.data_copy(src_segment, dest_segment, params).await
        }

        async fn data_copy_2d(
            &self,
            src_segment: &dyn SegmentOps,
            dest_segment: &dyn SegmentOps,
            params: crate::params::Copy2dParams,
        ) -> Result<()> {
            self.inner.data_copy_2d(src_segment, dest_segment, params).await
        }

        async fn batch_data_copy(
            &self,
            src_segment: &dyn SegmentOps,
            dest_segment: &dyn SegmentOps,
            params: &crate::params::BatchCopyParams,
        ) -> Result<()> {
            self.inner.batch_data_copy(src_segment, dest_segment, params).await
        }

        async fn data_copy_async(
            &self,
            src_segment: &dyn SegmentOps,
            dest_segment: &dyn SegmentOps,
            params: CopyParams,
        ) -> Result<WaitId> {
            self.inner.data_copy_async(src_segment, dest_segment, params).await
        }

        async fn wait(&self, wait_id: WaitId) -> Result<()> {
            self.inner.wait(wait_id).await
        }
    }

    #[tokio::test]
    async fn transient_sdma_failure_falls_through_to_device_rdma_and_succeeds() {
        // S6: {SDMA, DEV_RDMA} present; SDMA's first call is transiently
        // broken. The overall call must still succeed (served by DEV_RDMA),
        // with SDMA attempted exactly once and DEV_RDMA exactly once.
        let registry = SharedBackingRegistry::new();
        let mut segment = MemSegment::new(SegmentKind::HostConn, opts(0), registry);
        let a = segment.allocate(4096).unwrap();
        let b = segment.allocate(4096).unwrap();
        segment.write(a.va(), &[7u8; 4]).unwrap();

        let flaky_sdma = Arc::new(FlakyOperator {
            inner: Arc::new(SdmaDataOperator::new()),
            name: "SDMA",
            fail_first_n: 1,
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let counting_dev_rdma = Arc::new(FlakyOperator {
            inner: Arc::new(SdmaDataOperator::new()),
            name: "DEV_RDMA",
            fail_first_n: 0,
            calls: std::sync::atomic::AtomicUsize::new(0),
        });

        let tag_info = Arc::new(EntityTagInfo::new());
        let op = ComposeDataOp::new(
            Scene::Normal,
            Some(flaky_sdma.clone()),
            Some(counting_dev_rdma.clone()),
            None,
            tag_info,
        );

        op.data_copy(
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

        assert_eq!(segment.read(b.va(), 4).unwrap(), vec![7u8; 4]);
        assert_eq!(flaky_sdma.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(counting_dev_rdma.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_operators_configured_is_an_error() {
        let registry = SharedBackingRegistry::new();
        let segment = MemSegment::new(SegmentKind::HostConn, opts(0), registry);
        let tag_info = Arc::new(EntityTagInfo::new());
        let op = compose(false, false, tag_info);
        let result = op
            .data_copy(
                &segment,
                &segment,
                CopyParams {
                    src_rank: RankId(0),
                    src_addr: 0,
                    dest_rank: RankId(0),
                    dest_addr: 0,
                    len: 4,
                    direction: CopyDirection::Push,
                    cross_tier: false,
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn all_candidates_failing_returns_the_last_operators_error_not_ok() {
        let tag_info = Arc::new(EntityTagInfo::new());
        tag_info.add_rank_tag(RankId(0), "gpu").unwrap();
        tag_info.add_rank_tag(RankId(1), "cpu").unwrap();
        tag_info.add_tag_op_info_csv("gpu:DEVICE_RDMA:cpu,gpu:HOST_RDMA:cpu").unwrap();

        let registry = SharedBackingRegistry::new();
        let segment = MemSegment::new(SegmentKind::HostConn, opts(0), registry);
        let transport: Arc<dyn smem_transport::TransportManager> = Arc::new(NullTransportManager::new());
        let device_rdma: Arc<dyn DataOperator> =
            Arc::new(DeviceRdmaDataOperator::new(RankId(0), transport.clone()));
        let host_rdma: Arc<dyn DataOperator> =
            Arc::new(crate::operator::HostRdmaDataOperator::new(RankId(0), transport));
        let op = ComposeDataOp::new(Scene::Normal, None, Some(device_rdma), Some(host_rdma), tag_info);

        let result = op
            .data_copy(
                &segment,
                &segment,
                CopyParams {
                    src_rank: RankId(0),
                    src_addr: 0,
                    dest_rank: RankId(1),
                    dest_addr: 0,
                    len: 4,
                    direction: CopyDirection::Push,
                    cross_tier: false,
                },
            )
            .await;
        let err = result.unwrap_err();
        // both candidates were tried (DEV_RDMA then HOST_RDMA); the error
        // returned is the last one tried, not a synthesized success.
        assert!(err.to_string().contains("HOST_RDMA"));
    }

    #[tokio::test]
    async fn trans_scene_rejects_when_neither_sdma_nor_device_rdma_is_configured() {
        let tag_info = Arc::new(EntityTagInfo::new());
        let transport: Arc<dyn smem_transport::TransportManager> = Arc::new(NullTransportManager::new());
        let host_rdma: Arc<dyn DataOperator> =
            Arc::new(crate::operator::HostRdmaDataOperator::new(RankId(0), transport));
        let op = ComposeDataOp::new(Scene::Trans, None, None, Some(host_rdma), tag_info);
        assert!(op.trans_operators().is_err());
    }
}
