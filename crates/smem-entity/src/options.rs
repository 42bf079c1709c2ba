//! `EntityOptions`: the input configuration a caller supplies to
//! `MemEntity::initialize`, matching spec.md §3's `EntityOptions` row.

use smem_dataop::Scene;
use smem_types::{DeviceId, OpTypeMask, RankId};

/// Host and device GVA windows start at disjoint fixed addresses, the way
/// the original's host anonymous mapping and the accelerator driver's
/// preferred VMM base never collide even though both are "rank-relative"
/// offsets from the caller's point of view.
pub const HOST_GVA_BASE: u64 = 0;
pub const DEVICE_GVA_BASE: u64 = 1u64 << 40;

/// Input configuration for one `MemEntity`.
#[derive(Debug, Clone)]
pub struct EntityOptions {
    pub rank_id: RankId,
    pub rank_count: u32,
    pub device_id: DeviceId,
    /// Per-rank host DRAM window size; zero means no host segment.
    pub host_size: u64,
    /// Per-rank device HBM window size; zero means no device segment.
    pub hbm_size: u64,
    /// Which data-movement operators this entity may construct.
    pub allowed_ops: OpTypeMask,
    pub scene: Scene,
    /// This rank's tag, consulted by `ComposeDataOp`'s tag×tag policy.
    pub tag: Option<String>,
    /// `tag1:TYPE:tag2,...` policy entries, parsed by `EntityTagInfo`.
    pub tag_op_info_csv: Option<String>,
    /// Local NIC/interface name published in this rank's
    /// `EntityExchangeDescriptor`.
    pub transport_nic: String,
}

impl EntityOptions {
    /// `spec.md §4.7 Initialize`'s validation: rank in range, at least one
    /// tier sized and page-aligned, allowed ops non-empty.
    pub fn validate(&self) -> smem_types::Result<()> {
        use smem_types::Error;
        if self.rank_id.0 >= self.rank_count {
            return Err(Error::InvalidParam(format!(
                "rank id {} is not less than rank count {}",
                self.rank_id, self.rank_count
            )));
        }
        if self.host_size == 0 && self.hbm_size == 0 {
            return Err(Error::InvalidParam("at least one of host_size/hbm_size must be non-zero".into()));
        }
        if self.host_size % smem_types::constants::HOST_LARGE_PAGE_SIZE != 0 {
            return Err(Error::InvalidParam("host_size must be a multiple of the host large-page size".into()));
        }
        if self.hbm_size % smem_types::constants::DEVICE_LARGE_PAGE_SIZE != 0 {
            return Err(Error::InvalidParam("hbm_size must be a multiple of the device large-page size".into()));
        }
        if self.allowed_ops.is_empty() {
            return Err(Error::InvalidParam("allowed_ops must name at least one operator".into()));
        }
        Ok(())
    }
}
