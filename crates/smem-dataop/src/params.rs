//! Parameter types shared by every `DataOperator` call.

use smem_types::{CopyDirection, RankId};

/// One copy: `len` bytes between `src_rank`'s `src_addr` and
/// `dest_rank`'s `dest_addr`, in `direction`.
#[derive(Debug, Clone, Copy)]
pub struct CopyParams {
    pub src_rank: RankId,
    pub src_addr: u64,
    pub dest_rank: RankId,
    pub dest_addr: u64,
    pub len: u64,
    pub direction: CopyDirection,
    /// Set by the caller (`MemEntity::copy_data`) when `src_addr` and
    /// `dest_addr` resolve to different tiers. A direct G2G descriptor only
    /// covers one tier/transport pair (spec.md §4.4.1); a cross-tier copy
    /// must stage through the operator's scratch pool instead.
    pub cross_tier: bool,
}

/// A 2D strided copy: `height` rows of `width` bytes, advancing by
/// `src_pitch`/`dest_pitch` bytes per row.
#[derive(Debug, Clone, Copy)]
pub struct Copy2dParams {
    pub src_rank: RankId,
    pub src_addr: u64,
    pub src_pitch: u64,
    pub dest_rank: RankId,
    pub dest_addr: u64,
    pub dest_pitch: u64,
    pub width: u64,
    pub height: u64,
    pub direction: CopyDirection,
    pub cross_tier: bool,
}

/// Several independent copies issued together.
#[derive(Debug, Clone)]
pub struct BatchCopyParams {
    pub ops: Vec<CopyParams>,
}

/// Scopes a call to the "trans" scene, which restricts
/// `ComposeDataOp::data_copy`/`batch_data_copy` to SDMA-or-device-RDMA
/// only, skipping the general tag-policy dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    Normal,
    Trans,
}
