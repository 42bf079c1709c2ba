//! Core data structures and error taxonomy shared by every crate in the
//! shared-memory fabric workspace.
//!
//! Kept deliberately small and dependency-light, the way the teacher
//! stack's `ioi-types` crate is the zero-cycle root of its workspace: every
//! other crate here depends on `smem-types`, never the other way around.

pub mod constants;
pub mod error;
pub mod ids;

pub use error::{Error, Result};
pub use ids::{DeviceId, RankId};

/// Storage medium a slice or segment lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Tier {
    /// Host DRAM.
    HostDram = 0,
    /// Accelerator HBM.
    DeviceHbm = 1,
}

/// Which page-table mechanism backs a mapped range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum PageTableKind {
    /// The accelerator runtime's own SVM page table.
    Svm = 0,
    /// The fabric's own page table (HyBM-style GVM).
    Fabric = 1,
}

bitflags::bitflags! {
    /// Which data-movement operators an entity (or a tag pair) is allowed to use.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct OpTypeMask: u32 {
        const SDMA        = 0b0000_0001;
        const DEVICE_RDMA = 0b0000_0010;
        const HOST_RDMA   = 0b0000_0100;
        const HOST_URMA   = 0b0000_1000;
        const HOST_TCP    = 0b0001_0000;
        const DEVICE_MTE  = 0b0010_0000;
    }
}

impl Default for OpTypeMask {
    fn default() -> Self {
        // GetTag2TagOpType / GetRank2RankOpType return this when no tag
        // pair has been configured: everything is permitted and
        // ComposeDataOp's fixed-order dispatch decides.
        OpTypeMask::all()
    }
}

/// Direction of a copy relative to the caller's own rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    /// Write from a local buffer into a remote (or local) destination.
    Push,
    /// Read from a remote (or local) source into a local buffer.
    Pull,
}

/// Rounds `size` up to the next multiple of `align` (`align` must be a power of two).
#[must_use]
pub fn align_up(size: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
    (size + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_page() {
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
        assert_eq!(align_up(0, 4096), 0);
    }

    #[test]
    fn op_type_mask_default_is_permissive() {
        assert!(OpTypeMask::default().contains(OpTypeMask::SDMA));
        assert!(OpTypeMask::default().contains(OpTypeMask::HOST_RDMA));
    }
}
