//! Stand-in for the real kernel/IPC/VMM/RDMA mapping mechanism.
//!
//! On real hardware, importing a peer's slice asks the accelerator driver
//! or the one-sided transport to install a mapping that aliases the
//! *same* physical pages the owner allocated — this crate has no
//! accelerator driver or NIC to do that against. `SharedBackingRegistry`
//! is the documented substitute (see `DESIGN.md`): a process-wide table
//! from `(owner rank, slice index)` to the owner's actual backing bytes,
//! so that within one process (as all of this workspace's tests run) a
//! peer's `Mmap` genuinely aliases the owner's writes, which is the one
//! property the copy-engine and GVA-symmetry tests need to be meaningful.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Shared, reference-counted byte buffer backing one slice.
pub type Backing = Arc<RwLock<Vec<u8>>>;

/// Process-wide table of "physical" backing for every slice any rank in
/// the current process has allocated, keyed by the owning rank and that
/// rank's local slice index.
#[derive(Clone, Default)]
pub struct SharedBackingRegistry {
    inner: Arc<RwLock<HashMap<(u32, u16), Backing>>>,
}

impl SharedBackingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the owning rank when it allocates a slice.
    pub fn publish(&self, owner_rank: u32, slice_index: u16, backing: Backing) {
        self.inner.write().insert((owner_rank, slice_index), backing);
    }

    /// Called by an importing rank during `Mmap`.
    #[must_use]
    pub fn lookup(&self, owner_rank: u32, slice_index: u16) -> Option<Backing> {
        self.inner.read().get(&(owner_rank, slice_index)).cloned()
    }

    /// Called when a slice is released early, so a later index reuse on
    /// the same rank cannot accidentally resolve to stale bytes.
    pub fn withdraw(&self, owner_rank: u32, slice_index: u16) {
        self.inner.write().remove(&(owner_rank, slice_index));
    }
}
