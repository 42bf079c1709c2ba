//! The entity lifecycle state machine from spec.md §4.7:
//! `Uninitialized -> Initialized -> Reserved -> Allocated -> Exported
//! <-> Importing -> Connected -> Operating -> Leaving -> Uninitialized`.

/// Where a `MemEntity` sits in its lifecycle. Tracked so that calling an
/// operation out of order fails with `NotInitialized` instead of silently
/// operating on half-built state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Uninitialized,
    Initialized,
    Reserved,
    Allocated,
    Exported,
    Importing,
    Connected,
    Operating,
    Leaving,
}

impl EntityState {
    /// True once the entity has at least reached `Allocated`, the point
    /// at which local slices exist and can be exported/imported/copied
    /// against.
    #[must_use]
    pub fn has_local_memory(self) -> bool {
        !matches!(self, EntityState::Uninitialized | EntityState::Initialized | EntityState::Reserved)
    }
}
