//! Wire and layout constants. Values are carried over from the C++
//! original's `hybm_mem_common.h`/`smem.cpp` so a mixed Rust/C++ cluster
//! agrees on the bytes on the wire.

/// Magic for an HBM slice descriptor using legacy-IPC exchange.
pub const HBM_SLICE_LEGACY_IPC_MAGIC: u64 = 0xAABB_1234_FFFF_EEEE;
/// Magic for an HBM slice descriptor using VMM share-handle exchange.
pub const HBM_SLICE_VMM_MAGIC: u64 = 0xAABB_1234_FFFF_EEEF;
/// Magic for a DRAM slice descriptor (tier byte distinguishes connection-
/// vs SDMA-backed within this magic, matching the original).
pub const DRAM_SLICE_MAGIC: u64 = 0xAABB_1234_FFFF_EEEE;
/// Magic for the per-entity exchange envelope.
pub const ENTITY_EXPORT_INFO_MAGIC: u64 = 0xAABB_5678_FFFF_DDDD;

/// Current wire version for exchange descriptors.
pub const EXCHANGE_DESCRIPTOR_VERSION: u16 = 1;

/// Maximum size in bytes of one exchange descriptor envelope.
pub const MAX_EXCHANGE_DESCRIPTOR_SIZE: usize = 512;

/// Nominal scratch pool size used by the RDMA-class data operators (128 MiB).
pub const DEFAULT_SCRATCH_POOL_SIZE: u64 = 128 * 1024 * 1024;

/// Large-page alignment used for host-tier allocations (2 MiB huge pages).
pub const HOST_LARGE_PAGE_SIZE: u64 = 2 * 1024 * 1024;

/// Large-page alignment used for device-tier allocations (2 MiB, matching
/// the accelerator driver's preferred granularity).
pub const DEVICE_LARGE_PAGE_SIZE: u64 = 2 * 1024 * 1024;

/// Config-store key prefix for the auto-ranking barrier, per entity id.
#[must_use]
pub fn ranking_lock_key(entity_id: u32) -> String {
    format!("entity/{entity_id}/ranking")
}

/// Config-store key prefix for descriptor publication, per entity id.
#[must_use]
pub fn publish_lock_key(entity_id: u32) -> String {
    format!("entity/{entity_id}/publish")
}
