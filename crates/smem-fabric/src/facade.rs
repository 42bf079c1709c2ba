//! The safe public API: `Fabric` wraps one process's `EntryManager`,
//! `Entity` wraps one `MemEntity`, matching spec.md §6's intent that a
//! caller never touches `smem-mem`/`smem-dataop`/`smem-transport` types
//! directly.

use std::sync::Arc;

use smem_entity::{EntityOptions, MemEntity};
use smem_mem::{MemSlice, SharedBackingRegistry};
use smem_transport::TransportManager;
use smem_types::{CopyDirection, RankId, Result, Tier};

use smem_configstore::ConfigStoreBackend;

use crate::config::FabricConfig;
use crate::entry_manager::EntryManager;

/// One process's handle onto the fabric: owns the `EntryManager` and
/// hands out `Entity` handles.
pub struct Fabric {
    manager: Arc<EntryManager>,
}

impl Fabric {
    /// `smem_bm_initialize`: brings up this rank's config-store client
    /// (handed in by the caller, which decides `InProcessConfigStore` vs
    /// `RemoteConfigStore`) and resolves this rank's id.
    pub async fn init(
        config: FabricConfig,
        config_store: Arc<dyn ConfigStoreBackend>,
        registry: SharedBackingRegistry,
    ) -> Result<Self> {
        let manager = EntryManager::initialize(&config, config_store, registry).await?;
        Ok(Fabric { manager: Arc::new(manager) })
    }

    #[must_use]
    pub fn rank_id(&self) -> RankId {
        self.manager.rank_id()
    }

    #[must_use]
    pub fn world_size(&self) -> u32 {
        self.manager.world_size()
    }

    /// `smem_bm_create_entity`: registers a new `Entity` under `id`.
    pub async fn create_entity(
        &self,
        id: u32,
        options: EntityOptions,
        transport: Arc<dyn TransportManager>,
    ) -> Result<Entity> {
        let inner = self.manager.create_entry_by_id(id, options, transport).await?;
        Ok(Entity { inner })
    }

    #[must_use]
    pub fn entity(&self, id: u32) -> Option<Entity> {
        self.manager.lookup(id).map(|inner| Entity { inner })
    }

    /// `smem_bm_uninitialize`: tears down every entity this rank created.
    pub async fn destroy(&self) -> Result<()> {
        self.manager.destroy().await
    }
}

/// A caller's handle onto one shared-VA-space entity, exposing only the
/// operations spec.md §6's public API names.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<MemEntity>,
}

impl Entity {
    /// Reserves this rank's sub-window and returns its base GVA, the
    /// address a caller hands to every other rank out of band (or
    /// through `export_exchange_info`/`import_entity_exchange_info`).
    pub async fn join(&self) -> Result<u64> {
        self.inner.reserve_memory_space().await
    }

    pub async fn alloc(&self, tier: Tier, size: u64) -> Result<MemSlice> {
        self.inner.alloc_local_memory(tier, size).await
    }

    pub async fn export_exchange_info(&self) -> Result<Vec<u8>> {
        self.inner.export_exchange_info().await
    }

    pub async fn import_entity_exchange_info(&self, peer_bytes: &[u8]) -> Result<u32> {
        self.inner.import_entity_exchange_info(peer_bytes).await.map(|e| e.owner_rank_id)
    }

    pub async fn mmap(&self) -> Result<()> {
        self.inner.mmap().await
    }

    pub async fn unmap(&self) -> Result<()> {
        self.inner.unmap().await
    }

    pub async fn remove_imported(&self, ranks: &[u32]) -> Result<()> {
        self.inner.remove_imported(ranks).await
    }

    pub async fn copy(&self, src_addr: u64, dest_addr: u64, len: u64, direction: CopyDirection) -> Result<()> {
        self.inner.copy_data(src_addr, dest_addr, len, direction).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn copy_2d(
        &self,
        src_addr: u64,
        src_pitch: u64,
        dest_addr: u64,
        dest_pitch: u64,
        width: u64,
        height: u64,
        direction: CopyDirection,
    ) -> Result<()> {
        self.inner.copy_data_2d(src_addr, src_pitch, dest_addr, dest_pitch, width, height, direction).await
    }

    pub async fn read(&self, tier: Tier, addr: u64, len: u64) -> Result<Vec<u8>> {
        self.inner.read(tier, addr, len).await
    }

    pub async fn write(&self, tier: Tier, addr: u64, data: &[u8]) -> Result<()> {
        self.inner.write(tier, addr, data).await
    }

    pub async fn ptr(&self, peer_rank: RankId) -> Result<u64> {
        self.inner.ptr(peer_rank).await
    }

    pub async fn ptr_by_mem_type(&self, tier: Tier, peer_rank: RankId) -> Result<u64> {
        self.inner.ptr_by_mem_type(tier, peer_rank).await
    }

    #[must_use]
    pub fn local_mem_size(&self) -> u64 {
        self.inner.local_mem_size()
    }

    #[must_use]
    pub fn rank_id(&self) -> RankId {
        self.inner.rank_id()
    }

    #[must_use]
    pub fn state(&self) -> smem_entity::EntityState {
        self.inner.state()
    }

    pub async fn leave(&self) -> Result<()> {
        self.inner.leave().await
    }
}
