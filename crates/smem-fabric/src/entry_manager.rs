//! `EntryManager`: the process-wide registry spec.md §4.8 describes —
//! one config-store client, one rank id (explicit or auto-assigned), and
//! every `MemEntity` this process has created, torn down in the order
//! they were created.
//!
//! Grounded on the original's `EntryManager::Initialize/CreateEntryById/
//! RemoveEntryByPtr/Destroy` (see spec.md §4.8): here "ptr" is a Rust
//! `Arc<MemEntity>` pointer identity rather than a raw handle, since this
//! workspace exposes a safe facade instead of the original's C ABI.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use smem_configstore::ConfigStoreBackend;
use smem_entity::{EntityOptions, MemEntity};
use smem_mem::SharedBackingRegistry;
use smem_transport::TransportManager;
use smem_types::{Error, RankId, Result};
use tracing::info;

use crate::config::FabricConfig;
use crate::ranking::auto_rank;

const AUTO_RANK_TIMEOUT: Duration = Duration::from_secs(30);

struct Slot {
    id: u32,
    entity: Arc<MemEntity>,
}

/// Owns every `MemEntity` this process has created, in creation order, so
/// `destroy` can tear them down deterministically.
pub struct EntryManager {
    config_store: Arc<dyn ConfigStoreBackend>,
    registry: SharedBackingRegistry,
    rank_id: RankId,
    world_size: u32,
    slots: Mutex<Vec<Slot>>,
}

impl EntryManager {
    /// `Initialize(storeURL, worldSize, deviceId, config)`: here the
    /// config-store client and backing registry are constructed by the
    /// caller (so tests can share an `InProcessConfigStore`/
    /// `SharedBackingRegistry` across simulated ranks) and handed in
    /// already built, rather than built from a `storeURL` string.
    pub async fn initialize(
        config: &FabricConfig,
        config_store: Arc<dyn ConfigStoreBackend>,
        registry: SharedBackingRegistry,
    ) -> Result<Self> {
        let rank_id = match config.rank_id {
            Some(r) => RankId(r),
            None => auto_rank(config_store.as_ref(), config.world_size, AUTO_RANK_TIMEOUT).await?,
        };
        info!(rank = rank_id.0, world_size = config.world_size, "entry manager initialized");
        Ok(EntryManager { config_store, registry, rank_id, world_size: config.world_size, slots: Mutex::new(Vec::new()) })
    }

    #[must_use]
    pub fn rank_id(&self) -> RankId {
        self.rank_id
    }

    #[must_use]
    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    #[must_use]
    pub fn config_store(&self) -> &Arc<dyn ConfigStoreBackend> {
        &self.config_store
    }

    /// `CreateEntryById`: builds a new `MemEntity` under `id`, rejecting a
    /// reused id the way the original rejects a duplicate handle.
    pub async fn create_entry_by_id(
        &self,
        id: u32,
        options: EntityOptions,
        transport: Arc<dyn TransportManager>,
    ) -> Result<Arc<MemEntity>> {
        if self.slots.lock().iter().any(|s| s.id == id) {
            return Err(Error::AlreadyExists(format!("entry id {id} already in use")));
        }
        let entity = Arc::new(MemEntity::initialize(options, self.registry.clone(), transport).await?);
        self.slots.lock().push(Slot { id, entity: entity.clone() });
        Ok(entity)
    }

    #[must_use]
    pub fn lookup(&self, id: u32) -> Option<Arc<MemEntity>> {
        self.slots.lock().iter().find(|s| s.id == id).map(|s| s.entity.clone())
    }

    /// `RemoveEntryByPtr`: leaves and drops the entity identified by
    /// `entity`'s `Arc` pointer identity, the Rust-idiomatic equivalent of
    /// the original's opaque-pointer lookup.
    pub async fn remove_entry_by_ptr(&self, entity: &Arc<MemEntity>) -> Result<()> {
        let target = Arc::as_ptr(entity);
        let found = {
            let mut slots = self.slots.lock();
            let pos = slots.iter().position(|s| Arc::as_ptr(&s.entity) == target);
            pos.map(|i| slots.remove(i))
        };
        match found {
            Some(slot) => slot.entity.leave().await,
            None => Err(Error::NotExist("no entry matches that entity".into())),
        }
    }

    /// `Destroy`: leaves every remaining entity in creation order, then
    /// reports the first error encountered (if any) after attempting all
    /// of them, matching `MemEntity::leave`'s own best-effort-both-steps
    /// convention.
    pub async fn destroy(&self) -> Result<()> {
        let slots = std::mem::take(&mut *self.slots.lock());
        let mut first_err = None;
        for slot in slots {
            if let Err(e) = slot.entity.leave().await {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smem_configstore::in_process::InProcessConfigStore;
    use smem_dataop::Scene;
    use smem_transport::NullTransportManager;
    use smem_types::{DeviceId, OpTypeMask};

    fn options(rank_id: u32, rank_count: u32) -> EntityOptions {
        EntityOptions {
            rank_id: RankId(rank_id),
            rank_count,
            device_id: DeviceId(0),
            host_size: 4 * 1024 * 1024,
            hbm_size: 0,
            allowed_ops: OpTypeMask::SDMA,
            scene: Scene::Normal,
            tag: None,
            tag_op_info_csv: None,
            transport_nic: format!("loop{rank_id}"),
        }
    }

    async fn manager(rank_id: Option<u32>) -> EntryManager {
        let cfg = FabricConfig {
            store_url: "inprocess".into(),
            world_size: 1,
            device_id: 0,
            rank_id,
            transport_nic: "eth0".into(),
            allowed_ops: Vec::new(),
            scene: None,
            host_size: 4 * 1024 * 1024,
            hbm_size: 0,
        };
        let store: Arc<dyn ConfigStoreBackend> = Arc::new(InProcessConfigStore::new());
        EntryManager::initialize(&cfg, store, SharedBackingRegistry::new()).await.unwrap()
    }

    #[tokio::test]
    async fn explicit_rank_id_is_honored() {
        let mgr = manager(Some(7)).await;
        assert_eq!(mgr.rank_id(), RankId(7));
    }

    #[tokio::test]
    async fn auto_rank_assigns_zero_for_a_single_caller() {
        let mgr = manager(None).await;
        assert_eq!(mgr.rank_id(), RankId(0));
    }

    #[tokio::test]
    async fn duplicate_entry_id_is_rejected() {
        let mgr = manager(Some(0)).await;
        let transport: Arc<dyn TransportManager> = Arc::new(NullTransportManager::new());
        mgr.create_entry_by_id(1, options(0, 1), transport.clone()).await.unwrap();
        let result = mgr.create_entry_by_id(1, options(0, 1), transport).await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn remove_by_ptr_leaves_and_forgets_the_entity() {
        let mgr = manager(Some(0)).await;
        let transport: Arc<dyn TransportManager> = Arc::new(NullTransportManager::new());
        let entity = mgr.create_entry_by_id(1, options(0, 1), transport).await.unwrap();
        mgr.remove_entry_by_ptr(&entity).await.unwrap();
        assert!(mgr.lookup(1).is_none());
    }

    #[tokio::test]
    async fn destroy_tears_down_every_remaining_entity() {
        let mgr = manager(Some(0)).await;
        let transport: Arc<dyn TransportManager> = Arc::new(NullTransportManager::new());
        mgr.create_entry_by_id(1, options(0, 1), transport.clone()).await.unwrap();
        mgr.create_entry_by_id(2, options(0, 1), transport).await.unwrap();
        mgr.destroy().await.unwrap();
        assert!(mgr.lookup(1).is_none());
        assert!(mgr.lookup(2).is_none());
    }
}
