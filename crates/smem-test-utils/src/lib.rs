//! In-process N-rank harness: spins up several `Fabric`/`Entity` pairs
//! sharing one `InProcessConfigStore` and one `SharedBackingRegistry`, the
//! way the teacher stack's `ioi-test-utils` builds an in-process
//! multi-node harness for integration tests instead of spawning real
//! processes.

use std::sync::Arc;

use smem_configstore::in_process::InProcessConfigStore;
use smem_configstore::ConfigStoreBackend;
use smem_dataop::Scene;
use smem_entity::EntityOptions;
use smem_fabric::{Entity, Fabric, FabricConfig};
use smem_mem::SharedBackingRegistry;
use smem_transport::{NullTransportManager, TransportManager};
use smem_types::{DeviceId, OpTypeMask, RankId, Result};

/// One simulated rank's fabric handle plus its default entity (id `0`),
/// the pairing almost every scenario test needs.
pub struct Rank {
    pub fabric: Fabric,
    pub entity: Entity,
}

impl Rank {
    #[must_use]
    pub fn rank_id(&self) -> RankId {
        self.fabric.rank_id()
    }
}

/// Shared resources every simulated rank in one test process plugs into,
/// so the harness's ranks can actually see each other's published state.
#[derive(Clone)]
pub struct Fleet {
    pub config_store: Arc<dyn ConfigStoreBackend>,
    pub registry: SharedBackingRegistry,
}

impl Fleet {
    #[must_use]
    pub fn new() -> Self {
        Fleet { config_store: Arc::new(InProcessConfigStore::new()), registry: SharedBackingRegistry::new() }
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-rank sizing/policy a harness caller can override; defaults give
/// every rank a 4MiB host-only window with every operator enabled.
#[derive(Clone)]
pub struct RankSpec {
    pub host_size: u64,
    pub hbm_size: u64,
    pub allowed_ops: OpTypeMask,
    pub scene: Scene,
}

impl Default for RankSpec {
    fn default() -> Self {
        RankSpec { host_size: 4 * 1024 * 1024, hbm_size: 0, allowed_ops: OpTypeMask::default(), scene: Scene::Normal }
    }
}

/// Brings up `world_size` ranks with explicit, sequential rank ids
/// (`0..world_size`) sharing `fleet`'s config store and backing registry,
/// each already past `Entity::join` (`ReserveMemorySpace`). Uses
/// `NullTransportManager` throughout, since every scenario this harness
/// targets is SDMA-reachable through the shared registry without a real
/// transport connection.
pub async fn spawn_ranks(fleet: &Fleet, world_size: u32, spec: RankSpec) -> Result<Vec<Rank>> {
    let mut ranks = Vec::with_capacity(world_size as usize);
    for rank_id in 0..world_size {
        let config = FabricConfig {
            store_url: "inprocess".into(),
            world_size,
            device_id: 0,
            rank_id: Some(rank_id),
            transport_nic: format!("loop{rank_id}"),
            allowed_ops: Vec::new(),
            scene: None,
            host_size: spec.host_size,
            hbm_size: spec.hbm_size,
        };
        let fabric = Fabric::init(config, fleet.config_store.clone(), fleet.registry.clone()).await?;
        let transport: Arc<dyn TransportManager> = Arc::new(NullTransportManager::new());
        let options = EntityOptions {
            rank_id: RankId(rank_id),
            rank_count: world_size,
            device_id: DeviceId(0),
            host_size: spec.host_size,
            hbm_size: spec.hbm_size,
            allowed_ops: spec.allowed_ops,
            scene: spec.scene,
            tag: None,
            tag_op_info_csv: None,
            transport_nic: format!("loop{rank_id}"),
        };
        let entity = fabric.create_entity(0, options, transport).await?;
        entity.join().await?;
        ranks.push(Rank { fabric, entity });
    }
    Ok(ranks)
}

/// Brings up `world_size` ranks concurrently with `rank_id: None`, so each
/// goes through the auto-ranking barrier in `EntryManager::initialize`
/// instead of being told its rank. Returns ranks sorted by the id they
/// were actually assigned.
pub async fn spawn_ranks_auto_ranked(fleet: &Fleet, world_size: u32, spec: RankSpec) -> Result<Vec<Rank>> {
    let mut handles = Vec::with_capacity(world_size as usize);
    for i in 0..world_size {
        let fleet = fleet.clone();
        let spec = spec.clone();
        handles.push(tokio::spawn(async move {
            let config = FabricConfig {
                store_url: "inprocess".into(),
                world_size,
                device_id: 0,
                rank_id: None,
                transport_nic: format!("auto{i}"),
                allowed_ops: Vec::new(),
                scene: None,
                host_size: spec.host_size,
                hbm_size: spec.hbm_size,
            };
            let fabric = Fabric::init(config, fleet.config_store.clone(), fleet.registry.clone()).await?;
            let rank_id = fabric.rank_id();
            let transport: Arc<dyn TransportManager> = Arc::new(NullTransportManager::new());
            let options = EntityOptions {
                rank_id,
                rank_count: world_size,
                device_id: DeviceId(0),
                host_size: spec.host_size,
                hbm_size: spec.hbm_size,
                allowed_ops: spec.allowed_ops,
                scene: spec.scene,
                tag: None,
                tag_op_info_csv: None,
                transport_nic: format!("auto{}", rank_id.0),
            };
            let entity = fabric.create_entity(0, options, transport).await?;
            entity.join().await?;
            Ok::<Rank, smem_types::Error>(Rank { fabric, entity })
        }));
    }
    let mut ranks = Vec::with_capacity(world_size as usize);
    for h in handles {
        ranks.push(h.await.map_err(|e| smem_types::Error::InvalidParam(e.to_string()))??);
    }
    ranks.sort_by_key(|r| r.rank_id().0);
    Ok(ranks)
}

/// Exchanges every rank's export with every other rank and `mmap`s, so a
/// harness caller gets straight to issuing copies without repeating the
/// exchange boilerplate in every test.
pub async fn exchange_all(ranks: &[Rank]) -> Result<()> {
    let mut exports = Vec::with_capacity(ranks.len());
    for rank in ranks {
        exports.push(rank.entity.export_exchange_info().await?);
    }
    for (i, rank) in ranks.iter().enumerate() {
        for (j, export) in exports.iter().enumerate() {
            if i == j {
                continue;
            }
            rank.entity.import_entity_exchange_info(export).await?;
        }
        rank.entity.mmap().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smem_types::{CopyDirection, Tier};

    #[tokio::test]
    async fn two_ranks_exchange_and_copy_through_the_harness() {
        let fleet = Fleet::new();
        let ranks = spawn_ranks(&fleet, 2, RankSpec::default()).await.unwrap();
        let a = ranks[0].entity.alloc(Tier::HostDram, 4096).await.unwrap();
        let b = ranks[1].entity.alloc(Tier::HostDram, 4096).await.unwrap();
        exchange_all(&ranks).await.unwrap();

        ranks[0].entity.copy(a.va(), b.va(), 8, CopyDirection::Push).await.unwrap();
    }

    #[tokio::test]
    async fn auto_ranked_fleet_gets_distinct_contiguous_ids() {
        let fleet = Fleet::new();
        let ranks = spawn_ranks_auto_ranked(&fleet, 3, RankSpec::default()).await.unwrap();
        let ids: Vec<u32> = ranks.iter().map(|r| r.rank_id().0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
