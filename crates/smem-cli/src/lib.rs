//! Helpers behind `smem-cli`'s subcommands, kept separate from `main.rs`
//! the way the teacher stack's CLI lib exposes its logic for reuse (here,
//! mainly so each subcommand's logic is independently testable without
//! going through `clap` parsing).

use std::sync::Arc;

use anyhow::{Context, Result};
use smem_configstore::in_process::InProcessConfigStore;
use smem_configstore::ConfigStoreBackend;
use smem_dataop::Scene;
use smem_entity::EntityOptions;
use smem_fabric::{Fabric, FabricConfig};
use smem_mem::SharedBackingRegistry;
use smem_transport::{NullTransportManager, TransportManager};
use smem_types::{CopyDirection, DeviceId, OpTypeMask, RankId, Tier};

fn fleet() -> (Arc<dyn ConfigStoreBackend>, SharedBackingRegistry) {
    (Arc::new(InProcessConfigStore::new()), SharedBackingRegistry::new())
}

async fn single_rank_fabric(world_size: u32, rank_id: u32, host_size: u64, hbm_size: u64) -> Result<(Fabric, smem_fabric::Entity)> {
    let (store, registry) = fleet();
    let config = FabricConfig {
        store_url: "inprocess".into(),
        world_size,
        device_id: 0,
        rank_id: Some(rank_id),
        transport_nic: format!("loop{rank_id}"),
        allowed_ops: Vec::new(),
        scene: None,
        host_size,
        hbm_size,
    };
    let fabric = Fabric::init(config, store, registry).await.context("bringing up fabric")?;
    let transport: Arc<dyn TransportManager> = Arc::new(NullTransportManager::new());
    let options = EntityOptions {
        rank_id: RankId(rank_id),
        rank_count: world_size,
        device_id: DeviceId(0),
        host_size,
        hbm_size,
        allowed_ops: OpTypeMask::default(),
        scene: Scene::Normal,
        tag: None,
        tag_op_info_csv: None,
        transport_nic: format!("loop{rank_id}"),
    };
    let entity = fabric.create_entity(0, options, transport).await.context("creating entity")?;
    Ok((fabric, entity))
}

/// `join`: brings up a single entity, reserves its sub-window, and
/// returns the GVA base it was handed.
pub async fn join(world_size: u32, rank_id: u32, host_size: u64, hbm_size: u64) -> Result<u64> {
    let (_fabric, entity) = single_rank_fabric(world_size, rank_id, host_size, hbm_size).await?;
    let ptr = entity.join().await.context("reserving memory space")?;
    Ok(ptr)
}

/// `alloc`: joins, then allocates `size` bytes in `tier`, returning the
/// slice's index, GVA, and size.
pub async fn alloc(world_size: u32, rank_id: u32, tier: Tier, size: u64) -> Result<(u16, u64, u64)> {
    let (host_size, hbm_size) = match tier {
        Tier::HostDram => (size, 0),
        Tier::DeviceHbm => (0, size),
    };
    let (_fabric, entity) = single_rank_fabric(world_size, rank_id, host_size, hbm_size).await?;
    entity.join().await.context("reserving memory space")?;
    let slice = entity.alloc(tier, size).await.context("allocating local memory")?;
    Ok((slice.index(), slice.va(), slice.size()))
}

/// `copy`: spins up a two-rank in-process fleet, allocates a `len`-byte
/// host slice on each, exchanges descriptors, and pushes `len` bytes of a
/// fixed fill pattern from rank 0 into rank 1, returning the bytes rank 1
/// actually observes so the caller can confirm the round trip.
pub async fn copy(len: u64, direction: CopyDirection) -> Result<Vec<u8>> {
    let (store, registry) = fleet();
    let world_size = 2;
    let mut entities = Vec::with_capacity(2);
    for rank_id in 0..world_size {
        let config = FabricConfig {
            store_url: "inprocess".into(),
            world_size,
            device_id: 0,
            rank_id: Some(rank_id),
            transport_nic: format!("loop{rank_id}"),
            allowed_ops: Vec::new(),
            scene: None,
            host_size: len.max(4096),
            hbm_size: 0,
        };
        let fabric = Fabric::init(config, store.clone(), registry.clone()).await?;
        let transport: Arc<dyn TransportManager> = Arc::new(NullTransportManager::new());
        let options = EntityOptions {
            rank_id: RankId(rank_id),
            rank_count: world_size,
            device_id: DeviceId(0),
            host_size: len.max(4096),
            hbm_size: 0,
            allowed_ops: OpTypeMask::default(),
            scene: Scene::Normal,
            tag: None,
            tag_op_info_csv: None,
            transport_nic: format!("loop{rank_id}"),
        };
        let entity = fabric.create_entity(0, options, transport).await?;
        entity.join().await?;
        entities.push(entity);
    }

    let slice0 = entities[0].alloc(Tier::HostDram, len.max(4096)).await?;
    let slice1 = entities[1].alloc(Tier::HostDram, len.max(4096)).await?;

    let exports: Vec<Vec<u8>> = {
        let mut v = Vec::with_capacity(2);
        for e in &entities {
            v.push(e.export_exchange_info().await?);
        }
        v
    };
    entities[0].import_entity_exchange_info(&exports[1]).await?;
    entities[1].import_entity_exchange_info(&exports[0]).await?;
    entities[0].mmap().await?;
    entities[1].mmap().await?;

    let pattern: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
    entities[0].write(Tier::HostDram, slice0.va(), &pattern).await.context("seeding source slice")?;
    entities[0].copy(slice0.va(), slice1.va(), len, direction).await.context("copying data")?;
    entities[1].read(Tier::HostDram, slice1.va(), len).await.context("reading back destination slice")
}

/// `inspect`: loads and validates a `FabricConfig` TOML file without
/// starting anything, printing back the resolved op mask and scene.
pub fn inspect(path: &std::path::Path) -> Result<FabricConfig> {
    FabricConfig::from_file(path).map_err(Into::into)
}
