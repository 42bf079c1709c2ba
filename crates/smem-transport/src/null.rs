//! `NullTransportManager`: every call succeeds and moves no bytes.
//!
//! Grounded directly on the original's `DefaultTransportManager`, whose
//! every override is a one-line `return BM_OK`. Used for the SDMA-only
//! path, where `smem-dataop` copies through `MemSegment`'s own mapped
//! backing and never needs a transport at all, and in unit tests that
//! only exercise dispatch/priority logic.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use smem_types::{RankId, Result};

use crate::{MemoryKey, MemoryRegion, TransportManager, TransportOptions};

#[derive(Default)]
pub struct NullTransportManager {
    nic: RwLock<String>,
    connected: RwLock<HashSet<u32>>,
}

impl NullTransportManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransportManager for NullTransportManager {
    async fn open_device(&self, options: &TransportOptions) -> Result<()> {
        *self.nic.write() = options.nic.clone();
        Ok(())
    }

    async fn close_device(&self) -> Result<()> {
        Ok(())
    }

    async fn register_memory(&self, _region: MemoryRegion) -> Result<MemoryKey> {
        Ok(MemoryKey(0))
    }

    async fn unregister_memory(&self, _local_addr: u64) -> Result<()> {
        Ok(())
    }

    async fn query_memory_key(&self, _local_addr: u64) -> Result<MemoryKey> {
        Ok(MemoryKey(0))
    }

    async fn connect(&self, rank: RankId, _timeout: Duration) -> Result<()> {
        self.connected.write().insert(rank.0);
        Ok(())
    }

    fn is_connected(&self, rank: RankId) -> bool {
        self.connected.read().contains(&rank.0)
    }

    fn nic(&self) -> String {
        self.nic.read().clone()
    }

    async fn read_remote(&self, _rank: RankId, _local_addr: u64, _remote_addr: u64, _size: u64) -> Result<()> {
        Ok(())
    }

    async fn write_remote(&self, _rank: RankId, _local_addr: u64, _remote_addr: u64, _size: u64) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_call_succeeds_and_moves_nothing() {
        let t = NullTransportManager::new();
        t.open_device(&TransportOptions {
            local_rank: RankId(0),
            nic: "eth0".into(),
        })
        .await
        .unwrap();
        assert_eq!(t.nic(), "eth0");
        t.connect(RankId(1), Duration::from_millis(10)).await.unwrap();
        assert!(t.is_connected(RankId(1)));
        t.write_remote(RankId(1), 0, 0, 64).await.unwrap();
        t.read_remote(RankId(1), 0, 0, 64).await.unwrap();
    }
}
