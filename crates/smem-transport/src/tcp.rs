//! A loopback-TCP `TransportManager`.
//!
//! There is no RDMA NIC or URMA driver available in this environment, so
//! this implementation stands in for the device-RDMA/host-RDMA/host-URMA
//! transports `smem-dataop`'s non-SDMA operators drive: real TCP sockets,
//! a small length-prefixed request/response wire protocol, and genuine
//! byte movement between registered regions — the one-sided semantics are
//! simulated (every read/write is actually a round trip) but the
//! registered-memory contract callers see is real.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use smem_types::{Error, RankId, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::{MemoryKey, MemoryRegion, TransportManager, TransportOptions};

/// Rank-to-listener-address directory shared by every `TcpTransportManager`
/// in this process, standing in for the out-of-band rendezvous a real
/// deployment would use (a name service, or the config store itself).
pub type PeerDirectory = Arc<RwLock<std::collections::HashMap<u32, SocketAddr>>>;

const OP_READ: u8 = 1;
const OP_WRITE: u8 = 2;
const STATUS_OK: u8 = 0;
const STATUS_NOT_FOUND: u8 = 1;

struct RegisteredRegion {
    key: MemoryKey,
    bytes: RwLock<Vec<u8>>,
}

struct Inner {
    local_rank: RankId,
    nic: RwLock<String>,
    directory: PeerDirectory,
    connected: RwLock<HashSet<u32>>,
    regions: RwLock<BTreeMap<u64, RegisteredRegion>>,
    next_key: AtomicU64,
}

impl Inner {
    /// Finds the registered region containing `[addr, addr+len)`, returning
    /// the region's start address alongside it so callers can compute the
    /// in-region offset.
    fn find(regions: &BTreeMap<u64, RegisteredRegion>, addr: u64, len: u64) -> Option<u64> {
        let (&start, region) = regions.range(..=addr).next_back()?;
        let size = region.bytes.read().len() as u64;
        if addr + len <= start + size {
            Some(start)
        } else {
            None
        }
    }
}

/// `TransportManager` backed by real `tokio` TCP sockets between
/// `TcpTransportManager` instances sharing a `PeerDirectory`.
#[derive(Clone)]
pub struct TcpTransportManager {
    inner: Arc<Inner>,
}

impl TcpTransportManager {
    #[must_use]
    pub fn new(local_rank: RankId, directory: PeerDirectory) -> Self {
        TcpTransportManager {
            inner: Arc::new(Inner {
                local_rank,
                nic: RwLock::new(String::new()),
                directory,
                connected: RwLock::new(HashSet::new()),
                regions: RwLock::new(BTreeMap::new()),
                next_key: AtomicU64::new(1),
            }),
        }
    }

    async fn serve(inner: Arc<Inner>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted transport connection");
                    let inner = inner.clone();
                    tokio::spawn(async move {
                        if let Err(err) = Self::handle_conn(inner, stream).await {
                            warn!(%err, "transport connection ended with error");
                        }
                    });
                }
                Err(err) => {
                    warn!(%err, "accept failed, transport listener stopping");
                    return;
                }
            }
        }
    }

    async fn handle_conn(inner: Arc<Inner>, mut stream: TcpStream) -> std::io::Result<()> {
        loop {
            let mut header = [0u8; 17];
            if stream.read_exact(&mut header).await.is_err() {
                return Ok(()); // peer closed the connection.
            }
            let op = header[0];
            let addr = u64::from_le_bytes(header[1..9].try_into().unwrap());
            let size = u64::from_le_bytes(header[9..17].try_into().unwrap());

            match op {
                OP_READ => {
                    let regions = inner.regions.read();
                    match Inner::find(&regions, addr, size) {
                        Some(start) => {
                            let region = &regions[&start];
                            let offset = (addr - start) as usize;
                            let data = region.bytes.read()[offset..offset + size as usize].to_vec();
                            drop(regions);
                            stream.write_all(&[STATUS_OK]).await?;
                            stream.write_all(&data).await?;
                        }
                        None => {
                            drop(regions);
                            stream.write_all(&[STATUS_NOT_FOUND]).await?;
                        }
                    }
                }
                OP_WRITE => {
                    let mut payload = vec![0u8; size as usize];
                    stream.read_exact(&mut payload).await?;
                    let regions = inner.regions.read();
                    match Inner::find(&regions, addr, size) {
                        Some(start) => {
                            let region = &regions[&start];
                            let offset = (addr - start) as usize;
                            region.bytes.write()[offset..offset + size as usize].copy_from_slice(&payload);
                            drop(regions);
                            stream.write_all(&[STATUS_OK]).await?;
                        }
                        None => {
                            drop(regions);
                            stream.write_all(&[STATUS_NOT_FOUND]).await?;
                        }
                    }
                }
                other => {
                    warn!(op = other, "unknown transport opcode, closing connection");
                    return Ok(());
                }
            }
        }
    }

    async fn dial(&self, rank: RankId) -> Result<TcpStream> {
        let addr = *self
            .inner
            .directory
            .read()
            .get(&rank.0)
            .ok_or_else(|| Error::TransportError(format!("no listener address known for rank {}", rank.0)))?;
        TcpStream::connect(addr)
            .await
            .map_err(|e| Error::TransportError(format!("connect to rank {}: {e}", rank.0)))
    }

    async fn request(&self, rank: RankId, op: u8, addr: u64, payload: Option<&[u8]>, read_len: u64) -> Result<Vec<u8>> {
        let mut stream = self.dial(rank).await?;
        let size = payload.map_or(read_len, |p| p.len() as u64);
        let mut header = Vec::with_capacity(17);
        header.push(op);
        header.extend_from_slice(&addr.to_le_bytes());
        header.extend_from_slice(&size.to_le_bytes());
        stream
            .write_all(&header)
            .await
            .map_err(|e| Error::TransportError(e.to_string()))?;
        if let Some(data) = payload {
            stream.write_all(data).await.map_err(|e| Error::TransportError(e.to_string()))?;
        }
        let mut status = [0u8; 1];
        stream
            .read_exact(&mut status)
            .await
            .map_err(|e| Error::TransportError(e.to_string()))?;
        if status[0] != STATUS_OK {
            return Err(Error::TransportError(format!(
                "rank {} has no registered region covering address {addr:#x}",
                rank.0
            )));
        }
        if payload.is_none() {
            let mut data = vec![0u8; read_len as usize];
            stream
                .read_exact(&mut data)
                .await
                .map_err(|e| Error::TransportError(e.to_string()))?;
            Ok(data)
        } else {
            Ok(Vec::new())
        }
    }
}

#[async_trait]
impl TransportManager for TcpTransportManager {
    async fn open_device(&self, options: &TransportOptions) -> Result<()> {
        *self.inner.nic.write() = options.nic.clone();
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| Error::TransportError(e.to_string()))?;
        let addr = listener.local_addr().map_err(|e| Error::TransportError(e.to_string()))?;
        self.inner.directory.write().insert(self.inner.local_rank.0, addr);
        let inner = self.inner.clone();
        tokio::spawn(Self::serve(inner, listener));
        Ok(())
    }

    async fn close_device(&self) -> Result<()> {
        self.inner.directory.write().remove(&self.inner.local_rank.0);
        self.inner.connected.write().clear();
        self.inner.regions.write().clear();
        Ok(())
    }

    async fn register_memory(&self, region: MemoryRegion) -> Result<MemoryKey> {
        let key = MemoryKey(self.inner.next_key.fetch_add(1, Ordering::Relaxed));
        self.inner.regions.write().insert(
            region.local_addr,
            RegisteredRegion {
                key,
                bytes: RwLock::new(vec![0u8; region.size as usize]),
            },
        );
        Ok(key)
    }

    async fn unregister_memory(&self, local_addr: u64) -> Result<()> {
        self.inner.regions.write().remove(&local_addr);
        Ok(())
    }

    async fn query_memory_key(&self, local_addr: u64) -> Result<MemoryKey> {
        self.inner
            .regions
            .read()
            .get(&local_addr)
            .map(|r| r.key)
            .ok_or_else(|| Error::NotExist(format!("no region registered at {local_addr:#x}")))
    }

    async fn connect(&self, rank: RankId, timeout: Duration) -> Result<()> {
        let attempt = async {
            loop {
                if self.inner.directory.read().contains_key(&rank.0) {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| Error::Timeout(format!("waiting for rank {} to publish its listener", rank.0)))??;
        self.dial(rank).await?; // handshake probe
        self.inner.connected.write().insert(rank.0);
        Ok(())
    }

    fn is_connected(&self, rank: RankId) -> bool {
        self.inner.connected.read().contains(&rank.0)
    }

    fn nic(&self) -> String {
        self.inner.nic.read().clone()
    }

    async fn read_remote(&self, rank: RankId, local_addr: u64, remote_addr: u64, size: u64) -> Result<()> {
        let data = self.request(rank, OP_READ, remote_addr, None, size).await?;
        let regions = self.inner.regions.read();
        let start = Inner::find(&regions, local_addr, size)
            .ok_or_else(|| Error::InvalidParam(format!("local address {local_addr:#x} is not registered")))?;
        let offset = (local_addr - start) as usize;
        regions[&start].bytes.write()[offset..offset + size as usize].copy_from_slice(&data);
        Ok(())
    }

    async fn write_remote(&self, rank: RankId, local_addr: u64, remote_addr: u64, size: u64) -> Result<()> {
        let data = {
            let regions = self.inner.regions.read();
            let start = Inner::find(&regions, local_addr, size)
                .ok_or_else(|| Error::InvalidParam(format!("local address {local_addr:#x} is not registered")))?;
            let offset = (local_addr - start) as usize;
            regions[&start].bytes.read()[offset..offset + size as usize].to_vec()
        };
        self.request(rank, OP_WRITE, remote_addr, Some(&data), 0).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> PeerDirectory {
        Arc::new(RwLock::new(std::collections::HashMap::new()))
    }

    async fn opened(rank: u32, dir: &PeerDirectory) -> TcpTransportManager {
        let t = TcpTransportManager::new(RankId(rank), dir.clone());
        t.open_device(&TransportOptions {
            local_rank: RankId(rank),
            nic: format!("loop{rank}"),
        })
        .await
        .unwrap();
        t
    }

    #[tokio::test]
    async fn read_remote_pulls_bytes_written_on_the_owner() {
        let dir = directory();
        let owner = opened(0, &dir).await;
        let peer = opened(1, &dir).await;

        owner.register_memory(MemoryRegion { local_addr: 0x1000, size: 64 }).await.unwrap();
        peer.register_memory(MemoryRegion { local_addr: 0x2000, size: 64 }).await.unwrap();
        peer.connect(RankId(0), Duration::from_secs(1)).await.unwrap();
        assert!(peer.is_connected(RankId(0)));

        {
            let regions = owner.inner.regions.read();
            let start = Inner::find(&regions, 0x1000, 16).unwrap();
            regions[&start].bytes.write()[..16].copy_from_slice(&[7u8; 16]);
        }

        peer.read_remote(RankId(0), 0x2000, 0x1000, 16).await.unwrap();
        {
            let regions = peer.inner.regions.read();
            let start = Inner::find(&regions, 0x2000, 16).unwrap();
            assert_eq!(&regions[&start].bytes.read()[..16], &[7u8; 16]);
        }
    }

    #[tokio::test]
    async fn write_remote_pushes_bytes_onto_the_peer() {
        let dir = directory();
        let owner = opened(0, &dir).await;
        let peer = opened(1, &dir).await;

        owner.register_memory(MemoryRegion { local_addr: 0x1000, size: 64 }).await.unwrap();
        peer.register_memory(MemoryRegion { local_addr: 0x2000, size: 64 }).await.unwrap();

        {
            let regions = owner.inner.regions.read();
            let start = Inner::find(&regions, 0x1000, 16).unwrap();
            regions[&start].bytes.write()[..16].copy_from_slice(&[9u8; 16]);
        }

        owner.write_remote(RankId(1), 0x1000, 0x2000, 16).await.unwrap();
        {
            let regions = peer.inner.regions.read();
            let start = Inner::find(&regions, 0x2000, 16).unwrap();
            assert_eq!(&regions[&start].bytes.read()[..16], &[9u8; 16]);
        }
    }

    #[tokio::test]
    async fn read_remote_against_unregistered_address_fails() {
        let dir = directory();
        let owner = opened(0, &dir).await;
        let peer = opened(1, &dir).await;
        peer.register_memory(MemoryRegion { local_addr: 0x2000, size: 64 }).await.unwrap();

        let result = peer.read_remote(RankId(0), 0x2000, 0xDEAD, 64).await;
        assert!(result.is_err());
    }
}
