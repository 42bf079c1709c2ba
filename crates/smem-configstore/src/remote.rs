//! `RemoteConfigStore`: a TCP client against a small request/reply server,
//! standing in for the original's etcd/redis-class remote backends
//! (`IsDistributed() == true`) since no such service is reachable from
//! this workspace. Framing mirrors `smem-transport::tcp`'s length-prefixed
//! style: a one-byte opcode, a `u32` key length, the key bytes, then an
//! opcode-specific payload.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use smem_types::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::warn;

use crate::in_process::InProcessConfigStore;
use crate::ConfigStoreBackend;

const OP_GET: u8 = 1;
const OP_PUT: u8 = 2;
const OP_DELETE: u8 = 3;
const OP_EXISTS: u8 = 4;
const OP_ACQUIRE_LOCK: u8 = 5;
const OP_RELEASE_LOCK: u8 = 6;

const STATUS_OK: u8 = 0;
const STATUS_NOT_FOUND: u8 = 1;
const STATUS_TIMEOUT: u8 = 2;
const STATUS_ERROR: u8 = 3;

/// Runs the server side of the remote config store: an `InProcessConfigStore`
/// fronted by a TCP listener, so every connected `RemoteConfigStore` client
/// observes the same state. Matches the original's deployment shape where
/// one process hosts the config-store service and every rank is a client.
pub async fn serve(listener: TcpListener) {
    let store = InProcessConfigStore::new();
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let store = store.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_conn(store, stream).await {
                        warn!(%peer, %err, "config-store connection ended with error");
                    }
                });
            }
            Err(err) => {
                warn!(%err, "config-store listener stopped accepting");
                return;
            }
        }
    }
}

async fn read_frame_header(stream: &mut TcpStream) -> std::io::Result<(u8, String)> {
    let mut op = [0u8; 1];
    stream.read_exact(&mut op).await?;
    let mut key_len = [0u8; 4];
    stream.read_exact(&mut key_len).await?;
    let key_len = u32::from_le_bytes(key_len) as usize;
    let mut key_bytes = vec![0u8; key_len];
    stream.read_exact(&mut key_bytes).await?;
    Ok((op[0], String::from_utf8_lossy(&key_bytes).into_owned()))
}

async fn handle_conn(store: InProcessConfigStore, mut stream: TcpStream) -> std::io::Result<()> {
    loop {
        let (op, key) = match read_frame_header(&mut stream).await {
            Ok(v) => v,
            Err(_) => return Ok(()), // peer closed.
        };
        match op {
            OP_GET => match store.get(&key).await {
                Ok(value) => {
                    stream.write_all(&[STATUS_OK]).await?;
                    stream.write_all(&(value.len() as u32).to_le_bytes()).await?;
                    stream.write_all(&value).await?;
                }
                Err(_) => stream.write_all(&[STATUS_NOT_FOUND]).await?,
            },
            OP_PUT => {
                let mut ttl_bytes = [0u8; 8];
                stream.read_exact(&mut ttl_bytes).await?;
                let ttl_ms = i64::from_le_bytes(ttl_bytes);
                let mut val_len = [0u8; 4];
                stream.read_exact(&mut val_len).await?;
                let mut value = vec![0u8; u32::from_le_bytes(val_len) as usize];
                stream.read_exact(&mut value).await?;
                let ttl = if ttl_ms > 0 { Some(Duration::from_millis(ttl_ms as u64)) } else { None };
                let _ = store.put(&key, value, ttl).await;
                stream.write_all(&[STATUS_OK]).await?;
            }
            OP_DELETE => match store.delete(&key).await {
                Ok(()) => stream.write_all(&[STATUS_OK]).await?,
                Err(_) => stream.write_all(&[STATUS_NOT_FOUND]).await?,
            },
            OP_EXISTS => {
                let exists = store.exists(&key).await.unwrap_or(false);
                stream.write_all(&[if exists { STATUS_OK } else { STATUS_NOT_FOUND }]).await?;
            }
            OP_ACQUIRE_LOCK => {
                let mut timeout_bytes = [0u8; 8];
                stream.read_exact(&mut timeout_bytes).await?;
                let timeout = Duration::from_millis(u64::from_le_bytes(timeout_bytes));
                match store.acquire_lock(&key, timeout).await {
                    Ok(()) => stream.write_all(&[STATUS_OK]).await?,
                    Err(_) => stream.write_all(&[STATUS_TIMEOUT]).await?,
                }
            }
            OP_RELEASE_LOCK => match store.release_lock(&key).await {
                Ok(()) => stream.write_all(&[STATUS_OK]).await?,
                Err(_) => stream.write_all(&[STATUS_ERROR]).await?,
            },
            other => {
                warn!(op = other, "unknown config-store opcode, closing connection");
                return Ok(());
            }
        }
    }
}

/// Client side of the remote config store. Connects fresh per call, the
/// way a short-lived admin/control-plane request would rather than
/// holding one long session open, since calls here are infrequent
/// (descriptor publication, the ranking barrier) compared to the
/// data-plane traffic `smem-transport` carries.
#[derive(Clone)]
pub struct RemoteConfigStore {
    addr: SocketAddr,
}

impl RemoteConfigStore {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        RemoteConfigStore { addr }
    }

    async fn connect(&self) -> Result<TcpStream> {
        TcpStream::connect(self.addr)
            .await
            .map_err(|e| Error::TransportError(format!("connect to config store at {}: {e}", self.addr)))
    }

    async fn write_header(stream: &mut TcpStream, op: u8, key: &str) -> Result<()> {
        stream.write_all(&[op]).await.map_err(io_err)?;
        stream.write_all(&(key.len() as u32).to_le_bytes()).await.map_err(io_err)?;
        stream.write_all(key.as_bytes()).await.map_err(io_err)?;
        Ok(())
    }
}

fn io_err(e: std::io::Error) -> Error {
    Error::TransportError(e.to_string())
}

#[async_trait]
impl ConfigStoreBackend for RemoteConfigStore {
    fn backend_name(&self) -> &'static str {
        "Remote"
    }

    fn is_distributed(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut stream = self.connect().await?;
        Self::write_header(&mut stream, OP_GET, key).await?;
        let mut status = [0u8; 1];
        stream.read_exact(&mut status).await.map_err(io_err)?;
        if status[0] != STATUS_OK {
            return Err(Error::NotExist(format!("key '{key}' not found")));
        }
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.map_err(io_err)?;
        let mut value = vec![0u8; u32::from_le_bytes(len) as usize];
        stream.read_exact(&mut value).await.map_err(io_err)?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut stream = self.connect().await?;
        Self::write_header(&mut stream, OP_PUT, key).await?;
        let ttl_ms: i64 = ttl.map(|d| d.as_millis() as i64).unwrap_or(0);
        stream.write_all(&ttl_ms.to_le_bytes()).await.map_err(io_err)?;
        stream.write_all(&(value.len() as u32).to_le_bytes()).await.map_err(io_err)?;
        stream.write_all(&value).await.map_err(io_err)?;
        let mut status = [0u8; 1];
        stream.read_exact(&mut status).await.map_err(io_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut stream = self.connect().await?;
        Self::write_header(&mut stream, OP_DELETE, key).await?;
        let mut status = [0u8; 1];
        stream.read_exact(&mut status).await.map_err(io_err)?;
        if status[0] != STATUS_OK {
            return Err(Error::NotExist(format!("key '{key}' not found")));
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut stream = self.connect().await?;
        Self::write_header(&mut stream, OP_EXISTS, key).await?;
        let mut status = [0u8; 1];
        stream.read_exact(&mut status).await.map_err(io_err)?;
        Ok(status[0] == STATUS_OK)
    }

    async fn acquire_lock(&self, name: &str, timeout: Duration) -> Result<()> {
        let mut stream = self.connect().await?;
        Self::write_header(&mut stream, OP_ACQUIRE_LOCK, name).await?;
        stream.write_all(&(timeout.as_millis() as u64).to_le_bytes()).await.map_err(io_err)?;
        let mut status = [0u8; 1];
        stream.read_exact(&mut status).await.map_err(io_err)?;
        if status[0] == STATUS_TIMEOUT {
            return Err(Error::Timeout(format!("could not acquire lock '{name}'")));
        }
        Ok(())
    }

    async fn release_lock(&self, name: &str) -> Result<()> {
        let mut stream = self.connect().await?;
        Self::write_header(&mut stream, OP_RELEASE_LOCK, name).await?;
        let mut status = [0u8; 1];
        stream.read_exact(&mut status).await.map_err(io_err)?;
        Ok(())
    }
}

/// Starts a config-store server bound to an ephemeral local port and
/// returns a ready-to-use client, for tests that want the "remote"
/// implementation's wire path without a pre-existing deployment.
pub async fn spawn_loopback() -> Result<RemoteConfigStore> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.map_err(io_err)?;
    let addr = listener.local_addr().map_err(io_err)?;
    tokio::spawn(serve(listener));
    Ok(RemoteConfigStore::new(addr))
}
