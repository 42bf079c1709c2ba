//! `TransportManager`: the one-sided Read/Write facade data operators
//! drive, abstracting over whatever fabric actually moves the bytes
//! (device-RDMA, host-RDMA/URMA, or — here, since this workspace has no
//! NIC or RDMA driver to talk to — loopback TCP).
//!
//! Grounded on `DefaultTransportManager`, the original's no-op reference
//! implementation of the `TransportManager` interface: every method here
//! has a `Null` counterpart that mirrors its always-succeeds behavior, so
//! a caller that only needs `smem-dataop`'s SDMA path (same-process
//! memcpy) never has to stand up a connection at all.

mod null;
mod tcp;

pub use null::NullTransportManager;
pub use tcp::TcpTransportManager;

use async_trait::async_trait;
use smem_types::{RankId, Result};

/// Parameters used to open and size a transport's local resources.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub local_rank: RankId,
    pub nic: String,
}

/// One registered remote-addressable span, handed to `register_memory`.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub local_addr: u64,
    pub size: u64,
}

/// Opaque key identifying a registered region to a peer, the way an RDMA
/// rkey does — carried inside `ExchangeMaterial::MemoryKey` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryKey(pub u64);

/// The connection-oriented, one-sided transport contract every copy-engine
/// operator other than SDMA drives. `async_trait` because establishing a
/// connection and waiting on completion are both naturally asynchronous —
/// the same reason the teacher stack's `BlockSync` trait is `async_trait`.
#[async_trait]
pub trait TransportManager: Send + Sync {
    /// Opens whatever local device/socket this transport needs.
    async fn open_device(&self, options: &TransportOptions) -> Result<()>;

    /// Releases local device/socket resources. Idempotent.
    async fn close_device(&self) -> Result<()>;

    /// Registers a local span so peers can address it by key.
    async fn register_memory(&self, region: MemoryRegion) -> Result<MemoryKey>;

    /// Unregisters a previously registered span.
    async fn unregister_memory(&self, local_addr: u64) -> Result<()>;

    /// Looks up the key a previously registered span was assigned.
    async fn query_memory_key(&self, local_addr: u64) -> Result<MemoryKey>;

    /// Begins connecting to the rank addressed by `rank`. Blocks until the
    /// connection is usable or `timeout` elapses.
    async fn connect(&self, rank: RankId, timeout: std::time::Duration) -> Result<()>;

    /// True once `connect` has completed successfully for `rank`.
    fn is_connected(&self, rank: RankId) -> bool;

    /// The local NIC/interface name this transport is bound to, published
    /// in this rank's `EntityExchangeDescriptor`.
    fn nic(&self) -> String;

    /// One-sided read: pulls `size` bytes from `remote_addr` on `rank`
    /// into this process's `local_addr`.
    async fn read_remote(&self, rank: RankId, local_addr: u64, remote_addr: u64, size: u64) -> Result<()>;

    /// One-sided write: pushes `size` bytes from this process's
    /// `local_addr` to `remote_addr` on `rank`.
    async fn write_remote(&self, rank: RankId, local_addr: u64, remote_addr: u64, size: u64) -> Result<()>;
}
