//! The error taxonomy shared across the fabric. One enum, reused by every
//! crate, mirrors the teacher stack's habit of a small umbrella error type
//! that subsystem-local errors convert into at the crate boundary (see
//! `ioi-networking::SyncError` feeding into higher layers).

use thiserror::Error;

/// Result alias used throughout the fabric.
pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds a caller can observe from any fabric API.
///
/// These map 1:1 onto the error taxonomy table: a bad argument never
/// mutates state, a failed allocation rolls back what it started, and a
/// timeout is always safe to retry.
#[derive(Debug, Error)]
pub enum Error {
    /// A bad size, alignment, rank, or handle was passed in.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// An API was called before `Initialize`.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// Scratch or backing allocation failed.
    #[error("allocation failed: {0}")]
    MallocFailed(String),

    /// A second object was created with an id already in use.
    #[error("duplicate object: {0}")]
    AlreadyExists(String),

    /// The referenced id or handle does not exist.
    #[error("object not found: {0}")]
    NotExist(String),

    /// A barrier or connection wait expired.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The underlying transport reported a failure.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The underlying driver/accelerator call failed.
    #[error("driver error: {0}")]
    DriverError(String),

    /// The operation is not implemented for this variant.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    /// A short, stable machine-readable tag for metrics and log fields,
    /// the way `ioi_types::error::ErrorCode` assigns one per variant.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidParam(_) => "INVALID_PARAM",
            Error::NotInitialized(_) => "NOT_INITIALIZED",
            Error::MallocFailed(_) => "MALLOC_FAILED",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::NotExist(_) => "NOT_EXIST",
            Error::Timeout(_) => "TIMEOUT",
            Error::TransportError(_) => "TRANSPORT_ERROR",
            Error::DriverError(_) => "DRIVER_ERROR",
            Error::NotSupported(_) => "NOT_SUPPORTED",
        }
    }
}
