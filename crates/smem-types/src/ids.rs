//! Newtype identifiers so a rank id and a device id can never be swapped
//! by accident at a call site.

use std::fmt;

/// A rank's position within the entity's world (`0..rankCount`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct RankId(pub u32);

impl fmt::Display for RankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RankId {
    fn from(v: u32) -> Self {
        RankId(v)
    }
}

/// A local accelerator device index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DeviceId(pub u16);

impl From<u16> for DeviceId {
    fn from(v: u16) -> Self {
        DeviceId(v)
    }
}
