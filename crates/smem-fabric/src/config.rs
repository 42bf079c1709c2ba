//! `FabricConfig`: the TOML-loadable configuration `EntryManager::initialize`
//! takes, mirroring the original's `Initialize(storeURL, worldSize,
//! deviceId, config)` call but expressed as one `serde`-deserializable
//! struct the way the teacher stack's node configuration is loaded.

use std::path::Path;

use serde::Deserialize;
use smem_dataop::Scene;
use smem_types::{DeviceId, Error, OpTypeMask, Result};

/// One rank's static configuration: where the config store lives, the
/// world's size, which device this rank drives, and the per-tier sizing
/// and policy every entity this rank creates inherits by default.
#[derive(Debug, Clone, Deserialize)]
pub struct FabricConfig {
    /// Address of the config-store backend (`"inprocess"` for
    /// [`smem_configstore::in_process::InProcessConfigStore`], or a
    /// `host:port` for [`smem_configstore::remote::RemoteConfigStore`]).
    pub store_url: String,
    pub world_size: u32,
    pub device_id: u16,
    /// Explicit rank id; `None` triggers the auto-ranking barrier in
    /// `EntryManager::initialize`.
    #[serde(default)]
    pub rank_id: Option<u32>,
    #[serde(default = "default_nic")]
    pub transport_nic: String,
    /// Names from [`OpTypeMask`]'s flags (e.g. `"SDMA"`, `"HOST_RDMA"`);
    /// empty means every operator is allowed, matching
    /// `OpTypeMask::default()`.
    #[serde(default)]
    pub allowed_ops: Vec<String>,
    /// `"normal"` or `"trans"`; defaults to `"normal"`.
    #[serde(default)]
    pub scene: Option<String>,
    #[serde(default)]
    pub host_size: u64,
    #[serde(default)]
    pub hbm_size: u64,
}

fn default_nic() -> String {
    "eth0".to_string()
}

impl FabricConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::InvalidParam(format!("invalid fabric config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidParam(format!("could not read fabric config {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        DeviceId(self.device_id)
    }

    /// Parses `allowed_ops` into an `OpTypeMask`, rejecting unknown flag
    /// names so a typo in the TOML fails loudly instead of silently
    /// granting every operator.
    pub fn op_type_mask(&self) -> Result<OpTypeMask> {
        if self.allowed_ops.is_empty() {
            return Ok(OpTypeMask::default());
        }
        let mut mask = OpTypeMask::empty();
        for name in &self.allowed_ops {
            mask |= match name.as_str() {
                "SDMA" => OpTypeMask::SDMA,
                "DEVICE_RDMA" => OpTypeMask::DEVICE_RDMA,
                "HOST_RDMA" => OpTypeMask::HOST_RDMA,
                "HOST_URMA" => OpTypeMask::HOST_URMA,
                "HOST_TCP" => OpTypeMask::HOST_TCP,
                "DEVICE_MTE" => OpTypeMask::DEVICE_MTE,
                other => return Err(Error::InvalidParam(format!("unknown op type '{other}' in allowed_ops"))),
            };
        }
        Ok(mask)
    }

    pub fn scene(&self) -> Result<Scene> {
        match self.scene.as_deref() {
            None | Some("normal") => Ok(Scene::Normal),
            Some("trans") => Ok(Scene::Trans),
            Some(other) => Err(Error::InvalidParam(format!("unknown scene '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg = FabricConfig::from_toml_str(
            r#"
            store_url = "inprocess"
            world_size = 4
            device_id = 0
            host_size = 4194304
            "#,
        )
        .unwrap();
        assert_eq!(cfg.world_size, 4);
        assert_eq!(cfg.rank_id, None);
        assert_eq!(cfg.op_type_mask().unwrap(), OpTypeMask::default());
        assert!(matches!(cfg.scene().unwrap(), Scene::Normal));
    }

    #[test]
    fn parses_explicit_rank_and_ops() {
        let cfg = FabricConfig::from_toml_str(
            r#"
            store_url = "inprocess"
            world_size = 2
            device_id = 1
            rank_id = 0
            allowed_ops = ["SDMA", "HOST_RDMA"]
            scene = "trans"
            host_size = 4194304
            "#,
        )
        .unwrap();
        assert_eq!(cfg.rank_id, Some(0));
        let mask = cfg.op_type_mask().unwrap();
        assert!(mask.contains(OpTypeMask::SDMA));
        assert!(mask.contains(OpTypeMask::HOST_RDMA));
        assert!(!mask.contains(OpTypeMask::DEVICE_RDMA));
        assert!(matches!(cfg.scene().unwrap(), Scene::Trans));
    }

    #[test]
    fn unknown_op_name_is_rejected() {
        let cfg = FabricConfig::from_toml_str(
            r#"
            store_url = "inprocess"
            world_size = 1
            device_id = 0
            allowed_ops = ["NOT_A_REAL_OP"]
            host_size = 4194304
            "#,
        )
        .unwrap();
        assert!(cfg.op_type_mask().is_err());
    }
}
