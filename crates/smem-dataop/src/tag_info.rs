//! Per-rank tags and the tag-pair policy that decides which operators a
//! copy between two ranks may use.
//!
//! Grounded on `HybmEntityTagInfo`: a rank-to-tag map plus a `tag:tag`
//! (order-independent) map to an `OpTypeMask`, both populated from the
//! same config strings the original parses with `std::regex`. This crate
//! has no `regex` dependency in its stack, so the two patterns
//! (`^[a-zA-Z0-9_]{1,30}$` and `^tag:TYPE:tag$`) are checked by hand.

use std::collections::HashMap;

use parking_lot::RwLock;
use smem_types::{Error, OpTypeMask, RankId, Result};
use tracing::{info, warn};

fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty() && tag.len() <= 30 && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn op_type_from_str(s: &str) -> Option<OpTypeMask> {
    Some(match s {
        "DEVICE_SDMA" => OpTypeMask::SDMA,
        "DEVICE_RDMA" => OpTypeMask::DEVICE_RDMA,
        "HOST_RDMA" => OpTypeMask::HOST_RDMA,
        "HOST_TCP" => OpTypeMask::HOST_TCP,
        "HOST_URMA" => OpTypeMask::HOST_URMA,
        "DEVICE_MTE" => OpTypeMask::DEVICE_MTE,
        _ => return None,
    })
}

fn op_type_to_str(op: OpTypeMask) -> &'static str {
    if op == OpTypeMask::SDMA {
        "DEVICE_SDMA"
    } else if op == OpTypeMask::DEVICE_RDMA {
        "DEVICE_RDMA"
    } else if op == OpTypeMask::HOST_RDMA {
        "HOST_RDMA"
    } else if op == OpTypeMask::HOST_TCP {
        "HOST_TCP"
    } else if op == OpTypeMask::HOST_URMA {
        "HOST_URMA"
    } else if op == OpTypeMask::DEVICE_MTE {
        "DEVICE_MTE"
    } else {
        "OP_TYPE_BUTT"
    }
}

/// Splits one `tag1:TYPE:tag2` entry, validating each field by hand.
fn parse_one_tag_op_info(entry: &str) -> Result<(String, OpTypeMask, String)> {
    let parts: Vec<&str> = entry.split(':').collect();
    if parts.len() != 3 {
        return Err(Error::InvalidParam(format!(
            "tagOpInfo entry '{entry}' must have the form tag:TYPE:tag"
        )));
    }
    let (tag1, op_str, tag2) = (parts[0], parts[1], parts[2]);
    if !is_valid_tag(tag1) || !is_valid_tag(tag2) {
        return Err(Error::InvalidParam(format!(
            "tagOpInfo entry '{entry}' has a tag outside ^[a-zA-Z0-9_]{{1,30}}$"
        )));
    }
    if op_str.len() < 8 || op_str.len() > 12 || !op_str.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
        return Err(Error::InvalidParam(format!(
            "tagOpInfo entry '{entry}' has an op type outside ^[A-Z_]{{8,12}}$"
        )));
    }
    let op = op_type_from_str(op_str)
        .ok_or_else(|| Error::InvalidParam(format!("unknown op type '{op_str}' in '{entry}'")))?;
    Ok((tag1.to_string(), op, tag2.to_string()))
}

/// Per-entity tag registry and tag-pair operator policy.
pub struct EntityTagInfo {
    rank_tags: RwLock<HashMap<u32, String>>,
    tag_op_info: RwLock<HashMap<String, OpTypeMask>>,
}

impl EntityTagInfo {
    #[must_use]
    pub fn new() -> Self {
        EntityTagInfo {
            rank_tags: RwLock::new(HashMap::new()),
            tag_op_info: RwLock::new(HashMap::new()),
        }
    }

    /// Parses a config string of the form `tag1:TYPE:tag2,tag3:TYPE:tag4,...`.
    /// An empty string is accepted and adds nothing, matching the original's
    /// "empty tagOpInfo is fine" behavior.
    pub fn add_tag_op_info_csv(&self, csv: &str) -> Result<()> {
        if csv.is_empty() {
            warn!("adding an empty tagOpInfo");
            return Ok(());
        }
        for entry in csv.split(',') {
            let (tag1, op, tag2) = parse_one_tag_op_info(entry)?;
            let existing = self.get_tag2tag_op_type(&tag1, &tag2);
            let key = format!("{tag1}:{tag2}");
            self.tag_op_info.write().insert(key, existing | op);
        }
        Ok(())
    }

    pub fn add_rank_tag(&self, rank: RankId, tag: &str) -> Result<()> {
        if tag.is_empty() {
            warn!(rank = rank.0, "adding an empty tag");
            return Ok(());
        }
        if !is_valid_tag(tag) {
            return Err(Error::InvalidParam(format!(
                "tag '{tag}' does not match ^[a-zA-Z0-9_]{{1,30}}$"
            )));
        }
        self.rank_tags.write().insert(rank.0, tag.to_string());
        info!(rank = rank.0, tag, "added rank tag");
        Ok(())
    }

    pub fn remove_rank_tag(&self, rank: RankId) {
        self.rank_tags.write().remove(&rank.0);
    }

    #[must_use]
    pub fn tag_for_rank(&self, rank: RankId) -> Option<String> {
        self.rank_tags.read().get(&rank.0).cloned()
    }

    /// Order-independent tag-pair lookup: `tag1:tag2` then `tag2:tag1`.
    /// Falls back to the permissive default when no policy is configured.
    #[must_use]
    pub fn get_tag2tag_op_type(&self, tag1: &str, tag2: &str) -> OpTypeMask {
        let table = self.tag_op_info.read();
        let forward = format!("{tag1}:{tag2}");
        if let Some(op) = table.get(&forward) {
            return *op;
        }
        let reverse = format!("{tag2}:{tag1}");
        if let Some(op) = table.get(&reverse) {
            return *op;
        }
        OpTypeMask::default()
    }

    /// Resolves both ranks' tags, then looks up their pair policy. Falls
    /// back to the permissive default if either rank has no tag.
    #[must_use]
    pub fn get_rank2rank_op_type(&self, rank1: RankId, rank2: RankId) -> OpTypeMask {
        let (Some(tag1), Some(tag2)) = (self.tag_for_rank(rank1), self.tag_for_rank(rank2)) else {
            return OpTypeMask::default();
        };
        self.get_tag2tag_op_type(&tag1, &tag2)
    }

    #[must_use]
    pub fn all_configured_op_types(&self) -> OpTypeMask {
        self.tag_op_info
            .read()
            .values()
            .fold(OpTypeMask::empty(), |acc, &op| acc | op)
    }

    #[must_use]
    pub fn op_type_name(op: OpTypeMask) -> &'static str {
        op_type_to_str(op)
    }
}

impl Default for EntityTagInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_tag_over_thirty_chars() {
        let info = EntityTagInfo::new();
        let long = "a".repeat(31);
        assert!(info.add_rank_tag(RankId(0), &long).is_err());
    }

    #[test]
    fn tag_pair_lookup_is_order_independent() {
        let info = EntityTagInfo::new();
        info.add_tag_op_info_csv("gpu:DEVICE_RDMA:cpu").unwrap();
        assert_eq!(info.get_tag2tag_op_type("gpu", "cpu"), OpTypeMask::DEVICE_RDMA);
        assert_eq!(info.get_tag2tag_op_type("cpu", "gpu"), OpTypeMask::DEVICE_RDMA);
    }

    #[test]
    fn unconfigured_pair_falls_back_to_default_mask() {
        let info = EntityTagInfo::new();
        info.add_rank_tag(RankId(0), "gpu").unwrap();
        info.add_rank_tag(RankId(1), "cpu").unwrap();
        assert_eq!(info.get_rank2rank_op_type(RankId(0), RankId(1)), OpTypeMask::default());
    }

    #[test]
    fn rank2rank_resolves_through_tags() {
        let info = EntityTagInfo::new();
        info.add_rank_tag(RankId(0), "gpu").unwrap();
        info.add_rank_tag(RankId(1), "cpu").unwrap();
        info.add_tag_op_info_csv("gpu:HOST_RDMA:cpu").unwrap();
        assert_eq!(info.get_rank2rank_op_type(RankId(0), RankId(1)), OpTypeMask::HOST_RDMA);
    }

    #[test]
    fn repeated_entries_for_the_same_pair_accumulate_the_mask() {
        let info = EntityTagInfo::new();
        info.add_tag_op_info_csv("a:DEVICE_SDMA:b,a:HOST_RDMA:b").unwrap();
        let combined = info.get_tag2tag_op_type("a", "b");
        assert!(combined.contains(OpTypeMask::SDMA));
        assert!(combined.contains(OpTypeMask::HOST_RDMA));
    }

    #[test]
    fn malformed_entry_is_rejected() {
        let info = EntityTagInfo::new();
        assert!(info.add_tag_op_info_csv("gpu-cpu").is_err());
        assert!(info.add_tag_op_info_csv("gpu:lowercase:cpu").is_err());
    }
}
