//! The per-entity exchange envelope: one round of publication that
//! carries this rank's transport NIC plus, optionally, the most recently
//! allocated slice descriptor for each tier — matching spec.md §4.7's
//! `ExportExchangeInfo(&desc)` (entity), which "concatenate[s] device-slice
//! bytes + host-slice bytes + transport extra ... into a single descriptor
//! envelope".
//!
//! Open Question resolution (see `DESIGN.md`): the original concatenates
//! *every* slice a rank has allocated into one envelope; this workspace
//! carries only the latest slice per tier in the entity envelope (still
//! enough to drive the S1/S2 scenarios, which allocate once per tier) and
//! expects additional slices to be published individually through
//! `MemEntity::export_slice`, consumed by `MemEntity::import_exchange_info`.

use smem_types::{constants, Error, Result};

const SUB_DESC_CAP: usize = 160;

fn encode_sub(bytes: Option<&[u8]>, out: &mut Vec<u8>) {
    match bytes {
        Some(b) => {
            let n = b.len().min(SUB_DESC_CAP) as u16;
            out.extend_from_slice(&n.to_le_bytes());
            let mut padded = vec![0u8; SUB_DESC_CAP];
            padded[..n as usize].copy_from_slice(&b[..n as usize]);
            out.extend_from_slice(&padded);
        }
        None => {
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&vec![0u8; SUB_DESC_CAP]);
        }
    }
}

fn decode_sub(bytes: &[u8]) -> Result<(Option<Vec<u8>>, &[u8])> {
    if bytes.len() < 2 + SUB_DESC_CAP {
        return Err(Error::InvalidParam("entity envelope sub-descriptor truncated".into()));
    }
    let len = u16::from_le_bytes(bytes[0..2].try_into().unwrap()) as usize;
    let rest = &bytes[2 + SUB_DESC_CAP..];
    if len == 0 {
        return Ok((None, rest));
    }
    Ok((Some(bytes[2..2 + len].to_vec()), rest))
}

/// One entity's published join information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityEnvelope {
    pub owner_rank_id: u32,
    pub transport_nic: String,
    pub device_desc: Option<Vec<u8>>,
    pub host_desc: Option<Vec<u8>>,
}

impl EntityEnvelope {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 2 + 4 + 2 + 64 + 2 * (2 + SUB_DESC_CAP));
        out.extend_from_slice(&constants::ENTITY_EXPORT_INFO_MAGIC.to_le_bytes());
        out.extend_from_slice(&constants::EXCHANGE_DESCRIPTOR_VERSION.to_le_bytes());
        out.extend_from_slice(&self.owner_rank_id.to_le_bytes());
        let nic_bytes = self.transport_nic.as_bytes();
        let nic_len = nic_bytes.len().min(64) as u16;
        out.extend_from_slice(&nic_len.to_le_bytes());
        let mut nic_padded = [0u8; 64];
        nic_padded[..nic_len as usize].copy_from_slice(&nic_bytes[..nic_len as usize]);
        out.extend_from_slice(&nic_padded);
        encode_sub(self.device_desc.as_deref(), &mut out);
        encode_sub(self.host_desc.as_deref(), &mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        const FIXED: usize = 8 + 2 + 4 + 2 + 64;
        if bytes.len() < FIXED {
            return Err(Error::InvalidParam("entity envelope too short".into()));
        }
        let magic = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        if magic != constants::ENTITY_EXPORT_INFO_MAGIC {
            return Err(Error::InvalidParam(format!("unrecognized entity envelope magic {magic:#x}")));
        }
        let version = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
        let owner_rank_id = u32::from_le_bytes(bytes[10..14].try_into().unwrap());
        let nic_len = u16::from_le_bytes(bytes[14..16].try_into().unwrap()) as usize;
        if nic_len > 64 {
            return Err(Error::InvalidParam("entity envelope nic length overflow".into()));
        }
        let transport_nic = String::from_utf8_lossy(&bytes[16..16 + nic_len]).into_owned();
        let rest = &bytes[FIXED..];
        let (device_desc, rest) = decode_sub(rest)?;
        let (host_desc, _rest) = decode_sub(rest)?;
        let _ = version;
        Ok(EntityEnvelope { owner_rank_id, transport_nic, device_desc, host_desc })
    }
}
