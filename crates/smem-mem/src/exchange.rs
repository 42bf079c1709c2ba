//! Wire-safe exchange descriptors: what one rank publishes so its peers
//! can map a slice (or find its entity) into their own GVA.
//!
//! Encoded as a fixed-width little-endian record, not a self-describing
//! format, because a peer must be able to validate the magic *before* it
//! can trust the rest of the bytes — the same reasoning the original's
//! flat C struct with a leading magic field follows.

use smem_types::{constants, Error, Result, Tier};

/// Which backing/import mechanism a slice descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentKind {
    HbmLegacyIpc = 0,
    HbmVmm = 1,
    HostConn = 2,
    HostSdma = 3,
}

impl SegmentKind {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => SegmentKind::HbmLegacyIpc,
            1 => SegmentKind::HbmVmm,
            2 => SegmentKind::HostConn,
            3 => SegmentKind::HostSdma,
            other => return Err(Error::InvalidParam(format!("unknown segment kind {other}"))),
        })
    }
}

/// The opaque, backing-specific material a peer needs to map a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeMaterial {
    /// IPC name, whitelisted by (sdid, pid) out of band.
    IpcName(String),
    /// VMM share-handle exported for the peer to import and map.
    VmmShareHandle(u64),
    /// One-sided RDMA memory registration key.
    MemoryKey(Vec<u8>),
    /// Per-slice GVM key for `hybm_gvm_mem_open`.
    GvmKey(u64),
}

const MATERIAL_PAYLOAD_LEN: usize = 64;

impl ExchangeMaterial {
    fn tag(&self) -> u8 {
        match self {
            ExchangeMaterial::IpcName(_) => 0,
            ExchangeMaterial::VmmShareHandle(_) => 1,
            ExchangeMaterial::MemoryKey(_) => 2,
            ExchangeMaterial::GvmKey(_) => 3,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        let mut payload = [0u8; MATERIAL_PAYLOAD_LEN];
        match self {
            ExchangeMaterial::IpcName(name) => {
                let bytes = name.as_bytes();
                let n = bytes.len().min(MATERIAL_PAYLOAD_LEN);
                payload[..n].copy_from_slice(&bytes[..n]);
            }
            ExchangeMaterial::VmmShareHandle(h) | ExchangeMaterial::GvmKey(h) => {
                payload[..8].copy_from_slice(&h.to_le_bytes());
            }
            ExchangeMaterial::MemoryKey(key) => {
                let n = key.len().min(MATERIAL_PAYLOAD_LEN);
                payload[..n].copy_from_slice(&key[..n]);
            }
        }
        out.extend_from_slice(&payload);
    }

    fn decode(tag: u8, payload: &[u8; MATERIAL_PAYLOAD_LEN]) -> Result<Self> {
        Ok(match tag {
            0 => {
                let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
                ExchangeMaterial::IpcName(String::from_utf8_lossy(&payload[..end]).into_owned())
            }
            1 => ExchangeMaterial::VmmShareHandle(u64::from_le_bytes(payload[..8].try_into().unwrap())),
            2 => ExchangeMaterial::MemoryKey(payload.to_vec()),
            3 => ExchangeMaterial::GvmKey(u64::from_le_bytes(payload[..8].try_into().unwrap())),
            other => return Err(Error::InvalidParam(format!("unknown material tag {other}"))),
        })
    }
}

/// The wire-safe description of one slice, as published by `Segment::Export`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDescriptor {
    pub magic: u64,
    pub version: u16,
    pub owner_rank_id: u32,
    /// Owner-local offset within its own per-rank sub-window.
    pub offset_within_rank: u64,
    pub size: u64,
    pub slice_index: u16,
    pub kind: SegmentKind,
    pub tier: Tier,
    /// sdid/serverId/podId/deviceId — whichever identifies the owner's
    /// device for this kind.
    pub owner_device_id: u64,
    pub material: ExchangeMaterial,
}

impl ExchangeDescriptor {
    /// Little-endian fixed-width encoding. Field order matches the struct
    /// definition; total size is always well under the 512-byte envelope cap.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.owner_rank_id.to_le_bytes());
        out.extend_from_slice(&self.offset_within_rank.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.slice_index.to_le_bytes());
        out.push(self.kind as u8);
        out.push(self.tier as u8);
        out.extend_from_slice(&self.owner_device_id.to_le_bytes());
        self.material.encode(&mut out);
        out
    }

    /// Decodes bytes produced by `encode`. Rejects anything whose magic
    /// does not match one of the known constants, or whose length is
    /// short — a single altered byte anywhere in a valid record either
    /// flips the magic check or desyncs the material tag/payload split,
    /// both of which are caught here.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        const FIXED_LEN: usize = 8 + 2 + 4 + 8 + 8 + 2 + 1 + 1 + 8;
        if bytes.len() < FIXED_LEN + 1 + MATERIAL_PAYLOAD_LEN {
            return Err(Error::InvalidParam("exchange descriptor too short".into()));
        }
        let magic = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        if magic != constants::HBM_SLICE_LEGACY_IPC_MAGIC && magic != constants::HBM_SLICE_VMM_MAGIC {
            return Err(Error::InvalidParam(format!("unrecognized slice magic {magic:#x}")));
        }
        let version = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
        let owner_rank_id = u32::from_le_bytes(bytes[10..14].try_into().unwrap());
        let offset_within_rank = u64::from_le_bytes(bytes[14..22].try_into().unwrap());
        let size = u64::from_le_bytes(bytes[22..30].try_into().unwrap());
        let slice_index = u16::from_le_bytes(bytes[30..32].try_into().unwrap());
        let kind = SegmentKind::from_u8(bytes[32])?;
        let tier = match bytes[33] {
            0 => Tier::HostDram,
            1 => Tier::DeviceHbm,
            other => return Err(Error::InvalidParam(format!("unknown tier byte {other}"))),
        };
        let owner_device_id = u64::from_le_bytes(bytes[34..42].try_into().unwrap());
        let material_tag = bytes[42];
        let mut payload = [0u8; MATERIAL_PAYLOAD_LEN];
        payload.copy_from_slice(&bytes[43..43 + MATERIAL_PAYLOAD_LEN]);
        let material = ExchangeMaterial::decode(material_tag, &payload)?;

        Ok(ExchangeDescriptor {
            magic,
            version,
            owner_rank_id,
            offset_within_rank,
            size,
            slice_index,
            kind,
            tier,
            owner_device_id,
            material,
        })
    }
}

/// One-per-entity descriptor, distinct from slice descriptors, published
/// once at entity start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityExchangeDescriptor {
    pub magic: u64,
    pub version: u16,
    pub owner_rank_id: u32,
    pub transport_nic: String,
}

impl EntityExchangeDescriptor {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.owner_rank_id.to_le_bytes());
        let nic_bytes = self.transport_nic.as_bytes();
        let n = nic_bytes.len().min(MATERIAL_PAYLOAD_LEN) as u16;
        out.extend_from_slice(&n.to_le_bytes());
        let mut padded = [0u8; MATERIAL_PAYLOAD_LEN];
        padded[..n as usize].copy_from_slice(&nic_bytes[..n as usize]);
        out.extend_from_slice(&padded);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        const FIXED_LEN: usize = 8 + 2 + 4 + 2;
        if bytes.len() < FIXED_LEN + MATERIAL_PAYLOAD_LEN {
            return Err(Error::InvalidParam("entity descriptor too short".into()));
        }
        let magic = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        if magic != constants::ENTITY_EXPORT_INFO_MAGIC {
            return Err(Error::InvalidParam(format!("unrecognized entity magic {magic:#x}")));
        }
        let version = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
        let owner_rank_id = u32::from_le_bytes(bytes[10..14].try_into().unwrap());
        let nic_len = u16::from_le_bytes(bytes[14..16].try_into().unwrap()) as usize;
        if nic_len > MATERIAL_PAYLOAD_LEN {
            return Err(Error::InvalidParam("entity descriptor nic length overflow".into()));
        }
        let nic_bytes = &bytes[16..16 + nic_len];
        let transport_nic = String::from_utf8_lossy(nic_bytes).into_owned();
        Ok(EntityExchangeDescriptor {
            magic,
            version,
            owner_rank_id,
            transport_nic,
        })
    }
}
