//! `MemSlice`: the handle describing one allocation inside a segment.

use smem_types::{PageTableKind, Tier};

/// One contiguous allocation inside a `MemSegment`, owned by one rank.
///
/// Carries only identity, VA, size, tier, and page-table kind — a plain
/// value type, the way the original is a flat bitfield struct rather than
/// a polymorphic object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemSlice {
    /// 40-bit integrity tag. Derived from a construction-time nonce so
    /// that an index slot reused after release gets a different magic
    /// than its predecessor (substituting for the original's use of the
    /// allocation's heap address, which Rust does not expose as a stable
    /// integer the caller can embed in a handle).
    magic: u64,
    index: u16,
    tier: Tier,
    page_table_kind: PageTableKind,
    va: u64,
    size: u64,
}

const MAGIC_BITS: u32 = 40;
const MAGIC_MASK: u64 = (1u64 << MAGIC_BITS) - 1;

fn mix_magic(nonce: u64, index: u16, tier: Tier, page_table_kind: PageTableKind) -> u64 {
    let mut x = nonce
        ^ (u64::from(index) << 1)
        ^ (u64::from(tier as u8) << 20)
        ^ (u64::from(page_table_kind as u8) << 24);
    // splitmix64 finalizer: cheap, well-distributed avalanche so a single
    // flipped bit anywhere in the inputs flips roughly half the output bits.
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^= x >> 31;
    x & MAGIC_MASK
}

impl MemSlice {
    /// Builds a new slice identity. `nonce` should be unique per
    /// construction within a segment's lifetime (a monotonic counter is
    /// sufficient) so that re-using a 16-bit index after release still
    /// yields a handle that cannot be confused with the old one.
    #[must_use]
    pub fn new(
        nonce: u64,
        index: u16,
        tier: Tier,
        page_table_kind: PageTableKind,
        va: u64,
        size: u64,
    ) -> Self {
        let magic = mix_magic(nonce, index, tier, page_table_kind);
        MemSlice {
            magic,
            index,
            tier,
            page_table_kind,
            va,
            size,
        }
    }

    #[must_use]
    pub fn index(&self) -> u16 {
        self.index
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    #[must_use]
    pub fn page_table_kind(&self) -> PageTableKind {
        self.page_table_kind
    }

    #[must_use]
    pub fn va(&self) -> u64 {
        self.va
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Packs this slice's identity into an opaque 64-bit handle:
    /// `[ magic:40 | page_table_kind:2 | tier:4 | index:16 ]` from MSB to LSB.
    #[must_use]
    pub fn convert_to_id(&self) -> u64 {
        (self.magic << 22)
            | (u64::from(self.page_table_kind as u8) << 20)
            | (u64::from(self.tier as u8) << 16)
            | u64::from(self.index)
    }

    /// Extracts the 16-bit index embedded in a handle without needing the
    /// live slice — used to look the candidate up in a segment's slice
    /// table before checking the magic.
    #[must_use]
    pub fn index_from_id(id: u64) -> u16 {
        (id & 0xFFFF) as u16
    }

    /// True iff `id` was produced by `self.convert_to_id()`. Flipping any
    /// bit of the embedded magic — or pointing at a slice whose own magic
    /// differs because its index slot was reused — makes this `false`.
    #[must_use]
    pub fn validate_id(&self, id: u64) -> bool {
        self.convert_to_id() == id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_id() {
        let slice = MemSlice::new(42, 7, Tier::HostDram, PageTableKind::Fabric, 0x1000, 4096);
        let id = slice.convert_to_id();
        assert!(slice.validate_id(id));
        assert_eq!(MemSlice::index_from_id(id), 7);
    }

    #[test]
    fn flipping_any_magic_bit_invalidates() {
        let slice = MemSlice::new(42, 7, Tier::HostDram, PageTableKind::Fabric, 0x1000, 4096);
        let id = slice.convert_to_id();
        for bit in 22..62 {
            let flipped = id ^ (1u64 << bit);
            assert!(
                !slice.validate_id(flipped),
                "bit {bit} flip should invalidate"
            );
        }
    }

    #[test]
    fn reused_index_with_different_nonce_gets_different_magic() {
        let first = MemSlice::new(1, 3, Tier::DeviceHbm, PageTableKind::Svm, 0x2000, 4096);
        let second = MemSlice::new(2, 3, Tier::DeviceHbm, PageTableKind::Svm, 0x2000, 4096);
        assert_ne!(first.convert_to_id(), second.convert_to_id());
        assert!(!second.validate_id(first.convert_to_id()));
    }
}
