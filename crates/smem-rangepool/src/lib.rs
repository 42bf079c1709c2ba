//! A bounded range allocator over a byte window `[base, base+size)`.
//!
//! Carves and recycles aligned allocations with an address-ordered index
//! for coalescing and a size-ordered index for best-fit lookup, the way
//! the original `RbtreeRangePool` pairs a `std::map` and a `std::set`.
//! Every operation holds the lock only across a handful of tree
//! operations — no I/O, no syscalls — so a `parking_lot::Mutex` (which
//! spins briefly before parking) stands in for the original's bare
//! `pthread_spinlock_t`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use smem_types::{align_up, Error, Result};

struct Inner {
    base: u64,
    total: u64,
    align: u64,
    /// offset -> length, for coalescing neighbours.
    by_addr: BTreeMap<u64, u64>,
    /// (length, offset), ascending: best-fit lookup with smallest-offset tie-break.
    by_size: BTreeSet<(u64, u64)>,
}

/// An address-ordered, size-ordered dual-index free-list allocator.
///
/// Cheap to clone — clones share the same underlying free-list via an
/// `Arc`, matching the shared-ownership pattern `AllocatedElement` needs
/// to release itself back into the pool on `Drop`.
#[derive(Clone)]
pub struct RangePool {
    inner: Arc<Mutex<Inner>>,
}

impl RangePool {
    /// Creates a pool over `[base, base+size)`, carving allocations to
    /// multiples of `align` (which must be a power of two).
    #[must_use]
    pub fn new(base: u64, size: u64, align: u64) -> Self {
        debug_assert!(align.is_power_of_two());
        let mut by_addr = BTreeMap::new();
        let mut by_size = BTreeSet::new();
        if size > 0 {
            by_addr.insert(0, size);
            by_size.insert((size, 0));
        }
        RangePool {
            inner: Arc::new(Mutex::new(Inner {
                base,
                total: size,
                align,
                by_addr,
                by_size,
            })),
        }
    }

    /// Base address of the window this pool carves.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.inner.lock().base
    }

    /// Total size of the window this pool carves.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.inner.lock().total
    }

    fn align(&self) -> u64 {
        self.inner.lock().align
    }

    /// True iff a free range of at least `align_up(size)` exists.
    #[must_use]
    pub fn can_allocate(&self, size: u64) -> bool {
        let aligned = align_up(size.max(1), self.align());
        let inner = self.inner.lock();
        inner
            .by_size
            .range((aligned, 0)..)
            .next()
            .is_some()
    }

    /// Best-fit allocate: smallest free range `>= align_up(size)`, tying on
    /// smallest offset. Carves from the low end of the chosen range.
    pub fn allocate(&self, size: u64) -> Result<AllocatedElement> {
        let aligned = align_up(size.max(1), self.align());
        let mut inner = self.inner.lock();
        let found = inner.by_size.range((aligned, 0)..).next().copied();
        let Some((free_len, free_off)) = found else {
            return Err(Error::MallocFailed(format!(
                "no free range >= {aligned} bytes in pool of total size {}",
                inner.total
            )));
        };

        inner.by_size.remove(&(free_len, free_off));
        inner.by_addr.remove(&free_off);

        let remainder_off = free_off + aligned;
        let remainder_len = free_len - aligned;
        if remainder_len > 0 {
            inner.by_addr.insert(remainder_off, remainder_len);
            inner.by_size.insert((remainder_len, remainder_off));
        }

        let base = inner.base;
        drop(inner);
        Ok(AllocatedElement {
            pool: Some(self.clone()),
            offset: free_off,
            size: aligned,
            base,
        })
    }

    /// Releases a range back into the pool, coalescing with adjacent free
    /// neighbours on both sides in `O(log n)`.
    fn release(&self, offset: u64, size: u64) {
        let mut inner = self.inner.lock();

        let mut new_off = offset;
        let mut new_len = size;

        // Coalesce with the free range immediately before us, if any.
        if let Some((&prev_off, &prev_len)) = inner.by_addr.range(..offset).next_back() {
            if prev_off + prev_len == offset {
                inner.by_size.remove(&(prev_len, prev_off));
                inner.by_addr.remove(&prev_off);
                new_off = prev_off;
                new_len += prev_len;
            }
        }

        // Coalesce with the free range immediately after us, if any.
        if let Some(&next_len) = inner.by_addr.get(&(new_off + new_len)) {
            let next_off = new_off + new_len;
            inner.by_size.remove(&(next_len, next_off));
            inner.by_addr.remove(&next_off);
            new_len += next_len;
        }

        inner.by_addr.insert(new_off, new_len);
        inner.by_size.insert((new_len, new_off));
    }

    #[cfg(test)]
    fn free_list(&self) -> Vec<(u64, u64)> {
        let inner = self.inner.lock();
        inner.by_addr.iter().map(|(&o, &l)| (o, l)).collect()
    }
}

/// A carved-out range owned by whoever called `Allocate`. Dropping it
/// releases the range back into its pool automatically — there is no
/// explicit `Release` call in the public API, unlike the C++ original,
/// because Rust ownership already models "exactly one owner releases on
/// scope exit".
pub struct AllocatedElement {
    pool: Option<RangePool>,
    offset: u64,
    size: u64,
    base: u64,
}

impl AllocatedElement {
    /// Absolute address of this allocation (`pool.base() + offset`).
    #[must_use]
    pub fn address(&self) -> u64 {
        self.base + self.offset
    }

    /// Offset within the pool's window.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of this allocation (may be larger than requested due to alignment).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for AllocatedElement {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(self.offset, self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_release_restores_free_list() {
        let pool = RangePool::new(0, 4096 * 8, 4096);
        let before = pool.free_list();
        {
            let a = pool.allocate(4096 * 3).unwrap();
            assert_eq!(a.offset(), 0);
            assert_eq!(a.size(), 4096 * 3);
            let b = pool.allocate(4096).unwrap();
            assert_eq!(b.offset(), 4096 * 3);
            drop(b);
            drop(a);
        }
        let after = pool.free_list();
        assert_eq!(before, after);
    }

    #[test]
    fn best_fit_prefers_smallest_sufficient_range_then_smallest_offset() {
        let pool = RangePool::new(0, 0, 1);
        // Hand-construct a pool with three disjoint free ranges by releasing
        // synthetic elements into an otherwise-empty pool.
        pool.release(0, 100);
        pool.release(200, 50);
        pool.release(300, 60);

        let chosen = pool.allocate(40).unwrap();
        // Smallest range >= 40 is the 50-byte one at offset 200.
        assert_eq!(chosen.offset(), 200);
        std::mem::forget(chosen); // avoid releasing back for this synthetic-pool test
    }

    #[test]
    fn allocate_fails_when_no_range_fits() {
        let pool = RangePool::new(0, 4096, 4096);
        let _a = pool.allocate(4096).unwrap();
        let err = pool.allocate(4096).unwrap_err();
        assert!(matches!(err, Error::MallocFailed(_)));
    }

    #[test]
    fn can_allocate_reflects_largest_free_range() {
        let pool = RangePool::new(0, 4096 * 2, 4096);
        assert!(pool.can_allocate(4096 * 2));
        let _a = pool.allocate(4096).unwrap();
        assert!(pool.can_allocate(4096));
        assert!(!pool.can_allocate(4096 * 2));
    }

    #[test]
    fn release_coalesces_both_neighbours() {
        let pool = RangePool::new(0, 4096 * 3, 4096);
        let a = pool.allocate(4096).unwrap();
        let b = pool.allocate(4096).unwrap();
        let c = pool.allocate(4096).unwrap();
        drop(a);
        drop(c);
        drop(b);
        assert_eq!(pool.free_list(), vec![(0, 4096 * 3)]);
    }
}
