//! The best-fit allocator.
//!
//! # Algorithm
//!
//! - **Allocation**: a request of `n` bytes needs `ceil(n / UNIT_SIZE) + 1`
//!   units. The free list is scanned once from the sentinel. A block of
//!   exactly that size is unlinked and handed out whole; otherwise the block
//!   with the smallest excess wins (the first one on ties), shrinks in place,
//!   and the allocation is carved from its high-address end.
//! - **Growth**: when no block is large enough, the arena grows by at least
//!   [`MIN_GROW_UNITS`] units. The new region is released into the free list
//!   like any other block and the search runs once more.
//! - **Release**: the block is inserted in address order and merged with its
//!   free neighbours on both sides.
//!
//! ```text
//! Tail split of a free block (size 20) for a request of 6 units:
//!
//!   before: ┌──────────────────────── free, size 20 ──────────────────────┐
//!   after:  ┌─────────── free, size 14 ──────────┬──── allocated, 6 ──────┐
//!           ▲ header stays in the free list      ▲ new header
//! ```

use core::ptr::NonNull;

use snafu::{ResultExt as _, Snafu};

use crate::{
    block::{self, BlockPtr, UNIT_SIZE},
    core_source::{CoreSource, GrowError},
    free_list::FreeList,
    report::FreeListReport,
};

/// The smallest number of units the arena grows by at a time.
pub const MIN_GROW_UNITS: usize = 4096;

/// Error returned by [`Umalloc::allocate`].
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum AllocError {
    #[snafu(display("out of memory while allocating {nbytes} bytes"))]
    OutOfMemory {
        nbytes: usize,
        #[snafu(source)]
        source: GrowError,
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// A live allocation.
///
/// The handle owns the block: it is neither `Clone` nor `Copy`, so the only
/// way to release a block twice is to forge a handle with
/// [`from_raw`](Self::from_raw).
#[derive(Debug)]
#[must_use = "dropping an allocation leaks its block"]
pub struct Allocation {
    block: BlockPtr,
    units: usize,
}

unsafe impl Send for Allocation {}

impl Allocation {
    /// Returns a pointer to the first usable byte.
    ///
    /// The pointer is aligned to [`UNIT_ALIGN`](crate::UNIT_ALIGN).
    #[must_use]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.block.data()
    }

    /// Returns the number of usable bytes, which is at least the number
    /// requested.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.units - 1) * UNIT_SIZE
    }

    /// Returns `true` if the allocation has no usable bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units == 1
    }

    /// Returns the number of units spanned by the block, header included.
    #[must_use]
    pub fn units(&self) -> usize {
        self.units
    }

    /// Consumes the handle and returns the payload pointer.
    #[must_use]
    pub fn into_raw(self) -> NonNull<u8> {
        self.as_ptr()
    }

    /// Rebuilds a handle from a pointer returned by
    /// [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`into_raw`](Self::into_raw) on an allocation that
    /// has not been released since.
    pub unsafe fn from_raw(ptr: NonNull<u8>) -> Self {
        unsafe {
            let block = BlockPtr::from_data(ptr);
            Self {
                block,
                units: block.units(),
            }
        }
    }
}

/// A best-fit allocator over an arena grown from a [`CoreSource`].
///
/// The free list is created on the first allocation or growth. The allocator
/// performs no locking: it is `Send` but not `Sync`, and shared use needs
/// external synchronization such as [`LockedUmalloc`](crate::LockedUmalloc).
#[derive(Debug)]
pub struct Umalloc<S> {
    free_list: Option<FreeList>,
    source: S,
}

impl<S> Umalloc<S> {
    /// Creates an allocator that grows its arena from `source`.
    ///
    /// No memory is requested until the first allocation.
    #[must_use]
    pub const fn new(source: S) -> Self {
        Self {
            free_list: None,
            source,
        }
    }

    /// Returns the growth source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns `true` once the free list has been created.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.free_list.is_some()
    }

    /// Returns a read-only snapshot of the free list.
    pub fn free_list_report(&self) -> FreeListReport<'_> {
        FreeListReport::new(self.free_list.as_ref())
    }

    fn free_list_mut(&mut self) -> &mut FreeList {
        self.free_list.get_or_insert_with(FreeList::new)
    }

    /// Returns an allocation to the free list.
    ///
    /// # Safety
    ///
    /// `allocation` must have been returned by [`allocate`](Self::allocate)
    /// on this same allocator.
    pub unsafe fn release(&mut self, allocation: Allocation) {
        debug_assert_eq!(unsafe { allocation.block.units() }, allocation.units);
        let free_list = self.free_list_mut();
        unsafe {
            free_list.insert(allocation.block);
        }
    }
}

impl<S> Umalloc<S>
where
    S: CoreSource,
{
    /// Allocates at least `nbytes` usable bytes.
    ///
    /// The free list is searched first; the arena grows only when no free
    /// block is large enough. Zero-byte requests succeed with an empty
    /// allocation.
    ///
    /// # Panics
    ///
    /// Panics if the arena, grown for this request, still has no block large
    /// enough, which means the source broke its contract.
    pub fn allocate(&mut self, nbytes: usize) -> Result<Allocation, AllocError> {
        let nunits = block::units_for(nbytes);

        let block = match take_best_fit(self.free_list_mut(), nunits) {
            Some(block) => block,
            None => {
                self.grow(nunits).context(OutOfMemorySnafu { nbytes })?;
                take_best_fit(self.free_list_mut(), nunits).unwrap_or_else(|| {
                    panic!("arena grown for {nunits} units has no block to fit them")
                })
            }
        };

        Ok(Allocation {
            block,
            units: nunits,
        })
    }

    /// Grows the arena by `max(min_units, MIN_GROW_UNITS)` units and releases
    /// the new region into the free list.
    ///
    /// On failure the free list is left untouched.
    pub fn grow(&mut self, min_units: usize) -> Result<(), GrowError> {
        let units = min_units.max(MIN_GROW_UNITS);
        let start = self.source.extend(units)?;

        let free_list = self.free_list_mut();
        unsafe {
            let block = BlockPtr::init(start, units);
            free_list.insert(block);
        }

        Ok(())
    }
}

/// Takes a block of exactly `nunits` units out of the free list.
///
/// Returns `None` when every free block is smaller than `nunits`.
fn take_best_fit(free_list: &mut FreeList, nunits: usize) -> Option<BlockPtr> {
    let mut exact = None;
    let mut best: Option<(BlockPtr, usize)> = None;

    for (prev, block) in free_list.iter() {
        let size = unsafe { block.units() };
        if size == nunits {
            exact = Some(prev);
            break;
        }
        if size > nunits {
            let excess = size - nunits;
            if best.is_none_or(|(_, best_excess)| excess < best_excess) {
                best = Some((block, excess));
            }
        }
    }

    if let Some(prev) = exact {
        return Some(unsafe { free_list.unlink_after(prev) });
    }

    let (block, _excess) = best?;
    Some(unsafe { block.split_tail(nunits) })
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::{vec, vec::Vec};
    use core::alloc::Layout;

    use super::*;
    use crate::{block::Node, core_source::SliceCore};

    /// Records every extension and fills payloads with a pattern that is
    /// checked again on release.
    struct TestAllocator<'a> {
        allocator: Umalloc<CountingCore<'a>>,
    }

    struct CountingCore<'a> {
        inner: SliceCore<'a>,
        extensions: Vec<usize>,
    }

    unsafe impl CoreSource for CountingCore<'_> {
        fn extend(&mut self, units: usize) -> Result<NonNull<u8>, GrowError> {
            self.extensions.push(units);
            self.inner.extend(units)
        }
    }

    impl TestAllocator<'_> {
        fn allocate(&mut self, nbytes: usize) -> Result<Allocation, AllocError> {
            let allocation = self.allocator.allocate(nbytes)?;
            assert!(allocation.len() >= nbytes);
            unsafe {
                allocation.as_ptr().write_bytes(0x33, allocation.len());
            }
            Ok(allocation)
        }

        unsafe fn release(&mut self, allocation: Allocation) {
            unsafe {
                for i in 0..allocation.len() {
                    assert_eq!(allocation.as_ptr().add(i).read(), 0x33);
                }
                allocation.as_ptr().write_bytes(0x55, allocation.len());
                self.allocator.release(allocation);
            }
        }

        fn extensions(&self) -> &[usize] {
            &self.allocator.source().extensions
        }

        fn free_list(&self) -> &FreeList {
            self.allocator.free_list.as_ref().unwrap()
        }

        fn free_sizes(&self) -> Vec<usize> {
            self.free_list()
                .iter()
                .map(|(_prev, block)| unsafe { block.units() })
                .collect()
        }
    }

    fn with_test_allocator<F>(heap_units: usize, test_fn: F)
    where
        F: FnOnce(&mut TestAllocator<'_>),
    {
        unsafe {
            let size = heap_units * UNIT_SIZE;
            let layout = Layout::from_size_align(size, crate::UNIT_ALIGN).unwrap();
            let heap_start = alloc::alloc::alloc(layout);
            heap_start.write_bytes(0x11, size);
            let heap = core::slice::from_raw_parts_mut(heap_start, size);

            let source = CountingCore {
                inner: SliceCore::new(heap),
                extensions: vec![],
            };
            test_fn(&mut TestAllocator {
                allocator: Umalloc::new(source),
            });

            alloc::alloc::dealloc(heap_start, layout);
        }
    }

    #[test]
    fn test_lazy_initialization() {
        with_test_allocator(MIN_GROW_UNITS, |allocator| {
            assert!(!allocator.allocator.is_initialized());
            assert!(allocator.extensions().is_empty());

            let _a = allocator.allocate(1).unwrap();
            assert!(allocator.allocator.is_initialized());
            assert_eq!(allocator.extensions(), [MIN_GROW_UNITS]);
        });
    }

    #[test]
    fn test_zero_byte_allocation() {
        with_test_allocator(MIN_GROW_UNITS, |allocator| unsafe {
            let a = allocator.allocate(0).unwrap();
            assert!(a.is_empty());
            assert_eq!(a.units(), 1);
            allocator.release(a);
            assert_eq!(allocator.free_sizes(), [MIN_GROW_UNITS]);
        });
    }

    #[test]
    fn test_allocation_carved_from_tail() {
        with_test_allocator(MIN_GROW_UNITS, |allocator| {
            let a = allocator.allocate(100).unwrap();
            let b = allocator.allocate(200).unwrap();

            assert_eq!(a.units(), 100usize.div_ceil(UNIT_SIZE) + 1);
            assert_eq!(b.units(), 200usize.div_ceil(UNIT_SIZE) + 1);
            assert_eq!(
                allocator.free_sizes(),
                [MIN_GROW_UNITS - a.units() - b.units()]
            );

            // the free header stays at the bottom, allocations stack down from the top
            let (_, free) = allocator.free_list().iter().next().unwrap();
            assert!(free.addr() < b.as_ptr().addr().get());
            assert!(b.as_ptr().addr().get() < a.as_ptr().addr().get());
            assert_eq!(
                b.as_ptr().addr().get() + b.len() + UNIT_SIZE,
                a.as_ptr().addr().get()
            );
        });
    }

    #[test]
    fn test_exact_fit_reuses_block_without_growth() {
        with_test_allocator(MIN_GROW_UNITS, |allocator| unsafe {
            let a = allocator.allocate(100).unwrap();
            let b = allocator.allocate(100).unwrap();
            let c = allocator.allocate(100).unwrap();
            let b_ptr = b.as_ptr();

            allocator.release(b);
            assert_eq!(allocator.free_list().len(), 2);

            let d = allocator.allocate(100).unwrap();
            assert_eq!(d.as_ptr(), b_ptr);
            assert_eq!(allocator.free_list().len(), 1);
            assert_eq!(allocator.extensions(), [MIN_GROW_UNITS]);

            allocator.release(a);
            allocator.release(c);
            allocator.release(d);
            assert_eq!(allocator.free_sizes(), [MIN_GROW_UNITS]);
        });
    }

    #[test]
    fn test_best_fit_prefers_smallest_excess() {
        with_test_allocator(MIN_GROW_UNITS, |allocator| unsafe {
            // layout from the top: big, guard, small, guard
            let big = allocator.allocate(20 * UNIT_SIZE).unwrap();
            let _guard1 = allocator.allocate(0).unwrap();
            let small = allocator.allocate(6 * UNIT_SIZE).unwrap();
            let _guard2 = allocator.allocate(0).unwrap();
            let small_span = small.as_ptr().addr().get() - UNIT_SIZE
                ..small.as_ptr().addr().get() + small.len();

            allocator.release(big);
            allocator.release(small);

            let a = allocator.allocate(4 * UNIT_SIZE).unwrap();
            assert!(small_span.contains(&a.as_ptr().addr().get()));
            // 7 units minus 5 leaves 2 in place
            assert!(allocator.free_sizes().contains(&2));
            assert!(allocator.free_sizes().contains(&21));
        });
    }

    #[test]
    fn test_best_fit_tie_keeps_lowest_address() {
        with_test_allocator(MIN_GROW_UNITS, |allocator| unsafe {
            let high = allocator.allocate(8 * UNIT_SIZE).unwrap();
            let _guard1 = allocator.allocate(0).unwrap();
            let low = allocator.allocate(8 * UNIT_SIZE).unwrap();
            let _guard2 = allocator.allocate(0).unwrap();
            let low_addr = low.as_ptr().addr().get();

            allocator.release(high);
            allocator.release(low);

            let a = allocator.allocate(2 * UNIT_SIZE).unwrap();
            let low_span = low_addr - UNIT_SIZE..low_addr + 8 * UNIT_SIZE;
            assert!(low_span.contains(&a.as_ptr().addr().get()));
        });
    }

    #[test]
    fn test_growth_floor() {
        with_test_allocator(4 * MIN_GROW_UNITS, |allocator| {
            let _a = allocator.allocate(1).unwrap();
            assert_eq!(allocator.extensions(), [MIN_GROW_UNITS]);

            let large = 2 * MIN_GROW_UNITS * UNIT_SIZE;
            let _b = allocator.allocate(large).unwrap();
            assert_eq!(
                allocator.extensions(),
                [MIN_GROW_UNITS, block::units_for(large)]
            );
        });
    }

    #[test]
    fn test_retry_after_growth_takes_the_new_region() {
        with_test_allocator(4 * MIN_GROW_UNITS, |allocator| unsafe {
            let a = allocator.allocate(64).unwrap();
            let b = allocator.allocate(64).unwrap();
            let leftover = MIN_GROW_UNITS - a.units() - b.units();
            let b_units = b.units();
            allocator.release(b);
            assert_eq!(allocator.free_sizes(), [leftover + b_units]);

            // nothing free is large enough, so the grant alone must serve it
            let large = 2 * MIN_GROW_UNITS * UNIT_SIZE;
            let c = allocator.allocate(large).unwrap();
            assert_eq!(c.units(), block::units_for(large));
            assert_eq!(
                allocator.extensions(),
                [MIN_GROW_UNITS, block::units_for(large)]
            );
            assert_eq!(allocator.free_sizes(), [leftover + b_units]);

            allocator.release(a);
            allocator.release(c);
            assert_eq!(
                allocator.free_sizes(),
                [MIN_GROW_UNITS + block::units_for(large)]
            );
        });
    }

    #[test]
    fn test_growth_merges_with_previous_region() {
        with_test_allocator(3 * MIN_GROW_UNITS, |allocator| {
            let a = allocator.allocate((MIN_GROW_UNITS - 1) * UNIT_SIZE).unwrap();
            assert_eq!(allocator.free_list().len(), 0);

            allocator.allocator.grow(1).unwrap();
            assert_eq!(allocator.free_sizes(), [MIN_GROW_UNITS]);

            unsafe {
                allocator.release(a);
            }
            assert_eq!(allocator.free_sizes(), [2 * MIN_GROW_UNITS]);
        });
    }

    #[test]
    fn test_out_of_memory_leaves_free_list_unchanged() {
        with_test_allocator(MIN_GROW_UNITS + 16, |allocator| {
            let _a = allocator.allocate(100).unwrap();
            let before = allocator.free_sizes();

            let err = allocator.allocate(MIN_GROW_UNITS * UNIT_SIZE).unwrap_err();
            assert!(matches!(
                err,
                AllocError::OutOfMemory {
                    source: GrowError::Exhausted { .. },
                    ..
                }
            ));
            assert_eq!(allocator.free_sizes(), before);
            assert_eq!(allocator.extensions().len(), 2);
        });
    }

    #[test]
    fn test_out_of_memory_on_overflowing_request() {
        with_test_allocator(MIN_GROW_UNITS, |allocator| {
            let err = allocator.allocate(usize::MAX).unwrap_err();
            assert!(matches!(
                err,
                AllocError::OutOfMemory {
                    nbytes: usize::MAX,
                    source: GrowError::Overflow { .. },
                    ..
                }
            ));
            assert_eq!(allocator.free_list().len(), 0);
        });
    }

    #[test]
    fn test_exact_fit_unlink_repairs_cursor() {
        with_test_allocator(MIN_GROW_UNITS, |allocator| unsafe {
            let a = allocator.allocate(100).unwrap();
            let b = allocator.allocate(100).unwrap();
            let c = allocator.allocate(100).unwrap();
            let d = allocator.allocate(100).unwrap();
            let _e = allocator.allocate(100).unwrap();
            let d_block = d.block;

            allocator.release(d);
            allocator.release(b);
            assert_eq!(allocator.free_list().cursor(), Node::Block(d_block));

            // takes `d` whole, which the cursor referred to
            let f = allocator.allocate(100).unwrap();
            assert_eq!(f.block, d_block);
            assert_ne!(allocator.free_list().cursor(), Node::Block(d_block));

            allocator.release(c);
            allocator.release(a);
            allocator.release(f);
            assert!(allocator.free_list().iter().map(|(_prev, b)| b).is_sorted());
            assert_eq!(allocator.free_list().len(), 2);
        });
    }

    #[test]
    fn test_raw_round_trip() {
        with_test_allocator(MIN_GROW_UNITS, |allocator| unsafe {
            let a = allocator.allocate(42).unwrap();
            let (len, units) = (a.len(), a.units());

            let raw = a.into_raw();
            let a = Allocation::from_raw(raw);
            assert_eq!(a.as_ptr(), raw);
            assert_eq!((a.len(), a.units()), (len, units));

            allocator.release(a);
            assert_eq!(allocator.free_sizes(), [MIN_GROW_UNITS]);
        });
    }
}
