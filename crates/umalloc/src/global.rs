//! [`GlobalAlloc`] adapter.

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use spin::{Mutex, MutexGuard};

use crate::{
    block::UNIT_ALIGN,
    core_source::CoreSource,
    heap::{Allocation, Umalloc},
};

/// An [`Umalloc`] behind a spin lock, usable as `#[global_allocator]`.
///
/// Every call takes the lock for its whole duration, which is the
/// serialization the allocator itself leaves to its caller.
///
/// ```rust,ignore
/// use umalloc::{LockedUmalloc, Sbrk};
///
/// #[global_allocator]
/// static ALLOCATOR: LockedUmalloc<Sbrk> = LockedUmalloc::new(Sbrk);
/// ```
#[derive(Debug)]
pub struct LockedUmalloc<S> {
    inner: Mutex<Umalloc<S>>,
}

impl<S> LockedUmalloc<S> {
    /// Creates a locked allocator growing from `source`.
    #[must_use]
    pub const fn new(source: S) -> Self {
        Self {
            inner: Mutex::new(Umalloc::new(source)),
        }
    }

    /// Locks the allocator, spinning until it is available.
    pub fn lock(&self) -> MutexGuard<'_, Umalloc<S>> {
        self.inner.lock()
    }
}

unsafe impl<S> GlobalAlloc for LockedUmalloc<S>
where
    S: CoreSource + Send,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > UNIT_ALIGN {
            return ptr::null_mut();
        }
        self.lock()
            .allocate(layout.size())
            .map_or(ptr::null_mut(), |allocation| {
                allocation.into_raw().as_ptr()
            })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        unsafe {
            let allocation = Allocation::from_raw(ptr);
            self.lock().release(allocation);
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::vec;

    use super::*;
    use crate::{MIN_GROW_UNITS, SliceCore, UNIT_SIZE};

    #[test]
    fn test_global_alloc_round_trip() {
        let mut heap = vec![0u8; 2 * MIN_GROW_UNITS * UNIT_SIZE];
        let allocator = LockedUmalloc::new(SliceCore::new(&mut heap));

        unsafe {
            let layout = Layout::from_size_align(100, UNIT_ALIGN).unwrap();
            let ptr = allocator.alloc(layout);
            assert!(!ptr.is_null());
            assert!(ptr.addr().is_multiple_of(layout.align()));
            ptr.write_bytes(0x33, layout.size());

            let second = allocator.alloc(layout);
            assert!(!second.is_null());
            assert_ne!(ptr, second);

            allocator.dealloc(ptr, layout);
            allocator.dealloc(second, layout);
        }

        let guard = allocator.lock();
        let report = guard.free_list_report();
        assert_eq!(report.len(), 1);
        assert_eq!(report.free_bytes(), MIN_GROW_UNITS * UNIT_SIZE);
    }

    #[test]
    fn test_global_alloc_rejects_large_alignment() {
        let mut heap = vec![0u8; 2 * MIN_GROW_UNITS * UNIT_SIZE];
        let allocator = LockedUmalloc::new(SliceCore::new(&mut heap));

        unsafe {
            let layout = Layout::from_size_align(64, 2 * UNIT_ALIGN).unwrap();
            assert!(allocator.alloc(layout).is_null());
        }
        assert!(!allocator.lock().is_initialized());
    }

    #[test]
    fn test_global_alloc_out_of_memory() {
        let mut heap = vec![0u8; 16 * UNIT_SIZE];
        let allocator = LockedUmalloc::new(SliceCore::new(&mut heap));

        unsafe {
            let layout = Layout::from_size_align(8, UNIT_ALIGN).unwrap();
            assert!(allocator.alloc(layout).is_null());
        }
    }

    #[test]
    fn test_dealloc_null_is_noop() {
        let mut heap = vec![0u8; 16];
        let allocator = LockedUmalloc::new(SliceCore::new(&mut heap));
        unsafe {
            allocator.dealloc(ptr::null_mut(), Layout::new::<u64>());
        }
        assert!(!allocator.lock().is_initialized());
    }
}
