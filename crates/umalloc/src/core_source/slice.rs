use core::{marker::PhantomData, ptr::NonNull};

use super::{CoreSource, GrowError};
use crate::block::{self, UNIT_ALIGN};

/// A program break moving through a borrowed byte buffer.
///
/// The first extension skips the bytes needed to reach unit alignment; every
/// later one starts exactly where the previous one ended.
///
/// # Examples
///
/// ```
/// use umalloc::{SliceCore, Umalloc};
///
/// let mut heap = vec![0u8; 256 * 1024];
/// let mut allocator = Umalloc::new(SliceCore::new(&mut heap));
///
/// let allocation = allocator.allocate(64).unwrap();
/// assert!(allocation.len() >= 64);
/// unsafe { allocator.release(allocation); }
/// ```
#[derive(Debug)]
pub struct SliceCore<'a> {
    base: NonNull<u8>,
    capacity: usize,
    brk: usize,
    _buf: PhantomData<&'a mut [u8]>,
}

unsafe impl Send for SliceCore<'_> {}

impl<'a> SliceCore<'a> {
    /// Creates a break positioned at the start of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let capacity = buf.len();
        Self {
            base: NonNull::from(buf).cast(),
            capacity,
            brk: 0,
            _buf: PhantomData,
        }
    }

    /// Returns the size of the underlying buffer in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of bytes below the break, alignment padding
    /// included.
    #[must_use]
    pub fn used(&self) -> usize {
        self.brk
    }
}

unsafe impl CoreSource for SliceCore<'_> {
    fn extend(&mut self, units: usize) -> Result<NonNull<u8>, GrowError> {
        let requested = block::units_to_bytes(units)?;

        let padding = self
            .base
            .as_ptr()
            .wrapping_add(self.brk)
            .align_offset(UNIT_ALIGN);
        let available = self.capacity.saturating_sub(self.brk.saturating_add(padding));
        if requested > available {
            return Err(GrowError::Exhausted {
                requested,
                available,
            });
        }

        let start = self.brk + padding;
        self.brk = start + requested;
        Ok(unsafe { self.base.add(start) })
    }
}
