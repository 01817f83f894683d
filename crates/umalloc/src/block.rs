//! Block headers and unit arithmetic.
//!
//! Every block in the arena, free or allocated, starts with a [`Header`].
//! Sizes are counted in *units*, where one unit is exactly one header, so a
//! block of `n` units has room for `n - 1` units of payload.
//!
//! ```text
//! Block Layout:
//! ┌───────────────────────────────┬──────────────────────────────┐
//! │ Header (1 unit)               │ Payload (size - 1 units)     │
//! │ ┌────────────┬──────────────┐ │                              │
//! │ │ next: Node │ size: usize  │ │                              │
//! │ └────────────┴──────────────┘ │                              │
//! └───────────────────────────────┴──────────────────────────────┘
//! ```

use core::ptr::NonNull;

use crate::core_source::GrowError;

/// Size of one allocation unit in bytes.
pub const UNIT_SIZE: usize = size_of::<Header>();

/// Alignment of every block header and every payload handed out.
pub const UNIT_ALIGN: usize = align_of::<Header>();

const _: () = assert!(UNIT_SIZE == 2 * size_of::<usize>());
const _: () = assert!(UNIT_SIZE.is_multiple_of(UNIT_ALIGN));
const _: () = assert!(size_of::<Node>() == size_of::<usize>());

/// Returns the number of units a request of `nbytes` occupies, header
/// included.
pub(crate) const fn units_for(nbytes: usize) -> usize {
    // `div_ceil` never exceeds `usize::MAX / UNIT_SIZE + 1`, so the header
    // unit cannot overflow.
    nbytes.div_ceil(UNIT_SIZE) + 1
}

/// Converts a unit count into a byte count.
pub(crate) fn units_to_bytes(units: usize) -> Result<usize, GrowError> {
    units
        .checked_mul(UNIT_SIZE)
        .ok_or(GrowError::Overflow { units })
}

/// A link in the free list.
///
/// The sentinel is not addressable memory in the arena, so it is a variant of
/// its own rather than a pointer. The enum keeps the size of a bare pointer
/// through the non-null niche of [`BlockPtr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Node {
    /// The permanent, zero-sized sentinel anchoring the list.
    Base,
    /// A free block in the arena.
    Block(BlockPtr),
}

/// Metadata placed at the start of every block.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct Header {
    /// Successor in the free list. Meaningless while the block is allocated.
    next: Node,
    /// Units spanned by the block, header included.
    size: usize,
}

impl Header {
    /// Creates the header of the sentinel: zero-sized and linked to itself.
    pub(crate) const fn sentinel() -> Self {
        Self {
            next: Node::Base,
            size: 0,
        }
    }

    pub(crate) fn next(&self) -> Node {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: Node) {
        self.next = next;
    }
}

/// Pointer to the header of a block living in the arena.
///
/// Ordering follows addresses, which is the order of the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct BlockPtr(NonNull<Header>);

impl BlockPtr {
    /// Writes a fresh header spanning `units` units at `ptr`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `ptr` is aligned to [`UNIT_ALIGN`]
    /// - the memory region `ptr..ptr + units * UNIT_SIZE` is valid for writes
    ///   and owned by the allocator
    pub(crate) unsafe fn init(ptr: NonNull<u8>, units: usize) -> Self {
        let header = ptr.cast::<Header>();
        assert!(units > 0, "block must span at least its own header");
        assert!(header.is_aligned(), "block header must be unit aligned");

        unsafe {
            header.write(Header {
                next: Node::Base,
                size: units,
            });
        }

        Self(header)
    }

    /// Recovers the header of the block whose payload starts at `data`.
    ///
    /// # Safety
    ///
    /// `data` must have been produced by [`BlockPtr::data`].
    pub(crate) unsafe fn from_data(data: NonNull<u8>) -> Self {
        unsafe { Self(data.cast::<Header>().sub(1)) }
    }

    pub(crate) fn addr(self) -> usize {
        self.0.addr().get()
    }

    /// Returns the start of the payload, one unit past the header.
    pub(crate) fn data(self) -> NonNull<u8> {
        unsafe { self.0.add(1).cast() }
    }

    /// # Safety
    ///
    /// `self` must point to a live header.
    pub(crate) unsafe fn units(self) -> usize {
        unsafe { (*self.0.as_ptr()).size }
    }

    /// # Safety
    ///
    /// `self` must point to a live header.
    pub(crate) unsafe fn set_units(self, units: usize) {
        unsafe {
            (*self.0.as_ptr()).size = units;
        }
    }

    /// # Safety
    ///
    /// `self` must point to a live header.
    pub(crate) unsafe fn next(self) -> Node {
        unsafe { (*self.0.as_ptr()).next }
    }

    /// # Safety
    ///
    /// `self` must point to a live header.
    pub(crate) unsafe fn set_next(self, next: Node) {
        unsafe {
            (*self.0.as_ptr()).next = next;
        }
    }

    /// Returns the address one byte past the end of the block.
    ///
    /// # Safety
    ///
    /// `self` must point to a live header.
    pub(crate) unsafe fn end_addr(self) -> usize {
        unsafe { self.addr() + self.units() * UNIT_SIZE }
    }

    /// Returns `true` if `next` starts exactly where `self` ends.
    ///
    /// # Safety
    ///
    /// `self` must point to a live header.
    pub(crate) unsafe fn is_followed_by(self, next: Self) -> bool {
        unsafe { self.end_addr() == next.addr() }
    }

    /// Shrinks this block by `units` and carves a new block of exactly `units`
    /// units from its high-address end.
    ///
    /// The header of `self` stays where it is, so a free block split this way
    /// keeps its position in the free list.
    ///
    /// # Safety
    ///
    /// `self` must point to a live header.
    pub(crate) unsafe fn split_tail(self, units: usize) -> Self {
        unsafe {
            let size = self.units();
            assert!(0 < units && units < size, "split must leave both halves non-empty");

            let remaining = size - units;
            self.set_units(remaining);
            Self::init(self.0.add(remaining).cast(), units)
        }
    }
}
