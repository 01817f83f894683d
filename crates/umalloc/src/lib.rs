//! A best-fit memory allocator over a break-grown arena.
//!
//! [`Umalloc`] hands out blocks from a single arena that grows on demand from
//! a [`CoreSource`], a monotonic program-break style provider. Memory is never
//! given back to the source; released blocks return to a free list and are
//! merged with their free neighbours.
//!
//! # Algorithm
//!
//! - **Units**: every block starts with a two-word header and all sizes are
//!   counted in header-sized units ([`UNIT_SIZE`]).
//! - **Free list**: free blocks form a circular, address-ordered,
//!   singly-linked list anchored by a zero-sized sentinel.
//! - **Allocation**: best fit. A block of exactly the right size is taken
//!   whole; otherwise the block with the least excess is split and the
//!   allocation is carved from its tail.
//! - **Growth**: when nothing fits, the arena grows by at least
//!   [`MIN_GROW_UNITS`] units and the search is retried once.
//! - **Release**: blocks are reinserted in address order and coalesced with
//!   adjacent free blocks on both sides.
//!
//! # Usage Example
//!
//! ```rust
//! use umalloc::{SliceCore, Umalloc};
//!
//! let mut heap = vec![0u8; 256 * 1024];
//! let mut allocator = Umalloc::new(SliceCore::new(&mut heap));
//!
//! let a = allocator.allocate(100).unwrap();
//! let b = allocator.allocate(200).unwrap();
//! assert_ne!(a.as_ptr(), b.as_ptr());
//!
//! unsafe {
//!     allocator.release(a);
//!     allocator.release(b);
//! }
//!
//! // both blocks merged back into the region they were carved from
//! assert_eq!(allocator.free_list_report().len(), 1);
//! println!("{}", allocator.free_list_report());
//! ```
//!
//! # Thread Safety
//!
//! [`Umalloc`] performs no locking. It is `Send` but not `Sync`; wrap it in
//! [`LockedUmalloc`] (or any other lock) to share it, e.g. as the
//! `#[global_allocator]`.
//!
//! # Contract
//!
//! Releasing a block twice, or releasing a block into an allocator that did
//! not produce it, is undefined behavior. Neither is detected.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use self::{
    block::{UNIT_ALIGN, UNIT_SIZE},
    core_source::{CoreSource, GrowError, SliceCore},
    global::LockedUmalloc,
    heap::{AllocError, Allocation, MIN_GROW_UNITS, Umalloc},
    report::{FreeBlockInfo, FreeListReport},
};

cfg_if::cfg_if! {
    if #[cfg(all(feature = "sbrk", target_os = "linux"))] {
        pub use self::core_source::Sbrk;
    }
}

mod block;
pub mod core_source;
mod free_list;
mod global;
mod heap;
mod report;
