//! Sources that extend the arena.
//!
//! A [`CoreSource`] behaves like a program break: every call hands out a fresh
//! region directly above (or at least disjoint from) everything handed out
//! before, and nothing is ever taken back.
//!
//! Two sources are provided:
//!
//! - [`SliceCore`] moves a break through a caller-provided buffer, e.g. a
//!   static heap array or a test buffer.
//! - `Sbrk` moves the process program break with `sbrk(2)` (Linux, `sbrk`
//!   feature).

use core::ptr::NonNull;

pub use self::slice::SliceCore;

mod slice;

cfg_if::cfg_if! {
    if #[cfg(all(feature = "sbrk", target_os = "linux"))] {
        mod sbrk;
        pub use self::sbrk::Sbrk;
    }
}

/// Error returned when a [`CoreSource`] cannot extend the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[non_exhaustive]
pub enum GrowError {
    #[display("extending the arena by {units} units overflows the address space")]
    Overflow { units: usize },
    #[display("arena exhausted: requested={requested} bytes, available={available} bytes")]
    Exhausted { requested: usize, available: usize },
    #[display("environment refused to move the break by {bytes} bytes")]
    Refused { bytes: usize },
}

/// A monotonic, break-style provider of arena memory.
///
/// # Safety
///
/// Implementations must guarantee that a successful
/// [`extend(units)`](Self::extend) returns a pointer that:
///
/// - is aligned to [`UNIT_ALIGN`](crate::UNIT_ALIGN)
/// - is valid for reads and writes of `units * UNIT_SIZE` bytes
/// - does not overlap any region returned before
/// - stays valid for as long as the source itself
pub unsafe trait CoreSource {
    /// Extends the arena by exactly `units` units and returns the start of
    /// the new region.
    fn extend(&mut self, units: usize) -> Result<NonNull<u8>, GrowError>;
}

unsafe impl<S> CoreSource for &mut S
where
    S: CoreSource + ?Sized,
{
    fn extend(&mut self, units: usize) -> Result<NonNull<u8>, GrowError> {
        (**self).extend(units)
    }
}
