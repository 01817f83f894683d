use core::ptr::NonNull;

use super::{CoreSource, GrowError};
use crate::block::{self, UNIT_ALIGN};

/// The process program break, moved with `sbrk(2)`.
///
/// The break is process-global and other code (the C allocator, for one) may
/// move it at any time. Every successful move made by [`extend`] ends up in
/// the returned region; if the break moved in between, the region is placed
/// inside whatever was granted.
///
/// [`extend`]: CoreSource::extend
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

impl Sbrk {
    /// Returns the current program break.
    #[must_use]
    pub fn current() -> *mut u8 {
        unsafe { libc::sbrk(0).cast() }
    }
}

fn is_failure(brk: *mut libc::c_void) -> bool {
    brk.addr() == usize::MAX
}

/// Moves the break up by `total` bytes and returns the start of the grant.
fn move_break(total: usize, units: usize) -> Result<*mut u8, GrowError> {
    let increment =
        libc::intptr_t::try_from(total).map_err(|_err| GrowError::Overflow { units })?;
    let prev = unsafe { libc::sbrk(increment) };
    if is_failure(prev) {
        return Err(GrowError::Refused { bytes: total });
    }
    Ok(prev.cast())
}

/// Returns the unit-aligned start of `bytes` bytes placed in the grant
/// `start..start + total`, if they fit.
fn place(start: *mut u8, total: usize, bytes: usize) -> Option<NonNull<u8>> {
    let padding = start.align_offset(UNIT_ALIGN);
    if padding.checked_add(bytes)? > total {
        return None;
    }
    NonNull::new(start.wrapping_add(padding))
}

unsafe impl CoreSource for Sbrk {
    fn extend(&mut self, units: usize) -> Result<NonNull<u8>, GrowError> {
        let bytes = block::units_to_bytes(units)?;

        // Padding the request to the break read here keeps consecutive
        // extensions adjacent. The break may still move before `sbrk` runs.
        let padding = Self::current().align_offset(UNIT_ALIGN);
        let total = bytes
            .checked_add(padding)
            .ok_or(GrowError::Overflow { units })?;
        let start = move_break(total, units)?;
        if let Some(region) = place(start, total, bytes) {
            return Ok(region);
        }

        // The break was left misaligned in between. Widen the grant in place,
        // or fall back to a grant with room for any alignment.
        let needed = start.align_offset(UNIT_ALIGN).saturating_add(bytes);
        let shortfall = needed.saturating_sub(total);
        if move_break(shortfall, units)? == start.wrapping_add(total) {
            if let Some(region) = place(start, needed, bytes) {
                return Ok(region);
            }
        }

        let total = bytes
            .checked_add(UNIT_ALIGN - 1)
            .ok_or(GrowError::Overflow { units })?;
        let start = move_break(total, units)?;
        place(start, total, bytes).ok_or(GrowError::Refused { bytes: total })
    }
}
