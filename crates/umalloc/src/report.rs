//! Read-only snapshots of the free list.

use core::fmt;

use crate::{
    block::{Node, UNIT_SIZE},
    free_list::FreeList,
};

/// One free block as seen by [`FreeListReport::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlockInfo {
    /// Address of the block header.
    pub addr: usize,
    /// Size of the block in bytes, header included.
    pub bytes: usize,
    /// Address of the next free block, or `None` if the successor is the
    /// sentinel.
    pub next: Option<usize>,
}

/// A borrowed view of an allocator's free list.
///
/// The [`Display`](fmt::Display) output lists every free block in address
/// order:
///
/// ```text
/// Free list:
/// [1] addr=0x5581e2a4c000, size=65184 bytes, next=0x5581e2a5bf00
/// [2] addr=0x5581e2a5bf00, size=128 bytes, next=base
/// ```
///
/// An allocator that has not allocated yet prints `--` instead of blocks.
#[derive(Debug, Clone, Copy)]
pub struct FreeListReport<'a> {
    free_list: Option<&'a FreeList>,
}

impl<'a> FreeListReport<'a> {
    pub(crate) fn new(free_list: Option<&'a FreeList>) -> Self {
        Self { free_list }
    }

    /// Returns `false` if the free list has not been created yet.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.free_list.is_some()
    }

    /// Iterates over the free blocks in address order, sentinel excluded.
    pub fn blocks(&self) -> impl Iterator<Item = FreeBlockInfo> + 'a {
        self.free_list.into_iter().flat_map(|list| {
            list.iter().map(|(_prev, block)| unsafe {
                FreeBlockInfo {
                    addr: block.addr(),
                    bytes: block.units() * UNIT_SIZE,
                    next: match block.next() {
                        Node::Base => None,
                        Node::Block(next) => Some(next.addr()),
                    },
                }
            })
        })
    }

    /// Returns the number of free blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.free_list.map_or(0, FreeList::len)
    }

    /// Returns `true` if there are no free blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total number of free bytes, headers included.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free_list.map_or(0, FreeList::free_units) * UNIT_SIZE
    }
}

impl fmt::Display for FreeListReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Free list:")?;
        if !self.is_initialized() {
            return writeln!(f, "--");
        }
        for (i, block) in self.blocks().enumerate() {
            write!(
                f,
                "[{}] addr={:#x}, size={} bytes, next=",
                i + 1,
                block.addr,
                block.bytes
            )?;
            match block.next {
                Some(next) => writeln!(f, "{next:#x}")?,
                None => writeln!(f, "base")?,
            }
        }
        Ok(())
    }
}
