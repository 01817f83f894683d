//! The free block registry.
//!
//! Free blocks form a circular singly-linked list anchored by a permanent
//! sentinel ([`Node::Base`]). Blocks are kept in strictly increasing address
//! order between two visits of the sentinel, which makes the sentinel the
//! address-wrap boundary of the circle:
//!
//! ```text
//!        ┌──────────────────────────────────────────────────┐
//!        ▼                                                  │
//!   ┌────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//!   │  Base  │───▶│ 0x1000   │───▶│ 0x4000   │───▶│ 0x9000   │
//!   │ size 0 │    │ size 12  │    │ size 3   │    │ size 40  │
//!   └────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Inserting a block coalesces it with its address-adjacent neighbours on both
//! sides, so no two adjacent free blocks survive an insertion.

use core::{fmt, iter::FusedIterator};

use crate::block::{BlockPtr, Header, Node};

/// Circular list of free blocks plus the cursor of the last insertion.
pub(crate) struct FreeList {
    /// The sentinel. Only its `next` link is ever changed.
    base: Header,
    /// Node that received the most recent insertion or merge.
    cursor: Node,
}

// Blocks are only reachable through the list, which is owned by one allocator.
unsafe impl Send for FreeList {}

impl fmt::Debug for FreeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|(_prev, block)| block))
            .finish()
    }
}

impl FreeList {
    /// Creates a list holding only the sentinel, which points to itself.
    pub(crate) const fn new() -> Self {
        Self {
            base: Header::sentinel(),
            cursor: Node::Base,
        }
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> Node {
        self.cursor
    }

    fn next_of(&self, node: Node) -> Node {
        match node {
            Node::Base => self.base.next(),
            Node::Block(block) => unsafe { block.next() },
        }
    }

    fn set_next_of(&mut self, node: Node, next: Node) {
        match node {
            Node::Base => self.base.set_next(next),
            Node::Block(block) => unsafe { block.set_next(next) },
        }
    }

    /// Splices `block` into the list right after `node`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `node` is the sentinel or a block in this list
    /// - `block` points to a live header and is not already in the list
    pub(crate) unsafe fn insert_after(&mut self, node: Node, block: BlockPtr) {
        let next = self.next_of(node);
        unsafe {
            block.set_next(next);
        }
        self.set_next_of(node, Node::Block(block));
    }

    /// Removes the successor of `node` from the list and returns it.
    ///
    /// If the cursor referred to the removed block it moves back to `node`.
    ///
    /// # Panics
    ///
    /// Panics if the successor of `node` is the sentinel.
    ///
    /// # Safety
    ///
    /// `node` must be the sentinel or a block in this list.
    pub(crate) unsafe fn unlink_after(&mut self, node: Node) -> BlockPtr {
        let Node::Block(block) = self.next_of(node) else {
            panic!("the sentinel cannot be unlinked");
        };

        let next = unsafe { block.next() };
        self.set_next_of(node, next);
        if self.cursor == Node::Block(block) {
            self.cursor = node;
        }

        block
    }

    /// Iterates over every free block, starting right after the sentinel.
    pub(crate) fn iter(&self) -> Iter<'_> {
        self.iter_from(Node::Base)
    }

    /// Iterates over the blocks following `node` up to the sentinel.
    ///
    /// Each item is a block paired with its predecessor, which is what
    /// [`unlink_after`](Self::unlink_after) needs.
    pub(crate) fn iter_from(&self, node: Node) -> Iter<'_> {
        Iter {
            list: self,
            prev: node,
        }
    }

    /// Returns the number of free blocks, not counting the sentinel.
    pub(crate) fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns the total number of free units.
    pub(crate) fn free_units(&self) -> usize {
        self.iter()
            .map(|(_prev, block)| unsafe { block.units() })
            .sum()
    }

    /// Returns the last node whose address is below `block`.
    ///
    /// The search starts at the cursor when the cursor lies below `block`,
    /// otherwise at the sentinel.
    fn insertion_point(&self, block: BlockPtr) -> Node {
        let start = match self.cursor {
            Node::Block(cursor) if cursor < block => self.cursor,
            _ => Node::Base,
        };

        self.iter_from(start)
            .take_while(|&(_prev, free)| free < block)
            .last()
            .map_or(start, |(_prev, free)| Node::Block(free))
    }

    /// Inserts `block` in address order and merges it with adjacent free
    /// blocks.
    ///
    /// Afterwards the cursor refers to the predecessor found for `block`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `block` points to a live header whose size covers memory owned by the
    ///   allocator
    /// - the block is not in the list and overlaps no free block
    pub(crate) unsafe fn insert(&mut self, block: BlockPtr) {
        let prev = self.insertion_point(block);

        unsafe {
            match self.next_of(prev) {
                Node::Block(next) if block.is_followed_by(next) => {
                    let next = self.unlink_after(prev);
                    block.set_units(block.units() + next.units());
                }
                _ => {}
            }

            match prev {
                Node::Block(prev) if prev.is_followed_by(block) => {
                    prev.set_units(prev.units() + block.units());
                }
                _ => self.insert_after(prev, block),
            }
        }

        self.cursor = prev;
    }
}

/// Iterator over `(predecessor, block)` pairs of a [`FreeList`].
#[derive(Clone)]
pub(crate) struct Iter<'a> {
    list: &'a FreeList,
    prev: Node,
}

impl Iterator for Iter<'_> {
    type Item = (Node, BlockPtr);

    fn next(&mut self) -> Option<Self::Item> {
        let Node::Block(block) = self.list.next_of(self.prev) else {
            return None;
        };
        let prev = self.prev;
        self.prev = Node::Block(block);
        Some((prev, block))
    }
}

impl FusedIterator for Iter<'_> {}
