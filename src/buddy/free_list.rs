//! Free list threaded through the metadata arena
//!
//! Each list only keeps its head/tail/len; the links live in the
//! [`MetaArena`] records of the free block heads, so no node storage is ever
//! allocated.

#[cfg(feature = "log")]
use log::error;

use super::frame_meta::{MetaArena, NIL};

/// Doubly linked list of free block heads, sorted by ascending frame index.
pub struct FreeList {
    head: u32,
    tail: u32,
    len: usize,
}

impl FreeList {
    /// Create a new empty free list
    pub const fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    /// Insert element in sorted order (ascending by address)
    /// This keeps lowest-address-first selection deterministic.
    pub fn insert_sorted(&mut self, meta: &mut MetaArena, idx: u32) {
        // Fast path: registration and splits mostly append
        if self.tail == NIL || self.tail < idx {
            self.link(meta, self.tail, NIL, idx);
            return;
        }

        let mut current = self.head;
        let mut visited = 0;
        while current != NIL && current < idx {
            if visited > self.len {
                error!("Potential cycle detected during insert");
                return;
            }
            current = meta.next(current);
            visited += 1;
        }

        if current == idx {
            error!("Frame {} already in free list", idx);
            return;
        }

        let prev = if current == NIL {
            self.tail
        } else {
            meta.prev(current)
        };
        self.link(meta, prev, current, idx);
    }

    /// Link `idx` between `prev` and `next`
    fn link(&mut self, meta: &mut MetaArena, prev: u32, next: u32, idx: u32) {
        meta.set_prev(idx, prev);
        meta.set_next(idx, next);

        if prev == NIL {
            self.head = idx;
        } else {
            meta.set_next(prev, idx);
        }
        if next == NIL {
            self.tail = idx;
        } else {
            meta.set_prev(next, idx);
        }
        self.len += 1;
    }

    /// Unlink `idx`, which must currently be in this list (O(1))
    pub fn remove(&mut self, meta: &mut MetaArena, idx: u32) {
        let prev = meta.prev(idx);
        let next = meta.next(idx);

        if prev == NIL {
            self.head = next;
        } else {
            meta.set_next(prev, next);
        }
        if next == NIL {
            self.tail = prev;
        } else {
            meta.set_prev(next, prev);
        }

        meta.set_prev(idx, NIL);
        meta.set_next(idx, NIL);
        self.len -= 1;
    }

    /// Pop the lowest-address element from the list
    pub fn pop_front(&mut self, meta: &mut MetaArena) -> Option<u32> {
        if self.head == NIL {
            return None;
        }
        let idx = self.head;
        self.remove(meta, idx);
        Some(idx)
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the length of the list
    pub fn len(&self) -> usize {
        self.len
    }

    /// Get iterator over the frame indices in ascending order
    pub fn iter<'b>(&self, meta: &'b MetaArena<'_>) -> FreeListIter<'b> {
        FreeListIter {
            meta,
            current: self.head,
            remaining: self.len,
        }
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator for FreeList
pub struct FreeListIter<'b> {
    meta: &'b MetaArena<'b>,
    current: u32,
    remaining: usize,
}

impl Iterator for FreeListIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == NIL || self.remaining == 0 {
            return None;
        }
        let idx = self.current;
        self.current = self.meta.next(idx);
        self.remaining -= 1;
        Some(idx)
    }
}
