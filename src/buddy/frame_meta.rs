//! Per-frame metadata arena
//!
//! Every frame of a region owns one [`FrameMeta`] record inside the caller
//! supplied metadata buffer. Records of block heads carry the block order and
//! state, and free heads additionally carry the free list links. Links are
//! frame indices relative to the region base, never pointers, so the buffer
//! may live anywhere in the caller's address space.

use core::mem::{align_of, size_of};

/// Link value terminating a free list.
pub const NIL: u32 = u32::MAX;

/// Bookkeeping state of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameState {
    /// Inside a larger block, not a block head.
    Tail = 0,
    /// Head of a block sitting in a free list.
    Free = 1,
    /// Head of an allocated block.
    Allocated = 2,
}

impl FrameState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Free,
            2 => Self::Allocated,
            _ => Self::Tail,
        }
    }
}

/// One metadata record. Plain integers only, so any bit pattern in the
/// caller's buffer is a valid value.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct FrameMeta {
    next: u32,
    prev: u32,
    order: u8,
    state: u8,
    _reserved: u16,
}

impl FrameMeta {
    const TAIL: Self = Self {
        next: NIL,
        prev: NIL,
        order: 0,
        state: FrameState::Tail as u8,
        _reserved: 0,
    };
}

/// Bytes of metadata required to manage `frames` frames.
///
/// Includes slack for aligning the records inside a buffer of arbitrary
/// alignment.
pub const fn metadata_size(frames: usize) -> usize {
    frames
        .saturating_mul(size_of::<FrameMeta>())
        .saturating_add(align_of::<FrameMeta>() - 1)
}

/// Typed view over a caller supplied metadata buffer.
pub struct MetaArena<'a> {
    records: &'a mut [FrameMeta],
}

impl<'a> MetaArena<'a> {
    /// Carve `frames` records out of `buf` and reset them to [`FrameState::Tail`].
    ///
    /// Returns `None` if the buffer cannot hold that many aligned records.
    pub fn from_bytes(buf: &'a mut [u8], frames: usize) -> Option<Self> {
        if buf.len() < metadata_size(frames) {
            return None;
        }
        // SAFETY: `FrameMeta` is `repr(C)` and made only of integers, so every
        // bit pattern is a valid value and any aligned window of bytes can be
        // viewed as records.
        let (_, records, _) = unsafe { buf.align_to_mut::<FrameMeta>() };
        if records.len() < frames {
            return None;
        }
        let records = &mut records[..frames];
        records.fill(FrameMeta::TAIL);
        Some(Self { records })
    }

    /// Number of records in the arena
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn state(&self, idx: u32) -> FrameState {
        FrameState::from_raw(self.records[idx as usize].state)
    }

    pub fn order(&self, idx: u32) -> usize {
        self.records[idx as usize].order as usize
    }

    /// Whether `idx` is the head of a free block of exactly `order`.
    pub fn is_free_head(&self, idx: u32, order: usize) -> bool {
        self.state(idx) == FrameState::Free && self.order(idx) == order
    }

    pub fn set_head(&mut self, idx: u32, order: usize, state: FrameState) {
        let rec = &mut self.records[idx as usize];
        rec.order = order as u8;
        rec.state = state as u8;
    }

    /// Demote a former head to an interior frame of a merged block.
    pub fn set_tail(&mut self, idx: u32) {
        self.records[idx as usize] = FrameMeta::TAIL;
    }

    pub fn next(&self, idx: u32) -> u32 {
        self.records[idx as usize].next
    }

    pub fn prev(&self, idx: u32) -> u32 {
        self.records[idx as usize].prev
    }

    pub fn set_next(&mut self, idx: u32, next: u32) {
        self.records[idx as usize].next = next;
    }

    pub fn set_prev(&mut self, idx: u32, prev: u32) {
        self.records[idx as usize].prev = prev;
    }
}
