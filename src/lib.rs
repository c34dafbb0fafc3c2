//! Buddy frame allocator
//!
//! A physical page frame allocator built on binary buddy decomposition,
//! featuring:
//! - Self-hosted bookkeeping in caller supplied metadata buffers
//! - Plain and address-range constrained allocation
//! - Multi-region support with per-region address translation
//! - An optional spin-locked wrapper for shared use

#![no_std]

#[cfg(test)]
extern crate alloc;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Default page size for backward compatibility
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Malformed request that can never succeed (e.g. unaligned start,
    /// zero pages, a size larger than any registered region can produce).
    InvalidParam,
    /// Memory added by `add_memory` overlapped with existed memory.
    MemoryOverlap,
    /// No enough memory to allocate.
    NoMemory,
    /// Deallocate an unallocated memory region.
    NotAllocated,
}

impl AllocError {
    /// Whether the request was rejected regardless of the allocator state.
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::InvalidParam | Self::MemoryOverlap)
    }
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

bitflags::bitflags! {
    /// Flags accepted by the frame allocation operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AllocFlags: u32 {
        /// The returned block must be aligned to its own (power-of-two) size.
        ///
        /// Buddy blocks sit on frame numbers that are multiples of their
        /// size, so every block already satisfies this and the flag does not
        /// change the search. It is checked in debug builds and is the place
        /// to hang a different alignment policy.
        const ALIGNED = 1 << 0;
    }
}

/// Translates virtual addresses back to the physical addresses handed out
/// by the allocator.
pub trait AddrTranslator {
    fn virt_to_phys(&self, va: usize) -> Option<usize>;
}

/// Frame-granularity allocator operating on externally owned metadata.
pub trait FrameAllocator<'a> {
    /// The size of a memory frame.
    const PAGE_SIZE: usize;

    /// Bytes of metadata needed to manage `frames` frames.
    fn metadata_size(frames: usize) -> usize
    where
        Self: Sized;

    /// Reset the allocator to an empty state without any region.
    fn init(&mut self);

    /// Register `frames` frames starting at `paddr`, bookkept in `metadata`.
    ///
    /// `dm_off` maps the region into the virtual domain: `va = pa + dm_off`.
    fn add_memory(
        &mut self,
        metadata: &'a mut [u8],
        paddr: usize,
        frames: usize,
        dm_off: usize,
    ) -> AllocResult;

    /// Allocate contiguous frames, rounded up to a power of two.
    fn alloc_frames(&mut self, frames: usize, flags: AllocFlags) -> AllocResult<usize>;

    /// Allocate contiguous frames lying entirely inside `[min, max)`.
    fn alloc_frames_in_range(
        &mut self,
        frames: usize,
        flags: AllocFlags,
        min: usize,
        max: usize,
    ) -> AllocResult<usize>;

    /// Release frames previously returned by one of the allocation methods.
    fn free_frames(&mut self, paddr: usize, frames: usize) -> AllocResult;

    /// Returns available memory size in bytes.
    fn free_memory(&self) -> usize;

    /// Returns total registered memory size in bytes.
    fn total_memory(&self) -> usize;
}

#[inline]
const fn align_up(pos: usize, align: usize) -> Option<usize> {
    match pos.checked_add(align - 1) {
        Some(end) => Some(end & !(align - 1)),
        None => None,
    }
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

/// Order of the smallest block holding `frames` frames.
#[inline]
const fn order_of(frames: usize) -> Option<usize> {
    match frames.checked_next_power_of_two() {
        Some(pow) => Some(pow.trailing_zeros() as usize),
        None => None,
    }
}

pub mod buddy;
#[cfg(feature = "tracking")]
pub use buddy::BuddyStats;
pub use buddy::{
    metadata_size, BuddyBlock, BuddyFrameAllocator, RegionInfo, DEFAULT_MAX_ORDER, MAX_REGIONS,
};

pub mod locked;
pub use locked::LockedFrameAllocator;
