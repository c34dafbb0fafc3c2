//! Spin-locked frame allocator.
//!
//! The buddy core assumes a single mutator. This wrapper serializes every
//! operation behind an IRQ-safe spinlock so a kernel can share one allocator
//! as a `static`.

use crate::{AddrTranslator, AllocFlags, AllocResult, BuddyFrameAllocator, FrameAllocator};
use kspin::SpinNoIrq;

#[cfg(feature = "tracking")]
use crate::BuddyStats;

/// Frame allocator shareable between CPUs and interrupt handlers
pub struct LockedFrameAllocator<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    inner: SpinNoIrq<BuddyFrameAllocator<'static, PAGE_SIZE>>,
}

impl<const PAGE_SIZE: usize> LockedFrameAllocator<PAGE_SIZE> {
    pub const fn new() -> Self {
        Self {
            inner: SpinNoIrq::new(BuddyFrameAllocator::new()),
        }
    }

    /// Drop every region and reset the counters
    pub fn init(&self) {
        self.inner.lock().init();
    }

    /// Dynamically add a memory region to the allocator
    pub fn add_memory(
        &self,
        metadata: &'static mut [u8],
        paddr: usize,
        frames: usize,
        dm_off: usize,
    ) -> AllocResult {
        self.inner.lock().add_memory(metadata, paddr, frames, dm_off)
    }

    /// Allocate frames
    pub fn alloc_frames(&self, frames: usize, flags: AllocFlags) -> AllocResult<usize> {
        self.inner.lock().alloc_frames(frames, flags)
    }

    /// Allocate frames inside `[min, max)`
    pub fn alloc_frames_in_range(
        &self,
        frames: usize,
        flags: AllocFlags,
        min: usize,
        max: usize,
    ) -> AllocResult<usize> {
        self.inner
            .lock()
            .alloc_frames_in_range(frames, flags, min, max)
    }

    /// Deallocate frames
    pub fn free_frames(&self, paddr: usize, frames: usize) -> AllocResult {
        self.inner.lock().free_frames(paddr, frames)
    }

    pub fn free_memory(&self) -> usize {
        self.inner.lock().free_memory()
    }

    pub fn total_memory(&self) -> usize {
        self.inner.lock().total_memory()
    }

    pub fn phys_to_virt(&self, paddr: usize) -> Option<usize> {
        self.inner.lock().phys_to_virt(paddr)
    }

    #[cfg(feature = "tracking")]
    pub fn get_stats(&self) -> BuddyStats {
        self.inner.lock().get_stats()
    }
}

impl<const PAGE_SIZE: usize> Default for LockedFrameAllocator<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize> AddrTranslator for LockedFrameAllocator<PAGE_SIZE> {
    fn virt_to_phys(&self, va: usize) -> Option<usize> {
        self.inner.lock().virt_to_phys(va)
    }
}
