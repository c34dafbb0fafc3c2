//! Single-region buddy system
//!
//! Implements the core buddy algorithm for one registered region. Free lists
//! and per-block state are threaded through the region's own metadata arena.

#[cfg(feature = "log")]
use log::{error, warn};

use crate::{AllocError, AllocResult};

use super::{
    buddy_block::{BuddyBlock, RegionInfo, DEFAULT_MAX_ORDER},
    frame_meta::{FrameState, MetaArena},
    free_list::{FreeList, FreeListIter},
};

/// A buddy set implementation - represents a single region
///
/// Block alignment is absolute: a block of order k always starts at a frame
/// number that is a multiple of 2^k, so buddies are found by flipping a bit
/// of the frame number.
pub struct BuddySet<'a, const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    pub(crate) base_addr: usize,
    pub(crate) end_addr: usize,
    base_pfn: usize,
    total_frames: usize,
    /// Largest order produced by the initial tiling; no merge can exceed it
    max_order: usize,
    /// Offset from the physical to the virtual domain (`va = pa + dm_off`)
    dm_off: usize,
    region_id: usize,
    meta: MetaArena<'a>,
    /// Free lists for each order
    free_lists: [FreeList; DEFAULT_MAX_ORDER + 1],
}

impl<'a, const PAGE_SIZE: usize> BuddySet<'a, PAGE_SIZE> {
    /// Build a region over `frames` frames at `base_addr` and tile it into
    /// maximal aligned blocks.
    ///
    /// The caller has validated alignment and bounds.
    pub fn new(
        meta: MetaArena<'a>,
        base_addr: usize,
        frames: usize,
        dm_off: usize,
        region_id: usize,
    ) -> Self {
        let mut set = Self {
            base_addr,
            end_addr: base_addr + frames * PAGE_SIZE,
            base_pfn: base_addr / PAGE_SIZE,
            total_frames: frames,
            max_order: 0,
            dm_off,
            region_id,
            meta,
            free_lists: [const { FreeList::new() }; DEFAULT_MAX_ORDER + 1],
        };
        set.tile();
        set
    }

    /// Decompose the region into the largest aligned power-of-two blocks,
    /// greedily from the lowest address.
    fn tile(&mut self) {
        let end_pfn = self.base_pfn + self.total_frames;
        let mut pfn = self.base_pfn;

        while pfn < end_pfn {
            let align_order = if pfn == 0 {
                DEFAULT_MAX_ORDER
            } else {
                pfn.trailing_zeros() as usize
            };
            let fit_order = (end_pfn - pfn).ilog2() as usize;
            let order = align_order.min(fit_order).min(DEFAULT_MAX_ORDER);

            self.push_free((pfn - self.base_pfn) as u32, order);
            self.max_order = self.max_order.max(order);
            pfn += 1 << order;
        }
    }

    pub const fn max_order(&self) -> usize {
        self.max_order
    }

    pub const fn total_frames(&self) -> usize {
        self.total_frames
    }

    #[inline]
    fn addr_of(&self, idx: u32) -> usize {
        self.base_addr + idx as usize * PAGE_SIZE
    }

    #[inline]
    fn idx_of(&self, addr: usize) -> u32 {
        ((addr - self.base_addr) / PAGE_SIZE) as u32
    }

    /// Mark `idx` as a free head of `order` and add it to the free list
    fn push_free(&mut self, idx: u32, order: usize) {
        self.meta.set_head(idx, order, FrameState::Free);
        self.free_lists[order].insert_sorted(&mut self.meta, idx);
    }

    /// Check if an address belongs to this region
    pub fn addr_in_region(&self, addr: usize) -> bool {
        addr >= self.base_addr && addr < self.end_addr
    }

    /// Check if `[start, end)` intersects this region
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.end_addr && self.base_addr < end
    }

    /// Translate a physical address of this region into the virtual domain
    pub fn phys_to_virt(&self, paddr: usize) -> Option<usize> {
        self.addr_in_region(paddr)
            .then(|| paddr.wrapping_add(self.dm_off))
    }

    /// Translate a virtual address back into this region's physical range
    pub fn virt_to_phys(&self, vaddr: usize) -> Option<usize> {
        let paddr = vaddr.wrapping_sub(self.dm_off);
        self.addr_in_region(paddr).then_some(paddr)
    }

    /// Get region information
    pub fn region_info(&self) -> RegionInfo {
        RegionInfo {
            start_addr: self.base_addr,
            end_addr: self.end_addr,
            total_frames: self.total_frames,
            max_order: self.max_order,
            dm_off: self.dm_off,
            region_id: self.region_id,
        }
    }

    /// Allocate a block of `order` from the lowest-address free block that
    /// is large enough, splitting it down as needed.
    pub fn alloc_block(&mut self, order: usize) -> AllocResult<usize> {
        if order > self.max_order {
            return Err(AllocError::NoMemory);
        }

        for current in order..=self.max_order {
            if let Some(idx) = self.free_lists[current].pop_front(&mut self.meta) {
                // Split down to required order, keeping the lower half
                let mut block_order = current;
                while block_order > order {
                    block_order -= 1;
                    self.push_free(idx + (1 << block_order), block_order);
                }
                self.meta.set_head(idx, order, FrameState::Allocated);
                return Ok(self.addr_of(idx));
            }
        }

        Err(AllocError::NoMemory)
    }

    /// Allocate a block of `order` lying entirely inside `[min, max)`.
    ///
    /// A larger free block qualifies when one of its aligned order-sized
    /// sub-blocks fits the window; it is split toward that sub-block.
    pub fn alloc_block_in_range(
        &mut self,
        order: usize,
        min: usize,
        max: usize,
    ) -> AllocResult<usize> {
        if order > self.max_order || !self.overlaps(min, max) {
            return Err(AllocError::NoMemory);
        }

        let size = PAGE_SIZE << order;
        for current in order..=self.max_order {
            let block_size = PAGE_SIZE << current;
            let candidate = self.free_lists[current]
                .iter(&self.meta)
                .map(|idx| (idx, self.addr_of(idx)))
                .take_while(|&(_, start)| start < max)
                .find_map(|(idx, start)| {
                    let lo = crate::align_up(start.max(min), size)?;
                    let hi = (start + block_size).min(max);
                    (lo.checked_add(size)? <= hi).then_some((idx, lo))
                });

            if let Some((idx, target_addr)) = candidate {
                self.free_lists[current].remove(&mut self.meta, idx);
                let target = self.idx_of(target_addr);

                // Split down, keeping the half that holds the target
                let mut block = idx;
                let mut block_order = current;
                while block_order > order {
                    block_order -= 1;
                    let half = 1 << block_order;
                    if target >= block + half {
                        self.push_free(block, block_order);
                        block += half;
                    } else {
                        self.push_free(block + half, block_order);
                    }
                }

                debug_assert_eq!(block, target);
                self.meta.set_head(block, order, FrameState::Allocated);
                return Ok(target_addr);
            }
        }

        Err(AllocError::NoMemory)
    }

    /// Release the block at `addr` allocated with `order`, merging it with
    /// free buddies as far as possible. Returns the merged block.
    pub fn free_block(&mut self, addr: usize, order: usize) -> AllocResult<BuddyBlock> {
        if !self.addr_in_region(addr) || !crate::is_aligned(addr, PAGE_SIZE) {
            return Err(AllocError::NotAllocated);
        }

        let idx = self.idx_of(addr);
        match self.meta.state(idx) {
            FrameState::Allocated if self.meta.order(idx) == order => {}
            FrameState::Allocated => {
                warn!(
                    "region {}: Block {:#x} was allocated with order {}, freed with order {}",
                    self.region_id,
                    addr,
                    self.meta.order(idx),
                    order
                );
                return Err(AllocError::NotAllocated);
            }
            FrameState::Free => {
                warn!(
                    "region {}: Double free detected at addr {:#x}",
                    self.region_id, addr
                );
                return Err(AllocError::NotAllocated);
            }
            FrameState::Tail => {
                warn!(
                    "region {}: Address {:#x} is not the head of an allocated block",
                    self.region_id, addr
                );
                return Err(AllocError::NotAllocated);
            }
        }

        let end_pfn = self.base_pfn + self.total_frames;
        let mut block = idx;
        let mut block_order = order;

        while block_order < self.max_order {
            let pfn = self.base_pfn + block as usize;
            let buddy_pfn = pfn ^ (1 << block_order);
            if buddy_pfn < self.base_pfn || buddy_pfn + (1 << block_order) > end_pfn {
                break;
            }

            let buddy = (buddy_pfn - self.base_pfn) as u32;
            if !self.meta.is_free_head(buddy, block_order) {
                break;
            }

            // Buddy found, remove it and continue merging at next order
            self.free_lists[block_order].remove(&mut self.meta, buddy);
            let (low, high) = if buddy < block {
                (buddy, block)
            } else {
                (block, buddy)
            };
            self.meta.set_tail(high);
            block = low;
            block_order += 1;
        }

        self.push_free(block, block_order);
        Ok(BuddyBlock::new(block_order, self.addr_of(block)))
    }

    /// Get free blocks of a specific order as an iterator
    pub fn get_free_blocks_by_order(&self, order: usize) -> FreeBlocks<'_, PAGE_SIZE> {
        FreeBlocks {
            inner: self.free_lists.get(order).map(|list| list.iter(&self.meta)),
            base_addr: self.base_addr,
            order,
        }
    }

    /// Get the number of blocks in a specific order
    pub fn get_order_block_count(&self, order: usize) -> usize {
        if order <= DEFAULT_MAX_ORDER {
            self.free_lists[order].len()
        } else {
            0
        }
    }

    /// Total free frames currently in the free lists
    pub fn free_frames(&self) -> usize {
        (0..=self.max_order)
            .map(|order| self.free_lists[order].len() << order)
            .sum()
    }

    /// Get statistics for this region
    #[cfg(feature = "tracking")]
    pub fn get_stats(&self) -> super::stats::BuddyStats {
        let mut stats = super::stats::BuddyStats::new();
        stats.total_pages = self.total_frames;

        for order in 0..=DEFAULT_MAX_ORDER {
            let block_count = self.free_lists[order].len();
            stats.free_blocks_by_order[order] = block_count;
            stats.free_pages += block_count << order;
        }

        stats.used_pages = stats.total_pages.saturating_sub(stats.free_pages);
        stats
    }

    /// Check the structural invariants of the free lists against the
    /// metadata arena.
    pub fn verify(&self) -> bool {
        for order in 0..=DEFAULT_MAX_ORDER {
            let mut last = None;
            for idx in self.free_lists[order].iter(&self.meta) {
                let pfn = self.base_pfn + idx as usize;
                if !self.meta.is_free_head(idx, order)
                    || pfn & ((1 << order) - 1) != 0
                    || idx as usize + (1 << order) > self.total_frames
                    || last.is_some_and(|prev| prev >= idx)
                {
                    error!(
                        "region {}: Corrupted free list at order {}, frame {}",
                        self.region_id, order, idx
                    );
                    return false;
                }
                last = Some(idx);
            }
        }
        true
    }
}

/// Iterator over the free blocks of one order, lowest address first
pub struct FreeBlocks<'s, const PAGE_SIZE: usize> {
    inner: Option<FreeListIter<'s>>,
    base_addr: usize,
    order: usize,
}

impl<const PAGE_SIZE: usize> Iterator for FreeBlocks<'_, PAGE_SIZE> {
    type Item = BuddyBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.inner.as_mut()?.next()?;
        Some(BuddyBlock::new(
            self.order,
            self.base_addr + idx as usize * PAGE_SIZE,
        ))
    }
}
