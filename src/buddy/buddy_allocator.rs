//! Multi-region buddy frame allocator
//!
//! The handle owning every registered region together with the free and
//! total capacity counters.

use crate::{AddrTranslator, AllocError, AllocFlags, AllocResult, FrameAllocator};

#[cfg(feature = "log")]
use log::{debug, info, trace, warn};

use super::{
    buddy_block::{RegionInfo, MAX_REGIONS},
    buddy_set::{BuddySet, FreeBlocks},
    frame_meta::{self, MetaArena, NIL},
};

#[cfg(feature = "tracking")]
use super::stats::{BuddyStats, MemoryStatsReporter};

/// Buddy frame allocator with multi-region support
///
/// Every region is bookkept in the metadata buffer handed over at
/// registration; the allocator itself never allocates. Capacity counters are
/// in bytes.
pub struct BuddyFrameAllocator<'a, const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    regions: [Option<BuddySet<'a, PAGE_SIZE>>; MAX_REGIONS],
    num_regions: usize,
    free_memory: usize,
    total_memory: usize,
}

impl<'a, const PAGE_SIZE: usize> BuddyFrameAllocator<'a, PAGE_SIZE> {
    const NO_REGION: Option<BuddySet<'a, PAGE_SIZE>> = None;

    pub const fn new() -> Self {
        Self {
            regions: [Self::NO_REGION; MAX_REGIONS],
            num_regions: 0,
            free_memory: 0,
            total_memory: 0,
        }
    }

    /// Byte size of the handle, for callers providing its storage
    pub const fn handle_size() -> usize {
        core::mem::size_of::<Self>()
    }

    /// Get number of regions in the allocator
    pub fn region_count(&self) -> usize {
        self.num_regions
    }

    /// Get the descriptor of a registered region
    pub fn region_info(&self, region_id: usize) -> Option<RegionInfo> {
        self.region(region_id).map(BuddySet::region_info)
    }

    fn region(&self, region_id: usize) -> Option<&BuddySet<'a, PAGE_SIZE>> {
        self.regions.get(region_id)?.as_ref()
    }

    fn iter_regions(&self) -> impl Iterator<Item = &BuddySet<'a, PAGE_SIZE>> {
        self.regions[..self.num_regions].iter().flatten()
    }

    fn iter_regions_mut(&mut self) -> impl Iterator<Item = &mut BuddySet<'a, PAGE_SIZE>> {
        self.regions[..self.num_regions].iter_mut().flatten()
    }

    /// Find the region that contains the given address
    pub fn find_region_for_addr(&self, addr: usize) -> Option<usize> {
        self.iter_regions()
            .position(|region| region.addr_in_region(addr))
    }

    /// Largest order any registered region can ever produce
    fn max_order(&self) -> Option<usize> {
        self.iter_regions().map(BuddySet::max_order).max()
    }

    /// Resolve the block order for a request, rejecting requests that no
    /// registered region could ever satisfy.
    fn request_order(&self, frames: usize) -> AllocResult<usize> {
        if frames == 0 {
            return Err(AllocError::InvalidParam);
        }
        let order = crate::order_of(frames).ok_or(AllocError::InvalidParam)?;
        let max_order = self.max_order().ok_or(AllocError::NoMemory)?;
        if order > max_order {
            debug!(
                "buddy allocator: {} frames (order {}) exceed max order {}",
                frames, order, max_order
            );
            return Err(AllocError::InvalidParam);
        }
        Ok(order)
    }

    /// Translate a physical address into the virtual domain of its region
    pub fn phys_to_virt(&self, paddr: usize) -> Option<usize> {
        self.iter_regions()
            .find_map(|region| region.phys_to_virt(paddr))
    }

    /// Get free blocks of a specific order from a region
    /// Returns None if region doesn't exist
    pub fn get_free_blocks_by_order(
        &self,
        region_id: usize,
        order: usize,
    ) -> Option<FreeBlocks<'_, PAGE_SIZE>> {
        self.region(region_id)
            .map(|region| region.get_free_blocks_by_order(order))
    }

    /// Check the free list invariants of every region and that the free
    /// counter matches the free lists.
    pub fn verify(&self) -> bool {
        let listed: usize = self.iter_regions().map(BuddySet::free_frames).sum();
        self.iter_regions().all(BuddySet::verify) && listed * PAGE_SIZE == self.free_memory
    }

    #[cfg(feature = "tracking")]
    pub fn get_stats(&self) -> BuddyStats {
        let mut total_stats = BuddyStats::new();
        for region in self.iter_regions() {
            total_stats.add(&region.get_stats());
        }
        total_stats
    }

    #[cfg(feature = "tracking")]
    fn print_alloc_failure_stats(&self, frames: usize, window: Option<(usize, usize)>) {
        let mut infos = [RegionInfo::default(); MAX_REGIONS];
        let mut stats = [BuddyStats::new(); MAX_REGIONS];
        for (i, region) in self.iter_regions().enumerate() {
            infos[i] = region.region_info();
            stats[i] = region.get_stats();
        }

        MemoryStatsReporter::print_alloc_failure_stats(
            PAGE_SIZE,
            &self.get_stats(),
            &infos[..self.num_regions],
            &stats[..self.num_regions],
            frames,
            window,
        );
    }

    #[cfg(not(feature = "tracking"))]
    fn print_alloc_failure_stats(&self, _frames: usize, _window: Option<(usize, usize)>) {
        // No-op when tracking is disabled
    }

    /// Print all region information and block distribution
    pub fn print_region_info(&self) {
        info!("========== Buddy Frame Allocator Regions ==========");
        info!("Total regions: {}", self.num_regions);
        info!("Page size: {:#x}", PAGE_SIZE);
        info!(
            "Free / total: {:#x} / {:#x} bytes",
            self.free_memory, self.total_memory
        );

        for region in self.iter_regions() {
            let _info = region.region_info();
            info!("Region {}:", _info.region_id);
            info!(
                "  Address range: [{:#x}, {:#x}), dm_off {:#x}",
                _info.start_addr, _info.end_addr, _info.dm_off
            );
            info!("  Total frames: {}", _info.total_frames);
            info!("  Free blocks distribution:");

            for order in 0..=region.max_order() {
                let block_count = region.get_order_block_count(order);
                if block_count > 0 {
                    info!(
                        "    Order {}: {} blocks (size {:#x} bytes each)",
                        order,
                        block_count,
                        PAGE_SIZE << order
                    );
                }
            }
        }
        info!("===================================================");
    }
}

impl<const PAGE_SIZE: usize> Default for BuddyFrameAllocator<'_, PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const PAGE_SIZE: usize> FrameAllocator<'a> for BuddyFrameAllocator<'a, PAGE_SIZE> {
    const PAGE_SIZE: usize = PAGE_SIZE;

    fn metadata_size(frames: usize) -> usize {
        frame_meta::metadata_size(frames)
    }

    fn init(&mut self) {
        for region in &mut self.regions {
            *region = None;
        }
        self.num_regions = 0;
        self.free_memory = 0;
        self.total_memory = 0;
    }

    fn add_memory(
        &mut self,
        metadata: &'a mut [u8],
        paddr: usize,
        frames: usize,
        dm_off: usize,
    ) -> AllocResult {
        if metadata.is_empty() || frames == 0 {
            warn!("buddy allocator: empty metadata buffer or zero frames");
            return Err(AllocError::InvalidParam);
        }
        if !crate::is_aligned(paddr, PAGE_SIZE) {
            warn!(
                "buddy allocator: region start {:#x} is not page aligned",
                paddr
            );
            return Err(AllocError::InvalidParam);
        }
        // Frame indices must stay below the list terminator
        if frames >= NIL as usize {
            return Err(AllocError::InvalidParam);
        }
        let end = frames
            .checked_mul(PAGE_SIZE)
            .and_then(|size| paddr.checked_add(size))
            .ok_or(AllocError::InvalidParam)?;
        if metadata.len() < frame_meta::metadata_size(frames) {
            warn!(
                "buddy allocator: metadata buffer of {} bytes cannot track {} frames",
                metadata.len(),
                frames
            );
            return Err(AllocError::InvalidParam);
        }

        if let Some(_region) = self
            .iter_regions()
            .find(|region| region.overlaps(paddr, end))
        {
            warn!(
                "buddy allocator: Region [{:#x}, {:#x}) overlaps with region {} [{:#x}, {:#x})",
                paddr,
                end,
                _region.region_info().region_id,
                _region.base_addr,
                _region.end_addr
            );
            return Err(AllocError::MemoryOverlap);
        }
        if self.num_regions >= MAX_REGIONS {
            warn!(
                "buddy allocator: Cannot add region: maximum regions ({}) reached",
                MAX_REGIONS
            );
            return Err(AllocError::NoMemory);
        }

        let meta = MetaArena::from_bytes(metadata, frames).ok_or(AllocError::InvalidParam)?;
        let region_id = self.num_regions;
        self.regions[region_id] = Some(BuddySet::new(meta, paddr, frames, dm_off, region_id));
        self.num_regions += 1;

        let size = frames * PAGE_SIZE;
        self.total_memory += size;
        self.free_memory += size;

        info!(
            "buddy allocator: added region {} [{:#x}, {:#x}) with {} frames",
            region_id, paddr, end, frames
        );
        Ok(())
    }

    fn alloc_frames(&mut self, frames: usize, flags: AllocFlags) -> AllocResult<usize> {
        let order = self.request_order(frames)?;

        let found = self
            .iter_regions_mut()
            .find_map(|region| region.alloc_block(order).ok());

        match found {
            Some(addr) => {
                let size = PAGE_SIZE << order;
                debug_assert!(
                    !flags.contains(AllocFlags::ALIGNED) || crate::is_aligned(addr, size)
                );
                self.free_memory -= size;
                trace!(
                    "buddy allocator: allocated {} frames at {:#x} (order {}, flags {:?})",
                    frames,
                    addr,
                    order,
                    flags
                );
                Ok(addr)
            }
            None => {
                debug!(
                    "buddy allocator: Allocation failure: {} frames, free {:#x} bytes",
                    frames, self.free_memory
                );
                self.print_alloc_failure_stats(frames, None);
                Err(AllocError::NoMemory)
            }
        }
    }

    fn alloc_frames_in_range(
        &mut self,
        frames: usize,
        flags: AllocFlags,
        min: usize,
        max: usize,
    ) -> AllocResult<usize> {
        if min >= max {
            return Err(AllocError::InvalidParam);
        }
        let order = self.request_order(frames)?;

        let found = self
            .iter_regions_mut()
            .find_map(|region| region.alloc_block_in_range(order, min, max).ok());

        match found {
            Some(addr) => {
                let size = PAGE_SIZE << order;
                debug_assert!(
                    !flags.contains(AllocFlags::ALIGNED) || crate::is_aligned(addr, size)
                );
                self.free_memory -= size;
                trace!(
                    "buddy allocator: allocated {} frames at {:#x} in [{:#x}, {:#x})",
                    frames,
                    addr,
                    min,
                    max
                );
                Ok(addr)
            }
            None => {
                debug!(
                    "buddy allocator: No {} frames available in [{:#x}, {:#x})",
                    frames, min, max
                );
                self.print_alloc_failure_stats(frames, Some((min, max)));
                Err(AllocError::NoMemory)
            }
        }
    }

    fn free_frames(&mut self, paddr: usize, frames: usize) -> AllocResult {
        if frames == 0 || !crate::is_aligned(paddr, PAGE_SIZE) {
            return Err(AllocError::InvalidParam);
        }
        let order = crate::order_of(frames).ok_or(AllocError::InvalidParam)?;

        let Some(region_id) = self.find_region_for_addr(paddr) else {
            warn!(
                "buddy allocator: Free frames at {:#x}: address not in any region",
                paddr
            );
            return Err(AllocError::NotAllocated);
        };

        let region = self.regions[region_id]
            .as_mut()
            .ok_or(AllocError::NotAllocated)?;
        let _merged = region.free_block(paddr, order)?;
        self.free_memory += PAGE_SIZE << order;

        trace!(
            "buddy allocator: freed {} frames at {:#x}, merged into order {} at {:#x}",
            frames,
            paddr,
            _merged.order,
            _merged.addr
        );
        Ok(())
    }

    fn free_memory(&self) -> usize {
        self.free_memory
    }

    fn total_memory(&self) -> usize {
        self.total_memory
    }
}

impl<const PAGE_SIZE: usize> AddrTranslator for BuddyFrameAllocator<'_, PAGE_SIZE> {
    fn virt_to_phys(&self, va: usize) -> Option<usize> {
        self.iter_regions()
            .find_map(|region| region.virt_to_phys(va))
    }
}
