//! Statistics and debugging for buddy allocator
//!
//! Provides per-order free block statistics and failure reporting.

#[cfg(feature = "log")]
use log::error;

use super::buddy_block::{RegionInfo, DEFAULT_MAX_ORDER};

/// Buddy system statistics, counted in frames
#[derive(Debug, Clone, Copy)]
pub struct BuddyStats {
    pub total_pages: usize,
    pub free_pages: usize,
    pub used_pages: usize,
    pub free_blocks_by_order: [usize; DEFAULT_MAX_ORDER + 1],
}

impl Default for BuddyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BuddyStats {
    pub const fn new() -> Self {
        Self {
            total_pages: 0,
            free_pages: 0,
            used_pages: 0,
            free_blocks_by_order: [0; DEFAULT_MAX_ORDER + 1],
        }
    }

    /// Add statistics from another BuddyStats
    pub fn add(&mut self, other: &BuddyStats) {
        self.total_pages += other.total_pages;
        self.free_pages += other.free_pages;
        self.used_pages += other.used_pages;
        for (i, &count) in other.free_blocks_by_order.iter().enumerate() {
            self.free_blocks_by_order[i] += count;
        }
    }
}

/// Why an allocation request could not be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// The address window does not intersect any region.
    OutsideRegions,
    /// No aligned block of the requested size fits in the part of the
    /// window covered by a region.
    WindowTooSmall,
    /// Fewer free frames than the rounded-up request.
    Exhausted,
    /// Enough free frames, but none of the free blocks can hold the request.
    Fragmented,
}

/// Classify an allocation failure from the region layout and counters
pub fn diagnose(
    page_size: usize,
    total_stats: &BuddyStats,
    region_infos: &[RegionInfo],
    request_pages: usize,
    window: Option<(usize, usize)>,
) -> FailureCause {
    let Some(order) = crate::order_of(request_pages) else {
        return FailureCause::Exhausted;
    };
    let Some((pages, size)) = 1usize
        .checked_shl(order as u32)
        .and_then(|pages| Some((pages, page_size.checked_mul(pages)?)))
    else {
        return FailureCause::Exhausted;
    };

    if let Some((min, max)) = window {
        let mut overlapped = false;
        let mut fits = false;
        for info in region_infos {
            let lo = info.start_addr.max(min);
            let hi = info.end_addr.min(max);
            if lo >= hi {
                continue;
            }
            overlapped = true;
            fits |= crate::align_up(lo, size)
                .and_then(|start| start.checked_add(size))
                .is_some_and(|end| end <= hi);
        }
        if !overlapped {
            return FailureCause::OutsideRegions;
        }
        if !fits {
            return FailureCause::WindowTooSmall;
        }
    }

    if total_stats.free_pages < pages {
        FailureCause::Exhausted
    } else {
        FailureCause::Fragmented
    }
}

/// Detailed memory statistics reporter
pub struct MemoryStatsReporter;

impl MemoryStatsReporter {
    /// Print detailed allocation failure statistics
    #[allow(unused_variables)]
    pub fn print_alloc_failure_stats(
        page_size: usize,
        total_stats: &BuddyStats,
        region_infos: &[RegionInfo],
        region_stats: &[BuddyStats],
        request_pages: usize,
        window: Option<(usize, usize)>,
    ) {
        error!("========================================");
        match window {
            Some((min, max)) => {
                error!(
                    "Request: {} pages ({} KB) in [{:#x}, {:#x})",
                    request_pages,
                    (request_pages * page_size) / 1024,
                    min,
                    max
                );
            }
            None => {
                error!(
                    "Request: {} pages ({} KB)",
                    request_pages,
                    (request_pages * page_size) / 1024
                );
            }
        }

        let _cause = diagnose(page_size, total_stats, region_infos, request_pages, window);
        error!("Cause: {:?}", _cause);

        error!("Overall Memory State:");
        error!("  Total regions: {}", region_infos.len());
        error!(
            "  Total pages: {} ({} KB)",
            total_stats.total_pages,
            (total_stats.total_pages * page_size) / 1024
        );
        error!(
            "  Free pages: {} ({} KB)",
            total_stats.free_pages,
            (total_stats.free_pages * page_size) / 1024
        );
        error!(
            "  Used pages: {} ({} KB)",
            total_stats.used_pages,
            (total_stats.used_pages * page_size) / 1024
        );
        error!("========================================");

        for (info, stats) in region_infos.iter().zip(region_stats) {
            error!("Region {}:", info.region_id);
            error!("  Range: [{:#x}, {:#x})", info.start_addr, info.end_addr);
            error!("  Free pages: {} / {}", stats.free_pages, info.total_frames);
            error!("  Free blocks by order:");

            for order in (0..=info.max_order).rev() {
                let count = stats.free_blocks_by_order[order];
                if count > 0 {
                    let block_size = (1 << order) * page_size;
                    error!(
                        "    Order {}: {} blocks ({} KB each, {} KB total)",
                        order,
                        count,
                        block_size / 1024,
                        (count * block_size) / 1024
                    );
                }
            }
            error!("----------------------------------------");
        }

        error!("========================================");
    }
}
