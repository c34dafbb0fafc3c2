//! Buddy block metadata
//!
//! Represents a block of frames in the buddy system with order and address information.

use core::cmp::PartialOrd;

/// Maximum number of memory regions supported
pub const MAX_REGIONS: usize = 10;

/// Maximum order supported
pub const DEFAULT_MAX_ORDER: usize = 28; // Support up to 1TB blocks (2^28 * 4KB)

/// Buddy block metadata
#[derive(Debug, Clone, Copy)]
pub struct BuddyBlock {
    pub order: usize,
    pub addr: usize,
}

impl BuddyBlock {
    /// Create a new buddy block
    pub const fn new(order: usize, addr: usize) -> Self {
        Self { order, addr }
    }

    /// Size of the block in bytes
    pub const fn size<const PAGE_SIZE: usize>(&self) -> usize {
        PAGE_SIZE << self.order
    }

    /// Calculate the buddy address for this block
    /// The buddy is the other half of the parent block at the next higher order
    /// For a block at order k with address A, its buddy is at A ^ (2^k * PAGE_SIZE)
    pub const fn buddy_addr<const PAGE_SIZE: usize>(&self) -> usize {
        self.addr ^ (PAGE_SIZE << self.order)
    }
}

impl PartialOrd for BuddyBlock {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        self.addr.partial_cmp(&other.addr)
    }
}

impl PartialEq for BuddyBlock {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr && self.order == other.order
    }
}

impl Eq for BuddyBlock {}

/// A registered region descriptor
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    pub start_addr: usize,
    pub end_addr: usize,
    pub total_frames: usize,
    pub max_order: usize,
    pub dm_off: usize,
    pub region_id: usize,
}
