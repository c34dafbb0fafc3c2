//! Buddy frame allocator module
//!
//! This module provides a complete buddy system implementation with:
//! - Metadata arenas carved from caller supplied buffers
//! - Sorted free lists threaded through the arenas
//! - Multi-region support
//! - Detailed statistics and debugging

pub mod buddy_allocator;
pub mod buddy_block;
pub mod buddy_set;
pub mod frame_meta;
pub mod free_list;
pub mod stats;

pub use buddy_allocator::BuddyFrameAllocator;
pub use buddy_block::{BuddyBlock, RegionInfo, DEFAULT_MAX_ORDER, MAX_REGIONS};
pub use buddy_set::{BuddySet, FreeBlocks};
pub use frame_meta::metadata_size;
pub use free_list::FreeList;
#[cfg(feature = "tracking")]
pub use stats::{BuddyStats, FailureCause};
