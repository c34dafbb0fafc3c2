//! Integration tests for the frame allocator crate
//!
//! Regions are synthetic physical ranges: the allocator never touches frame
//! memory, only the metadata buffers, which are real allocations.

#![no_std]

extern crate alloc;
extern crate buddy_frame_allocator;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use buddy_frame_allocator::{
    AddrTranslator, AllocError, AllocFlags, BuddyFrameAllocator, FrameAllocator,
};

const PAGE_SIZE: usize = 0x1000;
const PAGE_SHIFT: usize = 12;

/// Zone placed so that the usable span starts four frames past an eight
/// frame boundary once the metadata has been carved from its head. A twelve
/// frame span then tiles into an order-2 block followed by an order-3 block.
const ZONE_START: usize = 0x20_3000;

type Allocator = BuddyFrameAllocator<'static, PAGE_SIZE>;

fn leak_metadata(size: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; size].into_boxed_slice())
}

/// Carve the metadata from the head of a `len` byte zone and register the
/// rest. Returns the allocator, the usable start and the frame count.
fn generate(len: usize) -> (Allocator, usize, usize) {
    let meta_size = Allocator::metadata_size(len >> PAGE_SHIFT);
    let metadata = leak_metadata(meta_size);

    let mut allocator = Allocator::new();
    allocator.init();

    let start = (ZONE_START + meta_size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    let frames = (len - meta_size) >> PAGE_SHIFT;
    allocator
        .add_memory(metadata, start, frames, start)
        .unwrap();
    (allocator, start, frames)
}

#[test]
fn test_init() {
    let mut allocator = Allocator::new();
    allocator.init();
    assert_eq!(allocator.free_memory(), 0);
    assert_eq!(allocator.total_memory(), 0);
    assert!(Allocator::handle_size() > 0);
}

#[test]
fn test_add_memory() {
    let len = 10000;
    let meta_size = Allocator::metadata_size(len >> PAGE_SHIFT);
    let metadata = leak_metadata(meta_size);

    let mut allocator = Allocator::new();
    allocator.init();
    let start = (ZONE_START + meta_size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    let frames = (len - meta_size) >> PAGE_SHIFT;

    assert_eq!(allocator.add_memory(metadata, start, frames, start), Ok(()));
}

#[test]
fn test_check_variables() {
    let (allocator, _, _) = generate(10000);
    assert_eq!(allocator.free_memory(), 8192);
    assert_eq!(allocator.total_memory(), 8192);
}

#[test]
fn test_simple_alloc() {
    let (mut allocator, start, frames) = generate(10000);
    let addr = allocator.alloc_frames(1, AllocFlags::empty()).unwrap();
    assert!(addr >= start && addr < start + frames * PAGE_SIZE);
    assert_eq!(allocator.free_memory(), 4096);
}

#[test]
fn test_alloc_from_range() {
    let (mut allocator, start, _) = generate(50000);

    let first = allocator.alloc_frames(1, AllocFlags::ALIGNED).unwrap();
    assert_eq!(first, start);

    let min = start + 4096;
    let max = start + 20000;
    let addr = allocator
        .alloc_frames_in_range(2, AllocFlags::empty(), min, max)
        .unwrap();
    assert!(addr >= min && addr + 2 * PAGE_SIZE <= max);
    assert_eq!(addr, start + 8192);
}

#[test]
fn test_alloc_large() {
    let (mut allocator, _, _) = generate(50000);
    let free = allocator.free_memory();

    let result = allocator.alloc_frames(600, AllocFlags::empty());
    assert_eq!(result, Err(AllocError::InvalidParam));
    assert!(result.unwrap_err().is_structural());
    assert_eq!(allocator.free_memory(), free);
}

#[test]
fn test_alloc_over() {
    let (mut allocator, start, _) = generate(50000);

    let taken = allocator.alloc_frames(2, AllocFlags::empty()).unwrap();
    assert_eq!(taken, start);
    let free = allocator.free_memory();

    let result = allocator.alloc_frames_in_range(2, AllocFlags::empty(), start, start + 8192);
    assert_eq!(result, Err(AllocError::NoMemory));
    assert!(!result.unwrap_err().is_structural());
    assert_eq!(allocator.free_memory(), free);
}

#[test]
fn test_alloc_over_2() {
    let (mut allocator, start, _) = generate(50000);
    let free = allocator.free_memory();

    // No whole page fits between start + 4097 and start + 8192
    let result =
        allocator.alloc_frames_in_range(1, AllocFlags::empty(), start + 4097, start + 8192);
    assert_eq!(result, Err(AllocError::NoMemory));
    assert_eq!(allocator.free_memory(), free);
    assert!(allocator.verify());

    let addr = allocator
        .alloc_frames_in_range(2, AllocFlags::empty(), start, start + 12288)
        .unwrap();
    assert_eq!(addr, start);
}

#[test]
fn test_round_trip() {
    let (mut allocator, _, _) = generate(50000);
    let before = allocator.free_memory();

    let addr = allocator.alloc_frames(4, AllocFlags::empty()).unwrap();
    assert_eq!(allocator.free_memory(), before - 4 * PAGE_SIZE);
    allocator.free_frames(addr, 4).unwrap();
    assert_eq!(allocator.free_memory(), before);

    let again = allocator.alloc_frames(4, AllocFlags::empty()).unwrap();
    assert_eq!(again, addr);
    assert!(allocator.verify());
}

#[test]
fn test_release_faults() {
    let (mut allocator, start, _) = generate(50000);

    let addr = allocator.alloc_frames(2, AllocFlags::empty()).unwrap();
    assert_eq!(allocator.free_frames(addr + PAGE_SIZE, 1), Err(AllocError::NotAllocated));
    assert_eq!(allocator.free_frames(addr, 4), Err(AllocError::NotAllocated));
    assert_eq!(allocator.free_frames(start - PAGE_SIZE, 1), Err(AllocError::NotAllocated));

    allocator.free_frames(addr, 2).unwrap();
    assert_eq!(allocator.free_frames(addr, 2), Err(AllocError::NotAllocated));
    assert_eq!(allocator.free_memory(), allocator.total_memory());
}

#[test]
fn test_exhaustion_and_recovery() {
    let (mut allocator, _, frames) = generate(50000);

    let mut addrs = Vec::new();
    while let Ok(addr) = allocator.alloc_frames(1, AllocFlags::empty()) {
        addrs.push(addr);
    }
    assert_eq!(addrs.len(), frames);
    assert_eq!(allocator.free_memory(), 0);
    assert_eq!(
        allocator.alloc_frames(1, AllocFlags::empty()),
        Err(AllocError::NoMemory)
    );

    // Handed out lowest address first
    assert!(addrs.windows(2).all(|w| w[0] < w[1]));

    // Free every other frame, then the rest: everything must coalesce again
    for addr in addrs.iter().step_by(2) {
        allocator.free_frames(*addr, 1).unwrap();
    }
    assert_eq!(
        allocator.alloc_frames(2, AllocFlags::empty()),
        Err(AllocError::NoMemory)
    );
    for addr in addrs.iter().skip(1).step_by(2) {
        allocator.free_frames(*addr, 1).unwrap();
    }
    assert_eq!(allocator.free_memory(), allocator.total_memory());
    assert!(allocator.alloc_frames(8, AllocFlags::ALIGNED).is_ok());
    assert!(allocator.verify());
}

/// Deterministic pseudo random sequence
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as usize
    }
}

#[test]
fn test_accounting_invariant() {
    let frames = 300;
    let base = 0x4000_0000 + 3 * PAGE_SIZE;
    let mut allocator = Allocator::new();
    allocator
        .add_memory(leak_metadata(Allocator::metadata_size(frames)), base, frames, 0)
        .unwrap();

    let mut rng = Lcg(7);
    let mut live: Vec<(usize, usize)> = Vec::new();

    for _ in 0..2000 {
        if live.is_empty() || rng.next() % 3 != 0 {
            let pages = rng.next() % 9 + 1;
            let result = if rng.next() % 2 == 0 {
                allocator.alloc_frames(pages, AllocFlags::empty())
            } else {
                let min = base + (rng.next() % frames) * PAGE_SIZE;
                let max = min + (rng.next() % 64 + 1) * PAGE_SIZE;
                allocator
                    .alloc_frames_in_range(pages, AllocFlags::empty(), min, max)
                    .inspect(|&addr| {
                        let size = pages.next_power_of_two() * PAGE_SIZE;
                        assert!(addr >= min && addr + size <= max);
                    })
            };

            match result {
                Ok(addr) => {
                    let size = pages.next_power_of_two() * PAGE_SIZE;
                    assert_eq!(addr % size, 0);
                    assert!(addr >= base && addr + size <= base + frames * PAGE_SIZE);
                    let overlaps = |&(a, p): &(usize, usize)| {
                        addr < a + p.next_power_of_two() * PAGE_SIZE && a < addr + size
                    };
                    assert!(!live.iter().any(overlaps));
                    live.push((addr, pages));
                }
                Err(e) => assert!(matches!(e, AllocError::NoMemory | AllocError::InvalidParam)),
            }
        } else {
            let (addr, pages) = live.swap_remove(rng.next() % live.len());
            allocator.free_frames(addr, pages).unwrap();
        }

        let allocated: usize = live
            .iter()
            .map(|&(_, pages)| pages.next_power_of_two() * PAGE_SIZE)
            .sum();
        assert_eq!(allocator.total_memory() - allocator.free_memory(), allocated);
    }
    assert!(allocator.verify());

    for (addr, pages) in live.drain(..) {
        allocator.free_frames(addr, pages).unwrap();
    }
    assert_eq!(allocator.free_memory(), allocator.total_memory());
    assert!(allocator.verify());
}

#[test]
fn test_multiple_regions() {
    let mut allocator = Allocator::new();
    let low = 0x10_0000;
    let high = 0x1000_0000;
    allocator
        .add_memory(leak_metadata(Allocator::metadata_size(4)), low, 4, 0xffff_0000_0000)
        .unwrap();
    allocator
        .add_memory(leak_metadata(Allocator::metadata_size(64)), high, 64, 0)
        .unwrap();
    assert_eq!(allocator.region_count(), 2);
    assert_eq!(allocator.total_memory(), 68 * PAGE_SIZE);

    // Too big for the low region, served by the high one
    let big = allocator.alloc_frames(32, AllocFlags::empty()).unwrap();
    assert_eq!(big, high);

    // Window restricted to the low region
    let addr = allocator
        .alloc_frames_in_range(1, AllocFlags::empty(), low + PAGE_SIZE, low + 2 * PAGE_SIZE)
        .unwrap();
    assert_eq!(addr, low + PAGE_SIZE);
    assert_eq!(allocator.phys_to_virt(addr), Some(addr + 0xffff_0000_0000));
    assert_eq!(allocator.virt_to_phys(addr + 0xffff_0000_0000), Some(addr));

    // Window spanning the gap between regions holds nothing
    assert_eq!(
        allocator.alloc_frames_in_range(
            2,
            AllocFlags::empty(),
            low + 4 * PAGE_SIZE,
            high
        ),
        Err(AllocError::NoMemory)
    );
    assert_eq!(
        allocator.alloc_frames_in_range(1, AllocFlags::empty(), high, high),
        Err(AllocError::InvalidParam)
    );

    allocator.free_frames(big, 32).unwrap();
    allocator.free_frames(addr, 1).unwrap();
    assert_eq!(allocator.free_memory(), allocator.total_memory());
    assert_eq!(allocator.get_free_blocks_by_order(1, 6).unwrap().count(), 1);
    assert_eq!(allocator.get_free_blocks_by_order(0, 2).unwrap().count(), 1);
    assert!(allocator.get_free_blocks_by_order(2, 0).is_none());
}

/// Exercise the allocator purely through the trait
fn fill_with_pairs<'a, A: FrameAllocator<'a>>(allocator: &mut A) -> usize {
    let mut count = 0;
    while allocator.alloc_frames(2, AllocFlags::ALIGNED).is_ok() {
        count += 1;
    }
    count
}

#[test]
fn test_trait_interface() {
    let mut allocator = Allocator::new();
    allocator
        .add_memory(leak_metadata(Allocator::metadata_size(16)), 0x8000_0000, 16, 0)
        .unwrap();
    assert_eq!(<Allocator as FrameAllocator<'static>>::PAGE_SIZE, PAGE_SIZE);
    assert_eq!(fill_with_pairs(&mut allocator), 8);
    assert_eq!(allocator.free_memory(), 0);
}
