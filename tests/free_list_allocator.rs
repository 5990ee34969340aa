use maskerad_block_allocators::{
    AllocationError, FreeBlock, FreeListAllocator, FreeListConfig, FreeListPtr, MemoryBlock,
};
use proptest::prelude::*;

fn adjacent_free_blocks(allocator: &FreeListAllocator<'_>) -> Option<(FreeBlock, FreeBlock)> {
    allocator
        .free_blocks()
        .windows(2)
        .find(|pair| pair[0].end() >= pair[1].offset)
        .map(|pair| (pair[0], pair[1]))
}

#[test]
fn no_contiguous_block_large_enough() {
    let mut block = MemoryBlock::with_capacity(256);
    let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

    let _first = allocator.allocate(100, 1).unwrap();
    let gap = allocator.allocate(28, 1).unwrap();
    let _second = allocator.allocate(100, 1).unwrap();
    allocator.deallocate(gap).unwrap();

    assert_eq!(allocator.total_free(), 56);
    assert_eq!(allocator.free_block_count(), 2);
    assert_eq!(
        allocator.allocate(80, 1),
        Err(AllocationError::OutOfMemory {
            requested: 80,
            available: 28
        })
    );
    assert_eq!(allocator.total_free(), 56);
}

#[test]
fn freeing_everything_leaves_a_single_block() {
    let mut block = MemoryBlock::with_capacity(1024);
    let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

    let ptrs: Vec<FreeListPtr> = [(40, 8), (3, 1), (100, 16), (7, 4), (64, 64), (1, 1)]
        .iter()
        .map(|&(size, align)| allocator.allocate(size, align).unwrap())
        .collect();

    for index in [3, 0, 5, 1, 4, 2] {
        allocator.deallocate(ptrs[index]).unwrap();
        assert_eq!(adjacent_free_blocks(&allocator), None);
    }
    assert_eq!(
        allocator.free_blocks(),
        vec![FreeBlock {
            offset: 0,
            size: 1024
        }]
    );
}

#[test]
fn regions_are_aligned_and_disjoint() {
    let mut block = MemoryBlock::with_capacity(2048);
    let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();
    let start = allocator.storage_as_ptr() as usize;

    let mut regions = Vec::new();
    for (index, align) in [1usize, 2, 4, 8, 16, 32, 64, 128].iter().enumerate() {
        let ptr = allocator.allocate(index * 10 + 1, *align).unwrap();
        assert_eq!((start + ptr.offset()) % align, 0);
        allocator.bytes_mut(ptr).unwrap().fill(index as u8);
        regions.push(ptr);
    }

    for (index, ptr) in regions.iter().enumerate() {
        assert!(allocator.bytes(*ptr).unwrap().iter().all(|byte| *byte == index as u8));
    }
}

#[test]
fn misaligned_requests_are_rejected() {
    let mut block = MemoryBlock::with_capacity(128);
    let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

    assert!(matches!(
        allocator.allocate(8, 3),
        Err(AllocationError::InvalidLayout(_))
    ));
    assert!(matches!(
        allocator.allocate(8, 256),
        Err(AllocationError::InvalidLayout(_))
    ));
    assert_eq!(allocator.total_free(), 128);
}

#[test]
fn larger_minimum_block() {
    let mut block = MemoryBlock::with_capacity(256);
    let config = FreeListConfig {
        min_block_size: 32,
        ..FreeListConfig::default()
    };
    let mut allocator = FreeListAllocator::with_config(block.as_mut_slice(), config).unwrap();

    let small = allocator.allocate(4, 1).unwrap();
    assert_eq!(small.block_size(), 32);
    assert_eq!(allocator.free_blocks()[0].offset, 32);

    allocator.deallocate(small).unwrap();
    assert_eq!(allocator.largest_free_block(), 256);
}

fn alignment() -> impl Strategy<Value = usize> {
    prop_oneof![Just(1usize), Just(2), Just(4), Just(8), Just(16), Just(64)]
}

proptest! {
    #[test]
    fn free_blocks_are_never_adjacent(
        operations in prop::collection::vec((1usize..96, alignment(), any::<bool>(), any::<u16>()), 1..80),
    ) {
        let mut block = MemoryBlock::with_capacity(2048);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();
        let mut live: Vec<FreeListPtr> = Vec::new();

        for (size, align, free, pick) in operations {
            if free && !live.is_empty() {
                let ptr = live.swap_remove(pick as usize % live.len());
                allocator.deallocate(ptr).unwrap();
                prop_assert_eq!(adjacent_free_blocks(&allocator), None);
            } else if let Ok(ptr) = allocator.allocate(size, align) {
                live.push(ptr);
            }
        }
    }

    #[test]
    fn freeing_every_allocation_restores_the_whole_block(
        requests in prop::collection::vec((1usize..128, alignment(), any::<u16>()), 1..40),
        first_fit in any::<bool>(),
    ) {
        let mut block = MemoryBlock::with_capacity(4096);
        let config = if first_fit {
            FreeListConfig::first_fit()
        } else {
            FreeListConfig::default()
        };
        let mut allocator = FreeListAllocator::with_config(block.as_mut_slice(), config).unwrap();

        let mut live: Vec<(u16, FreeListPtr)> = Vec::new();
        for (size, align, order) in requests {
            if let Ok(ptr) = allocator.allocate(size, align) {
                live.push((order, ptr));
            }
        }

        live.sort_by_key(|(order, _)| *order);
        for (_, ptr) in live {
            allocator.deallocate(ptr).unwrap();
        }

        prop_assert_eq!(allocator.free_blocks(), vec![FreeBlock { offset: 0, size: 4096 }]);
        prop_assert_eq!(allocator.total_free(), 4096);
    }
}
