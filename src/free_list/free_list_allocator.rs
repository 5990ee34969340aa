// Copyright 2017-2018 Maskerad Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::allocation_error::{AllocationError, AllocationResult};
use crate::config::{FitStrategy, FreeListConfig, MAX_MIN_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::free_list::free_list_ptr::FreeListPtr;
use crate::free_list::free_node::{FreeBlock, FreeNode, NODE_SIZE};
use crate::utils;

/// Largest number of bytes a `FreeListAllocator` can manage: offsets and sizes are `u32`s.
pub const MAX_MANAGED_SIZE: usize = u32::MAX as usize;

/// A free block able to serve the request being allocated.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    previous: Option<(u32, FreeNode)>,
    offset: u32,
    node: FreeNode,
    pad_before: usize,
    /// Bytes taken from the block: padding, requested bytes, and growth up to the minimum block size.
    needed: usize,
}

/// A free-list allocator, handing out regions of any size.
///
/// The free blocks form a linked list, sorted by address, whose records live in the free
/// blocks themselves (see `free_node`). Allocated regions hold no metadata: their boundaries
/// travel in the `FreeListPtr` handed to the caller.
///
/// ## Allocation
///
/// The list is walked to find a block which can hold the alignment padding and the requested
/// bytes: the smallest one with `FitStrategy::BestFit` (lowest address on ties), the first one
/// with `FitStrategy::FirstFit`. The block is split: the leftover stays a free block if it is at
/// least `min_block_size` bytes, otherwise it is given to the allocation as trailing padding.
///
/// ## Deallocation
///
/// The block is inserted back in address order and merged at once with the free blocks directly
/// before and after it. Two free blocks are never adjacent.
///
/// The allocator never moves allocated memory: a request fails if no single free block is large
/// enough, even when the free blocks add up to more than the request.
///
/// # Example
///
/// ```rust
/// use maskerad_block_allocators::{MemoryBlock, FreeListAllocator};
/// # use std::error::Error;
/// # fn try_main() -> Result<(), Box<dyn Error>> {
/// let mut block = MemoryBlock::with_capacity(256);
/// let mut allocator = FreeListAllocator::new(block.as_mut_slice())?;
///
/// let mesh = allocator.allocate(100, 16)?;
/// let texture = allocator.allocate(64, 8)?;
/// allocator.bytes_mut(mesh)?.fill(1);
///
/// allocator.deallocate(texture)?;
/// allocator.deallocate(mesh)?;
///
/// // Everything merged back in a single block.
/// assert_eq!(allocator.largest_free_block(), 256);
/// assert_eq!(allocator.free_block_count(), 1);
/// # Ok(())
/// # }
/// # fn main() {
/// #   try_main().unwrap();
/// # }
/// ```
#[derive(Debug)]
pub struct FreeListAllocator<'a> {
    memory: &'a mut [u8],
    /// Offset of the free block with the lowest address.
    head: Option<u32>,
    config: FreeListConfig,
}

impl<'a> FreeListAllocator<'a> {
    /// Creates a FreeListAllocator managing the given memory, with the default configuration.
    ///
    /// # Error
    /// This function returns a `ConstructionError` if the memory is smaller than the minimum
    /// block size, or larger than `MAX_MANAGED_SIZE`.
    pub fn new(memory: &'a mut [u8]) -> AllocationResult<Self> {
        Self::with_config(memory, FreeListConfig::default())
    }

    /// Creates a FreeListAllocator managing the given memory.
    ///
    /// # Error
    /// This function returns a `ConstructionError` if the minimum block size is outside of
    /// `MIN_BLOCK_SIZE..=MAX_MIN_BLOCK_SIZE`, if the memory is smaller than the minimum block
    /// size, or if it is larger than `MAX_MANAGED_SIZE`.
    pub fn with_config(memory: &'a mut [u8], config: FreeListConfig) -> AllocationResult<Self> {
        debug_assert!(MIN_BLOCK_SIZE >= NODE_SIZE);
        if config.min_block_size < MIN_BLOCK_SIZE || config.min_block_size > MAX_MIN_BLOCK_SIZE {
            return Err(AllocationError::ConstructionError(format!(
                "the minimum block size must lie between {} and {} bytes, not {}",
                MIN_BLOCK_SIZE, MAX_MIN_BLOCK_SIZE, config.min_block_size
            )));
        }
        if memory.len() < config.min_block_size {
            return Err(AllocationError::ConstructionError(format!(
                "{} bytes can't hold a free block of {} bytes",
                memory.len(),
                config.min_block_size
            )));
        }
        if memory.len() > MAX_MANAGED_SIZE {
            return Err(AllocationError::ConstructionError(format!(
                "{} bytes exceed the {} bytes a free-list allocator can manage",
                memory.len(),
                MAX_MANAGED_SIZE
            )));
        }

        debug!(
            "Creating a FreeListAllocator with {} bytes ({:?}).",
            memory.len(),
            config.fit
        );
        let mut allocator = FreeListAllocator {
            memory,
            head: None,
            config,
        };
        allocator.reset();
        Ok(allocator)
    }

    /// Frees everything: the memory becomes a single free block.
    ///
    /// Every handle obtained from the allocator must not be used anymore.
    pub fn reset(&mut self) {
        debug!("Resetting completely the free-list allocator.");
        FreeNode {
            size: self.memory.len() as u32,
            next: None,
        }
        .write(self.memory, 0);
        self.head = Some(0);
    }

    /// Allocates `size` bytes, aligned to `align`.
    ///
    /// # Error
    /// This function returns:
    ///
    /// - an `AllocationTooLarge` error if `size` exceeds the capacity of the allocator,
    ///
    /// - an `OutOfMemory` error if no free block can hold the request,
    ///
    /// - an `InvalidLayout` error if the alignment is not a power of two or is larger than
    /// `MAX_ALIGNMENT`.
    pub fn allocate(&mut self, size: usize, align: usize) -> AllocationResult<FreeListPtr> {
        debug!("Allocating {} bytes aligned to {} bytes in the free list.", size, align);
        utils::check_alignment(align)?;
        if size > MAX_MANAGED_SIZE {
            return Err(AllocationError::AllocationTooLarge {
                requested: size,
                limit: MAX_MANAGED_SIZE,
            });
        }
        if size > self.memory.len() {
            return Err(AllocationError::AllocationTooLarge {
                requested: size,
                limit: self.memory.len(),
            });
        }

        let candidate = match self.find_candidate(size, align) {
            Some(candidate) => candidate,
            None => {
                debug!("No free block can hold {} bytes aligned to {} bytes.", size, align);
                return Err(AllocationError::OutOfMemory {
                    requested: size,
                    available: self.largest_free_block(),
                });
            }
        };
        trace!(
            "Using the free block at {} ({} bytes), {} bytes of leading padding.",
            candidate.offset,
            candidate.node.size,
            candidate.pad_before
        );

        let leftover = candidate.node.size as usize - candidate.needed;
        let taken = if leftover >= self.config.min_block_size {
            let split_offset = candidate.offset + candidate.needed as u32;
            trace!(
                "Splitting the block, {} bytes stay free at {}.",
                leftover,
                split_offset
            );
            FreeNode {
                size: leftover as u32,
                next: candidate.node.next,
            }
            .write(self.memory, split_offset);
            self.link(candidate.previous, Some(split_offset));
            candidate.needed
        } else {
            trace!("Handing out the whole block, {} bytes of leftover.", leftover);
            self.link(candidate.previous, candidate.node.next);
            candidate.node.size as usize
        };

        let pad_after = taken - candidate.pad_before - size;
        Ok(FreeListPtr::new(
            candidate.offset + candidate.pad_before as u32,
            size as u32,
            candidate.pad_before as u8,
            pad_after as u8,
        ))
    }

    fn find_candidate(&self, size: usize, align: usize) -> Option<Candidate> {
        let start = self.memory.as_ptr() as usize;
        let mut best: Option<Candidate> = None;
        let mut previous = None;
        let mut cursor = self.head;

        while let Some(offset) = cursor {
            let node = match self.node_at(offset) {
                Some(node) => node,
                None => break,
            };
            let pad_before = utils::padding_for(start + offset as usize, align);
            let needed = (pad_before + size).max(self.config.min_block_size);

            if needed <= node.size as usize {
                let candidate = Candidate {
                    previous,
                    offset,
                    node,
                    pad_before,
                    needed,
                };
                match self.config.fit {
                    FitStrategy::FirstFit => return Some(candidate),
                    FitStrategy::BestFit => {
                        if node.size as usize == needed {
                            return Some(candidate);
                        }
                        if best.map_or(true, |best| node.size < best.node.size) {
                            best = Some(candidate);
                        }
                    }
                }
            }

            previous = Some((offset, node));
            cursor = node.next;
        }
        best
    }

    /// Points the free block `previous` (or the head of the list) to `next`.
    fn link(&mut self, previous: Option<(u32, FreeNode)>, next: Option<u32>) {
        match previous {
            Some((offset, node)) => FreeNode { next, ..node }.write(self.memory, offset),
            None => self.head = next,
        }
    }

    fn node_at(&self, offset: u32) -> Option<FreeNode> {
        let node = FreeNode::read(self.memory, offset);
        if node.is_none() {
            error!(
                "The free list links to {}, outside of the {} bytes of the allocator.",
                offset,
                self.memory.len()
            );
        }
        node
    }

    /// Gives a region back to the allocator, merging it with the free blocks around it.
    ///
    /// # Error
    /// This function returns an `InvalidHandle` error if the block of the handle lies outside of
    /// the allocator, is smaller than the minimum block size, or overlaps a free block.
    /// A region freed twice is rejected as long as no allocation reused its bytes in between.
    pub fn deallocate(&mut self, ptr: FreeListPtr) -> AllocationResult<()> {
        debug!(
            "Freeing {} bytes at {} ({} bytes before, {} bytes after).",
            ptr.size(),
            ptr.offset(),
            ptr.pad_before(),
            ptr.pad_after()
        );
        let start = self.check_block(ptr)?;
        let size = ptr.block_size();
        let end = start + size;

        let mut previous: Option<(u32, FreeNode)> = None;
        let mut cursor = self.head;
        while let Some(offset) = cursor {
            if offset as usize >= start {
                break;
            }
            let node = self.node_at(offset).ok_or_else(|| {
                AllocationError::InvalidHandle(String::from("the free list is corrupted"))
            })?;
            previous = Some((offset, node));
            cursor = node.next;
        }

        let previous_end = previous.map(|(offset, node)| offset as usize + node.size as usize);
        let overlaps_previous = previous_end.map_or(false, |previous_end| previous_end > start);
        let overlaps_next = cursor.map_or(false, |next| (next as usize) < end);
        if overlaps_previous || overlaps_next {
            warn!("The block at {} ({} bytes) overlaps a free block.", start, size);
            return Err(AllocationError::InvalidHandle(format!(
                "the block at {} ({} bytes) overlaps a free block",
                start, size
            )));
        }

        let mut merged = FreeNode {
            size: size as u32,
            next: cursor,
        };
        if let Some(next_offset) = cursor.filter(|next| *next as usize == end) {
            if let Some(next_node) = self.node_at(next_offset) {
                trace!("Merging with the free block at {}.", next_offset);
                merged.size += next_node.size;
                merged.next = next_node.next;
            }
        }

        match previous {
            Some((previous_offset, previous_node)) if previous_end == Some(start) => {
                trace!("Merging with the free block at {}.", previous_offset);
                FreeNode {
                    size: previous_node.size + merged.size,
                    next: merged.next,
                }
                .write(self.memory, previous_offset);
            }
            _ => {
                merged.write(self.memory, start as u32);
                self.link(previous, Some(start as u32));
            }
        }
        Ok(())
    }

    /// Checks the block boundaries of a handle, returning the offset of the block.
    fn check_block(&self, ptr: FreeListPtr) -> AllocationResult<usize> {
        let start = ptr.block_offset().ok_or_else(|| {
            AllocationError::InvalidHandle(format!(
                "the region at {} can't have {} bytes of leading padding",
                ptr.offset(),
                ptr.pad_before()
            ))
        })?;
        if start + ptr.block_size() > self.memory.len() {
            warn!("The block at {} lies outside of the free-list allocator.", start);
            return Err(AllocationError::InvalidHandle(format!(
                "the block at {} ({} bytes) lies outside of the {} bytes of the allocator",
                start,
                ptr.block_size(),
                self.memory.len()
            )));
        }
        if ptr.block_size() < self.config.min_block_size {
            return Err(AllocationError::InvalidHandle(format!(
                "the block at {} ({} bytes) is smaller than the minimum block size",
                start,
                ptr.block_size()
            )));
        }
        Ok(start)
    }

    /// Returns the allocated bytes of a region.
    ///
    /// # Error
    /// This function returns an `InvalidHandle` error if the region lies outside of the allocator.
    pub fn bytes(&self, ptr: FreeListPtr) -> AllocationResult<&[u8]> {
        let start = self.check_block(ptr)?;
        let offset = start + ptr.pad_before();
        Ok(&self.memory[offset..offset + ptr.size()])
    }

    /// Returns the allocated bytes of a region, mutably.
    ///
    /// # Error
    /// This function returns an `InvalidHandle` error if the region lies outside of the allocator.
    pub fn bytes_mut(&mut self, ptr: FreeListPtr) -> AllocationResult<&mut [u8]> {
        let start = self.check_block(ptr)?;
        let offset = start + ptr.pad_before();
        Ok(&mut self.memory[offset..offset + ptr.size()])
    }

    /// Returns the free blocks, in address order.
    pub fn free_blocks(&self) -> Vec<FreeBlock> {
        let mut blocks = Vec::new();
        let mut cursor = self.head;
        while let Some(offset) = cursor {
            let node = match self.node_at(offset) {
                Some(node) => node,
                None => break,
            };
            blocks.push(FreeBlock {
                offset: offset as usize,
                size: node.size as usize,
            });
            cursor = node.next;
        }
        blocks
    }

    /// Returns the size of the largest free block: the largest request that could be served
    /// without alignment padding.
    pub fn largest_free_block(&self) -> usize {
        self.free_blocks()
            .iter()
            .map(|block| block.size)
            .max()
            .unwrap_or(0)
    }

    /// Returns the number of free bytes, scattered across every free block.
    pub fn total_free(&self) -> usize {
        self.free_blocks().iter().map(|block| block.size).sum()
    }

    pub fn free_block_count(&self) -> usize {
        self.free_blocks().len()
    }

    /// Returns the number of bytes the allocator manages.
    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    pub fn config(&self) -> &FreeListConfig {
        &self.config
    }

    /// Returns a raw pointer to the first byte managed by the allocator.
    pub fn storage_as_ptr(&self) -> *const u8 {
        self.memory.as_ptr()
    }
}

#[cfg(test)]
mod free_list_allocator_test {
    use super::*;
    use crate::memory_block::MemoryBlock;

    fn assert_no_adjacent_free_blocks(allocator: &FreeListAllocator) {
        let blocks = allocator.free_blocks();
        for pair in blocks.windows(2) {
            assert!(pair[0].end() < pair[1].offset, "{:?}", blocks);
        }
    }

    #[test]
    fn creation() {
        let mut block = MemoryBlock::with_capacity(128);
        let allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();
        assert_eq!(
            allocator.free_blocks(),
            vec![FreeBlock {
                offset: 0,
                size: 128
            }]
        );
        assert_eq!(allocator.total_free(), 128);
    }

    #[test]
    fn creation_failures() {
        let mut block = MemoryBlock::with_capacity(64);
        let (small, rest) = block.split_at(MIN_BLOCK_SIZE - 1).unwrap();
        assert!(matches!(
            FreeListAllocator::new(small),
            Err(AllocationError::ConstructionError(_))
        ));

        let config = FreeListConfig {
            min_block_size: 4,
            ..FreeListConfig::default()
        };
        assert!(matches!(
            FreeListAllocator::with_config(rest, config),
            Err(AllocationError::ConstructionError(_))
        ));
    }

    #[test]
    fn allocations_are_split_from_the_free_block() {
        let mut block = MemoryBlock::with_capacity(128);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

        let first = allocator.allocate(24, 8).unwrap();
        let second = allocator.allocate(16, 8).unwrap();
        assert_eq!(first.offset(), 0);
        assert_eq!(second.offset(), 24);
        assert_eq!(second.pad_before(), 0);
        assert_eq!(second.pad_after(), 0);
        assert_eq!(
            allocator.free_blocks(),
            vec![FreeBlock {
                offset: 40,
                size: 88
            }]
        );
    }

    #[test]
    fn alignment_padding_is_recorded() {
        let mut block = MemoryBlock::with_capacity(128);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

        allocator.allocate(10, 1).unwrap();
        let aligned = allocator.allocate(16, 16).unwrap();
        assert_eq!(aligned.offset(), 16);
        assert_eq!(aligned.pad_before(), 6);
        assert_eq!(aligned.block_offset(), Some(10));

        let start = allocator.storage_as_ptr() as usize;
        assert_eq!((start + aligned.offset()) % 16, 0);
    }

    #[test]
    fn small_requests_grow_to_the_minimum_block() {
        let mut block = MemoryBlock::with_capacity(64);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

        let tiny = allocator.allocate(3, 1).unwrap();
        assert_eq!(tiny.size(), 3);
        assert_eq!(tiny.pad_after(), MIN_BLOCK_SIZE - 3);
        assert_eq!(allocator.free_blocks()[0].offset, MIN_BLOCK_SIZE);

        allocator.deallocate(tiny).unwrap();
        assert_eq!(allocator.largest_free_block(), 64);
    }

    #[test]
    fn small_leftover_is_handed_out() {
        let mut block = MemoryBlock::with_capacity(64);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

        let almost_all = allocator.allocate(60, 1).unwrap();
        assert_eq!(almost_all.pad_after(), 4);
        assert_eq!(allocator.free_block_count(), 0);
        assert_eq!(allocator.total_free(), 0);

        assert!(matches!(
            allocator.allocate(1, 1),
            Err(AllocationError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn coalescing_with_both_neighbours() {
        let mut block = MemoryBlock::with_capacity(96);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

        let a = allocator.allocate(32, 8).unwrap();
        let b = allocator.allocate(32, 8).unwrap();
        let c = allocator.allocate(32, 8).unwrap();

        allocator.deallocate(a).unwrap();
        allocator.deallocate(c).unwrap();
        assert_eq!(allocator.free_block_count(), 2);
        assert_no_adjacent_free_blocks(&allocator);

        allocator.deallocate(b).unwrap();
        assert_eq!(
            allocator.free_blocks(),
            vec![FreeBlock {
                offset: 0,
                size: 96
            }]
        );
    }

    #[test]
    fn best_fit_picks_the_smallest_block() {
        let mut block = MemoryBlock::with_capacity(256);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

        let large_hole = allocator.allocate(64, 8).unwrap();
        let _a = allocator.allocate(8, 8).unwrap();
        let small_hole = allocator.allocate(24, 8).unwrap();
        let _b = allocator.allocate(8, 8).unwrap();
        allocator.deallocate(large_hole).unwrap();
        allocator.deallocate(small_hole).unwrap();

        let ptr = allocator.allocate(16, 8).unwrap();
        assert_eq!(ptr.offset(), small_hole.offset());
    }

    #[test]
    fn first_fit_picks_the_lowest_block() {
        let mut block = MemoryBlock::with_capacity(256);
        let mut allocator =
            FreeListAllocator::with_config(block.as_mut_slice(), FreeListConfig::first_fit()).unwrap();

        let large_hole = allocator.allocate(64, 8).unwrap();
        let _a = allocator.allocate(8, 8).unwrap();
        let small_hole = allocator.allocate(24, 8).unwrap();
        let _b = allocator.allocate(8, 8).unwrap();
        allocator.deallocate(large_hole).unwrap();
        allocator.deallocate(small_hole).unwrap();

        let ptr = allocator.allocate(16, 8).unwrap();
        assert_eq!(ptr.offset(), large_hole.offset());
    }

    #[test]
    fn too_large_requests() {
        let mut block = MemoryBlock::with_capacity(64);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

        assert_eq!(
            allocator.allocate(65, 1),
            Err(AllocationError::AllocationTooLarge {
                requested: 65,
                limit: 64
            })
        );
        assert!(matches!(
            allocator.allocate(MAX_MANAGED_SIZE + 1, 1),
            Err(AllocationError::AllocationTooLarge { .. })
        ));
    }

    #[test]
    fn double_free_of_a_free_block_is_rejected() {
        let mut block = MemoryBlock::with_capacity(64);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

        let _a = allocator.allocate(16, 8).unwrap();
        let b = allocator.allocate(16, 8).unwrap();
        allocator.deallocate(b).unwrap();
        assert!(matches!(
            allocator.deallocate(b),
            Err(AllocationError::InvalidHandle(_))
        ));
        assert_eq!(allocator.total_free(), 48);
    }

    #[test]
    fn forged_handles_are_rejected() {
        let mut block = MemoryBlock::with_capacity(64);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();
        allocator.allocate(64, 1).unwrap();

        let outside = FreeListPtr::new(60, 16, 0, 0);
        let too_small = FreeListPtr::new(0, 4, 0, 0);
        let bad_padding = FreeListPtr::new(2, 16, 4, 0);
        assert!(allocator.deallocate(outside).is_err());
        assert!(allocator.deallocate(too_small).is_err());
        assert!(allocator.deallocate(bad_padding).is_err());
        assert!(allocator.bytes(outside).is_err());
        assert_eq!(allocator.total_free(), 0);
    }

    #[test]
    fn bytes_of_a_region() {
        let mut block = MemoryBlock::with_capacity(64);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();

        let a = allocator.allocate(5, 1).unwrap();
        let b = allocator.allocate(8, 8).unwrap();
        allocator.bytes_mut(a).unwrap().copy_from_slice(b"hello");
        allocator.bytes_mut(b).unwrap().fill(9);

        assert_eq!(allocator.bytes(a).unwrap(), b"hello");
        assert_eq!(allocator.bytes(b).unwrap(), &[9; 8]);
    }

    #[test]
    fn reset_restores_a_single_block() {
        let mut block = MemoryBlock::with_capacity(64);
        let mut allocator = FreeListAllocator::new(block.as_mut_slice()).unwrap();
        allocator.allocate(16, 1).unwrap();
        allocator.allocate(16, 1).unwrap();

        allocator.reset();
        assert_eq!(allocator.free_blocks(), vec![FreeBlock { offset: 0, size: 64 }]);
    }
}
