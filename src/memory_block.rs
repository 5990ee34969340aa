// Copyright 2017-2018 Maskerad Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use bytemuck::{Pod, Zeroable};

use crate::allocation_error::{AllocationError, AllocationResult};

/// Unit of storage of a `MemoryBlock`. Only used to give the block a 16-byte aligned base.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C, align(16))]
struct AlignedChunk([u8; 16]);

/// The MemoryBlock is just a chunk of memory, with a fixed capacity.
///
/// It is the memory the allocators of this crate manage. A MemoryBlock never grows, never
/// moves its bytes, and never allocates anything after its creation.
///
/// The block is carved into disjoint sub-ranges, and each sub-range is given to one allocator.
/// The sub-ranges are mutable slices, so the borrow checker guarantees that two allocators
/// never manage overlapping memory.
///
/// # Example
///
/// ```rust
/// use maskerad_block_allocators::{MemoryBlock, StackAllocator, PoolAllocator};
/// # use std::error::Error;
/// # fn try_main() -> Result<(), Box<dyn Error>> {
/// let mut block = MemoryBlock::with_capacity(1024);
/// let mut regions = block.carve(&[512, 512])?;
/// let pool_memory = regions.pop().unwrap();
/// let stack_memory = regions.pop().unwrap();
///
/// let mut stack = StackAllocator::new(stack_memory)?;
/// let mut pool = PoolAllocator::new(pool_memory, 32)?;
///
/// stack.allocate(100, 8)?;
/// pool.allocate()?;
/// assert_eq!(stack.used(), 100);
/// assert_eq!(pool.available(), 15);
/// # Ok(())
/// # }
/// # fn main() {
/// #   try_main().unwrap();
/// # }
/// ```
pub struct MemoryBlock {
    storage: Box<[AlignedChunk]>,
    capacity: usize,
}

impl MemoryBlock {
    /// Alignment of the first byte of every MemoryBlock.
    pub const BASE_ALIGNMENT: usize = 16;

    /// Creates a zeroed memory block, allocating the given number of bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        debug!("Creating a MemoryBlock of {} bytes.", capacity);
        let chunk_count = (capacity + Self::BASE_ALIGNMENT - 1) / Self::BASE_ALIGNMENT;
        MemoryBlock {
            storage: vec![AlignedChunk([0; 16]); chunk_count].into_boxed_slice(),
            capacity,
        }
    }

    /// Returns the number of bytes the block holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a pointer to the first byte of the block.
    pub fn as_ptr(&self) -> *const u8 {
        self.as_slice().as_ptr()
    }

    /// Returns the whole block as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &bytemuck::cast_slice::<AlignedChunk, u8>(&self.storage)[..self.capacity]
    }

    /// Returns the whole block as a mutable byte slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<AlignedChunk, u8>(&mut self.storage)[..self.capacity]
    }

    /// Splits the block in two disjoint sub-ranges, `[0, mid)` and `[mid, capacity)`.
    ///
    /// # Error
    /// This function returns a `ConstructionError` if `mid` lies beyond the capacity of the block.
    pub fn split_at(&mut self, mid: usize) -> AllocationResult<(&mut [u8], &mut [u8])> {
        if mid > self.capacity {
            return Err(AllocationError::ConstructionError(format!(
                "cannot split a block of {} bytes at byte {}",
                self.capacity, mid
            )));
        }
        trace!("Splitting the MemoryBlock at byte {}.", mid);
        Ok(self.as_mut_slice().split_at_mut(mid))
    }

    /// Carves consecutive, disjoint sub-ranges of the given sizes, starting at the first byte
    /// of the block. Bytes beyond the sum of the sizes are left unused.
    ///
    /// # Error
    /// This function returns a `ConstructionError` if the sizes add up to more than the capacity.
    ///
    /// # Example
    ///
    /// ```rust
    /// use maskerad_block_allocators::MemoryBlock;
    /// # use std::error::Error;
    /// # fn try_main() -> Result<(), Box<dyn Error>> {
    /// let mut block = MemoryBlock::with_capacity(100);
    /// let regions = block.carve(&[10, 20, 30])?;
    /// assert_eq!(regions.len(), 3);
    /// assert_eq!(regions[2].len(), 30);
    ///
    /// assert!(block.carve(&[60, 60]).is_err());
    /// # Ok(())
    /// # }
    /// # fn main() {
    /// #   try_main().unwrap();
    /// # }
    /// ```
    pub fn carve(&mut self, sizes: &[usize]) -> AllocationResult<Vec<&mut [u8]>> {
        let total = sizes
            .iter()
            .try_fold(0usize, |total, size| total.checked_add(*size))
            .filter(|total| *total <= self.capacity)
            .ok_or_else(|| {
                AllocationError::ConstructionError(format!(
                    "the requested sub-ranges do not fit in a block of {} bytes",
                    self.capacity
                ))
            })?;
        debug!(
            "Carving {} sub-ranges ({} bytes) out of the MemoryBlock.",
            sizes.len(),
            total
        );

        let mut regions = Vec::with_capacity(sizes.len());
        let mut rest = self.as_mut_slice();
        for size in sizes {
            let (region, tail) = std::mem::take(&mut rest).split_at_mut(*size);
            regions.push(region);
            rest = tail;
        }
        Ok(regions)
    }
}
