// Copyright 2017-2018 Maskerad Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::allocation_error::{AllocationError, AllocationResult};
use crate::config::PoolConfig;
use crate::utils;

/// Link stored in the last free slot.
const NO_SLOT: usize = usize::MAX;

/// A slot handed out by a `PoolAllocator`: the offset of the slot from the start of the
/// allocator's memory.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolHandle {
    offset: usize,
}

impl PoolHandle {
    /// Offset of the first byte of the slot.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// A pool allocator, handing out slots of the same size.
///
/// The memory is cut into slots of `slot_size` bytes. Every free slot stores, in its first
/// machine word, the offset of the next free slot: the free slots form a linked list living
/// in the free memory itself. An occupied slot holds the caller's data only.
///
/// Allocating pops the head of the list, freeing pushes the slot back as the new head. Slots
/// can be freed in any order, and the order in which slots are handed out is not specified.
///
/// Freeing a slot twice, or freeing a slot of another pool, is not detected: it corrupts the
/// free list. Only the handles which can't be slots of this pool (out of range, not on a slot
/// boundary) are rejected.
///
/// # Example
///
/// ```rust
/// use maskerad_block_allocators::{MemoryBlock, PoolAllocator};
/// # use std::error::Error;
/// # fn try_main() -> Result<(), Box<dyn Error>> {
/// let mut block = MemoryBlock::with_capacity(128);
/// let mut pool = PoolAllocator::new(block.as_mut_slice(), 32)?;
/// assert_eq!(pool.capacity(), 4);
///
/// let particle = pool.allocate()?;
/// pool.bytes_mut(particle)?[..4].copy_from_slice(&[1, 2, 3, 4]);
/// assert_eq!(pool.available(), 3);
///
/// pool.deallocate(particle)?;
/// assert_eq!(pool.available(), 4);
/// # Ok(())
/// # }
/// # fn main() {
/// #   try_main().unwrap();
/// # }
/// ```
#[derive(Debug)]
pub struct PoolAllocator<'a> {
    memory: &'a mut [u8],
    slot_size: usize,
    /// Distance between two consecutive slots.
    stride: usize,
    /// Offset of the first slot, the leading bytes are skipped to align it.
    first_slot: usize,
    slot_count: usize,
    /// Offset of the first free slot.
    first_available: Option<usize>,
    available: usize,
    config: PoolConfig,
}

impl<'a> PoolAllocator<'a> {
    /// Creates a PoolAllocator cutting the given memory in slots of `slot_size` bytes.
    ///
    /// # Error
    /// This function returns a `ConstructionError` if `slot_size` is smaller than a machine word,
    /// or if the memory can't hold a single slot.
    pub fn new(memory: &'a mut [u8], slot_size: usize) -> AllocationResult<Self> {
        Self::with_config(memory, slot_size, PoolConfig::default())
    }

    /// Creates a PoolAllocator cutting the given memory in slots of `slot_size` bytes,
    /// aligned to `config.slot_align`.
    ///
    /// The number of slots is the number of whole slots fitting in the memory, once the
    /// leading bytes needed to align the first slot are skipped.
    ///
    /// # Error
    /// This function returns a `ConstructionError` if `slot_size` is smaller than a machine word,
    /// if the slot alignment is invalid, or if the memory can't hold a single slot.
    pub fn with_config(
        memory: &'a mut [u8],
        slot_size: usize,
        config: PoolConfig,
    ) -> AllocationResult<Self> {
        if slot_size < utils::WORD_SIZE {
            return Err(AllocationError::ConstructionError(format!(
                "a slot of {} bytes can't hold the {} bytes of a free-list link",
                slot_size,
                utils::WORD_SIZE
            )));
        }
        utils::check_alignment(config.slot_align)
            .map_err(|error| AllocationError::ConstructionError(error.to_string()))?;

        let stride = utils::round_up(slot_size, config.slot_align).ok_or_else(|| {
            AllocationError::ConstructionError(format!("the slot size {} overflows", slot_size))
        })?;
        let first_slot = utils::padding_for(memory.as_ptr() as usize, config.slot_align);
        let slot_count = memory.len().saturating_sub(first_slot) / stride;
        if slot_count == 0 {
            return Err(AllocationError::ConstructionError(format!(
                "{} bytes can't hold a slot of {} bytes aligned to {} bytes",
                memory.len(),
                slot_size,
                config.slot_align
            )));
        }

        debug!(
            "Creating a PoolAllocator with {} slots of {} bytes ({} bytes apart).",
            slot_count, slot_size, stride
        );
        let mut pool = PoolAllocator {
            memory,
            slot_size,
            stride,
            first_slot,
            slot_count,
            first_available: None,
            available: 0,
            config,
        };
        pool.reset();
        Ok(pool)
    }

    /// Frees every slot, rebuilding the free list in address order.
    ///
    /// Every handle obtained from the pool must not be used anymore.
    pub fn reset(&mut self) {
        debug!("Linking the {} slots of the pool allocator.", self.slot_count);
        for index in 0..self.slot_count {
            let offset = self.first_slot + index * self.stride;
            let next = if index + 1 < self.slot_count {
                offset + self.stride
            } else {
                NO_SLOT
            };
            utils::write_word(self.memory, offset, next);
        }
        self.first_available = Some(self.first_slot);
        self.available = self.slot_count;
    }

    /// Hands out a free slot.
    ///
    /// # Error
    /// This function returns an `OutOfMemory` error if every slot is in use.
    pub fn allocate(&mut self) -> AllocationResult<PoolHandle> {
        let offset = match self.first_available {
            Some(offset) => offset,
            None => {
                debug!("All the slots of the pool allocator are in use.");
                return Err(AllocationError::OutOfMemory {
                    requested: self.slot_size,
                    available: 0,
                });
            }
        };

        let next = utils::read_word(self.memory, offset);
        self.first_available = if next == NO_SLOT {
            None
        } else if self.slot_index(next).is_some() {
            Some(next)
        } else {
            error!(
                "The free slot at {} links to {}, which isn't a slot: the free list is corrupted.",
                offset, next
            );
            None
        };
        self.available = self.available.saturating_sub(1);
        trace!("Handing out the slot at {}, the next free slot is {:?}.", offset, self.first_available);

        if let Some(pattern) = self.config.alloc_pattern {
            self.memory[offset..offset + self.slot_size].fill(pattern);
        }
        Ok(PoolHandle { offset })
    }

    /// Gives a slot back to the pool.
    ///
    /// # Error
    /// This function returns an `InvalidHandle` error if the handle lies outside of the pool or
    /// isn't on a slot boundary. A slot freed twice is not detected.
    pub fn deallocate(&mut self, handle: PoolHandle) -> AllocationResult<()> {
        debug!("Freeing the slot at {}.", handle.offset);
        self.check_handle(handle)?;

        let next = self.first_available.unwrap_or(NO_SLOT);
        utils::write_word(self.memory, handle.offset, next);
        if let Some(pattern) = self.config.dealloc_pattern {
            self.memory[handle.offset + utils::WORD_SIZE..handle.offset + self.slot_size]
                .fill(pattern);
        }

        self.first_available = Some(handle.offset);
        self.available += 1;
        Ok(())
    }

    /// Returns the bytes of a slot.
    ///
    /// # Error
    /// This function returns an `InvalidHandle` error if the handle can't be a slot of this pool.
    pub fn bytes(&self, handle: PoolHandle) -> AllocationResult<&[u8]> {
        self.check_handle(handle)?;
        Ok(&self.memory[handle.offset..handle.offset + self.slot_size])
    }

    /// Returns the bytes of a slot, mutably.
    ///
    /// # Error
    /// This function returns an `InvalidHandle` error if the handle can't be a slot of this pool.
    pub fn bytes_mut(&mut self, handle: PoolHandle) -> AllocationResult<&mut [u8]> {
        self.check_handle(handle)?;
        Ok(&mut self.memory[handle.offset..handle.offset + self.slot_size])
    }

    fn check_handle(&self, handle: PoolHandle) -> AllocationResult<usize> {
        self.slot_index(handle.offset).ok_or_else(|| {
            warn!("The offset {} isn't a slot of the pool allocator.", handle.offset);
            AllocationError::InvalidHandle(format!(
                "the offset {} isn't a slot boundary of a pool of {} slots of {} bytes",
                handle.offset, self.slot_count, self.stride
            ))
        })
    }

    fn slot_index(&self, offset: usize) -> Option<usize> {
        let relative = offset.checked_sub(self.first_slot)?;
        if relative % self.stride != 0 {
            return None;
        }
        let index = relative / self.stride;
        if index < self.slot_count {
            Some(index)
        } else {
            None
        }
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.slot_count
    }

    /// Returns the number of free slots.
    pub fn available(&self) -> usize {
        self.available
    }

    /// Returns the number of slots in use.
    pub fn in_use(&self) -> usize {
        self.slot_count.saturating_sub(self.available)
    }

    /// Returns the size of a slot, in bytes.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Returns the distance between two consecutive slots, in bytes.
    pub fn slot_stride(&self) -> usize {
        self.stride
    }

    /// Returns a raw pointer to the first byte managed by the allocator.
    pub fn storage_as_ptr(&self) -> *const u8 {
        self.memory.as_ptr()
    }
}
