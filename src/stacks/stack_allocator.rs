// Copyright 2017-2018 Maskerad Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::allocation_error::{AllocationError, AllocationResult};
use crate::config::StackConfig;
use crate::utils;

/// A region handed out by a `StackAllocator`: its offset from the start of the allocator's
/// memory, and its size in bytes.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackHandle {
    offset: usize,
    size: usize,
}

impl StackHandle {
    /// Offset of the first byte of the region.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes of the region.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// A saved position of the top of the stack.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StackMarker {
    cursor: usize,
}

impl StackMarker {
    /// The marker of an empty stack.
    pub const BOTTOM: StackMarker = StackMarker { cursor: 0 };

    /// Index of the first unused byte when the marker was taken.
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

/// A stack-based allocator.
///
/// It manages a sub-range of a memory block to:
///
/// - Allocate bytes in a stack-like fashion.
///
/// - Free everything allocated after a **marker**, or everything at once.
///
/// # Details
///
/// ## Allocation
/// When bytes are allocated, the allocator:
///
/// - Computes the padding needed to align the first unused byte with the requested alignment,
///
/// - Checks that the padding and the requested bytes fit in the remaining memory,
///
/// - Moves the index of the first unused byte (the *cursor*) after the requested bytes,
///
/// - And returns a `StackHandle`, the offset and size of the region.
///
/// Nothing is written next to the allocated bytes: the memory holds no metadata.
///
/// ## Roll-back
///
/// This structure allows you to get a **marker**, the index of the first unused byte.
/// The allocator can be *freed to a marker*, or *reset* entirely.
///
/// Freeing to a marker moves the cursor back to the marker. Every handle obtained after the
/// marker was taken becomes invalid, the allocator doesn't check that they are not used anymore.
///
/// Regions can't be freed individually, in any order. This is the price of having neither
/// fragmentation nor per-allocation overhead.
///
/// # Example
///
/// ```rust
/// use maskerad_block_allocators::{MemoryBlock, StackAllocator};
/// # use std::error::Error;
/// # fn try_main() -> Result<(), Box<dyn Error>> {
/// let mut block = MemoryBlock::with_capacity(1024);
/// let mut single_frame_allocator = StackAllocator::new(block.as_mut_slice())?;
/// let mut closed = false;
///
/// while !closed {
///     // The allocator is cleared every frame.
///     single_frame_allocator.reset();
///
///     //...
///
///     //allocate from the single frame allocator.
///     //Be sure to use the data during this frame only!
///     let scratch = single_frame_allocator.allocate(64, 16)?;
///     single_frame_allocator.bytes_mut(scratch)?.fill(0);
///
///     assert_eq!(scratch.size(), 64);
///     closed = true;
/// }
/// # Ok(())
/// # }
/// # fn main() {
/// #   try_main().unwrap();
/// # }
/// ```
#[derive(Debug)]
pub struct StackAllocator<'a> {
    memory: &'a mut [u8],
    /// Index of the first unused byte.
    cursor: usize,
    config: StackConfig,
}

impl<'a> StackAllocator<'a> {
    /// Creates a StackAllocator managing the given memory, with the default configuration.
    ///
    /// # Error
    /// This function returns a `ConstructionError` if the memory is empty.
    pub fn new(memory: &'a mut [u8]) -> AllocationResult<Self> {
        Self::with_config(memory, StackConfig::default())
    }

    /// Creates a StackAllocator managing the given memory.
    ///
    /// # Error
    /// This function returns a `ConstructionError` if the memory is empty.
    pub fn with_config(memory: &'a mut [u8], config: StackConfig) -> AllocationResult<Self> {
        if memory.is_empty() {
            return Err(AllocationError::ConstructionError(String::from(
                "a stack allocator needs at least one byte of memory",
            )));
        }
        debug!("Creating a StackAllocator with {} bytes.", memory.len());
        Ok(StackAllocator {
            memory,
            cursor: 0,
            config,
        })
    }

    /// Allocates `size` bytes, aligned to `align`, on top of the stack.
    ///
    /// # Error
    /// This function returns an `OutOfMemory` error if the padding and the requested bytes
    /// exceed the remaining capacity of the allocator, and an `InvalidLayout` error if the
    /// alignment is not a power of two or is larger than `MAX_ALIGNMENT`.
    /// A failed allocation leaves the allocator untouched.
    ///
    /// # Example
    /// ```
    /// use maskerad_block_allocators::{MemoryBlock, StackAllocator};
    /// # use std::error::Error;
    /// # fn try_main() -> Result<(), Box<dyn Error>> {
    /// let mut block = MemoryBlock::with_capacity(100);
    /// let mut allocator = StackAllocator::new(block.as_mut_slice())?;
    ///
    /// let first = allocator.allocate(1, 1)?;
    /// // The block is 16-byte aligned: 7 bytes of padding are needed for the second allocation.
    /// let second = allocator.allocate(8, 8)?;
    ///
    /// assert_eq!(first.offset(), 0);
    /// assert_eq!(second.offset(), 8);
    /// assert_eq!(allocator.used(), 16);
    /// assert!(allocator.allocate(85, 1).is_err());
    /// # Ok(())
    /// # }
    /// # fn main() {
    /// #   try_main().unwrap();
    /// # }
    /// ```
    pub fn allocate(&mut self, size: usize, align: usize) -> AllocationResult<StackHandle> {
        debug!("Allocating {} bytes aligned to {} bytes on the stack.", size, align);
        utils::check_alignment(align)?;

        let address = self.memory.as_ptr() as usize + self.cursor;
        let padding = utils::padding_for(address, align);
        trace!(
            "The first unused byte is at {} ({:x}), {} bytes of padding are needed.",
            self.cursor,
            address,
            padding
        );

        let start = self.cursor + padding;
        let end = match start.checked_add(size) {
            Some(end) if end <= self.memory.len() => end,
            _ => {
                debug!("The stack allocator doesn't have enough remaining memory to store the data.");
                return Err(AllocationError::OutOfMemory {
                    requested: size,
                    available: self.remaining(),
                });
            }
        };

        if let Some(pattern) = self.config.alloc_pattern {
            self.memory[start..end].fill(pattern);
        }

        trace!("Setting the first unused byte of memory to byte {} ({:x}).", end, end);
        self.cursor = end;
        Ok(StackHandle {
            offset: start,
            size,
        })
    }

    /// Returns a marker to the current top of the stack.
    ///
    /// # Example
    ///
    /// ```rust
    /// use maskerad_block_allocators::{MemoryBlock, StackAllocator};
    /// # use std::error::Error;
    /// # fn try_main() -> Result<(), Box<dyn Error>> {
    /// let mut block = MemoryBlock::with_capacity(100);
    /// let mut allocator = StackAllocator::new(block.as_mut_slice())?;
    ///
    /// //When nothing has been allocated, the first unused byte is at index 0.
    /// assert_eq!(allocator.mark().cursor(), 0);
    ///
    /// allocator.allocate(10, 1)?;
    /// assert_eq!(allocator.mark().cursor(), 10);
    /// # Ok(())
    /// # }
    /// # fn main() {
    /// #   try_main().unwrap();
    /// # }
    /// ```
    pub fn mark(&self) -> StackMarker {
        debug!("Getting a marker to the byte {}.", self.cursor);
        StackMarker {
            cursor: self.cursor,
        }
    }

    /// Frees everything allocated after the marker was taken.
    ///
    /// Every handle obtained after the marker must not be used anymore.
    ///
    /// # Error
    /// This function returns an `InvalidHandle` error if the marker lies above the current top
    /// of the stack: it was taken before a roll-back to an older marker, or by another allocator.
    ///
    /// # Example
    ///
    /// ```rust
    /// use maskerad_block_allocators::{MemoryBlock, StackAllocator};
    /// # use std::error::Error;
    /// # fn try_main() -> Result<(), Box<dyn Error>> {
    /// let mut block = MemoryBlock::with_capacity(100);
    /// let mut allocator = StackAllocator::new(block.as_mut_slice())?;
    ///
    /// allocator.allocate(10, 1)?;
    /// let marker = allocator.mark();
    /// allocator.allocate(20, 1)?;
    ///
    /// allocator.free_to_marker(marker)?;
    /// assert_eq!(allocator.used(), 10);
    /// # Ok(())
    /// # }
    /// # fn main() {
    /// #   try_main().unwrap();
    /// # }
    /// ```
    pub fn free_to_marker(&mut self, marker: StackMarker) -> AllocationResult<()> {
        debug!("Freeing the stack allocator to the marker {}.", marker.cursor);
        if marker.cursor > self.cursor {
            warn!(
                "The marker {} lies above the top of the stack ({}).",
                marker.cursor, self.cursor
            );
            return Err(AllocationError::InvalidHandle(format!(
                "the marker {} lies above the top of the stack ({})",
                marker.cursor, self.cursor
            )));
        }
        self.release_to(marker.cursor);
        Ok(())
    }

    /// Frees everything. Every handle obtained from the allocator must not be used anymore.
    pub fn reset(&mut self) {
        debug!("Resetting completely the stack allocator.");
        self.release_to(0);
    }

    fn release_to(&mut self, cursor: usize) {
        if let Some(pattern) = self.config.dealloc_pattern {
            trace!("Filling the bytes {} to {} with {:#x}.", cursor, self.cursor, pattern);
            self.memory[cursor..self.cursor].fill(pattern);
        }
        trace!("The first unused byte of memory is being set to {}.", cursor);
        self.cursor = cursor;
    }

    /// Runs `op` with the allocator, then frees everything `op` allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use maskerad_block_allocators::{MemoryBlock, StackAllocator};
    /// # use std::error::Error;
    /// # fn try_main() -> Result<(), Box<dyn Error>> {
    /// let mut block = MemoryBlock::with_capacity(100);
    /// let mut allocator = StackAllocator::new(block.as_mut_slice())?;
    /// allocator.allocate(10, 1)?;
    ///
    /// let inner_size = allocator.scoped(|scope| -> Result<usize, Box<dyn Error>> {
    ///     scope.allocate(50, 1)?;
    ///     Ok(scope.used())
    /// })?;
    ///
    /// assert_eq!(inner_size, 60);
    /// assert_eq!(allocator.used(), 10);
    /// # Ok(())
    /// # }
    /// # fn main() {
    /// #   try_main().unwrap();
    /// # }
    /// ```
    pub fn scoped<R, F>(&mut self, op: F) -> R
    where
        F: FnOnce(&mut Self) -> R,
    {
        let marker = self.mark();
        let result = op(self);
        // op may already have rolled back below the marker.
        let cursor = marker.cursor.min(self.cursor);
        self.release_to(cursor);
        result
    }

    /// Returns the allocated bytes of a region.
    ///
    /// # Error
    /// This function returns an `InvalidHandle` error if the region isn't below the top of the stack.
    pub fn bytes(&self, handle: StackHandle) -> AllocationResult<&[u8]> {
        let end = self.check_handle(handle)?;
        Ok(&self.memory[handle.offset..end])
    }

    /// Returns the allocated bytes of a region, mutably.
    ///
    /// # Error
    /// This function returns an `InvalidHandle` error if the region isn't below the top of the stack.
    pub fn bytes_mut(&mut self, handle: StackHandle) -> AllocationResult<&mut [u8]> {
        let end = self.check_handle(handle)?;
        Ok(&mut self.memory[handle.offset..end])
    }

    fn check_handle(&self, handle: StackHandle) -> AllocationResult<usize> {
        match handle.offset.checked_add(handle.size) {
            Some(end) if end <= self.cursor => Ok(end),
            _ => Err(AllocationError::InvalidHandle(format!(
                "the region at {} ({} bytes) isn't below the top of the stack ({})",
                handle.offset, handle.size, self.cursor
            ))),
        }
    }

    /// Returns the number of bytes the allocator manages.
    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// Returns the index of the first unused byte, padding included.
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Returns the number of bytes left above the top of the stack.
    pub fn remaining(&self) -> usize {
        self.memory.len() - self.cursor
    }

    /// Returns a raw pointer to the first byte managed by the allocator.
    pub fn storage_as_ptr(&self) -> *const u8 {
        self.memory.as_ptr()
    }
}
