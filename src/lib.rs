// Copyright 2017-2018 Maskerad Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! This library provides allocators carving a memory block owned by the caller:
//!
//! - a **stack-based** allocator, freeing memory in bulk to a marker,
//!
//! - a **pool** allocator, handing out slots of a fixed size,
//!
//! - a **typed pool** allocator, whose slots hold a plain-old-data type,
//!
//! - a **free-list** allocator, handing out regions of any size and merging freed regions.
//!
//! None of them writes metadata in allocated memory. Allocations are identified by handles
//! (offsets into the memory of the allocator), which must be given back as they were received.
//!
//! A `MemoryBlock` can be split in disjoint ranges, each one managed by its own allocator:
//!
//! ```rust
//! use maskerad_block_allocators::{MemoryBlock, StackAllocator, PoolAllocator, FreeListAllocator};
//! # use std::error::Error;
//! # fn try_main() -> Result<(), Box<dyn Error>> {
//! let mut block = MemoryBlock::with_capacity(4096);
//! let mut ranges = block.carve(&[1024, 1024, 2048])?.into_iter();
//! let (frame, pool, general) = match (ranges.next(), ranges.next(), ranges.next()) {
//!     (Some(frame), Some(pool), Some(general)) => (frame, pool, general),
//!     _ => unreachable!(),
//! };
//!
//! let mut frame_allocator = StackAllocator::new(frame)?;
//! let mut pool_allocator = PoolAllocator::new(pool, 32)?;
//! let mut general_allocator = FreeListAllocator::new(general)?;
//!
//! let scratch = frame_allocator.allocate(100, 8)?;
//! let slot = pool_allocator.allocate()?;
//! let mesh = general_allocator.allocate(500, 16)?;
//!
//! general_allocator.deallocate(mesh)?;
//! pool_allocator.deallocate(slot)?;
//! frame_allocator.reset();
//! # let _ = scratch;
//! # Ok(())
//! # }
//! # fn main() {
//! #   try_main().unwrap();
//! # }
//! ```
//!
//! The allocators are not thread-safe: an allocator shared between threads must be wrapped in
//! a lock by the caller.

#[macro_use]
extern crate log;

mod allocation_error;
mod config;
mod free_list;
mod memory_block;
mod pools;
mod stacks;

pub mod utils;

pub use allocation_error::{AllocationError, AllocationResult};

pub use config::{FitStrategy, FreeListConfig, PoolConfig, StackConfig};
pub use config::{ALLOC_PATTERN, DEALLOC_PATTERN, MAX_MIN_BLOCK_SIZE, MIN_BLOCK_SIZE};

pub use memory_block::MemoryBlock;

pub use stacks::stack_allocator::{StackAllocator, StackHandle, StackMarker};

pub use pools::pool_allocator::{PoolAllocator, PoolHandle};
pub use pools::typed_pool_allocator::{TypedHandle, TypedPoolAllocator};

pub use free_list::free_list_allocator::{FreeListAllocator, MAX_MANAGED_SIZE};
pub use free_list::free_list_ptr::FreeListPtr;
pub use free_list::free_node::FreeBlock;

pub use utils::MAX_ALIGNMENT;
