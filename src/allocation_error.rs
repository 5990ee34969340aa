// Copyright 2017-2018 Maskerad Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use thiserror::Error;

/// A custom error enumeration, used by `AllocationResult` as the error type.
///
/// Every allocator of this crate reports its failures with this type. None of them
/// panics or aborts on a failed request: the caller decides what to do.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// The request cannot be satisfied with the remaining memory: the stack is full,
    /// the pool has no free slot, or no free block of the free list is large enough.
    #[error("Out of memory error: {requested} bytes requested, {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },

    /// The request exceeds what the allocator could ever serve, whatever its state.
    #[error("Allocation too large: {requested} bytes requested, the limit is {limit} bytes")]
    AllocationTooLarge { requested: usize, limit: usize },

    /// A handle or a marker given back to an allocator cannot belong to it.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// The requested alignment is not a power of two, or is too large.
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// The memory given to an allocator cannot hold its configuration.
    #[error("Construction error: {0}")]
    ConstructionError(String),
}

/// A simple typedef, for convenience.
pub type AllocationResult<T> = Result<T, AllocationError>;
