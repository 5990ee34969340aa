// Copyright 2017-2018 Maskerad Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A region handed out by a `FreeListAllocator`.
///
/// The allocator writes nothing next to an allocated region, so the handle carries what is
/// needed to give the whole block back: the padding inserted before the region to align it,
/// and the padding left after it (a leftover too small to become a free block).
///
/// The handle must be given back as it was received. Offsets are relative to the start of
/// the allocator's memory.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeListPtr {
    offset: u32,
    size: u32,
    pad_before: u8,
    pad_after: u8,
}

impl FreeListPtr {
    pub(crate) fn new(offset: u32, size: u32, pad_before: u8, pad_after: u8) -> Self {
        FreeListPtr {
            offset,
            size,
            pad_before,
            pad_after,
        }
    }

    /// Offset of the first byte of the region.
    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Number of bytes requested.
    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn pad_before(&self) -> usize {
        self.pad_before as usize
    }

    pub fn pad_after(&self) -> usize {
        self.pad_after as usize
    }

    /// Offset of the first byte of the block, padding included.
    ///
    /// `None` if the handle was forged with more padding than offset.
    pub fn block_offset(&self) -> Option<usize> {
        self.offset().checked_sub(self.pad_before())
    }

    /// Number of bytes of the block, padding included.
    pub fn block_size(&self) -> usize {
        self.pad_before() + self.size() + self.pad_after()
    }
}
