// Copyright 2017-2018 Maskerad Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The record a free block holds in its first bytes.
//!
//! Layout, native-endian, no alignment requirement:
//!
//! ```text
//! | size: u32 | next: u32 | ...free bytes... |
//! ```
//!
//! `next` is the offset of the next free block in address order, or `NO_NODE`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::utils;

/// `next` of the last free block.
const NO_NODE: u32 = u32::MAX;

/// Number of bytes of the record.
pub const NODE_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeNode {
    pub size: u32,
    pub next: Option<u32>,
}

impl FreeNode {
    /// Reads the record of the free block at `offset`.
    ///
    /// `None` if the record would lie outside of the memory.
    pub fn read(memory: &[u8], offset: u32) -> Option<FreeNode> {
        let offset = offset as usize;
        match offset.checked_add(NODE_SIZE) {
            Some(end) if end <= memory.len() => {}
            _ => return None,
        }
        let next = utils::read_u32(memory, offset + 4);
        Some(FreeNode {
            size: utils::read_u32(memory, offset),
            next: if next == NO_NODE { None } else { Some(next) },
        })
    }

    pub fn write(&self, memory: &mut [u8], offset: u32) {
        let offset = offset as usize;
        utils::write_u32(memory, offset, self.size);
        utils::write_u32(memory, offset + 4, self.next.unwrap_or(NO_NODE));
    }
}

/// A free block, as reported by `FreeListAllocator::free_blocks`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeBlock {
    pub offset: usize,
    pub size: usize,
}

impl FreeBlock {
    /// Offset of the first byte after the block.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[cfg(test)]
mod free_node_test {
    use super::*;

    #[test]
    fn record_layout() {
        let mut memory = [0u8; 24];
        FreeNode { size: 16, next: Some(8) }.write(&mut memory, 3);
        assert_eq!(&memory[3..7], &16u32.to_ne_bytes());
        assert_eq!(
            FreeNode::read(&memory, 3),
            Some(FreeNode { size: 16, next: Some(8) })
        );

        FreeNode { size: 8, next: None }.write(&mut memory, 16);
        assert_eq!(&memory[20..24], &[0xFF; 4]);
        assert_eq!(FreeNode::read(&memory, 16).unwrap().next, None);
        assert_eq!(FreeNode::read(&memory, 17), None);
    }
}
