// Copyright 2017-2018 Maskerad Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Configuration of the allocators.
//!
//! The fill patterns are debugging aids: freshly allocated bytes and released bytes are
//! overwritten with a recognizable value, so reads of uninitialized or stale memory stand out
//! in a memory dump.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Smallest free block the free-list allocator can track: a `u32` size and a `u32` link.
pub const MIN_BLOCK_SIZE: usize = 8;

/// Largest accepted value for `FreeListConfig::min_block_size`.
pub const MAX_MIN_BLOCK_SIZE: usize = 64;

/// Byte written over freshly allocated memory by the debug configurations.
pub const ALLOC_PATTERN: u8 = 0xCC;

/// Byte written over released memory by the debug configurations.
pub const DEALLOC_PATTERN: u8 = 0xDD;

/// Configuration for the stack allocator.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    /// Written over every allocated byte, padding excluded.
    pub alloc_pattern: Option<u8>,
    /// Written over every byte released by `free_to_marker` or `reset`.
    pub dealloc_pattern: Option<u8>,
}

impl Default for StackConfig {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::debug()
        } else {
            Self::performance()
        }
    }
}

impl StackConfig {
    /// Fill patterns enabled.
    pub fn debug() -> Self {
        StackConfig {
            alloc_pattern: Some(ALLOC_PATTERN),
            dealloc_pattern: Some(DEALLOC_PATTERN),
        }
    }

    /// No memory is touched besides the allocator's own bookkeeping.
    pub fn performance() -> Self {
        StackConfig {
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }
}

/// Configuration for the pool allocator.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Alignment of every slot. The distance between two slots is the slot size rounded up to it.
    pub slot_align: usize,
    /// Written over an allocated slot.
    pub alloc_pattern: Option<u8>,
    /// Written over a freed slot, after its free-list link.
    pub dealloc_pattern: Option<u8>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            slot_align: 1,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }
}

impl PoolConfig {
    /// Default configuration, with slots aligned to `slot_align`.
    pub fn aligned(slot_align: usize) -> Self {
        PoolConfig {
            slot_align,
            ..PoolConfig::default()
        }
    }

    /// Fill patterns enabled.
    pub fn debug(slot_align: usize) -> Self {
        PoolConfig {
            slot_align,
            alloc_pattern: Some(ALLOC_PATTERN),
            dealloc_pattern: Some(DEALLOC_PATTERN),
        }
    }
}

/// How the free-list allocator chooses among the free blocks able to serve a request.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStrategy {
    /// The smallest block that fits, the lowest address on ties.
    BestFit,
    /// The first block that fits, in address order.
    FirstFit,
}

impl Default for FitStrategy {
    fn default() -> Self {
        FitStrategy::BestFit
    }
}

/// Configuration for the free-list allocator.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeListConfig {
    pub fit: FitStrategy,
    /// A leftover smaller than this is given to the allocation instead of becoming a free block.
    /// Must lie in `MIN_BLOCK_SIZE..=MAX_MIN_BLOCK_SIZE`.
    pub min_block_size: usize,
}

impl Default for FreeListConfig {
    fn default() -> Self {
        FreeListConfig {
            fit: FitStrategy::BestFit,
            min_block_size: MIN_BLOCK_SIZE,
        }
    }
}

impl FreeListConfig {
    /// Default configuration with the first-fit strategy.
    pub fn first_fit() -> Self {
        FreeListConfig {
            fit: FitStrategy::FirstFit,
            ..FreeListConfig::default()
        }
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    #[test]
    fn default_stack_config_follows_build_profile() {
        let config = StackConfig::default();
        assert_eq!(config.alloc_pattern.is_some(), cfg!(debug_assertions));
        assert_eq!(StackConfig::performance().dealloc_pattern, None);
    }

    #[test]
    fn free_list_defaults() {
        let config = FreeListConfig::default();
        assert_eq!(config.fit, FitStrategy::BestFit);
        assert_eq!(config.min_block_size, MIN_BLOCK_SIZE);
        assert_eq!(FreeListConfig::first_fit().fit, FitStrategy::FirstFit);
    }
}
