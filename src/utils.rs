// Copyright 2017-2018 Maskerad Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Offset and alignment arithmetic shared by the allocators, and the helpers reading
//! and writing the links the allocators store inside free memory.

use std::mem;

use crate::allocation_error::{AllocationError, AllocationResult};

/// The largest alignment an allocation can request.
///
/// Leading padding is recorded in a single byte by `FreeListPtr`, so it must stay below 256.
pub const MAX_ALIGNMENT: usize = 128;

/// Size, in bytes, of the link a free pool slot holds.
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// Rounds `base` up to the next multiple of `align`. `align` must be a power of two.
///
/// Returns `None` on overflow.
#[inline]
pub fn round_up(base: usize, align: usize) -> Option<usize> {
    base.checked_add(align - 1).map(|value| value & !(align - 1))
}

/// Number of bytes to skip from `address` to reach the next `align`-aligned address.
#[inline]
pub fn padding_for(address: usize, align: usize) -> usize {
    (align - (address % align)) % align
}

/// Checks that `align` is a power of two no larger than `MAX_ALIGNMENT`.
pub fn check_alignment(align: usize) -> AllocationResult<()> {
    if !align.is_power_of_two() {
        return Err(AllocationError::InvalidLayout(format!(
            "the alignment {} is not a power of two",
            align
        )));
    }
    if align > MAX_ALIGNMENT {
        return Err(AllocationError::InvalidLayout(format!(
            "the alignment {} exceeds the maximum alignment of {} bytes",
            align, MAX_ALIGNMENT
        )));
    }
    Ok(())
}

/// Reads a native-endian machine word at `offset`.
#[inline]
pub fn read_word(memory: &[u8], offset: usize) -> usize {
    let mut bytes = [0u8; WORD_SIZE];
    bytes.copy_from_slice(&memory[offset..offset + WORD_SIZE]);
    usize::from_ne_bytes(bytes)
}

/// Writes a native-endian machine word at `offset`.
#[inline]
pub fn write_word(memory: &mut [u8], offset: usize, value: usize) {
    memory[offset..offset + WORD_SIZE].copy_from_slice(&value.to_ne_bytes());
}

/// Reads a native-endian `u32` at `offset`.
#[inline]
pub fn read_u32(memory: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&memory[offset..offset + 4]);
    u32::from_ne_bytes(bytes)
}

/// Writes a native-endian `u32` at `offset`.
#[inline]
pub fn write_u32(memory: &mut [u8], offset: usize, value: u32) {
    memory[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}
