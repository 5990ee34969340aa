// Copyright 2017-2018 Maskerad Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;

use bytemuck::Pod;

use crate::allocation_error::{AllocationError, AllocationResult};
use crate::config::PoolConfig;
use crate::pools::pool_allocator::{PoolAllocator, PoolHandle};

/// A slot of a `TypedPoolAllocator<T>`, sized and aligned for a `T`.
pub struct TypedHandle<T> {
    handle: PoolHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedHandle<T> {
    /// The untyped slot.
    pub fn untyped(&self) -> PoolHandle {
        self.handle
    }

    /// Offset of the first byte of the slot.
    pub fn offset(&self) -> usize {
        self.handle.offset()
    }
}

// Derives would require T to implement these traits, the handle never holds a T.
impl<T> Clone for TypedHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TypedHandle<T> {}

impl<T> PartialEq for TypedHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<T> Eq for TypedHandle<T> {}

impl<T> Hash for TypedHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl<T> fmt::Debug for TypedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedHandle")
            .field("offset", &self.handle.offset())
            .finish()
    }
}

/// A pool allocator whose slots hold a `T`.
///
/// It is a `PoolAllocator` with slots of `size_of::<T>()` bytes aligned to `align_of::<T>()`.
/// It adds no state to the pool, only the guarantee that its handles designate slots
/// fit for a `T`.
///
/// `T` must be plain old data, since the pool hands out the bytes of free slots as they are.
///
/// # Example
///
/// ```rust
/// use maskerad_block_allocators::{MemoryBlock, TypedPoolAllocator};
/// # use std::error::Error;
/// # fn try_main() -> Result<(), Box<dyn Error>> {
/// #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
/// #[repr(C)]
/// struct Particle {
///     position: [f32; 3],
///     life: f32,
/// }
///
/// let mut block = MemoryBlock::with_capacity(1024);
/// let mut particles = TypedPoolAllocator::<Particle>::new(block.as_mut_slice())?;
/// assert_eq!(particles.capacity(), 64);
///
/// let spark = particles.allocate_typed()?;
/// particles.write(spark, Particle { position: [0.0; 3], life: 1.0 })?;
/// assert_eq!(particles.read(spark)?.life, 1.0);
///
/// particles.deallocate_typed(spark)?;
/// # Ok(())
/// # }
/// # fn main() {
/// #   try_main().unwrap();
/// # }
/// ```
#[derive(Debug)]
pub struct TypedPoolAllocator<'a, T: Pod> {
    pool: PoolAllocator<'a>,
    _marker: PhantomData<T>,
}

impl<'a, T: Pod> TypedPoolAllocator<'a, T> {
    /// Creates a TypedPoolAllocator cutting the given memory in slots for a `T`.
    ///
    /// The number of slots is `floor(usable_bytes / size_of::<T>())`, where the usable bytes
    /// are the bytes left once the first slot is aligned for a `T`.
    ///
    /// # Error
    /// This function returns a `ConstructionError` if a `T` is smaller than a machine word,
    /// or if the memory can't hold a single `T`.
    pub fn new(memory: &'a mut [u8]) -> AllocationResult<Self> {
        Self::with_patterns(memory, None, None)
    }

    /// Creates a TypedPoolAllocator filling allocated and freed slots with the given patterns.
    pub fn with_patterns(
        memory: &'a mut [u8],
        alloc_pattern: Option<u8>,
        dealloc_pattern: Option<u8>,
    ) -> AllocationResult<Self> {
        let config = PoolConfig {
            slot_align: mem::align_of::<T>(),
            alloc_pattern,
            dealloc_pattern,
        };
        Ok(TypedPoolAllocator {
            pool: PoolAllocator::with_config(memory, mem::size_of::<T>(), config)?,
            _marker: PhantomData,
        })
    }

    /// Hands out a free slot for a `T`. The content of the slot is unspecified.
    ///
    /// # Error
    /// This function returns an `OutOfMemory` error if every slot is in use.
    pub fn allocate_typed(&mut self) -> AllocationResult<TypedHandle<T>> {
        let handle = self.pool.allocate()?;
        Ok(TypedHandle {
            handle,
            _marker: PhantomData,
        })
    }

    /// Gives a slot back to the pool.
    ///
    /// # Error
    /// This function returns an `InvalidHandle` error if the handle can't be a slot of this pool.
    pub fn deallocate_typed(&mut self, handle: TypedHandle<T>) -> AllocationResult<()> {
        self.pool.deallocate(handle.handle)
    }

    /// Writes a `T` in a slot.
    pub fn write(&mut self, handle: TypedHandle<T>, value: T) -> AllocationResult<()> {
        self.pool
            .bytes_mut(handle.handle)?
            .copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Reads the `T` of a slot.
    pub fn read(&self, handle: TypedHandle<T>) -> AllocationResult<T> {
        Ok(bytemuck::pod_read_unaligned(self.pool.bytes(handle.handle)?))
    }

    /// Returns a reference to the `T` of a slot.
    pub fn get(&self, handle: TypedHandle<T>) -> AllocationResult<&T> {
        bytemuck::try_from_bytes(self.pool.bytes(handle.handle)?)
            .map_err(|error| AllocationError::InvalidHandle(format!("{:?}", error)))
    }

    /// Returns a mutable reference to the `T` of a slot.
    pub fn get_mut(&mut self, handle: TypedHandle<T>) -> AllocationResult<&mut T> {
        bytemuck::try_from_bytes_mut(self.pool.bytes_mut(handle.handle)?)
            .map_err(|error| AllocationError::InvalidHandle(format!("{:?}", error)))
    }

    /// Frees every slot.
    pub fn reset(&mut self) {
        self.pool.reset();
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Returns the number of free slots.
    pub fn available(&self) -> usize {
        self.pool.available()
    }

    /// Returns the underlying untyped pool.
    pub fn as_untyped(&self) -> &PoolAllocator<'a> {
        &self.pool
    }
}

#[cfg(test)]
mod typed_pool_allocator_test {
    use super::*;
    use crate::memory_block::MemoryBlock;
    use bytemuck::Zeroable;

    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Monster {
        hp: u32,
        level: u32,
        position: [f32; 2],
    }

    #[test]
    fn slot_geometry_follows_the_type() {
        let mut block = MemoryBlock::with_capacity(160);
        let pool = TypedPoolAllocator::<Monster>::new(block.as_mut_slice()).unwrap();
        assert_eq!(pool.capacity(), 10);
        assert_eq!(pool.as_untyped().slot_size(), mem::size_of::<Monster>());
        assert_eq!(pool.as_untyped().slot_stride(), mem::size_of::<Monster>());
    }

    #[test]
    fn partial_slots_are_not_used() {
        let mut block = MemoryBlock::with_capacity(100);
        let pool = TypedPoolAllocator::<Monster>::new(block.as_mut_slice()).unwrap();
        assert_eq!(pool.capacity(), 100 / mem::size_of::<Monster>());
    }

    #[test]
    fn types_smaller_than_a_link_are_rejected() {
        let mut block = MemoryBlock::with_capacity(100);
        assert!(matches!(
            TypedPoolAllocator::<u8>::new(block.as_mut_slice()),
            Err(AllocationError::ConstructionError(_))
        ));
    }

    #[test]
    fn write_then_read() {
        let mut block = MemoryBlock::with_capacity(64);
        let mut pool = TypedPoolAllocator::<Monster>::new(block.as_mut_slice()).unwrap();

        let goblin = pool.allocate_typed().unwrap();
        let orc = pool.allocate_typed().unwrap();
        pool.write(goblin, Monster { hp: 10, level: 1, position: [0.0, 1.0] }).unwrap();
        pool.write(orc, Monster { hp: 30, level: 4, position: [2.0, 3.0] }).unwrap();

        pool.get_mut(goblin).unwrap().hp -= 5;

        assert_eq!(pool.read(goblin).unwrap().hp, 5);
        assert_eq!(pool.get(orc).unwrap().level, 4);
    }

    #[test]
    fn exhaustion_and_reuse() {
        let mut block = MemoryBlock::with_capacity(32);
        let mut pool = TypedPoolAllocator::<Monster>::new(block.as_mut_slice()).unwrap();

        let first = pool.allocate_typed().unwrap();
        let second = pool.allocate_typed().unwrap();
        assert!(pool.allocate_typed().is_err());

        pool.deallocate_typed(second).unwrap();
        assert_eq!(pool.allocate_typed().unwrap(), second);
        assert_ne!(first, second);

        pool.reset();
        assert_eq!(pool.available(), 2);
    }
}
