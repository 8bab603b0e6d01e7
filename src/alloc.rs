//! # Alloc
//!
//! Pools read-, write- and executable memory for trampolines and wrappers.
//!
//! Chunks are mapped with [`region::alloc`] and carved up by a
//! [`SlicePool`], so many small code allocations share one mapping. A chunk
//! is retired once its last allocation is released.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use region::Protection;
use slice_pool::sync::{SliceBox, SlicePool};
use thiserror::Error;

/// Errors that occur while handing out executable memory
#[derive(Debug, Error)]
pub enum AllocError {
    /// A freshly mapped chunk could not satisfy the request
    #[error("executable memory pool is exhausted")]
    Exhausted,
    /// Mapping a new chunk failed
    #[error("mapping an executable chunk failed: {0}")]
    Map(#[from] region::Error),
}

/// Smallest chunk mapped at a time; requests larger than this get a
/// dedicated chunk
const CHUNK_SIZE: usize = 0x1_0000;

/// A thread-safe pool of executable memory chunks
pub struct ExecAllocator(Arc<Mutex<ChunkSet>>);

impl ExecAllocator {
    /// Creates an empty allocator
    pub fn new() -> Self {
        ExecAllocator(Arc::new(Mutex::new(ChunkSet { chunks: Vec::new() })))
    }

    /// Allocates `size` bytes of read/write/execute memory.
    ///
    /// The returned bytes are valid but undefined until written.
    pub fn allocate(&self, size: usize) -> Result<ExecutableMemory, AllocError> {
        let mut chunks = self.0.lock().unwrap();
        chunks.allocate(size).map(|data| ExecutableMemory {
            chunks: self.0.clone(),
            data,
        })
    }
}

impl Default for ExecAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// An owned executable allocation; releases its pool slot on drop
pub struct ExecutableMemory {
    /// Chunk set the allocation was carved from
    chunks: Arc<Mutex<ChunkSet>>,
    /// The carved slice itself
    data: SliceBox<u8>,
}

impl ExecutableMemory {
    /// Base address of the allocation
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Mutable base address of the allocation
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    /// Base address as an integer, the form code emission works with
    pub fn address(&self) -> usize {
        self.data.as_ptr() as usize
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        // retire the owning chunk if this was its last allocation
        self.chunks.lock().unwrap().release(&self.data);
    }
}

impl Deref for ExecutableMemory {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data.deref()
    }
}

impl DerefMut for ExecutableMemory {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.deref_mut()
    }
}

/// All chunks currently mapped by an allocator
struct ChunkSet {
    /// Mapped chunks, each carved by its own pool
    chunks: Vec<Chunk>,
}

/// One executable mapping and the pool carving it
struct Chunk {
    /// Pool handing out slices of the mapping
    pool: SlicePool<u8>,
    /// Base address of the mapping
    base: usize,
    /// Byte length of the mapping
    size: usize,
    /// Number of outstanding allocations
    live: usize,
}

impl ChunkSet {
    /// Allocates from an existing chunk, mapping a new one when none fits
    fn allocate(&mut self, size: usize) -> Result<SliceBox<u8>, AllocError> {
        for chunk in &mut self.chunks {
            if let Some(data) = chunk.pool.alloc(size) {
                chunk.live += 1;
                return Ok(data);
            }
        }

        let mapping = region::alloc(size.max(CHUNK_SIZE), Protection::READ_WRITE_EXECUTE)?;
        let base = mapping.as_ptr::<u8>() as usize;
        let mapped_size = mapping.len();

        let pool = SlicePool::new(SliceableAllocation(mapping));
        let data = pool.alloc(size).ok_or(AllocError::Exhausted)?;
        self.chunks.push(Chunk {
            pool,
            base,
            size: mapped_size,
            live: 1,
        });
        Ok(data)
    }

    /// Releases the chunk slot behind `data`, unmapping the chunk when it
    /// was the last outstanding allocation
    fn release(&mut self, data: &SliceBox<u8>) {
        let address = data.as_ptr() as usize;
        let index = self
            .chunks
            .iter()
            .position(|chunk| (chunk.base..chunk.base + chunk.size).contains(&address))
            .expect("releasing an allocation from an unknown chunk");

        self.chunks[index].live -= 1;
        if self.chunks[index].live == 0 {
            self.chunks.remove(index);
        }
    }
}

/// Adapter making a [`region::Allocation`] usable as pool storage
struct SliceableAllocation(region::Allocation);

impl AsRef<[u8]> for SliceableAllocation {
    fn as_ref(&self) -> &[u8] {
        // Safety: the allocation is readable and writable for its whole length
        unsafe { std::slice::from_raw_parts(self.0.as_ptr(), self.0.len()) }
    }
}

impl AsMut<[u8]> for SliceableAllocation {
    fn as_mut(&mut self) -> &mut [u8] {
        // Safety: as above
        unsafe { std::slice::from_raw_parts_mut(self.0.as_mut_ptr(), self.0.len()) }
    }
}

// Safety: the mapping is owned by the pool and only reached through it
unsafe impl Send for SliceableAllocation {}
unsafe impl Sync for SliceableAllocation {}

lazy_static! {
    /// Process-wide pool shared by every trampoline and wrapper
    static ref POOL: ExecAllocator = ExecAllocator::new();
}

/// Allocates `size` bytes of read/write/execute memory from the process-wide
/// pool.
///
/// Note: the returned buffer's contents are undefined, but valid `u8` values.
pub fn allocate_executable(size: usize) -> Result<ExecutableMemory, AllocError> {
    POOL.allocate(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_writable_and_distinct() {
        let mut first = allocate_executable(32).unwrap();
        let mut second = allocate_executable(32).unwrap();

        first.copy_from_slice(&[0xAA; 32]);
        second.copy_from_slice(&[0x55; 32]);

        assert_eq!(&first[..], &[0xAA; 32]);
        assert_eq!(&second[..], &[0x55; 32]);

        let a = first.address();
        let b = second.address();
        assert!(a + 32 <= b || b + 32 <= a);
    }

    #[test]
    fn allocations_are_executable_pages() {
        let memory = allocate_executable(16).unwrap();
        for mapped in region::query_range(memory.as_ptr(), memory.len()).unwrap() {
            let mapped = mapped.unwrap();
            assert!(mapped.protection().contains(Protection::EXECUTE));
        }
    }

    #[test]
    fn chunks_are_reused_and_retired() {
        let allocator = ExecAllocator::new();
        let first = allocator.allocate(64).unwrap();
        let second = allocator.allocate(64).unwrap();

        // both carved from the same mapped chunk
        assert_eq!(allocator.0.lock().unwrap().chunks.len(), 1);

        drop(first);
        assert_eq!(allocator.0.lock().unwrap().chunks.len(), 1);
        drop(second);
        assert_eq!(allocator.0.lock().unwrap().chunks.len(), 0);
    }
}
