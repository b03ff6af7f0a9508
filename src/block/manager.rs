//! Power-of-two block allocator over a single mapped arena.
//!
//! The arena is one sparse file mapping; every block is a `2^order` byte
//! region identified by its byte offset. Freed blocks are recycled through
//! per-order freelists. Blocks below [`MIN_ORDER`] are rounded up so every
//! allocation is at least 8-byte aligned.

use std::fs::OpenOptions;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::MmapMut;
use parking_lot::Mutex;
use tracing::debug;

use crate::block::layout::{EdgeBlockHeader, EdgeLabelBlockHeader, VertexBlockHeader};
use crate::error::{GraphError, Result};
use crate::types::BlockPtr;

/// Null block pointer; [`BlockManager::convert`] maps it to `None`.
pub const NULL_POINTER: BlockPtr = u64::MAX;

/// Smallest order handed out by the allocator (64 bytes).
pub const MIN_ORDER: u8 = 6;

/// Largest order accepted; a backstop far above any real block.
const MAX_ORDER: u8 = 46;

pub struct BlockManager {
    /// Keeps the mapping alive; all access goes through `base`.
    _mmap: MmapMut,
    base: *mut u8,
    capacity: u64,
    bump: AtomicU64,
    freelists: Vec<Mutex<Vec<BlockPtr>>>,
}

// The arena is shared between transactions on different threads. Block
// contents are coordinated by the per-vertex futexes and the commit
// protocol; the allocator's own state is the atomic bump offset plus the
// locked freelists.
unsafe impl Send for BlockManager {}
unsafe impl Sync for BlockManager {}

impl BlockManager {
    /// Creates the arena file at `path`, sizes it to `capacity`, and maps it.
    pub fn open(path: &Path, capacity: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(capacity)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();
        debug!(path = %path.display(), capacity, "block arena mapped");
        Ok(Self {
            _mmap: mmap,
            base,
            capacity,
            bump: AtomicU64::new(0),
            freelists: (0..=MAX_ORDER).map(|_| Mutex::new(Vec::new())).collect(),
        })
    }

    /// Allocates a `2^order` byte block and returns its arena offset.
    pub fn alloc(&self, order: u8) -> Result<BlockPtr> {
        let order = order.max(MIN_ORDER);
        if order > MAX_ORDER {
            return Err(GraphError::Capacity("block order out of range"));
        }
        if let Some(pointer) = self.freelists[order as usize].lock().pop() {
            return Ok(pointer);
        }
        let size = 1u64 << order;
        // Blocks are self-aligned up to a page so intra-block field offsets
        // keep their natural alignment.
        let align = size.min(4096);
        let mut current = self.bump.load(Ordering::Relaxed);
        loop {
            let start = (current + align - 1) & !(align - 1);
            let end = start + size;
            if end > self.capacity {
                return Err(GraphError::Capacity("block arena exhausted"));
            }
            match self
                .bump
                .compare_exchange_weak(current, end, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return Ok(start),
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns a block to the freelist for its order.
    pub fn free(&self, pointer: BlockPtr, order: u8) {
        let order = order.max(MIN_ORDER);
        debug_assert!(order <= MAX_ORDER);
        debug_assert!(pointer < self.capacity);
        self.freelists[order as usize].lock().push(pointer);
    }

    /// Reinterprets an arena offset as a typed block pointer.
    ///
    /// Returns `None` for [`NULL_POINTER`]. The returned pointer is valid for
    /// the life of the arena; callers uphold the single-writer protocol for
    /// any mutation through it.
    pub fn convert<T>(&self, pointer: BlockPtr) -> Option<NonNull<T>> {
        if pointer == NULL_POINTER {
            return None;
        }
        debug_assert!(pointer < self.capacity);
        NonNull::new(unsafe { self.base.add(pointer as usize) }.cast::<T>())
    }

    /// Typed shared view of a known-valid offset.
    pub(crate) fn view<T>(&self, pointer: BlockPtr) -> &T {
        debug_assert_ne!(pointer, NULL_POINTER);
        debug_assert!(pointer < self.capacity);
        unsafe { &*(self.base.add(pointer as usize) as *const T) }
    }

    /// Typed raw pointer to a known-valid offset, for init/append routines.
    pub(crate) fn raw<T>(&self, pointer: BlockPtr) -> NonNull<T> {
        debug_assert_ne!(pointer, NULL_POINTER);
        debug_assert!(pointer < self.capacity);
        unsafe { NonNull::new_unchecked(self.base.add(pointer as usize).cast::<T>()) }
    }

    pub fn vertex_block(&self, pointer: BlockPtr) -> Option<&VertexBlockHeader> {
        self.convert::<VertexBlockHeader>(pointer)
            .map(|p| unsafe { &*p.as_ptr() })
    }

    pub fn edge_label_block(&self, pointer: BlockPtr) -> Option<&EdgeLabelBlockHeader> {
        self.convert::<EdgeLabelBlockHeader>(pointer)
            .map(|p| unsafe { &*p.as_ptr() })
    }

    pub fn edge_block(&self, pointer: BlockPtr) -> Option<&EdgeBlockHeader> {
        self.convert::<EdgeBlockHeader>(pointer)
            .map(|p| unsafe { &*p.as_ptr() })
    }

    /// Bytes consumed from the bump region so far.
    pub fn used(&self) -> u64 {
        self.bump.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn manager() -> (NamedTempFile, BlockManager) {
        let tmp = NamedTempFile::new().expect("temp file");
        let bm = BlockManager::open(tmp.path(), 1 << 22).expect("open arena");
        (tmp, bm)
    }

    #[test]
    fn alloc_is_aligned_and_disjoint() {
        let (_tmp, bm) = manager();
        let a = bm.alloc(7).unwrap();
        let b = bm.alloc(7).unwrap();
        assert_ne!(a, b);
        assert_eq!(a % 128, 0);
        assert_eq!(b % 128, 0);
        let c = bm.alloc(14).unwrap();
        assert_eq!(c % 4096, 0);
    }

    #[test]
    fn free_blocks_are_recycled_per_order() {
        let (_tmp, bm) = manager();
        let a = bm.alloc(8).unwrap();
        bm.free(a, 8);
        let b = bm.alloc(8).unwrap();
        assert_eq!(a, b);
        // A different order does not see the freed block.
        let c = bm.alloc(9).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn tiny_orders_round_up() {
        let (_tmp, bm) = manager();
        let a = bm.alloc(0).unwrap();
        bm.free(a, 0);
        assert_eq!(bm.alloc(MIN_ORDER).unwrap(), a);
    }

    #[test]
    fn convert_null_is_none() {
        let (_tmp, bm) = manager();
        assert!(bm.convert::<u64>(NULL_POINTER).is_none());
        assert!(bm.vertex_block(NULL_POINTER).is_none());
    }

    #[test]
    fn exhaustion_is_reported() {
        let tmp = NamedTempFile::new().unwrap();
        let bm = BlockManager::open(tmp.path(), 1 << 12).unwrap();
        assert!(bm.alloc(12).is_ok());
        assert!(matches!(bm.alloc(12), Err(GraphError::Capacity(_))));
    }
}
