//! Per-vertex directory: chain head pointers plus a one-bit write lock.
//!
//! Three parallel arrays indexed by vertex id, preallocated at graph open.
//! Pointer slots are published with release stores and read with acquire
//! loads; everything a reader can reach through a head pointer was written
//! before the pointer was swung.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::block::NULL_POINTER;
use crate::types::{BlockPtr, VertexId};

/// One-bit exclusive lock guarding a vertex's chain-head updates.
#[derive(Default)]
pub struct VertexFutex(AtomicU8);

impl VertexFutex {
    /// Attempts to take the lock without blocking.
    pub fn try_lock(&self) -> bool {
        self.0
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Spins until the lock is taken; used by batch loaders.
    pub fn lock(&self) {
        let mut spins = 0u32;
        while !self.try_lock() {
            spins += 1;
            if spins > 64 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    pub fn unlock(&self) {
        self.0.store(0, Ordering::Release);
    }

    /// Resets the bit when a vertex id is (re)issued.
    pub fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

pub struct VertexDirectory {
    vertex_ptrs: Box<[AtomicU64]>,
    edge_label_ptrs: Box<[AtomicU64]>,
    futexes: Box<[VertexFutex]>,
}

impl VertexDirectory {
    pub fn new(capacity: usize) -> Self {
        let nulls = |_| AtomicU64::new(NULL_POINTER);
        Self {
            vertex_ptrs: (0..capacity).map(nulls).collect(),
            edge_label_ptrs: (0..capacity).map(nulls).collect(),
            futexes: (0..capacity).map(|_| VertexFutex::default()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.futexes.len()
    }

    pub fn vertex_ptr(&self, v: VertexId) -> BlockPtr {
        self.vertex_ptrs[v as usize].load(Ordering::Acquire)
    }

    pub fn set_vertex_ptr(&self, v: VertexId, pointer: BlockPtr) {
        self.vertex_ptrs[v as usize].store(pointer, Ordering::Release);
    }

    pub fn edge_label_ptr(&self, v: VertexId) -> BlockPtr {
        self.edge_label_ptrs[v as usize].load(Ordering::Acquire)
    }

    pub fn set_edge_label_ptr(&self, v: VertexId, pointer: BlockPtr) {
        self.edge_label_ptrs[v as usize].store(pointer, Ordering::Release);
    }

    pub fn futex(&self, v: VertexId) -> &VertexFutex {
        &self.futexes[v as usize]
    }

    /// Resets a slot for a freshly issued vertex id.
    pub fn clear_slot(&self, v: VertexId) {
        self.futexes[v as usize].clear();
        self.vertex_ptrs[v as usize].store(NULL_POINTER, Ordering::Release);
        self.edge_label_ptrs[v as usize].store(NULL_POINTER, Ordering::Release);
    }
}
