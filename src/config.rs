//! Construction-time tuning for a [`Graph`](crate::Graph).

/// How aggressively the write-ahead log is flushed to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every committed transaction's frame.
    Full,
    /// Leave flushing to the OS; frames are still written in commit order.
    Off,
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Size of the block arena in bytes. The backing file is sparse, so a
    /// generous default costs only address space until blocks are touched.
    pub block_capacity: u64,
    /// Number of vertex directory slots preallocated at open.
    pub max_vertices: u64,
    /// WAL durability mode.
    pub sync_mode: SyncMode,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            block_capacity: 1 << 30,
            max_vertices: 1 << 20,
            sync_mode: SyncMode::Full,
        }
    }
}

impl GraphConfig {
    /// Small footprint preset for tests and tools.
    pub fn small() -> Self {
        Self {
            block_capacity: 1 << 24,
            max_vertices: 1 << 14,
            sync_mode: SyncMode::Off,
        }
    }

    /// Bulk-load preset: large arena, no per-commit fsync.
    pub fn bulk_load() -> Self {
        Self {
            block_capacity: 1 << 32,
            max_vertices: 1 << 26,
            sync_mode: SyncMode::Off,
        }
    }
}
