//! Process-wide graph root.

pub mod directory;
pub mod epoch;

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::block::BlockManager;
use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::graph::directory::VertexDirectory;
use crate::graph::epoch::CommitManager;
use crate::txn::{Transaction, TxnMode};
use crate::types::{Timestamp, VertexId};
use crate::wal::WalWriter;

/// Point-in-time counters for harnesses and tests.
#[derive(Debug, Clone, Copy)]
pub struct GraphStats {
    /// High-water mark of issued vertex ids.
    pub max_vertex_id: VertexId,
    /// Bytes consumed from the arena bump region.
    pub arena_used: u64,
    /// Current visible commit epoch.
    pub epoch: Timestamp,
}

/// Owns the arena, the vertex directory, the commit manager, the recycled-id
/// queue, and the compaction candidate set. Transactions borrow it; drop the
/// graph only after every transaction has ended.
pub struct Graph {
    config: GraphConfig,
    block_manager: BlockManager,
    directory: VertexDirectory,
    commit_manager: CommitManager,
    recycled_vertex_ids: Mutex<VecDeque<VertexId>>,
    compact_candidates: Mutex<HashSet<VertexId>>,
    next_vertex_id: AtomicU64,
    next_txn_id: AtomicU64,
}

impl Graph {
    /// Opens a graph over a block-storage path and a WAL path.
    pub fn open(block_path: &Path, wal_path: &Path) -> Result<Self> {
        Self::open_with_config(block_path, wal_path, GraphConfig::default())
    }

    pub fn open_with_config(
        block_path: &Path,
        wal_path: &Path,
        config: GraphConfig,
    ) -> Result<Self> {
        let block_manager = BlockManager::open(block_path, config.block_capacity)?;
        let wal = WalWriter::create(wal_path, config.sync_mode)?;
        let directory = VertexDirectory::new(config.max_vertices as usize);
        info!(
            block_path = %block_path.display(),
            wal_path = %wal_path.display(),
            capacity = config.block_capacity,
            max_vertices = config.max_vertices,
            "graph opened"
        );
        Ok(Self {
            config,
            block_manager,
            directory,
            commit_manager: CommitManager::new(wal),
            recycled_vertex_ids: Mutex::new(VecDeque::new()),
            compact_candidates: Mutex::new(HashSet::new()),
            next_vertex_id: AtomicU64::new(0),
            next_txn_id: AtomicU64::new(1),
        })
    }

    /// Opens a read-write transaction snapshotted at the current epoch.
    pub fn begin_transaction(&self) -> Transaction<'_> {
        Transaction::new(self, TxnMode::ReadWrite)
    }

    /// Opens a read-only transaction; it can never fail or block writers.
    pub fn begin_read_only_transaction(&self) -> Transaction<'_> {
        Transaction::new(self, TxnMode::ReadOnly)
    }

    /// Opens a bulk loader that publishes synchronously under the vertex
    /// locks, bypassing the WAL and commit staging. Not safe to mix with
    /// concurrent read-write transactions on overlapping vertices.
    pub fn begin_batch_loader(&self) -> Transaction<'_> {
        Transaction::new(self, TxnMode::BatchLoader)
    }

    /// Current visible commit epoch.
    pub fn epoch(&self) -> Timestamp {
        self.commit_manager.epoch()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            max_vertex_id: self.next_vertex_id.load(Ordering::Relaxed),
            arena_used: self.block_manager.used(),
            epoch: self.epoch(),
        }
    }

    /// Drains the set of vertices touched since the last call; input for an
    /// external compactor.
    pub fn compaction_candidates(&self) -> Vec<VertexId> {
        self.compact_candidates.lock().drain().collect()
    }

    /// Forces the WAL to stable storage.
    pub fn sync_wal(&self) -> Result<()> {
        self.commit_manager.sync_wal()
    }

    pub(crate) fn block_manager(&self) -> &BlockManager {
        &self.block_manager
    }

    pub(crate) fn directory(&self) -> &VertexDirectory {
        &self.directory
    }

    pub(crate) fn commit_manager(&self) -> &CommitManager {
        &self.commit_manager
    }

    pub(crate) fn allocate_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Issues a fresh vertex id, growing the dense id space by one.
    pub(crate) fn allocate_vertex_id(&self) -> Result<VertexId> {
        let id = self.next_vertex_id.fetch_add(1, Ordering::Relaxed);
        if id >= self.config.max_vertices {
            return Err(GraphError::Capacity("vertex directory full"));
        }
        Ok(id)
    }

    /// Upper bound (exclusive) of ids issued so far.
    pub(crate) fn vertex_id_upper_bound(&self) -> VertexId {
        self.next_vertex_id.load(Ordering::Relaxed)
    }

    pub(crate) fn try_pop_recycled(&self) -> Option<VertexId> {
        self.recycled_vertex_ids.lock().pop_front()
    }

    pub(crate) fn push_recycled(&self, v: VertexId) {
        self.recycled_vertex_ids.lock().push_back(v);
    }

    pub(crate) fn mark_compaction(&self, v: VertexId) {
        self.compact_candidates.lock().insert(v);
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        if let Err(err) = self.commit_manager.sync_wal() {
            debug!(%err, "wal sync on close failed");
        }
    }
}
