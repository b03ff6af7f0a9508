//! Transactions: snapshot reads, staged writes, conflict detection, commit.
//!
//! A write transaction never mutates shared state destructively before
//! commit. New blocks are allocated and filled with tentative timestamps
//! (`-local_txn_id` or the rollback sentinel), pointers to them live only in
//! the per-transaction caches, and every cell that must flip at commit is
//! recorded in `staged_cells`. Commit then publishes head pointers, installs
//! packed counters, swings label-directory entries, and finally overwrites
//! all staged cells with the commit epoch — the single step that makes the
//! transaction visible. Abort walks the same list in reverse intent,
//! restoring sentinels and freeing the private blocks.

pub mod iter;

use std::collections::{HashMap, HashSet, VecDeque};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, Ordering};

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::block::layout::{
    EdgeBlockHeader, EdgeEntry, EdgeEntryInit, EdgeLabelBlockHeader, VertexBlockHeader,
    BLOOM_FILTER_PORTION, BLOOM_FILTER_THRESHOLD, EDGE_LABEL_BLOCK_HEADER_LEN,
    EDGE_LABEL_ENTRY_LEN, VERTEX_BLOCK_HEADER_LEN,
};
use crate::block::{BlockManager, NULL_POINTER};
use crate::error::{GraphError, Result};
use crate::graph::directory::VertexDirectory;
use crate::graph::Graph;
use crate::txn::iter::{EdgeIterator, EdgeIteratorVersion};
use crate::types::{
    is_visible, size_to_order, BlockPtr, Label, Timestamp, VertexId, ROLLBACK_TOMBSTONE,
};
use crate::wal::{WalBuffer, VERSION_AT_COMMIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    ReadOnly,
    ReadWrite,
    BatchLoader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    /// An operation failed; only `abort` (or drop) is allowed.
    Poisoned,
    Closed,
}

/// Raw pointer to a timestamp cell inside the arena, staged for the commit
/// or abort sweep.
#[derive(Clone, Copy)]
struct CellPtr(NonNull<AtomicI64>);

impl CellPtr {
    fn of(cell: &AtomicI64) -> Self {
        Self(NonNull::from(cell))
    }

    fn store(&self, value: Timestamp) {
        unsafe { self.0.as_ref() }.store(value, Ordering::Relaxed);
    }
}

// Cells live in the arena, which outlives the transaction; the owning
// transaction is the only writer until commit.
unsafe impl Send for CellPtr {}

pub struct Transaction<'g> {
    graph: &'g Graph,
    mode: TxnMode,
    state: TxnState,
    read_epoch: Timestamp,
    local_txn_id: u64,
    /// `-local_txn_id` for read-write mode; the read epoch for batch mode,
    /// whose writes are immediately visible.
    write_epoch: Timestamp,
    wal: WalBuffer,
    /// Blocks allocated by this transaction, freed wholesale on abort.
    block_cache: Vec<(BlockPtr, u8)>,
    vertex_ptr_cache: HashMap<VertexId, BlockPtr>,
    edge_ptr_cache: HashMap<(VertexId, Label), BlockPtr>,
    /// Staged `(num_entries, data_length)` per touched edge block.
    edge_size_cache: HashMap<BlockPtr, (u32, u32)>,
    /// `(cell, value to restore on abort)`; commit overwrites every cell
    /// with the commit epoch instead.
    staged_cells: SmallVec<[(CellPtr, Timestamp); 16]>,
    new_vertex_cache: Vec<VertexId>,
    recycled_vertex_cache: VecDeque<VertexId>,
    locked_vertices: HashSet<VertexId>,
}

impl<'g> Transaction<'g> {
    pub(crate) fn new(graph: &'g Graph, mode: TxnMode) -> Self {
        let read_epoch = graph.commit_manager().epoch();
        let (local_txn_id, write_epoch) = match mode {
            TxnMode::ReadWrite => {
                let id = graph.allocate_txn_id();
                (id, -(id as i64))
            }
            TxnMode::ReadOnly | TxnMode::BatchLoader => (0, read_epoch),
        };
        debug!(?mode, read_epoch, txn = local_txn_id, "transaction opened");
        Self {
            graph,
            mode,
            state: TxnState::Active,
            read_epoch,
            local_txn_id,
            write_epoch,
            wal: WalBuffer::new(),
            block_cache: Vec::new(),
            vertex_ptr_cache: HashMap::new(),
            edge_ptr_cache: HashMap::new(),
            edge_size_cache: HashMap::new(),
            staged_cells: SmallVec::new(),
            new_vertex_cache: Vec::new(),
            recycled_vertex_cache: VecDeque::new(),
            locked_vertices: HashSet::new(),
        }
    }

    pub fn read_epoch(&self) -> Timestamp {
        self.read_epoch
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == TxnMode::ReadOnly
    }

    fn arena(&self) -> &'g BlockManager {
        self.graph.block_manager()
    }

    fn dir(&self) -> &'g VertexDirectory {
        self.graph.directory()
    }

    fn is_batch(&self) -> bool {
        self.mode == TxnMode::BatchLoader
    }

    fn tentative(&self) -> Timestamp {
        -(self.local_txn_id as i64)
    }

    fn check_valid(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Poisoned => Err(GraphError::InvalidState(
                "transaction must be aborted after an error",
            )),
            TxnState::Closed => Err(GraphError::InvalidState("transaction already closed")),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode == TxnMode::ReadOnly {
            return Err(GraphError::Rollback(
                "write operation on a read-only transaction".into(),
            ));
        }
        Ok(())
    }

    fn check_vertex_id(&self, vertex: VertexId) -> Result<()> {
        if vertex >= self.graph.vertex_id_upper_bound() {
            return Err(GraphError::InvalidVertex(vertex));
        }
        Ok(())
    }

    fn poison_on_err<T>(&mut self, result: &Result<T>) {
        if result.is_err() && self.state == TxnState::Active {
            self.state = TxnState::Poisoned;
        }
    }

    fn stage(&mut self, cell: &AtomicI64, restore: Timestamp) {
        self.staged_cells.push((CellPtr::of(cell), restore));
    }

    // ------------------------------------------------------------------
    // Locking and conflict detection
    // ------------------------------------------------------------------

    /// Takes the vertex's write lock once per transaction; contention is a
    /// rollback, never a block, so writers cannot deadlock.
    fn ensure_vertex_lock(&mut self, vertex: VertexId) -> Result<()> {
        if self.locked_vertices.contains(&vertex) {
            return Ok(());
        }
        if !self.dir().futex(vertex).try_lock() {
            warn!(vertex, txn = self.local_txn_id, "vertex lock contention");
            return Err(GraphError::Rollback(format!(
                "vertex {vertex} is locked by another writer"
            )));
        }
        self.locked_vertices.insert(vertex);
        Ok(())
    }

    /// Fails if another transaction committed a newer version of `vertex`
    /// after this transaction's snapshot. Checked once per vertex; the
    /// result is memoized by the vertex's presence in `vertex_ptr_cache`.
    fn ensure_no_vertex_conflict(&self, vertex: VertexId) -> Result<()> {
        if let Some(block) = self.arena().vertex_block(self.dir().vertex_ptr(vertex)) {
            let creation = block.creation_time().load(Ordering::Relaxed);
            if !is_visible(creation, self.read_epoch, self.local_txn_id) {
                warn!(vertex, txn = self.local_txn_id, "write-write conflict");
                return Err(GraphError::Rollback(format!(
                    "write-write conflict on vertex {vertex}"
                )));
            }
        }
        Ok(())
    }

    /// Edge-head variant of the conflict check: inspects the committed-time
    /// cell of the head edge block for `(src, label)`.
    fn ensure_no_edge_conflict(&self, src: VertexId, label: Label) -> Result<()> {
        let Some(label_block) = self.arena().edge_label_block(self.dir().edge_label_ptr(src))
        else {
            return Ok(());
        };
        let Some(entry) = label_block.find(label) else {
            return Ok(());
        };
        if let Some(block) = self.arena().edge_block(entry.pointer()) {
            let committed = block.committed_time().load(Ordering::Relaxed);
            if !is_visible(committed, self.read_epoch, self.local_txn_id) {
                warn!(src, label, txn = self.local_txn_id, "write-write conflict");
                return Err(GraphError::Rollback(format!(
                    "write-write conflict on vertex {src} label {label}"
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Vertex operations
    // ------------------------------------------------------------------

    /// Allocates a vertex id (recycled ids first when allowed) and resets
    /// its directory slot. The id stays private to this transaction until
    /// commit or abort.
    pub fn new_vertex(&mut self, use_recycled: bool) -> Result<VertexId> {
        let result = self.new_vertex_impl(use_recycled);
        self.poison_on_err(&result);
        result
    }

    fn new_vertex_impl(&mut self, use_recycled: bool) -> Result<VertexId> {
        self.check_valid()?;
        self.check_writable()?;
        let local = if self.is_batch() {
            None
        } else {
            self.recycled_vertex_cache.pop_front()
        };
        let vertex = match local {
            Some(v) => v,
            None => {
                let recycled = if use_recycled {
                    self.graph.try_pop_recycled()
                } else {
                    None
                };
                match recycled {
                    Some(v) => v,
                    None => self.graph.allocate_vertex_id()?,
                }
            }
        };
        self.dir().clear_slot(vertex);
        if !self.is_batch() {
            self.new_vertex_cache.push(vertex);
            self.wal.push_new_vertex(vertex);
        }
        Ok(vertex)
    }

    /// Installs a new version block at the head of `vertex`'s chain.
    pub fn put_vertex(&mut self, vertex: VertexId, data: &[u8]) -> Result<()> {
        let result = self.put_vertex_impl(vertex, data);
        self.poison_on_err(&result);
        result
    }

    fn put_vertex_impl(&mut self, vertex: VertexId, data: &[u8]) -> Result<()> {
        self.check_valid()?;
        self.check_writable()?;
        self.check_vertex_id(vertex)?;
        if self.is_batch() {
            let futex = self.dir().futex(vertex);
            futex.lock();
            let prev = self.dir().vertex_ptr(vertex);
            let result = self.write_vertex_version(vertex, prev, Some(data));
            match result {
                Ok((pointer, _)) => {
                    self.dir().set_vertex_ptr(vertex, pointer);
                    futex.unlock();
                }
                Err(err) => {
                    futex.unlock();
                    return Err(err);
                }
            }
        } else {
            self.ensure_vertex_lock(vertex)?;
            let prev = match self.vertex_ptr_cache.get(&vertex).copied() {
                Some(pointer) => pointer,
                None => {
                    self.ensure_no_vertex_conflict(vertex)?;
                    self.dir().vertex_ptr(vertex)
                }
            };
            let (pointer, order) = self.write_vertex_version(vertex, prev, Some(data))?;
            let block = self.arena().view::<VertexBlockHeader>(pointer);
            self.block_cache.push((pointer, order));
            self.stage(block.creation_time(), ROLLBACK_TOMBSTONE);
            self.vertex_ptr_cache.insert(vertex, pointer);
            self.wal.push_put_vertex(vertex, data);
        }
        self.graph.mark_compaction(vertex);
        Ok(())
    }

    /// Tombstones `vertex`. With `recycle`, the id re-enters the free list
    /// once the transaction commits. Returns whether a live version existed.
    pub fn del_vertex(&mut self, vertex: VertexId, recycle: bool) -> Result<bool> {
        let result = self.del_vertex_impl(vertex, recycle);
        self.poison_on_err(&result);
        result
    }

    fn del_vertex_impl(&mut self, vertex: VertexId, recycle: bool) -> Result<bool> {
        self.check_valid()?;
        self.check_writable()?;
        self.check_vertex_id(vertex)?;
        if self.is_batch() {
            let futex = self.dir().futex(vertex);
            futex.lock();
            let prev = self.dir().vertex_ptr(vertex);
            let live = self
                .arena()
                .vertex_block(prev)
                .map_or(false, |b| !b.is_tombstone());
            if live {
                match self.write_vertex_version(vertex, prev, None) {
                    Ok((pointer, _)) => {
                        self.dir().set_vertex_ptr(vertex, pointer);
                        self.graph.mark_compaction(vertex);
                    }
                    Err(err) => {
                        futex.unlock();
                        return Err(err);
                    }
                }
            }
            if recycle {
                self.graph.push_recycled(vertex);
            }
            futex.unlock();
            Ok(live)
        } else {
            self.ensure_vertex_lock(vertex)?;
            let prev = match self.vertex_ptr_cache.get(&vertex).copied() {
                Some(pointer) => pointer,
                None => {
                    self.ensure_no_vertex_conflict(vertex)?;
                    self.dir().vertex_ptr(vertex)
                }
            };
            let live = self
                .arena()
                .vertex_block(prev)
                .map_or(false, |b| !b.is_tombstone());
            if live {
                let (pointer, order) = self.write_vertex_version(vertex, prev, None)?;
                let block = self.arena().view::<VertexBlockHeader>(pointer);
                self.block_cache.push((pointer, order));
                self.stage(block.creation_time(), ROLLBACK_TOMBSTONE);
                self.vertex_ptr_cache.insert(vertex, pointer);
                self.graph.mark_compaction(vertex);
            }
            self.wal.push_del_vertex(vertex, recycle);
            if recycle {
                self.recycled_vertex_cache.push_back(vertex);
            }
            Ok(live)
        }
    }

    fn write_vertex_version(
        &self,
        vertex: VertexId,
        prev: BlockPtr,
        payload: Option<&[u8]>,
    ) -> Result<(BlockPtr, u8)> {
        let size = VERTEX_BLOCK_HEADER_LEN as u64 + payload.map_or(0, |d| d.len() as u64);
        let order = size_to_order(size);
        let pointer = self.arena().alloc(order)?;
        unsafe {
            VertexBlockHeader::init(
                self.arena().raw(pointer),
                order,
                vertex,
                self.write_epoch,
                prev,
                payload,
            );
        }
        Ok((pointer, order))
    }

    /// Newest version of `vertex` visible at this snapshot, or `None` if the
    /// vertex is absent (never written, or tombstoned).
    pub fn get_vertex(&self, vertex: VertexId) -> Result<Option<&[u8]>> {
        self.check_valid()?;
        if vertex >= self.graph.vertex_id_upper_bound() {
            return Ok(None);
        }
        let mut pointer = self.resolve_vertex_head(vertex);
        while let Some(block) = self.arena().vertex_block(pointer) {
            let creation = block.creation_time().load(Ordering::Relaxed);
            if is_visible(creation, self.read_epoch, self.local_txn_id) {
                return Ok(block.payload());
            }
            pointer = block.prev_pointer();
        }
        Ok(None)
    }

    fn resolve_vertex_head(&self, vertex: VertexId) -> BlockPtr {
        if self.mode == TxnMode::ReadWrite {
            if let Some(&pointer) = self.vertex_ptr_cache.get(&vertex) {
                return pointer;
            }
        }
        self.dir().vertex_ptr(vertex)
    }

    // ------------------------------------------------------------------
    // Edge operations
    // ------------------------------------------------------------------

    /// Writes an edge version. Without `force_insert`, a live entry for the
    /// same destination is logically deleted first, so the pair keeps a
    /// single live version.
    pub fn put_edge(
        &mut self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        data: &[u8],
        force_insert: bool,
    ) -> Result<()> {
        let result = self.put_edge_impl(src, label, dst, data, None, force_insert);
        self.poison_on_err(&result);
        result
    }

    /// Like [`put_edge`](Self::put_edge) but stamps an explicit version
    /// coordinate instead of the commit epoch, and preserves this
    /// transaction's own superseded entries when the block grows.
    pub fn put_edge_with_version(
        &mut self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        data: &[u8],
        version: Timestamp,
        force_insert: bool,
    ) -> Result<()> {
        let result = self.put_edge_impl(src, label, dst, data, Some(version), force_insert);
        self.poison_on_err(&result);
        result
    }

    fn put_edge_impl(
        &mut self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        data: &[u8],
        version: Option<Timestamp>,
        force_insert: bool,
    ) -> Result<()> {
        self.check_valid()?;
        self.check_writable()?;
        self.check_vertex_id(src)?;
        self.check_vertex_id(dst)?;
        if self.is_batch() {
            let futex = self.dir().futex(src);
            futex.lock();
            let result = self.put_edge_locked(src, label, dst, data, version, force_insert);
            futex.unlock();
            result?;
        } else {
            self.ensure_vertex_lock(src)?;
            self.put_edge_locked(src, label, dst, data, version, force_insert)?;
            self.wal.push_put_edge(
                src,
                label,
                dst,
                force_insert,
                version.unwrap_or(VERSION_AT_COMMIT),
                data,
            );
        }
        self.graph.mark_compaction(src);
        Ok(())
    }

    fn put_edge_locked(
        &mut self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        data: &[u8],
        version: Option<Timestamp>,
        force_insert: bool,
    ) -> Result<()> {
        let versioned = version.is_some();
        let mut pointer = if self.is_batch() {
            self.locate_edge_block(src, label)
        } else {
            match self.edge_ptr_cache.get(&(src, label)).copied() {
                Some(p) => p,
                None => {
                    self.ensure_no_edge_conflict(src, label)?;
                    let p = self.locate_edge_block(src, label);
                    self.edge_ptr_cache.insert((src, label), p);
                    p
                }
            }
        };

        let entry_len = data.len() as u64;
        let (mut num_entries, mut data_length) = match self.arena().edge_block(pointer) {
            Some(block) => self.entry_counts(pointer, block),
            None => (0, 0),
        };
        let needs_new = match self.arena().edge_block(pointer) {
            Some(block) => !block.has_space(entry_len, num_entries, data_length),
            None => true,
        };

        if needs_new {
            let new_pointer =
                self.grow_edge_block(src, pointer, num_entries, data_length, entry_len, versioned)?;
            if self.is_batch() {
                self.update_edge_label_block(src, label, new_pointer)?;
            }
            pointer = new_pointer;
            let block = self.arena().view::<EdgeBlockHeader>(pointer);
            let sizes = block.sizes();
            num_entries = sizes.0;
            data_length = sizes.1;
        }

        let block = self.arena().view::<EdgeBlockHeader>(pointer);
        if !force_insert {
            if let Some((entry, _)) = self.find_edge(dst, block, num_entries, data_length) {
                entry.deletion_time().store(self.write_epoch, Ordering::Relaxed);
                if !self.is_batch() {
                    self.stage(entry.deletion_time(), ROLLBACK_TOMBSTONE);
                }
            }
        }

        let init = EdgeEntryInit {
            dst,
            creation: self.write_epoch,
            deletion: ROLLBACK_TOMBSTONE,
            version: version.unwrap_or(self.write_epoch),
            length: entry_len,
        };
        let new_entry = unsafe {
            EdgeBlockHeader::append_without_update_size(
                self.arena().raw(pointer),
                init,
                data,
                num_entries,
                data_length,
            )
        };
        self.set_entry_counts(pointer, num_entries + 1, data_length + entry_len as u32);
        if !self.is_batch() {
            let entry = unsafe { new_entry.as_ref() };
            self.stage(entry.creation_time(), ROLLBACK_TOMBSTONE);
            if version.is_none() {
                // Default versions ride the commit sweep so they equal the
                // commit epoch; explicit versions are never restamped.
                self.stage(entry.version(), ROLLBACK_TOMBSTONE);
            }
            self.edge_ptr_cache.insert((src, label), pointer);
        }
        Ok(())
    }

    /// Allocates a larger edge block and carries forward the surviving
    /// entries of `old_pointer`. Live entries always survive; with
    /// `versioned`, entries superseded *by this transaction* survive too so
    /// an interleaved put+delete keeps its version history.
    fn grow_edge_block(
        &mut self,
        src: VertexId,
        old_pointer: BlockPtr,
        num_entries: u32,
        data_length: u32,
        entry_len: u64,
        versioned: bool,
    ) -> Result<BlockPtr> {
        let mut size = EdgeBlockHeader::projected_size(num_entries, data_length, entry_len);
        let mut order = size_to_order(size);
        let mut bloom_len = 0u32;
        if order > BLOOM_FILTER_PORTION
            && size + (1u64 << (order - BLOOM_FILTER_PORTION)) >= (1u64 << BLOOM_FILTER_THRESHOLD)
        {
            bloom_len = (1u64 << (order - BLOOM_FILTER_PORTION)) as u32;
            size += bloom_len as u64;
            order = size_to_order(size);
        }
        let new_pointer = self.arena().alloc(order)?;
        unsafe {
            EdgeBlockHeader::init(
                self.arena().raw(new_pointer),
                order,
                bloom_len,
                src,
                self.write_epoch,
                old_pointer,
                self.write_epoch,
            );
        }
        if !self.is_batch() {
            self.block_cache.push((new_pointer, order));
            let block = self.arena().view::<EdgeBlockHeader>(new_pointer);
            self.stage(block.creation_time(), ROLLBACK_TOMBSTONE);
        }
        if let Some(old) = self.arena().edge_block(old_pointer) {
            let tentative = self.tentative();
            let mut offset = 0u32;
            for j in 0..num_entries {
                let entry = old.entry(j);
                let data = old.data(offset, entry.length());
                offset += entry.length() as u32;
                let deleted = is_visible(
                    entry.deletion_time().load(Ordering::Relaxed),
                    self.read_epoch,
                    self.local_txn_id,
                );
                // Written by this transaction: the tentative stamp for
                // read-write mode, the (positive) write epoch for batch.
                let own = entry.creation_time().load(Ordering::Relaxed) == self.write_epoch;
                if deleted && !(versioned && own) {
                    continue;
                }
                let carried =
                    unsafe { EdgeBlockHeader::append(self.arena().raw(new_pointer), entry, data) };
                if !self.is_batch() {
                    let carried = unsafe { carried.as_ref() };
                    // Re-stage tentative cells against the copy; the old
                    // block's registrations die with the old block.
                    if carried.creation_time().load(Ordering::Relaxed) == tentative {
                        self.stage(carried.creation_time(), ROLLBACK_TOMBSTONE);
                    }
                    if carried.deletion_time().load(Ordering::Relaxed) == tentative {
                        self.stage(carried.deletion_time(), ROLLBACK_TOMBSTONE);
                    }
                }
            }
        }
        Ok(new_pointer)
    }

    /// Chain scan for the newest edge block of `(src, label)` whose creation
    /// is visible at this snapshot.
    fn locate_edge_block(&self, src: VertexId, label: Label) -> BlockPtr {
        let Some(label_block) = self.arena().edge_label_block(self.dir().edge_label_ptr(src))
        else {
            return NULL_POINTER;
        };
        let Some(entry) = label_block.find(label) else {
            return NULL_POINTER;
        };
        let mut pointer = entry.pointer();
        while let Some(block) = self.arena().edge_block(pointer) {
            let creation = block.creation_time().load(Ordering::Relaxed);
            if is_visible(creation, self.read_epoch, self.local_txn_id) {
                break;
            }
            pointer = block.prev_pointer();
        }
        pointer
    }

    /// Points the label directory of `src` at `pointer`, mutating the
    /// matching entry in place or copy-on-growing the label block.
    fn update_edge_label_block(
        &mut self,
        src: VertexId,
        label: Label,
        pointer: BlockPtr,
    ) -> Result<()> {
        let head = self.dir().edge_label_ptr(src);
        if let Some(label_block) = self.arena().edge_label_block(head) {
            if let Some(entry) = label_block.find(label) {
                entry.set_pointer(pointer);
                return Ok(());
            }
            if unsafe { EdgeLabelBlockHeader::try_append(self.arena().raw(head), label, pointer) } {
                return Ok(());
            }
        }
        let num_entries = self
            .arena()
            .edge_label_block(head)
            .map_or(0, |b| b.num_entries());
        let size = EDGE_LABEL_BLOCK_HEADER_LEN as u64
            + (num_entries as u64 + 1) * EDGE_LABEL_ENTRY_LEN as u64;
        let order = size_to_order(size);
        let new_pointer = self.arena().alloc(order)?;
        unsafe {
            EdgeLabelBlockHeader::init(
                self.arena().raw(new_pointer),
                order,
                src,
                self.write_epoch,
                head,
            );
        }
        if !self.is_batch() {
            self.block_cache.push((new_pointer, order));
            let block = self.arena().view::<EdgeLabelBlockHeader>(new_pointer);
            self.stage(block.creation_time(), ROLLBACK_TOMBSTONE);
        }
        if let Some(old) = self.arena().edge_label_block(head) {
            for entry in old.entries() {
                unsafe {
                    EdgeLabelBlockHeader::try_append(
                        self.arena().raw(new_pointer),
                        entry.label(),
                        entry.pointer(),
                    );
                }
            }
        }
        unsafe {
            EdgeLabelBlockHeader::try_append(self.arena().raw(new_pointer), label, pointer);
        }
        self.dir().set_edge_label_ptr(src, new_pointer);
        Ok(())
    }

    fn entry_counts(&self, pointer: BlockPtr, block: &EdgeBlockHeader) -> (u32, u32) {
        if self.mode == TxnMode::ReadWrite {
            if let Some(&cached) = self.edge_size_cache.get(&pointer) {
                return cached;
            }
        }
        block.sizes()
    }

    fn set_entry_counts(&mut self, pointer: BlockPtr, num_entries: u32, data_length: u32) {
        if self.is_batch() {
            self.arena()
                .view::<EdgeBlockHeader>(pointer)
                .set_sizes(num_entries, data_length);
        } else {
            self.edge_size_cache
                .insert(pointer, (num_entries, data_length));
        }
    }

    /// Newest live entry for `dst`, with its payload.
    fn find_edge<'a>(
        &self,
        dst: VertexId,
        block: &'a EdgeBlockHeader,
        num_entries: u32,
        data_length: u32,
    ) -> Option<(&'a EdgeEntry, &'a [u8])> {
        if let Some(bloom) = block.bloom() {
            if !bloom.may_contain(dst) {
                return None;
            }
        }
        let mut offset = data_length;
        for j in (0..num_entries).rev() {
            let entry = block.entry(j);
            offset -= entry.length() as u32;
            if entry.dst() == dst
                && is_visible(
                    entry.creation_time().load(Ordering::Relaxed),
                    self.read_epoch,
                    self.local_txn_id,
                )
                && !is_visible(
                    entry.deletion_time().load(Ordering::Relaxed),
                    self.read_epoch,
                    self.local_txn_id,
                )
            {
                return Some((entry, block.data(offset, entry.length())));
            }
        }
        None
    }

    /// All entries for `dst` with a version in `[start, end]`, newest first.
    /// Deletion cells are ignored: superseded versions remain readable
    /// through their version coordinate.
    fn find_edge_with_version<'a>(
        &self,
        dst: VertexId,
        block: &'a EdgeBlockHeader,
        num_entries: u32,
        data_length: u32,
        start: Timestamp,
        end: Timestamp,
    ) -> Vec<(&'a EdgeEntry, &'a [u8])> {
        let mut found = Vec::new();
        if let Some(bloom) = block.bloom() {
            if !bloom.may_contain(dst) {
                return found;
            }
        }
        let mut offset = data_length;
        for j in (0..num_entries).rev() {
            let entry = block.entry(j);
            offset -= entry.length() as u32;
            if entry.dst() != dst {
                continue;
            }
            if !is_visible(
                entry.creation_time().load(Ordering::Relaxed),
                self.read_epoch,
                self.local_txn_id,
            ) {
                continue;
            }
            let version = entry.version().load(Ordering::Relaxed);
            if start <= version && version <= end {
                found.push((entry, block.data(offset, entry.length())));
            }
        }
        found
    }

    /// Payload of the newest live edge `(src, label, dst)`.
    pub fn get_edge(&self, src: VertexId, label: Label, dst: VertexId) -> Result<Option<&[u8]>> {
        self.check_valid()?;
        if src >= self.graph.vertex_id_upper_bound() {
            return Ok(None);
        }
        let pointer = self.resolve_edge_head(src, label);
        let Some(block) = self.arena().edge_block(pointer) else {
            return Ok(None);
        };
        let (num_entries, data_length) = self.entry_counts(pointer, block);
        Ok(self
            .find_edge(dst, block, num_entries, data_length)
            .map(|(_, data)| data))
    }

    /// Payloads of every `(src, label, dst)` entry whose version lies in
    /// `[start, end]`, newest first.
    pub fn get_edge_with_version(
        &self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<&[u8]>> {
        self.check_valid()?;
        if src >= self.graph.vertex_id_upper_bound() {
            return Ok(Vec::new());
        }
        let pointer = self.resolve_edge_head(src, label);
        let Some(block) = self.arena().edge_block(pointer) else {
            return Ok(Vec::new());
        };
        let (num_entries, data_length) = self.entry_counts(pointer, block);
        Ok(self
            .find_edge_with_version(dst, block, num_entries, data_length, start, end)
            .into_iter()
            .map(|(_, data)| data)
            .collect())
    }

    /// Logically deletes the live entry for `(src, label, dst)`. Returns
    /// whether an entry was found.
    pub fn del_edge(&mut self, src: VertexId, label: Label, dst: VertexId) -> Result<bool> {
        let result = self.del_edge_impl(src, label, dst);
        self.poison_on_err(&result);
        result
    }

    fn del_edge_impl(&mut self, src: VertexId, label: Label, dst: VertexId) -> Result<bool> {
        self.check_valid()?;
        self.check_writable()?;
        self.check_vertex_id(src)?;
        self.check_vertex_id(dst)?;
        let found;
        if self.is_batch() {
            let futex = self.dir().futex(src);
            futex.lock();
            let result = self.del_edge_locked(src, label, dst);
            futex.unlock();
            found = result?;
        } else {
            self.ensure_vertex_lock(src)?;
            found = self.del_edge_locked(src, label, dst)?;
            self.wal.push_del_edge(src, label, dst);
        }
        self.graph.mark_compaction(src);
        Ok(found)
    }

    fn del_edge_locked(&mut self, src: VertexId, label: Label, dst: VertexId) -> Result<bool> {
        let pointer = if self.is_batch() {
            self.locate_edge_block(src, label)
        } else {
            match self.edge_ptr_cache.get(&(src, label)).copied() {
                Some(p) => p,
                None => {
                    self.ensure_no_edge_conflict(src, label)?;
                    let p = self.locate_edge_block(src, label);
                    self.edge_ptr_cache.insert((src, label), p);
                    p
                }
            }
        };
        let Some(block) = self.arena().edge_block(pointer) else {
            return Ok(false);
        };
        let (num_entries, data_length) = self.entry_counts(pointer, block);
        let found = self.find_edge(dst, block, num_entries, data_length);
        let was_found = found.is_some();
        if let Some((entry, _)) = found {
            entry.deletion_time().store(self.write_epoch, Ordering::Relaxed);
            if !self.is_batch() {
                self.stage(entry.deletion_time(), ROLLBACK_TOMBSTONE);
            }
        }
        if !self.is_batch() {
            // Even a pure delete must bump the block's committed time at
            // commit so later writers detect the conflict window.
            self.set_entry_counts(pointer, num_entries, data_length);
            self.edge_ptr_cache.insert((src, label), pointer);
        }
        Ok(was_found)
    }

    fn resolve_edge_head(&self, src: VertexId, label: Label) -> BlockPtr {
        if self.mode == TxnMode::ReadWrite {
            if let Some(&pointer) = self.edge_ptr_cache.get(&(src, label)) {
                return pointer;
            }
        }
        self.locate_edge_block(src, label)
    }

    /// Snapshot-filtered cursor over the live entries of `(src, label)`.
    /// Newest first; `reverse` walks oldest first.
    pub fn get_edges(
        &self,
        src: VertexId,
        label: Label,
        reverse: bool,
    ) -> Result<EdgeIterator<'_>> {
        self.check_valid()?;
        if src >= self.graph.vertex_id_upper_bound() {
            return Ok(EdgeIterator::new(
                None,
                0,
                0,
                self.read_epoch,
                self.local_txn_id,
                reverse,
            ));
        }
        let pointer = self.resolve_edge_head(src, label);
        match self.arena().edge_block(pointer) {
            Some(block) => {
                let (num_entries, data_length) = self.entry_counts(pointer, block);
                Ok(EdgeIterator::new(
                    Some(block),
                    num_entries,
                    data_length,
                    self.read_epoch,
                    self.local_txn_id,
                    reverse,
                ))
            }
            None => Ok(EdgeIterator::new(
                None,
                0,
                0,
                self.read_epoch,
                self.local_txn_id,
                reverse,
            )),
        }
    }

    /// Like [`get_edges`](Self::get_edges), additionally filtering entries
    /// to versions within `[start, end]`.
    pub fn get_edges_with_version(
        &self,
        src: VertexId,
        label: Label,
        start: Timestamp,
        end: Timestamp,
        reverse: bool,
    ) -> Result<EdgeIteratorVersion<'_>> {
        let inner = self.get_edges(src, label, reverse)?;
        Ok(EdgeIteratorVersion::new(inner, start, end))
    }

    // ------------------------------------------------------------------
    // Commit / abort
    // ------------------------------------------------------------------

    /// Commits the transaction and returns its epoch. Read-only and batch
    /// transactions return their read epoch: reads have nothing to publish
    /// and batch writes were published synchronously.
    ///
    /// With `wait_visible`, blocks until every earlier epoch has finished,
    /// so any reader opened afterwards observes this transaction.
    pub fn commit(&mut self, wait_visible: bool) -> Result<Timestamp> {
        self.check_valid()?;
        match self.mode {
            TxnMode::ReadOnly => {
                self.state = TxnState::Closed;
                Ok(self.read_epoch)
            }
            TxnMode::BatchLoader => {
                self.clean();
                self.state = TxnState::Closed;
                debug!(epoch = self.read_epoch, "batch load finished");
                Ok(self.read_epoch)
            }
            TxnMode::ReadWrite => {
                let result = self.commit_read_write(wait_visible);
                self.poison_on_err(&result);
                result
            }
        }
    }

    fn commit_read_write(&mut self, wait_visible: bool) -> Result<Timestamp> {
        let (commit_epoch, unfinished_before) =
            self.graph.commit_manager().register_commit(&self.wal)?;

        let result = self.install_commit(commit_epoch);
        if result.is_err() {
            // Allocation failure mid-install: restore every staged cell so
            // nothing becomes visible, but keep the epoch stream contiguous.
            for (cell, restore) in &self.staged_cells {
                cell.store(*restore);
            }
        }
        self.clean();
        self.graph
            .commit_manager()
            .finish_commit(commit_epoch, unfinished_before, wait_visible);
        result?;
        self.state = TxnState::Closed;
        debug!(epoch = commit_epoch, txn = self.local_txn_id, "transaction committed");
        Ok(commit_epoch)
    }

    fn install_commit(&mut self, commit_epoch: Timestamp) -> Result<()> {
        // Publish vertex chain heads.
        for (&vertex, &pointer) in &self.vertex_ptr_cache {
            if self.dir().vertex_ptr(vertex) != pointer {
                self.dir().set_vertex_ptr(vertex, pointer);
            }
        }
        // Hand deleted ids to the graph-wide free list.
        while let Some(vertex) = self.recycled_vertex_cache.pop_front() {
            self.graph.push_recycled(vertex);
        }
        // Install packed counters and bump committed-time cells; the cells
        // join the staged sweep so they end up at the commit epoch.
        let installs: Vec<(BlockPtr, (u32, u32))> = self
            .edge_size_cache
            .iter()
            .map(|(&pointer, &counts)| (pointer, counts))
            .collect();
        for (pointer, (num_entries, data_length)) in installs {
            let block = self.arena().view::<EdgeBlockHeader>(pointer);
            block.set_sizes(num_entries, data_length);
            let committed = block.committed_time().load(Ordering::Relaxed);
            self.staged_cells
                .push((CellPtr::of(block.committed_time()), committed));
            block.committed_time().store(self.write_epoch, Ordering::Relaxed);
        }
        // Swing label-directory heads for chains that gained a block.
        let heads: Vec<((VertexId, Label), BlockPtr)> = self
            .edge_ptr_cache
            .iter()
            .map(|(&key, &pointer)| (key, pointer))
            .collect();
        for ((src, label), pointer) in heads {
            if self.locate_edge_block(src, label) != pointer {
                self.update_edge_label_block(src, label, pointer)?;
            }
        }
        // The single visibility step: stamp every staged cell at once.
        for (cell, _) in &self.staged_cells {
            cell.store(commit_epoch);
        }
        Ok(())
    }

    /// Rolls the transaction back: staged cells return to their pre-write
    /// values, freshly allocated ids re-enter the free list, and private
    /// blocks are freed. Batch writes were published synchronously and are
    /// not undone.
    pub fn abort(&mut self) -> Result<()> {
        if self.state == TxnState::Closed {
            return Err(GraphError::InvalidState("transaction already closed"));
        }
        if self.mode == TxnMode::ReadWrite {
            self.rollback_work();
        } else {
            self.clean();
        }
        self.state = TxnState::Closed;
        debug!(txn = self.local_txn_id, "transaction aborted");
        Ok(())
    }

    fn rollback_work(&mut self) {
        for (cell, restore) in &self.staged_cells {
            cell.store(*restore);
        }
        for &vertex in &self.new_vertex_cache {
            self.graph.push_recycled(vertex);
        }
        for &(pointer, order) in &self.block_cache {
            self.arena().free(pointer, order);
        }
        self.clean();
    }

    fn clean(&mut self) {
        for &vertex in &self.locked_vertices {
            self.dir().futex(vertex).unlock();
        }
        self.locked_vertices.clear();
        self.vertex_ptr_cache.clear();
        self.edge_ptr_cache.clear();
        self.edge_size_cache.clear();
        self.staged_cells.clear();
        self.block_cache.clear();
        self.new_vertex_cache.clear();
        self.recycled_vertex_cache.clear();
        self.wal.clear();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxnState::Closed {
            return;
        }
        match self.mode {
            TxnMode::ReadOnly => {}
            TxnMode::ReadWrite => {
                warn!(
                    txn = self.local_txn_id,
                    "write transaction dropped without commit; rolling back"
                );
                self.rollback_work();
            }
            TxnMode::BatchLoader => self.clean(),
        }
    }
}
