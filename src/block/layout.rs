//! Byte-exact block layouts.
//!
//! Three record families live in the arena, distinguished by which pointer
//! slot reaches them rather than by a runtime tag:
//!
//! ```text
//! vertex_ptrs[v]     -> VertexBlockHeader   (version chain, newest first)
//! edge_label_ptrs[v] -> EdgeLabelBlockHeader (label -> edge block directory)
//! label entry        -> EdgeBlockHeader      (edge version multiset)
//! ```
//!
//! Every header carries its own `order`, so a block is self-describing for
//! `free` and for the external compactor. Cells that are mutated after a
//! block becomes reachable (timestamps, packed counters, label pointers) are
//! atomics; everything else is written exactly once by the `init`/append
//! routines before the block is published.
//!
//! Edge block interior:
//!
//! ```text
//! +--------------+-------------+--------------->     <---------------+
//! | header (48B) | bloom (opt) | edge data ...       ... EdgeEntry[] |
//! +--------------+-------------+--------------->     <---------------+
//! 0              48            48+bloom_len                   2^order
//! ```
//!
//! Entry `j` (insertion order) sits at `2^order - (j+1) * 40`; its payload
//! starts at the sum of the lengths of entries `0..j` within the data heap.

use std::mem;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU64, Ordering};

use crate::block::bloom::BloomFilter;
use crate::types::{BlockPtr, Label, Timestamp, VertexId, TOMBSTONE_LEN};

/// Edge blocks with `order > BLOOM_FILTER_PORTION` reserve
/// `2^(order - BLOOM_FILTER_PORTION)` bytes for a bloom filter when the
/// projected block size reaches `2^BLOOM_FILTER_THRESHOLD`.
pub const BLOOM_FILTER_PORTION: u8 = 8;
pub const BLOOM_FILTER_THRESHOLD: u8 = 12;

pub const VERTEX_BLOCK_HEADER_LEN: usize = mem::size_of::<VertexBlockHeader>();
pub const EDGE_LABEL_BLOCK_HEADER_LEN: usize = mem::size_of::<EdgeLabelBlockHeader>();
pub const EDGE_LABEL_ENTRY_LEN: usize = mem::size_of::<EdgeLabelEntry>();
pub const EDGE_BLOCK_HEADER_LEN: usize = mem::size_of::<EdgeBlockHeader>();
pub const EDGE_ENTRY_LEN: usize = mem::size_of::<EdgeEntry>();

/// One version of a vertex payload; versions form a chain via `prev_pointer`.
#[repr(C)]
pub struct VertexBlockHeader {
    order: u8,
    _reserved: [u8; 7],
    vertex_id: u64,
    creation_time: AtomicI64,
    prev_pointer: u64,
    /// Payload byte count, or [`TOMBSTONE_LEN`] for a deletion record.
    length: u64,
}

impl VertexBlockHeader {
    /// Writes a fresh vertex block. `payload == None` produces a tombstone.
    ///
    /// # Safety
    ///
    /// `block` must point at an unpublished allocation of at least
    /// `VERTEX_BLOCK_HEADER_LEN + payload.len()` bytes.
    pub unsafe fn init(
        block: NonNull<VertexBlockHeader>,
        order: u8,
        vertex_id: VertexId,
        creation: Timestamp,
        prev_pointer: BlockPtr,
        payload: Option<&[u8]>,
    ) {
        let p = block.as_ptr();
        ptr::addr_of_mut!((*p).order).write(order);
        ptr::addr_of_mut!((*p)._reserved).write([0; 7]);
        ptr::addr_of_mut!((*p).vertex_id).write(vertex_id);
        ptr::addr_of_mut!((*p).creation_time).write(AtomicI64::new(creation));
        ptr::addr_of_mut!((*p).prev_pointer).write(prev_pointer);
        match payload {
            Some(data) => {
                ptr::addr_of_mut!((*p).length).write(data.len() as u64);
                let dst = p.cast::<u8>().add(VERTEX_BLOCK_HEADER_LEN);
                ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
            }
            None => {
                ptr::addr_of_mut!((*p).length).write(TOMBSTONE_LEN);
            }
        }
    }

    pub fn order(&self) -> u8 {
        self.order
    }

    pub fn vertex_id(&self) -> VertexId {
        self.vertex_id
    }

    pub fn creation_time(&self) -> &AtomicI64 {
        &self.creation_time
    }

    pub fn prev_pointer(&self) -> BlockPtr {
        self.prev_pointer
    }

    pub fn is_tombstone(&self) -> bool {
        self.length == TOMBSTONE_LEN
    }

    /// Payload bytes, or `None` for a tombstone record.
    pub fn payload(&self) -> Option<&[u8]> {
        if self.is_tombstone() {
            return None;
        }
        let base = self as *const Self as *const u8;
        unsafe {
            Some(slice::from_raw_parts(
                base.add(VERTEX_BLOCK_HEADER_LEN),
                self.length as usize,
            ))
        }
    }
}

/// Per-vertex directory mapping labels to their edge block chains.
#[repr(C)]
pub struct EdgeLabelBlockHeader {
    order: u8,
    _reserved: [u8; 5],
    num_entries: AtomicU16,
    src: u64,
    creation_time: AtomicI64,
    prev_pointer: u64,
}

#[repr(C)]
pub struct EdgeLabelEntry {
    label: u16,
    _reserved: [u8; 6],
    pointer: AtomicU64,
}

impl EdgeLabelEntry {
    pub fn label(&self) -> Label {
        self.label
    }

    pub fn pointer(&self) -> BlockPtr {
        self.pointer.load(Ordering::Acquire)
    }

    /// Swings this label's head edge block; called at commit under the
    /// owning vertex's lock.
    pub fn set_pointer(&self, pointer: BlockPtr) {
        self.pointer.store(pointer, Ordering::Release);
    }
}

impl EdgeLabelBlockHeader {
    /// # Safety
    ///
    /// `block` must point at an unpublished allocation of `2^order` bytes.
    pub unsafe fn init(
        block: NonNull<EdgeLabelBlockHeader>,
        order: u8,
        src: VertexId,
        creation: Timestamp,
        prev_pointer: BlockPtr,
    ) {
        let p = block.as_ptr();
        ptr::addr_of_mut!((*p).order).write(order);
        ptr::addr_of_mut!((*p)._reserved).write([0; 5]);
        ptr::addr_of_mut!((*p).num_entries).write(AtomicU16::new(0));
        ptr::addr_of_mut!((*p).src).write(src);
        ptr::addr_of_mut!((*p).creation_time).write(AtomicI64::new(creation));
        ptr::addr_of_mut!((*p).prev_pointer).write(prev_pointer);
    }

    /// Appends a `(label, pointer)` entry; `false` when the block is full.
    ///
    /// # Safety
    ///
    /// Caller must hold the owning vertex's lock; single writer per block.
    pub unsafe fn try_append(
        block: NonNull<EdgeLabelBlockHeader>,
        label: Label,
        pointer: BlockPtr,
    ) -> bool {
        let hdr = block.as_ref();
        let n = hdr.num_entries.load(Ordering::Relaxed);
        if n >= hdr.capacity() {
            return false;
        }
        let slot = block
            .as_ptr()
            .cast::<u8>()
            .add(EDGE_LABEL_BLOCK_HEADER_LEN)
            .cast::<EdgeLabelEntry>()
            .add(n as usize);
        ptr::addr_of_mut!((*slot).label).write(label);
        ptr::addr_of_mut!((*slot)._reserved).write([0; 6]);
        ptr::addr_of_mut!((*slot).pointer).write(AtomicU64::new(pointer));
        hdr.num_entries.store(n + 1, Ordering::Release);
        true
    }

    pub fn order(&self) -> u8 {
        self.order
    }

    pub fn src(&self) -> VertexId {
        self.src
    }

    pub fn creation_time(&self) -> &AtomicI64 {
        &self.creation_time
    }

    pub fn prev_pointer(&self) -> BlockPtr {
        self.prev_pointer
    }

    pub fn num_entries(&self) -> u16 {
        self.num_entries.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u16 {
        let room = (1u64 << self.order) - EDGE_LABEL_BLOCK_HEADER_LEN as u64;
        (room / EDGE_LABEL_ENTRY_LEN as u64).min(u16::MAX as u64) as u16
    }

    /// Currently published entries.
    pub fn entries(&self) -> &[EdgeLabelEntry] {
        let n = self.num_entries() as usize;
        let base = self as *const Self as *const u8;
        unsafe {
            slice::from_raw_parts(
                base.add(EDGE_LABEL_BLOCK_HEADER_LEN) as *const EdgeLabelEntry,
                n,
            )
        }
    }

    /// Looks up the head edge block pointer for `label`.
    pub fn find(&self, label: Label) -> Option<&EdgeLabelEntry> {
        self.entries().iter().find(|e| e.label() == label)
    }
}

/// Capacity-bounded multiset of edge versions for one `(src, label)`.
#[repr(C)]
pub struct EdgeBlockHeader {
    order: u8,
    _reserved: [u8; 3],
    /// Bytes reserved for the bloom region; zero means no filter.
    bloom_len: u32,
    src: u64,
    creation_time: AtomicI64,
    committed_time: AtomicI64,
    prev_pointer: u64,
    /// Packed `(num_entries: u32, data_length: u32)`, installed together so
    /// readers never observe an entry without its data heap extent.
    sizes: AtomicU64,
}

/// Field values for a freshly appended [`EdgeEntry`].
#[derive(Clone, Copy, Debug)]
pub struct EdgeEntryInit {
    pub dst: VertexId,
    pub creation: Timestamp,
    pub deletion: Timestamp,
    pub version: Timestamp,
    pub length: u64,
}

/// One edge version. `creation`/`deletion` drive snapshot liveness; the
/// `version` cell carries the user-visible version coordinate.
#[repr(C)]
pub struct EdgeEntry {
    dst: u64,
    creation_time: AtomicI64,
    deletion_time: AtomicI64,
    version: AtomicI64,
    length: u64,
}

impl EdgeEntry {
    pub fn dst(&self) -> VertexId {
        self.dst
    }

    pub fn creation_time(&self) -> &AtomicI64 {
        &self.creation_time
    }

    pub fn deletion_time(&self) -> &AtomicI64 {
        &self.deletion_time
    }

    pub fn version(&self) -> &AtomicI64 {
        &self.version
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}

unsafe fn write_entry(slot: *mut EdgeEntry, init: EdgeEntryInit) {
    ptr::addr_of_mut!((*slot).dst).write(init.dst);
    ptr::addr_of_mut!((*slot).creation_time).write(AtomicI64::new(init.creation));
    ptr::addr_of_mut!((*slot).deletion_time).write(AtomicI64::new(init.deletion));
    ptr::addr_of_mut!((*slot).version).write(AtomicI64::new(init.version));
    ptr::addr_of_mut!((*slot).length).write(init.length);
}

impl EdgeBlockHeader {
    /// Arena footprint of a block holding `num_entries` entries plus one
    /// more of `entry_len` payload bytes, before any bloom reservation.
    pub fn projected_size(num_entries: u32, data_length: u32, entry_len: u64) -> u64 {
        EDGE_BLOCK_HEADER_LEN as u64
            + (num_entries as u64 + 1) * EDGE_ENTRY_LEN as u64
            + data_length as u64
            + entry_len
    }

    /// # Safety
    ///
    /// `block` must point at an unpublished allocation of `2^order` bytes
    /// with `bloom_len + EDGE_BLOCK_HEADER_LEN <= 2^order`.
    pub unsafe fn init(
        block: NonNull<EdgeBlockHeader>,
        order: u8,
        bloom_len: u32,
        src: VertexId,
        creation: Timestamp,
        prev_pointer: BlockPtr,
        committed: Timestamp,
    ) {
        let p = block.as_ptr();
        ptr::addr_of_mut!((*p).order).write(order);
        ptr::addr_of_mut!((*p)._reserved).write([0; 3]);
        ptr::addr_of_mut!((*p).bloom_len).write(bloom_len);
        ptr::addr_of_mut!((*p).src).write(src);
        ptr::addr_of_mut!((*p).creation_time).write(AtomicI64::new(creation));
        ptr::addr_of_mut!((*p).committed_time).write(AtomicI64::new(committed));
        ptr::addr_of_mut!((*p).prev_pointer).write(prev_pointer);
        ptr::addr_of_mut!((*p).sizes).write(AtomicU64::new(0));
        if bloom_len > 0 {
            // Recycled blocks may carry stale bits; start clean.
            let bloom = p.cast::<u8>().add(EDGE_BLOCK_HEADER_LEN);
            ptr::write_bytes(bloom, 0, bloom_len as usize);
        }
    }

    /// Copies a surviving entry (and its payload) from an older block.
    /// Updates the packed counters directly; the new block is not yet
    /// reachable by other transactions.
    ///
    /// # Safety
    ///
    /// `block` must be an unpublished edge block with room for the entry,
    /// and `data` must be the payload matching `entry.length()`.
    pub unsafe fn append(
        block: NonNull<EdgeBlockHeader>,
        entry: &EdgeEntry,
        data: &[u8],
    ) -> NonNull<EdgeEntry> {
        let hdr = block.as_ref();
        let (num_entries, data_length) = hdr.sizes();
        let slot = hdr.entry_slot(num_entries);
        write_entry(
            slot,
            EdgeEntryInit {
                dst: entry.dst(),
                creation: entry.creation_time().load(Ordering::Relaxed),
                deletion: entry.deletion_time().load(Ordering::Relaxed),
                version: entry.version().load(Ordering::Relaxed),
                length: entry.length(),
            },
        );
        let heap = hdr.data_base().add(data_length as usize) as *mut u8;
        ptr::copy_nonoverlapping(data.as_ptr(), heap, data.len());
        if let Some(bloom) = hdr.bloom() {
            bloom.insert(entry.dst());
        }
        hdr.set_sizes(num_entries + 1, data_length + data.len() as u32);
        NonNull::new_unchecked(slot)
    }

    /// Writes a new entry and payload at the caller-supplied extents without
    /// touching the packed counters; a write transaction keeps the counters
    /// in its private cache until commit installs them.
    ///
    /// # Safety
    ///
    /// Caller must hold the owning vertex's lock, `(num_entries,
    /// data_length)` must be the block's staged extents, and the block must
    /// have space for the entry.
    pub unsafe fn append_without_update_size(
        block: NonNull<EdgeBlockHeader>,
        init: EdgeEntryInit,
        data: &[u8],
        num_entries: u32,
        data_length: u32,
    ) -> NonNull<EdgeEntry> {
        let hdr = block.as_ref();
        debug_assert_eq!(init.length, data.len() as u64);
        let slot = hdr.entry_slot(num_entries);
        write_entry(slot, init);
        let heap = hdr.data_base().add(data_length as usize) as *mut u8;
        ptr::copy_nonoverlapping(data.as_ptr(), heap, data.len());
        if let Some(bloom) = hdr.bloom() {
            bloom.insert(init.dst);
        }
        NonNull::new_unchecked(slot)
    }

    pub fn order(&self) -> u8 {
        self.order
    }

    pub fn src(&self) -> VertexId {
        self.src
    }

    pub fn creation_time(&self) -> &AtomicI64 {
        &self.creation_time
    }

    pub fn committed_time(&self) -> &AtomicI64 {
        &self.committed_time
    }

    pub fn prev_pointer(&self) -> BlockPtr {
        self.prev_pointer
    }

    /// Published `(num_entries, data_length)`.
    pub fn sizes(&self) -> (u32, u32) {
        let packed = self.sizes.load(Ordering::Acquire);
        ((packed >> 32) as u32, packed as u32)
    }

    /// Installs the packed counters; commit-time single writer.
    pub fn set_sizes(&self, num_entries: u32, data_length: u32) {
        let packed = (num_entries as u64) << 32 | data_length as u64;
        self.sizes.store(packed, Ordering::Release);
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.order
    }

    /// Whether one more entry of `entry_len` payload bytes fits on top of
    /// the given extents.
    pub fn has_space(&self, entry_len: u64, num_entries: u32, data_length: u32) -> bool {
        Self::projected_size(num_entries, data_length, entry_len) + self.bloom_len as u64
            <= self.capacity()
    }

    fn block_start(&self) -> *const u8 {
        self as *const Self as *const u8
    }

    fn data_base(&self) -> *const u8 {
        unsafe {
            self.block_start()
                .add(EDGE_BLOCK_HEADER_LEN + self.bloom_len as usize)
        }
    }

    /// Raw slot for insertion index `j`, counted down from the block end.
    fn entry_slot(&self, j: u32) -> *mut EdgeEntry {
        unsafe {
            self.block_start()
                .add(self.capacity() as usize)
                .cast::<EdgeEntry>()
                .sub(j as usize + 1) as *mut EdgeEntry
        }
    }

    /// Entry at insertion index `j`; `j` must be below the extents the
    /// caller is iterating with.
    pub fn entry(&self, j: u32) -> &EdgeEntry {
        unsafe { &*self.entry_slot(j) }
    }

    /// Payload bytes at `offset` in the data heap.
    pub fn data(&self, offset: u32, len: u64) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data_base().add(offset as usize), len as usize) }
    }

    pub fn bloom(&self) -> Option<BloomFilter> {
        if self.bloom_len == 0 {
            return None;
        }
        let ptr = unsafe { self.block_start().add(EDGE_BLOCK_HEADER_LEN) as *mut u8 };
        unsafe {
            Some(BloomFilter::from_raw(
                NonNull::new_unchecked(ptr),
                self.bloom_len as usize,
            ))
        }
    }
}
