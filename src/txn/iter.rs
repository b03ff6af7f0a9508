//! Snapshot-filtered edge cursors.
//!
//! An iterator walks the entries of one edge block under the transaction's
//! snapshot; it never follows the block chain. A snapshot that resolves to
//! an older block in the chain gets its own cursor over that block, which is
//! how time-travel across grown blocks works.

use std::sync::atomic::Ordering;

use crate::block::layout::EdgeBlockHeader;
use crate::types::{is_visible, Timestamp, VertexId};

/// One live edge observed by a cursor.
#[derive(Debug, Clone, Copy)]
pub struct EdgeView<'a> {
    pub dst: VertexId,
    pub version: Timestamp,
    pub data: &'a [u8],
}

/// Cursor over the live entries of an edge block. Yields newest first, or
/// oldest first when constructed with `reverse`.
pub struct EdgeIterator<'a> {
    block: Option<&'a EdgeBlockHeader>,
    num_entries: u32,
    read_epoch: Timestamp,
    local_txn_id: u64,
    reverse: bool,
    /// Next insertion index to inspect. Forward runs `num_entries..0`,
    /// reverse runs `0..num_entries`.
    index: u32,
    /// Data heap offset matching `index`: for forward iteration the end of
    /// the next candidate's payload, for reverse its start.
    offset: u32,
}

impl<'a> EdgeIterator<'a> {
    pub(crate) fn new(
        block: Option<&'a EdgeBlockHeader>,
        num_entries: u32,
        data_length: u32,
        read_epoch: Timestamp,
        local_txn_id: u64,
        reverse: bool,
    ) -> Self {
        let (index, offset) = if reverse {
            (0, 0)
        } else {
            (num_entries, data_length)
        };
        Self {
            block,
            num_entries,
            read_epoch,
            local_txn_id,
            reverse,
            index,
            offset,
        }
    }

    fn live(&self, block: &EdgeBlockHeader, j: u32) -> bool {
        let e = block.entry(j);
        is_visible(
            e.creation_time().load(Ordering::Relaxed),
            self.read_epoch,
            self.local_txn_id,
        ) && !is_visible(
            e.deletion_time().load(Ordering::Relaxed),
            self.read_epoch,
            self.local_txn_id,
        )
    }

    fn step_forward(&mut self) -> Option<(u32, u32)> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        let block = self.block?;
        let len = block.entry(self.index).length() as u32;
        self.offset -= len;
        Some((self.index, self.offset))
    }

    fn step_reverse(&mut self) -> Option<(u32, u32)> {
        if self.index >= self.num_entries {
            return None;
        }
        let block = self.block?;
        let j = self.index;
        let at = self.offset;
        self.offset += block.entry(j).length() as u32;
        self.index += 1;
        Some((j, at))
    }
}

impl<'a> Iterator for EdgeIterator<'a> {
    type Item = EdgeView<'a>;

    fn next(&mut self) -> Option<EdgeView<'a>> {
        let block = self.block?;
        loop {
            let (j, offset) = if self.reverse {
                self.step_reverse()?
            } else {
                self.step_forward()?
            };
            if !self.live(block, j) {
                continue;
            }
            let entry = block.entry(j);
            return Some(EdgeView {
                dst: entry.dst(),
                version: entry.version().load(Ordering::Relaxed),
                data: block.data(offset, entry.length()),
            });
        }
    }
}

/// [`EdgeIterator`] with an additional `[start, end]` version window.
pub struct EdgeIteratorVersion<'a> {
    inner: EdgeIterator<'a>,
    start: Timestamp,
    end: Timestamp,
}

impl<'a> EdgeIteratorVersion<'a> {
    pub(crate) fn new(inner: EdgeIterator<'a>, start: Timestamp, end: Timestamp) -> Self {
        Self { inner, start, end }
    }
}

impl<'a> Iterator for EdgeIteratorVersion<'a> {
    type Item = EdgeView<'a>;

    fn next(&mut self) -> Option<EdgeView<'a>> {
        for view in self.inner.by_ref() {
            if self.start <= view.version && view.version <= self.end {
                return Some(view);
            }
        }
        None
    }
}
