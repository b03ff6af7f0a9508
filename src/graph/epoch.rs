//! Commit epoch clock and WAL fan-in.
//!
//! Epochs are reserved in order under one lock, which also serializes WAL
//! frame appends so the log is ordered by epoch. A commit becomes *visible*
//! only when every earlier epoch has also finished; readers snapshot the
//! contiguous visible frontier, so they can never observe epoch `e` while
//! `e - 1` is still installing its timestamps.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::Result;
use crate::types::Timestamp;
use crate::wal::{WalBuffer, WalWriter};

pub struct CommitManager {
    /// Largest epoch `e` such that all epochs `<= e` have finished.
    visible_epoch: AtomicI64,
    state: Mutex<EpochState>,
    visible_cv: Condvar,
}

struct EpochState {
    next_epoch: Timestamp,
    unfinished: BTreeSet<Timestamp>,
    wal: WalWriter,
}

impl CommitManager {
    pub fn new(wal: WalWriter) -> Self {
        Self {
            visible_epoch: AtomicI64::new(0),
            state: Mutex::new(EpochState {
                next_epoch: 1,
                unfinished: BTreeSet::new(),
                wal,
            }),
            visible_cv: Condvar::new(),
        }
    }

    /// Snapshot epoch for a newly opened transaction.
    pub fn epoch(&self) -> Timestamp {
        self.visible_epoch.load(Ordering::Acquire)
    }

    /// Reserves the next commit epoch and appends the transaction's WAL
    /// buffer. Returns the epoch and how many earlier commits were still in
    /// flight at reservation time.
    pub fn register_commit(&self, buffer: &WalBuffer) -> Result<(Timestamp, usize)> {
        let mut state = self.state.lock();
        let epoch = state.next_epoch;
        state.next_epoch += 1;
        let unfinished_before = state.unfinished.len();
        state.unfinished.insert(epoch);
        state.wal.append_commit(epoch, buffer)?;
        trace!(epoch, unfinished_before, "commit registered");
        Ok((epoch, unfinished_before))
    }

    /// Marks `epoch` finished and advances the visible frontier. With
    /// `wait_visible`, blocks until every earlier epoch has finished too, so
    /// a reader opened afterwards observes this commit.
    pub fn finish_commit(&self, epoch: Timestamp, _unfinished_before: usize, wait_visible: bool) {
        let mut state = self.state.lock();
        state.unfinished.remove(&epoch);
        let visible = match state.unfinished.iter().next() {
            Some(&oldest_pending) => oldest_pending - 1,
            None => state.next_epoch - 1,
        };
        self.visible_epoch.store(visible, Ordering::Release);
        self.visible_cv.notify_all();
        if wait_visible {
            while self.visible_epoch.load(Ordering::Acquire) < epoch {
                self.visible_cv.wait(&mut state);
            }
        }
        trace!(epoch, visible, "commit finished");
    }

    /// Flushes the log to stable storage regardless of sync mode.
    pub fn sync_wal(&self) -> Result<()> {
        self.state.lock().wal.sync()
    }
}
