//! Transaction contexts and the record segment pool.
//!
//! A transaction owns two append-only record segments: the undo side (one
//! handle per installed version, enough to roll back or garbage collect it)
//! and the redo side (the entries serialized to the WAL at commit). Segment
//! vectors are drawn from a recycling pool and returned when the owning
//! transaction is fully reclaimed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use terrier_storage::{Block, BlockLayout};
use terrier_types::Timestamp;
use terrier_wal::RedoEntry;

use crate::version::{txn_tag, UndoRecord, VersionArena, VersionIdx};

/// Everything needed to roll back, unlink, or deallocate one installed
/// version.
pub struct UndoHandle {
    pub block: Arc<Block>,
    pub layout: Arc<BlockLayout>,
    pub arena: Arc<VersionArena>,
    pub idx: VersionIdx,
    pub record: Arc<UndoRecord>,
}

/// Recycling pool for undo and redo segment vectors.
pub struct RecordSegmentPool {
    undo: Mutex<Vec<Vec<UndoHandle>>>,
    redo: Mutex<Vec<Vec<RedoEntry>>>,
    max_pooled: usize,
}

impl RecordSegmentPool {
    #[must_use]
    pub fn new(max_pooled: usize) -> Self {
        Self {
            undo: Mutex::new(Vec::new()),
            redo: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    #[must_use]
    pub fn checkout_undo(&self) -> Vec<UndoHandle> {
        self.undo.lock().pop().unwrap_or_default()
    }

    #[must_use]
    pub fn checkout_redo(&self) -> Vec<RedoEntry> {
        self.redo.lock().pop().unwrap_or_default()
    }

    pub fn return_undo(&self, mut segment: Vec<UndoHandle>) {
        segment.clear();
        let mut pool = self.undo.lock();
        if pool.len() < self.max_pooled {
            pool.push(segment);
        }
    }

    pub fn return_redo(&self, mut segment: Vec<RedoEntry>) {
        segment.clear();
        let mut pool = self.redo.lock();
        if pool.len() < self.max_pooled {
            pool.push(segment);
        }
    }
}

impl Default for RecordSegmentPool {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Per-transaction state: start timestamp, in-flight tag, and the owned
/// undo/redo segments.
pub struct TransactionContext {
    start_ts: Timestamp,
    tag: u64,
    undo: Mutex<Vec<UndoHandle>>,
    redo: Mutex<Vec<RedoEntry>>,
    finished: AtomicBool,
}

impl TransactionContext {
    #[must_use]
    pub fn new(start_ts: Timestamp, undo: Vec<UndoHandle>, redo: Vec<RedoEntry>) -> Self {
        Self {
            start_ts,
            tag: txn_tag(start_ts),
            undo: Mutex::new(undo),
            redo: Mutex::new(redo),
            finished: AtomicBool::new(false),
        }
    }

    #[inline]
    #[must_use]
    pub const fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    /// The tag this transaction installs in version timestamp words while
    /// in flight.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> u64 {
        self.tag
    }

    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn record_undo(&self, handle: UndoHandle) {
        debug_assert!(!self.is_finished());
        self.undo.lock().push(handle);
    }

    pub fn record_redo(&self, entry: RedoEntry) {
        debug_assert!(!self.is_finished());
        self.redo.lock().push(entry);
    }

    /// Whether the transaction has produced no redo. Read-only commits skip
    /// the WAL entirely.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.redo.lock().is_empty()
    }

    pub(crate) fn take_undo(&self) -> Vec<UndoHandle> {
        std::mem::take(&mut *self.undo.lock())
    }

    pub(crate) fn take_redo(&self) -> Vec<RedoEntry> {
        std::mem::take(&mut *self.redo.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::UNCOMMITTED_MASK;

    #[test]
    fn tag_sets_the_uncommitted_bit() {
        let txn = TransactionContext::new(Timestamp::new(41), Vec::new(), Vec::new());
        assert_eq!(txn.tag(), 41 | UNCOMMITTED_MASK);
        assert_eq!(txn.start_ts(), Timestamp::new(41));
        assert!(txn.is_read_only());
        assert!(!txn.is_finished());
    }

    #[test]
    fn segment_pool_recycles_capacity() {
        let pool = RecordSegmentPool::new(2);
        let mut redo = pool.checkout_redo();
        redo.reserve(64);
        let capacity = redo.capacity();
        pool.return_redo(redo);
        let redo = pool.checkout_redo();
        assert!(redo.capacity() >= capacity);
        assert!(redo.is_empty());
    }
}
