//! The transaction manager: timestamp issuance, begin/commit/abort, and the
//! completed-transaction queue consumed by the garbage collector.
//!
//! Start and commit timestamps are drawn lock-free from one shared counter.
//! The commit latch is held only across (assign commit timestamp, stamp undo
//! records, enqueue redo) so that the log manager's input queue — and
//! therefore the WAL file — observes transactions in commit-timestamp order.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use terrier_error::{Result, TerrierError};
use terrier_storage::slot_status;
use terrier_types::Timestamp;
use terrier_wal::{LogManager, RedoSegment};

use crate::txn::{RecordSegmentPool, TransactionContext, UndoHandle};
use crate::version::UndoPayload;

/// A finished transaction awaiting garbage collection. `commit_ts` is
/// `None` for aborted transactions, whose versions were already unlinked
/// during rollback.
pub struct CompletedTxn {
    pub commit_ts: Option<Timestamp>,
    pub undo: Vec<UndoHandle>,
}

pub struct TransactionManager {
    /// Next timestamp to hand out. Starts at 1 so timestamp 0 can mean
    /// "before any transaction".
    clock: AtomicU64,
    active: Mutex<BTreeSet<u64>>,
    commit_latch: Mutex<()>,
    completed: Mutex<Vec<CompletedTxn>>,
    log: Option<Arc<LogManager>>,
    pool: Arc<RecordSegmentPool>,
}

impl TransactionManager {
    /// A manager with WAL disabled: commit callbacks run inline.
    #[must_use]
    pub fn new() -> Self {
        Self::with_log(None)
    }

    #[must_use]
    pub fn with_log(log: Option<Arc<LogManager>>) -> Self {
        Self {
            clock: AtomicU64::new(1),
            active: Mutex::new(BTreeSet::new()),
            commit_latch: Mutex::new(()),
            completed: Mutex::new(Vec::new()),
            log,
            pool: Arc::new(RecordSegmentPool::default()),
        }
    }

    #[must_use]
    pub fn log_manager(&self) -> Option<&Arc<LogManager>> {
        self.log.as_ref()
    }

    #[must_use]
    pub fn segment_pool(&self) -> &Arc<RecordSegmentPool> {
        &self.pool
    }

    /// Current value of the timestamp clock (not consumed).
    #[must_use]
    pub fn current_time(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Start timestamp of the oldest active transaction, or `u64::MAX` when
    /// none are active. The GC's unlink horizon.
    #[must_use]
    pub fn oldest_active_start_ts(&self) -> u64 {
        self.active
            .lock()
            .iter()
            .next()
            .copied()
            .unwrap_or(u64::MAX)
    }

    pub fn begin(&self) -> TransactionContext {
        let start = self.clock.fetch_add(1, Ordering::AcqRel);
        self.active.lock().insert(start);
        TransactionContext::new(
            Timestamp::new(start),
            self.pool.checkout_undo(),
            self.pool.checkout_redo(),
        )
    }

    /// Commit: assign the commit timestamp, stamp every undo record with
    /// it, enqueue the redo segment, and (when the WAL is enabled and the
    /// transaction wrote anything) block until the flush crosses the commit
    /// timestamp before invoking `on_flush`.
    pub fn commit<F: FnOnce()>(
        &self,
        txn: TransactionContext,
        on_flush: F,
    ) -> Result<Timestamp> {
        if txn.is_finished() {
            return Err(TerrierError::TransactionInactive {
                start_ts: txn.start_ts().get(),
            });
        }
        txn.mark_finished();
        let start = txn.start_ts();
        let undo = txn.take_undo();
        let redo = txn.take_redo();
        let wal_bound = !redo.is_empty() && self.log.is_some();

        let commit_ts = {
            let _latch = self.commit_latch.lock();
            let commit_ts = Timestamp::new(self.clock.fetch_add(1, Ordering::AcqRel));
            for handle in &undo {
                handle.record.set_committed(commit_ts);
            }
            if wal_bound {
                let log = self.log.as_ref().expect("wal_bound implies a log manager");
                if let Err(e) = log.serialize(RedoSegment {
                    begin_ts: start,
                    commit_ts,
                    entries: redo,
                }) {
                    // The log refused the segment: back the stamps out and
                    // turn the commit into an abort.
                    for handle in &undo {
                        handle.record.set_owner_tag(txn.tag());
                    }
                    drop(_latch);
                    warn!(start_ts = start.get(), "commit rejected by log manager, aborting");
                    Self::rollback(&undo);
                    self.finish(start, CompletedTxn {
                        commit_ts: None,
                        undo,
                    });
                    return Err(e);
                }
            } else {
                self.pool.return_redo(redo);
            }
            commit_ts
        };

        self.active.lock().remove(&start.get());

        if wal_bound {
            let log = self.log.as_ref().expect("wal_bound implies a log manager");
            log.wait_for_flush(commit_ts)?;
        }
        on_flush();

        self.completed.lock().push(CompletedTxn {
            commit_ts: Some(commit_ts),
            undo,
        });
        debug!(start_ts = start.get(), commit_ts = commit_ts.get(), "transaction committed");
        Ok(commit_ts)
    }

    /// Abort: unwind every installed version, newest first, and mark the
    /// records aborted so concurrent readers skip them.
    pub fn abort(&self, txn: TransactionContext) {
        if txn.is_finished() {
            return;
        }
        txn.mark_finished();
        let start = txn.start_ts();
        let undo = txn.take_undo();
        self.pool.return_redo(txn.take_redo());

        Self::rollback(&undo);
        self.finish(start, CompletedTxn {
            commit_ts: None,
            undo,
        });
        debug!(start_ts = start.get(), "transaction aborted");
    }

    /// Drain the completed queue (GC intake).
    #[must_use]
    pub fn take_completed(&self) -> Vec<CompletedTxn> {
        std::mem::take(&mut *self.completed.lock())
    }

    fn finish(&self, start: Timestamp, completed: CompletedTxn) {
        self.active.lock().remove(&start.get());
        self.completed.lock().push(completed);
    }

    /// Restore base images and unlink this transaction's versions, newest
    /// first. Each record is flagged aborted before its base effect is
    /// undone, so a reader racing the rollback still applies the
    /// before-image delta over whatever base bytes it copied.
    fn rollback(undo: &[UndoHandle]) {
        for handle in undo.iter().rev() {
            let record = &handle.record;
            record.set_aborted();
            let index = record.slot().index();
            match record.payload() {
                UndoPayload::Insert => {
                    handle.block.set_status(index, slot_status::DELETED);
                }
                UndoPayload::Update(before) => {
                    handle.block.write_row(&handle.layout, index, before);
                }
                UndoPayload::Delete(_) => {
                    handle.block.set_status(index, slot_status::OCCUPIED);
                }
            }
            if !handle
                .block
                .cas_version_head(index, handle.idx.encode(), record.prev_word())
            {
                // Not the head: a later same-transaction version was
                // unlinked first, or the chain was already repaired. The
                // GC's unlink pass tolerates leftovers.
                warn!(slot = %record.slot(), "rollback left a version for the GC to unlink");
            }
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_allocates_increasing_start_timestamps() {
        let manager = TransactionManager::new();
        let t1 = manager.begin();
        let t2 = manager.begin();
        assert!(t1.start_ts() < t2.start_ts());
        manager.abort(t1);
        manager.abort(t2);
    }

    #[test]
    fn commit_timestamps_are_unique_and_monotonic() {
        let manager = TransactionManager::new();
        let t1 = manager.begin();
        let t2 = manager.begin();
        let c1 = manager.commit(t1, || {}).unwrap();
        let c2 = manager.commit(t2, || {}).unwrap();
        assert!(c1 < c2);
        assert!(c1 > Timestamp::ZERO);
    }

    #[test]
    fn commit_invokes_callback_inline_without_wal() {
        let manager = TransactionManager::new();
        let txn = manager.begin();
        let mut called = false;
        manager.commit(txn, || called = true).unwrap();
        assert!(called);
    }

    #[test]
    fn oldest_active_tracks_begin_and_finish() {
        let manager = TransactionManager::new();
        assert_eq!(manager.oldest_active_start_ts(), u64::MAX);
        let t1 = manager.begin();
        let t2 = manager.begin();
        assert_eq!(manager.oldest_active_start_ts(), t1.start_ts().get());
        let t1_start = t1.start_ts().get();
        manager.commit(t1, || {}).unwrap();
        assert!(manager.oldest_active_start_ts() > t1_start);
        manager.abort(t2);
        assert_eq!(manager.oldest_active_start_ts(), u64::MAX);
    }

    #[test]
    fn completed_queue_receives_both_outcomes() {
        let manager = TransactionManager::new();
        let t1 = manager.begin();
        let t2 = manager.begin();
        manager.commit(t1, || {}).unwrap();
        manager.abort(t2);
        let completed = manager.take_completed();
        assert_eq!(completed.len(), 2);
        assert!(completed[0].commit_ts.is_some());
        assert!(completed[1].commit_ts.is_none());
        assert!(manager.take_completed().is_empty());
    }
}
