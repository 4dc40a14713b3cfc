//! Garbage collection of completed transactions and unreachable versions.
//!
//! Reclamation is two-phase. The unlink pass detaches a committed
//! transaction's versions from their chains once its commit timestamp
//! precedes every active transaction's start timestamp. The deallocate pass
//! frees the detached records and returns the transaction's segments to the
//! pool, but only after the unlink has aged past a horizon no in-flight
//! reader predates — which is why fully reclaiming a transaction always
//! takes two invocations.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use terrier_common::ShutdownFlag;

use crate::manager::{CompletedTxn, TransactionManager};
use crate::txn::UndoHandle;
use crate::version::VersionIdx;

/// Counters from one GC invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcRunReport {
    /// Transactions whose versions were unlinked this pass.
    pub txns_unlinked: usize,
    /// Transactions fully deallocated this pass.
    pub txns_deallocated: usize,
    /// Transactions still pinned by an active reader.
    pub txns_deferred: usize,
}

impl fmt::Display for GcRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gc(unlinked={} deallocated={} deferred={})",
            self.txns_unlinked, self.txns_deallocated, self.txns_deferred
        )
    }
}

pub struct GarbageCollector {
    manager: Arc<TransactionManager>,
    to_unlink: VecDeque<CompletedTxn>,
    /// Unlinked transactions paired with the clock value at unlink time;
    /// safe to free once every active transaction began after it.
    to_deallocate: VecDeque<(u64, CompletedTxn)>,
}

impl GarbageCollector {
    #[must_use]
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self {
            manager,
            to_unlink: VecDeque::new(),
            to_deallocate: VecDeque::new(),
        }
    }

    /// One full invocation: deallocate what a previous pass unlinked, take
    /// in newly completed transactions, then run the unlink pass.
    pub fn perform_garbage_collection(&mut self) -> GcRunReport {
        let txns_deallocated = self.process_deallocate_queue();
        for txn in self.manager.take_completed() {
            self.to_unlink.push_back(txn);
        }
        let (txns_unlinked, txns_deferred) = self.process_unlink_queue();
        let report = GcRunReport {
            txns_unlinked,
            txns_deallocated,
            txns_deferred,
        };
        if report != GcRunReport::default() {
            debug!(%report, "garbage collection pass");
        }
        report
    }

    fn process_unlink_queue(&mut self) -> (usize, usize) {
        let oldest_active = self.manager.oldest_active_start_ts();
        let mut unlinked = 0_usize;
        let mut deferred = VecDeque::new();

        while let Some(txn) = self.to_unlink.pop_front() {
            match txn.commit_ts {
                // Aborted transactions were unlinked during rollback; they
                // only need the deallocation delay.
                None => {
                    self.to_deallocate
                        .push_back((self.manager.current_time(), txn));
                }
                Some(commit_ts) if commit_ts.get() < oldest_active => {
                    for handle in &txn.undo {
                        Self::unlink_version(handle);
                    }
                    unlinked += 1;
                    self.to_deallocate
                        .push_back((self.manager.current_time(), txn));
                }
                Some(_) => deferred.push_back(txn),
            }
        }
        let deferred_count = deferred.len();
        self.to_unlink = deferred;
        (unlinked, deferred_count)
    }

    fn process_deallocate_queue(&mut self) -> usize {
        let oldest_active = self.manager.oldest_active_start_ts();
        let mut freed = 0_usize;
        loop {
            let unlink_horizon = match self.to_deallocate.front() {
                Some((horizon, _)) => *horizon,
                None => break,
            };
            if oldest_active <= unlink_horizon {
                break;
            }
            let (_, txn) = self
                .to_deallocate
                .pop_front()
                .expect("front checked just above");
            for handle in &txn.undo {
                handle.arena.free(handle.idx);
            }
            self.manager.segment_pool().return_undo(txn.undo);
            freed += 1;
        }
        freed
    }

    /// Detach one version from its slot's chain: either swing the head past
    /// it or rewrite the `prev` pointer of the next-newer version.
    /// Individual chain anomalies are logged and skipped, not fatal.
    fn unlink_version(handle: &UndoHandle) {
        let index = handle.record.slot().index();
        let target = handle.idx.encode();
        let replacement = handle.record.prev_word();
        loop {
            let head = handle.block.version_head(index);
            if head == 0 {
                return;
            }
            if head == target {
                if handle.block.cas_version_head(index, head, replacement) {
                    return;
                }
                // A writer installed a newer version; retry as mid-chain.
                continue;
            }
            let mut cursor = head;
            loop {
                let Some(idx) = VersionIdx::decode(cursor) else {
                    warn!(slot = %handle.record.slot(), "version to unlink not found in chain");
                    return;
                };
                let Some(record) = handle.arena.get(idx) else {
                    warn!(slot = %handle.record.slot(), "chain anomaly: freed record mid-chain");
                    return;
                };
                let next = record.prev_word();
                if next == target {
                    record.set_prev_word(replacement);
                    return;
                }
                cursor = next;
            }
        }
    }
}

/// Run the collector at a fixed period until shutdown, then make the final
/// two passes that drain both queues.
pub fn spawn_gc_thread(
    mut gc: GarbageCollector,
    period: Duration,
    shutdown: ShutdownFlag,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("terrier-gc".into())
        .spawn(move || {
            debug!("garbage collector started");
            while !shutdown.wait_timeout(period) {
                gc.perform_garbage_collection();
            }
            gc.perform_garbage_collection();
            gc.perform_garbage_collection();
            debug!("garbage collector stopped");
        })
        .expect("failed to spawn gc thread")
}
