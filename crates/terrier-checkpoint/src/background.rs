//! The background checkpointer thread.
//!
//! Each cycle opens a read transaction, snapshots the registered tables
//! through the checkpoint manager, and commits. The read transaction pins
//! the version horizon for the duration of the scan, delaying GC but taking
//! no locks.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error};

use terrier_common::ShutdownFlag;
use terrier_mvcc::{SqlTable, TransactionManager};

use crate::manager::CheckpointManager;

pub struct Checkpointer {
    shutdown: ShutdownFlag,
    handle: Option<JoinHandle<()>>,
}

impl Checkpointer {
    /// Start checkpointing `tables` every `period`, beginning immediately.
    #[must_use]
    pub fn spawn(
        manager: Arc<Mutex<CheckpointManager>>,
        txn_manager: Arc<TransactionManager>,
        tables: Vec<Arc<SqlTable>>,
        period: Duration,
    ) -> Self {
        let shutdown = ShutdownFlag::new();
        let flag = shutdown.clone();
        let handle = thread::Builder::new()
            .name("terrier-checkpointer".into())
            .spawn(move || {
                debug!(period_ms = period.as_millis() as u64, "checkpointer started");
                loop {
                    let txn = txn_manager.begin();
                    let outcome = manager.lock().process(&txn, &tables);
                    match outcome {
                        Ok(path) => debug!(path = %path.display(), "periodic checkpoint written"),
                        Err(e) => error!(error = %e, "periodic checkpoint failed"),
                    }
                    if let Err(e) = txn_manager.commit(txn, || {}) {
                        error!(error = %e, "checkpoint transaction failed to commit");
                    }
                    if flag.wait_timeout(period) {
                        break;
                    }
                }
                debug!("checkpointer stopped");
            })
            .expect("failed to spawn checkpointer thread");
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal the thread and join it.
    pub fn stop(mut self) {
        self.shutdown.request();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        self.shutdown.request();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
