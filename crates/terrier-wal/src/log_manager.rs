//! The log manager: a bounded multi-producer input queue drained by a single
//! flusher thread.
//!
//! Commit paths enqueue their redo segment under the transaction manager's
//! commit latch, which makes queue order match commit-timestamp order; the
//! flusher preserves that order on disk, so parsing the WAL always yields
//! nondecreasing commit timestamps. A committing transaction then blocks on
//! the flushed watermark until its own commit timestamp is durable.
//!
//! A full queue applies backpressure on `serialize` (commits slow down). An
//! I/O failure latches the manager unhealthy: every parked producer and
//! waiter is woken with [`TerrierError::LogUnhealthy`], and further commits
//! are refused.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use terrier_common::ShutdownFlag;
use terrier_error::{Result, TerrierError};
use terrier_types::Timestamp;

use crate::log_io::BufferedLogWriter;
use crate::record::{LogRecord, RedoSegment};

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Serializes committed redo records to the single append-only WAL file.
pub struct LogManager {
    path: PathBuf,
    queue: Mutex<VecDeque<RedoSegment>>,
    queue_capacity: usize,
    /// Signalled when work arrives or the manager shuts down.
    work: Condvar,
    /// Signalled when queue space frees up or the manager turns unhealthy.
    space: Condvar,
    writer: Mutex<Option<BufferedLogWriter>>,
    /// Highest commit timestamp known durable.
    flushed: Mutex<u64>,
    flushed_cv: Condvar,
    healthy: AtomicBool,
}

impl LogManager {
    /// Open (creating if needed) the WAL file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_queue_capacity(path, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(path: impl Into<PathBuf>, queue_capacity: usize) -> Result<Self> {
        let path = path.into();
        let writer = BufferedLogWriter::open(&path)?;
        Ok(Self {
            path,
            queue: Mutex::new(VecDeque::new()),
            queue_capacity: queue_capacity.max(1),
            work: Condvar::new(),
            space: Condvar::new(),
            writer: Mutex::new(Some(writer)),
            flushed: Mutex::new(0),
            flushed_cv: Condvar::new(),
            healthy: AtomicBool::new(true),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Highest commit timestamp known durable.
    #[must_use]
    pub fn flushed_watermark(&self) -> Timestamp {
        Timestamp::new(*self.flushed.lock())
    }

    /// Enqueue a committed transaction's redo segment. Called on the commit
    /// path while the commit latch is held; blocks while the queue is full.
    pub fn serialize(&self, segment: RedoSegment) -> Result<()> {
        if !self.is_healthy() {
            return Err(TerrierError::LogUnhealthy);
        }
        let mut queue = self.queue.lock();
        while queue.len() >= self.queue_capacity {
            if !self.is_healthy() {
                return Err(TerrierError::LogUnhealthy);
            }
            self.space.wait(&mut queue);
        }
        queue.push_back(segment);
        self.work.notify_one();
        Ok(())
    }

    /// Drain the input queue, append every record to the file buffer, and
    /// flush with an fsync. Invoked periodically by the flusher thread and
    /// once more at shutdown.
    pub fn process(&self) -> Result<()> {
        let batch: Vec<RedoSegment> = {
            let mut queue = self.queue.lock();
            if queue.is_empty() {
                return Ok(());
            }
            let drained = queue.drain(..).collect();
            self.space.notify_all();
            drained
        };

        let mut writer_slot = self.writer.lock();
        let Some(writer) = writer_slot.as_mut() else {
            return Ok(());
        };

        let mut max_commit = 0_u64;
        let mut records = 0_usize;
        for segment in &batch {
            for entry in &segment.entries {
                LogRecord::from_redo(entry, segment.begin_ts, segment.commit_ts)
                    .encode_into(writer.buffer_mut());
                records += 1;
            }
            LogRecord::commit(segment.begin_ts, segment.commit_ts)
                .encode_into(writer.buffer_mut());
            records += 1;
            max_commit = max_commit.max(segment.commit_ts.get());
        }

        match writer.persist() {
            Ok(()) => {
                debug!(
                    transactions = batch.len(),
                    records, max_commit, "log flush complete"
                );
                let mut flushed = self.flushed.lock();
                if max_commit > *flushed {
                    *flushed = max_commit;
                }
                self.flushed_cv.notify_all();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "log flush failed; refusing further commits");
                self.mark_unhealthy();
                Err(e)
            }
        }
    }

    /// Block until the flushed watermark reaches `commit_ts`.
    pub fn wait_for_flush(&self, commit_ts: Timestamp) -> Result<()> {
        let mut flushed = self.flushed.lock();
        while *flushed < commit_ts.get() {
            if !self.is_healthy() {
                return Err(TerrierError::LogUnhealthy);
            }
            self.flushed_cv.wait(&mut flushed);
        }
        Ok(())
    }

    /// Wake the flusher thread (used when requesting shutdown).
    pub fn wake(&self) {
        let _queue = self.queue.lock();
        self.work.notify_all();
    }

    /// Final drain-and-flush, then close the file. Segments serialized after
    /// shutdown are rejected as unhealthy.
    pub fn shutdown(&self) -> Result<()> {
        let result = self.process();
        self.writer.lock().take();
        self.mark_unhealthy();
        debug!("log manager shut down");
        result
    }

    fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
        {
            let _queue = self.queue.lock();
            self.space.notify_all();
        }
        {
            let _flushed = self.flushed.lock();
            self.flushed_cv.notify_all();
        }
    }

    /// Spawn the background flusher loop: park until work arrives or the
    /// flush interval elapses, then drain. Runs one final drain after
    /// shutdown is requested.
    pub fn spawn_flusher(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: ShutdownFlag,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        thread::Builder::new()
            .name("terrier-log-flusher".into())
            .spawn(move || {
                debug!("log flusher started");
                loop {
                    {
                        let mut queue = manager.queue.lock();
                        if queue.is_empty() && !shutdown.is_requested() {
                            manager.work.wait_for(&mut queue, interval);
                        }
                    }
                    if manager.process().is_err() {
                        break;
                    }
                    if shutdown.is_requested() {
                        let _ = manager.process();
                        break;
                    }
                }
                debug!("log flusher stopped");
            })
            .expect("failed to spawn log flusher thread")
    }
}
