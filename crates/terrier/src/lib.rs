//! Storage engine facade.
//!
//! Wires the process-wide services — block store, log manager and its
//! flusher, transaction manager, garbage collector, checkpoint manager,
//! worker pool, and catalog — and tears them down in reverse order at
//! shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use terrier_catalog::Catalog;
use terrier_checkpoint::{CheckpointManager, Checkpointer};
use terrier_common::{ShutdownFlag, TaskQueue, WorkerPool};
use terrier_error::Result;
use terrier_mvcc::{spawn_gc_thread, GarbageCollector, SqlTable, TransactionManager};
use terrier_storage::BlockStore;
use terrier_types::Config;
use terrier_wal::LogManager;

pub use terrier_types::config::{ENV_BLOCK_SIZE, ENV_CHECKPOINT_DIR, ENV_WAL_FLUSH_MS};

/// Blocks the store will hand out before reporting exhaustion.
const DEFAULT_BLOCK_CAPACITY: usize = 10_000;
/// Buffers kept for reuse after their block is released.
const DEFAULT_BLOCK_REUSE: usize = 1_000;
/// Filename prefix for checkpoint files.
const CHECKPOINT_FILE_PREFIX: &str = "checkpoint_";

/// Startup knobs not covered by the environment configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Path of the WAL file; `None` disables write-ahead logging.
    pub wal_file: Option<PathBuf>,
    /// Garbage collection period.
    pub gc_period: Duration,
    /// Worker threads in the shared pool.
    pub worker_threads: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            wal_file: None,
            gc_period: Duration::from_millis(10),
            worker_threads: 4,
        }
    }
}

pub struct StorageEngine {
    config: Config,
    shutdown: ShutdownFlag,
    block_store: Arc<BlockStore>,
    log_manager: Option<Arc<LogManager>>,
    log_thread: Option<JoinHandle<()>>,
    txn_manager: Arc<TransactionManager>,
    gc_thread: Option<JoinHandle<()>>,
    checkpoint_manager: Arc<Mutex<CheckpointManager>>,
    checkpointer: Option<Checkpointer>,
    worker_pool: WorkerPool,
    catalog: Arc<Catalog>,
}

impl StorageEngine {
    /// Bring up every service in dependency order and bootstrap the
    /// catalog.
    pub fn start(config: Config, options: EngineOptions) -> Result<Self> {
        let config = config.validated();
        let shutdown = ShutdownFlag::new();

        let block_store = Arc::new(BlockStore::new(
            config.block_size,
            DEFAULT_BLOCK_CAPACITY,
            DEFAULT_BLOCK_REUSE,
        ));

        let (log_manager, log_thread) = match &options.wal_file {
            Some(path) => {
                let manager = Arc::new(LogManager::open(path.clone())?);
                let thread =
                    manager.spawn_flusher(config.wal_flush_interval, shutdown.clone());
                (Some(manager), Some(thread))
            }
            None => (None, None),
        };

        let txn_manager = Arc::new(TransactionManager::with_log(log_manager.clone()));

        let gc = GarbageCollector::new(Arc::clone(&txn_manager));
        let gc_thread = Some(spawn_gc_thread(gc, options.gc_period, shutdown.clone()));

        let checkpoint_manager = Arc::new(Mutex::new(CheckpointManager::new(
            config.checkpoint_dir.clone(),
            CHECKPOINT_FILE_PREFIX,
        )));

        let mut worker_pool =
            WorkerPool::new("terrier-worker", options.worker_threads, TaskQueue::new());
        worker_pool.startup();

        let catalog = Catalog::bootstrap(Arc::clone(&txn_manager), Arc::clone(&block_store))?;

        info!(
            block_size = config.block_size,
            wal = options.wal_file.is_some(),
            "storage engine started"
        );
        Ok(Self {
            config,
            shutdown,
            block_store,
            log_manager,
            log_thread,
            txn_manager,
            gc_thread,
            checkpoint_manager,
            checkpointer: None,
            worker_pool,
            catalog,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    #[must_use]
    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    #[must_use]
    pub fn block_store(&self) -> &Arc<BlockStore> {
        &self.block_store
    }

    #[must_use]
    pub fn log_manager(&self) -> Option<&Arc<LogManager>> {
        self.log_manager.as_ref()
    }

    #[must_use]
    pub fn checkpoint_manager(&self) -> &Arc<Mutex<CheckpointManager>> {
        &self.checkpoint_manager
    }

    pub fn worker_pool(&mut self) -> &mut WorkerPool {
        &mut self.worker_pool
    }

    /// Begin periodic checkpoints of `tables`.
    pub fn start_checkpointer(&mut self, tables: Vec<Arc<SqlTable>>, period: Duration) {
        assert!(self.checkpointer.is_none(), "checkpointer already running");
        self.checkpointer = Some(Checkpointer::spawn(
            Arc::clone(&self.checkpoint_manager),
            Arc::clone(&self.txn_manager),
            tables,
            period,
        ));
    }

    /// Stop the periodic checkpointer, if running.
    pub fn stop_checkpointer(&mut self) {
        if let Some(checkpointer) = self.checkpointer.take() {
            checkpointer.stop();
        }
    }

    /// Tear everything down in reverse startup order: checkpointer, worker
    /// pool, garbage collector, log flusher and manager; the catalog and
    /// stores drop with the engine.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_checkpointer();
        self.worker_pool.shutdown();
        self.shutdown.request();
        if let Some(handle) = self.gc_thread.take() {
            let _ = handle.join();
        }
        if let Some(log) = &self.log_manager {
            log.wake();
        }
        if let Some(handle) = self.log_thread.take() {
            let _ = handle.join();
        }
        if let Some(log) = &self.log_manager {
            log.shutdown()?;
        }
        info!("storage engine shut down");
        Ok(())
    }
}
