//! Durability round trips through the WAL: checkpoint plus log suffix, and
//! log-only recovery from timestamp zero, under a concurrent OLTP mix.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use terrier_checkpoint::{CheckpointManager, Checkpointer};
use terrier_common::ShutdownFlag;
use terrier_mvcc::{spawn_gc_thread, GarbageCollector, SqlTable, TransactionManager};
use terrier_testutil::{
    populate_random_table, print_all_rows, random_schema, simulate_oltp, sorted,
    test_block_store, OltpConfig,
};
use terrier_types::{TableOid, Timestamp};
use terrier_wal::{BufferedLogReader, LogManager};

const CHECKPOINT_FILE_PREFIX: &str = "checkpoint_file_";

struct DurableHarness {
    log: Arc<LogManager>,
    log_shutdown: ShutdownFlag,
    log_thread: Option<thread::JoinHandle<()>>,
    gc_shutdown: ShutdownFlag,
    gc_thread: Option<thread::JoinHandle<()>>,
    manager: Arc<TransactionManager>,
}

impl DurableHarness {
    fn start(wal_path: &std::path::Path) -> Self {
        let log = Arc::new(LogManager::open(wal_path).unwrap());
        let log_shutdown = ShutdownFlag::new();
        let log_thread = log.spawn_flusher(Duration::from_millis(10), log_shutdown.clone());
        let manager = Arc::new(TransactionManager::with_log(Some(Arc::clone(&log))));
        let gc_shutdown = ShutdownFlag::new();
        let gc_thread = spawn_gc_thread(
            GarbageCollector::new(Arc::clone(&manager)),
            Duration::from_millis(10),
            gc_shutdown.clone(),
        );
        Self {
            log,
            log_shutdown,
            log_thread: Some(log_thread),
            gc_shutdown,
            gc_thread: Some(gc_thread),
            manager: Arc::clone(&manager),
        }
    }

    fn stop(mut self) {
        self.gc_shutdown.request();
        if let Some(handle) = self.gc_thread.take() {
            handle.join().unwrap();
        }
        self.log_shutdown.request();
        self.log.wake();
        if let Some(handle) = self.log_thread.take() {
            handle.join().unwrap();
        }
        self.log.shutdown().unwrap();
    }
}

fn oltp_mix(seed: u64) -> OltpConfig {
    OltpConfig {
        num_txns: 100,
        ops_per_txn: 5,
        update_ratio: 0.5,
        threads: 4,
        seed,
    }
}

#[test]
fn checkpoint_then_log_suffix_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("test.log");
    let harness = DurableHarness::start(&wal_path);
    let manager = Arc::clone(&harness.manager);
    let store = test_block_store(1 << 16);

    let (table, slots) = populate_random_table(
        &manager,
        Arc::clone(&store),
        TableOid::new(0),
        10,
        true,
        0xC0FF_EE01,
        100,
        0.2,
    )
    .unwrap();

    // Checkpoint while the table is quiescent.
    let checkpoint_manager = Arc::new(Mutex::new(CheckpointManager::new(
        dir.path(),
        CHECKPOINT_FILE_PREFIX,
    )));
    let checkpointer = Checkpointer::spawn(
        Arc::clone(&checkpoint_manager),
        Arc::clone(&manager),
        vec![Arc::clone(&table)],
        Duration::from_millis(50),
    );
    thread::sleep(Duration::from_millis(100));
    checkpointer.stop();

    // Everything after the checkpoint lives only in the log.
    let outcome = simulate_oltp(&manager, &table, &slots, oltp_mix(0xFACE));
    assert!(outcome.committed > 0);
    harness.log.process().unwrap();

    let original = sorted(print_all_rows(&manager, &table));

    let (path, checkpoint_ts) = checkpoint_manager
        .lock()
        .latest_valid_checkpoint()
        .unwrap()
        .expect("a checkpoint was written");

    let recovered = Arc::new(SqlTable::new(
        Arc::clone(&store),
        random_schema(10, true),
        TableOid::new(0),
    ));
    let recovery_txn = manager.begin();
    {
        let mut ckpt = checkpoint_manager.lock();
        ckpt.start_recovery();
        ckpt.register_table(Arc::clone(&recovered));
        ckpt.recover(&recovery_txn, &path).unwrap();
        ckpt.recover_from_logs(&recovery_txn, &wal_path, checkpoint_ts)
            .unwrap();
    }
    manager.commit(recovery_txn, || {}).unwrap();

    let recovered_rows = sorted(print_all_rows(&manager, &recovered));
    assert_eq!(original, recovered_rows);

    checkpoint_manager.lock().unlink_checkpoint_files().unwrap();
    harness.stop();
}

#[test]
fn log_only_recovery_from_timestamp_zero() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("test.log");
    let harness = DurableHarness::start(&wal_path);
    let manager = Arc::clone(&harness.manager);
    let store = test_block_store(1 << 16);

    let (table, slots) = populate_random_table(
        &manager,
        Arc::clone(&store),
        TableOid::new(0),
        10,
        true,
        0xC0FF_EE02,
        100,
        0.2,
    )
    .unwrap();

    // No checkpoints in this test.
    let outcome = simulate_oltp(&manager, &table, &slots, oltp_mix(0xBEEF));
    assert!(outcome.committed > 0);
    harness.log.process().unwrap();

    let original = sorted(print_all_rows(&manager, &table));

    let recovered = Arc::new(SqlTable::new(
        Arc::clone(&store),
        random_schema(10, true),
        TableOid::new(0),
    ));
    let mut checkpoint_manager = CheckpointManager::new(dir.path(), CHECKPOINT_FILE_PREFIX);
    let recovery_txn = manager.begin();
    checkpoint_manager.start_recovery();
    checkpoint_manager.register_table(Arc::clone(&recovered));
    checkpoint_manager
        .recover_from_logs(&recovery_txn, &wal_path, Timestamp::ZERO)
        .unwrap();
    manager.commit(recovery_txn, || {}).unwrap();

    let recovered_rows = sorted(print_all_rows(&manager, &recovered));
    assert_eq!(original, recovered_rows);

    harness.stop();
}

#[test]
fn wal_commit_timestamps_are_nondecreasing() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("test.log");
    let harness = DurableHarness::start(&wal_path);
    let manager = Arc::clone(&harness.manager);
    let store = test_block_store(1 << 16);

    let (table, slots) = populate_random_table(
        &manager,
        Arc::clone(&store),
        TableOid::new(0),
        4,
        false,
        99,
        50,
        0.0,
    )
    .unwrap();
    simulate_oltp(&manager, &table, &slots, oltp_mix(0xD00D));
    harness.log.process().unwrap();
    harness.stop();

    let mut reader = BufferedLogReader::open(&wal_path).unwrap();
    let mut last_commit = 0_u64;
    let mut records = 0_usize;
    while let Some(record) = reader.read_record().unwrap() {
        assert!(
            record.commit_ts.get() >= last_commit,
            "commit timestamps regressed at offset {}",
            reader.offset()
        );
        last_commit = record.commit_ts.get();
        records += 1;
    }
    assert!(records > 0);
}
