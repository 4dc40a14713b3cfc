//! Checkpoint round trips: a table populated with a seeded random
//! workload, snapshotted while the system is live, must recover into a
//! fresh table with an identical row multiset.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use terrier_checkpoint::{CheckpointManager, Checkpointer};
use terrier_error::TerrierError;
use terrier_mvcc::{SqlTable, TransactionManager};
use terrier_testutil::{
    populate_random_table, print_all_rows, random_schema, sorted, test_block_store,
};
use terrier_types::TableOid;

const CHECKPOINT_FILE_PREFIX: &str = "checkpoint_file_";

fn round_trip_with_background_checkpointer(num_columns: usize, varlen: bool, seed: u64) {
    let dir = tempfile::tempdir().unwrap();
    let store = test_block_store(1 << 16);
    let manager = Arc::new(TransactionManager::new());
    let (table, _slots) = populate_random_table(
        &manager,
        Arc::clone(&store),
        TableOid::new(0),
        num_columns,
        varlen,
        seed,
        100,
        0.2,
    )
    .unwrap();

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
    // Long enough for at least one full checkpoint cycle.
    thread::sleep(Duration::from_millis(100));
    checkpointer.stop();

    let original = sorted(print_all_rows(&manager, &table));
    assert_eq!(original.len(), 100);

    let (path, _ts) = checkpoint_manager
        .lock()
        .latest_valid_checkpoint()
        .unwrap()
        .expect("at least one checkpoint was written");

    let recovered_table = Arc::new(SqlTable::new(
        Arc::clone(&store),
        random_schema(num_columns, varlen),
        TableOid::new(0),
    ));
    let recovery_txn = manager.begin();
    {
        let mut ckpt = checkpoint_manager.lock();
        ckpt.start_recovery();
        ckpt.register_table(Arc::clone(&recovered_table));
        ckpt.recover(&recovery_txn, &path).unwrap();
    }
    manager.commit(recovery_txn, || {}).unwrap();

    let recovered = sorted(print_all_rows(&manager, &recovered_table));
    assert_eq!(original, recovered);

    checkpoint_manager.lock().unlink_checkpoint_files().unwrap();
}

#[test]
fn checkpoint_recovery_no_varlen() {
    round_trip_with_background_checkpointer(3, false, 13523);
}

#[test]
fn checkpoint_recovery_with_varlen() {
    round_trip_with_background_checkpointer(3, true, 13523777);
}

#[test]
fn checkpoint_recovery_with_huge_rows() {
    // 512 columns puts a row's fixed region well past small block sizes;
    // storage splits into a dedicated block rather than rejecting.
    round_trip_with_background_checkpointer(512, true, 13523777);
}

#[test]
fn multi_table_checkpoint_produces_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_block_store(1 << 16);
    let manager = Arc::new(TransactionManager::new());
    let (table_a, _) = populate_random_table(
        &manager,
        Arc::clone(&store),
        TableOid::new(0),
        3,
        true,
        13523777,
        100,
        0.2,
    )
    .unwrap();
    let (table_b, _) = populate_random_table(
        &manager,
        Arc::clone(&store),
        TableOid::new(1),
        4,
        true,
        13523778,
        100,
        0.2,
    )
    .unwrap();

    let mut checkpoint_manager = CheckpointManager::new(dir.path(), CHECKPOINT_FILE_PREFIX);
    let txn = manager.begin();
    checkpoint_manager.start_checkpoint(&txn).unwrap();
    checkpoint_manager.checkpoint_table(&txn, &table_a).unwrap();
    checkpoint_manager.checkpoint_table(&txn, &table_b).unwrap();
    let path = checkpoint_manager.end_checkpoint().unwrap();
    manager.commit(txn, || {}).unwrap();

    let files: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with(CHECKPOINT_FILE_PREFIX)
        })
        .collect();
    assert_eq!(files.len(), 1, "one checkpoint scope produces one file");

    let mut original = print_all_rows(&manager, &table_a);
    original.extend(print_all_rows(&manager, &table_b));
    let original = sorted(original);

    let recovered_a = Arc::new(SqlTable::new(
        Arc::clone(&store),
        random_schema(3, true),
        TableOid::new(0),
    ));
    let recovered_b = Arc::new(SqlTable::new(
        Arc::clone(&store),
        random_schema(4, true),
        TableOid::new(1),
    ));
    let recovery_txn = manager.begin();
    checkpoint_manager.start_recovery();
    checkpoint_manager.register_table(Arc::clone(&recovered_a));
    checkpoint_manager.register_table(Arc::clone(&recovered_b));
    checkpoint_manager.recover(&recovery_txn, &path).unwrap();
    manager.commit(recovery_txn, || {}).unwrap();

    let mut recovered = print_all_rows(&manager, &recovered_a);
    recovered.extend(print_all_rows(&manager, &recovered_b));
    assert_eq!(original, sorted(recovered));
}

#[test]
fn latest_checkpoint_picks_the_largest_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_block_store(1 << 16);
    let manager = Arc::new(TransactionManager::new());
    let (table, _) = populate_random_table(
        &manager,
        Arc::clone(&store),
        TableOid::new(0),
        3,
        false,
        7,
        10,
        0.0,
    )
    .unwrap();

    let mut checkpoint_manager = CheckpointManager::new(dir.path(), CHECKPOINT_FILE_PREFIX);
    assert!(checkpoint_manager.latest_checkpoint().unwrap().is_none());

    let txn = manager.begin();
    checkpoint_manager.process(&txn, &[Arc::clone(&table)]).unwrap();
    manager.commit(txn, || {}).unwrap();
    let first_ts = checkpoint_manager.latest_checkpoint().unwrap().unwrap().1;

    let txn = manager.begin();
    checkpoint_manager.process(&txn, &[Arc::clone(&table)]).unwrap();
    manager.commit(txn, || {}).unwrap();
    let (path, second_ts) = checkpoint_manager.latest_checkpoint().unwrap().unwrap();

    assert!(second_ts > first_ts);
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with(&second_ts.get().to_string()));
}

#[test]
fn corrupt_checkpoint_falls_back_to_an_older_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_block_store(1 << 16);
    let manager = Arc::new(TransactionManager::new());
    let (table, _) = populate_random_table(
        &manager,
        Arc::clone(&store),
        TableOid::new(0),
        3,
        false,
        11,
        20,
        0.1,
    )
    .unwrap();

    let mut checkpoint_manager = CheckpointManager::new(dir.path(), CHECKPOINT_FILE_PREFIX);
    let txn = manager.begin();
    let good_path = checkpoint_manager.process(&txn, &[Arc::clone(&table)]).unwrap();
    manager.commit(txn, || {}).unwrap();

    let txn = manager.begin();
    let bad_path = checkpoint_manager.process(&txn, &[Arc::clone(&table)]).unwrap();
    manager.commit(txn, || {}).unwrap();

    // Truncate the newer file's footer: it must be skipped.
    let bytes = fs::read(&bad_path).unwrap();
    fs::write(&bad_path, &bytes[..bytes.len() - 3]).unwrap();

    let (path, _) = checkpoint_manager
        .latest_valid_checkpoint()
        .unwrap()
        .expect("the older checkpoint is still valid");
    assert_eq!(path, good_path);
}

#[test]
fn recovery_rejects_schema_and_registration_mismatches() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_block_store(1 << 16);
    let manager = Arc::new(TransactionManager::new());
    let (table, _) = populate_random_table(
        &manager,
        Arc::clone(&store),
        TableOid::new(0),
        3,
        false,
        5,
        10,
        0.0,
    )
    .unwrap();

    let mut checkpoint_manager = CheckpointManager::new(dir.path(), CHECKPOINT_FILE_PREFIX);
    let txn = manager.begin();
    let path = checkpoint_manager.process(&txn, &[Arc::clone(&table)]).unwrap();
    manager.commit(txn, || {}).unwrap();

    // Unregistered oid.
    let recovery_txn = manager.begin();
    checkpoint_manager.start_recovery();
    let err = checkpoint_manager
        .recover(&recovery_txn, &path)
        .unwrap_err();
    assert!(matches!(err, TerrierError::UnregisteredTable { table_oid: 0 }));
    manager.abort(recovery_txn);

    // Registered with a different column shape.
    let wrong = Arc::new(SqlTable::new(
        Arc::clone(&store),
        random_schema(4, false),
        TableOid::new(0),
    ));
    let recovery_txn = manager.begin();
    checkpoint_manager.start_recovery();
    checkpoint_manager.register_table(wrong);
    let err = checkpoint_manager
        .recover(&recovery_txn, &path)
        .unwrap_err();
    assert!(matches!(err, TerrierError::SchemaMismatch { .. }));
    manager.abort(recovery_txn);
}
