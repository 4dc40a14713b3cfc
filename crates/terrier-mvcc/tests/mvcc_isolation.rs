//! Snapshot-isolation semantics of the MVCC table: visibility across
//! commit boundaries, write-write conflicts, abort rollback, delete
//! visibility, and reclamation under concurrent readers and writers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use terrier_common::ShutdownFlag;
use terrier_mvcc::{spawn_gc_thread, GarbageCollector, SqlTable, TransactionManager};
use terrier_storage::BlockStore;
use terrier_types::{ColOid, Column, Schema, TableOid, TypeId, Value};

fn three_int_schema() -> Schema {
    Schema::new(vec![
        Column::new("a", TypeId::Integer, false, ColOid::new(1)),
        Column::new("b", TypeId::Integer, true, ColOid::new(2)),
        Column::new("c", TypeId::Integer, true, ColOid::new(3)),
    ])
}

fn setup() -> (Arc<TransactionManager>, Arc<SqlTable>) {
    let store = Arc::new(BlockStore::new(1 << 16, 1000, 100));
    let table = Arc::new(SqlTable::new(store, three_int_schema(), TableOid::new(7)));
    (Arc::new(TransactionManager::new()), table)
}

fn int_row(a: i32, b: i32, c: i32) -> Vec<Option<Value>> {
    vec![
        Some(Value::Integer(a)),
        Some(Value::Integer(b)),
        Some(Value::Integer(c)),
    ]
}

#[test]
fn committed_insert_becomes_visible_to_later_readers() {
    let (manager, table) = setup();

    let early_reader = manager.begin();
    let writer = manager.begin();
    let slot = table.insert(&writer, &int_row(1, 2, 3)).unwrap();

    // Uncommitted: hidden from others, visible to the writer.
    assert!(table.select(&early_reader, slot).is_none());
    assert_eq!(table.select(&writer, slot), Some(int_row(1, 2, 3)));

    manager.commit(writer, || {}).unwrap();

    // A reader that began before the commit still must not see it.
    assert!(table.select(&early_reader, slot).is_none());
    manager.commit(early_reader, || {}).unwrap();

    let late_reader = manager.begin();
    assert_eq!(table.select(&late_reader, slot), Some(int_row(1, 2, 3)));
    manager.commit(late_reader, || {}).unwrap();
}

#[test]
fn reader_sees_snapshot_despite_later_update() {
    let (manager, table) = setup();

    let writer = manager.begin();
    let slot = table.insert(&writer, &int_row(10, 20, 30)).unwrap();
    manager.commit(writer, || {}).unwrap();

    let reader = manager.begin();
    let updater = manager.begin();
    assert!(table
        .update(&updater, slot, &[(ColOid::new(2), Some(Value::Integer(99)))])
        .unwrap());
    manager.commit(updater, || {}).unwrap();

    // The reader's snapshot predates the update.
    assert_eq!(table.select(&reader, slot), Some(int_row(10, 20, 30)));
    manager.commit(reader, || {}).unwrap();

    let fresh = manager.begin();
    assert_eq!(table.select(&fresh, slot), Some(int_row(10, 99, 30)));
    manager.commit(fresh, || {}).unwrap();
}

#[test]
fn concurrent_update_is_a_write_write_conflict() {
    let (manager, table) = setup();

    let writer = manager.begin();
    let slot = table.insert(&writer, &int_row(1, 1, 1)).unwrap();
    manager.commit(writer, || {}).unwrap();

    let t1 = manager.begin();
    let t2 = manager.begin();
    assert!(table
        .update(&t1, slot, &[(ColOid::new(1), Some(Value::Integer(2)))])
        .unwrap());
    // t2 must lose against t1's uncommitted head.
    assert!(!table
        .update(&t2, slot, &[(ColOid::new(1), Some(Value::Integer(3)))])
        .unwrap());
    manager.abort(t2);
    manager.commit(t1, || {}).unwrap();

    let reader = manager.begin();
    assert_eq!(table.select(&reader, slot), Some(int_row(2, 1, 1)));
    manager.commit(reader, || {}).unwrap();
}

#[test]
fn update_against_newer_committed_version_conflicts() {
    let (manager, table) = setup();

    let writer = manager.begin();
    let slot = table.insert(&writer, &int_row(1, 1, 1)).unwrap();
    manager.commit(writer, || {}).unwrap();

    let stale = manager.begin();
    let quick = manager.begin();
    assert!(table
        .update(&quick, slot, &[(ColOid::new(1), Some(Value::Integer(5)))])
        .unwrap());
    manager.commit(quick, || {}).unwrap();

    // `stale` began before `quick` committed; its update must fail.
    assert!(!table
        .update(&stale, slot, &[(ColOid::new(1), Some(Value::Integer(7)))])
        .unwrap());
    manager.abort(stale);
}

#[test]
fn abort_restores_the_before_image() {
    let (manager, table) = setup();

    let writer = manager.begin();
    let slot = table.insert(&writer, &int_row(4, 5, 6)).unwrap();
    manager.commit(writer, || {}).unwrap();

    let doomed = manager.begin();
    assert!(table
        .update(&doomed, slot, &[(ColOid::new(2), Some(Value::Integer(50)))])
        .unwrap());
    assert!(table
        .update(&doomed, slot, &[(ColOid::new(3), None)])
        .unwrap());
    manager.abort(doomed);

    let reader = manager.begin();
    assert_eq!(table.select(&reader, slot), Some(int_row(4, 5, 6)));
    manager.commit(reader, || {}).unwrap();
}

#[test]
fn aborted_insert_never_surfaces() {
    let (manager, table) = setup();

    let doomed = manager.begin();
    let slot = table.insert(&doomed, &int_row(9, 9, 9)).unwrap();
    manager.abort(doomed);

    let reader = manager.begin();
    assert!(table.select(&reader, slot).is_none());
    manager.commit(reader, || {}).unwrap();
}

#[test]
fn delete_is_versioned_like_any_write() {
    let (manager, table) = setup();

    let writer = manager.begin();
    let slot = table.insert(&writer, &int_row(8, 8, 8)).unwrap();
    manager.commit(writer, || {}).unwrap();

    let old_reader = manager.begin();
    let deleter = manager.begin();
    assert!(table.delete(&deleter, slot));
    manager.commit(deleter, || {}).unwrap();

    // The old reader still sees the row; a fresh reader does not.
    assert_eq!(table.select(&old_reader, slot), Some(int_row(8, 8, 8)));
    manager.commit(old_reader, || {}).unwrap();

    let fresh = manager.begin();
    assert!(table.select(&fresh, slot).is_none());

    // Double delete refuses.
    assert!(!table.delete(&fresh, slot));
    manager.abort(fresh);
}

#[test]
fn scan_returns_exactly_the_visible_rows() {
    let (manager, table) = setup();

    let writer = manager.begin();
    for i in 0..10 {
        table.insert(&writer, &int_row(i, i, i)).unwrap();
    }
    manager.commit(writer, || {}).unwrap();

    let reader = manager.begin();
    let mut iter = table.begin();
    let mut batch = table.all_columns_batch(4);
    let mut seen = 0;
    loop {
        table.scan(&reader, &mut iter, &mut batch);
        if batch.num_tuples() == 0 {
            break;
        }
        seen += batch.num_tuples();
    }
    assert_eq!(seen, 10);
    manager.commit(reader, || {}).unwrap();
}

#[test]
fn reclamation_under_concurrent_readers_and_writers() {
    let (manager, table) = setup();

    let writer = manager.begin();
    let slots: Vec<_> = (0..8)
        .map(|i| table.insert(&writer, &int_row(i, 0, 0)).unwrap())
        .collect();
    manager.commit(writer, || {}).unwrap();

    let shutdown = ShutdownFlag::new();
    let gc_handle = spawn_gc_thread(
        GarbageCollector::new(Arc::clone(&manager)),
        Duration::from_millis(2),
        shutdown.clone(),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();
    for (i, slot) in slots.iter().copied().enumerate() {
        let manager = Arc::clone(&manager);
        let table = Arc::clone(&table);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            let mut committed = 0_i32;
            while !stop.load(Ordering::Relaxed) {
                let txn = manager.begin();
                let next = committed + 1;
                if table
                    .update(&txn, slot, &[(ColOid::new(2), Some(Value::Integer(next)))])
                    .unwrap()
                {
                    manager.commit(txn, || {}).unwrap();
                    committed = next;
                } else {
                    manager.abort(txn);
                }
            }
            (i, committed)
        }));
    }
    let reader_stop = Arc::clone(&stop);
    let reader_manager = Arc::clone(&manager);
    let reader_table = Arc::clone(&table);
    let reader = thread::spawn(move || {
        while !reader_stop.load(Ordering::Relaxed) {
            let txn = reader_manager.begin();
            let mut iter = reader_table.begin();
            let mut batch = reader_table.all_columns_batch(16);
            loop {
                reader_table.scan(&txn, &mut iter, &mut batch);
                if batch.num_tuples() == 0 {
                    break;
                }
            }
            reader_manager.commit(txn, || {}).unwrap();
        }
    });

    thread::sleep(Duration::from_millis(150));
    stop.store(true, Ordering::Relaxed);
    reader.join().unwrap();

    let mut finals = Vec::new();
    for handle in handles {
        finals.push(handle.join().unwrap());
    }

    shutdown.request();
    gc_handle.join().unwrap();

    // Every slot's visible counter equals that writer's committed count.
    let check = manager.begin();
    for (i, committed) in finals {
        let row = table.select(&check, slots[i]).unwrap();
        assert_eq!(row[1], Some(Value::Integer(committed)));
    }
    manager.commit(check, || {}).unwrap();
}
