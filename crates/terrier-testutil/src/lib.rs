//! Shared test scaffolding: seeded random tables, row-multiset printing,
//! and the concurrent OLTP workload used by the durability round-trip
//! tests.

use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use terrier_error::Result;
use terrier_mvcc::{SqlTable, TransactionManager};
use terrier_storage::BlockStore;
use terrier_types::{ColOid, Column, Schema, TableOid, TupleSlot, TypeId, Value};

/// A block store sized like the recovery tests expect: generous capacity,
/// modest reuse pool.
#[must_use]
pub fn test_block_store(block_size: u32) -> Arc<BlockStore> {
    Arc::new(BlockStore::new(block_size, 10_000, 100))
}

/// A schema of `num_columns` nullable columns with sequential oids starting
/// at 100: INTEGER throughout, with every third column VARCHAR when
/// `varlen_allowed`.
#[must_use]
pub fn random_schema(num_columns: usize, varlen_allowed: bool) -> Schema {
    let columns = (0..num_columns)
        .map(|i| {
            let type_id = if varlen_allowed && i % 3 == 2 {
                TypeId::Varchar
            } else {
                TypeId::Integer
            };
            Column::new(
                format!("col{i}"),
                type_id,
                true,
                ColOid::new(100 + i as u32),
            )
        })
        .collect();
    Schema::new(columns)
}

/// A random value of the given type.
#[must_use]
pub fn random_value(rng: &mut StdRng, type_id: TypeId) -> Value {
    match type_id {
        TypeId::Boolean => Value::Boolean(rng.gen()),
        TypeId::TinyInt => Value::TinyInt(rng.gen()),
        TypeId::SmallInt => Value::SmallInt(rng.gen()),
        TypeId::Integer => Value::Integer(rng.gen()),
        TypeId::BigInt => Value::BigInt(rng.gen()),
        TypeId::Varchar => {
            let len = rng.gen_range(0..40);
            let text: String = (0..len)
                .map(|_| rng.gen_range(b'a'..=b'z') as char)
                .collect();
            Value::Varchar(text)
        }
    }
}

/// A random row for `schema`, each column null with probability
/// `null_bias`.
#[must_use]
pub fn random_row(rng: &mut StdRng, schema: &Schema, null_bias: f64) -> Vec<Option<Value>> {
    schema
        .columns()
        .iter()
        .map(|column| {
            if rng.gen_bool(null_bias) {
                None
            } else {
                Some(random_value(rng, column.type_id()))
            }
        })
        .collect()
}

/// Create a table and populate it with `num_rows` seeded random rows in a
/// single committed transaction. Returns the table and the inserted slots.
#[allow(clippy::too_many_arguments)]
pub fn populate_random_table(
    txn_manager: &TransactionManager,
    store: Arc<BlockStore>,
    oid: TableOid,
    num_columns: usize,
    varlen_allowed: bool,
    seed: u64,
    num_rows: usize,
    null_bias: f64,
) -> Result<(Arc<SqlTable>, Vec<TupleSlot>)> {
    let schema = random_schema(num_columns, varlen_allowed);
    let table = Arc::new(SqlTable::new(store, schema, oid));
    let mut rng = StdRng::seed_from_u64(seed);

    let txn = txn_manager.begin();
    let mut slots = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let row = random_row(&mut rng, table.schema(), null_bias);
        slots.push(table.insert(&txn, &row)?);
    }
    txn_manager.commit(txn, || {})?;
    Ok((table, slots))
}

/// Print every visible row of `table` as a canonical string, under a fresh
/// committed transaction. Sort the result for multiset comparison.
#[must_use]
pub fn print_all_rows(txn_manager: &TransactionManager, table: &SqlTable) -> Vec<String> {
    let txn = txn_manager.begin();
    let mut printed = Vec::new();
    let mut iter = table.begin();
    let mut batch = table.all_columns_batch(100);
    loop {
        table.scan(&txn, &mut iter, &mut batch);
        if batch.num_tuples() == 0 {
            break;
        }
        for (_, row) in batch.rows() {
            let values = table.row_to_values(row);
            let text: Vec<String> = values
                .iter()
                .map(|v| v.as_ref().map_or_else(|| "NULL".into(), Value::to_string))
                .collect();
            printed.push(text.join(","));
        }
    }
    txn_manager
        .commit(txn, || {})
        .expect("read-only scan transaction commits");
    printed
}

/// Sorted copy, for order-insensitive multiset comparison.
#[must_use]
pub fn sorted(mut rows: Vec<String>) -> Vec<String> {
    rows.sort();
    rows
}

/// Parameters of the concurrent update/select mix.
#[derive(Debug, Clone, Copy)]
pub struct OltpConfig {
    pub num_txns: usize,
    pub ops_per_txn: usize,
    pub update_ratio: f64,
    pub threads: usize,
    pub seed: u64,
}

/// Outcome counts of a workload run.
#[derive(Debug, Default, Clone, Copy)]
pub struct OltpOutcome {
    pub committed: usize,
    pub aborted: usize,
}

/// Run `num_txns` transactions of `ops_per_txn` operations (updates and
/// selects over random pre-existing slots) across `threads` threads. A
/// transaction that loses a write-write conflict aborts, as the conflict
/// rule requires.
pub fn simulate_oltp(
    txn_manager: &Arc<TransactionManager>,
    table: &Arc<SqlTable>,
    slots: &[TupleSlot],
    config: OltpConfig,
) -> OltpOutcome {
    let slots: Arc<Vec<TupleSlot>> = Arc::new(slots.to_vec());
    let mut handles = Vec::new();
    for thread_id in 0..config.threads {
        let txn_manager = Arc::clone(txn_manager);
        let table = Arc::clone(table);
        let slots = Arc::clone(&slots);
        let txns_here = config.num_txns / config.threads
            + usize::from(thread_id < config.num_txns % config.threads);
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(thread_id as u64));
            let mut outcome = OltpOutcome::default();
            for _ in 0..txns_here {
                let txn = txn_manager.begin();
                let mut conflicted = false;
                for _ in 0..config.ops_per_txn {
                    let slot = slots[rng.gen_range(0..slots.len())];
                    if rng.gen_bool(config.update_ratio) {
                        let position = rng.gen_range(0..table.schema().num_columns());
                        let column = table.schema().column(position);
                        let value = Some(random_value(&mut rng, column.type_id()));
                        let installed = table
                            .update(&txn, slot, &[(column.oid(), value)])
                            .expect("update only fails on conflict, reported as false");
                        if !installed {
                            conflicted = true;
                            break;
                        }
                    } else {
                        let _ = table.select(&txn, slot);
                    }
                }
                if conflicted {
                    txn_manager.abort(txn);
                    outcome.aborted += 1;
                } else {
                    txn_manager
                        .commit(txn, || {})
                        .expect("commit of a conflict-free transaction");
                    outcome.committed += 1;
                }
            }
            outcome
        }));
    }
    let mut total = OltpOutcome::default();
    for handle in handles {
        let outcome = handle.join().expect("workload thread panicked");
        total.committed += outcome.committed;
        total.aborted += outcome.aborted;
    }
    total
}
