//! Schema-aware table wrapper.
//!
//! `SqlTable` converts between typed values and projected rows, maintains
//! the column-oid projection map, and records redo entries for every
//! mutation so the commit path can hand a complete segment to the log
//! manager. The `*_projected` variants are the raw interface used by
//! checkpoint recovery and WAL replay.

use std::sync::Arc;

use terrier_error::Result;
use terrier_storage::{AttrCell, BlockLayout, BlockStore, ProjectedColumns, ProjectedRow, VarlenEntry};
use terrier_types::{AttrSize, ColId, ColOid, Schema, TableOid, TupleSlot, TypeId, Value};
use terrier_wal::{RedoEntry, RedoKind};

use crate::data_table::{DataTable, TableIter};
use crate::txn::TransactionContext;

pub struct SqlTable {
    oid: TableOid,
    schema: Schema,
    layout: Arc<BlockLayout>,
    table: DataTable,
}

impl SqlTable {
    #[must_use]
    pub fn new(store: Arc<BlockStore>, schema: Schema, oid: TableOid) -> Self {
        let layout = Arc::new(BlockLayout::from_schema(&schema));
        let table = DataTable::new(store, Arc::clone(&layout));
        Self {
            oid,
            schema,
            layout,
            table,
        }
    }

    #[inline]
    #[must_use]
    pub const fn oid(&self) -> TableOid {
        self.oid
    }

    #[inline]
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    #[must_use]
    pub fn layout(&self) -> &Arc<BlockLayout> {
        &self.layout
    }

    #[inline]
    #[must_use]
    pub fn data_table(&self) -> &DataTable {
        &self.table
    }

    /// Physical column id for a schema column oid.
    #[must_use]
    pub fn col_id_for_oid(&self, oid: ColOid) -> Option<ColId> {
        self.schema
            .position_of_oid(oid)
            .map(|pos| self.layout.col_id(pos))
    }

    // --- typed surface ---

    /// Insert a full row of values, in schema column order.
    pub fn insert(
        &self,
        txn: &TransactionContext,
        values: &[Option<Value>],
    ) -> Result<TupleSlot> {
        debug_assert_eq!(values.len(), self.schema.num_columns());
        let mut row = ProjectedRow::new(self.layout.all_col_ids());
        for (pos, value) in values.iter().enumerate() {
            row.set_cell(pos, value.as_ref().map(|v| Self::value_to_cell(v)));
        }
        self.insert_projected(txn, &row)
    }

    /// Update the given columns of `slot`. `Ok(false)` is a write-write
    /// conflict: the transaction must abort.
    pub fn update(
        &self,
        txn: &TransactionContext,
        slot: TupleSlot,
        updates: &[(ColOid, Option<Value>)],
    ) -> Result<bool> {
        let col_ids: Vec<ColId> = updates
            .iter()
            .map(|(oid, _)| {
                self.col_id_for_oid(*oid)
                    .expect("update references a column absent from the schema")
            })
            .collect();
        let mut delta = ProjectedRow::new(col_ids);
        for (i, (_, value)) in updates.iter().enumerate() {
            delta.set_cell(i, value.as_ref().map(|v| Self::value_to_cell(v)));
        }
        Ok(self.update_projected(txn, slot, &delta))
    }

    /// Read the full row visible to `txn`, in schema column order.
    #[must_use]
    pub fn select(&self, txn: &TransactionContext, slot: TupleSlot) -> Option<Vec<Option<Value>>> {
        let row = self
            .table
            .select(txn, slot, &self.layout.all_col_ids())?;
        Some(self.row_to_values(&row))
    }

    /// Logically delete `slot`. `false` on conflict or double delete.
    pub fn delete(&self, txn: &TransactionContext, slot: TupleSlot) -> bool {
        if !self.table.delete(txn, slot) {
            return false;
        }
        txn.record_redo(RedoEntry {
            kind: RedoKind::Delete,
            table_oid: self.oid,
            slot,
            row: None,
        });
        true
    }

    // --- projected surface (recovery, checkpoint, replay) ---

    pub fn insert_projected(
        &self,
        txn: &TransactionContext,
        row: &ProjectedRow,
    ) -> Result<TupleSlot> {
        let slot = self.table.insert(txn, row)?;
        txn.record_redo(RedoEntry {
            kind: RedoKind::Insert,
            table_oid: self.oid,
            slot,
            row: Some(row.clone()),
        });
        Ok(slot)
    }

    pub fn update_projected(
        &self,
        txn: &TransactionContext,
        slot: TupleSlot,
        delta: &ProjectedRow,
    ) -> bool {
        if !self.table.update(txn, slot, delta) {
            return false;
        }
        txn.record_redo(RedoEntry {
            kind: RedoKind::Update,
            table_oid: self.oid,
            slot,
            row: Some(delta.clone()),
        });
        true
    }

    #[must_use]
    pub fn select_projected(
        &self,
        txn: &TransactionContext,
        slot: TupleSlot,
        cols: &[ColId],
    ) -> Option<ProjectedRow> {
        self.table.select(txn, slot, cols)
    }

    #[must_use]
    pub fn begin(&self) -> TableIter {
        self.table.begin()
    }

    pub fn scan(
        &self,
        txn: &TransactionContext,
        iter: &mut TableIter,
        out: &mut ProjectedColumns,
    ) {
        self.table.scan(txn, iter, out);
    }

    /// A scan batch over every data column.
    #[must_use]
    pub fn all_columns_batch(&self, max_tuples: usize) -> ProjectedColumns {
        ProjectedColumns::new(max_tuples, self.layout.all_col_ids())
    }

    // --- conversions ---

    /// Decode a full-projection row into schema-ordered values.
    #[must_use]
    pub fn row_to_values(&self, row: &ProjectedRow) -> Vec<Option<Value>> {
        debug_assert_eq!(row.num_columns(), self.schema.num_columns());
        self.schema
            .columns()
            .iter()
            .enumerate()
            .map(|(pos, column)| {
                row.cell(pos)
                    .map(|cell| Self::cell_to_value(column.type_id(), cell))
            })
            .collect()
    }

    fn value_to_cell(value: &Value) -> AttrCell {
        match value {
            Value::Varchar(s) => AttrCell::Var(VarlenEntry::from_bytes(s.as_bytes())),
            fixed => {
                let word = fixed
                    .as_fixed_word()
                    .expect("non-varchar values have a fixed representation");
                let AttrSize::Fixed(size) = fixed.type_id().attr_size() else {
                    unreachable!("non-varchar types are fixed width");
                };
                AttrCell::Fixed { size, word }
            }
        }
    }

    fn cell_to_value(type_id: TypeId, cell: &AttrCell) -> Value {
        match cell {
            AttrCell::Fixed { word, .. } => Value::from_fixed_word(type_id, *word)
                .expect("fixed cell for a fixed-width column"),
            AttrCell::Var(entry) => {
                Value::Varchar(String::from_utf8_lossy(entry.as_bytes()).into_owned())
            }
        }
    }
}
