//! The MVCC data table: versioned insert, update, select, scan, and delete
//! over slotted blocks.
//!
//! Writer protocol: a writer first installs its undo record at the head of
//! the slot's chain with a single-word CAS, then writes the base image. A
//! reader therefore always finds, somewhere in the chain, the before-image
//! of any base bytes it may have raced with; readers also re-check the chain
//! head after copying the base and retry if it moved.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use terrier_error::Result;
use terrier_storage::{slot_status, Block, BlockLayout, BlockStore, ProjectedColumns, ProjectedRow};
use terrier_types::{BlockId, ColId, TupleSlot};

use crate::txn::{TransactionContext, UndoHandle};
use crate::version::{is_uncommitted, UndoPayload, UndoRecord, VersionArena, VersionIdx};

/// Scan cursor: position within the table's block list.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableIter {
    block_pos: usize,
    slot: u32,
}

struct BlockList {
    order: Vec<Arc<Block>>,
    by_id: HashMap<BlockId, Arc<Block>>,
}

/// A versioned row store without schema knowledge; all access is in terms
/// of physical column ids and projected rows.
pub struct DataTable {
    layout: Arc<BlockLayout>,
    store: Arc<BlockStore>,
    arena: Arc<VersionArena>,
    blocks: RwLock<BlockList>,
}

impl DataTable {
    #[must_use]
    pub fn new(store: Arc<BlockStore>, layout: Arc<BlockLayout>) -> Self {
        Self {
            layout,
            store,
            arena: Arc::new(VersionArena::new()),
            blocks: RwLock::new(BlockList {
                order: Vec::new(),
                by_id: HashMap::new(),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn layout(&self) -> &Arc<BlockLayout> {
        &self.layout
    }

    #[inline]
    #[must_use]
    pub fn arena(&self) -> &Arc<VersionArena> {
        &self.arena
    }

    #[must_use]
    pub fn begin(&self) -> TableIter {
        TableIter::default()
    }

    /// Insert a full row, allocating a fresh slot. Fails only when the
    /// block store is exhausted.
    pub fn insert(&self, txn: &TransactionContext, row: &ProjectedRow) -> Result<TupleSlot> {
        debug_assert_eq!(row.num_columns(), self.layout.num_columns() as usize);
        let (block, index) = self.allocate_slot()?;
        let slot = TupleSlot::new(block.id(), index);

        let record = Arc::new(UndoRecord::new(slot, txn.tag(), 0, UndoPayload::Insert));
        let idx = self.arena.alloc(Arc::clone(&record));

        block.write_row(&self.layout, index, row);
        block.store_version_head(index, idx.encode());
        block.set_status(index, slot_status::OCCUPIED);

        txn.record_undo(UndoHandle {
            block,
            layout: Arc::clone(&self.layout),
            arena: Arc::clone(&self.arena),
            idx,
            record,
        });
        Ok(slot)
    }

    /// Install a new version at the head of `slot`'s chain. Returns `false`
    /// on a write-write conflict; the transaction must then abort.
    pub fn update(&self, txn: &TransactionContext, slot: TupleSlot, delta: &ProjectedRow) -> bool {
        let Some(block) = self.block(slot.block()) else {
            return false;
        };
        let index = slot.index();
        if index >= block.insert_head() {
            return false;
        }
        let head = block.version_head(index);
        if self.head_conflicts(head, txn, false) {
            return false;
        }

        let before = block.materialize(&self.layout, index, delta.col_ids());
        let record = Arc::new(UndoRecord::new(
            slot,
            txn.tag(),
            head,
            UndoPayload::Update(before),
        ));
        let idx = self.arena.alloc(Arc::clone(&record));
        if !block.cas_version_head(index, head, idx.encode()) {
            self.arena.free(idx);
            return false;
        }
        block.write_row(&self.layout, index, delta);
        txn.record_undo(UndoHandle {
            block,
            layout: Arc::clone(&self.layout),
            arena: Arc::clone(&self.arena),
            idx,
            record,
        });
        true
    }

    /// Logically delete `slot`. Returns `false` on conflict or if the tuple
    /// is already deleted.
    pub fn delete(&self, txn: &TransactionContext, slot: TupleSlot) -> bool {
        let Some(block) = self.block(slot.block()) else {
            return false;
        };
        let index = slot.index();
        if index >= block.insert_head() {
            return false;
        }
        let head = block.version_head(index);
        if self.head_conflicts(head, txn, true) {
            return false;
        }

        let before = block.materialize(&self.layout, index, &self.layout.all_col_ids());
        let record = Arc::new(UndoRecord::new(
            slot,
            txn.tag(),
            head,
            UndoPayload::Delete(before),
        ));
        let idx = self.arena.alloc(Arc::clone(&record));
        if !block.cas_version_head(index, head, idx.encode()) {
            self.arena.free(idx);
            return false;
        }
        block.set_status(index, slot_status::DELETED);
        txn.record_undo(UndoHandle {
            block,
            layout: Arc::clone(&self.layout),
            arena: Arc::clone(&self.arena),
            idx,
            record,
        });
        true
    }

    /// Reconstruct the image of `slot` visible to `txn`, or `None` if the
    /// tuple is not visible (never inserted for this reader, or deleted).
    #[must_use]
    pub fn select(
        &self,
        txn: &TransactionContext,
        slot: TupleSlot,
        cols: &[ColId],
    ) -> Option<ProjectedRow> {
        let block = self.block(slot.block())?;
        self.select_in_block(txn, &block, slot.index(), cols)
    }

    /// Advance the iterator, emitting tuples visible to `txn` until the
    /// batch is full or the table is exhausted. An empty batch means the
    /// scan is done.
    pub fn scan(&self, txn: &TransactionContext, iter: &mut TableIter, out: &mut ProjectedColumns) {
        out.clear();
        let blocks: Vec<Arc<Block>> = self.blocks.read().order.clone();
        while iter.block_pos < blocks.len() && !out.is_full() {
            let block = &blocks[iter.block_pos];
            let allocated = block.insert_head();
            while iter.slot < allocated && !out.is_full() {
                let index = iter.slot;
                iter.slot += 1;
                if let Some(row) = self.select_in_block(txn, block, index, out.col_ids()) {
                    out.push(TupleSlot::new(block.id(), index), row);
                }
            }
            if iter.slot >= allocated {
                iter.block_pos += 1;
                iter.slot = 0;
            }
        }
    }

    fn select_in_block(
        &self,
        txn: &TransactionContext,
        block: &Arc<Block>,
        index: u32,
        cols: &[ColId],
    ) -> Option<ProjectedRow> {
        if index >= block.insert_head() {
            return None;
        }
        // Copy the base, retrying if a writer installed a new version while
        // we copied; the version walk below then covers everything newer
        // than our snapshot of the base.
        let (head, status, mut row) = loop {
            let head = block.version_head(index);
            let status = block.status(index);
            let row = block.materialize(&self.layout, index, cols);
            if block.version_head(index) == head {
                break (head, status, row);
            }
        };

        let mut present = status == slot_status::OCCUPIED;
        let mut cursor = head;
        while let Some(idx) = VersionIdx::decode(cursor) {
            // A freed record is older than every active reader and would
            // have been the visible stopping point; the base already
            // reflects it.
            let Some(record) = self.arena.get(idx) else {
                break;
            };
            if record.visible_to(txn.start_ts(), txn.tag()) {
                break;
            }
            match record.payload() {
                UndoPayload::Insert => present = false,
                UndoPayload::Update(before) => row.apply_delta(before),
                UndoPayload::Delete(before) => {
                    present = true;
                    row.apply_delta(before);
                }
            }
            cursor = record.prev_word();
        }
        present.then_some(row)
    }

    /// Write-write conflict rule: the head is an obstacle if it is another
    /// transaction's uncommitted (or aborted-but-unlinked) version, or a
    /// committed version newer than the writer's start timestamp, or a
    /// committed delete (`deleting` distinguishes double-delete checks from
    /// updates of deleted tuples; both refuse).
    fn head_conflicts(&self, head: u64, txn: &TransactionContext, _deleting: bool) -> bool {
        let Some(idx) = VersionIdx::decode(head) else {
            return false;
        };
        let Some(record) = self.arena.get(idx) else {
            // Freed: committed before every active transaction began.
            return false;
        };
        if record.is_aborted() {
            return true;
        }
        let ts = record.ts_word();
        if is_uncommitted(ts) {
            return ts != txn.tag();
        }
        if ts > txn.start_ts().get() {
            return true;
        }
        // Visible committed delete: the tuple is gone for this writer.
        matches!(record.payload(), UndoPayload::Delete(_))
    }

    fn block(&self, id: BlockId) -> Option<Arc<Block>> {
        self.blocks.read().by_id.get(&id).cloned()
    }

    fn allocate_slot(&self) -> Result<(Arc<Block>, u32)> {
        loop {
            let current = self.blocks.read().order.last().cloned();
            match current {
                Some(block) => {
                    if let Some(index) = block.allocate_slot() {
                        return Ok((block, index));
                    }
                    self.grow(Some(block.id()))?;
                }
                None => self.grow(None)?,
            }
        }
    }

    /// Append a new insertion block, unless another thread already did.
    fn grow(&self, observed_last: Option<BlockId>) -> Result<()> {
        let mut list = self.blocks.write();
        if list.order.last().map(|b| b.id()) != observed_last {
            return Ok(());
        }
        let block = self.store.acquire(&self.layout)?;
        list.by_id.insert(block.id(), Arc::clone(&block));
        list.order.push(block);
        Ok(())
    }
}

impl Drop for DataTable {
    fn drop(&mut self) {
        let mut list = self.blocks.write();
        list.by_id.clear();
        for block in list.order.drain(..) {
            self.store.release(block);
        }
    }
}
