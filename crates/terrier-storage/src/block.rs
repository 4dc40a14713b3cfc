//! Blocks and the block store.
//!
//! A block is a fixed-size byte region sliced into slot records by a
//! [`BlockLayout`], plus the two reserved columns held as atomic side
//! arrays: the per-slot version-chain head (a single CAS-able word) and the
//! per-slot status byte. Raw cell data is guarded by one read-write lock per
//! block; version installation order, not the lock, is what readers rely on
//! for consistency.
//!
//! The block store owns allocation: blocks are drawn against a capacity
//! limit and their buffers are recycled through a bounded reuse pool.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use terrier_error::{Result, TerrierError};
use terrier_types::{AttrSize, BlockId, ColId};

use crate::layout::BlockLayout;
use crate::projected::{AttrCell, ProjectedRow};
use crate::varlen::VarlenEntry;

/// Slot status values (reserved column 1).
pub mod slot_status {
    /// Never allocated, or allocation was rolled back.
    pub const UNALLOCATED: u8 = 0;
    /// Holds a live base image.
    pub const OCCUPIED: u8 = 1;
    /// Logically deleted; the chain may still make it visible to old
    /// readers until GC unlinks the delete version.
    pub const DELETED: u8 = 2;
}

/// A fixed-size storage block.
#[derive(Debug)]
pub struct Block {
    id: BlockId,
    capacity: u32,
    insert_head: AtomicU32,
    /// Reserved column 0: encoded version-chain head per slot (0 = none).
    version_heads: Vec<AtomicU64>,
    /// Reserved column 1: slot status per slot.
    status: Vec<AtomicU8>,
    inner: RwLock<BlockInner>,
}

#[derive(Debug)]
struct BlockInner {
    data: Box<[u8]>,
    /// Indirect varlen storage; cells hold `heap index + 1`, zero meaning
    /// no entry, so freshly zeroed buffers decode as empty.
    varlens: Vec<Option<VarlenEntry>>,
    free_varlens: Vec<u32>,
}

impl Block {
    fn new(id: BlockId, layout: &BlockLayout, data: Box<[u8]>) -> Self {
        let capacity = layout.capacity_for(data.len());
        let mut version_heads = Vec::with_capacity(capacity as usize);
        let mut status = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            version_heads.push(AtomicU64::new(0));
            status.push(AtomicU8::new(slot_status::UNALLOCATED));
        }
        Self {
            id,
            capacity,
            insert_head: AtomicU32::new(0),
            version_heads,
            status,
            inner: RwLock::new(BlockInner {
                data,
                varlens: Vec::new(),
                free_varlens: Vec::new(),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots handed out so far.
    #[inline]
    #[must_use]
    pub fn insert_head(&self) -> u32 {
        self.insert_head.load(Ordering::Acquire).min(self.capacity)
    }

    /// Claim the next sequential slot, or `None` if the block is full.
    pub fn allocate_slot(&self) -> Option<u32> {
        self.insert_head
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |head| {
                (head < self.capacity).then_some(head + 1)
            })
            .ok()
    }

    // --- reserved column 0: version chain head ---

    #[inline]
    #[must_use]
    pub fn version_head(&self, index: u32) -> u64 {
        self.version_heads[index as usize].load(Ordering::Acquire)
    }

    pub fn store_version_head(&self, index: u32, value: u64) {
        self.version_heads[index as usize].store(value, Ordering::Release);
    }

    /// Single-word CAS on the chain head; the only way an update becomes
    /// the newest version.
    pub fn cas_version_head(&self, index: u32, expected: u64, value: u64) -> bool {
        self.version_heads[index as usize]
            .compare_exchange(expected, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // --- reserved column 1: slot status ---

    #[inline]
    #[must_use]
    pub fn status(&self, index: u32) -> u8 {
        self.status[index as usize].load(Ordering::Acquire)
    }

    pub fn set_status(&self, index: u32, value: u8) {
        self.status[index as usize].store(value, Ordering::Release);
    }

    // --- cell data ---

    /// Copy the requested columns of slot `index` into an owned row.
    #[must_use]
    pub fn materialize(&self, layout: &BlockLayout, index: u32, cols: &[ColId]) -> ProjectedRow {
        let inner = self.inner.read();
        let slot_at = layout.slot_offset(index);
        let mut row = ProjectedRow::new(cols.iter().copied());
        for (i, col) in cols.iter().enumerate() {
            let pos = layout.position(*col);
            let null = inner.data[slot_at + pos / 8] & (1 << (pos % 8)) != 0;
            if null {
                continue;
            }
            let cell_at = slot_at + layout.cell_offset(*col);
            let cell = match layout.attr_size(*col) {
                AttrSize::Fixed(size) => {
                    let mut word_bytes = [0_u8; 8];
                    word_bytes[..size as usize]
                        .copy_from_slice(&inner.data[cell_at..cell_at + size as usize]);
                    AttrCell::Fixed {
                        size,
                        word: u64::from_le_bytes(word_bytes),
                    }
                }
                AttrSize::Var => {
                    let raw = u32::from_le_bytes(
                        inner.data[cell_at..cell_at + 4].try_into().expect("4 bytes"),
                    );
                    if raw == 0 {
                        // Zeroed cell on a slot that was never written
                        // through this column; treat as null.
                        continue;
                    }
                    match &inner.varlens[(raw - 1) as usize] {
                        Some(entry) => AttrCell::Var(entry.clone()),
                        None => continue,
                    }
                }
            };
            row.set_cell(i, Some(cell));
        }
        row
    }

    /// Write the row's cells into slot `index`. Columns not projected by the
    /// row keep their previous contents.
    pub fn write_row(&self, layout: &BlockLayout, index: u32, row: &ProjectedRow) {
        let mut inner = self.inner.write();
        let slot_at = layout.slot_offset(index);
        for (i, col) in row.col_ids().iter().enumerate() {
            let pos = layout.position(*col);
            let bitmap_at = slot_at + pos / 8;
            let bit = 1 << (pos % 8);
            let cell_at = slot_at + layout.cell_offset(*col);
            let is_varlen = matches!(layout.attr_size(*col), AttrSize::Var);
            if is_varlen {
                let raw = u32::from_le_bytes(
                    inner.data[cell_at..cell_at + 4].try_into().expect("4 bytes"),
                );
                if raw != 0 {
                    inner.varlens[(raw - 1) as usize] = None;
                    inner.free_varlens.push(raw - 1);
                    inner.data[cell_at..cell_at + 4].copy_from_slice(&0_u32.to_le_bytes());
                }
            }
            match row.cell(i) {
                None => {
                    inner.data[bitmap_at] |= bit;
                }
                Some(AttrCell::Fixed { size, word }) => {
                    debug_assert_eq!(layout.attr_size(*col), AttrSize::Fixed(*size));
                    inner.data[bitmap_at] &= !bit;
                    let bytes = word.to_le_bytes();
                    inner.data[cell_at..cell_at + *size as usize]
                        .copy_from_slice(&bytes[..*size as usize]);
                }
                Some(AttrCell::Var(entry)) => {
                    debug_assert!(is_varlen);
                    inner.data[bitmap_at] &= !bit;
                    let heap_idx = match inner.free_varlens.pop() {
                        Some(free) => {
                            inner.varlens[free as usize] = Some(entry.clone());
                            free
                        }
                        None => {
                            inner.varlens.push(Some(entry.clone()));
                            (inner.varlens.len() - 1) as u32
                        }
                    };
                    inner.data[cell_at..cell_at + 4]
                        .copy_from_slice(&(heap_idx + 1).to_le_bytes());
                }
            }
        }
    }

    fn into_buffer(self) -> Box<[u8]> {
        self.inner.into_inner().data
    }
}

/// Allocates blocks against a capacity limit and recycles their buffers
/// through a bounded reuse pool.
pub struct BlockStore {
    block_size: u32,
    capacity: usize,
    reuse_limit: usize,
    free_buffers: Mutex<Vec<Box<[u8]>>>,
    outstanding: AtomicUsize,
    next_id: AtomicU64,
}

impl BlockStore {
    #[must_use]
    pub fn new(block_size: u32, capacity: usize, reuse_limit: usize) -> Self {
        Self {
            block_size,
            capacity: capacity.max(1),
            reuse_limit,
            free_buffers: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Hand out a block able to hold at least one slot of `layout`. A row
    /// wider than the configured block size gets a dedicated buffer of the
    /// required size; such buffers are not recycled.
    pub fn acquire(&self, layout: &BlockLayout) -> Result<Arc<Block>> {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map_err(|n| {
                debug!(outstanding = n, capacity = self.capacity, "block store exhausted");
                TerrierError::AllocationExhausted {
                    outstanding: n,
                    capacity: self.capacity,
                }
            })?;

        let needed = (self.block_size as usize).max(layout.min_buffer_bytes());
        let buffer = if needed == self.block_size as usize {
            self.free_buffers.lock().pop()
        } else {
            None
        };
        let buffer = match buffer {
            Some(mut reused) => {
                reused.fill(0);
                reused
            }
            None => vec![0_u8; needed].into_boxed_slice(),
        };
        let id = BlockId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        Ok(Arc::new(Block::new(id, layout, buffer)))
    }

    /// Return a block. The buffer is recycled when this was the last
    /// reference and the reuse pool has room.
    pub fn release(&self, block: Arc<Block>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if let Some(block) = Arc::into_inner(block) {
            let buffer = block.into_buffer();
            if buffer.len() == self.block_size as usize {
                let mut pool = self.free_buffers.lock();
                if pool.len() < self.reuse_limit {
                    pool.push(buffer);
                }
            }
        }
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrier_types::AttrSize;

    fn small_layout() -> BlockLayout {
        BlockLayout::new(vec![AttrSize::Fixed(4), AttrSize::Var])
    }

    #[test]
    fn slot_allocation_is_sequential_and_bounded() {
        let store = BlockStore::new(4096, 4, 4);
        let layout = small_layout();
        let block = store.acquire(&layout).unwrap();
        let mut previous = None;
        while let Some(slot) = block.allocate_slot() {
            if let Some(p) = previous {
                assert_eq!(slot, p + 1);
            }
            previous = Some(slot);
        }
        assert_eq!(block.insert_head(), block.capacity());
    }

    #[test]
    fn store_exhaustion_surfaces() {
        let store = BlockStore::new(4096, 2, 2);
        let layout = small_layout();
        let _a = store.acquire(&layout).unwrap();
        let _b = store.acquire(&layout).unwrap();
        let err = store.acquire(&layout).unwrap_err();
        assert!(matches!(err, TerrierError::AllocationExhausted { .. }));
    }

    #[test]
    fn release_recycles_buffers() {
        let store = BlockStore::new(4096, 2, 2);
        let layout = small_layout();
        let block = store.acquire(&layout).unwrap();
        let first_id = block.id();
        store.release(block);
        assert_eq!(store.outstanding(), 0);
        let block = store.acquire(&layout).unwrap();
        assert_ne!(block.id(), first_id);
    }

    #[test]
    fn write_then_materialize_round_trips_cells() {
        let store = BlockStore::new(4096, 1, 0);
        let layout = small_layout();
        let block = store.acquire(&layout).unwrap();
        let index = block.allocate_slot().unwrap();

        let cols = layout.all_col_ids();
        let mut row = ProjectedRow::new(cols.iter().copied());
        row.set_cell(0, Some(AttrCell::Fixed { size: 4, word: 99 }));
        row.set_cell(
            1,
            Some(AttrCell::Var(VarlenEntry::from_bytes(b"varlen payload here"))),
        );
        block.write_row(&layout, index, &row);

        let back = block.materialize(&layout, index, &cols);
        assert_eq!(back, row);

        // Overwrite with a null varlen; the heap entry is released.
        let mut update = ProjectedRow::new([cols[1]]);
        update.set_cell(0, None);
        block.write_row(&layout, index, &update);
        let back = block.materialize(&layout, index, &cols);
        assert!(back.is_null(1));
        assert!(!back.is_null(0));
    }

    #[test]
    fn huge_slot_gets_dedicated_buffer() {
        let store = BlockStore::new(64, 1, 0);
        let layout = BlockLayout::new(vec![AttrSize::Fixed(8); 512]);
        let block = store.acquire(&layout).unwrap();
        assert_eq!(block.capacity(), 1);
        assert!(block.allocate_slot().is_some());
        assert!(block.allocate_slot().is_none());
    }
}
