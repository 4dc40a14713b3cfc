//! Block layout descriptors.
//!
//! A layout is an ordered list of attribute sizes derived from a table
//! schema. Per-slot storage is row-major: a null bitmap followed by one cell
//! per data column. The two reserved columns (version-chain head and slot
//! status) are materialized as atomic side arrays on the block itself so the
//! chain head stays a single CAS-able word.

use terrier_types::{AttrSize, ColId, Schema};

/// Reserved physical columns: the MVCC version pointer and the slot status
/// word occupy column ids 0 and 1.
pub const NUM_RESERVED_COLUMNS: u16 = 2;

/// Bytes reserved at the head of each block for its header (slot count and
/// layout reference).
pub const BLOCK_HEADER_BYTES: usize = 8;

/// Ordered attribute sizes plus the derived per-slot geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    attr_sizes: Vec<AttrSize>,
    /// Byte offset of each data column's cell within a slot record,
    /// relative to the end of the null bitmap.
    cell_offsets: Vec<usize>,
    bitmap_bytes: usize,
    slot_bytes: usize,
}

impl BlockLayout {
    #[must_use]
    pub fn new(attr_sizes: Vec<AttrSize>) -> Self {
        debug_assert!(!attr_sizes.is_empty(), "layout needs at least one column");
        let bitmap_bytes = attr_sizes.len().div_ceil(8);
        let mut cell_offsets = Vec::with_capacity(attr_sizes.len());
        let mut cursor = 0_usize;
        for size in &attr_sizes {
            cell_offsets.push(cursor);
            cursor += size.cell_bytes();
        }
        Self {
            attr_sizes,
            cell_offsets,
            bitmap_bytes,
            slot_bytes: bitmap_bytes + cursor,
        }
    }

    /// Build a layout from a table schema, in schema column order.
    #[must_use]
    pub fn from_schema(schema: &Schema) -> Self {
        Self::new(
            schema
                .columns()
                .iter()
                .map(|c| c.type_id().attr_size())
                .collect(),
        )
    }

    /// Number of data columns (reserved columns excluded).
    #[inline]
    #[must_use]
    pub fn num_columns(&self) -> u16 {
        self.attr_sizes.len() as u16
    }

    /// Physical column id of the data column at schema position `position`.
    #[inline]
    #[must_use]
    pub fn col_id(&self, position: usize) -> ColId {
        ColId::new(position as u16 + NUM_RESERVED_COLUMNS)
    }

    /// Schema position of a physical column id.
    #[inline]
    #[must_use]
    pub fn position(&self, col: ColId) -> usize {
        debug_assert!(col.get() >= NUM_RESERVED_COLUMNS);
        (col.get() - NUM_RESERVED_COLUMNS) as usize
    }

    /// All data column ids, in schema order.
    #[must_use]
    pub fn all_col_ids(&self) -> Vec<ColId> {
        (0..self.attr_sizes.len()).map(|i| self.col_id(i)).collect()
    }

    #[inline]
    #[must_use]
    pub fn attr_size(&self, col: ColId) -> AttrSize {
        self.attr_sizes[self.position(col)]
    }

    /// Bytes occupied by one slot record (bitmap plus cells).
    #[inline]
    #[must_use]
    pub const fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }

    #[inline]
    #[must_use]
    pub const fn bitmap_bytes(&self) -> usize {
        self.bitmap_bytes
    }

    /// Byte offset of `col`'s cell from the start of its slot record.
    #[inline]
    #[must_use]
    pub fn cell_offset(&self, col: ColId) -> usize {
        self.bitmap_bytes + self.cell_offsets[self.position(col)]
    }

    /// Byte offset of slot `index`'s record from the start of the block
    /// data region.
    #[inline]
    #[must_use]
    pub fn slot_offset(&self, index: u32) -> usize {
        BLOCK_HEADER_BYTES + index as usize * self.slot_bytes
    }

    /// Number of slots a buffer of `buffer_bytes` can hold. At least one:
    /// a row wider than the configured block size gets a dedicated,
    /// appropriately sized block instead of being rejected.
    #[must_use]
    pub fn capacity_for(&self, buffer_bytes: usize) -> u32 {
        let usable = buffer_bytes.saturating_sub(BLOCK_HEADER_BYTES);
        ((usable / self.slot_bytes) as u32).max(1)
    }

    /// Minimum buffer size able to hold a single slot.
    #[must_use]
    pub const fn min_buffer_bytes(&self) -> usize {
        BLOCK_HEADER_BYTES + self.slot_bytes
    }
}
