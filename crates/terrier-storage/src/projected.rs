//! Projected rows and columns: the positional, column-subset views that form
//! the unit of read and write at the storage interface.
//!
//! A [`ProjectedRow`] owns its cells, carries its own null information, and
//! round-trips through a self-describing wire encoding — the
//! `projected_row_bytes` payload of both the WAL and checkpoint formats:
//!
//! ```text
//! row   := num_cols(u16) | col_id(u16)* | null_bitmap(ceil(n/8))
//!        | cell*                                  (non-null columns only)
//! cell  := tag(u8) | body
//! tag   := 1|2|4|8  -> body is tag bytes of fixed-width data (LE)
//!        | 0xFF     -> body is len(u32) | len bytes of varlen content
//! ```

use smallvec::SmallVec;
use terrier_error::{Result, TerrierError};
use terrier_types::encoding::{append_u16_le, append_u32_le, read_u16_le, read_u32_le};
use terrier_types::{ColId, TupleSlot};

use crate::varlen::VarlenEntry;

const VARLEN_CELL_TAG: u8 = 0xFF;

/// One non-null attribute cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrCell {
    /// Fixed-width value, held as its little-endian word plus its width.
    Fixed { size: u8, word: u64 },
    /// Variable-length value.
    Var(VarlenEntry),
}

/// A positional, column-subset view over one tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedRow {
    col_ids: SmallVec<[ColId; 8]>,
    cells: Vec<Option<AttrCell>>,
}

impl ProjectedRow {
    /// A row over the given columns, all-null until cells are set.
    #[must_use]
    pub fn new(col_ids: impl IntoIterator<Item = ColId>) -> Self {
        let col_ids: SmallVec<[ColId; 8]> = col_ids.into_iter().collect();
        let cells = vec![None; col_ids.len()];
        Self { col_ids, cells }
    }

    #[inline]
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.col_ids.len()
    }

    #[inline]
    #[must_use]
    pub fn col_ids(&self) -> &[ColId] {
        &self.col_ids
    }

    /// Projection index of a physical column, if present.
    #[must_use]
    pub fn index_of(&self, col: ColId) -> Option<usize> {
        self.col_ids.iter().position(|c| *c == col)
    }

    #[inline]
    #[must_use]
    pub fn cell(&self, index: usize) -> Option<&AttrCell> {
        self.cells[index].as_ref()
    }

    #[inline]
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.cells[index].is_none()
    }

    pub fn set_cell(&mut self, index: usize, cell: Option<AttrCell>) {
        self.cells[index] = cell;
    }

    /// Overwrite this row's cells with those of `delta`, for every column
    /// both rows project. Used when applying undo deltas newest-first during
    /// version-chain traversal.
    pub fn apply_delta(&mut self, delta: &ProjectedRow) {
        for (delta_idx, col) in delta.col_ids.iter().enumerate() {
            if let Some(own_idx) = self.index_of(*col) {
                self.cells[own_idx] = delta.cells[delta_idx].clone();
            }
        }
    }

    /// Serialize into the self-describing wire form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.col_ids.len();
        let mut out = Vec::with_capacity(4 + n * 10);
        append_u16_le(&mut out, n as u16);
        for col in &self.col_ids {
            append_u16_le(&mut out, col.get());
        }
        let bitmap_at = out.len();
        out.resize(bitmap_at + n.div_ceil(8), 0);
        for (i, cell) in self.cells.iter().enumerate() {
            let Some(cell) = cell else {
                out[bitmap_at + i / 8] |= 1 << (i % 8);
                continue;
            };
            match cell {
                AttrCell::Fixed { size, word } => {
                    out.push(*size);
                    out.extend_from_slice(&word.to_le_bytes()[..*size as usize]);
                }
                AttrCell::Var(entry) => {
                    out.push(VARLEN_CELL_TAG);
                    append_u32_le(&mut out, entry.len() as u32);
                    out.extend_from_slice(entry.as_bytes());
                }
            }
        }
        out
    }

    /// Decode a row from its wire form. `base_offset` is the file offset of
    /// `buf[0]`, used only to report corruption positions.
    pub fn from_bytes(buf: &[u8], base_offset: u64) -> Result<Self> {
        let corrupt = |at: usize, detail: &str| TerrierError::RecoveryCorrupt {
            offset: base_offset + at as u64,
            detail: detail.to_owned(),
        };
        if buf.len() < 2 {
            return Err(corrupt(0, "projected row shorter than its column count"));
        }
        let n = read_u16_le(buf, 0) as usize;
        let ids_end = 2 + n * 2;
        let bitmap_bytes = n.div_ceil(8);
        let cells_at = ids_end + bitmap_bytes;
        if buf.len() < cells_at {
            return Err(corrupt(buf.len(), "projected row header truncated"));
        }
        let col_ids: SmallVec<[ColId; 8]> = (0..n)
            .map(|i| ColId::new(read_u16_le(buf, 2 + i * 2)))
            .collect();
        let bitmap = &buf[ids_end..cells_at];

        let mut cells = Vec::with_capacity(n);
        let mut cursor = cells_at;
        for i in 0..n {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                cells.push(None);
                continue;
            }
            if cursor >= buf.len() {
                return Err(corrupt(cursor, "projected row cell truncated"));
            }
            let tag = buf[cursor];
            cursor += 1;
            match tag {
                1 | 2 | 4 | 8 => {
                    let size = tag as usize;
                    if buf.len() < cursor + size {
                        return Err(corrupt(cursor, "fixed cell truncated"));
                    }
                    let mut word_bytes = [0_u8; 8];
                    word_bytes[..size].copy_from_slice(&buf[cursor..cursor + size]);
                    cells.push(Some(AttrCell::Fixed {
                        size: tag,
                        word: u64::from_le_bytes(word_bytes),
                    }));
                    cursor += size;
                }
                VARLEN_CELL_TAG => {
                    if buf.len() < cursor + 4 {
                        return Err(corrupt(cursor, "varlen cell length truncated"));
                    }
                    let len = read_u32_le(buf, cursor) as usize;
                    cursor += 4;
                    if buf.len() < cursor + len {
                        return Err(corrupt(cursor, "varlen cell content truncated"));
                    }
                    cells.push(Some(AttrCell::Var(VarlenEntry::from_bytes(
                        &buf[cursor..cursor + len],
                    ))));
                    cursor += len;
                }
                _ => return Err(corrupt(cursor - 1, "unknown cell tag")),
            }
        }
        if cursor != buf.len() {
            return Err(corrupt(cursor, "trailing bytes after projected row"));
        }
        Ok(Self { col_ids, cells })
    }
}

/// A batch of projected rows produced by a table scan, bounded by a caller
/// supplied tuple budget.
#[derive(Debug)]
pub struct ProjectedColumns {
    max_tuples: usize,
    col_ids: Vec<ColId>,
    rows: Vec<(TupleSlot, ProjectedRow)>,
}

impl ProjectedColumns {
    #[must_use]
    pub fn new(max_tuples: usize, col_ids: Vec<ColId>) -> Self {
        Self {
            max_tuples: max_tuples.max(1),
            col_ids,
            rows: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn max_tuples(&self) -> usize {
        self.max_tuples
    }

    #[inline]
    #[must_use]
    pub fn col_ids(&self) -> &[ColId] {
        &self.col_ids
    }

    #[inline]
    #[must_use]
    pub fn num_tuples(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.max_tuples
    }

    #[inline]
    #[must_use]
    pub fn rows(&self) -> &[(TupleSlot, ProjectedRow)] {
        &self.rows
    }

    pub fn push(&mut self, slot: TupleSlot, row: ProjectedRow) {
        debug_assert!(!self.is_full());
        self.rows.push((slot, row));
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> ProjectedRow {
        let mut row = ProjectedRow::new([ColId::new(2), ColId::new(3), ColId::new(4)]);
        row.set_cell(0, Some(AttrCell::Fixed { size: 4, word: 0xDEAD_BEEF }));
        row.set_cell(1, None);
        row.set_cell(
            2,
            Some(AttrCell::Var(VarlenEntry::from_bytes(
                b"a somewhat longer payload",
            ))),
        );
        row
    }

    #[test]
    fn wire_round_trip() {
        let row = sample_row();
        let bytes = row.to_bytes();
        let decoded = ProjectedRow::from_bytes(&bytes, 0).unwrap();
        assert_eq!(row, decoded);
    }

    #[test]
    fn truncated_bytes_are_corrupt_with_offset() {
        let bytes = sample_row().to_bytes();
        let err = ProjectedRow::from_bytes(&bytes[..bytes.len() - 3], 100).unwrap_err();
        match err {
            TerrierError::RecoveryCorrupt { offset, .. } => assert!(offset >= 100),
            other => panic!("expected RecoveryCorrupt, got {other}"),
        }
    }

    #[test]
    fn apply_delta_overwrites_shared_columns() {
        let mut row = sample_row();
        let mut delta = ProjectedRow::new([ColId::new(3), ColId::new(9)]);
        delta.set_cell(0, Some(AttrCell::Fixed { size: 4, word: 7 }));
        delta.set_cell(1, Some(AttrCell::Fixed { size: 4, word: 8 }));
        row.apply_delta(&delta);
        // Column 3 picked up the delta value; column 9 is not projected.
        assert_eq!(
            row.cell(1),
            Some(&AttrCell::Fixed { size: 4, word: 7 })
        );
        assert_eq!(row.index_of(ColId::new(9)), None);
    }

    #[test]
    fn batch_budget() {
        let mut batch = ProjectedColumns::new(2, vec![ColId::new(2)]);
        assert!(!batch.is_full());
        batch.push(
            TupleSlot::new(terrier_types::BlockId::new(1), 0),
            ProjectedRow::new([ColId::new(2)]),
        );
        batch.push(
            TupleSlot::new(terrier_types::BlockId::new(1), 1),
            ProjectedRow::new([ColId::new(2)]),
        );
        assert!(batch.is_full());
        assert_eq!(batch.num_tuples(), 2);
    }
}
