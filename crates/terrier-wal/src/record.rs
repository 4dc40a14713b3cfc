//! Redo records and their on-disk encoding.
//!
//! The WAL is a stream of length-prefixed records:
//!
//! ```text
//! record := total_len(u32) | kind(u8) | begin_ts(u64) | commit_ts(u64)
//!         | table_oid(u32) | slot_block_id(u64) | slot_index(u32)
//!         | projected_row_bytes_len(u32) | projected_row_bytes
//! ```
//!
//! `total_len` counts the bytes after the length field itself. The last
//! record of every transaction is a `COMMIT` record with zeroed table, slot,
//! and row fields. All integers are little-endian.

use terrier_error::{Result, TerrierError};
use terrier_storage::ProjectedRow;
use terrier_types::encoding::{
    append_u32_le, append_u64_le, read_u32_le, read_u64_le,
};
use terrier_types::{BlockId, TableOid, Timestamp, TupleSlot};

/// Bytes in the fixed portion of a record, after the length prefix.
pub const RECORD_FIXED_BYTES: usize = 1 + 8 + 8 + 4 + 8 + 4 + 4;

/// Kind of a change captured in a transaction's redo buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedoKind {
    Insert,
    Update,
    Delete,
}

/// One change recorded by a transaction, in execution order.
#[derive(Debug, Clone)]
pub struct RedoEntry {
    pub kind: RedoKind,
    pub table_oid: TableOid,
    pub slot: TupleSlot,
    /// After-image of the touched columns; `None` for deletes.
    pub row: Option<ProjectedRow>,
}

/// A committed transaction's redo buffer, handed to the log manager at
/// commit time.
#[derive(Debug)]
pub struct RedoSegment {
    pub begin_ts: Timestamp,
    pub commit_ts: Timestamp,
    pub entries: Vec<RedoEntry>,
}

/// On-disk record kind tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordKind {
    Insert = 1,
    Update = 2,
    Delete = 3,
    Commit = 4,
}

impl LogRecordKind {
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Insert),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            4 => Some(Self::Commit),
            _ => None,
        }
    }
}

impl From<RedoKind> for LogRecordKind {
    fn from(kind: RedoKind) -> Self {
        match kind {
            RedoKind::Insert => Self::Insert,
            RedoKind::Update => Self::Update,
            RedoKind::Delete => Self::Delete,
        }
    }
}

/// A fully decoded WAL record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub kind: LogRecordKind,
    pub begin_ts: Timestamp,
    pub commit_ts: Timestamp,
    pub table_oid: TableOid,
    pub slot: TupleSlot,
    pub row: Option<ProjectedRow>,
}

impl LogRecord {
    /// A transaction's terminating commit record.
    #[must_use]
    pub fn commit(begin_ts: Timestamp, commit_ts: Timestamp) -> Self {
        Self {
            kind: LogRecordKind::Commit,
            begin_ts,
            commit_ts,
            table_oid: TableOid::new(0),
            slot: TupleSlot::new(BlockId::new(0), 0),
            row: None,
        }
    }

    /// Wire form of a redo entry stamped with its transaction timestamps.
    #[must_use]
    pub fn from_redo(entry: &RedoEntry, begin_ts: Timestamp, commit_ts: Timestamp) -> Self {
        Self {
            kind: entry.kind.into(),
            begin_ts,
            commit_ts,
            table_oid: entry.table_oid,
            slot: entry.slot,
            row: entry.row.clone(),
        }
    }

    /// Append the length-prefixed encoding of this record.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let row_bytes = self.row.as_ref().map(ProjectedRow::to_bytes);
        let row_len = row_bytes.as_ref().map_or(0, Vec::len);
        append_u32_le(out, (RECORD_FIXED_BYTES + row_len) as u32);
        out.push(self.kind as u8);
        append_u64_le(out, self.begin_ts.get());
        append_u64_le(out, self.commit_ts.get());
        append_u32_le(out, self.table_oid.get());
        append_u64_le(out, self.slot.block().get());
        append_u32_le(out, self.slot.index());
        append_u32_le(out, row_len as u32);
        if let Some(bytes) = row_bytes {
            out.extend_from_slice(&bytes);
        }
    }

    /// Decode one record body (the bytes after the length prefix).
    /// `base_offset` is the file offset of `buf[0]`, used for corruption
    /// reports.
    pub fn decode(buf: &[u8], base_offset: u64) -> Result<Self> {
        if buf.len() < RECORD_FIXED_BYTES {
            return Err(TerrierError::RecoveryCorrupt {
                offset: base_offset,
                detail: format!(
                    "log record body too short: {} bytes, need at least {RECORD_FIXED_BYTES}",
                    buf.len()
                ),
            });
        }
        let kind = LogRecordKind::from_u8(buf[0]).ok_or_else(|| TerrierError::RecoveryCorrupt {
            offset: base_offset,
            detail: format!("unknown log record kind {}", buf[0]),
        })?;
        let begin_ts = Timestamp::new(read_u64_le(buf, 1));
        let commit_ts = Timestamp::new(read_u64_le(buf, 9));
        let table_oid = TableOid::new(read_u32_le(buf, 17));
        let slot = TupleSlot::new(BlockId::new(read_u64_le(buf, 21)), read_u32_le(buf, 29));
        let row_len = read_u32_le(buf, 33) as usize;
        if buf.len() != RECORD_FIXED_BYTES + row_len {
            return Err(TerrierError::RecoveryCorrupt {
                offset: base_offset + 33,
                detail: format!(
                    "log record row length {} disagrees with record length {}",
                    row_len,
                    buf.len()
                ),
            });
        }
        let row = if row_len == 0 {
            None
        } else {
            Some(ProjectedRow::from_bytes(
                &buf[RECORD_FIXED_BYTES..],
                base_offset + RECORD_FIXED_BYTES as u64,
            )?)
        };
        Ok(Self {
            kind,
            begin_ts,
            commit_ts,
            table_oid,
            slot,
            row,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrier_storage::{AttrCell, VarlenEntry};
    use terrier_types::ColId;

    fn sample_row() -> ProjectedRow {
        let mut row = ProjectedRow::new([ColId::new(2), ColId::new(3)]);
        row.set_cell(0, Some(AttrCell::Fixed { size: 4, word: 41 }));
        row.set_cell(
            1,
            Some(AttrCell::Var(VarlenEntry::from_bytes(b"redo payload"))),
        );
        row
    }

    #[test]
    fn record_round_trip() {
        let record = LogRecord {
            kind: LogRecordKind::Update,
            begin_ts: Timestamp::new(11),
            commit_ts: Timestamp::new(12),
            table_oid: TableOid::new(5),
            slot: TupleSlot::new(BlockId::new(3), 9),
            row: Some(sample_row()),
        };
        let mut bytes = Vec::new();
        record.encode_into(&mut bytes);

        let total_len = read_u32_le(&bytes, 0) as usize;
        assert_eq!(total_len + 4, bytes.len());

        let decoded = LogRecord::decode(&bytes[4..], 4).unwrap();
        assert_eq!(decoded.kind, LogRecordKind::Update);
        assert_eq!(decoded.commit_ts, Timestamp::new(12));
        assert_eq!(decoded.slot, record.slot);
        assert_eq!(decoded.row, record.row);
    }

    #[test]
    fn commit_record_has_no_payload() {
        let record = LogRecord::commit(Timestamp::new(1), Timestamp::new(2));
        let mut bytes = Vec::new();
        record.encode_into(&mut bytes);
        let decoded = LogRecord::decode(&bytes[4..], 4).unwrap();
        assert_eq!(decoded.kind, LogRecordKind::Commit);
        assert!(decoded.row.is_none());
    }

    #[test]
    fn corrupt_kind_is_rejected() {
        let record = LogRecord::commit(Timestamp::new(1), Timestamp::new(2));
        let mut bytes = Vec::new();
        record.encode_into(&mut bytes);
        bytes[4] = 99;
        let err = LogRecord::decode(&bytes[4..], 4).unwrap_err();
        assert!(matches!(err, TerrierError::RecoveryCorrupt { .. }));
    }
}
