//! Checkpoint file format (little-endian):
//!
//! ```text
//! file   := header table_section* footer
//! header := magic(4)="CKPT" | version(u16) | checkpoint_ts(u64)
//!         | table_count(u32)
//! table_section := table_oid(u32) | schema_fingerprint(u64)
//!                | tuple_count(u64) | tuple_count x tuple_record
//! tuple_record := slot_block_id(u64) | slot_index(u32)
//!               | projected_row_bytes_len(u32) | projected_row_bytes
//! footer := crc32(u32) over [header..footer) | magic(4)="ENDC"
//! ```
//!
//! The writer creates the file under a temporary name and back-patches the
//! table and tuple counts before computing the CRC, so a crash mid-write
//! leaves a file with a missing or mismatched footer that recovery ignores.

use terrier_error::{Result, TerrierError};
use terrier_types::encoding::{
    append_u16_le, append_u32_le, append_u64_le, read_u16_le, read_u32_le, read_u64_le,
};
use terrier_types::{TableOid, Timestamp};

pub const CHECKPOINT_MAGIC: &[u8; 4] = b"CKPT";
pub const CHECKPOINT_END_MAGIC: &[u8; 4] = b"ENDC";
pub const CHECKPOINT_FORMAT_VERSION: u16 = 1;

/// magic + version + checkpoint_ts + table_count.
pub const HEADER_BYTES: usize = 4 + 2 + 8 + 4;
/// Offset of `table_count` within the header, for back-patching.
pub const TABLE_COUNT_OFFSET: u64 = 14;
/// table_oid + schema_fingerprint + tuple_count.
pub const TABLE_SECTION_HEADER_BYTES: usize = 4 + 8 + 8;
/// Offset of `tuple_count` within a section header, for back-patching.
pub const TUPLE_COUNT_OFFSET: u64 = 12;
/// crc32 + end magic.
pub const FOOTER_BYTES: usize = 4 + 4;

/// Parsed checkpoint file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointHeader {
    pub checkpoint_ts: Timestamp,
    pub table_count: u32,
}

impl CheckpointHeader {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_BYTES);
        out.extend_from_slice(CHECKPOINT_MAGIC);
        append_u16_le(&mut out, CHECKPOINT_FORMAT_VERSION);
        append_u64_le(&mut out, self.checkpoint_ts.get());
        append_u32_le(&mut out, self.table_count);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_BYTES {
            return Err(TerrierError::RecoveryCorrupt {
                offset: 0,
                detail: format!(
                    "checkpoint header too short: {} bytes, need {HEADER_BYTES}",
                    buf.len()
                ),
            });
        }
        if &buf[..4] != CHECKPOINT_MAGIC {
            return Err(TerrierError::RecoveryCorrupt {
                offset: 0,
                detail: "bad checkpoint magic".into(),
            });
        }
        let version = read_u16_le(buf, 4);
        if version != CHECKPOINT_FORMAT_VERSION {
            return Err(TerrierError::RecoveryCorrupt {
                offset: 4,
                detail: format!("unsupported checkpoint format version {version}"),
            });
        }
        Ok(Self {
            checkpoint_ts: Timestamp::new(read_u64_le(buf, 6)),
            table_count: read_u32_le(buf, 14),
        })
    }
}

/// Parsed per-table section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSectionHeader {
    pub table_oid: TableOid,
    pub schema_fingerprint: u64,
    pub tuple_count: u64,
}

impl TableSectionHeader {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TABLE_SECTION_HEADER_BYTES);
        append_u32_le(&mut out, self.table_oid.get());
        append_u64_le(&mut out, self.schema_fingerprint);
        append_u64_le(&mut out, self.tuple_count);
        out
    }

    pub fn from_bytes(buf: &[u8], base_offset: u64) -> Result<Self> {
        if buf.len() < TABLE_SECTION_HEADER_BYTES {
            return Err(TerrierError::RecoveryCorrupt {
                offset: base_offset,
                detail: "checkpoint table section header truncated".into(),
            });
        }
        Ok(Self {
            table_oid: TableOid::new(read_u32_le(buf, 0)),
            schema_fingerprint: read_u64_le(buf, 4),
            tuple_count: read_u64_le(buf, 12),
        })
    }
}

/// Verify footer magic and CRC of a complete checkpoint image, returning
/// its header.
pub fn validate_image(bytes: &[u8]) -> Result<CheckpointHeader> {
    if bytes.len() < HEADER_BYTES + FOOTER_BYTES {
        return Err(TerrierError::RecoveryCorrupt {
            offset: bytes.len() as u64,
            detail: "checkpoint file too short for header and footer".into(),
        });
    }
    let footer_at = bytes.len() - FOOTER_BYTES;
    if &bytes[footer_at + 4..] != CHECKPOINT_END_MAGIC {
        return Err(TerrierError::RecoveryCorrupt {
            offset: (footer_at + 4) as u64,
            detail: "checkpoint end magic missing".into(),
        });
    }
    let stored_crc = read_u32_le(bytes, footer_at);
    let actual_crc = crc32c::crc32c(&bytes[..footer_at]);
    if stored_crc != actual_crc {
        return Err(TerrierError::RecoveryCorrupt {
            offset: footer_at as u64,
            detail: format!(
                "checkpoint crc mismatch: stored {stored_crc:#010x}, computed {actual_crc:#010x}"
            ),
        });
    }
    CheckpointHeader::from_bytes(bytes)
}

/// Build the footer for a finished checkpoint image.
#[must_use]
pub fn footer_for(image_without_footer: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FOOTER_BYTES);
    append_u32_le(&mut out, crc32c::crc32c(image_without_footer));
    out.extend_from_slice(CHECKPOINT_END_MAGIC);
    out
}
