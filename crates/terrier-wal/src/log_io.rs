//! Buffered log file I/O.
//!
//! The writer accumulates encoded records in memory and makes them durable
//! with an explicit flush-and-sync. The reader walks the record stream
//! sequentially, tracking its byte offset so corruption can be reported at
//! an exact position. A clean end-of-file at a record boundary terminates
//! iteration; anything shorter is corruption.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;

use terrier_error::{Result, TerrierError};

use crate::record::LogRecord;

/// Append-only buffered writer over the single WAL file.
pub struct BufferedLogWriter {
    file: File,
    buffer: Vec<u8>,
}

impl BufferedLogWriter {
    /// Open (creating if needed) the log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file,
            buffer: Vec::with_capacity(1 << 16),
        })
    }

    /// The in-memory buffer records are encoded into.
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Write the buffer to the file and fsync. No-op when empty.
    pub fn persist(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file.write_all(&self.buffer)?;
        self.buffer.clear();
        self.file.sync_data()?;
        Ok(())
    }
}

/// Sequential reader over a WAL file.
pub struct BufferedLogReader {
    reader: BufReader<File>,
    offset: u64,
}

impl BufferedLogReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
        })
    }

    /// Current byte offset into the file.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next record, or `None` at a clean end of file.
    pub fn read_record(&mut self) -> Result<Option<LogRecord>> {
        let record_at = self.offset;
        let mut len_bytes = [0_u8; 4];
        match self.reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        self.offset += 4;
        let total_len = u32::from_le_bytes(len_bytes) as usize;

        let mut body = vec![0_u8; total_len];
        self.reader.read_exact(&mut body).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                TerrierError::RecoveryCorrupt {
                    offset: record_at,
                    detail: format!("log record truncated: length prefix said {total_len} bytes"),
                }
            } else {
                e.into()
            }
        })?;
        let record = LogRecord::decode(&body, self.offset)?;
        self.offset += total_len as u64;
        Ok(Some(record))
    }
}
