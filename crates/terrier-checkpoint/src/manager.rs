//! The checkpoint manager: writes transactionally consistent table
//! snapshots, finds the newest valid checkpoint on disk, and drives the
//! recovery procedure (checkpoint load plus WAL suffix replay).
//!
//! A checkpoint scope (`start_checkpoint` / `checkpoint_table`* /
//! `end_checkpoint`) produces a single file containing every table scanned
//! under one read transaction, so all tables are captured at the same
//! timestamp — the transaction's start timestamp, which also names the
//! file. The file is written under a fixed temporary name and renamed into
//! place only after its footer is durable.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use terrier_error::{Result, TerrierError};
use terrier_storage::ProjectedRow;
use terrier_types::encoding::{append_u32_le, append_u64_le};
use terrier_types::{BlockId, TableOid, Timestamp, TupleSlot};
use terrier_wal::{BufferedLogReader, LogRecordKind};
use terrier_mvcc::{SqlTable, TransactionContext};

use crate::format::{
    footer_for, validate_image, CheckpointHeader, TableSectionHeader, FOOTER_BYTES, HEADER_BYTES,
    TABLE_COUNT_OFFSET, TABLE_SECTION_HEADER_BYTES, TUPLE_COUNT_OFFSET,
};

/// Fixed name a checkpoint is written under until its footer is durable.
const UNFINISHED_CHECKPOINT_NAME: &str = "checkpoint.tmp";

/// Tuples fetched per scan batch while serializing a table.
const SCAN_BATCH_TUPLES: usize = 100;

struct ActiveCheckpoint {
    file: File,
    tmp_path: PathBuf,
    checkpoint_ts: Timestamp,
    table_count: u32,
}

pub struct CheckpointManager {
    dir: PathBuf,
    prefix: String,
    active: Option<ActiveCheckpoint>,
    registered: HashMap<TableOid, Arc<SqlTable>>,
    /// Pre-crash slot identity to post-recovery slot, built while loading a
    /// checkpoint and consulted when replaying WAL updates and deletes.
    slot_map: HashMap<TupleSlot, TupleSlot>,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            active: None,
            registered: HashMap::new(),
            slot_map: HashMap::new(),
        }
    }

    // --- checkpointing ---

    /// Checkpoint a set of tables under one read transaction and return
    /// the finished file's path.
    pub fn process(
        &mut self,
        txn: &TransactionContext,
        tables: &[Arc<SqlTable>],
    ) -> Result<PathBuf> {
        self.start_checkpoint(txn)?;
        for table in tables {
            self.checkpoint_table(txn, table)?;
        }
        self.end_checkpoint()
    }

    /// Open the temporary checkpoint file and write a header stamped with
    /// the read transaction's start timestamp.
    pub fn start_checkpoint(&mut self, txn: &TransactionContext) -> Result<()> {
        assert!(self.active.is_none(), "checkpoint scope already open");
        fs::create_dir_all(&self.dir)?;
        let tmp_path = self.dir.join(UNFINISHED_CHECKPOINT_NAME);
        let mut file = File::create(&tmp_path)?;
        let header = CheckpointHeader {
            checkpoint_ts: txn.start_ts(),
            table_count: 0,
        };
        file.write_all(&header.to_bytes())?;
        self.active = Some(ActiveCheckpoint {
            file,
            tmp_path,
            checkpoint_ts: txn.start_ts(),
            table_count: 0,
        });
        Ok(())
    }

    /// Serialize every tuple of `table` visible to the checkpoint
    /// transaction. Returns the tuple count written.
    pub fn checkpoint_table(
        &mut self,
        txn: &TransactionContext,
        table: &SqlTable,
    ) -> Result<u64> {
        let active = self
            .active
            .as_mut()
            .expect("checkpoint_table called outside a checkpoint scope");

        let section_at = active.file.stream_position()?;
        let section = TableSectionHeader {
            table_oid: table.oid(),
            schema_fingerprint: table.schema().fingerprint(),
            tuple_count: 0,
        };
        active.file.write_all(&section.to_bytes())?;

        let mut tuple_count = 0_u64;
        let mut iter = table.begin();
        let mut batch = table.all_columns_batch(SCAN_BATCH_TUPLES);
        let mut buf = Vec::new();
        loop {
            table.scan(txn, &mut iter, &mut batch);
            if batch.num_tuples() == 0 {
                break;
            }
            buf.clear();
            for (slot, row) in batch.rows() {
                append_u64_le(&mut buf, slot.block().get());
                append_u32_le(&mut buf, slot.index());
                let row_bytes = row.to_bytes();
                append_u32_le(&mut buf, row_bytes.len() as u32);
                buf.extend_from_slice(&row_bytes);
            }
            active.file.write_all(&buf)?;
            tuple_count += batch.num_tuples() as u64;
        }

        // Back-patch the tuple count now that the scan is complete.
        let end = active.file.stream_position()?;
        active
            .file
            .seek(SeekFrom::Start(section_at + TUPLE_COUNT_OFFSET))?;
        active.file.write_all(&tuple_count.to_le_bytes())?;
        active.file.seek(SeekFrom::Start(end))?;

        active.table_count += 1;
        debug!(
            table_oid = table.oid().get(),
            tuples = tuple_count,
            "table checkpointed"
        );
        Ok(tuple_count)
    }

    /// Back-patch the table count, append the CRC footer, fsync, and rename
    /// the file into place.
    pub fn end_checkpoint(&mut self) -> Result<PathBuf> {
        let mut active = self
            .active
            .take()
            .expect("end_checkpoint called outside a checkpoint scope");

        active.file.seek(SeekFrom::Start(TABLE_COUNT_OFFSET))?;
        active.file.write_all(&active.table_count.to_le_bytes())?;

        // CRC covers everything before the footer; re-read the patched
        // image sequentially.
        active.file.seek(SeekFrom::Start(0))?;
        let mut image = Vec::new();
        active.file.read_to_end(&mut image)?;
        active.file.write_all(&footer_for(&image))?;
        active.file.sync_all()?;
        drop(active.file);

        let final_path = self
            .dir
            .join(format!("{}{}", self.prefix, active.checkpoint_ts.get()));
        fs::rename(&active.tmp_path, &final_path)?;
        info!(
            path = %final_path.display(),
            checkpoint_ts = active.checkpoint_ts.get(),
            tables = active.table_count,
            "checkpoint complete"
        );
        Ok(final_path)
    }

    // --- file selection ---

    /// The checkpoint file with the largest timestamp parsed out of its
    /// name, ignoring validity. `None` when the directory has none.
    pub fn latest_checkpoint(&self) -> Result<Option<(PathBuf, Timestamp)>> {
        Ok(self.list_checkpoints()?.into_iter().next_back())
    }

    /// The newest checkpoint whose footer and CRC validate. Partial or
    /// corrupt files are skipped with a warning, falling back to the next
    /// older file.
    pub fn latest_valid_checkpoint(&self) -> Result<Option<(PathBuf, Timestamp)>> {
        for (path, ts) in self.list_checkpoints()?.into_iter().rev() {
            match fs::read(&path).map_err(TerrierError::from).and_then(|bytes| validate_image(&bytes)) {
                Ok(_) => return Ok(Some((path, ts))),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping invalid checkpoint");
                }
            }
        }
        Ok(None)
    }

    /// Delete every checkpoint file, including an unfinished temporary.
    pub fn unlink_checkpoint_files(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        for (path, _) in self.list_checkpoints()? {
            fs::remove_file(path)?;
        }
        let tmp = self.dir.join(UNFINISHED_CHECKPOINT_NAME);
        if tmp.exists() {
            fs::remove_file(tmp)?;
        }
        Ok(())
    }

    fn list_checkpoints(&self) -> Result<Vec<(PathBuf, Timestamp)>> {
        let mut found = Vec::new();
        if !self.dir.exists() {
            return Ok(found);
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(suffix) = name.strip_prefix(self.prefix.as_str()) else {
                continue;
            };
            if let Ok(ts) = suffix.parse::<u64>() {
                found.push((entry.path(), Timestamp::new(ts)));
            }
        }
        found.sort_by_key(|(_, ts)| *ts);
        Ok(found)
    }

    // --- recovery ---

    /// Begin a recovery: clears registered tables and the slot map.
    pub fn start_recovery(&mut self) {
        self.registered.clear();
        self.slot_map.clear();
    }

    /// Associate a pre-created, empty table with the oid it will appear
    /// under in the checkpoint and WAL.
    pub fn register_table(&mut self, table: Arc<SqlTable>) {
        self.registered.insert(table.oid(), table);
    }

    /// Load every table section of the checkpoint at `path` into the
    /// registered tables, building the slot map as tuples are re-inserted.
    pub fn recover(&mut self, txn: &TransactionContext, path: &Path) -> Result<()> {
        let bytes = fs::read(path)?;
        let header = validate_image(&bytes)?;
        let body_end = bytes.len() - FOOTER_BYTES;

        let mut cursor = HEADER_BYTES;
        for _ in 0..header.table_count {
            if body_end < cursor + TABLE_SECTION_HEADER_BYTES {
                return Err(TerrierError::RecoveryCorrupt {
                    offset: cursor as u64,
                    detail: "checkpoint table section truncated".into(),
                });
            }
            let section = TableSectionHeader::from_bytes(&bytes[cursor..], cursor as u64)?;
            cursor += TABLE_SECTION_HEADER_BYTES;

            let table = self
                .registered
                .get(&section.table_oid)
                .ok_or(TerrierError::UnregisteredTable {
                    table_oid: section.table_oid.get(),
                })?
                .clone();
            let actual = table.schema().fingerprint();
            if actual != section.schema_fingerprint {
                return Err(TerrierError::SchemaMismatch {
                    table_oid: section.table_oid.get(),
                    expected: section.schema_fingerprint,
                    actual,
                });
            }

            for _ in 0..section.tuple_count {
                if body_end < cursor + 16 {
                    return Err(TerrierError::RecoveryCorrupt {
                        offset: cursor as u64,
                        detail: "checkpoint tuple record truncated".into(),
                    });
                }
                let block = u64::from_le_bytes(
                    bytes[cursor..cursor + 8].try_into().expect("8 bytes"),
                );
                let index = u32::from_le_bytes(
                    bytes[cursor + 8..cursor + 12].try_into().expect("4 bytes"),
                );
                let row_len = u32::from_le_bytes(
                    bytes[cursor + 12..cursor + 16].try_into().expect("4 bytes"),
                ) as usize;
                cursor += 16;
                if body_end < cursor + row_len {
                    return Err(TerrierError::RecoveryCorrupt {
                        offset: cursor as u64,
                        detail: "checkpoint tuple payload truncated".into(),
                    });
                }
                let row =
                    ProjectedRow::from_bytes(&bytes[cursor..cursor + row_len], cursor as u64)?;
                cursor += row_len;

                let old_slot = TupleSlot::new(BlockId::new(block), index);
                let new_slot = table.insert_projected(txn, &row)?;
                debug_assert!(
                    !self.slot_map.contains_key(&old_slot),
                    "a tuple slot appears twice in one checkpoint"
                );
                self.slot_map.insert(old_slot, new_slot);
            }
        }
        info!(
            path = %path.display(),
            tables = header.table_count,
            tuples = self.slot_map.len(),
            "checkpoint recovered"
        );
        Ok(())
    }

    /// Replay the WAL at `path`, discarding transactions whose commit
    /// timestamp is at or before `checkpoint_ts`, applying the rest in file
    /// order through the registered tables.
    ///
    /// Two passes over the file: the first collects the begin timestamps of
    /// qualifying committed transactions (aborted transactions have no
    /// commit record and are skipped wholesale); the second applies their
    /// records, routing slots through the recovery slot map.
    pub fn recover_from_logs(
        &mut self,
        txn: &TransactionContext,
        path: &Path,
        checkpoint_ts: Timestamp,
    ) -> Result<()> {
        let mut valid_begin: HashSet<u64> = HashSet::new();
        let mut reader = BufferedLogReader::open(path)?;
        while let Some(record) = reader.read_record()? {
            if record.kind == LogRecordKind::Commit && record.commit_ts > checkpoint_ts {
                valid_begin.insert(record.begin_ts.get());
            }
        }

        let mut applied = 0_usize;
        let mut reader = BufferedLogReader::open(path)?;
        while let Some(record) = reader.read_record()? {
            if !valid_begin.contains(&record.begin_ts.get()) {
                continue;
            }
            if record.kind == LogRecordKind::Commit {
                continue;
            }
            let table = self
                .registered
                .get(&record.table_oid)
                .ok_or(TerrierError::UnregisteredTable {
                    table_oid: record.table_oid.get(),
                })?
                .clone();
            match record.kind {
                LogRecordKind::Commit => unreachable!("commit records are skipped above"),
                LogRecordKind::Insert => {
                    let row = record.row.as_ref().ok_or_else(|| {
                        TerrierError::RecoveryCorrupt {
                            offset: reader.offset(),
                            detail: "insert record without a row payload".into(),
                        }
                    })?;
                    let new_slot = table.insert_projected(txn, row)?;
                    self.slot_map.insert(record.slot, new_slot);
                    applied += 1;
                }
                LogRecordKind::Update => {
                    let row = record.row.as_ref().ok_or_else(|| {
                        TerrierError::RecoveryCorrupt {
                            offset: reader.offset(),
                            detail: "update record without a row payload".into(),
                        }
                    })?;
                    match self.slot_map.get(&record.slot) {
                        Some(new_slot) => {
                            if !table.update_projected(txn, *new_slot, row) {
                                warn!(slot = %record.slot, "replayed update failed to install");
                            }
                        }
                        // A slot never seen before is an insert whose
                        // origin predates the log horizon; materialize it.
                        None => {
                            let new_slot = table.insert_projected(txn, row)?;
                            self.slot_map.insert(record.slot, new_slot);
                        }
                    }
                    applied += 1;
                }
                LogRecordKind::Delete => match self.slot_map.get(&record.slot) {
                    Some(new_slot) => {
                        if !table.delete(txn, *new_slot) {
                            warn!(slot = %record.slot, "replayed delete failed to install");
                        }
                        applied += 1;
                    }
                    None => {
                        warn!(slot = %record.slot, "delete record for an unknown slot, skipping");
                    }
                },
            }
        }
        info!(
            path = %path.display(),
            transactions = valid_begin.len(),
            records_applied = applied,
            floor = checkpoint_ts.get(),
            "log replay complete"
        );
        Ok(())
    }
}
