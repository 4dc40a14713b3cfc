//! Primary error type for terrier storage engine operations.
//!
//! Structured variants for the failure modes the engine distinguishes:
//! conflicts abort the transaction, allocation exhaustion aborts, catalog
//! misses are reported to the caller, recovery corruption carries the file
//! offset, and log-manager I/O failures latch the manager unhealthy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TerrierError {
    // === Transaction errors ===
    /// An update lost the version-chain CAS; the transaction must abort.
    /// Never retried internally.
    #[error("write-write conflict at block {block} slot {slot}: transaction must abort")]
    ConflictAbort { block: u64, slot: u32 },

    /// The block store cannot hand out another block.
    #[error("block store exhausted: {outstanding} of {capacity} blocks in use")]
    AllocationExhausted { outstanding: usize, capacity: usize },

    /// A transaction-scoped operation was issued against a finished
    /// transaction.
    #[error("transaction {start_ts} is no longer active")]
    TransactionInactive { start_ts: u64 },

    // === Catalog errors ===
    /// A name or oid lookup missed. Callers decide whether absence is fatal.
    #[error("catalog lookup missed: no {kind} named '{name}'")]
    CatalogNotFound { kind: &'static str, name: String },

    // === Recovery errors ===
    /// A checkpoint footer or WAL record failed its length or checksum
    /// checks. Recovery stops and surfaces the byte offset.
    #[error("recovery data corrupt at offset {offset}: {detail}")]
    RecoveryCorrupt { offset: u64, detail: String },

    /// The checkpoint references a table oid that was never registered for
    /// recovery.
    #[error("checkpoint references unregistered table oid {table_oid}")]
    UnregisteredTable { table_oid: u32 },

    /// The registered table's schema fingerprint differs from the one stored
    /// in the checkpoint.
    #[error(
        "schema mismatch for table oid {table_oid}: checkpoint fingerprint \
         {expected:#018x}, table fingerprint {actual:#018x}"
    )]
    SchemaMismatch {
        table_oid: u32,
        expected: u64,
        actual: u64,
    },

    // === I/O errors ===
    /// Underlying file operation failed; propagated to the caller.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The log manager hit an I/O failure earlier and refuses further
    /// commits.
    #[error("log manager is unhealthy and refusing commits")]
    LogUnhealthy,
}

impl TerrierError {
    /// True for errors that require the issuing transaction to abort.
    #[must_use]
    pub const fn aborts_transaction(&self) -> bool {
        matches!(
            self,
            Self::ConflictAbort { .. } | Self::AllocationExhausted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TerrierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_aborts_transaction() {
        let err = TerrierError::ConflictAbort { block: 1, slot: 2 };
        assert!(err.aborts_transaction());
        let err = TerrierError::LogUnhealthy;
        assert!(!err.aborts_transaction());
    }

    #[test]
    fn messages_carry_context() {
        let err = TerrierError::RecoveryCorrupt {
            offset: 128,
            detail: "truncated record".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("128"));
        assert!(msg.contains("truncated record"));
    }
}
