//! Core cross-cutting types for the terrier storage engine: logical
//! timestamps, catalog oids, physical tuple addresses, and the typed schema
//! layer shared by storage, MVCC, durability, and catalog code.

pub mod config;
pub mod encoding;
pub mod schema;
pub mod value;

pub use config::Config;
pub use schema::{AttrSize, Column, Schema, TypeId};
pub use value::Value;

use std::fmt;

/// Logical timestamp drawn from the transaction manager's global clock.
///
/// Both transaction start timestamps and commit timestamps come from the same
/// monotonic counter, so a commit timestamp can never collide with a reader's
/// start timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Time zero: before any transaction. Used as the WAL replay floor when
    /// recovering without a checkpoint.
    pub const ZERO: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts#{}", self.0)
    }
}

/// Identifier of a storage block, unique within a block store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BlockId(u64);

impl BlockId {
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// Physical address of a tuple: the owning block plus the slot index within
/// it. Stable for the lifetime of the block, and the unit of identity in both
/// the WAL and checkpoint file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleSlot {
    block: BlockId,
    index: u32,
}

impl TupleSlot {
    #[inline]
    #[must_use]
    pub const fn new(block: BlockId, index: u32) -> Self {
        Self { block, index }
    }

    #[inline]
    #[must_use]
    pub const fn block(self) -> BlockId {
        self.block
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Display for TupleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot({}, {})", self.block.0, self.index)
    }
}

/// Physical column index within a block layout.
///
/// Columns `0..NUM_RESERVED_COLUMNS` are reserved for the version-chain head
/// and the slot status word; data columns start after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ColId(u16);

impl ColId {
    #[inline]
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ColId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col#{}", self.0)
    }
}

macro_rules! oid_newtype {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            #[inline]
            #[must_use]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            #[must_use]
            pub const fn get(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

oid_newtype!(
    /// Oid of a database.
    DbOid,
    "db"
);
oid_newtype!(
    /// Oid of a table (user or catalog).
    TableOid,
    "table"
);
oid_newtype!(
    /// Oid of a namespace within a database.
    NamespaceOid,
    "nsp"
);
oid_newtype!(
    /// Oid of a tablespace.
    TablespaceOid,
    "spc"
);
oid_newtype!(
    /// Oid of a column within a table schema.
    ColOid,
    "attr"
);
