//! Typed table schemas.
//!
//! A [`Schema`] is immutable after table creation. The schema fingerprint is
//! embedded in checkpoint files so that recovery can refuse to load tuples
//! into a table whose column shape has drifted.

use std::fmt;

use xxhash_rust::xxh3::Xxh3;

use crate::encoding::{append_u32_le, append_u64_le};
use crate::ColOid;

/// Storage width of an attribute. Fixed sizes are 1, 2, 4, or 8 bytes;
/// variable-length attributes are stored indirectly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrSize {
    Fixed(u8),
    Var,
}

impl AttrSize {
    /// Bytes occupied by this attribute's cell inside a block slot record.
    /// Varlen cells hold a 4-byte reference into the block's varlen heap.
    #[inline]
    #[must_use]
    pub const fn cell_bytes(self) -> usize {
        match self {
            Self::Fixed(n) => n as usize,
            Self::Var => 4,
        }
    }
}

/// SQL value types supported by the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeId {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Varchar,
}

impl TypeId {
    #[must_use]
    pub const fn attr_size(self) -> AttrSize {
        match self {
            Self::Boolean | Self::TinyInt => AttrSize::Fixed(1),
            Self::SmallInt => AttrSize::Fixed(2),
            Self::Integer => AttrSize::Fixed(4),
            Self::BigInt => AttrSize::Fixed(8),
            Self::Varchar => AttrSize::Var,
        }
    }

    #[must_use]
    pub const fn is_varlen(self) -> bool {
        matches!(self, Self::Varchar)
    }

    const fn tag(self) -> u8 {
        match self {
            Self::Boolean => 0,
            Self::TinyInt => 1,
            Self::SmallInt => 2,
            Self::Integer => 3,
            Self::BigInt => 4,
            Self::Varchar => 5,
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "BOOLEAN",
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Varchar => "VARCHAR",
        };
        f.write_str(name)
    }
}

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    type_id: TypeId,
    nullable: bool,
    oid: ColOid,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, type_id: TypeId, nullable: bool, oid: ColOid) -> Self {
        Self {
            name: name.into(),
            type_id,
            nullable,
            oid,
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    #[must_use]
    pub const fn nullable(&self) -> bool {
        self.nullable
    }

    #[inline]
    #[must_use]
    pub const fn oid(&self) -> ColOid {
        self.oid
    }

    #[inline]
    #[must_use]
    pub const fn is_varlen(&self) -> bool {
        self.type_id.is_varlen()
    }
}

/// An ordered, immutable list of columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        debug_assert!(!columns.is_empty(), "a schema must have at least one column");
        Self { columns }
    }

    #[inline]
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[inline]
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column(&self, position: usize) -> &Column {
        &self.columns[position]
    }

    /// Position of the column with the given oid, if any.
    #[must_use]
    pub fn position_of_oid(&self, oid: ColOid) -> Option<usize> {
        self.columns.iter().position(|c| c.oid() == oid)
    }

    /// Position of the column with the given name, if any.
    #[must_use]
    pub fn position_of_name(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Oids of all columns, in schema order.
    #[must_use]
    pub fn col_oids(&self) -> Vec<ColOid> {
        self.columns.iter().map(Column::oid).collect()
    }

    /// Stable 64-bit fingerprint of the column shape: names, types,
    /// nullability, and oids in order. Recovery compares this against the
    /// fingerprint stored in a checkpoint's table section.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh3::new();
        let mut buf = Vec::with_capacity(self.columns.len() * 16);
        for column in &self.columns {
            append_u64_le(&mut buf, column.name.len() as u64);
            buf.extend_from_slice(column.name.as_bytes());
            buf.push(column.type_id.tag());
            buf.push(u8::from(column.nullable));
            append_u32_le(&mut buf, column.oid.get());
        }
        hasher.update(&buf);
        hasher.digest()
    }
}
