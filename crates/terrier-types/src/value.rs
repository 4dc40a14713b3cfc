//! Typed runtime values.
//!
//! A row at the SQL-table surface is a slice of `Option<Value>`; `None` is
//! SQL NULL. The storage layer converts values to and from raw attribute
//! cells using the table's block layout.

use std::fmt;

use crate::schema::TypeId;

/// A single non-null column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Varchar(String),
}

impl Value {
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        match self {
            Self::Boolean(_) => TypeId::Boolean,
            Self::TinyInt(_) => TypeId::TinyInt,
            Self::SmallInt(_) => TypeId::SmallInt,
            Self::Integer(_) => TypeId::Integer,
            Self::BigInt(_) => TypeId::BigInt,
            Self::Varchar(_) => TypeId::Varchar,
        }
    }

    /// The value as its 8-byte fixed-width representation. Varchar values
    /// have no fixed representation and return `None`.
    #[must_use]
    pub fn as_fixed_word(&self) -> Option<u64> {
        match self {
            Self::Boolean(v) => Some(u64::from(*v)),
            Self::TinyInt(v) => Some(*v as u8 as u64),
            Self::SmallInt(v) => Some(*v as u16 as u64),
            Self::Integer(v) => Some(*v as u32 as u64),
            Self::BigInt(v) => Some(*v as u64),
            Self::Varchar(_) => None,
        }
    }

    /// Reconstruct a fixed-width value of the given type from its 8-byte
    /// word representation.
    #[must_use]
    pub fn from_fixed_word(type_id: TypeId, word: u64) -> Option<Self> {
        match type_id {
            TypeId::Boolean => Some(Self::Boolean(word != 0)),
            TypeId::TinyInt => Some(Self::TinyInt(word as u8 as i8)),
            TypeId::SmallInt => Some(Self::SmallInt(word as u16 as i16)),
            TypeId::Integer => Some(Self::Integer(word as u32 as i32)),
            TypeId::BigInt => Some(Self::BigInt(word as i64)),
            TypeId::Varchar => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::TinyInt(v) => write!(f, "{v}"),
            Self::SmallInt(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Varchar(v) => write!(f, "'{v}'"),
        }
    }
}
