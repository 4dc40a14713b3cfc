//! The system catalog: `pg_database`, `pg_tablespace`, `pg_namespace`, and
//! `pg_class`, bootstrapped as ordinary MVCC tables and navigated through
//! stateless handle objects under the caller's transaction.

pub mod catalog;
pub mod handles;

pub use catalog::{Catalog, TableKey, DEFAULT_DATABASE_NAME, DEFAULT_DATABASE_OID, START_OID};
pub use handles::{
    AttributeHandle, CatalogHandle, DatabaseEntry, DatabaseHandle, NamespaceEntry,
    NamespaceHandle, TableEntry, TableHandle, TablespaceEntry, TablespaceHandle,
};
