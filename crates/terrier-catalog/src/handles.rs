//! Catalog navigation handles.
//!
//! Stateless value objects that execute single-row or single-namespace
//! scans against the underlying catalog tables under the caller's
//! transaction. Lookups return an entry or `None`; handles never own or
//! extend the lifetime of the tables they navigate.

use std::sync::Arc;

use terrier_error::Result;
use terrier_mvcc::{SqlTable, TransactionContext};
use terrier_types::{
    Column, DbOid, NamespaceOid, Schema, TableOid, TablespaceOid, TypeId, Value,
};

use crate::catalog::{Catalog, TableKey};

/// A row of `pg_database`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseEntry {
    pub oid: DbOid,
    pub datname: String,
}

/// A row of `pg_tablespace`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablespaceEntry {
    pub oid: TablespaceOid,
    pub spcname: String,
}

/// A row of `pg_namespace`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceEntry {
    pub oid: NamespaceOid,
    pub nspname: String,
}

/// A row of `pg_class`, with the hidden `__ptr` arena key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub table_key: TableKey,
    pub oid: TableOid,
    pub relname: String,
    pub relnamespace: NamespaceOid,
    pub reltablespace: TablespaceOid,
}

fn int_col(row: &[Option<Value>], at: usize) -> Option<u32> {
    match row.get(at)? {
        Some(Value::Integer(v)) => Some(*v as u32),
        _ => None,
    }
}

fn bigint_col(row: &[Option<Value>], at: usize) -> Option<u64> {
    match row.get(at)? {
        Some(Value::BigInt(v)) => Some(*v as u64),
        _ => None,
    }
}

fn text_col<'a>(row: &'a [Option<Value>], at: usize) -> Option<&'a str> {
    match row.get(at)? {
        Some(Value::Varchar(v)) => Some(v.as_str()),
        _ => None,
    }
}

/// Entry point: navigate databases and tablespaces.
#[derive(Clone, Copy)]
pub struct CatalogHandle<'a> {
    catalog: &'a Catalog,
}

impl<'a> CatalogHandle<'a> {
    #[must_use]
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn database_entry(
        &self,
        txn: &TransactionContext,
        name: &str,
    ) -> Option<DatabaseEntry> {
        let pg_database = self.catalog.pg_database_table();
        self.catalog
            .scan_rows(txn, &pg_database)
            .into_iter()
            .find_map(|(_, row)| {
                let datname = text_col(&row, 1)?;
                if datname != name {
                    return None;
                }
                Some(DatabaseEntry {
                    oid: DbOid::new(int_col(&row, 0)?),
                    datname: datname.to_owned(),
                })
            })
    }

    #[must_use]
    pub fn database_entry_by_oid(
        &self,
        txn: &TransactionContext,
        oid: DbOid,
    ) -> Option<DatabaseEntry> {
        let pg_database = self.catalog.pg_database_table();
        self.catalog
            .scan_rows(txn, &pg_database)
            .into_iter()
            .find_map(|(_, row)| {
                (int_col(&row, 0)? == oid.get()).then(|| DatabaseEntry {
                    oid,
                    datname: text_col(&row, 1).unwrap_or_default().to_owned(),
                })
            })
    }

    #[must_use]
    pub fn database_handle(&self, db_oid: DbOid) -> DatabaseHandle<'a> {
        DatabaseHandle {
            catalog: self.catalog,
            db_oid,
        }
    }

    #[must_use]
    pub fn tablespace_handle(&self) -> TablespaceHandle<'a> {
        TablespaceHandle {
            catalog: self.catalog,
        }
    }
}

/// Navigation scoped to one database.
#[derive(Clone, Copy)]
pub struct DatabaseHandle<'a> {
    catalog: &'a Catalog,
    db_oid: DbOid,
}

impl<'a> DatabaseHandle<'a> {
    #[inline]
    #[must_use]
    pub const fn oid(&self) -> DbOid {
        self.db_oid
    }

    #[must_use]
    pub fn namespace_handle(&self) -> NamespaceHandle<'a> {
        NamespaceHandle {
            catalog: self.catalog,
            db_oid: self.db_oid,
        }
    }
}

/// Lookup over `pg_tablespace`.
#[derive(Clone, Copy)]
pub struct TablespaceHandle<'a> {
    catalog: &'a Catalog,
}

impl TablespaceHandle<'_> {
    #[must_use]
    pub fn entry_by_name(
        &self,
        txn: &TransactionContext,
        name: &str,
    ) -> Option<TablespaceEntry> {
        let pg_tablespace = self.catalog.pg_tablespace_table();
        self.catalog
            .scan_rows(txn, &pg_tablespace)
            .into_iter()
            .find_map(|(_, row)| {
                let spcname = text_col(&row, 1)?;
                if spcname != name {
                    return None;
                }
                Some(TablespaceEntry {
                    oid: TablespaceOid::new(int_col(&row, 0)?),
                    spcname: spcname.to_owned(),
                })
            })
    }

    #[must_use]
    pub fn entry_by_oid(
        &self,
        txn: &TransactionContext,
        oid: TablespaceOid,
    ) -> Option<TablespaceEntry> {
        let pg_tablespace = self.catalog.pg_tablespace_table();
        self.catalog
            .scan_rows(txn, &pg_tablespace)
            .into_iter()
            .find_map(|(_, row)| {
                (int_col(&row, 0)? == oid.get()).then(|| TablespaceEntry {
                    oid,
                    spcname: text_col(&row, 1).unwrap_or_default().to_owned(),
                })
            })
    }
}

/// Lookup over one database's `pg_namespace`.
#[derive(Clone, Copy)]
pub struct NamespaceHandle<'a> {
    catalog: &'a Catalog,
    db_oid: DbOid,
}

impl<'a> NamespaceHandle<'a> {
    #[must_use]
    pub fn entry_by_name(
        &self,
        txn: &TransactionContext,
        name: &str,
    ) -> Option<NamespaceEntry> {
        let pg_namespace = self.catalog.pg_namespace_table(self.db_oid)?;
        self.catalog
            .scan_rows(txn, &pg_namespace)
            .into_iter()
            .find_map(|(_, row)| {
                let nspname = text_col(&row, 1)?;
                if nspname != name {
                    return None;
                }
                Some(NamespaceEntry {
                    oid: NamespaceOid::new(int_col(&row, 0)?),
                    nspname: nspname.to_owned(),
                })
            })
    }

    #[must_use]
    pub fn name_to_oid(&self, txn: &TransactionContext, name: &str) -> Option<NamespaceOid> {
        self.entry_by_name(txn, name).map(|entry| entry.oid)
    }

    /// Insert a new namespace row with a fresh oid.
    pub fn add_entry(&self, txn: &TransactionContext, name: &str) -> Result<NamespaceOid> {
        let pg_namespace =
            self.catalog
                .pg_namespace_table(self.db_oid)
                .ok_or_else(|| terrier_error::TerrierError::CatalogNotFound {
                    kind: "database",
                    name: self.db_oid.to_string(),
                })?;
        let oid = NamespaceOid::new(self.catalog.next_oid());
        pg_namespace.insert(
            txn,
            &[
                Some(Value::Integer(oid.get() as i32)),
                Some(Value::Varchar(name.to_owned())),
            ],
        )?;
        Ok(oid)
    }

    /// Handle over the tables of a namespace, or `None` if the namespace
    /// does not exist.
    #[must_use]
    pub fn table_handle(
        &self,
        txn: &TransactionContext,
        nsp_name: &str,
    ) -> Option<TableHandle<'a>> {
        let nsp_oid = self.name_to_oid(txn, nsp_name)?;
        Some(TableHandle {
            catalog: self.catalog,
            db_oid: self.db_oid,
            nsp_oid,
        })
    }
}

/// Lookup and creation over the tables of one namespace.
#[derive(Clone, Copy)]
pub struct TableHandle<'a> {
    catalog: &'a Catalog,
    db_oid: DbOid,
    nsp_oid: NamespaceOid,
}

impl TableHandle<'_> {
    #[inline]
    #[must_use]
    pub const fn namespace_oid(&self) -> NamespaceOid {
        self.nsp_oid
    }

    /// The `pg_class` row for `name`, if it lives under this namespace.
    #[must_use]
    pub fn entry(&self, txn: &TransactionContext, name: &str) -> Option<TableEntry> {
        let pg_class = self.catalog.pg_class_table(self.db_oid)?;
        self.catalog
            .scan_rows(txn, &pg_class)
            .into_iter()
            .find_map(|(_, row)| {
                let relname = text_col(&row, 2)?;
                let relnamespace = NamespaceOid::new(int_col(&row, 3)?);
                if relname != name || relnamespace != self.nsp_oid {
                    return None;
                }
                Some(TableEntry {
                    table_key: TableKey::new(bigint_col(&row, 0)?),
                    oid: TableOid::new(int_col(&row, 1)?),
                    relname: relname.to_owned(),
                    relnamespace,
                    reltablespace: TablespaceOid::new(int_col(&row, 4)?),
                })
            })
    }

    /// Resolve the backing table for `name` through its `__ptr` key.
    #[must_use]
    pub fn table(&self, txn: &TransactionContext, name: &str) -> Option<Arc<SqlTable>> {
        let entry = self.entry(txn, name)?;
        self.catalog.resolve(entry.table_key)
    }

    /// Create a table under this namespace in the `pg_default` tablespace.
    pub fn create_table(
        &self,
        txn: &TransactionContext,
        schema: Schema,
        name: &str,
    ) -> Result<TableOid> {
        let pg_default = TablespaceHandle {
            catalog: self.catalog,
        }
        .entry_by_name(txn, "pg_default")
        .ok_or(terrier_error::TerrierError::CatalogNotFound {
            kind: "tablespace",
            name: "pg_default".into(),
        })?;
        self.catalog.create_user_table(
            txn,
            self.db_oid,
            self.nsp_oid,
            pg_default.oid,
            schema,
            name,
        )
    }

    /// Attribute navigation for a table under this namespace.
    #[must_use]
    pub fn attribute_handle(
        &self,
        txn: &TransactionContext,
        table_name: &str,
    ) -> Option<AttributeHandle> {
        self.table(txn, table_name).map(AttributeHandle::new)
    }
}

/// Lookup over the columns of one table's schema.
pub struct AttributeHandle {
    table: Arc<SqlTable>,
}

impl AttributeHandle {
    #[must_use]
    pub fn new(table: Arc<SqlTable>) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn entry_by_name(&self, name: &str) -> Option<Column> {
        let schema = self.table.schema();
        schema
            .position_of_name(name)
            .map(|pos| schema.column(pos).clone())
    }

    #[must_use]
    pub fn entry_by_oid(&self, oid: terrier_types::ColOid) -> Option<Column> {
        let schema = self.table.schema();
        schema
            .position_of_oid(oid)
            .map(|pos| schema.column(pos).clone())
    }

    #[must_use]
    pub fn type_of(&self, name: &str) -> Option<TypeId> {
        self.entry_by_name(name).map(|c| c.type_id())
    }
}

impl Catalog {
    /// Root navigation handle.
    #[must_use]
    pub fn handle(&self) -> CatalogHandle<'_> {
        CatalogHandle::new(self)
    }
}
