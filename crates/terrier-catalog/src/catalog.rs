//! Catalog bootstrap, the table arena, and database destruction.
//!
//! Catalog table backing storage is owned by a slab arena; `pg_class.__ptr`
//! stores the dense arena key of a relation's backing table, so a single
//! attribute read plus one arena lookup resolves any relation. Catalog
//! tables themselves are registered under the `pg_catalog` namespace and
//! stay alive until the catalog is dropped; everything else is freed when
//! its database is destroyed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use terrier_error::{Result, TerrierError};
use terrier_mvcc::{SqlTable, TransactionContext, TransactionManager};
use terrier_storage::BlockStore;
use terrier_types::{
    ColOid, Column, DbOid, NamespaceOid, Schema, TableOid, TablespaceOid, TupleSlot, TypeId,
    Value,
};

/// First oid handed out by the catalog's synthetic-oid counter.
pub const START_OID: u32 = 1001;

/// Oid of the default database created at bootstrap.
pub const DEFAULT_DATABASE_OID: DbOid = DbOid::new(1);

/// Name of the default database.
pub const DEFAULT_DATABASE_NAME: &str = "terrier";

/// Dense key into the catalog's table arena; the value stored in the
/// hidden `__ptr` column of `pg_class`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TableKey(u64);

impl TableKey {
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

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tkey#{}", self.0)
    }
}

#[derive(Default)]
struct TableArena {
    slots: Vec<Option<Arc<SqlTable>>>,
    free: Vec<usize>,
}

impl TableArena {
    fn insert(&mut self, table: Arc<SqlTable>) -> TableKey {
        if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(table);
            return TableKey::new(slot as u64);
        }
        self.slots.push(Some(table));
        TableKey::new((self.slots.len() - 1) as u64)
    }

    fn get(&self, key: TableKey) -> Option<Arc<SqlTable>> {
        self.slots.get(key.get() as usize)?.clone()
    }

    fn remove(&mut self, key: TableKey) -> Option<Arc<SqlTable>> {
        let slot = self.slots.get_mut(key.get() as usize)?;
        let table = slot.take()?;
        self.free.push(key.get() as usize);
        Some(table)
    }
}

struct DatabaseCatalog {
    pg_namespace: TableKey,
    pg_class: TableKey,
    tables: HashMap<TableOid, TableKey>,
    names: HashMap<String, TableOid>,
}

pub struct Catalog {
    txn_manager: Arc<TransactionManager>,
    store: Arc<BlockStore>,
    next_oid: AtomicU32,
    arena: RwLock<TableArena>,
    pg_database: TableKey,
    pg_tablespace: TableKey,
    databases: RwLock<HashMap<DbOid, DatabaseCatalog>>,
}

impl Catalog {
    /// Bootstrap the catalog: create the process-scope tables, the default
    /// tablespaces, and the default database with its `pg_namespace` and
    /// `pg_class`, all within one transaction.
    pub fn bootstrap(
        txn_manager: Arc<TransactionManager>,
        store: Arc<BlockStore>,
    ) -> Result<Arc<Self>> {
        debug!("bootstrapping catalog");
        let next_oid = AtomicU32::new(START_OID);
        let mut arena = TableArena::default();

        let issue = |counter: &AtomicU32| counter.fetch_add(1, Ordering::Relaxed);

        // pg_database(oid, datname)
        let pg_database_oid = TableOid::new(issue(&next_oid));
        let pg_database_schema = Schema::new(vec![
            Column::new("oid", TypeId::Integer, false, ColOid::new(issue(&next_oid))),
            Column::new("datname", TypeId::Varchar, false, ColOid::new(issue(&next_oid))),
        ]);
        let pg_database = arena.insert(Arc::new(SqlTable::new(
            Arc::clone(&store),
            pg_database_schema,
            pg_database_oid,
        )));

        // pg_tablespace(oid, spcname)
        let pg_tablespace_oid = TableOid::new(issue(&next_oid));
        let pg_tablespace_schema = Schema::new(vec![
            Column::new("oid", TypeId::Integer, false, ColOid::new(issue(&next_oid))),
            Column::new("spcname", TypeId::Varchar, false, ColOid::new(issue(&next_oid))),
        ]);
        let pg_tablespace = arena.insert(Arc::new(SqlTable::new(
            Arc::clone(&store),
            pg_tablespace_schema,
            pg_tablespace_oid,
        )));

        let catalog = Arc::new(Self {
            txn_manager,
            store,
            next_oid,
            arena: RwLock::new(arena),
            pg_database,
            pg_tablespace,
            databases: RwLock::new(HashMap::new()),
        });

        let txn = catalog.txn_manager.begin();
        catalog.populate_pg_database(&txn)?;
        catalog.populate_pg_tablespace(&txn)?;
        catalog.bootstrap_database(&txn, DEFAULT_DATABASE_OID)?;
        catalog.txn_manager.commit(txn, || {})?;
        info!("catalog bootstrap complete");
        Ok(catalog)
    }

    #[must_use]
    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    /// Issue the next synthetic oid.
    pub fn next_oid(&self) -> u32 {
        self.next_oid.fetch_add(1, Ordering::Relaxed)
    }

    /// Resolve an arena key to its backing table.
    #[must_use]
    pub fn resolve(&self, key: TableKey) -> Option<Arc<SqlTable>> {
        self.arena.read().get(key)
    }

    #[must_use]
    pub fn pg_database_table(&self) -> Arc<SqlTable> {
        self.resolve(self.pg_database)
            .expect("pg_database is catalog-owned")
    }

    #[must_use]
    pub fn pg_tablespace_table(&self) -> Arc<SqlTable> {
        self.resolve(self.pg_tablespace)
            .expect("pg_tablespace is catalog-owned")
    }

    #[must_use]
    pub fn pg_namespace_table(&self, db_oid: DbOid) -> Option<Arc<SqlTable>> {
        let key = self.databases.read().get(&db_oid)?.pg_namespace;
        self.resolve(key)
    }

    #[must_use]
    pub fn pg_class_table(&self, db_oid: DbOid) -> Option<Arc<SqlTable>> {
        let key = self.databases.read().get(&db_oid)?.pg_class;
        self.resolve(key)
    }

    /// Look up a table registered in a database by name, bypassing the
    /// `pg_class` scan (internal fast path mirroring the name map).
    #[must_use]
    pub fn database_table(&self, db_oid: DbOid, name: &str) -> Option<Arc<SqlTable>> {
        let databases = self.databases.read();
        let db = databases.get(&db_oid)?;
        let oid = *db.names.get(name)?;
        let key = *db.tables.get(&oid)?;
        drop(databases);
        self.resolve(key)
    }

    /// Materialize every row of a catalog table visible to `txn`.
    #[must_use]
    pub fn scan_rows(
        &self,
        txn: &TransactionContext,
        table: &SqlTable,
    ) -> Vec<(TupleSlot, Vec<Option<Value>>)> {
        let mut rows = Vec::new();
        let mut iter = table.begin();
        let mut batch = table.all_columns_batch(64);
        loop {
            table.scan(txn, &mut iter, &mut batch);
            if batch.num_tuples() == 0 {
                break;
            }
            for (slot, row) in batch.rows() {
                rows.push((*slot, table.row_to_values(row)));
            }
        }
        rows
    }

    // --- bootstrap steps ---

    fn populate_pg_database(&self, txn: &TransactionContext) -> Result<()> {
        debug!("populating pg_database");
        let pg_database = self.pg_database_table();
        pg_database.insert(
            txn,
            &[
                Some(Value::Integer(DEFAULT_DATABASE_OID.get() as i32)),
                Some(Value::Varchar(DEFAULT_DATABASE_NAME.into())),
            ],
        )?;
        Ok(())
    }

    fn populate_pg_tablespace(&self, txn: &TransactionContext) -> Result<()> {
        debug!("populating pg_tablespace");
        let pg_tablespace = self.pg_tablespace_table();
        for name in ["pg_global", "pg_default"] {
            let oid = self.next_oid();
            pg_tablespace.insert(
                txn,
                &[
                    Some(Value::Integer(oid as i32)),
                    Some(Value::Varchar(name.into())),
                ],
            )?;
        }
        Ok(())
    }

    fn bootstrap_database(&self, txn: &TransactionContext, db_oid: DbOid) -> Result<()> {
        debug!(db_oid = db_oid.get(), "bootstrapping database");
        let pg_database = self.pg_database_table();
        let pg_tablespace = self.pg_tablespace_table();

        // pg_namespace(oid, nspname)
        let pg_namespace_oid = TableOid::new(self.next_oid());
        let pg_namespace_schema = Schema::new(vec![
            Column::new("oid", TypeId::Integer, false, ColOid::new(self.next_oid())),
            Column::new("nspname", TypeId::Varchar, false, ColOid::new(self.next_oid())),
        ]);
        let pg_namespace_table = Arc::new(SqlTable::new(
            Arc::clone(&self.store),
            pg_namespace_schema,
            pg_namespace_oid,
        ));
        let pg_namespace_key = self.arena.write().insert(Arc::clone(&pg_namespace_table));

        let pg_catalog_nsp = NamespaceOid::new(self.next_oid());
        pg_namespace_table.insert(
            txn,
            &[
                Some(Value::Integer(pg_catalog_nsp.get() as i32)),
                Some(Value::Varchar("pg_catalog".into())),
            ],
        )?;
        let public_nsp = NamespaceOid::new(self.next_oid());
        pg_namespace_table.insert(
            txn,
            &[
                Some(Value::Integer(public_nsp.get() as i32)),
                Some(Value::Varchar("public".into())),
            ],
        )?;

        // pg_class(__ptr, oid, relname, relnamespace, reltablespace)
        let pg_class_oid = TableOid::new(self.next_oid());
        let pg_class_schema = Schema::new(vec![
            Column::new("__ptr", TypeId::BigInt, false, ColOid::new(self.next_oid())),
            Column::new("oid", TypeId::Integer, false, ColOid::new(self.next_oid())),
            Column::new("relname", TypeId::Varchar, false, ColOid::new(self.next_oid())),
            Column::new("relnamespace", TypeId::Integer, false, ColOid::new(self.next_oid())),
            Column::new("reltablespace", TypeId::Integer, false, ColOid::new(self.next_oid())),
        ]);
        let pg_class_table = Arc::new(SqlTable::new(
            Arc::clone(&self.store),
            pg_class_schema,
            pg_class_oid,
        ));
        let pg_class_key = self.arena.write().insert(Arc::clone(&pg_class_table));

        let pg_global = self.tablespace_oid_by_name(txn, "pg_global")?;
        let pg_default = self.tablespace_oid_by_name(txn, "pg_default")?;

        // The four self-references, catalog tables living in pg_catalog.
        for (key, table, tablespace) in [
            (self.pg_database, &pg_database, pg_global),
            (self.pg_tablespace, &pg_tablespace, pg_global),
            (pg_namespace_key, &pg_namespace_table, pg_default),
            (pg_class_key, &pg_class_table, pg_default),
        ] {
            Self::insert_pg_class_row(
                txn,
                &pg_class_table,
                key,
                table.oid(),
                Self::relation_name(table.oid(), &[
                    (pg_database.oid(), "pg_database"),
                    (pg_tablespace.oid(), "pg_tablespace"),
                    (pg_namespace_table.oid(), "pg_namespace"),
                    (pg_class_table.oid(), "pg_class"),
                ]),
                pg_catalog_nsp,
                tablespace,
            )?;
        }

        let mut tables = HashMap::new();
        let mut names = HashMap::new();
        for (oid, key, name) in [
            (pg_database.oid(), self.pg_database, "pg_database"),
            (pg_tablespace.oid(), self.pg_tablespace, "pg_tablespace"),
            (pg_namespace_oid, pg_namespace_key, "pg_namespace"),
            (pg_class_oid, pg_class_key, "pg_class"),
        ] {
            tables.insert(oid, key);
            names.insert(name.to_owned(), oid);
        }
        self.databases.write().insert(
            db_oid,
            DatabaseCatalog {
                pg_namespace: pg_namespace_key,
                pg_class: pg_class_key,
                tables,
                names,
            },
        );
        Ok(())
    }

    fn relation_name(oid: TableOid, known: &[(TableOid, &'static str)]) -> &'static str {
        known
            .iter()
            .find(|(o, _)| *o == oid)
            .map(|(_, n)| *n)
            .expect("bootstrap relation names are known")
    }

    fn insert_pg_class_row(
        txn: &TransactionContext,
        pg_class: &SqlTable,
        key: TableKey,
        oid: TableOid,
        relname: &str,
        relnamespace: NamespaceOid,
        reltablespace: TablespaceOid,
    ) -> Result<()> {
        pg_class.insert(
            txn,
            &[
                Some(Value::BigInt(key.get() as i64)),
                Some(Value::Integer(oid.get() as i32)),
                Some(Value::Varchar(relname.into())),
                Some(Value::Integer(relnamespace.get() as i32)),
                Some(Value::Integer(reltablespace.get() as i32)),
            ],
        )?;
        Ok(())
    }

    fn tablespace_oid_by_name(
        &self,
        txn: &TransactionContext,
        name: &str,
    ) -> Result<TablespaceOid> {
        let pg_tablespace = self.pg_tablespace_table();
        for (_, row) in self.scan_rows(txn, &pg_tablespace) {
            if let (Some(Value::Integer(oid)), Some(Value::Varchar(spcname))) =
                (&row[0], &row[1])
            {
                if spcname == name {
                    return Ok(TablespaceOid::new(*oid as u32));
                }
            }
        }
        Err(TerrierError::CatalogNotFound {
            kind: "tablespace",
            name: name.to_owned(),
        })
    }

    // --- table creation and destruction ---

    /// Create a user table: allocate its oid, construct the backing
    /// storage, and insert the `pg_class` row with `__ptr` set to the new
    /// arena key.
    pub fn create_user_table(
        &self,
        txn: &TransactionContext,
        db_oid: DbOid,
        relnamespace: NamespaceOid,
        reltablespace: TablespaceOid,
        schema: Schema,
        name: &str,
    ) -> Result<TableOid> {
        let table_oid = TableOid::new(self.next_oid());
        let table = Arc::new(SqlTable::new(Arc::clone(&self.store), schema, table_oid));
        let key = self.arena.write().insert(Arc::clone(&table));

        let pg_class = self
            .pg_class_table(db_oid)
            .ok_or(TerrierError::CatalogNotFound {
                kind: "database",
                name: db_oid.to_string(),
            })?;
        Self::insert_pg_class_row(txn, &pg_class, key, table_oid, name, relnamespace, reltablespace)?;

        let mut databases = self.databases.write();
        if let Some(db) = databases.get_mut(&db_oid) {
            db.tables.insert(table_oid, key);
            db.names.insert(name.to_owned(), table_oid);
        }
        debug!(table_oid = table_oid.get(), name, "user table created");
        Ok(table_oid)
    }

    /// Destroy a database: every `pg_class` row whose namespace is not
    /// `pg_catalog` owns its backing table through `__ptr`, and that
    /// backing is freed here. Catalog tables remain reachable through the
    /// catalog itself and are freed when the catalog is dropped. Future
    /// relation kinds (indexes, materialized views) must either own their
    /// backing the same way or live in `pg_catalog`.
    pub fn destroy_database(&self, db_oid: DbOid) -> Result<()> {
        let txn = self.txn_manager.begin();
        let pg_class = self
            .pg_class_table(db_oid)
            .ok_or(TerrierError::CatalogNotFound {
                kind: "database",
                name: db_oid.to_string(),
            })?;
        let pg_namespace = self
            .pg_namespace_table(db_oid)
            .ok_or(TerrierError::CatalogNotFound {
                kind: "database",
                name: db_oid.to_string(),
            })?;

        let pg_catalog_nsp = self
            .scan_rows(&txn, &pg_namespace)
            .into_iter()
            .find_map(|(_, row)| match (&row[0], &row[1]) {
                (Some(Value::Integer(oid)), Some(Value::Varchar(name)))
                    if name == "pg_catalog" =>
                {
                    Some(*oid as u32)
                }
                _ => None,
            })
            .ok_or(TerrierError::CatalogNotFound {
                kind: "namespace",
                name: "pg_catalog".into(),
            })?;

        let rows = self.scan_rows(&txn, &pg_class);
        let mut freed = 0_usize;
        {
            let mut arena = self.arena.write();
            let mut databases = self.databases.write();
            let mut db = databases.get_mut(&db_oid);
            for (_, row) in &rows {
                let (Some(Value::BigInt(key)), Some(Value::Integer(nsp))) = (&row[0], &row[3])
                else {
                    continue;
                };
                if *nsp as u32 == pg_catalog_nsp {
                    continue;
                }
                if arena.remove(TableKey::new(*key as u64)).is_some() {
                    freed += 1;
                }
                if let Some(db) = db.as_mut() {
                    if let (Some(Value::Integer(oid)), Some(Value::Varchar(relname))) =
                        (&row[1], &row[2])
                    {
                        db.tables.remove(&TableOid::new(*oid as u32));
                        db.names.remove(relname.as_str());
                    }
                }
            }
        }
        self.txn_manager.commit(txn, || {})?;
        info!(db_oid = db_oid.get(), freed, "database destroyed");
        Ok(())
    }
}
