//! Catalog bootstrap contents, handle navigation, table creation, catalog
//! reflexivity, and database destruction.

use std::sync::Arc;

use terrier_catalog::{Catalog, DEFAULT_DATABASE_NAME, DEFAULT_DATABASE_OID};
use terrier_mvcc::TransactionManager;
use terrier_storage::BlockStore;
use terrier_types::{ColOid, Column, Schema, TypeId, Value};

fn bootstrap() -> Arc<Catalog> {
    let manager = Arc::new(TransactionManager::new());
    let store = Arc::new(BlockStore::new(1 << 16, 1000, 100));
    Catalog::bootstrap(manager, store).unwrap()
}

fn user_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", TypeId::Integer, false, ColOid::new(5001)),
        Column::new("name", TypeId::Varchar, true, ColOid::new(5002)),
    ])
}

#[test]
fn bootstrap_creates_default_entities() {
    let catalog = bootstrap();
    let txn = catalog.txn_manager().begin();
    let handle = catalog.handle();

    let db = handle.database_entry(&txn, DEFAULT_DATABASE_NAME).unwrap();
    assert_eq!(db.oid, DEFAULT_DATABASE_OID);

    let tablespaces = handle.tablespace_handle();
    let pg_global = tablespaces.entry_by_name(&txn, "pg_global").unwrap();
    let pg_default = tablespaces.entry_by_name(&txn, "pg_default").unwrap();
    assert_ne!(pg_global.oid, pg_default.oid);
    assert!(tablespaces.entry_by_name(&txn, "pg_missing").is_none());

    let namespaces = handle.database_handle(db.oid).namespace_handle();
    assert!(namespaces.entry_by_name(&txn, "pg_catalog").is_some());
    assert!(namespaces.entry_by_name(&txn, "public").is_some());

    // The four catalog tables are self-registered in pg_class.
    let pg_class = catalog.pg_class_table(db.oid).unwrap();
    assert_eq!(catalog.scan_rows(&txn, &pg_class).len(), 4);

    catalog.txn_manager().commit(txn, || {}).unwrap();
}

#[test]
fn catalog_is_reflexive() {
    let catalog = bootstrap();
    let txn = catalog.txn_manager().begin();
    let namespaces = catalog
        .handle()
        .database_handle(DEFAULT_DATABASE_OID)
        .namespace_handle();
    let tables = namespaces.table_handle(&txn, "pg_catalog").unwrap();

    // Each catalog table's pg_class row resolves, through __ptr, to the
    // very table the catalog itself holds.
    for (name, expected) in [
        ("pg_database", catalog.pg_database_table()),
        ("pg_tablespace", catalog.pg_tablespace_table()),
        (
            "pg_namespace",
            catalog.pg_namespace_table(DEFAULT_DATABASE_OID).unwrap(),
        ),
        (
            "pg_class",
            catalog.pg_class_table(DEFAULT_DATABASE_OID).unwrap(),
        ),
    ] {
        let entry = tables.entry(&txn, name).unwrap();
        let resolved = catalog.resolve(entry.table_key).unwrap();
        assert!(
            Arc::ptr_eq(&resolved, &expected),
            "{name} row must point at the catalog-owned backing"
        );
        assert_eq!(entry.oid, expected.oid());
    }
    catalog.txn_manager().commit(txn, || {}).unwrap();
}

#[test]
fn create_table_registers_and_resolves() {
    let catalog = bootstrap();
    let txn = catalog.txn_manager().begin();
    let namespaces = catalog
        .handle()
        .database_handle(DEFAULT_DATABASE_OID)
        .namespace_handle();
    let public = namespaces.table_handle(&txn, "public").unwrap();

    let table_oid = public
        .create_table(&txn, user_schema(), "accounts")
        .unwrap();

    let entry = public.entry(&txn, "accounts").unwrap();
    assert_eq!(entry.oid, table_oid);
    assert_eq!(entry.relnamespace, public.namespace_oid());

    // The same name under pg_catalog does not exist.
    let pg_catalog = namespaces.table_handle(&txn, "pg_catalog").unwrap();
    assert!(pg_catalog.entry(&txn, "accounts").is_none());

    // Write through the resolved handle.
    let accounts = public.table(&txn, "accounts").unwrap();
    let slot = accounts
        .insert(
            &txn,
            &[
                Some(Value::Integer(1)),
                Some(Value::Varchar("alice".into())),
            ],
        )
        .unwrap();
    assert_eq!(
        accounts.select(&txn, slot).unwrap()[1],
        Some(Value::Varchar("alice".into()))
    );

    catalog.txn_manager().commit(txn, || {}).unwrap();
}

#[test]
fn attribute_handle_exposes_schema_columns() {
    let catalog = bootstrap();
    let txn = catalog.txn_manager().begin();
    let namespaces = catalog
        .handle()
        .database_handle(DEFAULT_DATABASE_OID)
        .namespace_handle();
    let public = namespaces.table_handle(&txn, "public").unwrap();
    public.create_table(&txn, user_schema(), "accounts").unwrap();

    let attributes = public.attribute_handle(&txn, "accounts").unwrap();
    assert_eq!(attributes.type_of("name"), Some(TypeId::Varchar));
    let id = attributes.entry_by_oid(ColOid::new(5001)).unwrap();
    assert_eq!(id.name(), "id");
    assert!(attributes.entry_by_name("missing").is_none());

    catalog.txn_manager().commit(txn, || {}).unwrap();
}

#[test]
fn destroy_database_frees_only_user_tables() {
    let catalog = bootstrap();
    let txn = catalog.txn_manager().begin();
    let namespaces = catalog
        .handle()
        .database_handle(DEFAULT_DATABASE_OID)
        .namespace_handle();
    let public = namespaces.table_handle(&txn, "public").unwrap();
    public.create_table(&txn, user_schema(), "accounts").unwrap();
    let key = public.entry(&txn, "accounts").unwrap().table_key;
    catalog.txn_manager().commit(txn, || {}).unwrap();

    assert!(catalog.resolve(key).is_some());
    catalog.destroy_database(DEFAULT_DATABASE_OID).unwrap();

    // The user table's backing is gone; catalog tables survive.
    assert!(catalog.resolve(key).is_none());
    assert!(catalog.pg_class_table(DEFAULT_DATABASE_OID).is_some());
    assert!(catalog.database_table(DEFAULT_DATABASE_OID, "accounts").is_none());
}

#[test]
fn namespace_add_entry_is_navigable() {
    let catalog = bootstrap();
    let txn = catalog.txn_manager().begin();
    let namespaces = catalog
        .handle()
        .database_handle(DEFAULT_DATABASE_OID)
        .namespace_handle();

    let oid = namespaces.add_entry(&txn, "analytics").unwrap();
    let entry = namespaces.entry_by_name(&txn, "analytics").unwrap();
    assert_eq!(entry.oid, oid);
    assert_eq!(namespaces.name_to_oid(&txn, "analytics"), Some(oid));

    let analytics = namespaces.table_handle(&txn, "analytics").unwrap();
    analytics
        .create_table(&txn, user_schema(), "events")
        .unwrap();
    assert!(analytics.table(&txn, "events").is_some());

    catalog.txn_manager().commit(txn, || {}).unwrap();
}
