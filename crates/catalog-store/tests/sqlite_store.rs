//! SQLite store integration tests
//!
//! Each test opens a fresh database file in a temp directory.

use catalog_model::{
    AuditRecord, AuditSeal, AuditStatus, BatchId, EntityType, Phase, ProductId,
    ProductMigration, ProductStock, StockTrackingFix, VariantConfig, VariantId,
    VariantMigration, VariantOptions,
};
use catalog_store::schema::{ATTRIBUTES, DEPRECATED_AT, PRODUCTS, VARIANTS, VARIANT_LINKS};
use catalog_store::{CatalogStore, ProductScope, SqliteStore, StoreError};
use catalog_test_utils::{
    add_product, add_variant, phone_memory_store, phone_sqlite_store, seed_phone_catalog, CABLE,
    PHONE, V1, V3,
};
use chrono::Utc;
use pretty_assertions::assert_eq;

#[test]
fn storefront_schema_gains_tracking_columns_once() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.create_storefront_schema().unwrap();
    assert!(!store
        .column_names(PRODUCTS)
        .unwrap()
        .contains(&"migrated_to_json".to_string()));

    let added = store.ensure_tracking_columns().unwrap();
    assert_eq!(added.len(), 6);
    assert!(added.contains(&"product_variants.override_price".to_string()));
    assert!(store.ensure_tracking_columns().unwrap().is_empty());
}

#[test]
fn keyset_pages_are_stable() {
    let (_dir, store) = phone_sqlite_store();
    add_product(&store, 3, "Tablet", 3000, true);
    add_variant(&store, 4, 3, "Tablet", Some("TAB"), None);

    let first = store.products_after(None, 1, ProductScope::PendingMigration).unwrap();
    assert_eq!(first.iter().map(|p| p.id).collect::<Vec<_>>(), vec![PHONE]);
    let second = store
        .products_after(Some(first[0].id), 1, ProductScope::PendingMigration)
        .unwrap();
    assert_eq!(second[0].id, ProductId(3));
    assert!(store
        .products_after(Some(ProductId(3)), 1, ProductScope::PendingMigration)
        .unwrap()
        .is_empty());

    let all = store.products_after(None, 10, ProductScope::All).unwrap();
    assert_eq!(all.len(), 3);
}

#[test]
fn legacy_rows_resolve_through_links() {
    let (_dir, store) = phone_sqlite_store();
    let rows = store.legacy_variant_options(V3).unwrap();
    let names: Vec<_> = rows.iter().map(|r| r.attribute_name.as_str()).collect();
    assert_eq!(names, vec!["Color", "Storage"]);
    assert_eq!(rows[1].value, "256GB");
    assert_eq!(rows[1].price_modifier, 200);

    let specs = store.legacy_product_attributes(PHONE).unwrap();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].value, "Aluminium");

    store.drop_table(VARIANT_LINKS).unwrap();
    assert!(store.legacy_variant_options(V3).unwrap().is_empty());
}

#[test]
fn copy_table_matches_source() {
    let (_dir, store) = phone_sqlite_store();
    let copied = store.copy_table(VARIANT_LINKS, "variant_attribute_values_backup_x").unwrap();
    assert_eq!(copied, 6);
    assert_eq!(
        store.row_count("variant_attribute_values_backup_x").unwrap(),
        store.row_count(VARIANT_LINKS).unwrap()
    );
    assert_eq!(
        store.column_names("variant_attribute_values_backup_x").unwrap(),
        store.column_names(VARIANT_LINKS).unwrap()
    );
    assert!(matches!(
        store.copy_table(VARIANT_LINKS, "variant_attribute_values_backup_x"),
        Err(StoreError::TableExists(_))
    ));
}

#[test]
fn identifiers_are_checked_before_sql() {
    let (_dir, store) = phone_sqlite_store();
    assert!(matches!(
        store.drop_table("attributes; DROP TABLE products"),
        Err(StoreError::InvalidIdentifier(_))
    ));
    assert!(matches!(
        store.drop_table("no_such_table"),
        Err(StoreError::TableNotFound(_))
    ));
    assert!(store.table_exists(PRODUCTS).unwrap());
}

#[test]
fn deprecation_stamp_round_trips() {
    let (_dir, store) = phone_sqlite_store();
    let before = store.column_names(ATTRIBUTES).unwrap();

    assert_eq!(store.stamp_deprecated(ATTRIBUTES, Utc::now()).unwrap(), 3);
    assert!(store
        .column_names(ATTRIBUTES)
        .unwrap()
        .contains(&DEPRECATED_AT.to_string()));
    assert_eq!(store.stamp_deprecated(ATTRIBUTES, Utc::now()).unwrap(), 0);

    assert_eq!(store.clear_deprecated(ATTRIBUTES).unwrap(), 3);
    assert_eq!(store.column_names(ATTRIBUTES).unwrap(), before);
}

#[test]
fn migration_plan_is_atomic() {
    let (_dir, store) = phone_sqlite_store();
    let plan = ProductMigration {
        product_id: PHONE,
        variant_config: VariantConfig::snapshot(3, BatchId::new(), Utc::now()),
        attributes: None,
        variants: vec![
            VariantMigration {
                variant_id: V1,
                options: VariantOptions::synthetic("Red 128GB", Some("PHONE-R-128")),
                override_price: None,
            },
            VariantMigration {
                variant_id: VariantId(42),
                options: VariantOptions::new(),
                override_price: None,
            },
        ],
    };

    let err = store.apply_migration(&plan).unwrap_err();
    assert!(matches!(err, StoreError::RowNotFound { id: 42, .. }));

    let product = store.product(PHONE).unwrap().unwrap();
    assert!(!product.migrated_to_json);
    assert!(product.variant_config.is_none());
    assert!(store.variants_of(PHONE).unwrap().iter().all(|v| !v.migrated_to_json));
}

#[test]
fn migration_plan_writes_every_row() {
    let (_dir, store) = phone_sqlite_store();
    let batch = BatchId::new();
    let plan = ProductMigration {
        product_id: PHONE,
        variant_config: VariantConfig::snapshot(3, batch, Utc::now()),
        attributes: None,
        variants: vec![VariantMigration {
            variant_id: V3,
            options: VariantOptions::synthetic("Red 256GB", None),
            override_price: Some(1200),
        }],
    };
    store.apply_migration(&plan).unwrap();

    let product = store.product(PHONE).unwrap().unwrap();
    assert!(product.migrated_to_json);
    let config = VariantConfig::parse(product.variant_config.as_deref().unwrap()).unwrap();
    assert_eq!(config.migration_batch_id, batch);

    let v3 = store.variants_of(PHONE).unwrap().remove(2);
    assert!(v3.migrated_to_json);
    assert_eq!(v3.override_price, Some(1200));
    assert!(store
        .products_after(None, 10, ProductScope::PendingMigration)
        .unwrap()
        .is_empty());
}

#[test]
fn stock_fix_updates_product_and_variants() {
    let (_dir, store) = phone_sqlite_store();
    store
        .apply_stock_fix(&StockTrackingFix {
            product_id: PHONE,
            product: Some(ProductStock {
                track_inventory: false,
                stock_quantity: Some(0),
            }),
            variants_to_track: vec![VariantId(2)],
        })
        .unwrap();

    let product = store.product(PHONE).unwrap().unwrap();
    assert!(!product.track_inventory);
    assert_eq!(product.stock_quantity, 0);
    assert!(store.variants_of(PHONE).unwrap().iter().all(|v| v.track_inventory));
    assert!(!store.product(CABLE).unwrap().unwrap().track_inventory);
}

#[test]
fn integrity_queries() {
    let (_dir, store) = phone_sqlite_store();
    add_variant(&store, 10, 99, "Ghost", Some("PHONE-R-128"), None);

    assert_eq!(store.orphaned_variants().unwrap(), vec![VariantId(10)]);
    let dups = store.duplicate_skus().unwrap();
    assert_eq!(dups.len(), 1);
    assert_eq!(dups[0].sku, "PHONE-R-128");
    assert_eq!(dups[0].variant_ids, vec![V1, VariantId(10)]);

    assert_eq!(store.delete_variants(&[VariantId(10)]).unwrap(), 1);
    assert!(store.orphaned_variants().unwrap().is_empty());
}

#[test]
fn counts_agree_with_memory_store() {
    let (_dir, sqlite) = phone_sqlite_store();
    let memory = phone_memory_store();

    let counts = sqlite.catalog_counts().unwrap();
    assert_eq!(counts, memory.catalog_counts().unwrap());
    assert_eq!(counts.total_products, 2);
    assert_eq!(counts.products_with_variants, 1);
    assert_eq!(counts.total_variants, 3);
    assert_eq!(counts.legacy_variant_links, 6);
    assert_eq!(counts.legacy_product_links, 1);
    assert_eq!(counts.migrated_variants, 0);
}

#[test]
fn audit_records_seal_once() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.create_catalog_schema().unwrap();
    seed_phone_catalog(&store);
    assert!(store.audit_records(None).unwrap().is_empty());
    store.ensure_audit_table().unwrap();

    let batch = BatchId::new();
    let record = AuditRecord::begin(
        batch,
        Phase::Migrate,
        "migrate_product",
        EntityType::Product,
        Some(1),
        Utc::now(),
    )
    .with_old_data(serde_json::json!({"migrated_to_json": false}));
    let id = store.insert_audit(&record).unwrap();

    store
        .seal_audit(
            id,
            &AuditSeal::completed(Some(serde_json::json!({"migrated_to_json": true})), None, Utc::now(), 3),
        )
        .unwrap();
    let err = store
        .seal_audit(id, &AuditSeal::failed("late", Utc::now(), 1))
        .unwrap_err();
    assert!(matches!(err, StoreError::AuditSeal { .. }));

    let records = store.audit_records(Some(batch)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AuditStatus::Completed);
    assert_eq!(records[0].processing_time_ms, Some(3));
    assert_eq!(records[0].old_data, Some(serde_json::json!({"migrated_to_json": false})));
    assert!(store.audit_records(Some(BatchId::new())).unwrap().is_empty());
}

#[test]
fn variants_read_in_id_order() {
    let (_dir, store) = phone_sqlite_store();
    let page = store.variants_after(Some(V1), 10).unwrap();
    assert_eq!(page.iter().map(|v| v.id.0).collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(store.row_count(VARIANTS).unwrap(), 3);
}

#[test]
fn open_existing_never_creates_a_file() {
    let (dir, _store) = phone_sqlite_store();
    let missing = dir.path().join("missing.db");

    assert!(SqliteStore::open_existing(&missing, true).is_err());
    assert!(SqliteStore::open_existing(&missing, false).is_err());
    assert!(!missing.exists());
}

#[test]
fn read_only_store_reads_but_rejects_writes() {
    let (dir, store) = phone_sqlite_store();
    drop(store);
    let store = SqliteStore::open_existing(dir.path().join("catalog.db"), true).unwrap();

    assert_eq!(store.product(PHONE).unwrap().unwrap().id, PHONE);
    assert!(matches!(
        store.delete_variants(&[V1]),
        Err(StoreError::Sqlite(_))
    ));
    assert_eq!(store.variants_of(PHONE).unwrap().len(), 3);
}
