//! Testing utilities for the catalog migration workspace
//!
//! Shared fixtures: seeded catalogs for both store backends.

#![allow(missing_docs)]

use catalog_model::{ProductId, VariantId};
use catalog_store::schema::{
    ATTRIBUTES, ATTRIBUTE_VALUES, PRODUCTS, PRODUCT_LINKS, VARIANTS, VARIANT_LINKS,
};
use catalog_store::{CatalogStore, MemoryStore, Row, RowSink, SqliteStore};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const PHONE: ProductId = ProductId(1);
pub const CABLE: ProductId = ProductId(2);
pub const V1: VariantId = VariantId(1);
pub const V2: VariantId = VariantId(2);
pub const V3: VariantId = VariantId(3);

pub const COLOR: i64 = 1;
pub const STORAGE: i64 = 2;
pub const MATERIAL: i64 = 3;

/// Turn a `json!` object into a row
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture row must be a JSON object, got {other}"),
    }
}

/// Insert every object of a `json!` array into `table`
pub fn seed(sink: &impl RowSink, table: &str, rows: Value) {
    let Value::Array(rows) = rows else {
        panic!("seed expects a JSON array");
    };
    for r in rows {
        sink.insert_row(table, &row(r)).unwrap();
    }
}

pub fn add_product(sink: &impl RowSink, id: i64, name: &str, price: i64, has_variants: bool) {
    sink.insert_row(
        PRODUCTS,
        &row(json!({"id": id, "name": name, "price": price, "has_variants": has_variants})),
    )
    .unwrap();
}

pub fn add_variant(
    sink: &impl RowSink,
    id: i64,
    product: i64,
    name: &str,
    sku: Option<&str>,
    price: Option<i64>,
) {
    sink.insert_row(
        VARIANTS,
        &row(json!({"id": id, "product_id": product, "name": name, "sku": sku, "price": price})),
    )
    .unwrap();
}

pub fn link_variant(sink: &impl RowSink, variant: i64, attribute: i64, value: i64) {
    sink.insert_row(
        VARIANT_LINKS,
        &row(json!({"variant_id": variant, "attribute_id": attribute, "attribute_value_id": value})),
    )
    .unwrap();
}

/// Phone catalog
///
/// - product 1 "Phone" (1000 cents) with variants V1..V3 linked to Color and
///   Storage, a Material specification, and product-level stock that
///   violates the ownership rule
/// - product 2 "Cable" without variants and with tracking switched off
///
/// V3 carries its own price (1200) and a 256GB value with a 200 cent
/// modifier. V2 does not track inventory.
pub fn seed_phone_catalog(sink: &impl RowSink) {
    seed(
        sink,
        PRODUCTS,
        json!([
            {"id": 1, "name": "Phone", "sku": "PHONE", "price": 1000, "has_variants": true,
             "track_inventory": true, "stock_quantity": 25},
            {"id": 2, "name": "Cable", "sku": "CABLE", "price": 500, "has_variants": false,
             "track_inventory": false, "stock_quantity": 40}
        ]),
    );
    seed(
        sink,
        VARIANTS,
        json!([
            {"id": 1, "product_id": 1, "name": "Red 128GB", "sku": "PHONE-R-128", "price": 1000,
             "stock_quantity": 5},
            {"id": 2, "product_id": 1, "name": "Blue 128GB", "sku": "PHONE-B-128", "price": 1000,
             "track_inventory": false, "stock_quantity": 3},
            {"id": 3, "product_id": 1, "name": "Red 256GB", "sku": "PHONE-R-256", "price": 1200,
             "stock_quantity": 2}
        ]),
    );
    seed(
        sink,
        ATTRIBUTES,
        json!([
            {"id": COLOR, "name": "Color", "type": "select", "purpose": "variant"},
            {"id": STORAGE, "name": "Storage", "type": "select", "purpose": "variant"},
            {"id": MATERIAL, "name": "Material", "type": "text", "purpose": "specification"}
        ]),
    );
    seed(
        sink,
        ATTRIBUTE_VALUES,
        json!([
            {"id": 1, "attribute_id": COLOR, "value": "Red", "slug": "red"},
            {"id": 2, "attribute_id": COLOR, "value": "Blue", "slug": "blue"},
            {"id": 3, "attribute_id": STORAGE, "value": "128GB", "slug": "128gb"},
            {"id": 4, "attribute_id": STORAGE, "value": "256GB", "slug": "256gb", "price_modifier": 200},
            {"id": 5, "attribute_id": MATERIAL, "value": "Aluminium", "slug": "aluminium"}
        ]),
    );
    for (variant, color, storage) in [(1, 1, 3), (2, 2, 3), (3, 1, 4)] {
        link_variant(sink, variant, COLOR, color);
        link_variant(sink, variant, STORAGE, storage);
    }
    sink.insert_row(
        PRODUCT_LINKS,
        &row(json!({"product_id": 1, "attribute_id": MATERIAL, "attribute_value_id": 5})),
    )
    .unwrap();
}

/// Memory store with the full schema and the phone catalog
pub fn phone_memory_store() -> MemoryStore {
    let store = MemoryStore::with_catalog_schema();
    seed_phone_catalog(&store);
    store
}

/// Memory store with the phone catalog but no tracking columns yet
pub fn unprepared_memory_store() -> MemoryStore {
    let store = MemoryStore::with_storefront_schema();
    seed_phone_catalog(&store);
    store
}

/// SQLite file store with the full schema and the phone catalog
///
/// Keep the returned directory alive for as long as the store is used.
pub fn phone_sqlite_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("catalog.db")).unwrap();
    store.create_catalog_schema().unwrap();
    seed_phone_catalog(&store);
    (dir, store)
}

/// Options of a variant decoded as plain JSON
pub fn options_json(store: &impl CatalogStore, product: ProductId, variant: VariantId) -> Value {
    let variants = store.variants_of(product).unwrap();
    let v = variants.iter().find(|v| v.id == variant).unwrap();
    serde_json::from_str(v.options.as_deref().unwrap_or("null")).unwrap()
}
