//! In-memory backend
//!
//! Tables are lists of JSON rows with declared columns, so the same fixture
//! rows seed this store and the SQLite one. Write plans run against a copy
//! of the database that replaces the original only on success.
//!
//! Faults can be injected per table (copy) or per product (migration) to
//! exercise rollback and continue-on-error paths.

use crate::error::{Result, StoreError};
use crate::schema::{
    self, TableDef, AUDIT_LOG, AUDIT_TABLE, CATALOG_TABLES, DEPRECATED_AT, PRODUCTS,
    PRODUCT_LINKS, TRACKING_COLUMNS, VARIANTS, VARIANT_LINKS,
};
use crate::{validate_identifier, CatalogStore, DuplicateSku, ProductScope, Row, RowSink};
use catalog_model::{
    AttributePurpose, AuditId, AuditRecord, AuditSeal, BatchId, CatalogCounts, LegacyOptionRow,
    Product, ProductId, ProductMigration, StockTrackingFix, Variant, VariantId,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
struct MemColumn {
    name: String,
    default: Value,
}

#[derive(Debug, Clone, PartialEq)]
struct MemTable {
    columns: Vec<MemColumn>,
    rows: Vec<Row>,
    unique: Vec<Vec<String>>,
    next_id: i64,
}

impl MemTable {
    fn from_def(def: &TableDef) -> Self {
        Self {
            columns: def
                .columns
                .iter()
                .map(|c| MemColumn {
                    name: c.name.to_string(),
                    default: c.default.to_value(),
                })
                .collect(),
            rows: Vec::new(),
            unique: def
                .unique
                .iter()
                .map(|cols| cols.iter().map(|c| (*c).to_string()).collect())
                .collect(),
            next_id: 1,
        }
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn add_column(&mut self, name: &str, default: Value) {
        for row in &mut self.rows {
            row.insert(name.to_string(), default.clone());
        }
        self.columns.push(MemColumn {
            name: name.to_string(),
            default,
        });
    }

    fn remove_column(&mut self, name: &str) {
        self.columns.retain(|c| c.name != name);
        for row in &mut self.rows {
            row.remove(name);
        }
    }

    fn find_mut(&mut self, id: i64) -> Option<&mut Row> {
        self.rows.iter_mut().find(|r| row_id(r) == Some(id))
    }

    fn typed<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|r| {
                serde_json::from_value(Value::Object(r.clone()))
                    .map_err(|e| StoreError::decode(table, e))
            })
            .collect()
    }
}

fn row_id(row: &Row) -> Option<i64> {
    row.get("id").and_then(Value::as_i64)
}

fn int(row: &Row, column: &str) -> Option<i64> {
    row.get(column).and_then(Value::as_i64)
}

fn text<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

/// Coerce integer flags the way SQLite affinity would
fn coerce(default: &Value, value: Value) -> Value {
    match (default, &value) {
        (Value::Bool(_), Value::Number(n)) => Value::Bool(n.as_i64().unwrap_or_default() != 0),
        _ => value,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct MemoryDb {
    tables: BTreeMap<String, MemTable>,
}

impl MemoryDb {
    fn table(&self, name: &str) -> Result<&MemTable> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    fn products(&self) -> Result<Vec<Product>> {
        self.table(PRODUCTS)?.typed(PRODUCTS)
    }

    fn variants(&self) -> Result<Vec<Variant>> {
        self.table(VARIANTS)?.typed(VARIANTS)
    }

    fn legacy_rows(
        &self,
        link_table: &str,
        owner_column: &str,
        owner: i64,
    ) -> Result<Vec<LegacyOptionRow>> {
        let (Some(links), Some(attributes), Some(values)) = (
            self.tables.get(link_table),
            self.tables.get(schema::ATTRIBUTES),
            self.tables.get(schema::ATTRIBUTE_VALUES),
        ) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for link in links.rows.iter().filter(|l| int(l, owner_column) == Some(owner)) {
            let attribute = attributes
                .rows
                .iter()
                .find(|a| row_id(a).is_some() && row_id(a) == int(link, "attribute_id"));
            let value = values
                .rows
                .iter()
                .find(|v| row_id(v).is_some() && row_id(v) == int(link, "attribute_value_id"));
            let (Some(attribute), Some(value)) = (attribute, value) else {
                continue;
            };
            let purpose: AttributePurpose = text(attribute, "purpose")
                .unwrap_or("variant")
                .parse()
                .map_err(|e| StoreError::decode(schema::ATTRIBUTES, e))?;
            out.push(LegacyOptionRow {
                attribute_id: row_id(attribute).unwrap_or_default(),
                attribute_name: text(attribute, "name").unwrap_or_default().to_string(),
                attribute_type: text(attribute, "type").unwrap_or_default().to_string(),
                purpose,
                value: text(value, "value").unwrap_or_default().to_string(),
                slug: text(value, "slug").unwrap_or_default().to_string(),
                price_modifier: int(value, "price_modifier").unwrap_or_default(),
            });
        }
        out.sort_by_key(|r| r.attribute_id);
        Ok(out)
    }

    fn create_table(&mut self, def: &TableDef) {
        self.tables
            .entry(def.name.to_string())
            .or_insert_with(|| MemTable::from_def(def));
    }

    fn add_tracking_columns(&mut self) -> Vec<String> {
        let mut added = Vec::new();
        for (table, column) in &TRACKING_COLUMNS {
            if let Some(t) = self.tables.get_mut(*table) {
                if !t.has_column(column.name) {
                    t.add_column(column.name, column.default.to_value());
                    added.push(format!("{table}.{}", column.name));
                }
            }
        }
        added
    }

    fn insert(&mut self, table: &str, row: &Row) -> Result<i64> {
        let t = self.table_mut(table)?;
        if let Some(unknown) = row.keys().find(|k| !t.has_column(k)) {
            return Err(StoreError::UnknownColumn {
                table: table.to_string(),
                column: unknown.clone(),
            });
        }

        let mut full = Row::new();
        for column in &t.columns {
            let value = row
                .get(&column.name)
                .cloned()
                .map_or_else(|| column.default.clone(), |v| coerce(&column.default, v));
            full.insert(column.name.clone(), value);
        }

        let has_id = t.has_column("id");
        let id = if has_id {
            let id = row_id(&full).unwrap_or(t.next_id);
            if t.rows.iter().any(|r| row_id(r) == Some(id)) {
                return Err(StoreError::UniqueViolation {
                    table: table.to_string(),
                    columns: "id".to_string(),
                });
            }
            full.insert("id".to_string(), Value::from(id));
            t.next_id = t.next_id.max(id + 1);
            id
        } else {
            0
        };

        for unique in &t.unique {
            let clash = t
                .rows
                .iter()
                .any(|r| unique.iter().all(|c| r.get(c) == full.get(c)));
            if clash {
                return Err(StoreError::UniqueViolation {
                    table: table.to_string(),
                    columns: unique.join(", "),
                });
            }
        }

        t.rows.push(full);
        if has_id {
            t.rows.sort_by_key(|r| row_id(r).unwrap_or_default());
        }
        Ok(id)
    }
}

/// Opaque copy of a memory store's contents, for equality checks
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnapshot(MemoryDb);

#[derive(Debug, Default)]
struct Faults {
    copy: HashSet<String>,
    /// Sources whose copies fail to count once created
    count_after_copy: HashSet<String>,
    count: HashSet<String>,
    /// Table name prefixes whose drops fail
    drop: Vec<String>,
    seal: bool,
    migrate: HashSet<ProductId>,
}

/// In-memory catalog store
#[derive(Debug, Default)]
pub struct MemoryStore {
    db: Mutex<MemoryDb>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    /// Empty store with no tables
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the storefront and legacy tables, no tracking columns
    #[must_use]
    pub fn with_storefront_schema() -> Self {
        let store = Self::new();
        {
            let mut db = store.db.lock();
            for def in &CATALOG_TABLES {
                db.create_table(def);
            }
        }
        store
    }

    /// Store with the full catalog schema, tracking columns included
    #[must_use]
    pub fn with_catalog_schema() -> Self {
        let store = Self::with_storefront_schema();
        store.db.lock().add_tracking_columns();
        store
    }

    /// Create a table from a definition (no-op if it exists)
    pub fn create_table(&self, def: &TableDef) {
        self.db.lock().create_table(def);
    }

    /// Remove a column, used to build damaged schemas in tests
    pub fn remove_column(&self, table: &str, column: &str) {
        if let Some(t) = self.db.lock().tables.get_mut(table) {
            t.remove_column(column);
        }
    }

    /// Make every copy of `table` fail
    pub fn fail_copy_of(&self, table: &str) {
        self.faults.lock().copy.insert(table.to_string());
    }

    /// Let copies of `table` succeed but make counting the copy fail
    pub fn fail_count_after_copy_of(&self, table: &str) {
        self.faults.lock().count_after_copy.insert(table.to_string());
    }

    /// Make every drop of a table whose name starts with `prefix` fail
    pub fn fail_drop_of(&self, prefix: &str) {
        self.faults.lock().drop.push(prefix.to_string());
    }

    /// Make every audit seal fail
    pub fn fail_audit_seals(&self) {
        self.faults.lock().seal = true;
    }

    /// Make every migration write for `product` fail
    pub fn fail_migration_of(&self, product: ProductId) {
        self.faults.lock().migrate.insert(product);
    }

    /// Clear all injected faults
    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Copy of the current contents
    #[must_use]
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot(self.db.lock().clone())
    }

    /// Raw rows of a table, for assertions
    ///
    /// # Errors
    /// `TableNotFound` if the table does not exist.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self.db.lock().table(table)?.rows.clone())
    }

    /// Run `f` against a copy and keep the result only if it succeeds
    fn transact<T>(&self, f: impl FnOnce(&mut MemoryDb) -> Result<T>) -> Result<T> {
        let mut db = self.db.lock();
        let mut working = db.clone();
        let out = f(&mut working)?;
        *db = working;
        Ok(out)
    }
}

fn set(row: &mut Row, column: &str, value: impl Into<Value>) {
    row.insert(column.to_string(), value.into());
}

impl CatalogStore for MemoryStore {
    fn table_exists(&self, table: &str) -> Result<bool> {
        validate_identifier(table)?;
        Ok(self.db.lock().tables.contains_key(table))
    }

    fn column_names(&self, table: &str) -> Result<Vec<String>> {
        validate_identifier(table)?;
        Ok(self
            .db
            .lock()
            .tables
            .get(table)
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default())
    }

    fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.db.lock().tables.keys().cloned().collect())
    }

    fn row_count(&self, table: &str) -> Result<u64> {
        validate_identifier(table)?;
        if self.faults.lock().count.contains(table) {
            return Err(StoreError::Injected(format!("count of {table} failed")));
        }
        Ok(self.db.lock().table(table)?.rows.len() as u64)
    }

    fn ensure_tracking_columns(&self) -> Result<Vec<String>> {
        Ok(self.db.lock().add_tracking_columns())
    }

    fn ensure_audit_table(&self) -> Result<()> {
        self.db.lock().create_table(&AUDIT_TABLE);
        Ok(())
    }

    fn copy_table(&self, source: &str, target: &str) -> Result<u64> {
        validate_identifier(source)?;
        validate_identifier(target)?;
        let (fail_copy, fail_count) = {
            let faults = self.faults.lock();
            (faults.copy.contains(source), faults.count_after_copy.contains(source))
        };
        if fail_copy {
            return Err(StoreError::Injected(format!("copy of {source} failed")));
        }
        let rows = {
            let mut db = self.db.lock();
            let copy = db.table(source)?.clone();
            if db.tables.contains_key(target) {
                return Err(StoreError::TableExists(target.to_string()));
            }
            let rows = copy.rows.len() as u64;
            db.tables.insert(target.to_string(), copy);
            rows
        };
        if fail_count {
            self.faults.lock().count.insert(target.to_string());
        }
        Ok(rows)
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        validate_identifier(table)?;
        if self.faults.lock().drop.iter().any(|p| table.starts_with(p.as_str())) {
            return Err(StoreError::Injected(format!("drop of {table} failed")));
        }
        self.db
            .lock()
            .tables
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    fn stamp_deprecated(&self, table: &str, at: DateTime<Utc>) -> Result<u64> {
        validate_identifier(table)?;
        let mut db = self.db.lock();
        let t = db.table_mut(table)?;
        if !t.has_column(DEPRECATED_AT) {
            t.add_column(DEPRECATED_AT, Value::Null);
        }
        let stamp = Value::from(at.to_rfc3339());
        let mut stamped = 0;
        for row in &mut t.rows {
            if row.get(DEPRECATED_AT).map_or(true, Value::is_null) {
                row.insert(DEPRECATED_AT.to_string(), stamp.clone());
                stamped += 1;
            }
        }
        Ok(stamped)
    }

    fn clear_deprecated(&self, table: &str) -> Result<u64> {
        validate_identifier(table)?;
        let mut db = self.db.lock();
        let t = db.table_mut(table)?;
        if !t.has_column(DEPRECATED_AT) {
            return Ok(0);
        }
        let stamped = t
            .rows
            .iter()
            .filter(|r| r.get(DEPRECATED_AT).is_some_and(|v| !v.is_null()))
            .count() as u64;
        t.remove_column(DEPRECATED_AT);
        Ok(stamped)
    }

    fn products_after(
        &self,
        after: Option<ProductId>,
        limit: usize,
        scope: ProductScope,
    ) -> Result<Vec<Product>> {
        let products = self.db.lock().products()?;
        Ok(products
            .into_iter()
            .filter(|p| after.map_or(true, |a| p.id > a))
            .filter(|p| match scope {
                ProductScope::All => true,
                ProductScope::PendingMigration => p.has_variants && !p.migrated_to_json,
                ProductScope::Migrated => p.has_variants && p.migrated_to_json,
            })
            .take(limit)
            .collect())
    }

    fn variants_after(&self, after: Option<VariantId>, limit: usize) -> Result<Vec<Variant>> {
        let variants = self.db.lock().variants()?;
        Ok(variants
            .into_iter()
            .filter(|v| after.map_or(true, |a| v.id > a))
            .take(limit)
            .collect())
    }

    fn product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self
            .db
            .lock()
            .products()?
            .into_iter()
            .find(|p| p.id == id))
    }

    fn variants_of(&self, product: ProductId) -> Result<Vec<Variant>> {
        Ok(self
            .db
            .lock()
            .variants()?
            .into_iter()
            .filter(|v| v.product_id == product)
            .collect())
    }

    fn legacy_variant_options(&self, variant: VariantId) -> Result<Vec<LegacyOptionRow>> {
        self.db.lock().legacy_rows(VARIANT_LINKS, "variant_id", variant.0)
    }

    fn legacy_product_attributes(&self, product: ProductId) -> Result<Vec<LegacyOptionRow>> {
        self.db.lock().legacy_rows(PRODUCT_LINKS, "product_id", product.0)
    }

    fn orphaned_variants(&self) -> Result<Vec<VariantId>> {
        let db = self.db.lock();
        let products: HashSet<ProductId> = db.products()?.into_iter().map(|p| p.id).collect();
        Ok(db
            .variants()?
            .into_iter()
            .filter(|v| !products.contains(&v.product_id))
            .map(|v| v.id)
            .collect())
    }

    fn duplicate_skus(&self) -> Result<Vec<DuplicateSku>> {
        let mut by_sku: BTreeMap<String, Vec<VariantId>> = BTreeMap::new();
        for variant in self.db.lock().variants()? {
            if let Some(sku) = variant.sku.filter(|s| !s.is_empty()) {
                by_sku.entry(sku).or_default().push(variant.id);
            }
        }
        Ok(by_sku
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(sku, variant_ids)| DuplicateSku { sku, variant_ids })
            .collect())
    }

    fn catalog_counts(&self) -> Result<CatalogCounts> {
        let db = self.db.lock();
        let products = db.products()?;
        let variants = db.variants()?;
        let owners: HashSet<ProductId> = variants.iter().map(|v| v.product_id).collect();
        let links = |table: &str| db.tables.get(table).map_or(0, |t| t.rows.len() as u64);
        let n = |it: usize| it as u64;

        Ok(CatalogCounts {
            total_products: n(products.len()),
            products_with_variants: n(products.iter().filter(|p| p.has_variants).count()),
            migrated_products: n(products
                .iter()
                .filter(|p| p.has_variants && p.migrated_to_json)
                .count()),
            total_variants: n(variants.len()),
            migrated_variants: n(variants.iter().filter(|v| v.migrated_to_json).count()),
            variants_with_options: n(variants
                .iter()
                .filter(|v| v.options.as_deref().is_some_and(|o| !o.trim().is_empty()))
                .count()),
            variants_with_override_price: n(variants
                .iter()
                .filter(|v| v.override_price.is_some())
                .count()),
            legacy_variant_links: links(VARIANT_LINKS),
            legacy_product_links: links(PRODUCT_LINKS),
            products_with_non_positive_price: n(products.iter().filter(|p| p.price <= 0).count()),
            variants_with_non_positive_price: n(variants
                .iter()
                .filter(|v| v.price.is_some_and(|p| p <= 0))
                .count()),
            products_flagged_without_variants: n(products
                .iter()
                .filter(|p| p.has_variants && !owners.contains(&p.id))
                .count()),
            products_unflagged_with_variants: n(products
                .iter()
                .filter(|p| !p.has_variants && owners.contains(&p.id))
                .count()),
        })
    }

    fn apply_migration(&self, plan: &ProductMigration) -> Result<()> {
        if self.faults.lock().migrate.contains(&plan.product_id) {
            return Err(StoreError::Injected(format!(
                "migration write for product {} failed",
                plan.product_id
            )));
        }
        let config = plan.variant_config.to_json_string()?;
        let attributes = plan
            .attributes
            .as_ref()
            .map(catalog_model::ProductAttributes::to_json_string)
            .transpose()?;

        self.transact(|db| {
            let product = db
                .table_mut(PRODUCTS)?
                .find_mut(plan.product_id.0)
                .ok_or_else(|| StoreError::row_not_found(PRODUCTS, plan.product_id.0))?;
            set(product, "variant_config", config);
            set(product, "migrated_to_json", true);
            if let Some(attributes) = attributes {
                set(product, "attributes", attributes);
            }

            let variants = db.table_mut(VARIANTS)?;
            for v in &plan.variants {
                let row = variants
                    .find_mut(v.variant_id.0)
                    .filter(|r| int(r, "product_id") == Some(plan.product_id.0))
                    .ok_or_else(|| StoreError::row_not_found(VARIANTS, v.variant_id.0))?;
                set(row, "options", v.options.to_json_string()?);
                set(row, "override_price", v.override_price);
                set(row, "migrated_to_json", true);
            }
            Ok(())
        })
    }

    fn apply_stock_fix(&self, fix: &StockTrackingFix) -> Result<()> {
        self.transact(|db| {
            if let Some(stock) = fix.product {
                let product = db
                    .table_mut(PRODUCTS)?
                    .find_mut(fix.product_id.0)
                    .ok_or_else(|| StoreError::row_not_found(PRODUCTS, fix.product_id.0))?;
                set(product, "track_inventory", stock.track_inventory);
                if let Some(quantity) = stock.stock_quantity {
                    set(product, "stock_quantity", quantity);
                }
            }
            let variants = db.table_mut(VARIANTS)?;
            for id in &fix.variants_to_track {
                let row = variants
                    .find_mut(id.0)
                    .filter(|r| int(r, "product_id") == Some(fix.product_id.0))
                    .ok_or_else(|| StoreError::row_not_found(VARIANTS, id.0))?;
                set(row, "track_inventory", true);
            }
            Ok(())
        })
    }

    fn delete_variants(&self, ids: &[VariantId]) -> Result<u64> {
        let doomed: HashSet<i64> = ids.iter().map(|v| v.0).collect();
        self.transact(|db| {
            if let Some(links) = db.tables.get_mut(VARIANT_LINKS) {
                links
                    .rows
                    .retain(|r| !int(r, "variant_id").is_some_and(|id| doomed.contains(&id)));
            }
            let variants = db.table_mut(VARIANTS)?;
            let before = variants.rows.len();
            variants
                .rows
                .retain(|r| !row_id(r).is_some_and(|id| doomed.contains(&id)));
            Ok((before - variants.rows.len()) as u64)
        })
    }

    fn insert_audit(&self, record: &AuditRecord) -> Result<AuditId> {
        let mut row = match serde_json::to_value(record) {
            Ok(Value::Object(row)) => row,
            Ok(_) => return Err(StoreError::decode(AUDIT_LOG, "record is not an object")),
            Err(e) => return Err(StoreError::decode(AUDIT_LOG, e)),
        };
        row.remove("id");
        self.db.lock().insert(AUDIT_LOG, &row).map(AuditId)
    }

    fn seal_audit(&self, id: AuditId, seal: &AuditSeal) -> Result<()> {
        if self.faults.lock().seal {
            return Err(StoreError::Injected(format!("seal of audit record {id} failed")));
        }
        let mut db = self.db.lock();
        let row = db
            .table_mut(AUDIT_LOG)?
            .find_mut(id.0)
            .ok_or_else(|| StoreError::row_not_found(AUDIT_LOG, id.0))?;
        let mut record: AuditRecord = serde_json::from_value(Value::Object(row.clone()))
            .map_err(|e| StoreError::decode(AUDIT_LOG, e))?;
        record
            .apply_seal(seal)
            .map_err(|source| StoreError::AuditSeal { id, source })?;

        if let Ok(Value::Object(sealed)) = serde_json::to_value(&record) {
            *row = sealed;
        }
        Ok(())
    }

    fn audit_records(&self, batch: Option<BatchId>) -> Result<Vec<AuditRecord>> {
        let db = self.db.lock();
        let Some(table) = db.tables.get(AUDIT_LOG) else {
            return Ok(Vec::new());
        };
        let records: Vec<AuditRecord> = table.typed(AUDIT_LOG)?;
        Ok(records
            .into_iter()
            .filter(|r| batch.map_or(true, |b| r.batch_id == b))
            .collect())
    }
}

impl RowSink for MemoryStore {
    fn insert_row(&self, table: &str, row: &Row) -> Result<i64> {
        validate_identifier(table)?;
        self.db.lock().insert(table, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_model::{EntityType, Phase, VariantConfig, VariantMigration, VariantOptions};
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture row must be an object"),
        }
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::with_catalog_schema();
        store
            .insert_row(PRODUCTS, &row(json!({"name": "Phone", "price": 1000, "has_variants": 1})))
            .unwrap();
        store
            .insert_row(VARIANTS, &row(json!({"product_id": 1, "name": "Red", "sku": "P-R"})))
            .unwrap();
        store
    }

    #[test]
    fn insert_assigns_ids_and_defaults() {
        let store = seeded();
        let product = store.product(ProductId(1)).unwrap().unwrap();
        assert!(product.has_variants);
        assert!(product.track_inventory);
        assert!(!product.migrated_to_json);

        let id = store
            .insert_row(PRODUCTS, &row(json!({"name": "Case", "price": 500})))
            .unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn insert_rejects_unknown_column() {
        let store = seeded();
        let err = store
            .insert_row(PRODUCTS, &row(json!({"colour": "red"})))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }

    #[test]
    fn unique_constraint_enforced() {
        let store = seeded();
        let link = row(json!({"variant_id": 1, "attribute_id": 1, "attribute_value_id": 1}));
        store.insert_row(VARIANT_LINKS, &link).unwrap();
        let err = store.insert_row(VARIANT_LINKS, &link).unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
    }

    #[test]
    fn failed_migration_leaves_no_partial_write() {
        let store = seeded();
        let before = store.snapshot();
        let plan = ProductMigration {
            product_id: ProductId(1),
            variant_config: VariantConfig::snapshot(2, BatchId::new(), Utc::now()),
            attributes: None,
            variants: vec![
                VariantMigration {
                    variant_id: VariantId(1),
                    options: VariantOptions::synthetic("Red", Some("P-R")),
                    override_price: None,
                },
                VariantMigration {
                    variant_id: VariantId(99),
                    options: VariantOptions::new(),
                    override_price: None,
                },
            ],
        };
        let err = store.apply_migration(&plan).unwrap_err();
        assert!(matches!(err, StoreError::RowNotFound { id: 99, .. }));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn injected_copy_fault() {
        let store = seeded();
        store.fail_copy_of(PRODUCTS);
        assert!(matches!(
            store.copy_table(PRODUCTS, "products_backup"),
            Err(StoreError::Injected(_))
        ));
        store.clear_faults();
        assert_eq!(store.copy_table(PRODUCTS, "products_backup").unwrap(), 1);
    }

    #[test]
    fn injected_count_and_drop_faults() {
        let store = seeded();
        store.fail_count_after_copy_of(PRODUCTS);
        store.fail_drop_of("products_backup");
        assert_eq!(store.copy_table(PRODUCTS, "products_backup").unwrap(), 1);
        assert!(matches!(store.row_count("products_backup"), Err(StoreError::Injected(_))));
        assert_eq!(store.row_count(PRODUCTS).unwrap(), 1);
        assert!(matches!(store.drop_table("products_backup"), Err(StoreError::Injected(_))));
        store.clear_faults();
        store.drop_table("products_backup").unwrap();
    }

    #[test]
    fn stamp_and_clear_deprecated() {
        let store = seeded();
        assert_eq!(store.stamp_deprecated(VARIANTS, Utc::now()).unwrap(), 1);
        assert_eq!(store.stamp_deprecated(VARIANTS, Utc::now()).unwrap(), 0);
        assert_eq!(store.clear_deprecated(VARIANTS).unwrap(), 1);
        assert!(!store
            .column_names(VARIANTS)
            .unwrap()
            .contains(&DEPRECATED_AT.to_string()));
    }

    #[test]
    fn audit_seal_is_single_shot() {
        let store = MemoryStore::new();
        store.ensure_audit_table().unwrap();
        let record = AuditRecord::begin(
            BatchId::new(),
            Phase::Validate,
            "preconditions",
            EntityType::System,
            None,
            Utc::now(),
        );
        let id = store.insert_audit(&record).unwrap();
        store
            .seal_audit(id, &AuditSeal::completed(None, None, Utc::now(), 1))
            .unwrap();
        let err = store
            .seal_audit(id, &AuditSeal::failed("again", Utc::now(), 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::AuditSeal { .. }));

        let records = store.audit_records(Some(record.batch_id)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, Some(id));
        assert!(records[0].error_message.is_none());
    }
}
