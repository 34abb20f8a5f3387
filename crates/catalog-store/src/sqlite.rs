//! SQLite backend
//!
//! One connection behind a mutex. Every write plan runs in its own
//! transaction; a dropped transaction rolls back.

use crate::error::{Result, StoreError};
use crate::schema::{
    self, AUDIT_LOG, AUDIT_TABLE, CATALOG_TABLES, DEPRECATED_AT, PRODUCTS, PRODUCT_LINKS,
    TRACKING_COLUMNS, VARIANTS, VARIANT_LINKS,
};
use crate::{validate_identifier, CatalogStore, DuplicateSku, ProductScope, Row, RowSink};
use catalog_model::{
    AttributePurpose, AuditId, AuditRecord, AuditSeal, AuditStatus, BatchId, CatalogCounts,
    EntityType, LegacyOptionRow, Phase, Product, ProductId, ProductMigration, StockTrackingFix,
    Variant, VariantId,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

const PRODUCT_COLUMNS: &str = "id, name, sku, price, has_variants, variant_config, attributes, \
     migrated_to_json, track_inventory, stock_quantity";

const VARIANT_COLUMNS: &str = "id, product_id, name, sku, price, override_price, options, \
     migrated_to_json, track_inventory, stock_quantity, is_active";

const AUDIT_COLUMNS: &str = "id, batch_id, phase, step, entity_type, entity_id, old_data, \
     new_data, status, error_message, rollback_data, started_at, completed_at, processing_time_ms";

/// SQLite-backed catalog store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) a database file
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened catalog database");
        Ok(Self::from_connection(conn))
    }

    /// Open a database file that must already exist
    ///
    /// A read-only store rejects every write at the SQLite level.
    ///
    /// # Errors
    /// Returns an error if the file is missing or cannot be opened.
    pub fn open_existing(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let access = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let conn = Connection::open_with_flags(
            path,
            access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!(path = %path.display(), read_only, "opened existing catalog database");
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wrap an existing connection
    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Create the storefront and legacy tables without tracking columns
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub fn create_storefront_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        for table in &CATALOG_TABLES {
            conn.execute_batch(&table.create_sql())?;
        }
        Ok(())
    }

    /// Create the full catalog schema, tracking columns included
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub fn create_catalog_schema(&self) -> Result<()> {
        self.create_storefront_schema()?;
        self.ensure_tracking_columns()?;
        Ok(())
    }

    /// Run raw SQL, used by fixtures
    ///
    /// # Errors
    /// Returns an error if the batch fails.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

fn quoted(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{name}\""))
}

fn exists(conn: &Connection, table: &str) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn require(conn: &Connection, table: &str) -> Result<String> {
    let q = quoted(table)?;
    if exists(conn, table)? {
        Ok(q)
    } else {
        Err(StoreError::TableNotFound(table.to_string()))
    }
}

fn columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let q = quoted(table)?;
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({q})"))?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn count(conn: &Connection, sql: &str) -> Result<u64> {
    let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
    Ok(u64::try_from(n).unwrap_or(0))
}

fn count_if_exists(conn: &Connection, table: &str) -> Result<u64> {
    if exists(conn, table)? {
        count(conn, &format!("SELECT COUNT(*) FROM {}", quoted(table)?))
    } else {
        Ok(0)
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn product_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: ProductId(r.get(0)?),
        name: r.get(1)?,
        sku: r.get(2)?,
        price: r.get(3)?,
        has_variants: r.get(4)?,
        variant_config: r.get(5)?,
        attributes: r.get(6)?,
        migrated_to_json: r.get(7)?,
        track_inventory: r.get(8)?,
        stock_quantity: r.get(9)?,
    })
}

fn variant_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Variant> {
    Ok(Variant {
        id: VariantId(r.get(0)?),
        product_id: ProductId(r.get(1)?),
        name: r.get(2)?,
        sku: r.get(3)?,
        price: r.get(4)?,
        override_price: r.get(5)?,
        options: r.get(6)?,
        migrated_to_json: r.get(7)?,
        track_inventory: r.get(8)?,
        stock_quantity: r.get(9)?,
        is_active: r.get(10)?,
    })
}

/// Legacy row before the purpose column is decoded
struct RawOption {
    attribute_id: i64,
    attribute_name: String,
    attribute_type: String,
    purpose: String,
    value: String,
    slug: String,
    price_modifier: i64,
}

impl RawOption {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            attribute_id: r.get(0)?,
            attribute_name: r.get(1)?,
            attribute_type: r.get(2)?,
            purpose: r.get(3)?,
            value: r.get(4)?,
            slug: r.get(5)?,
            price_modifier: r.get(6)?,
        })
    }

    fn decode(self) -> Result<LegacyOptionRow> {
        let purpose: AttributePurpose = self
            .purpose
            .parse()
            .map_err(|e| StoreError::decode(schema::ATTRIBUTES, e))?;
        Ok(LegacyOptionRow {
            attribute_id: self.attribute_id,
            attribute_name: self.attribute_name,
            attribute_type: self.attribute_type,
            purpose,
            value: self.value,
            slug: self.slug,
            price_modifier: self.price_modifier,
        })
    }
}

fn legacy_rows(
    conn: &Connection,
    link_table: &str,
    owner_column: &str,
    owner: i64,
) -> Result<Vec<LegacyOptionRow>> {
    for table in [link_table, schema::ATTRIBUTES, schema::ATTRIBUTE_VALUES] {
        if !exists(conn, table)? {
            return Ok(Vec::new());
        }
    }
    let sql = format!(
        "SELECT a.id, a.name, a.type, a.purpose, av.value, av.slug, av.price_modifier
         FROM {} l
         JOIN attributes a ON a.id = l.attribute_id
         JOIN attribute_values av ON av.id = l.attribute_value_id
         WHERE l.{} = ?1
         ORDER BY a.id",
        quoted(link_table)?,
        quoted(owner_column)?,
    );
    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map(params![owner], RawOption::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(RawOption::decode).collect()
}

/// Audit row before text columns are decoded
struct RawAudit {
    id: i64,
    batch_id: String,
    phase: String,
    step: String,
    entity_type: String,
    entity_id: Option<i64>,
    old_data: Option<String>,
    new_data: Option<String>,
    status: String,
    error_message: Option<String>,
    rollback_data: Option<String>,
    started_at: String,
    completed_at: Option<String>,
    processing_time_ms: Option<i64>,
}

impl RawAudit {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            batch_id: r.get(1)?,
            phase: r.get(2)?,
            step: r.get(3)?,
            entity_type: r.get(4)?,
            entity_id: r.get(5)?,
            old_data: r.get(6)?,
            new_data: r.get(7)?,
            status: r.get(8)?,
            error_message: r.get(9)?,
            rollback_data: r.get(10)?,
            started_at: r.get(11)?,
            completed_at: r.get(12)?,
            processing_time_ms: r.get(13)?,
        })
    }

    fn decode(self) -> Result<AuditRecord> {
        let bad = |e: &dyn std::fmt::Display| StoreError::decode(AUDIT_LOG, e);
        Ok(AuditRecord {
            id: Some(AuditId(self.id)),
            batch_id: self.batch_id.parse::<BatchId>().map_err(|e| bad(&e))?,
            phase: self.phase.parse::<Phase>().map_err(|e| bad(&e))?,
            step: self.step,
            entity_type: self.entity_type.parse::<EntityType>().map_err(|e| bad(&e))?,
            entity_id: self.entity_id,
            old_data: decode_json(self.old_data)?,
            new_data: decode_json(self.new_data)?,
            status: self.status.parse::<AuditStatus>().map_err(|e| bad(&e))?,
            error_message: self.error_message,
            rollback_data: decode_json(self.rollback_data)?,
            started_at: decode_time(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(decode_time).transpose()?,
            processing_time_ms: self.processing_time_ms.and_then(|ms| u64::try_from(ms).ok()),
        })
    }
}

fn encode_json(value: Option<&serde_json::Value>) -> Option<String> {
    value.map(serde_json::Value::to_string)
}

fn decode_json(text: Option<String>) -> Result<Option<serde_json::Value>> {
    text.map(|t| serde_json::from_str(&t).map_err(|e| StoreError::decode(AUDIT_LOG, e)))
        .transpose()
}

fn decode_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::decode(AUDIT_LOG, e))
}

fn to_sql_value(value: &serde_json::Value) -> SqlValue {
    use serde_json::Value;
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map_or_else(|| SqlValue::Real(n.as_f64().unwrap_or_default()), SqlValue::Integer),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn ms(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl CatalogStore for SqliteStore {
    fn table_exists(&self, table: &str) -> Result<bool> {
        validate_identifier(table)?;
        exists(&self.conn.lock(), table)
    }

    fn column_names(&self, table: &str) -> Result<Vec<String>> {
        columns(&self.conn.lock(), table)
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn row_count(&self, table: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let q = require(&conn, table)?;
        count(&conn, &format!("SELECT COUNT(*) FROM {q}"))
    }

    fn ensure_tracking_columns(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut added = Vec::new();
        for (table, column) in &TRACKING_COLUMNS {
            if !exists(&tx, table)? {
                continue;
            }
            if columns(&tx, table)?.iter().any(|c| c == column.name) {
                continue;
            }
            tx.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN \"{}\" {}",
                quoted(table)?,
                column.name,
                column.decl
            ))?;
            added.push(format!("{table}.{}", column.name));
        }
        tx.commit()?;
        if !added.is_empty() {
            info!(columns = ?added, "added tracking columns");
        }
        Ok(added)
    }

    fn ensure_audit_table(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&AUDIT_TABLE.create_sql())?;
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_migration_audit_logs_batch
             ON migration_audit_logs (batch_id, phase)",
        )?;
        Ok(())
    }

    fn copy_table(&self, source: &str, target: &str) -> Result<u64> {
        let mut conn = self.conn.lock();
        let source_q = require(&conn, source)?;
        let target_q = quoted(target)?;
        if exists(&conn, target)? {
            return Err(StoreError::TableExists(target.to_string()));
        }

        let ddl: String = conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![source],
            |r| r.get(0),
        )?;
        let body = ddl
            .find('(')
            .map(|i| &ddl[i..])
            .ok_or_else(|| StoreError::decode(source, "table definition has no column list"))?;

        let tx = conn.transaction()?;
        tx.execute_batch(&format!("CREATE TABLE {target_q} {body}"))?;
        let copied = tx.execute(&format!("INSERT INTO {target_q} SELECT * FROM {source_q}"), [])?;
        tx.commit()?;

        debug!(source, target, rows = copied, "copied table");
        Ok(copied as u64)
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        let conn = self.conn.lock();
        let q = require(&conn, table)?;
        conn.execute_batch(&format!("DROP TABLE {q}"))?;
        debug!(table, "dropped table");
        Ok(())
    }

    fn stamp_deprecated(&self, table: &str, at: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.conn.lock();
        let q = require(&conn, table)?;
        let has_column = columns(&conn, table)?.iter().any(|c| c == DEPRECATED_AT);

        let tx = conn.transaction()?;
        if !has_column {
            tx.execute_batch(&format!("ALTER TABLE {q} ADD COLUMN \"{DEPRECATED_AT}\" TEXT"))?;
        }
        let stamped = tx.execute(
            &format!("UPDATE {q} SET \"{DEPRECATED_AT}\" = ?1 WHERE \"{DEPRECATED_AT}\" IS NULL"),
            params![at.to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(stamped as u64)
    }

    fn clear_deprecated(&self, table: &str) -> Result<u64> {
        let mut conn = self.conn.lock();
        let q = require(&conn, table)?;
        if !columns(&conn, table)?.iter().any(|c| c == DEPRECATED_AT) {
            return Ok(0);
        }

        let tx = conn.transaction()?;
        let stamped = count(
            &tx,
            &format!("SELECT COUNT(*) FROM {q} WHERE \"{DEPRECATED_AT}\" IS NOT NULL"),
        )?;
        tx.execute_batch(&format!("ALTER TABLE {q} DROP COLUMN \"{DEPRECATED_AT}\""))?;
        tx.commit()?;
        Ok(stamped)
    }

    fn products_after(
        &self,
        after: Option<ProductId>,
        limit: usize,
        scope: ProductScope,
    ) -> Result<Vec<Product>> {
        let filter = match scope {
            ProductScope::All => "",
            ProductScope::PendingMigration => " AND has_variants = 1 AND migrated_to_json = 0",
            ProductScope::Migrated => " AND has_variants = 1 AND migrated_to_json = 1",
        };
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id > ?1{filter} ORDER BY id LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(
                params![after.map_or(i64::MIN, |p| p.0), sql_limit(limit)],
                product_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn variants_after(&self, after: Option<VariantId>, limit: usize) -> Result<Vec<Variant>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(
                params![after.map_or(i64::MIN, |v| v.0), sql_limit(limit)],
                variant_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn product(&self, id: ProductId) -> Result<Option<Product>> {
        let conn = self.conn.lock();
        let product = conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
                params![id.0],
                product_from_row,
            )
            .optional()?;
        Ok(product)
    }

    fn variants_of(&self, product: ProductId) -> Result<Vec<Variant>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants WHERE product_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![product.0], variant_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn legacy_variant_options(&self, variant: VariantId) -> Result<Vec<LegacyOptionRow>> {
        legacy_rows(&self.conn.lock(), VARIANT_LINKS, "variant_id", variant.0)
    }

    fn legacy_product_attributes(&self, product: ProductId) -> Result<Vec<LegacyOptionRow>> {
        legacy_rows(&self.conn.lock(), PRODUCT_LINKS, "product_id", product.0)
    }

    fn orphaned_variants(&self) -> Result<Vec<VariantId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT v.id FROM product_variants v
             LEFT JOIN products p ON p.id = v.product_id
             WHERE p.id IS NULL
             ORDER BY v.id",
        )?;
        let ids = stmt
            .query_map([], |r| r.get(0).map(VariantId))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn duplicate_skus(&self) -> Result<Vec<DuplicateSku>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT sku, id FROM product_variants
             WHERE sku IN (
                 SELECT sku FROM product_variants
                 WHERE sku IS NOT NULL AND sku <> ''
                 GROUP BY sku HAVING COUNT(*) > 1
             )
             ORDER BY sku, id",
        )?;
        let pairs = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, VariantId(r.get(1)?))))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out: Vec<DuplicateSku> = Vec::new();
        for (sku, id) in pairs {
            match out.last_mut() {
                Some(last) if last.sku == sku => last.variant_ids.push(id),
                _ => out.push(DuplicateSku {
                    sku,
                    variant_ids: vec![id],
                }),
            }
        }
        Ok(out)
    }

    fn catalog_counts(&self) -> Result<CatalogCounts> {
        let conn = self.conn.lock();
        Ok(CatalogCounts {
            total_products: count(&conn, "SELECT COUNT(*) FROM products")?,
            products_with_variants: count(
                &conn,
                "SELECT COUNT(*) FROM products WHERE has_variants = 1",
            )?,
            migrated_products: count(
                &conn,
                "SELECT COUNT(*) FROM products WHERE has_variants = 1 AND migrated_to_json = 1",
            )?,
            total_variants: count(&conn, "SELECT COUNT(*) FROM product_variants")?,
            migrated_variants: count(
                &conn,
                "SELECT COUNT(*) FROM product_variants WHERE migrated_to_json = 1",
            )?,
            variants_with_options: count(
                &conn,
                "SELECT COUNT(*) FROM product_variants
                 WHERE options IS NOT NULL AND TRIM(options) <> ''",
            )?,
            variants_with_override_price: count(
                &conn,
                "SELECT COUNT(*) FROM product_variants WHERE override_price IS NOT NULL",
            )?,
            legacy_variant_links: count_if_exists(&conn, VARIANT_LINKS)?,
            legacy_product_links: count_if_exists(&conn, PRODUCT_LINKS)?,
            products_with_non_positive_price: count(
                &conn,
                "SELECT COUNT(*) FROM products WHERE price <= 0",
            )?,
            variants_with_non_positive_price: count(
                &conn,
                "SELECT COUNT(*) FROM product_variants WHERE price IS NOT NULL AND price <= 0",
            )?,
            products_flagged_without_variants: count(
                &conn,
                "SELECT COUNT(*) FROM products p WHERE p.has_variants = 1
                 AND NOT EXISTS (SELECT 1 FROM product_variants v WHERE v.product_id = p.id)",
            )?,
            products_unflagged_with_variants: count(
                &conn,
                "SELECT COUNT(*) FROM products p WHERE p.has_variants = 0
                 AND EXISTS (SELECT 1 FROM product_variants v WHERE v.product_id = p.id)",
            )?,
        })
    }

    fn apply_migration(&self, plan: &ProductMigration) -> Result<()> {
        let config = plan.variant_config.to_json_string()?;
        let attributes = plan
            .attributes
            .as_ref()
            .map(catalog_model::ProductAttributes::to_json_string)
            .transpose()?;
        let variants = plan
            .variants
            .iter()
            .map(|v| Ok((v.variant_id, v.options.to_json_string()?, v.override_price)))
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE products SET variant_config = ?1, migrated_to_json = 1 WHERE id = ?2",
            params![config, plan.product_id.0],
        )?;
        if updated != 1 {
            return Err(StoreError::row_not_found(PRODUCTS, plan.product_id.0));
        }
        if let Some(attributes) = attributes {
            tx.execute(
                "UPDATE products SET attributes = ?1 WHERE id = ?2",
                params![attributes, plan.product_id.0],
            )?;
        }

        for (variant_id, options, override_price) in variants {
            let updated = tx.execute(
                "UPDATE product_variants
                 SET options = ?1, override_price = ?2, migrated_to_json = 1
                 WHERE id = ?3 AND product_id = ?4",
                params![options, override_price, variant_id.0, plan.product_id.0],
            )?;
            if updated != 1 {
                return Err(StoreError::row_not_found(VARIANTS, variant_id.0));
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn apply_stock_fix(&self, fix: &StockTrackingFix) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if let Some(stock) = fix.product {
            let updated = match stock.stock_quantity {
                Some(quantity) => tx.execute(
                    "UPDATE products SET track_inventory = ?1, stock_quantity = ?2 WHERE id = ?3",
                    params![stock.track_inventory, quantity, fix.product_id.0],
                )?,
                None => tx.execute(
                    "UPDATE products SET track_inventory = ?1 WHERE id = ?2",
                    params![stock.track_inventory, fix.product_id.0],
                )?,
            };
            if updated != 1 {
                return Err(StoreError::row_not_found(PRODUCTS, fix.product_id.0));
            }
        }

        for variant in &fix.variants_to_track {
            let updated = tx.execute(
                "UPDATE product_variants SET track_inventory = 1 WHERE id = ?1 AND product_id = ?2",
                params![variant.0, fix.product_id.0],
            )?;
            if updated != 1 {
                return Err(StoreError::row_not_found(VARIANTS, variant.0));
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_variants(&self, ids: &[VariantId]) -> Result<u64> {
        let mut conn = self.conn.lock();
        let links = exists(&conn, VARIANT_LINKS)?;
        let tx = conn.transaction()?;
        let mut deleted = 0u64;
        for id in ids {
            if links {
                tx.execute(
                    "DELETE FROM variant_attribute_values WHERE variant_id = ?1",
                    params![id.0],
                )?;
            }
            deleted +=
                tx.execute("DELETE FROM product_variants WHERE id = ?1", params![id.0])? as u64;
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn insert_audit(&self, record: &AuditRecord) -> Result<AuditId> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO migration_audit_logs (
                 batch_id, phase, step, entity_type, entity_id, old_data, new_data,
                 status, error_message, rollback_data, started_at, completed_at,
                 processing_time_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.batch_id.to_string(),
                record.phase.as_str(),
                record.step,
                record.entity_type.as_str(),
                record.entity_id,
                encode_json(record.old_data.as_ref()),
                encode_json(record.new_data.as_ref()),
                record.status.as_str(),
                record.error_message,
                encode_json(record.rollback_data.as_ref()),
                record.started_at.to_rfc3339(),
                record.completed_at.map(|t| t.to_rfc3339()),
                record.processing_time_ms.map(ms),
            ],
        )?;
        Ok(AuditId(conn.last_insert_rowid()))
    }

    fn seal_audit(&self, id: AuditId, seal: &AuditSeal) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let current: String = tx
            .query_row(
                "SELECT status FROM migration_audit_logs WHERE id = ?1",
                params![id.0],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::row_not_found(AUDIT_LOG, id.0))?;
        let current: AuditStatus = current
            .parse()
            .map_err(|e| StoreError::decode(AUDIT_LOG, e))?;

        check_seal(current, seal).map_err(|source| StoreError::AuditSeal { id, source })?;

        tx.execute(
            "UPDATE migration_audit_logs
             SET status = ?1, new_data = ?2, error_message = ?3, rollback_data = ?4,
                 completed_at = ?5, processing_time_ms = ?6
             WHERE id = ?7 AND status = ?8",
            params![
                seal.status.as_str(),
                encode_json(seal.new_data.as_ref()),
                seal.error_message,
                encode_json(seal.rollback_data.as_ref()),
                seal.completed_at.to_rfc3339(),
                ms(seal.processing_time_ms),
                id.0,
                current.as_str(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn audit_records(&self, batch: Option<BatchId>) -> Result<Vec<AuditRecord>> {
        let conn = self.conn.lock();
        if !exists(&conn, AUDIT_LOG)? {
            return Ok(Vec::new());
        }
        let raw = match batch {
            Some(batch) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {AUDIT_COLUMNS} FROM migration_audit_logs WHERE batch_id = ?1 ORDER BY id"
                ))?;
                let rows = stmt
                    .query_map(params![batch.to_string()], RawAudit::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {AUDIT_COLUMNS} FROM migration_audit_logs ORDER BY id"
                ))?;
                let rows = stmt
                    .query_map([], RawAudit::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        raw.into_iter().map(RawAudit::decode).collect()
    }
}

/// Validate a seal against the current status of a record
fn check_seal(
    current: AuditStatus,
    seal: &AuditSeal,
) -> std::result::Result<(), catalog_model::StateError> {
    current.validate_transition(seal.status)?;
    if seal.status.is_sealed() {
        Ok(())
    } else {
        Err(catalog_model::StateError::IllegalTransition {
            from: current.as_str(),
            to: seal.status.as_str(),
        })
    }
}

impl RowSink for SqliteStore {
    fn insert_row(&self, table: &str, row: &Row) -> Result<i64> {
        let conn = self.conn.lock();
        let q = require(&conn, table)?;
        let known = columns(&conn, table)?;

        let mut names = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (column, value) in row {
            if !known.iter().any(|c| c == column) {
                return Err(StoreError::UnknownColumn {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
            names.push(quoted(column)?);
            values.push(to_sql_value(value));
        }

        let placeholders = (1..=values.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = if names.is_empty() {
            format!("INSERT INTO {q} DEFAULT VALUES")
        } else {
            format!("INSERT INTO {q} ({}) VALUES ({placeholders})", names.join(", "))
        };
        conn.execute(&sql, params_from_iter(values.iter()))
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    StoreError::UniqueViolation {
                        table: table.to_string(),
                        columns: names.join(", "),
                    }
                }
                other => StoreError::Sqlite(other),
            })?;
        Ok(conn.last_insert_rowid())
    }
}
