//! Catalog Store - storage interface for the variant migration engine
//!
//! Every component of the migration pipeline talks to the catalog through
//! [`CatalogStore`]. Two backends are provided:
//! - [`SqliteStore`]: a real database file, one transaction per write plan
//! - [`MemoryStore`]: an in-process catalog with fault injection, used by
//!   tests
//!
//! Table names that come from outside the crate (backup targets, retirement
//! lists) are checked with [`validate_identifier`] before they reach SQL.

#![warn(unreachable_pub)]

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use memory::{MemorySnapshot, MemoryStore};
pub use sqlite::SqliteStore;

use catalog_model::{
    AuditId, AuditRecord, AuditSeal, BatchId, CatalogCounts, LegacyOptionRow, Product,
    ProductId, ProductMigration, StockTrackingFix, Variant, VariantId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Untyped row used for fixtures and generic table access
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Which products a page read returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductScope {
    All,
    /// `has_variants=true` and not yet migrated
    PendingMigration,
    /// `has_variants=true` and migrated
    Migrated,
}

/// A SKU shared by more than one variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateSku {
    pub sku: String,
    pub variant_ids: Vec<VariantId>,
}

/// Storage interface used by every migration component
///
/// Implementations must apply each write plan atomically: either every row
/// of the plan is written or none is.
pub trait CatalogStore: Send + Sync + std::fmt::Debug {
    // ------------------------------------------------------------------
    // Introspection and DDL
    // ------------------------------------------------------------------

    /// True if the table exists
    fn table_exists(&self, table: &str) -> Result<bool>;

    /// Column names of a table, empty when it does not exist
    fn column_names(&self, table: &str) -> Result<Vec<String>>;

    /// All user tables, sorted by name
    fn table_names(&self) -> Result<Vec<String>>;

    /// Number of rows in a table
    fn row_count(&self, table: &str) -> Result<u64>;

    /// Add any missing tracking columns; returns `table.column` for each added
    fn ensure_tracking_columns(&self) -> Result<Vec<String>>;

    /// Create the audit table if missing
    fn ensure_audit_table(&self) -> Result<()>;

    /// Create `target` with the structure of `source` and copy every row
    fn copy_table(&self, source: &str, target: &str) -> Result<u64>;

    /// Drop a table
    fn drop_table(&self, table: &str) -> Result<()>;

    /// Add `deprecated_at` if missing and stamp every unstamped row
    fn stamp_deprecated(&self, table: &str, at: DateTime<Utc>) -> Result<u64>;

    /// Remove the `deprecated_at` column; returns the number of rows that
    /// carried a stamp
    fn clear_deprecated(&self, table: &str) -> Result<u64>;

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Products with id greater than `after`, ascending, at most `limit`
    fn products_after(
        &self,
        after: Option<ProductId>,
        limit: usize,
        scope: ProductScope,
    ) -> Result<Vec<Product>>;

    /// Variants with id greater than `after`, ascending, at most `limit`
    fn variants_after(&self, after: Option<VariantId>, limit: usize) -> Result<Vec<Variant>>;

    /// One product
    fn product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Variants owned by a product, ascending id
    fn variants_of(&self, product: ProductId) -> Result<Vec<Variant>>;

    /// Legacy option rows linked to a variant, ascending attribute id;
    /// empty when the legacy tables are gone
    fn legacy_variant_options(&self, variant: VariantId) -> Result<Vec<LegacyOptionRow>>;

    /// Legacy attribute rows linked to a product, ascending attribute id;
    /// empty when the legacy tables are gone
    fn legacy_product_attributes(&self, product: ProductId) -> Result<Vec<LegacyOptionRow>>;

    /// Variants whose owning product does not exist
    fn orphaned_variants(&self) -> Result<Vec<VariantId>>;

    /// Non-empty SKUs shared by several variants
    fn duplicate_skus(&self) -> Result<Vec<DuplicateSku>>;

    /// Aggregate counts over the whole catalog
    fn catalog_counts(&self) -> Result<CatalogCounts>;

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write one product migration atomically
    fn apply_migration(&self, plan: &ProductMigration) -> Result<()>;

    /// Write one stock-tracking fix atomically
    fn apply_stock_fix(&self, fix: &StockTrackingFix) -> Result<()>;

    /// Delete variants and their legacy links; returns variants deleted
    fn delete_variants(&self, ids: &[VariantId]) -> Result<u64>;

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    /// Insert an open record
    fn insert_audit(&self, record: &AuditRecord) -> Result<AuditId>;

    /// Seal an open record; sealing twice is an error
    fn seal_audit(&self, id: AuditId, seal: &AuditSeal) -> Result<()>;

    /// Records of one batch (or all), ascending id; empty when the audit
    /// table does not exist
    fn audit_records(&self, batch: Option<BatchId>) -> Result<Vec<AuditRecord>>;
}

/// Raw row insertion, used to seed catalogs
pub trait RowSink {
    /// Insert a row and return its id (0 for tables without one)
    fn insert_row(&self, table: &str, row: &Row) -> Result<i64>;
}

/// Check that a table or column name is a plain identifier
///
/// # Errors
/// `InvalidIdentifier` if the name is empty, longer than 64 characters, or
/// contains anything other than ASCII letters, digits and `_`.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                && name.len() <= 64
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
