//! Catalog table definitions
//!
//! One description of every table drives both backends: the SQLite store
//! renders it to DDL, the memory store uses it for column defaults and
//! unique constraints.
//!
//! Storefront tables are defined without the migration-tracking columns.
//! Those are added by `ensure_tracking_columns`, the same way an existing
//! storefront database is prepared.

use serde_json::Value;

pub const PRODUCTS: &str = "products";
pub const VARIANTS: &str = "product_variants";
pub const ATTRIBUTES: &str = "attributes";
pub const ATTRIBUTE_VALUES: &str = "attribute_values";
pub const VARIANT_LINKS: &str = "variant_attribute_values";
pub const PRODUCT_LINKS: &str = "product_attribute_values";
pub const AUDIT_LOG: &str = "migration_audit_logs";

/// Column stamped by soft retirement
pub const DEPRECATED_AT: &str = "deprecated_at";

/// Legacy attribute graph, in safe drop order (links before targets)
pub const LEGACY_TABLES: [&str; 4] = [VARIANT_LINKS, PRODUCT_LINKS, ATTRIBUTE_VALUES, ATTRIBUTES];

/// Default value of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    /// Assigned by the store (`INTEGER PRIMARY KEY`)
    AutoId,
    Null,
    Int(i64),
    Bool(bool),
    Text(&'static str),
}

impl ColumnDefault {
    /// Value the memory store writes for an omitted column
    #[must_use]
    pub fn to_value(self) -> Value {
        match self {
            Self::AutoId | Self::Null => Value::Null,
            Self::Int(n) => Value::from(n),
            Self::Bool(b) => Value::Bool(b),
            Self::Text(s) => Value::from(s),
        }
    }
}

/// One column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    /// SQLite type and constraints
    pub decl: &'static str,
    pub default: ColumnDefault,
}

const fn col(name: &'static str, decl: &'static str, default: ColumnDefault) -> ColumnDef {
    ColumnDef {
        name,
        decl,
        default,
    }
}

/// One table
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub unique: &'static [&'static [&'static str]],
}

impl TableDef {
    /// `CREATE TABLE IF NOT EXISTS` statement
    #[must_use]
    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\" {}", c.name, c.decl))
            .collect();
        for unique in self.unique {
            parts.push(format!("UNIQUE ({})", unique.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n)",
            self.name,
            parts.join(",\n    ")
        )
    }
}

const ID: ColumnDef = col("id", "INTEGER PRIMARY KEY AUTOINCREMENT", ColumnDefault::AutoId);

pub const PRODUCTS_TABLE: TableDef = TableDef {
    name: PRODUCTS,
    columns: &[
        ID,
        col("name", "TEXT NOT NULL DEFAULT ''", ColumnDefault::Text("")),
        col("sku", "TEXT", ColumnDefault::Null),
        col("price", "INTEGER NOT NULL DEFAULT 0", ColumnDefault::Int(0)),
        col("has_variants", "INTEGER NOT NULL DEFAULT 0", ColumnDefault::Bool(false)),
        col("track_inventory", "INTEGER NOT NULL DEFAULT 1", ColumnDefault::Bool(true)),
        col("stock_quantity", "INTEGER NOT NULL DEFAULT 0", ColumnDefault::Int(0)),
    ],
    unique: &[],
};

pub const VARIANTS_TABLE: TableDef = TableDef {
    name: VARIANTS,
    columns: &[
        ID,
        col("product_id", "INTEGER NOT NULL", ColumnDefault::Null),
        col("name", "TEXT NOT NULL DEFAULT ''", ColumnDefault::Text("")),
        col("sku", "TEXT", ColumnDefault::Null),
        col("price", "INTEGER", ColumnDefault::Null),
        col("track_inventory", "INTEGER NOT NULL DEFAULT 1", ColumnDefault::Bool(true)),
        col("stock_quantity", "INTEGER NOT NULL DEFAULT 0", ColumnDefault::Int(0)),
        col("is_active", "INTEGER NOT NULL DEFAULT 1", ColumnDefault::Bool(true)),
    ],
    unique: &[],
};

pub const ATTRIBUTES_TABLE: TableDef = TableDef {
    name: ATTRIBUTES,
    columns: &[
        ID,
        col("name", "TEXT NOT NULL", ColumnDefault::Null),
        col("type", "TEXT NOT NULL DEFAULT 'select'", ColumnDefault::Text("select")),
        col("purpose", "TEXT NOT NULL DEFAULT 'variant'", ColumnDefault::Text("variant")),
    ],
    unique: &[],
};

pub const ATTRIBUTE_VALUES_TABLE: TableDef = TableDef {
    name: ATTRIBUTE_VALUES,
    columns: &[
        ID,
        col("attribute_id", "INTEGER NOT NULL", ColumnDefault::Null),
        col("value", "TEXT NOT NULL", ColumnDefault::Null),
        col("slug", "TEXT NOT NULL DEFAULT ''", ColumnDefault::Text("")),
        col("price_modifier", "INTEGER NOT NULL DEFAULT 0", ColumnDefault::Int(0)),
    ],
    unique: &[],
};

pub const VARIANT_LINKS_TABLE: TableDef = TableDef {
    name: VARIANT_LINKS,
    columns: &[
        ID,
        col("variant_id", "INTEGER NOT NULL", ColumnDefault::Null),
        col("attribute_id", "INTEGER NOT NULL", ColumnDefault::Null),
        col("attribute_value_id", "INTEGER NOT NULL", ColumnDefault::Null),
    ],
    unique: &[&["variant_id", "attribute_id"]],
};

pub const PRODUCT_LINKS_TABLE: TableDef = TableDef {
    name: PRODUCT_LINKS,
    columns: &[
        ID,
        col("product_id", "INTEGER NOT NULL", ColumnDefault::Null),
        col("attribute_id", "INTEGER NOT NULL", ColumnDefault::Null),
        col("attribute_value_id", "INTEGER NOT NULL", ColumnDefault::Null),
    ],
    unique: &[&["product_id", "attribute_id"]],
};

pub const AUDIT_TABLE: TableDef = TableDef {
    name: AUDIT_LOG,
    columns: &[
        ID,
        col("batch_id", "TEXT NOT NULL", ColumnDefault::Null),
        col("phase", "TEXT NOT NULL", ColumnDefault::Null),
        col("step", "TEXT NOT NULL", ColumnDefault::Null),
        col("entity_type", "TEXT NOT NULL", ColumnDefault::Null),
        col("entity_id", "INTEGER", ColumnDefault::Null),
        col("old_data", "TEXT", ColumnDefault::Null),
        col("new_data", "TEXT", ColumnDefault::Null),
        col("status", "TEXT NOT NULL", ColumnDefault::Null),
        col("error_message", "TEXT", ColumnDefault::Null),
        col("rollback_data", "TEXT", ColumnDefault::Null),
        col("started_at", "TEXT NOT NULL", ColumnDefault::Null),
        col("completed_at", "TEXT", ColumnDefault::Null),
        col("processing_time_ms", "INTEGER", ColumnDefault::Null),
    ],
    unique: &[],
};

/// Storefront and legacy tables, in creation order
pub const CATALOG_TABLES: [TableDef; 6] = [
    PRODUCTS_TABLE,
    VARIANTS_TABLE,
    ATTRIBUTES_TABLE,
    ATTRIBUTE_VALUES_TABLE,
    VARIANT_LINKS_TABLE,
    PRODUCT_LINKS_TABLE,
];

/// Columns the migration needs on top of the storefront schema
pub const TRACKING_COLUMNS: [(&str, ColumnDef); 6] = [
    (PRODUCTS, col("variant_config", "TEXT", ColumnDefault::Null)),
    (PRODUCTS, col("attributes", "TEXT", ColumnDefault::Null)),
    (
        PRODUCTS,
        col("migrated_to_json", "INTEGER NOT NULL DEFAULT 0", ColumnDefault::Bool(false)),
    ),
    (VARIANTS, col("options", "TEXT", ColumnDefault::Null)),
    (VARIANTS, col("override_price", "INTEGER", ColumnDefault::Null)),
    (
        VARIANTS,
        col("migrated_to_json", "INTEGER NOT NULL DEFAULT 0", ColumnDefault::Bool(false)),
    ),
];

/// Columns every component reads, per table (storefront and tracking)
#[must_use]
pub fn required_columns(table: &str) -> Vec<&'static str> {
    let base = CATALOG_TABLES
        .iter()
        .find(|t| t.name == table)
        .map(|t| t.columns.iter().map(|c| c.name).collect::<Vec<_>>())
        .unwrap_or_default();
    let tracking = TRACKING_COLUMNS
        .iter()
        .filter(|(t, _)| *t == table)
        .map(|(_, c)| c.name);
    base.into_iter().chain(tracking).collect()
}

/// Tracking columns of one table
#[must_use]
pub fn tracking_columns(table: &str) -> Vec<&'static str> {
    TRACKING_COLUMNS
        .iter()
        .filter(|(t, _)| *t == table)
        .map(|(_, c)| c.name)
        .collect()
}

/// Look up a table definition by name
#[must_use]
pub fn table_def(name: &str) -> Option<&'static TableDef> {
    CATALOG_TABLES
        .iter()
        .chain(std::iter::once(&AUDIT_TABLE))
        .find(|t| t.name == name)
}
