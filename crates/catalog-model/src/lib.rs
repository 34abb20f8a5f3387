//! Catalog Model - typed records for the variant migration engine
//!
//! Defines everything the migration pipeline reads and writes, with no I/O:
//! - Product / variant records and the legacy attribute rows
//! - Strictly decoded JSON payloads (`VariantOptions`, `VariantConfig`,
//!   `ProductAttributes`)
//! - The per-entity migration state machine
//! - Audit records and their seal lifecycle
//! - Write plans handed to the store as one atomic unit
//!
//! # Example
//!
//! ```rust
//! use catalog_model::{LegacyOptionRow, OptionValue, VariantOptions};
//!
//! let existing = VariantOptions::parse(r#"{"color": "blue"}"#).unwrap();
//! let legacy = VariantOptions::from_legacy(&[LegacyOptionRow::variant(1, "Color", "color", "red")]);
//!
//! let merged = existing.merge_legacy(legacy);
//! assert_eq!(merged.get("color").and_then(OptionValue::value_text), Some("red"));
//! ```

#![warn(unreachable_pub)]

pub mod audit;
pub mod counts;
pub mod ids;
pub mod options;
pub mod payload;
pub mod plan;
pub mod pricing;
pub mod records;
pub mod state;
pub mod variant_config;

pub use audit::{AuditRecord, AuditSeal, EntityType, Phase};
pub use counts::CatalogCounts;
pub use ids::{AuditId, BatchId, ProductId, VariantId};
pub use options::{
    normalize_attribute_name, OptionDetail, OptionValue, ProductAttributes, ScalarValue,
    VariantOptions,
};
pub use payload::{JsonKind, PayloadError};
pub use plan::{ProductMigration, ProductStock, StockTrackingFix, VariantMigration};
pub use pricing::{effective_price, reconcile_override_price};
pub use records::{AttributePurpose, LegacyOptionRow, Product, Variant};
pub use state::{AuditStatus, MigrationState, StateError};
pub use variant_config::VariantConfig;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
