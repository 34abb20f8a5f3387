//! Catalog Migrate - staged migration of legacy variant attributes to JSON
//!
//! Moves a storefront catalog from the attribute/value link tables to JSON
//! columns on products and variants:
//! - Validates preconditions and repairs orphaned variants
//! - Backs up legacy tables with compensating rollback
//! - Migrates products in resumable keyset pages, continuing past failures
//! - Normalizes stock-tracking ownership
//! - Retires legacy tables (soft and reversible, or hard after a backup)
//! - Verifies the result and documents the JSON shapes in use
//!
//! Every mutating step is recorded in `migration_audit_logs` under one batch
//! id. A dry run reads everything and writes nothing.
//!
//! # Example
//!
//! ```rust,ignore
//! use catalog_migrate::{MigrationConfig, Pipeline, PipelineOptions};
//! use catalog_store::SqliteStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open("storefront.db".as_ref())?);
//! let opts = PipelineOptions::from(&MigrationConfig::new()).with_dry_run(true);
//!
//! let report = Pipeline::new(store).run(&opts);
//! println!("pending variants: {:?}", report.validation.and_then(|v| v.stats));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod audit;
pub mod backup;
pub mod config;
pub mod document;
pub mod error;
pub mod executor;
pub mod findings;
pub mod pipeline;
pub mod precondition;
pub mod report;
pub mod retirement;
pub mod stock;
pub mod verify;

pub use audit::{AuditEntry, AuditRecorder};
pub use backup::{backup_name, BackupEntry, BackupManager, BackupReport, SkipReason};
pub use config::MigrationConfig;
pub use document::{document, DocFormat, KeyUsage, VariantConfigDoc};
pub use error::{
    BackupError, ConfigError, DestructiveOperationError, EntityError, MigrationError,
    PreconditionError, Result,
};
pub use executor::{plan_attributes, plan_variant, MigrationExecutor, MigrationSummary};
pub use findings::{CatalogStats, Finding, FindingCode};
pub use pipeline::{Pipeline, PipelineOptions, PipelineReport};
pub use precondition::{OrphanRepair, PreconditionValidator, ValidationMode, ValidationReport};
pub use report::export_json;
pub use retirement::{LegacyRetirement, RetirementAction, RetirementMode, RetirementReport};
pub use stock::{plan_stock_fix, NormalizeSummary, StockNormalizer};
pub use verify::{PostMigrationValidator, VerifyOptions, VerifyReport};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
