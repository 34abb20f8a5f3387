//! Precondition Validator
//!
//! Reads the catalog and reports whether a stage may run. Fatal findings
//! (`errors`) and advisory ones (`warnings`) are kept apart; callers abort
//! only on fatal findings.
//!
//! Two modes:
//! - `BeforeMigration`: completion ratios are reported, not enforced
//! - `Completion`: both ratios must be 1.0 (gate for hard retirement)

use crate::audit::AuditRecorder;
use crate::error::PreconditionError;
use crate::findings::{CatalogStats, Finding, FindingCode};
use catalog_model::{EntityType, Phase, VariantId};
use catalog_store::schema::{self, LEGACY_TABLES, PRODUCTS, VARIANTS};
use catalog_store::{CatalogStore, StoreError};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// What the validator gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Before data migration
    BeforeMigration,
    /// Before irreversible retirement: everything must be migrated
    Completion,
}

/// Validator output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub mode: ValidationMode,
    pub ok: bool,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    /// Absent when the schema was too damaged to count
    pub stats: Option<CatalogStats>,
}

impl ValidationReport {
    fn finish(
        mode: ValidationMode,
        errors: Vec<Finding>,
        warnings: Vec<Finding>,
        stats: Option<CatalogStats>,
    ) -> Self {
        Self {
            mode,
            ok: errors.is_empty(),
            errors,
            warnings,
            stats,
        }
    }

    /// Turn fatal findings into an error
    ///
    /// # Errors
    /// `PreconditionError::Findings` if the report is not ok.
    pub fn into_result(self) -> Result<Self, PreconditionError> {
        if self.ok {
            Ok(self)
        } else {
            Err(PreconditionError::Findings(self.errors))
        }
    }
}

/// Outcome of orphan repair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanRepair {
    pub dry_run: bool,
    pub found: Vec<VariantId>,
    pub deleted: u64,
}

/// Precondition Validator
#[derive(Clone)]
pub struct PreconditionValidator {
    store: Arc<dyn CatalogStore>,
}

impl std::fmt::Debug for PreconditionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreconditionValidator").finish_non_exhaustive()
    }
}

impl PreconditionValidator {
    /// Create a validator over a store
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Run every check for `mode`
    ///
    /// # Errors
    /// Returns an error only if the store cannot be read; catalog problems
    /// are reported as findings.
    pub fn validate(&self, mode: ValidationMode) -> Result<ValidationReport, StoreError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // Schema first; the data checks need every column.
        for table in [PRODUCTS, VARIANTS] {
            if !self.store.table_exists(table)? {
                errors.push(Finding::new(
                    FindingCode::MissingTable,
                    format!("required table {table} does not exist"),
                ));
                continue;
            }
            let present = self.store.column_names(table)?;
            let tracking = schema::tracking_columns(table);
            for column in schema::required_columns(table) {
                if present.iter().any(|c| c == column) {
                    continue;
                }
                if tracking.contains(&column) {
                    errors.push(Finding::new(
                        FindingCode::MissingTrackingColumn,
                        format!("{table}.{column} is missing; prepare the schema before migrating"),
                    ));
                } else {
                    errors.push(Finding::new(
                        FindingCode::MissingColumn,
                        format!("required column {table}.{column} does not exist"),
                    ));
                }
            }
        }
        if !errors.is_empty() {
            warn!(?mode, errors = errors.len(), "schema not ready");
            return Ok(ValidationReport::finish(mode, errors, warnings, None));
        }

        let counts = self.store.catalog_counts()?;
        let stats = CatalogStats::from(counts);

        if mode == ValidationMode::Completion {
            if stats.product_completion < 1.0 {
                errors.push(Finding::new(
                    FindingCode::IncompleteMigration,
                    format!(
                        "{} of {} products with variants migrated",
                        counts.migrated_products, counts.products_with_variants
                    ),
                ));
            }
            if stats.variant_completion < 1.0 {
                errors.push(Finding::new(
                    FindingCode::IncompleteMigration,
                    format!(
                        "{} of {} variants migrated",
                        counts.migrated_variants, counts.total_variants
                    ),
                ));
            }
        }

        let orphans = self.store.orphaned_variants()?;
        if !orphans.is_empty() {
            errors.push(
                Finding::new(
                    FindingCode::OrphanedVariants,
                    format!("{} variants reference a missing product", orphans.len()),
                )
                .with_entities(orphans.iter().map(|v| v.0).collect()),
            );
        }

        for dup in self.store.duplicate_skus()? {
            errors.push(
                Finding::new(
                    FindingCode::DuplicateSku,
                    format!("sku {:?} is shared by {} variants", dup.sku, dup.variant_ids.len()),
                )
                .with_entities(dup.variant_ids.iter().map(|v| v.0).collect()),
            );
        }

        if counts.products_with_non_positive_price > 0 {
            warnings.push(Finding::new(
                FindingCode::NonPositivePrice,
                format!("{} products have price <= 0", counts.products_with_non_positive_price),
            ));
        }
        if counts.variants_with_non_positive_price > 0 {
            warnings.push(Finding::new(
                FindingCode::NonPositivePrice,
                format!("{} variants have price <= 0", counts.variants_with_non_positive_price),
            ));
        }
        if counts.products_flagged_without_variants > 0 {
            warnings.push(Finding::new(
                FindingCode::VariantFlagMismatch,
                format!(
                    "{} products have has_variants set but own no variants",
                    counts.products_flagged_without_variants
                ),
            ));
        }
        if counts.products_unflagged_with_variants > 0 {
            warnings.push(Finding::new(
                FindingCode::VariantFlagMismatch,
                format!(
                    "{} products own variants but have has_variants unset",
                    counts.products_unflagged_with_variants
                ),
            ));
        }

        if mode == ValidationMode::BeforeMigration {
            let mut missing = Vec::new();
            for table in LEGACY_TABLES {
                if !self.store.table_exists(table)? {
                    missing.push(table);
                }
            }
            if !missing.is_empty() {
                warnings.push(Finding::new(
                    FindingCode::LegacyTablesMissing,
                    format!(
                        "legacy tables absent: {}; options fall back to name and sku",
                        missing.join(", ")
                    ),
                ));
            }
        }

        let report = ValidationReport::finish(mode, errors, warnings, Some(stats));
        info!(
            ?mode,
            ok = report.ok,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            pending_variants = stats.pending_variants,
            "preconditions checked"
        );
        Ok(report)
    }

    /// Delete variants whose product no longer exists
    ///
    /// All orphans and their legacy links go in one write; each variant gets
    /// its own audit record.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or the delete fails.
    pub fn fix_orphans(
        &self,
        recorder: &AuditRecorder,
        dry_run: bool,
    ) -> Result<OrphanRepair, StoreError> {
        let found = self.store.orphaned_variants()?;
        if dry_run || found.is_empty() {
            info!(orphans = found.len(), dry_run, "orphan repair planned");
            return Ok(OrphanRepair {
                dry_run,
                found,
                deleted: 0,
            });
        }

        let mut entries = Vec::with_capacity(found.len());
        for id in &found {
            entries.push(recorder.begin(
                Phase::Validate,
                "delete_orphaned_variant",
                EntityType::Variant,
                Some(id.0),
                Some(json!({"variant_id": id.0, "reason": "owning product missing"})),
            )?);
        }

        match self.store.delete_variants(&found) {
            Ok(deleted) => {
                for entry in entries {
                    recorder.complete(entry, Some(json!({"deleted": true})), None)?;
                }
                info!(deleted, "orphaned variants removed");
                Ok(OrphanRepair {
                    dry_run,
                    found,
                    deleted,
                })
            }
            Err(e) => {
                for entry in entries {
                    recorder.fail(entry, &e);
                }
                Err(e)
            }
        }
    }
}
