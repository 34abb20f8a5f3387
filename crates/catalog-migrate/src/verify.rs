//! Post-Migration Validator
//!
//! Read-only checks that the JSON representation is complete and usable:
//! schema, per-row payload decoding, the stock ownership rule, and a smoke
//! load of one migrated product. Structural problems are issues; typed-shape
//! mismatches are warnings.

use crate::config::MigrationConfig;
use crate::findings::{CatalogStats, Finding, FindingCode, FindingTally};
use crate::retirement::RetirementMode;
use catalog_model::payload::classify;
use catalog_model::{PayloadError, ProductAttributes, VariantConfig, VariantOptions};
use catalog_store::schema::{LEGACY_TABLES, PRODUCTS, VARIANTS};
use catalog_store::{CatalogStore, ProductScope, StoreError};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

const JSON_COLUMNS: [(&str, &str); 3] = [
    (PRODUCTS, "variant_config"),
    (PRODUCTS, "attributes"),
    (VARIANTS, "options"),
];

/// What the caller expects of the legacy tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOptions {
    pub legacy_tables: Vec<String>,
    /// Hard retirement ran, so the tables must be gone
    pub expect_legacy_dropped: bool,
    pub page_size: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            legacy_tables: LEGACY_TABLES.iter().map(|t| (*t).to_string()).collect(),
            expect_legacy_dropped: false,
            page_size: 500,
        }
    }
}

/// A configured hard retirement means the legacy tables should be gone
impl From<&MigrationConfig> for VerifyOptions {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            legacy_tables: config.legacy_tables.clone(),
            expect_legacy_dropped: config.retirement_mode == RetirementMode::Hard,
            page_size: config.batch_size,
        }
    }
}

/// Validator output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyReport {
    pub ok: bool,
    pub issues: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub stats: Option<CatalogStats>,
}

/// Result of decoding one JSON column value
enum Decoded {
    Ok,
    /// Not JSON, or not an object/array
    Structural,
    /// Structured, but not the typed shape
    Shape,
}

fn check_column<T>(
    text: Option<&str>,
    parse: impl Fn(&str) -> Result<T, PayloadError>,
) -> Decoded {
    let Some(text) = text else {
        return Decoded::Ok;
    };
    match classify(text) {
        Ok(kind) if kind.is_structured() => {}
        _ => return Decoded::Structural,
    }
    match parse(text) {
        Ok(_) => Decoded::Ok,
        Err(_) => Decoded::Shape,
    }
}

/// Post-Migration Validator
#[derive(Debug, Clone)]
pub struct PostMigrationValidator {
    store: Arc<dyn CatalogStore>,
}

impl PostMigrationValidator {
    /// Create a validator over a store
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Run every check
    ///
    /// # Errors
    /// Returns an error only if the store cannot be read.
    pub fn verify(&self, opts: &VerifyOptions) -> Result<VerifyReport, StoreError> {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        let present: Vec<&String> = {
            let mut present = Vec::new();
            for table in &opts.legacy_tables {
                if self.store.table_exists(table)? {
                    present.push(table);
                }
            }
            present
        };
        if !present.is_empty() {
            let names = present.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ");
            let finding = Finding::new(
                FindingCode::LegacyTablePresent,
                format!("legacy tables still present: {names}"),
            );
            if opts.expect_legacy_dropped {
                issues.push(finding);
            } else {
                warnings.push(finding);
            }
        }

        let mut schema_ok = true;
        for (table, column) in JSON_COLUMNS {
            if !self.store.table_exists(table)?
                || !self.store.column_names(table)?.iter().any(|c| c == column)
            {
                schema_ok = false;
                issues.push(Finding::new(
                    FindingCode::MissingColumn,
                    format!("json column {table}.{column} does not exist"),
                ));
            }
        }
        if !schema_ok {
            return Ok(finish(issues, warnings, None));
        }

        let mut issue_tally = FindingTally::default();
        let mut warning_tally = FindingTally::default();
        let with_variants =
            self.scan_products(opts.page_size, &mut issue_tally, &mut warning_tally)?;
        self.scan_variants(
            opts.page_size,
            &with_variants,
            &mut issue_tally,
            &mut warning_tally,
        )?;
        issues.extend(issue_tally.into_findings(describe));
        warnings.extend(warning_tally.into_findings(describe));

        match self.smoke_check()? {
            Smoke::Passed => {}
            Smoke::NothingMigrated => warnings.push(Finding::new(
                FindingCode::NothingMigrated,
                "no migrated product to load; smoke check skipped",
            )),
            Smoke::Failed(id, reason) => issues.push(
                Finding::new(FindingCode::SmokeCheck, format!("product {id}: {reason}"))
                    .with_entities(vec![id]),
            ),
        }

        let stats = CatalogStats::from(self.store.catalog_counts()?);
        Ok(finish(issues, warnings, Some(stats)))
    }

    /// Returns the ids of products flagged `has_variants`
    fn scan_products(
        &self,
        page_size: usize,
        issues: &mut FindingTally,
        warnings: &mut FindingTally,
    ) -> Result<HashSet<i64>, StoreError> {
        let mut with_variants = HashSet::new();
        let mut cursor = None;
        loop {
            let page = self
                .store
                .products_after(cursor, page_size.max(1), ProductScope::All)?;
            let Some(last) = page.last() else {
                return Ok(with_variants);
            };
            cursor = Some(last.id);
            for product in &page {
                let id = product.id.0;
                if product.has_variants {
                    with_variants.insert(id);
                }
                let columns = [
                    check_column(product.variant_config.as_deref(), VariantConfig::parse),
                    check_column(product.attributes.as_deref(), ProductAttributes::parse),
                ];
                for decoded in columns {
                    match decoded {
                        Decoded::Ok => {}
                        Decoded::Structural => issues.hit(FindingCode::InvalidJson, id),
                        Decoded::Shape => warnings.hit(FindingCode::PayloadShape, id),
                    }
                }
                if product.has_variants
                    && product.migrated_to_json
                    && product.variant_config.is_none()
                {
                    issues.hit(FindingCode::MissingVariantConfig, id);
                }
                if !product.stock_tracking_consistent() {
                    issues.hit(FindingCode::StockTracking, id);
                }
            }
        }
    }

    fn scan_variants(
        &self,
        page_size: usize,
        with_variants: &HashSet<i64>,
        issues: &mut FindingTally,
        warnings: &mut FindingTally,
    ) -> Result<(), StoreError> {
        let mut cursor = None;
        loop {
            let page = self.store.variants_after(cursor, page_size.max(1))?;
            let Some(last) = page.last() else {
                return Ok(());
            };
            cursor = Some(last.id);
            for variant in &page {
                let id = variant.id.0;
                match check_column(variant.options.as_deref(), VariantOptions::parse) {
                    Decoded::Ok => {}
                    Decoded::Structural => issues.hit(FindingCode::InvalidJson, id),
                    Decoded::Shape => warnings.hit(FindingCode::PayloadShape, id),
                }
                if variant.migrated_to_json && variant.options.is_none() {
                    issues.hit(FindingCode::MissingOptions, id);
                }
                // Variants of an unflagged product are a data smell, not something
                // stock normalization owns.
                if !variant.track_inventory {
                    if with_variants.contains(&variant.product_id.0) {
                        issues.hit(FindingCode::StockTracking, id);
                    } else {
                        warnings.hit(FindingCode::VariantFlagMismatch, id);
                    }
                }
            }
        }
    }

    /// Load one migrated product with its variants and decode everything
    fn smoke_check(&self) -> Result<Smoke, StoreError> {
        let Some(first) = self
            .store
            .products_after(None, 1, ProductScope::Migrated)?
            .into_iter()
            .next()
        else {
            return Ok(Smoke::NothingMigrated);
        };
        let id = first.id.0;
        let Some(product) = self.store.product(first.id)? else {
            return Ok(Smoke::Failed(id, "product could not be reloaded".into()));
        };
        let config = product.variant_config.as_deref().unwrap_or_default();
        if let Err(e) = VariantConfig::parse(config) {
            return Ok(Smoke::Failed(id, format!("variant_config: {e}")));
        }
        let variants = self.store.variants_of(product.id)?;
        for variant in &variants {
            if variant.product_id != product.id {
                return Ok(Smoke::Failed(
                    id,
                    format!("variant {} resolves to product {}", variant.id, variant.product_id),
                ));
            }
            if let Err(e) = VariantOptions::parse_column(variant.options.as_deref()) {
                return Ok(Smoke::Failed(id, format!("variant {} options: {e}", variant.id)));
            }
        }
        debug!(product_id = %product.id, variants = variants.len(), "smoke check passed");
        Ok(Smoke::Passed)
    }
}

enum Smoke {
    Passed,
    NothingMigrated,
    Failed(i64, String),
}

fn describe(code: FindingCode, n: usize) -> String {
    match code {
        FindingCode::InvalidJson => format!("{n} rows hold json that is not an object or array"),
        FindingCode::PayloadShape => format!("{n} rows hold json of an unexpected shape"),
        FindingCode::MissingVariantConfig => {
            format!("{n} migrated products have no variant_config")
        }
        FindingCode::MissingOptions => format!("{n} migrated variants have no options"),
        FindingCode::StockTracking => format!("{n} rows break the stock ownership rule"),
        FindingCode::VariantFlagMismatch => {
            format!("{n} untracked variants belong to products without has_variants")
        }
        other => format!("{n} rows flagged {other}"),
    }
}

fn finish(
    issues: Vec<Finding>,
    warnings: Vec<Finding>,
    stats: Option<CatalogStats>,
) -> VerifyReport {
    let report = VerifyReport {
        ok: issues.is_empty(),
        issues,
        warnings,
        stats,
    };
    info!(
        ok = report.ok,
        issues = report.issues.len(),
        warnings = report.warnings.len(),
        "post-migration verification finished"
    );
    report
}
