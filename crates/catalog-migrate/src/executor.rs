//! Migration Executor
//!
//! Converts legacy attribute links into JSON `options`, one product at a
//! time. The working set is `has_variants AND NOT migrated_to_json`, read in
//! keyset pages by product id, so an interrupted run resumes where it
//! stopped and a finished run has nothing left to do.
//!
//! Each product is planned from pure functions ([`plan_variant`],
//! [`plan_attributes`]) and written as one atomic [`ProductMigration`].
//! Per-product failures are folded into the [`MigrationSummary`]; only a
//! failure to read a page aborts the run.

use crate::audit::AuditRecorder;
use crate::error::{EntityError, MigrationError, PreconditionError, Result};
use crate::precondition::{PreconditionValidator, ValidationMode};
use catalog_model::{
    reconcile_override_price, AttributePurpose, BatchId, EntityType, LegacyOptionRow,
    PayloadError, Phase, Product, ProductAttributes, ProductId, ProductMigration, Variant,
    VariantConfig, VariantMigration, VariantOptions,
};
use catalog_store::{CatalogStore, ProductScope, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Build the migrated options and price of one variant
///
/// Existing `options` are decoded strictly, legacy rows are merged over
/// them (legacy wins on key collision), and an empty result falls back to
/// `{name, sku, migrated_from_legacy: true}`.
///
/// # Errors
/// Returns an error if the stored `options` are malformed.
pub fn plan_variant(
    variant: &Variant,
    legacy: &[LegacyOptionRow],
    base_price: i64,
) -> std::result::Result<VariantMigration, PayloadError> {
    let existing = VariantOptions::parse_column(variant.options.as_deref())?;
    let merged = existing.merge_legacy(VariantOptions::from_legacy(legacy));
    let options = if merged.is_empty() {
        VariantOptions::synthetic(&variant.name, variant.sku.as_deref())
    } else {
        merged
    };
    Ok(VariantMigration {
        variant_id: variant.id,
        options,
        override_price: reconcile_override_price(variant.override_price, variant.price, base_price),
    })
}

/// Fold specification links into product `attributes`
///
/// Returns `None` when there is nothing to fold, leaving the column as is.
///
/// # Errors
/// Returns an error if the stored `attributes` are malformed.
pub fn plan_attributes(
    existing: Option<&str>,
    legacy: &[LegacyOptionRow],
) -> std::result::Result<Option<ProductAttributes>, PayloadError> {
    let specs: Vec<LegacyOptionRow> = legacy
        .iter()
        .filter(|r| r.purpose == AttributePurpose::Specification)
        .cloned()
        .collect();
    if specs.is_empty() {
        return Ok(None);
    }
    let current = ProductAttributes::parse_column(existing)?;
    Ok(Some(current.merge_legacy(ProductAttributes::from_legacy(&specs))))
}

/// One product that could not be migrated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductFailure {
    pub product_id: ProductId,
    pub entity: EntityType,
    pub entity_id: i64,
    pub message: String,
}

/// Outcome of a migration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub batch_id: BatchId,
    pub dry_run: bool,
    /// Products migrated (or that would be, in a dry run)
    pub migrated: u64,
    /// Variants migrated (or that would be)
    pub variants_migrated: u64,
    /// Variants of a re-included product that were already migrated
    pub skipped: u64,
    pub errors: u64,
    pub failures: Vec<ProductFailure>,
    /// Products written whose audit record could not be sealed
    pub unaudited: Vec<ProductId>,
}

impl MigrationSummary {
    fn new(batch_id: BatchId, dry_run: bool) -> Self {
        Self {
            batch_id,
            dry_run,
            migrated: 0,
            variants_migrated: 0,
            skipped: 0,
            errors: 0,
            failures: Vec::new(),
            unaudited: Vec::new(),
        }
    }

    /// Fold one product outcome into the summary
    fn absorb(
        mut self,
        (product_id, outcome): (ProductId, std::result::Result<ProductOutcome, EntityError>),
    ) -> Self {
        match outcome {
            Ok(done) => {
                self.migrated += 1;
                self.variants_migrated += done.variants;
                self.skipped += done.skipped;
                if !done.audited {
                    self.unaudited.push(product_id);
                }
            }
            Err(e) => {
                self.errors += 1;
                self.failures.push(ProductFailure {
                    product_id,
                    entity: e.entity(),
                    entity_id: e.entity_id(),
                    message: e.to_string(),
                });
            }
        }
        self
    }

    /// True if no product failed and every write was audited
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors == 0 && self.unaudited.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct ProductOutcome {
    variants: u64,
    skipped: u64,
    /// False when the data was written but the audit seal failed
    audited: bool,
}

/// Migration Executor
#[derive(Debug, Clone)]
pub struct MigrationExecutor {
    store: Arc<dyn CatalogStore>,
    recorder: AuditRecorder,
    validator: PreconditionValidator,
}

impl MigrationExecutor {
    /// Create an executor
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>, recorder: AuditRecorder) -> Self {
        let validator = PreconditionValidator::new(store.clone());
        Self {
            store,
            recorder,
            validator,
        }
    }

    /// Migrate every pending product
    ///
    /// The precondition gate runs first; a dry run plans every product
    /// without writing anything, audit rows included.
    ///
    /// # Errors
    /// `Precondition` if the gate reports fatal findings, `Store` if a page
    /// cannot be read. Per-product failures are counted in the summary.
    pub fn migrate(&self, batch_size: usize, dry_run: bool) -> Result<MigrationSummary> {
        let gate = self.validator.validate(ValidationMode::BeforeMigration)?;
        if !gate.ok {
            warn!(errors = gate.errors.len(), "migration refused by precondition gate");
            return Err(PreconditionError::Findings(gate.errors).into());
        }

        let batch_id = self.recorder.batch_id();
        let started_at = Utc::now();
        let page_size = batch_size.max(1);
        let mut summary = MigrationSummary::new(batch_id, dry_run);
        let mut cursor = None;

        info!(%batch_id, batch_size = page_size, dry_run, "migration started");
        loop {
            let page = self
                .store
                .products_after(cursor, page_size, ProductScope::PendingMigration)
                .map_err(MigrationError::Store)?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);
            debug!(products = page.len(), after = %last.id, "page loaded");

            summary = page
                .iter()
                .map(|product| {
                    let outcome = self.migrate_product(product, batch_id, started_at, dry_run);
                    (product.id, outcome)
                })
                .fold(summary, MigrationSummary::absorb);
        }

        info!(
            %batch_id,
            migrated = summary.migrated,
            variants = summary.variants_migrated,
            errors = summary.errors,
            dry_run,
            "migration finished"
        );
        Ok(summary)
    }

    fn migrate_product(
        &self,
        product: &Product,
        batch_id: BatchId,
        at: DateTime<Utc>,
        dry_run: bool,
    ) -> std::result::Result<ProductOutcome, EntityError> {
        let store_err = |source: StoreError| EntityError::Store {
            entity: EntityType::Product,
            id: product.id.0,
            source,
        };
        if dry_run {
            let (plan, skipped) = self.plan_product(product, batch_id, at)?;
            debug!(product_id = %product.id, variants = plan.variants.len(), "would migrate");
            return Ok(ProductOutcome {
                variants: plan.variants.len() as u64,
                skipped,
                audited: true,
            });
        }

        let entry = self
            .recorder
            .begin(
                Phase::Migrate,
                "migrate_product",
                EntityType::Product,
                Some(product.id.0),
                Some(product_snapshot(product)),
            )
            .map_err(store_err)?;

        let result = self.plan_product(product, batch_id, at).and_then(|(plan, skipped)| {
            let new_data = serde_json::to_value(&plan).map_err(|source| EntityError::Encode {
                entity: EntityType::Product,
                id: product.id.0,
                source,
            })?;
            self.store.apply_migration(&plan).map_err(store_err)?;
            Ok((plan.variants.len() as u64, skipped, new_data))
        });

        let (variants, skipped, new_data) = match result {
            Ok(done) => done,
            Err(e) => {
                warn!(product_id = %product.id, error = %e, "product migration failed");
                self.recorder.fail(entry, &e);
                return Err(e);
            }
        };
        // The product is committed at this point; a seal failure only loses
        // the audit trail.
        let audited = match self
            .recorder
            .complete(entry, Some(new_data), Some(product_snapshot(product)))
        {
            Ok(()) => true,
            Err(e) => {
                warn!(product_id = %product.id, error = %e, "product migrated but audit seal failed");
                false
            }
        };
        debug!(product_id = %product.id, variants, "product migrated");
        Ok(ProductOutcome {
            variants,
            skipped,
            audited,
        })
    }

    /// Plan one product; returns the plan and the number of variants that
    /// were already migrated
    ///
    /// # Errors
    /// Returns an error if a read fails, a stored payload is malformed, or
    /// an entity is not in a migratable state.
    pub fn plan_product(
        &self,
        product: &Product,
        batch_id: BatchId,
        at: DateTime<Utc>,
    ) -> std::result::Result<(ProductMigration, u64), EntityError> {
        let product_err = |source: StoreError| EntityError::Store {
            entity: EntityType::Product,
            id: product.id.0,
            source,
        };
        product
            .migration_state()
            .advance()
            .map_err(|source| EntityError::State {
                entity: EntityType::Product,
                id: product.id.0,
                source,
            })?;

        let variants = self.store.variants_of(product.id).map_err(product_err)?;
        let specs = self
            .store
            .legacy_product_attributes(product.id)
            .map_err(product_err)?;
        let attributes = plan_attributes(product.attributes.as_deref(), &specs).map_err(|source| {
            EntityError::Payload {
                entity: EntityType::Product,
                id: product.id.0,
                source,
            }
        })?;

        let mut planned = Vec::with_capacity(variants.len());
        let mut skipped = 0;
        for variant in &variants {
            if variant.migrated_to_json {
                skipped += 1;
                continue;
            }
            planned.push(self.plan_one_variant(variant, product.price)?);
        }

        Ok((
            ProductMigration {
                product_id: product.id,
                variant_config: VariantConfig::snapshot(variants.len(), batch_id, at),
                attributes,
                variants: planned,
            },
            skipped,
        ))
    }

    fn plan_one_variant(
        &self,
        variant: &Variant,
        base_price: i64,
    ) -> std::result::Result<VariantMigration, EntityError> {
        let id = variant.id.0;
        variant
            .migration_state()
            .advance()
            .map_err(|source| EntityError::State {
                entity: EntityType::Variant,
                id,
                source,
            })?;
        let legacy = self
            .store
            .legacy_variant_options(variant.id)
            .map_err(|source| EntityError::Store {
                entity: EntityType::Variant,
                id,
                source,
            })?;
        plan_variant(variant, &legacy, base_price).map_err(|source| EntityError::Payload {
            entity: EntityType::Variant,
            id,
            source,
        })
    }
}

/// Pre-migration state kept as audit evidence
fn product_snapshot(product: &Product) -> Value {
    json!({
        "migrated_to_json": product.migrated_to_json,
        "variant_config": product.variant_config,
        "attributes": product.attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_model::{OptionValue, VariantId};
    use pretty_assertions::assert_eq;

    fn variant(options: Option<&str>, price: Option<i64>) -> Variant {
        Variant {
            id: VariantId(1),
            product_id: ProductId(1),
            name: "Red".into(),
            sku: Some("P-R".into()),
            price,
            override_price: None,
            options: options.map(str::to_string),
            migrated_to_json: false,
            track_inventory: true,
            stock_quantity: 0,
            is_active: true,
        }
    }

    #[test]
    fn legacy_wins_over_existing_options() {
        let v = variant(Some(r#"{"color": "blue", "finish": "matte"}"#), None);
        let legacy = [LegacyOptionRow::variant(1, "Color", "select", "red")];

        let plan = plan_variant(&v, &legacy, 1000).unwrap();
        assert_eq!(plan.options.get("color").and_then(OptionValue::value_text), Some("red"));
        assert_eq!(plan.options.get("finish").and_then(OptionValue::value_text), Some("matte"));
    }

    #[test]
    fn empty_result_falls_back_to_identity() {
        let plan = plan_variant(&variant(None, None), &[], 1000).unwrap();
        assert_eq!(
            serde_json::to_value(&plan.options).unwrap(),
            json!({"name": "Red", "sku": "P-R", "migrated_from_legacy": true})
        );
    }

    #[test]
    fn price_reconciliation() {
        let same = plan_variant(&variant(None, Some(1000)), &[], 1000).unwrap();
        assert_eq!(same.override_price, None);
        let higher = plan_variant(&variant(None, Some(1200)), &[], 1000).unwrap();
        assert_eq!(higher.override_price, Some(1200));
    }

    #[test]
    fn malformed_options_are_rejected() {
        assert!(plan_variant(&variant(Some("[1, 2]"), None), &[], 1000).is_err());
        assert!(plan_variant(&variant(Some("{not json"), None), &[], 1000).is_err());
    }

    #[test]
    fn attributes_fold_only_specifications() {
        let legacy = [
            LegacyOptionRow::specification(3, "Material", "text", "Aluminium"),
            LegacyOptionRow::variant(1, "Color", "select", "red"),
        ];
        let attrs = plan_attributes(Some(r#"{"material": "steel", "weight": 180}"#), &legacy)
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::to_value(&attrs).unwrap(),
            json!({"material": "Aluminium", "weight": 180})
        );
        assert_eq!(plan_attributes(Some("{}"), &legacy[1..]).unwrap(), None);
    }
}
