//! Stock-Tracking Normalizer
//!
//! Restores the ownership rule: a product with variants carries no stock of
//! its own (`track_inventory=false`, `stock_quantity=0`) and every variant
//! tracks inventory; a product without variants tracks inventory itself.

use crate::audit::AuditRecorder;
use crate::error::{EntityError, Result};
use catalog_model::{
    EntityType, Phase, Product, ProductId, ProductStock, StockTrackingFix, Variant,
};
use catalog_store::{CatalogStore, ProductScope, StoreError};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Corrections needed for one product, if any
#[must_use]
pub fn plan_stock_fix(product: &Product, variants: &[Variant]) -> StockTrackingFix {
    let (product_fix, variants_to_track) = if product.has_variants {
        let fix = (!product.stock_tracking_consistent()).then_some(ProductStock {
            track_inventory: false,
            stock_quantity: (product.stock_quantity != 0).then_some(0),
        });
        let untracked = variants
            .iter()
            .filter(|v| !v.track_inventory)
            .map(|v| v.id)
            .collect();
        (fix, untracked)
    } else {
        let fix = (!product.track_inventory).then_some(ProductStock {
            track_inventory: true,
            stock_quantity: None,
        });
        (fix, Vec::new())
    };
    StockTrackingFix {
        product_id: product.id,
        product: product_fix,
        variants_to_track,
    }
}

/// One product whose fix failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockFailure {
    pub product_id: ProductId,
    pub message: String,
}

/// Outcome of a normalization run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeSummary {
    pub dry_run: bool,
    pub products_fixed: u64,
    pub variants_fixed: u64,
    pub errors: u64,
    pub failures: Vec<StockFailure>,
    /// Products fixed whose audit record could not be sealed
    pub unaudited: Vec<ProductId>,
}

impl NormalizeSummary {
    /// Total entities fixed
    #[inline]
    #[must_use]
    pub fn fixed(&self) -> u64 {
        self.products_fixed + self.variants_fixed
    }
}

/// Stock-Tracking Normalizer
#[derive(Debug, Clone)]
pub struct StockNormalizer {
    store: Arc<dyn CatalogStore>,
    recorder: AuditRecorder,
    page_size: usize,
}

impl StockNormalizer {
    /// Create a normalizer
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>, recorder: AuditRecorder) -> Self {
        Self {
            store,
            recorder,
            page_size: 100,
        }
    }

    /// With scan page size
    #[inline]
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fix every product and variant that breaks the ownership rule
    ///
    /// # Errors
    /// Returns an error if a page of products cannot be read. A failed
    /// product fix is counted and the scan continues.
    pub fn normalize(&self, dry_run: bool) -> Result<NormalizeSummary> {
        let mut summary = NormalizeSummary {
            dry_run,
            products_fixed: 0,
            variants_fixed: 0,
            errors: 0,
            failures: Vec::new(),
            unaudited: Vec::new(),
        };
        let mut cursor = None;
        loop {
            let page = self
                .store
                .products_after(cursor, self.page_size, ProductScope::All)?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);

            for product in &page {
                match self.normalize_product(product, dry_run) {
                    Ok((fix, audited)) => {
                        summary.products_fixed += u64::from(fix.product.is_some());
                        summary.variants_fixed += fix.variants_to_track.len() as u64;
                        if !audited {
                            summary.unaudited.push(product.id);
                        }
                    }
                    Err(e) => {
                        warn!(product_id = %product.id, error = %e, "stock fix failed");
                        summary.errors += 1;
                        summary.failures.push(StockFailure {
                            product_id: product.id,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        info!(
            dry_run,
            products = summary.products_fixed,
            variants = summary.variants_fixed,
            errors = summary.errors,
            "stock tracking normalized"
        );
        Ok(summary)
    }

    fn normalize_product(
        &self,
        product: &Product,
        dry_run: bool,
    ) -> std::result::Result<(StockTrackingFix, bool), EntityError> {
        let wrap = |source: StoreError| EntityError::Store {
            entity: EntityType::Product,
            id: product.id.0,
            source,
        };
        let variants = if product.has_variants {
            self.store.variants_of(product.id).map_err(wrap)?
        } else {
            Vec::new()
        };
        let fix = plan_stock_fix(product, &variants);
        if fix.is_noop() {
            return Ok((fix, true));
        }
        debug!(
            product_id = %product.id,
            entities = fix.entities_changed(),
            dry_run,
            "stock fix planned"
        );
        if dry_run {
            return Ok((fix, true));
        }
        let new_data = serde_json::to_value(&fix).map_err(|source| EntityError::Encode {
            entity: EntityType::Product,
            id: product.id.0,
            source,
        })?;

        let entry = self
            .recorder
            .begin(
                Phase::NormalizeStock,
                "normalize_stock",
                EntityType::Product,
                Some(product.id.0),
                Some(json!({
                    "track_inventory": product.track_inventory,
                    "stock_quantity": product.stock_quantity,
                    "untracked_variants": fix.variants_to_track,
                })),
            )
            .map_err(wrap)?;
        if let Err(e) = self.store.apply_stock_fix(&fix) {
            self.recorder.fail(entry, &e);
            return Err(wrap(e));
        }
        let audited = match self.recorder.complete(entry, Some(new_data), None) {
            Ok(()) => true,
            Err(e) => {
                warn!(product_id = %product.id, error = %e, "stock fixed but audit seal failed");
                false
            }
        };
        Ok((fix, audited))
    }
}
