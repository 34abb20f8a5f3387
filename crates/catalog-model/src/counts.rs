//! Aggregate catalog counts

use serde::{Deserialize, Serialize};

/// Counts a store computes in one pass over the catalog
///
/// `migrated_products` counts only products with `has_variants=true`, the
/// population the migration executor works on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCounts {
    pub total_products: u64,
    pub products_with_variants: u64,
    pub migrated_products: u64,
    pub total_variants: u64,
    pub migrated_variants: u64,
    pub variants_with_options: u64,
    pub variants_with_override_price: u64,
    pub legacy_variant_links: u64,
    pub legacy_product_links: u64,
    pub products_with_non_positive_price: u64,
    pub variants_with_non_positive_price: u64,
    /// `has_variants=true` but no owned variants
    pub products_flagged_without_variants: u64,
    /// `has_variants=false` but owns variants
    pub products_unflagged_with_variants: u64,
}

impl CatalogCounts {
    /// Variants not yet migrated
    #[inline]
    #[must_use]
    pub fn pending_variants(&self) -> u64 {
        self.total_variants.saturating_sub(self.migrated_variants)
    }

    /// Products with variants not yet migrated
    #[inline]
    #[must_use]
    pub fn pending_products(&self) -> u64 {
        self.products_with_variants.saturating_sub(self.migrated_products)
    }

    /// `migrated_products / products_with_variants`; 1.0 when nothing to migrate
    #[must_use]
    pub fn product_completion(&self) -> f64 {
        ratio(self.migrated_products, self.products_with_variants)
    }

    /// `migrated_variants / total_variants`; 1.0 when nothing to migrate
    #[must_use]
    pub fn variant_completion(&self) -> f64 {
        ratio(self.migrated_variants, self.total_variants)
    }

    /// Both completion ratios equal 1.0
    #[must_use]
    pub fn fully_migrated(&self) -> bool {
        self.migrated_products >= self.products_with_variants
            && self.migrated_variants >= self.total_variants
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(done: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_catalog_is_complete() {
        let counts = CatalogCounts::default();
        assert_eq!(counts.product_completion(), 1.0);
        assert_eq!(counts.variant_completion(), 1.0);
        assert!(counts.fully_migrated());
    }

    #[test]
    fn partial_progress() {
        let counts = CatalogCounts {
            products_with_variants: 4,
            migrated_products: 1,
            total_variants: 10,
            migrated_variants: 5,
            ..CatalogCounts::default()
        };
        assert_eq!(counts.product_completion(), 0.25);
        assert_eq!(counts.variant_completion(), 0.5);
        assert_eq!(counts.pending_variants(), 5);
        assert_eq!(counts.pending_products(), 3);
        assert!(!counts.fully_migrated());
    }
}
