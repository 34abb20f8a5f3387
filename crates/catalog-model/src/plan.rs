//! Write plans
//!
//! Components decide what to write; a store applies a plan as one atomic
//! unit. A plan touches exactly one product and its own variants.

use crate::ids::{ProductId, VariantId};
use crate::options::{ProductAttributes, VariantOptions};
use crate::variant_config::VariantConfig;
use serde::Serialize;

/// Everything written when one product is migrated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductMigration {
    pub product_id: ProductId,
    pub variant_config: VariantConfig,
    /// `None` leaves the column untouched
    pub attributes: Option<ProductAttributes>,
    pub variants: Vec<VariantMigration>,
}

/// Everything written when one variant is migrated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantMigration {
    pub variant_id: VariantId,
    pub options: VariantOptions,
    pub override_price: Option<i64>,
}

/// Stock-tracking corrections for one product and its variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockTrackingFix {
    pub product_id: ProductId,
    /// New product-level values, `None` when already correct
    pub product: Option<ProductStock>,
    /// Variants that must start tracking inventory
    pub variants_to_track: Vec<VariantId>,
}

/// Product-level stock fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProductStock {
    pub track_inventory: bool,
    /// `None` leaves the quantity untouched
    pub stock_quantity: Option<i64>,
}

impl StockTrackingFix {
    /// True if nothing needs writing
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.product.is_none() && self.variants_to_track.is_empty()
    }

    /// Entities this fix changes
    #[must_use]
    pub fn entities_changed(&self) -> usize {
        usize::from(self.product.is_some()) + self.variants_to_track.len()
    }
}
