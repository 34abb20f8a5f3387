//! Catalog records as stored
//!
//! JSON columns are kept as raw text here; decoding into typed payloads is
//! an explicit step (see [`crate::options`] and [`crate::variant_config`]).

use crate::ids::{ProductId, VariantId};
use crate::options::normalize_attribute_name;
use crate::pricing::effective_price;
use crate::state::MigrationState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Product row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub sku: Option<String>,
    /// Base price in cents
    pub price: i64,
    pub has_variants: bool,
    pub variant_config: Option<String>,
    pub attributes: Option<String>,
    pub migrated_to_json: bool,
    pub track_inventory: bool,
    pub stock_quantity: i64,
}

impl Product {
    /// Current migration state
    #[inline]
    #[must_use]
    pub fn migration_state(&self) -> MigrationState {
        MigrationState::from_flag(self.migrated_to_json)
    }

    /// True if the product-level stock fields satisfy the ownership rule
    /// for the given variant count
    #[must_use]
    pub fn stock_tracking_consistent(&self) -> bool {
        if self.has_variants {
            !self.track_inventory && self.stock_quantity == 0
        } else {
            self.track_inventory
        }
    }
}

/// Variant row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub name: String,
    pub sku: Option<String>,
    /// Legacy raw price in cents
    pub price: Option<i64>,
    pub override_price: Option<i64>,
    pub options: Option<String>,
    pub migrated_to_json: bool,
    pub track_inventory: bool,
    pub stock_quantity: i64,
    pub is_active: bool,
}

impl Variant {
    /// Current migration state
    #[inline]
    #[must_use]
    pub fn migration_state(&self) -> MigrationState {
        MigrationState::from_flag(self.migrated_to_json)
    }

    /// Price a shopper pays given the owning product's base price
    #[inline]
    #[must_use]
    pub fn effective_price(&self, base_price: i64) -> i64 {
        effective_price(self.override_price, base_price)
    }
}

/// Purpose of a legacy attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributePurpose {
    /// Distinguishes variants of one product
    Variant,
    /// Describes the product as a whole
    Specification,
}

impl AttributePurpose {
    /// Stored form
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Variant => "variant",
            Self::Specification => "specification",
        }
    }
}

impl fmt::Display for AttributePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributePurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "variant" => Ok(Self::Variant),
            "specification" => Ok(Self::Specification),
            other => Err(format!("unknown attribute purpose: {other}")),
        }
    }
}

/// One legacy link resolved through attribute and value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyOptionRow {
    pub attribute_id: i64,
    pub attribute_name: String,
    pub attribute_type: String,
    pub purpose: AttributePurpose,
    pub value: String,
    pub slug: String,
    /// Price delta in cents
    pub price_modifier: i64,
}

impl LegacyOptionRow {
    /// Variant-purpose row with no price modifier
    #[must_use]
    pub fn variant(
        attribute_id: i64,
        attribute_name: impl Into<String>,
        attribute_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let value = value.into();
        Self {
            attribute_id,
            attribute_name: attribute_name.into(),
            attribute_type: attribute_type.into(),
            purpose: AttributePurpose::Variant,
            slug: normalize_attribute_name(&value).replace('_', "-"),
            value,
            price_modifier: 0,
        }
    }

    /// Specification-purpose row
    #[must_use]
    pub fn specification(
        attribute_id: i64,
        attribute_name: impl Into<String>,
        attribute_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            purpose: AttributePurpose::Specification,
            ..Self::variant(attribute_id, attribute_name, attribute_type, value)
        }
    }

    /// Key this row occupies in an options/attributes map
    #[must_use]
    pub fn option_key(&self) -> String {
        let key = normalize_attribute_name(&self.attribute_name);
        if key.is_empty() {
            format!("attribute_{}", self.attribute_id)
        } else {
            key
        }
    }
}
