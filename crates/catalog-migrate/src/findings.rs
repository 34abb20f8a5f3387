//! Validation findings and catalog statistics
//!
//! Shared by the precondition and post-migration validators so both emit the
//! same report shape.

use catalog_model::CatalogCounts;
use serde::Serialize;
use std::fmt;

/// Stable machine code of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCode {
    MissingTable,
    MissingColumn,
    MissingTrackingColumn,
    IncompleteMigration,
    OrphanedVariants,
    DuplicateSku,
    NonPositivePrice,
    VariantFlagMismatch,
    LegacyTablesMissing,
    LegacyTablePresent,
    InvalidJson,
    PayloadShape,
    MissingVariantConfig,
    MissingOptions,
    StockTracking,
    SmokeCheck,
    NothingMigrated,
}

impl FindingCode {
    /// Stable string form
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingTable => "missing_table",
            Self::MissingColumn => "missing_column",
            Self::MissingTrackingColumn => "missing_tracking_column",
            Self::IncompleteMigration => "incomplete_migration",
            Self::OrphanedVariants => "orphaned_variants",
            Self::DuplicateSku => "duplicate_sku",
            Self::NonPositivePrice => "non_positive_price",
            Self::VariantFlagMismatch => "variant_flag_mismatch",
            Self::LegacyTablesMissing => "legacy_tables_missing",
            Self::LegacyTablePresent => "legacy_table_present",
            Self::InvalidJson => "invalid_json",
            Self::PayloadShape => "payload_shape",
            Self::MissingVariantConfig => "missing_variant_config",
            Self::MissingOptions => "missing_options",
            Self::StockTracking => "stock_tracking",
            Self::SmokeCheck => "smoke_check",
            Self::NothingMigrated => "nothing_migrated",
        }
    }
}

impl fmt::Display for FindingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validator finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub code: FindingCode,
    pub message: String,
    /// Offending entity ids, when the finding concerns rows
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<i64>,
}

impl Finding {
    /// Create a finding with no entity list
    #[inline]
    #[must_use]
    pub fn new(code: FindingCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            entities: Vec::new(),
        }
    }

    /// Attach offending entity ids
    #[inline]
    #[must_use]
    pub fn with_entities(mut self, entities: Vec<i64>) -> Self {
        self.entities = entities;
        self
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.entities.is_empty() {
            write!(f, " (ids: {})", preview(&self.entities))?;
        }
        Ok(())
    }
}

/// First few ids, comma separated
#[must_use]
pub fn preview(ids: &[i64]) -> String {
    const SHOWN: usize = 10;
    let mut text = ids
        .iter()
        .take(SHOWN)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if ids.len() > SHOWN {
        text.push_str(&format!(", ... {} more", ids.len() - SHOWN));
    }
    text
}

/// Statistics reported by both validators
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CatalogStats {
    #[serde(flatten)]
    pub counts: CatalogCounts,
    pub pending_products: u64,
    pub pending_variants: u64,
    pub product_completion: f64,
    pub variant_completion: f64,
}

impl From<CatalogCounts> for CatalogStats {
    fn from(counts: CatalogCounts) -> Self {
        Self {
            counts,
            pending_products: counts.pending_products(),
            pending_variants: counts.pending_variants(),
            product_completion: counts.product_completion(),
            variant_completion: counts.variant_completion(),
        }
    }
}

/// Collects entity ids per finding code while scanning
#[derive(Debug, Default)]
pub(crate) struct FindingTally {
    hits: std::collections::BTreeMap<FindingCode, Vec<i64>>,
}

impl FindingTally {
    pub(crate) fn hit(&mut self, code: FindingCode, id: i64) {
        self.hits.entry(code).or_default().push(id);
    }

    /// One finding per code, message built from the count
    pub(crate) fn into_findings(
        self,
        describe: impl Fn(FindingCode, usize) -> String,
    ) -> Vec<Finding> {
        self.hits
            .into_iter()
            .map(|(code, ids)| Finding::new(code, describe(code, ids.len())).with_entities(ids))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_id_preview() {
        let finding = Finding::new(FindingCode::OrphanedVariants, "2 variants without product")
            .with_entities(vec![4, 9]);
        assert_eq!(
            finding.to_string(),
            "[orphaned_variants] 2 variants without product (ids: 4, 9)"
        );
    }

    #[test]
    fn preview_truncates() {
        let ids: Vec<i64> = (1..=12).collect();
        assert!(preview(&ids).ends_with("10, ... 2 more"));
    }

    #[test]
    fn tally_groups_by_code() {
        let mut tally = FindingTally::default();
        tally.hit(FindingCode::InvalidJson, 1);
        tally.hit(FindingCode::InvalidJson, 5);
        tally.hit(FindingCode::StockTracking, 2);
        let findings = tally.into_findings(|code, n| format!("{n} x {code}"));
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].message, "2 x invalid_json");
        assert_eq!(findings[0].entities, vec![1, 5]);
    }

    #[test]
    fn stats_carry_ratios() {
        let stats = CatalogStats::from(CatalogCounts {
            products_with_variants: 2,
            migrated_products: 1,
            ..CatalogCounts::default()
        });
        assert_eq!(stats.pending_products, 1);
        assert_eq!(stats.product_completion, 0.5);
        assert_eq!(stats.variant_completion, 1.0);
    }
}
