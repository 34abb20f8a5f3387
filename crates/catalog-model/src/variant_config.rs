//! `variant_config` payload of a product

use crate::ids::BatchId;
use crate::payload::{parse_object, PayloadError};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot written onto a product when its variants are migrated
///
/// `variant_count` is the count at migration time; it is not kept in sync
/// with later variant changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VariantConfig {
    pub has_variants: bool,
    pub variant_count: u32,
    pub migrated_at: DateTime<Utc>,
    #[schemars(with = "String")]
    pub migration_batch_id: BatchId,
}

impl VariantConfig {
    /// Take the snapshot for a product owning `variant_count` variants
    #[must_use]
    pub fn snapshot(variant_count: usize, batch_id: BatchId, migrated_at: DateTime<Utc>) -> Self {
        Self {
            has_variants: variant_count > 0,
            variant_count: u32::try_from(variant_count).unwrap_or(u32::MAX),
            migrated_at,
            migration_batch_id: batch_id,
        }
    }

    /// Strictly decode column text
    ///
    /// # Errors
    /// Rejects non-objects, missing fields and unknown fields.
    pub fn parse(text: &str) -> Result<Self, PayloadError> {
        let map = parse_object(text)?;
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    /// Encode for the `variant_config` column
    ///
    /// # Errors
    /// Returns `PayloadError::Malformed` if serialization fails.
    pub fn to_json_string(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snapshot_round_trips() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let config = VariantConfig::snapshot(3, BatchId::new(), at);
        let text = config.to_json_string().unwrap();

        assert!(text.starts_with(r#"{"has_variants":true,"variant_count":3,"#));
        assert_eq!(VariantConfig::parse(&text).unwrap(), config);
    }

    #[test]
    fn rejects_unknown_fields_and_scalars() {
        let err = VariantConfig::parse(
            r#"{"has_variants":true,"variant_count":1,"migrated_at":"2026-03-01T12:00:00Z","migration_batch_id":"01J0000000000000000000000Z","extra":1}"#,
        );
        assert!(err.is_err());
        assert!(VariantConfig::parse("3").is_err());
    }

    #[test]
    fn zero_variants_means_no_variants() {
        let config = VariantConfig::snapshot(0, BatchId::new(), Utc::now());
        assert!(!config.has_variants);
    }
}
