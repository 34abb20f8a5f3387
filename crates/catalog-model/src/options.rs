//! Variant option payloads
//!
//! `options` on a variant maps an attribute name to either a detailed entry
//! `{value, type, price_modifier?}` or a bare scalar (the simplified legacy
//! form). `attributes` on a product is a flat name → scalar map.
//!
//! Both maps keep insertion order so the JSON written back matches the
//! order attributes were linked in the legacy graph.

use crate::payload::{parse_object, PayloadError};
use crate::records::LegacyOptionRow;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

static CASE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\p{Ll}\p{N}])(\p{Lu})").expect("case boundary regex is valid"));

static SEPARATOR_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("separator regex is valid"));

/// Normalize an attribute name to canonical lower-snake form
///
/// `"Screen Size"` → `"screen_size"`, `"ColorName"` → `"color_name"`,
/// `"RAM (GB)"` → `"ram_gb"`.
#[must_use]
pub fn normalize_attribute_name(name: &str) -> String {
    let split = CASE_BOUNDARY.replace_all(name.trim(), "${1}_${2}");
    let joined = SEPARATOR_RUN.replace_all(&split, "_");
    joined.trim_matches('_').to_lowercase()
}

/// Scalar option value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ScalarValue {
    /// Boolean flag
    Flag(bool),
    /// Whole number
    Integer(i64),
    /// Fractional number
    Decimal(f64),
    /// Text
    Text(String),
}

impl ScalarValue {
    /// Text form, if this is a text value
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short type label used in documentation output
    #[must_use]
    pub fn type_label(&self) -> &'static str {
        match self {
            Self::Flag(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
        }
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flag(b) => write!(f, "{b}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Decimal(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

fn default_kind() -> String {
    "text".to_string()
}

/// Detailed option entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OptionDetail {
    /// Selected value
    pub value: ScalarValue,
    /// Attribute type (`select`, `color`, `text`, ...)
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Price delta in cents carried over from the legacy value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_modifier: Option<i64>,
}

/// One entry of a variant's `options` map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OptionValue {
    /// `{value, type, price_modifier?}`
    Detailed(OptionDetail),
    /// Bare scalar
    Scalar(ScalarValue),
}

impl OptionValue {
    /// The selected value regardless of entry form
    #[must_use]
    pub fn value(&self) -> &ScalarValue {
        match self {
            Self::Detailed(detail) => &detail.value,
            Self::Scalar(value) => value,
        }
    }

    /// The selected value as text, if it is text
    #[must_use]
    pub fn value_text(&self) -> Option<&str> {
        self.value().as_text()
    }
}

/// Decoded `options` column of a variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VariantOptions(IndexMap<String, OptionValue>);

impl VariantOptions {
    /// Create empty options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Strictly decode column text
    ///
    /// # Errors
    /// Rejects non-objects and entries that are neither a scalar nor a
    /// detailed entry.
    pub fn parse(text: &str) -> Result<Self, PayloadError> {
        let map = parse_object(text)?;
        let mut entries = IndexMap::with_capacity(map.len());
        for (key, value) in map {
            let entry = serde_json::from_value::<OptionValue>(value)
                .map_err(|e| PayloadError::invalid_entry(&key, e))?;
            entries.insert(key, entry);
        }
        Ok(Self(entries))
    }

    /// Decode optional column text; `None` and blank text yield empty options
    ///
    /// # Errors
    /// See [`VariantOptions::parse`].
    pub fn parse_column(text: Option<&str>) -> Result<Self, PayloadError> {
        match text {
            Some(t) if !t.trim().is_empty() => Self::parse(t),
            _ => Ok(Self::new()),
        }
    }

    /// Build options from legacy link rows
    ///
    /// Names are normalized; a name that normalizes to nothing falls back to
    /// `attribute_<id>`. A zero price modifier is omitted.
    #[must_use]
    pub fn from_legacy(rows: &[LegacyOptionRow]) -> Self {
        let mut options = Self::new();
        for row in rows {
            let detail = OptionDetail {
                value: ScalarValue::Text(row.value.clone()),
                kind: row.attribute_type.clone(),
                price_modifier: (row.price_modifier != 0).then_some(row.price_modifier),
            };
            options.insert(row.option_key(), OptionValue::Detailed(detail));
        }
        options
    }

    /// Minimal map used when a variant has no options at all
    #[must_use]
    pub fn synthetic(name: &str, sku: Option<&str>) -> Self {
        let mut options = Self::new();
        options.insert("name", OptionValue::Scalar(ScalarValue::Text(name.to_string())));
        options.insert(
            "sku",
            OptionValue::Scalar(ScalarValue::Text(sku.unwrap_or_default().to_string())),
        );
        options.insert("migrated_from_legacy", OptionValue::Scalar(ScalarValue::Flag(true)));
        options
    }

    /// Merge legacy-extracted entries over these options
    ///
    /// On a key collision the legacy entry replaces the existing one and
    /// keeps the existing key's position.
    #[must_use]
    pub fn merge_legacy(mut self, legacy: VariantOptions) -> Self {
        for (key, value) in legacy.0 {
            self.0.insert(key, value);
        }
        self
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, key: impl Into<String>, value: OptionValue) {
        self.0.insert(key.into(), value);
    }

    /// Look up an entry
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    /// Iterate entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.0.iter()
    }

    /// Entry keys in order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no entries
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode for the `options` column
    ///
    /// # Errors
    /// Returns `PayloadError::Malformed` if serialization fails.
    pub fn to_json_string(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decoded `attributes` column of a product
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ProductAttributes(IndexMap<String, ScalarValue>);

impl ProductAttributes {
    /// Strictly decode column text
    ///
    /// # Errors
    /// Rejects non-objects and non-scalar values.
    pub fn parse(text: &str) -> Result<Self, PayloadError> {
        let map = parse_object(text)?;
        let mut entries = IndexMap::with_capacity(map.len());
        for (key, value) in map {
            let scalar = serde_json::from_value::<ScalarValue>(value)
                .map_err(|e| PayloadError::invalid_entry(&key, e))?;
            entries.insert(key, scalar);
        }
        Ok(Self(entries))
    }

    /// Decode optional column text; `None` and blank text yield an empty map
    ///
    /// # Errors
    /// See [`ProductAttributes::parse`].
    pub fn parse_column(text: Option<&str>) -> Result<Self, PayloadError> {
        match text {
            Some(t) if !t.trim().is_empty() => Self::parse(t),
            _ => Ok(Self::default()),
        }
    }

    /// Build attributes from specification links
    #[must_use]
    pub fn from_legacy(rows: &[LegacyOptionRow]) -> Self {
        let mut attributes = Self::default();
        for row in rows {
            attributes
                .0
                .insert(row.option_key(), ScalarValue::Text(row.value.clone()));
        }
        attributes
    }

    /// Merge legacy-extracted entries over these attributes (legacy wins)
    #[must_use]
    pub fn merge_legacy(mut self, legacy: ProductAttributes) -> Self {
        for (key, value) in legacy.0 {
            self.0.insert(key, value);
        }
        self
    }

    /// Look up an entry
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ScalarValue> {
        self.0.get(key)
    }

    /// Iterate entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ScalarValue)> {
        self.0.iter()
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no entries
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode for the `attributes` column
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
    use pretty_assertions::assert_eq;

    #[test]
    fn normalizes_common_attribute_names() {
        assert_eq!(normalize_attribute_name("Color"), "color");
        assert_eq!(normalize_attribute_name("Screen Size"), "screen_size");
        assert_eq!(normalize_attribute_name("ColorName"), "color_name");
        assert_eq!(normalize_attribute_name("RAM (GB)"), "ram_gb");
        assert_eq!(normalize_attribute_name("  storage-capacity "), "storage_capacity");
        assert_eq!(normalize_attribute_name("!!!"), "");
    }

    #[test]
    fn parses_both_entry_forms() {
        let options = VariantOptions::parse(
            r#"{"color": {"value": "Red", "type": "color", "price_modifier": 150}, "size": "M"}"#,
        )
        .unwrap();

        assert_eq!(options.len(), 2);
        assert_eq!(options.get("color").and_then(OptionValue::value_text), Some("Red"));
        assert_eq!(
            options.get("size"),
            Some(&OptionValue::Scalar(ScalarValue::Text("M".into())))
        );
    }

    #[test]
    fn rejects_nested_and_null_entries() {
        assert!(VariantOptions::parse(r#"{"color": null}"#).is_err());
        assert!(VariantOptions::parse(r#"{"color": ["red"]}"#).is_err());
        assert!(VariantOptions::parse(r##"{"color": {"value": "red", "hex": "#f00"}}"##).is_err());
        assert!(VariantOptions::parse(r#""color""#).is_err());
    }

    #[test]
    fn blank_column_is_empty() {
        assert!(VariantOptions::parse_column(None).unwrap().is_empty());
        assert!(VariantOptions::parse_column(Some("  ")).unwrap().is_empty());
    }

    #[test]
    fn legacy_wins_on_collision_and_keeps_position() {
        let existing = VariantOptions::parse(r#"{"color": "blue", "finish": "matte"}"#).unwrap();
        let legacy = VariantOptions::from_legacy(&[
            LegacyOptionRow::variant(1, "Color", "color", "red"),
            LegacyOptionRow::variant(2, "Storage", "select", "128GB"),
        ]);

        let merged = existing.merge_legacy(legacy);
        let keys: Vec<_> = merged.keys().cloned().collect();

        assert_eq!(keys, vec!["color", "finish", "storage"]);
        assert_eq!(merged.get("color").and_then(OptionValue::value_text), Some("red"));
        assert_eq!(merged.get("finish").and_then(OptionValue::value_text), Some("matte"));
    }

    #[test]
    fn legacy_rows_carry_nonzero_price_modifiers_only() {
        let mut with_modifier = LegacyOptionRow::variant(2, "Storage", "select", "256GB");
        with_modifier.price_modifier = 5000;
        let options = VariantOptions::from_legacy(&[
            LegacyOptionRow::variant(1, "Color", "color", "red"),
            with_modifier,
        ]);

        let json = options.to_json_string().unwrap();
        assert_eq!(
            json,
            r#"{"color":{"value":"red","type":"color"},"storage":{"value":"256GB","type":"select","price_modifier":5000}}"#
        );
    }

    #[test]
    fn unnamed_attribute_falls_back_to_id_key() {
        let options = VariantOptions::from_legacy(&[LegacyOptionRow::variant(9, "???", "text", "x")]);
        assert!(options.get("attribute_9").is_some());
    }

    #[test]
    fn synthetic_options_shape() {
        let options = VariantOptions::synthetic("Phone - Red", Some("PH-RED"));
        assert_eq!(
            options.to_json_string().unwrap(),
            r#"{"name":"Phone - Red","sku":"PH-RED","migrated_from_legacy":true}"#
        );
    }

    #[test]
    fn product_attributes_merge() {
        let existing = ProductAttributes::parse(r#"{"brand": "Acme", "weight": 180}"#).unwrap();
        let legacy = ProductAttributes::from_legacy(&[LegacyOptionRow::specification(
            4, "Weight", "number", "175",
        )]);
        let merged = existing.merge_legacy(legacy);
        assert_eq!(merged.get("weight"), Some(&ScalarValue::Text("175".into())));
        assert_eq!(merged.get("brand"), Some(&ScalarValue::Text("Acme".into())));
    }
}
