//! Variant-config documentation
//!
//! Describes the JSON wire shapes (JSON Schema derived from the typed
//! payloads) together with an inventory of the option and attribute keys
//! actually stored in the catalog.

use crate::error::{MigrationError, Result};
use catalog_model::{OptionValue, ProductAttributes, VariantConfig, VariantOptions};
use catalog_store::{CatalogStore, ProductScope};
use chrono::{DateTime, Utc};
use schemars::schema::RootSchema;
use schemars::schema_for;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

const MAX_SAMPLES: usize = 5;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocFormat {
    Json,
    #[default]
    Markdown,
}

impl DocFormat {
    /// File extension
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

impl FromStr for DocFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(format!("unknown format: {other} (expected json or markdown)")),
        }
    }
}

/// How one key is used across the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyUsage {
    pub key: String,
    pub occurrences: u64,
    /// Scalar types seen (`text`, `integer`, ...)
    pub value_types: BTreeSet<String>,
    /// Attribute types of detailed entries (`select`, `color`, ...)
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub attribute_types: BTreeSet<String>,
    /// First distinct values seen
    pub samples: Vec<String>,
}

impl KeyUsage {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            occurrences: 0,
            value_types: BTreeSet::new(),
            attribute_types: BTreeSet::new(),
            samples: Vec::new(),
        }
    }

    fn record(&mut self, value: &catalog_model::ScalarValue, kind: Option<&str>) {
        self.occurrences += 1;
        self.value_types.insert(value.type_label().to_string());
        if let Some(kind) = kind {
            self.attribute_types.insert(kind.to_string());
        }
        let sample = value.to_string();
        if self.samples.len() < MAX_SAMPLES && !self.samples.contains(&sample) {
            self.samples.push(sample);
        }
    }
}

/// Generated documentation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantConfigDoc {
    pub generated_at: DateTime<Utc>,
    /// JSON Schema per column payload
    pub schemas: BTreeMap<String, RootSchema>,
    pub option_keys: Vec<KeyUsage>,
    pub attribute_keys: Vec<KeyUsage>,
    /// Rows whose JSON could not be decoded and were left out
    pub undecodable: u64,
}

/// Build the documentation from the current catalog
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn document(store: &Arc<dyn CatalogStore>, page_size: usize) -> Result<VariantConfigDoc> {
    let page_size = page_size.max(1);
    let mut options: BTreeMap<String, KeyUsage> = BTreeMap::new();
    let mut attributes: BTreeMap<String, KeyUsage> = BTreeMap::new();
    let mut undecodable = 0;

    let mut cursor = None;
    loop {
        let page = store.variants_after(cursor, page_size)?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(last.id);
        for variant in &page {
            let Ok(decoded) = VariantOptions::parse_column(variant.options.as_deref()) else {
                undecodable += 1;
                continue;
            };
            for (key, entry) in decoded.iter() {
                let kind = match entry {
                    OptionValue::Detailed(detail) => Some(detail.kind.as_str()),
                    OptionValue::Scalar(_) => None,
                };
                options
                    .entry(key.clone())
                    .or_insert_with(|| KeyUsage::new(key))
                    .record(entry.value(), kind);
            }
        }
    }

    let mut cursor = None;
    loop {
        let page = store.products_after(cursor, page_size, ProductScope::All)?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(last.id);
        for product in &page {
            let Ok(decoded) = ProductAttributes::parse_column(product.attributes.as_deref()) else {
                undecodable += 1;
                continue;
            };
            for (key, value) in decoded.iter() {
                attributes
                    .entry(key.clone())
                    .or_insert_with(|| KeyUsage::new(key))
                    .record(value, None);
            }
        }
    }

    let mut schemas = BTreeMap::new();
    schemas.insert("options".to_string(), schema_for!(VariantOptions));
    schemas.insert("variant_config".to_string(), schema_for!(VariantConfig));
    schemas.insert("attributes".to_string(), schema_for!(ProductAttributes));

    info!(
        option_keys = options.len(),
        attribute_keys = attributes.len(),
        undecodable,
        "variant config documented"
    );
    Ok(VariantConfigDoc {
        generated_at: Utc::now(),
        schemas,
        option_keys: sorted(options),
        attribute_keys: sorted(attributes),
        undecodable,
    })
}

/// Most used first, then by key
fn sorted(usage: BTreeMap<String, KeyUsage>) -> Vec<KeyUsage> {
    let mut keys: Vec<KeyUsage> = usage.into_values().collect();
    keys.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then_with(|| a.key.cmp(&b.key)));
    keys
}

impl VariantConfigDoc {
    /// Render in `format`
    ///
    /// # Errors
    /// Returns an error if JSON encoding fails.
    pub fn render(&self, format: DocFormat) -> Result<String> {
        match format {
            DocFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            DocFormat::Markdown => self.markdown(),
        }
    }

    /// Write `variant-config.<ext>` into `dir`
    ///
    /// # Errors
    /// Returns an error if rendering fails or the file cannot be written.
    pub fn write_to(&self, dir: &Path, format: DocFormat) -> Result<PathBuf> {
        let text = self.render(format)?;
        std::fs::create_dir_all(dir).map_err(|e| MigrationError::io(dir, e))?;
        let path = dir.join(format!("variant-config.{}", format.extension()));
        std::fs::write(&path, text).map_err(|e| MigrationError::io(&path, e))?;
        info!(path = %path.display(), "documentation written");
        Ok(path)
    }

    fn markdown(&self) -> Result<String> {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(out, "# Variant configuration\n");
        let _ = writeln!(out, "Generated {}.\n", self.generated_at.to_rfc3339());
        let _ = writeln!(out, "## Wire shapes\n");
        let _ = writeln!(
            out,
            "- `product_variants.options`: `{{<attribute>: {{value, type, price_modifier?}} | <scalar>}}`"
        );
        let _ = writeln!(
            out,
            "- `products.variant_config`: `{{has_variants, variant_count, migrated_at, migration_batch_id}}`"
        );
        let _ = writeln!(out, "- `products.attributes`: `{{<attribute>: <scalar>}}`\n");

        write_usage(&mut out, "Option keys", &self.option_keys);
        write_usage(&mut out, "Attribute keys", &self.attribute_keys);
        if self.undecodable > 0 {
            let _ = writeln!(
                out,
                "{} rows could not be decoded and are not counted above.\n",
                self.undecodable
            );
        }

        let _ = writeln!(out, "## JSON Schema\n");
        for (name, schema) in &self.schemas {
            let _ = writeln!(out, "### `{name}`\n");
            let _ = writeln!(out, "```json\n{}\n```\n", serde_json::to_string_pretty(schema)?);
        }
        Ok(out)
    }
}

fn write_usage(out: &mut String, title: &str, keys: &[KeyUsage]) {
    let _ = writeln!(out, "## {title}\n");
    if keys.is_empty() {
        let _ = writeln!(out, "None in use.\n");
        return;
    }
    let _ = writeln!(out, "| Key | Occurrences | Value types | Attribute types | Samples |");
    let _ = writeln!(out, "|-----|-------------|-------------|-----------------|---------|");
    for usage in keys {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(", ");
        let _ = writeln!(
            out,
            "| `{}` | {} | {} | {} | {} |",
            usage.key,
            usage.occurrences,
            join(&usage.value_types),
            join(&usage.attribute_types),
            usage.samples.join(", ")
        );
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_model::ScalarValue;

    #[test]
    fn format_parsing() {
        assert_eq!("json".parse::<DocFormat>(), Ok(DocFormat::Json));
        assert_eq!("MD".parse::<DocFormat>(), Ok(DocFormat::Markdown));
        assert!("yaml".parse::<DocFormat>().is_err());
        assert_eq!(DocFormat::Markdown.extension(), "md");
    }

    #[test]
    fn usage_keeps_distinct_samples() {
        let mut usage = KeyUsage::new("color");
        for value in ["red", "red", "blue", "green", "black", "white", "pink"] {
            usage.record(&ScalarValue::Text(value.into()), Some("select"));
        }
        assert_eq!(usage.occurrences, 7);
        assert_eq!(usage.samples, vec!["red", "blue", "green", "black", "white"]);
        assert_eq!(usage.attribute_types.len(), 1);
    }
}
