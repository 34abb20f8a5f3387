//! Migration configuration
//!
//! Loaded from an optional TOML file; CLI flags override file values.
//!
//! ```toml
//! database = "storefront.db"
//! batch_size = 250
//! legacy_tables = ["variant_attribute_values", "attribute_values", "attributes"]
//! keep_backup = true
//! retirement_mode = "hard"
//! ```

use crate::error::ConfigError;
use crate::retirement::RetirementMode;
use catalog_store::schema::LEGACY_TABLES;
use catalog_store::validate_identifier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Migration configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// SQLite database file
    pub database: Option<PathBuf>,
    /// Products per keyset page
    pub batch_size: usize,
    /// Legacy tables to back up and retire, in drop order
    pub legacy_tables: Vec<String>,
    /// Keep backup tables after a successful verify
    pub keep_backup: bool,
    /// Default retirement mode
    pub retirement_mode: RetirementMode,
}

impl MigrationConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// holds unusable values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Returns an error if the text is not valid TOML or holds unusable
    /// values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field values
    ///
    /// # Errors
    /// `Invalid` for a zero batch size, an empty table list, or a table
    /// name that is not a plain identifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.legacy_tables.is_empty() {
            return Err(ConfigError::Invalid {
                field: "legacy_tables",
                reason: "must name at least one table".into(),
            });
        }
        for table in &self.legacy_tables {
            validate_identifier(table).map_err(|e| ConfigError::Invalid {
                field: "legacy_tables",
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// With database path
    #[inline]
    #[must_use]
    pub fn with_database(mut self, database: impl Into<PathBuf>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// With batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// With legacy table list
    #[inline]
    #[must_use]
    pub fn with_legacy_tables(mut self, tables: Vec<String>) -> Self {
        self.legacy_tables = tables;
        self
    }

    /// With keep-backup flag
    #[inline]
    #[must_use]
    pub fn with_keep_backup(mut self, keep: bool) -> Self {
        self.keep_backup = keep;
        self
    }

    /// With retirement mode
    #[inline]
    #[must_use]
    pub fn with_retirement_mode(mut self, mode: RetirementMode) -> Self {
        self.retirement_mode = mode;
        self
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database: None,
            batch_size: 100,
            legacy_tables: LEGACY_TABLES.iter().map(|t| (*t).to_string()).collect(),
            keep_backup: false,
            retirement_mode: RetirementMode::Soft,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MigrationConfig::new();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.retirement_mode, RetirementMode::Soft);
        assert_eq!(config.legacy_tables[0], "variant_attribute_values");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = MigrationConfig::from_toml_str(
            r#"
            batch_size = 250
            retirement_mode = "hard"
            "#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.retirement_mode, RetirementMode::Hard);
        assert!(!config.keep_backup);
        assert_eq!(config.legacy_tables.len(), 4);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            MigrationConfig::from_toml_str("batch_size = 0"),
            Err(ConfigError::Invalid { field: "batch_size", .. })
        ));
        assert!(matches!(
            MigrationConfig::from_toml_str(r#"legacy_tables = ["attributes; --"]"#),
            Err(ConfigError::Invalid { field: "legacy_tables", .. })
        ));
        assert!(matches!(
            MigrationConfig::from_toml_str("colour = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.toml");
        std::fs::write(&path, "database = \"shop.db\"\nkeep_backup = true\n").unwrap();

        let config = MigrationConfig::load(&path).unwrap();
        assert_eq!(config.database, Some(PathBuf::from("shop.db")));
        assert!(config.keep_backup);

        assert!(matches!(
            MigrationConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
