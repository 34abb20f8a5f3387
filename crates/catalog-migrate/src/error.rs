//! Error types for the migration pipeline
//!
//! - `PreconditionError`: the catalog is not ready; nothing was mutated
//! - `EntityError`: one product or variant failed; the batch continues
//! - `BackupError`: a backup failed and the partial backup set was dropped
//! - `DestructiveOperationError`: hard retirement cannot be undone
//! - `ConfigError`: configuration file problems
//!
//! `MigrationError` wraps all of them for callers that run several stages.

use crate::findings::Finding;
use catalog_model::{EntityType, PayloadError, StateError};
use catalog_store::StoreError;
use std::path::PathBuf;

/// Main migration error type
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Catalog not ready for the requested stage
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    /// One entity failed
    #[error("entity failed: {0}")]
    Entity(#[from] EntityError),

    /// Backup failed
    #[error("backup failed: {0}")]
    Backup(#[from] BackupError),

    /// Irreversible operation requested
    #[error(transparent)]
    Destructive(#[from] DestructiveOperationError),

    /// Storage failure outside a single entity
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Strict payload decode failure
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Report serialization failed
    #[error("cannot serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Report or document could not be written
    #[error("cannot write {}: {source}", path.display())]
    Io {
        /// Target path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl MigrationError {
    /// Check if the error stops the run
    ///
    /// Entity errors are counted and the batch moves on; everything else
    /// aborts.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Entity(_))
    }

    /// Process exit code for this error
    #[inline]
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Create an I/O error for a path
    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Catalog not ready; raised before any mutation
#[derive(Debug, thiserror::Error)]
pub enum PreconditionError {
    /// Validator reported fatal findings
    #[error("{} fatal finding(s): {}", .0.len(), summarize(.0))]
    Findings(Vec<Finding>),

    /// A table needed by the stage is missing
    #[error("missing table: {0}")]
    MissingTable(String),

    /// No backup exists for a table about to be dropped
    #[error("no backup of {table}; run the backup step first")]
    MissingBackup {
        /// Table without a backup
        table: String,
    },

    /// The newest backup no longer matches its source
    #[error("backup {backup} has {backup_rows} rows but {table} has {table_rows}; take a fresh backup")]
    StaleBackup {
        /// Source table
        table: String,
        /// Backup table
        backup: String,
        /// Rows in the source
        table_rows: u64,
        /// Rows in the backup
        backup_rows: u64,
    },
}

fn summarize(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| f.code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One product or variant transform failed
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// Stored JSON failed strict decoding
    #[error("{entity} {id}: {source}")]
    Payload {
        /// Entity kind
        entity: EntityType,
        /// Entity id
        id: i64,
        /// Decode error
        #[source]
        source: PayloadError,
    },

    /// Store read or write failed for this entity
    #[error("{entity} {id}: {source}")]
    Store {
        /// Entity kind
        entity: EntityType,
        /// Entity id
        id: i64,
        /// Store error
        #[source]
        source: StoreError,
    },

    /// Audit payload could not be encoded
    #[error("{entity} {id}: cannot encode audit data: {source}")]
    Encode {
        /// Entity kind
        entity: EntityType,
        /// Entity id
        id: i64,
        /// Encode error
        #[source]
        source: serde_json::Error,
    },

    /// Migration state transition rejected
    #[error("{entity} {id}: {source}")]
    State {
        /// Entity kind
        entity: EntityType,
        /// Entity id
        id: i64,
        /// Transition error
        #[source]
        source: StateError,
    },
}

impl EntityError {
    /// Kind of the failed entity
    #[must_use]
    pub fn entity(&self) -> EntityType {
        match self {
            Self::Payload { entity, .. }
            | Self::Store { entity, .. }
            | Self::Encode { entity, .. }
            | Self::State { entity, .. } => *entity,
        }
    }

    /// Id of the failed entity
    #[must_use]
    pub fn entity_id(&self) -> i64 {
        match self {
            Self::Payload { id, .. }
            | Self::Store { id, .. }
            | Self::Encode { id, .. }
            | Self::State { id, .. } => *id,
        }
    }
}

/// Backup step failed; backups created so far were dropped
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Copy or inspection of a table failed
    #[error("backup of {table} failed: {source}")]
    Store {
        /// Source table
        table: String,
        /// Store error
        #[source]
        source: StoreError,
    },

    /// Backup row count differs from the source
    #[error("backup {backup} has {copied} rows, {table} has {expected}")]
    RowCountMismatch {
        /// Source table
        table: String,
        /// Backup table
        backup: String,
        /// Rows in the source
        expected: u64,
        /// Rows copied
        copied: u64,
    },
}

impl BackupError {
    /// Table the failure concerns
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Store { table, .. } | Self::RowCountMismatch { table, .. } => table,
        }
    }
}

/// Hard retirement cannot be reversed
#[derive(Debug, thiserror::Error)]
#[error(
    "hard retirement of {} cannot be reversed; restore from the backup tables or an external database snapshot",
    .tables.join(", ")
)]
pub struct DestructiveOperationError {
    /// Tables the operator asked to restore
    pub tables: Vec<String>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Config path
        path: PathBuf,
        /// I/O error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for this config
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field has an unusable value
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// What is wrong
        reason: String,
    },
}

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::FindingCode;

    #[test]
    fn entity_errors_are_not_fatal() {
        let err = MigrationError::from(EntityError::State {
            entity: EntityType::Variant,
            id: 3,
            source: StateError::IllegalTransition {
                from: "migrated",
                to: "unmigrated",
            },
        });
        assert!(!err.is_fatal());

        let err = MigrationError::from(DestructiveOperationError {
            tables: vec!["attributes".into()],
        });
        assert!(err.is_fatal());
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("attributes"));
    }

    #[test]
    fn findings_error_lists_codes() {
        let err = PreconditionError::Findings(vec![
            Finding::new(FindingCode::DuplicateSku, "sku X used twice"),
            Finding::new(FindingCode::OrphanedVariants, "1 orphan"),
        ]);
        assert_eq!(
            err.to_string(),
            "2 fatal finding(s): duplicate_sku, orphaned_variants"
        );
    }
}
