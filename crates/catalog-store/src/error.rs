//! Store errors

use catalog_model::{AuditId, PayloadError, StateError};
use thiserror::Error;

/// Errors raised by a [`crate::CatalogStore`] backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("unknown column {column} in {table}")]
    UnknownColumn { table: String, column: String },

    #[error("{table} row {id} not found")]
    RowNotFound { table: String, id: i64 },

    #[error("unique constraint violated on {table} ({columns})")]
    UniqueViolation { table: String, columns: String },

    #[error("audit record {id} cannot be sealed: {source}")]
    AuditSeal {
        id: AuditId,
        #[source]
        source: StateError,
    },

    #[error("cannot decode {table} row: {message}")]
    Decode { table: String, message: String },

    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("injected fault: {0}")]
    Injected(String),
}

impl StoreError {
    /// Create a decode error
    #[inline]
    #[must_use]
    pub fn decode(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a row-not-found error
    #[inline]
    #[must_use]
    pub fn row_not_found(table: impl Into<String>, id: i64) -> Self {
        Self::RowNotFound {
            table: table.into(),
            id,
        }
    }

    /// True if the error concerns one row rather than the whole store
    #[must_use]
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            Self::RowNotFound { .. }
                | Self::UniqueViolation { .. }
                | Self::Decode { .. }
                | Self::Payload(_)
                | Self::Injected(_)
        )
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
