//! State machines
//!
//! Two lifecycles are modeled explicitly instead of through scattered flag
//! checks:
//! - a catalog entity moves `Unmigrated → Migrated`, never back
//! - an audit record moves `Pending → Processing → {Completed, Failed}` and
//!   is sealed once it reaches a terminal state

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Transition not in the allowed table
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Source state
        from: &'static str,
        /// Requested state
        to: &'static str,
    },

    /// Stored status text not recognised
    #[error("unknown status: {0}")]
    UnknownStatus(String),
}

/// Per-entity migration state (`migrated_to_json`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Still described by the legacy attribute graph
    Unmigrated,
    /// JSON representation is authoritative
    Migrated,
}

impl MigrationState {
    /// From the stored flag
    #[inline]
    #[must_use]
    pub fn from_flag(migrated_to_json: bool) -> Self {
        if migrated_to_json {
            Self::Migrated
        } else {
            Self::Unmigrated
        }
    }

    /// Stored flag value
    #[inline]
    #[must_use]
    pub fn as_flag(self) -> bool {
        matches!(self, Self::Migrated)
    }

    /// Name used in errors and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unmigrated => "unmigrated",
            Self::Migrated => "migrated",
        }
    }

    /// States reachable from `self`
    #[must_use]
    pub fn allowed_transitions(self) -> Vec<MigrationState> {
        match self {
            Self::Unmigrated => vec![Self::Migrated],
            Self::Migrated => vec![],
        }
    }

    /// The single authoritative transition: `Unmigrated → Migrated`
    ///
    /// # Errors
    /// `IllegalTransition` when `self` is already `Migrated`.
    pub fn advance(self) -> Result<MigrationState, StateError> {
        validate_transition(self, Self::Migrated)?;
        Ok(Self::Migrated)
    }
}

/// Validates an entity state transition.
pub fn validate_transition(from: MigrationState, to: MigrationState) -> Result<(), StateError> {
    if from.allowed_transitions().contains(&to) {
        Ok(())
    } else {
        Err(StateError::IllegalTransition {
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

/// Audit record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AuditStatus {
    /// Stored form
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states; a record in one of these is sealed
    #[inline]
    #[must_use]
    pub fn is_sealed(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// States reachable from `self`
    #[must_use]
    pub fn allowed_transitions(self) -> Vec<AuditStatus> {
        use AuditStatus::*;
        match self {
            Pending => vec![Processing, Failed],
            Processing => vec![Completed, Failed],
            Completed => vec![],
            Failed => vec![],
        }
    }

    /// Validates an audit status transition.
    ///
    /// # Errors
    /// `IllegalTransition` for anything outside the table, including any
    /// transition out of a sealed state.
    pub fn validate_transition(self, to: AuditStatus) -> Result<(), StateError> {
        if self.allowed_transitions().contains(&to) {
            Ok(())
        } else {
            Err(StateError::IllegalTransition {
                from: self.as_str(),
                to: to.as_str(),
            })
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StateError::UnknownStatus(other.to_string())),
        }
    }
}
