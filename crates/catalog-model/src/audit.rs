//! Migration audit records
//!
//! An audit record is evidence, not working state. It is created when a step
//! starts (`Processing`) and sealed exactly once when the step ends
//! (`Completed` or `Failed`).

use crate::ids::{AuditId, BatchId};
use crate::state::{AuditStatus, StateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Pipeline phase a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Validate,
    Backup,
    Migrate,
    NormalizeStock,
    Retire,
    Verify,
}

impl Phase {
    /// Stored form
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Backup => "backup",
            Self::Migrate => "migrate",
            Self::NormalizeStock => "normalize_stock",
            Self::Retire => "retire",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validate" => Ok(Self::Validate),
            "backup" => Ok(Self::Backup),
            "migrate" => Ok(Self::Migrate),
            "normalize_stock" => Ok(Self::NormalizeStock),
            "retire" => Ok(Self::Retire),
            "verify" => Ok(Self::Verify),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

/// Kind of entity a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    Variant,
    Table,
    /// System-level event with no entity id
    System,
}

impl EntityType {
    /// Stored form
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Variant => "variant",
            Self::Table => "table",
            Self::System => "system",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(Self::Product),
            "variant" => Ok(Self::Variant),
            "table" => Ok(Self::Table),
            "system" => Ok(Self::System),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// One row of `migration_audit_logs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Assigned by the store on insert
    pub id: Option<AuditId>,
    pub batch_id: BatchId,
    pub phase: Phase,
    pub step: String,
    pub entity_type: EntityType,
    pub entity_id: Option<i64>,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub rollback_data: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<u64>,
}

impl AuditRecord {
    /// Open a record for a starting step (`Pending → Processing`)
    #[must_use]
    pub fn begin(
        batch_id: BatchId,
        phase: Phase,
        step: impl Into<String>,
        entity_type: EntityType,
        entity_id: Option<i64>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            batch_id,
            phase,
            step: step.into(),
            entity_type,
            entity_id,
            old_data: None,
            new_data: None,
            status: AuditStatus::Processing,
            error_message: None,
            rollback_data: None,
            started_at,
            completed_at: None,
            processing_time_ms: None,
        }
    }

    /// Attach the pre-step snapshot
    #[must_use]
    pub fn with_old_data(mut self, old_data: Value) -> Self {
        self.old_data = Some(old_data);
        self
    }

    /// Apply a seal
    ///
    /// # Errors
    /// `IllegalTransition` if the record is already sealed or the seal
    /// status is not terminal.
    pub fn apply_seal(&mut self, seal: &AuditSeal) -> Result<(), StateError> {
        self.status.validate_transition(seal.status)?;
        if !seal.status.is_sealed() {
            return Err(StateError::IllegalTransition {
                from: self.status.as_str(),
                to: seal.status.as_str(),
            });
        }
        self.status = seal.status;
        self.new_data.clone_from(&seal.new_data);
        self.error_message.clone_from(&seal.error_message);
        self.rollback_data.clone_from(&seal.rollback_data);
        self.completed_at = Some(seal.completed_at);
        self.processing_time_ms = Some(seal.processing_time_ms);
        Ok(())
    }
}

/// Terminal fields written when a step ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSeal {
    pub status: AuditStatus,
    pub new_data: Option<Value>,
    pub error_message: Option<String>,
    pub rollback_data: Option<Value>,
    pub completed_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

impl AuditSeal {
    /// Successful completion
    #[must_use]
    pub fn completed(
        new_data: Option<Value>,
        rollback_data: Option<Value>,
        completed_at: DateTime<Utc>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            status: AuditStatus::Completed,
            new_data,
            error_message: None,
            rollback_data,
            completed_at,
            processing_time_ms,
        }
    }

    /// Failure
    #[must_use]
    pub fn failed(
        error_message: impl Into<String>,
        completed_at: DateTime<Utc>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            status: AuditStatus::Failed,
            new_data: None,
            error_message: Some(error_message.into()),
            rollback_data: None,
            completed_at,
            processing_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_record() -> AuditRecord {
        AuditRecord::begin(
            BatchId::new(),
            Phase::Migrate,
            "migrate_product",
            EntityType::Product,
            Some(7),
            Utc::now(),
        )
        .with_old_data(json!({"migrated_to_json": false}))
    }

    #[test]
    fn begin_opens_processing_record() {
        let record = open_record();
        assert_eq!(record.status, AuditStatus::Processing);
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn seal_applies_once() {
        let mut record = open_record();
        let seal = AuditSeal::completed(Some(json!({"migrated_to_json": true})), None, Utc::now(), 4);

        record.apply_seal(&seal).unwrap();
        assert_eq!(record.status, AuditStatus::Completed);
        assert_eq!(record.processing_time_ms, Some(4));

        let again = AuditSeal::failed("late failure", Utc::now(), 9);
        assert!(record.apply_seal(&again).is_err());
        assert_eq!(record.status, AuditStatus::Completed);
        assert!(record.error_message.is_none());
    }

    #[test]
    fn phase_and_entity_parse() {
        assert_eq!("normalize_stock".parse::<Phase>(), Ok(Phase::NormalizeStock));
        assert_eq!("table".parse::<EntityType>(), Ok(EntityType::Table));
        assert!("cleanup".parse::<Phase>().is_err());
    }
}
