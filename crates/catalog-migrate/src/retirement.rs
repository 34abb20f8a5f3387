//! Legacy Retirement
//!
//! Soft retirement stamps `deprecated_at` on every legacy row and can be
//! reversed. Hard retirement drops the tables and cannot: it is gated on a
//! fully migrated catalog and on a current backup of every non-empty table,
//! and all gates are checked before the first drop.

use crate::audit::AuditRecorder;
use crate::backup::BackupManager;
use crate::error::{DestructiveOperationError, PreconditionError, Result};
use crate::precondition::{PreconditionValidator, ValidationMode};
use catalog_model::{EntityType, Phase};
use catalog_store::CatalogStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// How legacy tables are retired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetirementMode {
    /// Stamp rows with `deprecated_at`; reversible
    #[default]
    Soft,
    /// Drop tables; irreversible
    Hard,
}

impl RetirementMode {
    /// Stable string form
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for RetirementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetirementMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "soft" => Ok(Self::Soft),
            "hard" => Ok(Self::Hard),
            other => Err(format!("unknown retirement mode: {other} (expected soft or hard)")),
        }
    }
}

/// What happened to a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetirementAction {
    /// Rows stamped `deprecated_at`
    Stamped,
    /// Stamps removed
    Cleared,
    /// Table dropped
    Dropped,
}

/// One retired (or restored) table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRetirement {
    pub table: String,
    pub action: RetirementAction,
    /// Rows affected; in a dry run, rows in the table
    pub rows: u64,
    /// Backup a dropped table can be restored from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_table: Option<String>,
}

/// Result of a retirement call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetirementReport {
    pub mode: RetirementMode,
    pub dry_run: bool,
    pub reverse: bool,
    pub tables: Vec<TableRetirement>,
    /// Named tables that do not exist
    pub skipped: Vec<String>,
}

impl RetirementReport {
    fn new(mode: RetirementMode, dry_run: bool, reverse: bool) -> Self {
        Self {
            mode,
            dry_run,
            reverse,
            tables: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Legacy Retirement
#[derive(Debug, Clone)]
pub struct LegacyRetirement {
    store: Arc<dyn CatalogStore>,
    recorder: AuditRecorder,
    backups: BackupManager,
    validator: PreconditionValidator,
}

impl LegacyRetirement {
    /// Create a retirement component
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>, recorder: AuditRecorder) -> Self {
        Self {
            backups: BackupManager::new(store.clone(), recorder.clone()),
            validator: PreconditionValidator::new(store.clone()),
            store,
            recorder,
        }
    }

    /// Retire the named tables
    ///
    /// A dry run still evaluates the hard-mode gates.
    ///
    /// # Errors
    /// `Precondition` if a hard-mode gate fails (nothing is dropped), or
    /// `Store` if a table operation fails.
    pub fn retire(
        &self,
        mode: RetirementMode,
        tables: &[String],
        dry_run: bool,
    ) -> Result<RetirementReport> {
        match mode {
            RetirementMode::Soft => self.soft_retire(tables, dry_run),
            RetirementMode::Hard => {
                let backups = self.check_hard_gates(tables)?;
                self.hard_retire(tables, &backups, dry_run)
            }
        }
    }

    /// Report what `retire` would do without evaluating any gate
    ///
    /// Used when earlier stages ran as a dry run, so the catalog cannot yet
    /// satisfy the hard-mode gates.
    ///
    /// # Errors
    /// Returns an error if a table cannot be inspected.
    pub fn retire_preview(
        &self,
        mode: RetirementMode,
        tables: &[String],
    ) -> Result<RetirementReport> {
        let action = match mode {
            RetirementMode::Soft => RetirementAction::Stamped,
            RetirementMode::Hard => RetirementAction::Dropped,
        };
        let mut report = RetirementReport::new(mode, true, false);
        for table in tables {
            if !self.store.table_exists(table)? {
                report.skipped.push(table.clone());
                continue;
            }
            report.tables.push(TableRetirement {
                table: table.clone(),
                action,
                rows: self.store.row_count(table)?,
                backup_table: None,
            });
        }
        Ok(report)
    }

    /// Undo a retirement
    ///
    /// # Errors
    /// Hard retirement always fails with `Destructive`; soft reversal fails
    /// with `Store` if stamps cannot be cleared.
    pub fn reverse(
        &self,
        mode: RetirementMode,
        tables: &[String],
        dry_run: bool,
    ) -> Result<RetirementReport> {
        if mode == RetirementMode::Hard {
            error!(tables = ?tables, "hard retirement cannot be reversed");
            return Err(DestructiveOperationError {
                tables: tables.to_vec(),
            }
            .into());
        }

        let mut report = RetirementReport::new(mode, dry_run, true);
        for table in tables {
            if !self.store.table_exists(table)? {
                report.skipped.push(table.clone());
                continue;
            }
            let rows = if dry_run {
                self.store.row_count(table)?
            } else {
                let entry = self.recorder.begin(
                    Phase::Retire,
                    "clear_deprecated",
                    EntityType::Table,
                    None,
                    Some(json!({"table": table})),
                )?;
                match self.store.clear_deprecated(table) {
                    Ok(cleared) => {
                        let new_data = json!({"table": table, "cleared": cleared});
                        self.recorder.complete(entry, Some(new_data), None)?;
                        cleared
                    }
                    Err(e) => {
                        self.recorder.fail(entry, &e);
                        return Err(e.into());
                    }
                }
            };
            info!(table = %table, rows, dry_run, "deprecation stamps cleared");
            report.tables.push(TableRetirement {
                table: table.clone(),
                action: RetirementAction::Cleared,
                rows,
                backup_table: None,
            });
        }
        Ok(report)
    }

    fn soft_retire(&self, tables: &[String], dry_run: bool) -> Result<RetirementReport> {
        let mut report = RetirementReport::new(RetirementMode::Soft, dry_run, false);
        let at = Utc::now();
        for table in tables {
            if !self.store.table_exists(table)? {
                info!(table = %table, "table absent, nothing to retire");
                report.skipped.push(table.clone());
                continue;
            }
            let rows = if dry_run {
                self.store.row_count(table)?
            } else {
                let entry = self.recorder.begin(
                    Phase::Retire,
                    "soft_retire",
                    EntityType::Table,
                    None,
                    Some(json!({"table": table})),
                )?;
                match self.store.stamp_deprecated(table, at) {
                    Ok(stamped) => {
                        self.recorder.complete(
                            entry,
                            Some(json!({"table": table, "stamped": stamped, "deprecated_at": at})),
                            Some(json!({"clear_deprecated": table})),
                        )?;
                        stamped
                    }
                    Err(e) => {
                        self.recorder.fail(entry, &e);
                        return Err(e.into());
                    }
                }
            };
            info!(table = %table, rows, dry_run, "table soft-retired");
            report.tables.push(TableRetirement {
                table: table.clone(),
                action: RetirementAction::Stamped,
                rows,
                backup_table: None,
            });
        }
        Ok(report)
    }

    /// Every hard-mode gate; returns the backup chosen for each non-empty
    /// table
    fn check_hard_gates(&self, tables: &[String]) -> Result<Vec<(String, Option<String>)>> {
        self.validator
            .validate(ValidationMode::Completion)?
            .into_result()?;

        let mut chosen = Vec::with_capacity(tables.len());
        for table in tables {
            if !self.store.table_exists(table)? {
                continue;
            }
            let rows = self.store.row_count(table)?;
            if rows == 0 {
                chosen.push((table.clone(), None));
                continue;
            }
            let backup = self.backups.latest_backup(table)?.ok_or_else(|| {
                PreconditionError::MissingBackup {
                    table: table.clone(),
                }
            })?;
            let backup_rows = self.store.row_count(&backup)?;
            if backup_rows != rows {
                return Err(PreconditionError::StaleBackup {
                    table: table.clone(),
                    backup,
                    table_rows: rows,
                    backup_rows,
                }
                .into());
            }
            chosen.push((table.clone(), Some(backup)));
        }
        Ok(chosen)
    }

    fn hard_retire(
        &self,
        tables: &[String],
        backups: &[(String, Option<String>)],
        dry_run: bool,
    ) -> Result<RetirementReport> {
        let mut report = RetirementReport::new(RetirementMode::Hard, dry_run, false);
        for table in tables {
            let Some((_, backup)) = backups.iter().find(|(t, _)| t == table) else {
                report.skipped.push(table.clone());
                continue;
            };
            let rows = self.store.row_count(table)?;
            if !dry_run {
                let entry = self.recorder.begin(
                    Phase::Retire,
                    "drop_table",
                    EntityType::Table,
                    None,
                    Some(json!({"table": table, "rows": rows})),
                )?;
                if let Err(e) = self.store.drop_table(table) {
                    self.recorder.fail(entry, &e);
                    return Err(e.into());
                }
                self.recorder.complete(
                    entry,
                    Some(json!({"dropped": table})),
                    Some(json!({"restore_from": backup})),
                )?;
                warn!(table = %table, rows, backup = ?backup, "legacy table dropped");
            }
            report.tables.push(TableRetirement {
                table: table.clone(),
                action: RetirementAction::Dropped,
                rows,
                backup_table: backup.clone(),
            });
        }
        Ok(report)
    }
}
