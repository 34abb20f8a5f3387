//! Backup Manager
//!
//! Snapshots tables into `<table>_backup_<YYYY_MM_DD_HHMMSS>` before anything
//! destructive happens. A backup set is all-or-nothing: if one table fails,
//! every backup created earlier in the same call is dropped again before the
//! error is returned.

use crate::audit::AuditRecorder;
use crate::error::BackupError;
use catalog_model::{EntityType, Phase};
use catalog_store::{CatalogStore, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// One table copied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub table: String,
    pub backup_table: String,
    pub rows: u64,
}

/// Why a table was not copied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Missing,
    Empty,
}

/// A table left alone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTable {
    pub table: String,
    pub reason: SkipReason,
}

/// Result of one backup call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub dry_run: bool,
    pub backed_up: Vec<BackupEntry>,
    pub skipped: Vec<SkippedTable>,
}

/// Backup table name for `table` taken at `at`
#[must_use]
pub fn backup_name(table: &str, at: DateTime<Utc>) -> String {
    format!("{table}_backup_{}", at.format("%Y_%m_%d_%H%M%S"))
}

/// True if `candidate` is a backup of `table`
fn is_backup_of(candidate: &str, table: &str) -> bool {
    candidate
        .strip_prefix(table)
        .and_then(|rest| rest.strip_prefix("_backup_"))
        .is_some_and(|stamp| {
            !stamp.is_empty() && stamp.chars().all(|c| c.is_ascii_digit() || c == '_')
        })
}

/// Backup Manager
#[derive(Debug, Clone)]
pub struct BackupManager {
    store: Arc<dyn CatalogStore>,
    recorder: AuditRecorder,
}

impl BackupManager {
    /// Create a backup manager
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>, recorder: AuditRecorder) -> Self {
        Self { store, recorder }
    }

    /// Back up every named table
    ///
    /// Absent and empty tables are skipped. A dry run inspects the tables
    /// and reports the backups it would create.
    ///
    /// # Errors
    /// Returns the first failure after dropping the backups this call
    /// created.
    pub fn backup(&self, tables: &[String], dry_run: bool) -> Result<BackupReport, BackupError> {
        let at = Utc::now();
        let mut report = BackupReport {
            dry_run,
            backed_up: Vec::new(),
            skipped: Vec::new(),
        };

        for table in tables {
            let rows = match self.inspect(table) {
                Ok(Some(rows)) => rows,
                Ok(None) => {
                    info!(table = %table, "table absent, nothing to back up");
                    report.skipped.push(SkippedTable {
                        table: table.clone(),
                        reason: SkipReason::Missing,
                    });
                    continue;
                }
                Err(e) => {
                    self.roll_back(&report.backed_up);
                    return Err(e);
                }
            };
            if rows == 0 {
                info!(table = %table, "table empty, nothing to back up");
                report.skipped.push(SkippedTable {
                    table: table.clone(),
                    reason: SkipReason::Empty,
                });
                continue;
            }

            let entry = if dry_run {
                BackupEntry {
                    table: table.clone(),
                    backup_table: backup_name(table, at),
                    rows,
                }
            } else {
                match self.backup_table(table, rows, at) {
                    Ok(entry) => entry,
                    Err(e) => {
                        error!(table = %table, error = %e, "backup failed, dropping partial backup set");
                        self.roll_back(&report.backed_up);
                        return Err(e);
                    }
                }
            };
            report.backed_up.push(entry);
        }

        info!(
            dry_run,
            backed_up = report.backed_up.len(),
            skipped = report.skipped.len(),
            "backup finished"
        );
        Ok(report)
    }

    /// Newest backup of `table`, if any
    ///
    /// # Errors
    /// Returns an error if the table list cannot be read.
    pub fn latest_backup(&self, table: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .table_names()?
            .into_iter()
            .filter(|name| is_backup_of(name, table))
            .max())
    }

    /// Drop every backup of the named tables
    ///
    /// # Errors
    /// Returns an error if a backup cannot be dropped.
    pub fn discard(&self, tables: &[String]) -> Result<Vec<String>, StoreError> {
        let names = self.store.table_names()?;
        let mut dropped = Vec::new();
        for table in tables {
            for backup in names.iter().filter(|name| is_backup_of(name, table)) {
                self.store.drop_table(backup)?;
                self.recorder.event(
                    Phase::Backup,
                    "discard_backup",
                    json!({"table": table, "backup": backup}),
                )?;
                dropped.push(backup.clone());
            }
        }
        info!(dropped = dropped.len(), "backups discarded");
        Ok(dropped)
    }

    /// Row count, or `None` if the table does not exist
    fn inspect(&self, table: &str) -> Result<Option<u64>, BackupError> {
        let wrap = |source| BackupError::Store {
            table: table.to_string(),
            source,
        };
        if !self.store.table_exists(table).map_err(wrap)? {
            return Ok(None);
        }
        self.store.row_count(table).map(Some).map_err(wrap)
    }

    fn backup_table(
        &self,
        table: &str,
        rows: u64,
        at: DateTime<Utc>,
    ) -> Result<BackupEntry, BackupError> {
        let wrap = |source| BackupError::Store {
            table: table.to_string(),
            source,
        };
        let backup_table = self.free_name(table, at).map_err(wrap)?;
        let entry = self
            .recorder
            .begin(
                Phase::Backup,
                "backup_table",
                EntityType::Table,
                None,
                Some(json!({"table": table, "rows": rows})),
            )
            .map_err(wrap)?;

        let copied = match self.copy_and_count(table, &backup_table) {
            Ok(copied) => copied,
            Err(e) => {
                self.recorder.fail(entry, &e);
                self.drop_partial(&backup_table);
                return Err(wrap(e));
            }
        };
        if copied != rows {
            let err = BackupError::RowCountMismatch {
                table: table.to_string(),
                backup: backup_table.clone(),
                expected: rows,
                copied,
            };
            self.recorder.fail(entry, &err);
            self.drop_partial(&backup_table);
            return Err(err);
        }

        let sealed = self.recorder.complete(
            entry,
            Some(json!({"backup_table": backup_table, "rows": copied})),
            Some(json!({"drop_table": backup_table})),
        );
        if let Err(e) = sealed {
            self.drop_partial(&backup_table);
            return Err(wrap(e));
        }
        info!(table, backup = %backup_table, rows = copied, "table backed up");
        Ok(BackupEntry {
            table: table.to_string(),
            backup_table,
            rows: copied,
        })
    }

    /// Drop a backup this call may have created before failing
    fn drop_partial(&self, backup_table: &str) {
        match self.store.table_exists(backup_table) {
            Ok(false) => {}
            Ok(true) => {
                if let Err(e) = self.store.drop_table(backup_table) {
                    warn!(backup = %backup_table, error = %e, "could not drop partial backup");
                }
            }
            Err(e) => {
                warn!(backup = %backup_table, error = %e, "could not check for partial backup");
            }
        }
    }

    fn copy_and_count(&self, table: &str, backup_table: &str) -> Result<u64, StoreError> {
        self.store.copy_table(table, backup_table)?;
        self.store.row_count(backup_table)
    }

    /// Timestamped name, suffixed when a backup from the same second exists
    fn free_name(&self, table: &str, at: DateTime<Utc>) -> Result<String, StoreError> {
        let base = backup_name(table, at);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.store.table_exists(&candidate)? {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        Ok(candidate)
    }

    /// Compensating rollback: drop backups created by the failed call
    fn roll_back(&self, created: &[BackupEntry]) {
        for entry in created.iter().rev() {
            match self.store.drop_table(&entry.backup_table) {
                Ok(()) => {
                    warn!(backup = %entry.backup_table, "partial backup dropped");
                    let logged = self.recorder.event(
                        Phase::Backup,
                        "rollback_backup",
                        json!({"table": entry.table, "dropped": entry.backup_table}),
                    );
                    if let Err(e) = logged {
                        warn!(error = %e, "could not audit backup rollback");
                    }
                }
                Err(e) => {
                    error!(backup = %entry.backup_table, error = %e, "could not drop partial backup");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn name_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(backup_name("attributes", at), "attributes_backup_2026_03_09_140507");
    }

    #[test]
    fn backup_matching_is_exact() {
        assert!(is_backup_of("attributes_backup_2026_03_09_140507", "attributes"));
        assert!(is_backup_of("attributes_backup_2026_03_09_140507_2", "attributes"));
        assert!(!is_backup_of("attribute_values_backup_2026_03_09_140507", "attributes"));
        assert!(!is_backup_of("attributes_backup_", "attributes"));
        assert!(!is_backup_of("attributes_backup_old", "attributes"));
    }
}
