//! Backup and retirement integration tests
//!
//! Covers backup fidelity, compensating rollback of a partial backup set,
//! and the gates in front of hard retirement.

use catalog_migrate::{
    AuditRecorder, BackupError, BackupManager, LegacyRetirement, MigrationError,
    MigrationExecutor, PreconditionError, RetirementAction, RetirementMode, SkipReason,
};
use catalog_model::{AuditStatus, Phase};
use catalog_store::schema::{
    ATTRIBUTES, ATTRIBUTE_VALUES, LEGACY_TABLES, PRODUCT_LINKS, VARIANT_LINKS,
};
use catalog_store::{CatalogStore, MemoryStore, RowSink};
use catalog_test_utils::{phone_memory_store, row, V1, V2, V3};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn legacy_tables() -> Vec<String> {
    LEGACY_TABLES.iter().map(|t| (*t).to_string()).collect()
}

fn recorder(store: &Arc<MemoryStore>) -> AuditRecorder {
    let recorder = AuditRecorder::new(store.clone());
    recorder.prepare().unwrap();
    recorder
}

fn backup_tables(store: &MemoryStore) -> Vec<String> {
    store
        .table_names()
        .unwrap()
        .into_iter()
        .filter(|t| t.contains("_backup_"))
        .collect()
}

fn migrate(store: &Arc<MemoryStore>) {
    let summary = MigrationExecutor::new(store.clone(), recorder(store))
        .migrate(100, false)
        .unwrap();
    assert!(summary.is_success());
}

#[test]
fn backup_copies_every_row() {
    let store = Arc::new(phone_memory_store());
    let manager = BackupManager::new(store.clone(), recorder(&store));

    let report = manager.backup(&legacy_tables(), false).unwrap();
    assert_eq!(report.backed_up.len(), 4);
    assert!(report.skipped.is_empty());
    for entry in &report.backed_up {
        assert_eq!(store.row_count(&entry.table).unwrap(), entry.rows);
        assert_eq!(store.row_count(&entry.backup_table).unwrap(), entry.rows);
        assert_eq!(store.rows(&entry.backup_table).unwrap(), store.rows(&entry.table).unwrap());
    }
    let rows: Vec<u64> = report.backed_up.iter().map(|e| e.rows).collect();
    assert_eq!(rows, vec![6, 1, 5, 3]);
}

#[test]
fn failed_copy_drops_the_partial_set() {
    let store = Arc::new(phone_memory_store());
    store.fail_copy_of(ATTRIBUTE_VALUES);
    let recorder = recorder(&store);
    let manager = BackupManager::new(store.clone(), recorder.clone());

    let err = manager.backup(&legacy_tables(), false).unwrap_err();
    assert_eq!(err.table(), ATTRIBUTE_VALUES);
    assert!(matches!(err, BackupError::Store { .. }));
    assert!(backup_tables(&store).is_empty());

    let records = store.audit_records(Some(recorder.batch_id())).unwrap();
    let rollbacks = records
        .iter()
        .filter(|r| r.step == "rollback_backup")
        .count();
    assert_eq!(rollbacks, 2);
    assert!(records
        .iter()
        .any(|r| r.phase == Phase::Backup && r.status == AuditStatus::Failed));
}

#[test]
fn failed_count_after_copy_drops_the_new_backup() {
    let store = Arc::new(phone_memory_store());
    store.fail_count_after_copy_of(ATTRIBUTE_VALUES);
    let manager = BackupManager::new(store.clone(), recorder(&store));

    let err = manager.backup(&legacy_tables(), false).unwrap_err();
    assert_eq!(err.table(), ATTRIBUTE_VALUES);
    assert!(backup_tables(&store).is_empty());
    assert!(legacy_tables().iter().all(|t| store.table_exists(t).unwrap()));
}

#[test]
fn failed_audit_seal_drops_the_new_backup() {
    let store = Arc::new(phone_memory_store());
    let manager = BackupManager::new(store.clone(), recorder(&store));
    store.fail_audit_seals();

    let err = manager.backup(&legacy_tables(), false).unwrap_err();
    assert!(matches!(err, BackupError::Store { .. }));
    assert_eq!(err.table(), LEGACY_TABLES[0]);
    assert!(backup_tables(&store).is_empty());
}

#[test]
fn missing_and_empty_tables_are_skipped() {
    let store = Arc::new(phone_memory_store());
    store.drop_table(PRODUCT_LINKS).unwrap();
    store.delete_variants(&[V1, V2, V3]).unwrap();
    let manager = BackupManager::new(store.clone(), recorder(&store));

    let report = manager.backup(&legacy_tables(), false).unwrap();
    let skipped: Vec<(&str, SkipReason)> = report
        .skipped
        .iter()
        .map(|s| (s.table.as_str(), s.reason))
        .collect();
    assert_eq!(
        skipped,
        vec![(VARIANT_LINKS, SkipReason::Empty), (PRODUCT_LINKS, SkipReason::Missing)]
    );
    assert_eq!(report.backed_up.len(), 2);
}

#[test]
fn dry_run_backup_creates_nothing() {
    let store = Arc::new(phone_memory_store());
    let before = store.snapshot();
    let manager = BackupManager::new(store.clone(), AuditRecorder::new(store.clone()));

    let report = manager.backup(&legacy_tables(), true).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.backed_up.len(), 4);
    assert_eq!(store.snapshot(), before);
}

#[test]
fn latest_backup_and_discard() {
    let store = Arc::new(phone_memory_store());
    let manager = BackupManager::new(store.clone(), recorder(&store));
    assert_eq!(manager.latest_backup(ATTRIBUTES).unwrap(), None);

    let first = manager.backup(&[ATTRIBUTES.to_string()], false).unwrap();
    let second = manager.backup(&[ATTRIBUTES.to_string()], false).unwrap();
    let newest = &second.backed_up[0].backup_table;
    assert_ne!(&first.backed_up[0].backup_table, newest);
    assert_eq!(manager.latest_backup(ATTRIBUTES).unwrap().as_ref(), Some(newest));
    assert_eq!(manager.latest_backup(ATTRIBUTE_VALUES).unwrap(), None);

    let dropped = manager.discard(&[ATTRIBUTES.to_string()]).unwrap();
    assert_eq!(dropped.len(), 2);
    assert!(backup_tables(&store).is_empty());
    assert!(store.table_exists(ATTRIBUTES).unwrap());
}

#[test]
fn soft_retirement_round_trips() {
    let store = Arc::new(phone_memory_store());
    let before = store.rows(ATTRIBUTES).unwrap();
    let retirement = LegacyRetirement::new(store.clone(), recorder(&store));

    let report = retirement
        .retire(RetirementMode::Soft, &legacy_tables(), false)
        .unwrap();
    assert_eq!(report.tables.len(), 4);
    assert!(report
        .tables
        .iter()
        .all(|t| t.action == RetirementAction::Stamped));
    assert!(store
        .rows(ATTRIBUTES)
        .unwrap()
        .iter()
        .all(|r| r.get("deprecated_at").is_some_and(|v| !v.is_null())));

    let undone = retirement
        .reverse(RetirementMode::Soft, &legacy_tables(), false)
        .unwrap();
    assert!(undone.reverse);
    assert_eq!(undone.tables[3].rows, 3);
    assert_eq!(store.rows(ATTRIBUTES).unwrap(), before);
}

#[test]
fn hard_retirement_requires_completed_migration() {
    let store = Arc::new(phone_memory_store());
    let retirement = LegacyRetirement::new(store.clone(), recorder(&store));

    let err = retirement
        .retire(RetirementMode::Hard, &legacy_tables(), false)
        .unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Precondition(PreconditionError::Findings(_))
    ));
    assert!(legacy_tables()
        .iter()
        .all(|t| store.table_exists(t).unwrap()));
}

#[test]
fn hard_retirement_requires_a_current_backup() {
    let store = Arc::new(phone_memory_store());
    migrate(&store);
    let recorder = recorder(&store);
    let retirement = LegacyRetirement::new(store.clone(), recorder.clone());

    let err = retirement
        .retire(RetirementMode::Hard, &legacy_tables(), false)
        .unwrap_err();
    match err {
        MigrationError::Precondition(PreconditionError::MissingBackup { table }) => {
            assert_eq!(table, VARIANT_LINKS);
        }
        other => panic!("expected missing backup, got {other}"),
    }

    BackupManager::new(store.clone(), recorder)
        .backup(&legacy_tables(), false)
        .unwrap();
    store
        .insert_row(
            ATTRIBUTES,
            &row(json!({"id": 4, "name": "Size", "type": "select", "purpose": "variant"})),
        )
        .unwrap();
    let err = retirement
        .retire(RetirementMode::Hard, &legacy_tables(), false)
        .unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Precondition(PreconditionError::StaleBackup { backup_rows: 3, .. })
    ));
    assert!(store.table_exists(VARIANT_LINKS).unwrap());
}

#[test]
fn hard_retirement_drops_tables_and_keeps_backups() {
    let store = Arc::new(phone_memory_store());
    migrate(&store);
    let recorder = recorder(&store);
    BackupManager::new(store.clone(), recorder.clone())
        .backup(&legacy_tables(), false)
        .unwrap();

    let retirement = LegacyRetirement::new(store.clone(), recorder.clone());
    let report = retirement
        .retire(RetirementMode::Hard, &legacy_tables(), false)
        .unwrap();
    assert_eq!(report.tables.len(), 4);
    for table in &report.tables {
        assert_eq!(table.action, RetirementAction::Dropped);
        assert!(!store.table_exists(&table.table).unwrap());
        let backup = table.backup_table.as_deref().unwrap();
        assert_eq!(store.row_count(backup).unwrap(), table.rows);
    }

    let drops: Vec<_> = store
        .audit_records(Some(recorder.batch_id()))
        .unwrap()
        .into_iter()
        .filter(|r| r.step == "drop_table")
        .collect();
    assert_eq!(drops.len(), 4);
    assert!(drops.iter().all(|r| r.status == AuditStatus::Completed
        && r.rollback_data.as_ref().is_some_and(|d| d["restore_from"].is_string())));
}

#[test]
fn hard_retirement_cannot_be_reversed() {
    let store = Arc::new(phone_memory_store());
    let retirement = LegacyRetirement::new(store.clone(), recorder(&store));

    let err = retirement
        .reverse(RetirementMode::Hard, &legacy_tables(), false)
        .unwrap_err();
    match err {
        MigrationError::Destructive(e) => assert_eq!(e.tables, legacy_tables()),
        other => panic!("expected destructive operation error, got {other}"),
    }
}

#[test]
fn dry_run_retirement_reports_without_touching_tables() {
    let store = Arc::new(phone_memory_store());
    let before = store.snapshot();
    let retirement = LegacyRetirement::new(store.clone(), AuditRecorder::new(store.clone()));

    let report = retirement
        .retire(RetirementMode::Soft, &legacy_tables(), true)
        .unwrap();
    assert!(report.dry_run);
    assert_eq!(report.tables[0].rows, 6);
    let preview = retirement
        .retire_preview(RetirementMode::Hard, &legacy_tables())
        .unwrap();
    assert!(preview
        .tables
        .iter()
        .all(|t| t.action == RetirementAction::Dropped));
    assert_eq!(store.snapshot(), before);
}
