//! Pipeline integration tests
//!
//! Full runs on both store backends, plus documentation of the migrated
//! catalog.

use catalog_migrate::{
    document, DocFormat, FindingCode, MigrationConfig, Pipeline, PipelineOptions,
    RetirementAction, RetirementMode,
};
use catalog_model::{AuditStatus, Phase};
use catalog_store::schema::{ATTRIBUTES, LEGACY_TABLES, VARIANTS};
use catalog_store::{CatalogStore, RowSink};
use catalog_test_utils::{add_variant, phone_memory_store, phone_sqlite_store, row, PHONE};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn options(mode: RetirementMode) -> PipelineOptions {
    let mut opts = PipelineOptions::from(&MigrationConfig::new());
    opts.mode = mode;
    opts.keep_backup = false;
    opts
}

fn backup_count(store: &dyn CatalogStore) -> usize {
    store
        .table_names()
        .unwrap()
        .iter()
        .filter(|t| t.contains("_backup_"))
        .count()
}

#[test]
fn soft_pipeline_migrates_and_discards_backups() {
    let store = Arc::new(phone_memory_store());
    let pipeline = Pipeline::new(store.clone());

    let report = pipeline.run(&options(RetirementMode::Soft));
    assert!(report.ok(), "pipeline failed: {:?}", report.error);
    assert_eq!(report.batch_id, pipeline.batch_id());
    assert_eq!(report.migration.as_ref().unwrap().variants_migrated, 3);
    assert_eq!(report.stock.as_ref().unwrap().products_fixed, 2);
    assert_eq!(report.discarded_backups.len(), 4);
    assert_eq!(backup_count(&*store), 0);

    let verification = report.verification.as_ref().unwrap();
    assert!(verification.issues.is_empty());
    assert!(!verification.warnings.is_empty());
    assert!(LEGACY_TABLES.iter().all(|t| store.table_exists(t).unwrap()));

    let records = store.audit_records(Some(report.batch_id)).unwrap();
    assert!(records.iter().all(|r| r.status == AuditStatus::Completed));
    assert!(records.iter().any(|r| r.phase == Phase::Verify));
}

#[test]
fn hard_pipeline_drops_legacy_tables_and_keeps_backups() {
    let store = Arc::new(phone_memory_store());
    let report = Pipeline::new(store.clone()).run(&options(RetirementMode::Hard));

    assert!(report.ok(), "pipeline failed: {:?}", report.error);
    let retirement = report.retirement.as_ref().unwrap();
    assert!(retirement
        .tables
        .iter()
        .all(|t| t.action == RetirementAction::Dropped));
    assert!(LEGACY_TABLES.iter().all(|t| !store.table_exists(t).unwrap()));
    assert!(report.discarded_backups.is_empty());
    assert_eq!(backup_count(&*store), 4);
}

#[test]
fn dry_run_pipeline_changes_nothing() {
    let store = Arc::new(phone_memory_store());
    let before = store.snapshot();

    let report = Pipeline::new(store.clone()).run(&options(RetirementMode::Hard).with_dry_run(true));
    assert!(report.ok(), "pipeline failed: {:?}", report.error);
    assert!(report.dry_run);
    assert_eq!(report.migration.as_ref().unwrap().variants_migrated, 3);
    assert_eq!(report.retirement.as_ref().unwrap().tables.len(), 4);
    assert_eq!(store.snapshot(), before);
}

#[test]
fn duplicate_sku_halts_at_validation() {
    let store = Arc::new(phone_memory_store());
    add_variant(&*store, 9, 1, "Copy", Some("PHONE-B-128"), None);

    let report = Pipeline::new(store.clone()).run(&options(RetirementMode::Soft));
    assert!(!report.ok());
    assert_eq!(report.halted_at, Some(Phase::Validate));
    assert!(report.error.as_deref().unwrap().contains("duplicate_sku"));
    assert!(report.backup.is_none());
    assert!(report.migration.is_none());
    assert_eq!(backup_count(&*store), 0);
    assert!(!store.product(PHONE).unwrap().unwrap().migrated_to_json);
}

#[test]
fn untracked_variant_of_plain_product_does_not_block_the_run() {
    let store = Arc::new(phone_memory_store());
    store
        .insert_row(
            VARIANTS,
            &row(json!({"id": 9, "product_id": 2, "name": "Stray", "sku": "CABLE-1M",
                        "price": 500, "track_inventory": false})),
        )
        .unwrap();

    let report = Pipeline::new(store.clone()).run(&options(RetirementMode::Soft));
    assert!(report.ok(), "pipeline failed: {:?}", report.error);
    let verification = report.verification.as_ref().unwrap();
    assert!(verification.issues.is_empty());
    let mismatch = verification
        .warnings
        .iter()
        .find(|w| w.code == FindingCode::VariantFlagMismatch)
        .unwrap();
    assert_eq!(mismatch.entities, vec![9]);
}

#[test]
fn failed_backup_discard_halts_at_backup() {
    let store = Arc::new(phone_memory_store());
    store.fail_drop_of(&format!("{ATTRIBUTES}_backup_"));

    let report = Pipeline::new(store.clone()).run(&options(RetirementMode::Soft));
    assert!(!report.ok());
    assert_eq!(report.halted_at, Some(Phase::Backup));
    assert!(report.verification.as_ref().unwrap().ok);
    assert!(report.error.as_deref().unwrap().contains("drop of"));
    assert!(store.product(PHONE).unwrap().unwrap().migrated_to_json);
}

#[test]
fn sqlite_pipeline_runs_end_to_end() {
    let (_dir, store) = phone_sqlite_store();
    let store = Arc::new(store);

    let report = Pipeline::new(store.clone()).run(&options(RetirementMode::Soft));
    assert!(report.ok(), "pipeline failed: {:?}", report.error);
    let phone = store.product(PHONE).unwrap().unwrap();
    assert!(phone.migrated_to_json);
    assert!(!phone.track_inventory);
    assert_eq!(store.catalog_counts().unwrap().pending_variants(), 0);
    assert_eq!(backup_count(&*store), 0);
}

#[test]
fn migrated_catalog_is_documented() {
    let store = Arc::new(phone_memory_store());
    assert!(Pipeline::new(store.clone())
        .run(&options(RetirementMode::Soft))
        .ok());

    let store: Arc<dyn CatalogStore> = store;
    let doc = document(&store, 2).unwrap();
    let keys: Vec<(&str, u64)> = doc
        .option_keys
        .iter()
        .map(|k| (k.key.as_str(), k.occurrences))
        .collect();
    assert_eq!(keys, vec![("color", 3), ("storage", 3)]);
    assert!(doc.option_keys[0].attribute_types.contains("select"));
    assert_eq!(doc.attribute_keys[0].key, "material");
    assert_eq!(doc.undecodable, 0);

    let dir = TempDir::new().unwrap();
    let md = doc.write_to(dir.path(), DocFormat::Markdown).unwrap();
    let json = doc.write_to(dir.path(), DocFormat::Json).unwrap();
    assert!(md.ends_with("variant-config.md"));
    assert!(std::fs::read_to_string(&md).unwrap().contains("storage"));
    let decoded: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
    assert!(decoded["schemas"]["options"].is_object());
}
