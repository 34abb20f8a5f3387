//! Command-line tests
//!
//! Drives the built binary against SQLite files in a temp directory and
//! checks exit codes and what each command leaves behind.

use catalog_store::schema::{AUDIT_LOG, PRODUCTS};
use catalog_store::{CatalogStore, SqliteStore};
use catalog_test_utils::{add_variant, phone_sqlite_store, seed_phone_catalog, PHONE};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn catalog_migrate(db: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_catalog-migrate"));
    cmd.env_remove("CATALOG_MIGRATE_DATABASE")
        .env("RUST_LOG", "warn")
        .arg("--database")
        .arg(db)
        .args(args);
    cmd
}

fn run(db: &Path, args: &[&str]) -> Output {
    catalog_migrate(db, args).output().unwrap()
}

fn run_with_input(db: &Path, args: &[&str], input: &str) -> Output {
    let mut child = catalog_migrate(db, args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

/// Phone catalog in a closed database file
fn phone_db() -> (TempDir, PathBuf) {
    let (dir, store) = phone_sqlite_store();
    drop(store);
    let path = dir.path().join("catalog.db");
    (dir, path)
}

fn code(output: &Output) -> i32 {
    output.status.code().unwrap()
}

#[test]
fn validation_exit_code_follows_readiness() {
    let (_dir, db) = phone_db();
    assert_eq!(code(&run(&db, &["validate-variant-data"])), 0);

    let store = SqliteStore::open(&db).unwrap();
    add_variant(&store, 9, 1, "Copy", Some("PHONE-B-128"), None);
    drop(store);

    let output = run(&db, &["validate-variant-data"]);
    assert_eq!(code(&output), 1);
    assert!(String::from_utf8_lossy(&output.stdout).contains("NOT READY"));
}

#[test]
fn pipeline_dry_run_then_real_run_succeed() {
    let (_dir, db) = phone_db();

    let dry = run(&db, &["run-pipeline", "--dry-run"]);
    assert_eq!(code(&dry), 0, "{}", String::from_utf8_lossy(&dry.stdout));
    let store = SqliteStore::open_existing(&db, true).unwrap();
    assert!(!store.product(PHONE).unwrap().unwrap().migrated_to_json);
    assert!(!store.table_exists(AUDIT_LOG).unwrap());
    drop(store);

    let real = run(&db, &["run-pipeline", "--force"]);
    assert_eq!(code(&real), 0, "{}", String::from_utf8_lossy(&real.stdout));
    let store = SqliteStore::open_existing(&db, true).unwrap();
    assert!(store.product(PHONE).unwrap().unwrap().migrated_to_json);
    assert_eq!(store.catalog_counts().unwrap().pending_variants(), 0);
}

#[test]
fn verification_honours_the_retirement_mode() {
    let (_dir, db) = phone_db();
    assert_eq!(code(&run(&db, &["run-pipeline", "--force"])), 0);

    assert_eq!(code(&run(&db, &["validate-json-variant-system"])), 0);
    let hard = run(&db, &["validate-json-variant-system", "--mode", "hard"]);
    assert_eq!(code(&hard), 1);
    assert!(String::from_utf8_lossy(&hard.stdout).contains("legacy tables still present"));
}

#[test]
fn declined_migration_leaves_the_schema_alone() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("catalog.db");
    let store = SqliteStore::open(&db).unwrap();
    store.create_storefront_schema().unwrap();
    seed_phone_catalog(&store);
    drop(store);

    let output = run_with_input(&db, &["migrate-variant-data", "--prepare-schema"], "n\n");
    assert_eq!(code(&output), 1);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Aborted."));

    let store = SqliteStore::open_existing(&db, true).unwrap();
    assert!(!store
        .column_names(PRODUCTS)
        .unwrap()
        .contains(&"migrated_to_json".to_string()));
    assert!(!store.table_exists(AUDIT_LOG).unwrap());
}

#[test]
fn dry_run_on_a_missing_database_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("absent.db");

    let output = run(&db, &["run-pipeline", "--dry-run"]);
    assert_eq!(code(&output), 1);
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot open database"));
    assert!(!db.exists());
}
