use anyhow::{bail, Context};
use catalog_migrate::{
    document, export_json, AuditRecorder, BackupManager, DocFormat, LegacyRetirement,
    MigrationConfig, MigrationError, MigrationExecutor, Pipeline, PipelineOptions,
    PostMigrationValidator, PreconditionValidator, RetirementMode, StockNormalizer,
    ValidationMode, ValidationReport, VerifyOptions, VerifyReport,
};
use catalog_model::{BatchId, ProductId};
use catalog_store::{CatalogStore, SqliteStore};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::{json, Map, Value};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const STEPS: [&str; 4] = ["validate", "backup", "cleanup", "verify"];

fn dry_run_arg() -> Arg {
    Arg::new("dry-run")
        .long("dry-run")
        .action(ArgAction::SetTrue)
        .help("Report what would change without writing anything")
}

fn force_arg() -> Arg {
    Arg::new("force")
        .long("force")
        .action(ArgAction::SetTrue)
        .help("Skip the confirmation prompt")
}

fn export_arg() -> Arg {
    Arg::new("export")
        .long("export")
        .value_parser(value_parser!(PathBuf))
        .help("Also write the report as JSON to this path")
}

fn batch_size_arg() -> Arg {
    Arg::new("batch-size")
        .long("batch-size")
        .value_parser(value_parser!(usize))
        .help("Products per page (default from config, else 100)")
}

fn mode_arg() -> Arg {
    Arg::new("mode")
        .long("mode")
        .value_parser(["soft", "hard"])
        .help("Retirement mode (default from config, else soft)")
}

fn cli() -> Command {
    Command::new("catalog-migrate")
        .version(catalog_migrate::VERSION)
        .about("Staged migration of legacy catalog variant attributes to JSON options")
        .subcommand_required(true)
        .arg(
            Arg::new("database")
                .long("database")
                .global(true)
                .env("CATALOG_MIGRATE_DATABASE")
                .value_parser(value_parser!(PathBuf))
                .help("SQLite database file"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("migrate-variant-data")
                .about("Migrate legacy attribute links into JSON options")
                .arg(batch_size_arg())
                .arg(dry_run_arg())
                .arg(force_arg())
                .arg(
                    Arg::new("prepare-schema")
                        .long("prepare-schema")
                        .action(ArgAction::SetTrue)
                        .help("Add missing tracking columns before migrating"),
                )
                .arg(export_arg()),
        )
        .subcommand(
            Command::new("validate-variant-data")
                .about("Check that the catalog is ready for migration")
                .arg(export_arg())
                .arg(
                    Arg::new("fix-orphans")
                        .long("fix-orphans")
                        .action(ArgAction::SetTrue)
                        .help("Delete variants whose product no longer exists"),
                )
                .arg(dry_run_arg())
                .arg(force_arg()),
        )
        .subcommand(
            Command::new("cleanup-legacy-variant-system")
                .about("Back up and retire the legacy attribute tables")
                .arg(
                    Arg::new("step")
                        .long("step")
                        .value_parser(STEPS)
                        .help("Run a single step (default: all, in order)"),
                )
                .arg(
                    Arg::new("table")
                        .long("table")
                        .action(ArgAction::Append)
                        .help("Legacy table to include (repeatable; default from config)"),
                )
                .arg(mode_arg())
                .arg(
                    Arg::new("reverse")
                        .long("reverse")
                        .action(ArgAction::SetTrue)
                        .help("Undo a soft retirement"),
                )
                .arg(dry_run_arg())
                .arg(force_arg())
                .arg(
                    Arg::new("keep-backup")
                        .long("keep-backup")
                        .action(ArgAction::SetTrue)
                        .help("Keep backup tables after a successful verify"),
                )
                .arg(export_arg()),
        )
        .subcommand(
            Command::new("normalize-stock-tracking")
                .about("Move stock ownership to variants")
                .arg(dry_run_arg())
                .arg(force_arg())
                .arg(export_arg()),
        )
        .subcommand(
            Command::new("run-pipeline")
                .about("Run every stage in order under one batch id")
                .arg(batch_size_arg())
                .arg(mode_arg())
                .arg(dry_run_arg())
                .arg(force_arg())
                .arg(
                    Arg::new("keep-backup")
                        .long("keep-backup")
                        .action(ArgAction::SetTrue)
                        .help("Keep backup tables after a successful verify"),
                )
                .arg(export_arg()),
        )
        .subcommand(
            Command::new("validate-json-variant-system")
                .about("Verify the migrated JSON representation")
                .arg(mode_arg())
                .arg(export_arg()),
        )
        .subcommand(
            Command::new("document-variant-config")
                .about("Document the JSON shapes and option keys in use")
                .arg(
                    Arg::new("output")
                        .long("output")
                        .default_value("docs")
                        .value_parser(value_parser!(PathBuf))
                        .help("Output directory"),
                )
                .arg(
                    Arg::new("format")
                        .long("format")
                        .default_value("markdown")
                        .value_parser(["json", "markdown"])
                        .help("Output format"),
                ),
        )
        .subcommand(
            Command::new("audit-log")
                .about("Print recorded audit entries")
                .arg(Arg::new("batch").long("batch").help("Only this batch id"))
                .arg(export_arg()),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Config file values with CLI overrides applied
fn load_config(matches: &ArgMatches) -> anyhow::Result<MigrationConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => MigrationConfig::load(path)?,
        None => MigrationConfig::new(),
    };
    if let Some(db) = matches.get_one::<PathBuf>("database") {
        config = config.with_database(db);
    }
    Ok(config)
}

fn apply_overrides(
    mut config: MigrationConfig,
    args: &ArgMatches,
) -> anyhow::Result<MigrationConfig> {
    if let Some(size) = args.try_get_one::<usize>("batch-size").ok().flatten() {
        config = config.with_batch_size(*size);
    }
    if let Some(mode) = args.try_get_one::<String>("mode").ok().flatten() {
        config = config.with_retirement_mode(mode.parse().map_err(anyhow::Error::msg)?);
    }
    if let Some(tables) = args.try_get_many::<String>("table").ok().flatten() {
        config = config.with_legacy_tables(tables.cloned().collect());
    }
    if args.try_get_one::<bool>("keep-backup").ok().flatten() == Some(&true) {
        config = config.with_keep_backup(true);
    }
    config.validate()?;
    Ok(config)
}

/// Open the configured database; it must exist, and commands that only
/// read open it read-only
fn open_store(
    config: &MigrationConfig,
    read_only: bool,
) -> anyhow::Result<Arc<dyn CatalogStore>> {
    let Some(path) = config.database.as_deref() else {
        bail!("no database given; pass --database or set CATALOG_MIGRATE_DATABASE");
    };
    let store = SqliteStore::open_existing(path, read_only)
        .with_context(|| format!("cannot open database {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Ask on stdin; `--force` and dry runs never ask
fn confirm(args: &ArgMatches, action: &str) -> anyhow::Result<bool> {
    let dry_run = args.try_get_one::<bool>("dry-run").ok().flatten() == Some(&true);
    if dry_run || args.get_flag("force") {
        return Ok(true);
    }
    print!("{action}. Continue? [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn maybe_export(args: &ArgMatches, report: &impl serde::Serialize) -> anyhow::Result<()> {
    if let Some(path) = args.get_one::<PathBuf>("export") {
        export_json(path, report)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn print_validation(report: &ValidationReport) {
    if let Some(stats) = &report.stats {
        println!("  Products with variants: {}", stats.counts.products_with_variants);
        println!(
            "  Migrated products: {} ({:.1}%)",
            stats.counts.migrated_products,
            stats.product_completion * 100.0
        );
        println!(
            "  Migrated variants: {} of {} ({:.1}%)",
            stats.counts.migrated_variants,
            stats.counts.total_variants,
            stats.variant_completion * 100.0
        );
        println!("  Pending variants: {}", stats.pending_variants);
        println!("  Legacy variant links: {}", stats.counts.legacy_variant_links);
    }
    for finding in &report.errors {
        println!("  ERROR   {finding}");
    }
    for finding in &report.warnings {
        println!("  WARNING {finding}");
    }
    println!("  Status: {}", if report.ok { "READY" } else { "NOT READY" });
}

fn print_verify(report: &VerifyReport) {
    if let Some(stats) = &report.stats {
        println!(
            "  Migrated products: {:.1}%, variants: {:.1}%",
            stats.product_completion * 100.0,
            stats.variant_completion * 100.0
        );
    }
    for finding in &report.issues {
        println!("  ISSUE   {finding}");
    }
    for finding in &report.warnings {
        println!("  WARNING {finding}");
    }
    println!("  Status: {}", if report.ok { "PASSED" } else { "FAILED" });
}

/// Products whose changes committed but whose audit record stayed open
fn print_unaudited(products: &[ProductId]) {
    if products.is_empty() {
        return;
    }
    let ids: Vec<String> = products.iter().map(ToString::to_string).collect();
    println!("  Unaudited: {} ({})", products.len(), ids.join(", "));
}

fn cmd_migrate(config: &MigrationConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let dry_run = args.get_flag("dry-run");
    let store = open_store(config, dry_run)?;
    if !confirm(args, "This will migrate legacy variant data to JSON")? {
        println!("Aborted.");
        return Ok(false);
    }

    if args.get_flag("prepare-schema") {
        if dry_run {
            println!("Dry run: tracking columns would be added where missing");
        } else {
            let added = store.ensure_tracking_columns()?;
            if added.is_empty() {
                println!("Tracking columns already present");
            } else {
                println!("Tracking columns added: {}", added.join(", "));
            }
        }
    }
    if !dry_run {
        store.ensure_audit_table()?;
    }

    let recorder = AuditRecorder::new(store.clone());
    println!(
        "Migrating variant data (batch {}, batch size {})...",
        recorder.batch_id(),
        config.batch_size
    );
    if dry_run {
        println!("DRY RUN: no changes will be written");
    }
    let executor = MigrationExecutor::new(store, recorder);
    let summary = match executor.migrate(config.batch_size, dry_run) {
        Ok(summary) => summary,
        Err(MigrationError::Precondition(e)) => {
            println!("Migration refused: {e}");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    println!();
    println!("Migration Summary:");
    println!("  Products migrated: {}", summary.migrated);
    println!("  Variants migrated: {}", summary.variants_migrated);
    println!("  Variants already migrated: {}", summary.skipped);
    println!("  Errors: {}", summary.errors);
    for failure in &summary.failures {
        println!("    product {}: {}", failure.product_id, failure.message);
    }
    print_unaudited(&summary.unaudited);
    maybe_export(args, &summary)?;
    Ok(summary.is_success())
}

fn cmd_validate(config: &MigrationConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let dry_run = args.get_flag("dry-run");
    let store = open_store(config, dry_run || !args.get_flag("fix-orphans"))?;
    let validator = PreconditionValidator::new(store.clone());

    let mut repair = None;
    if args.get_flag("fix-orphans") {
        if confirm(args, "This will delete variants whose product no longer exists")? {
            let recorder = AuditRecorder::new(store.clone());
            if !dry_run {
                recorder.prepare()?;
            }
            let fixed = validator.fix_orphans(&recorder, dry_run)?;
            println!(
                "Orphaned variants: {} found, {} deleted{}",
                fixed.found.len(),
                fixed.deleted,
                if dry_run { " (dry run)" } else { "" }
            );
            repair = Some(fixed);
        } else {
            println!("Orphan repair skipped.");
        }
    }

    println!("Validating variant data...");
    let report = validator.validate(ValidationMode::BeforeMigration)?;
    print_validation(&report);
    maybe_export(args, &json!({"validation": report, "orphan_repair": repair}))?;
    Ok(report.ok)
}

fn cmd_cleanup(config: &MigrationConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let dry_run = args.get_flag("dry-run");
    let store = open_store(config, dry_run)?;
    let mode = config.retirement_mode;
    let tables = &config.legacy_tables;
    let recorder = AuditRecorder::new(store.clone());
    let mut exported = Map::new();

    if args.get_flag("reverse") {
        let action = format!("This will reverse the {mode} retirement of {}", tables.join(", "));
        if !confirm(args, &action)? {
            println!("Aborted.");
            return Ok(false);
        }
        if !dry_run {
            recorder.prepare()?;
        }
        return match LegacyRetirement::new(store, recorder).reverse(mode, tables, dry_run) {
            Ok(report) => {
                for t in &report.tables {
                    println!("  {}: {} stamps cleared", t.table, t.rows);
                }
                maybe_export(args, &report)?;
                Ok(true)
            }
            Err(MigrationError::Destructive(e)) => {
                println!("{e}");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        };
    }

    let steps: Vec<&str> = match args.get_one::<String>("step") {
        Some(step) => vec![step.as_str()],
        None => STEPS.to_vec(),
    };
    let mutating = steps.iter().any(|s| matches!(*s, "backup" | "cleanup"));
    let action = format!("This will {mode}-retire {}", tables.join(", "));
    if mutating && !confirm(args, &action)? {
        println!("Aborted.");
        return Ok(false);
    }
    if mutating && !dry_run {
        recorder.prepare()?;
    }

    let backups = BackupManager::new(store.clone(), recorder.clone());
    let mut ok = true;
    for step in steps {
        println!("Step: {step}");
        match step {
            "validate" => {
                let report = PreconditionValidator::new(store.clone())
                    .validate(ValidationMode::Completion)?;
                print_validation(&report);
                ok = report.ok;
                exported.insert("validation".into(), serde_json::to_value(&report)?);
            }
            "backup" => {
                let report = backups.backup(tables, dry_run)?;
                for entry in &report.backed_up {
                    println!("  {} -> {} ({} rows)", entry.table, entry.backup_table, entry.rows);
                }
                for skipped in &report.skipped {
                    println!("  {} skipped ({:?})", skipped.table, skipped.reason);
                }
                exported.insert("backup".into(), serde_json::to_value(&report)?);
            }
            "cleanup" => {
                let retirement = LegacyRetirement::new(store.clone(), recorder.clone());
                match retirement.retire(mode, tables, dry_run) {
                    Ok(report) => {
                        for t in &report.tables {
                            println!("  {}: {:?} ({} rows)", t.table, t.action, t.rows);
                        }
                        exported.insert("retirement".into(), serde_json::to_value(&report)?);
                    }
                    Err(MigrationError::Precondition(e)) => {
                        println!("  Retirement refused: {e}");
                        ok = false;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            "verify" => {
                let report = PostMigrationValidator::new(store.clone()).verify(&VerifyOptions {
                    legacy_tables: tables.clone(),
                    expect_legacy_dropped: mode == RetirementMode::Hard && !dry_run,
                    page_size: config.batch_size,
                })?;
                print_verify(&report);
                ok = report.ok;
                exported.insert("verification".into(), serde_json::to_value(&report)?);
                if ok && !dry_run && !config.keep_backup && mode == RetirementMode::Soft {
                    let dropped = backups.discard(tables)?;
                    println!("  Backups discarded: {}", dropped.len());
                }
            }
            other => bail!("unknown step {other}"),
        }
        if !ok {
            println!("Stopped at step {step}.");
            break;
        }
    }
    maybe_export(args, &Value::Object(exported))?;
    Ok(ok)
}

fn cmd_normalize(config: &MigrationConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let dry_run = args.get_flag("dry-run");
    let store = open_store(config, dry_run)?;
    if !confirm(args, "This will rewrite stock-tracking flags")? {
        println!("Aborted.");
        return Ok(false);
    }
    let recorder = AuditRecorder::new(store.clone());
    if !dry_run {
        recorder.prepare()?;
    }
    let summary = StockNormalizer::new(store, recorder)
        .with_page_size(config.batch_size)
        .normalize(dry_run)?;
    println!("Stock Tracking Summary:");
    println!("  Products fixed: {}", summary.products_fixed);
    println!("  Variants fixed: {}", summary.variants_fixed);
    println!("  Errors: {}", summary.errors);
    print_unaudited(&summary.unaudited);
    maybe_export(args, &summary)?;
    Ok(summary.errors == 0 && summary.unaudited.is_empty())
}

fn cmd_pipeline(config: &MigrationConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let dry_run = args.get_flag("dry-run");
    let store = open_store(config, dry_run)?;
    let opts = PipelineOptions::from(config).with_dry_run(dry_run);
    let action = format!("This will run the full migration with {} retirement", opts.mode);
    if !confirm(args, &action)? {
        println!("Aborted.");
        return Ok(false);
    }
    let report = Pipeline::new(store).run(&opts);

    println!("Pipeline Report (batch {}):", report.batch_id);
    if let Some(v) = &report.validation {
        println!("  Validate: {}", if v.ok { "ok" } else { "failed" });
    }
    if let Some(b) = &report.backup {
        println!("  Backup: {} tables", b.backed_up.len());
    }
    if let Some(m) = &report.migration {
        println!(
            "  Migrate: {} products, {} variants, {} errors",
            m.migrated, m.variants_migrated, m.errors
        );
        print_unaudited(&m.unaudited);
    }
    if let Some(s) = &report.stock {
        println!("  Normalize: {} entities fixed", s.fixed());
        print_unaudited(&s.unaudited);
    }
    if let Some(r) = &report.retirement {
        println!("  Retire: {} tables ({})", r.tables.len(), r.mode);
    }
    if let Some(v) = &report.verification {
        print_verify(v);
    }
    if let (Some(phase), Some(error)) = (report.halted_at, &report.error) {
        println!("  Halted at {phase}: {error}");
    }
    maybe_export(args, &report)?;
    Ok(report.ok())
}

fn cmd_verify(config: &MigrationConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let store = open_store(config, true)?;
    println!("Verifying JSON variant system...");
    let report = PostMigrationValidator::new(store).verify(&VerifyOptions::from(config))?;
    print_verify(&report);
    maybe_export(args, &report)?;
    Ok(report.ok)
}

fn cmd_document(config: &MigrationConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let store = open_store(config, true)?;
    let format: DocFormat = args
        .get_one::<String>("format")
        .map_or(Ok(DocFormat::default()), |f| f.parse())
        .map_err(anyhow::Error::msg)?;
    let dir = args
        .get_one::<PathBuf>("output")
        .map_or_else(|| Path::new("docs").to_path_buf(), Clone::clone);
    let doc = document(&store, config.batch_size)?;
    let path = doc.write_to(&dir, format)?;
    println!(
        "Documented {} option keys, {} attribute keys",
        doc.option_keys.len(),
        doc.attribute_keys.len()
    );
    println!("Written to {}", path.display());
    Ok(true)
}

fn cmd_audit_log(config: &MigrationConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let store = open_store(config, true)?;
    let batch = args
        .get_one::<String>("batch")
        .map(|b| b.parse::<BatchId>())
        .transpose()
        .context("invalid batch id")?;
    let records = store.audit_records(batch)?;
    for r in &records {
        println!(
            "{} {} {:<15} {:<28} {} {} {}{}",
            r.started_at.to_rfc3339(),
            r.batch_id,
            r.phase,
            r.step,
            r.entity_type,
            r.entity_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
            r.status,
            r.error_message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default()
        );
    }
    println!("{} audit records", records.len());
    maybe_export(args, &records)?;
    Ok(true)
}

fn run() -> anyhow::Result<bool> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));
    let base = load_config(&matches)?;

    let Some((name, args)) = matches.subcommand() else {
        return Ok(false);
    };
    let config = apply_overrides(base, args)?;
    match name {
        "migrate-variant-data" => cmd_migrate(&config, args),
        "validate-variant-data" => cmd_validate(&config, args),
        "cleanup-legacy-variant-system" => cmd_cleanup(&config, args),
        "normalize-stock-tracking" => cmd_normalize(&config, args),
        "run-pipeline" => cmd_pipeline(&config, args),
        "validate-json-variant-system" => cmd_verify(&config, args),
        "document-variant-config" => cmd_document(&config, args),
        "audit-log" => cmd_audit_log(&config, args),
        _ => Ok(false),
    }
}

fn main() {
    match run() {
        Ok(ok) => std::process::exit(if ok { 0 } else { 1 }),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
