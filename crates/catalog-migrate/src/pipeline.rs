//! Pipeline runner
//!
//! Runs every stage in order under one batch id:
//! validate → backup → migrate → normalize stock → retire → verify.
//! The first failing gate halts the run; the report carries the outcome of
//! every stage that ran.

use crate::audit::AuditRecorder;
use crate::backup::{BackupManager, BackupReport};
use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::executor::{MigrationExecutor, MigrationSummary};
use crate::precondition::{PreconditionValidator, ValidationMode, ValidationReport};
use crate::retirement::{LegacyRetirement, RetirementMode, RetirementReport};
use crate::stock::{NormalizeSummary, StockNormalizer};
use crate::verify::{PostMigrationValidator, VerifyOptions, VerifyReport};
use catalog_model::{BatchId, Phase};
use catalog_store::CatalogStore;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Pipeline settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub batch_size: usize,
    pub mode: RetirementMode,
    pub legacy_tables: Vec<String>,
    pub dry_run: bool,
    pub keep_backup: bool,
}

impl From<&MigrationConfig> for PipelineOptions {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            mode: config.retirement_mode,
            legacy_tables: config.legacy_tables.clone(),
            dry_run: false,
            keep_backup: config.keep_backup,
        }
    }
}

impl PipelineOptions {
    /// With dry-run flag
    #[inline]
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Outcome of every stage that ran
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub batch_id: BatchId,
    pub dry_run: bool,
    pub validation: Option<ValidationReport>,
    pub backup: Option<BackupReport>,
    pub migration: Option<MigrationSummary>,
    pub stock: Option<NormalizeSummary>,
    pub retirement: Option<RetirementReport>,
    pub verification: Option<VerifyReport>,
    pub discarded_backups: Vec<String>,
    /// Stage that stopped the run
    pub halted_at: Option<Phase>,
    pub error: Option<String>,
}

impl PipelineReport {
    fn new(batch_id: BatchId, dry_run: bool) -> Self {
        Self {
            batch_id,
            dry_run,
            validation: None,
            backup: None,
            migration: None,
            stock: None,
            retirement: None,
            verification: None,
            discarded_backups: Vec::new(),
            halted_at: None,
            error: None,
        }
    }

    /// True if every stage ran and verification passed
    ///
    /// A dry run only needs to reach the end: verification then describes
    /// the catalog as it is, not as it would be.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.halted_at.is_none()
            && self
                .verification
                .as_ref()
                .is_some_and(|v| v.ok || self.dry_run)
    }

    fn halt(&mut self, phase: Phase, reason: impl std::fmt::Display) {
        error!(batch_id = %self.batch_id, %phase, reason = %reason, "pipeline halted");
        self.halted_at = Some(phase);
        self.error = Some(reason.to_string());
    }
}

/// Pipeline runner
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: Arc<dyn CatalogStore>,
    recorder: AuditRecorder,
}

impl Pipeline {
    /// Create a runner with a fresh batch id
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        let recorder = AuditRecorder::new(store.clone());
        Self { store, recorder }
    }

    /// Batch id every stage records under
    #[must_use]
    pub fn batch_id(&self) -> BatchId {
        self.recorder.batch_id()
    }

    /// Run all stages
    ///
    /// Stage failures end up in the report; the report itself is always
    /// returned.
    #[must_use]
    pub fn run(&self, opts: &PipelineOptions) -> PipelineReport {
        let mut report = PipelineReport::new(self.batch_id(), opts.dry_run);
        info!(
            batch_id = %report.batch_id,
            dry_run = opts.dry_run,
            mode = %opts.mode,
            "pipeline started"
        );
        if let Err(e) = self.run_stages(opts, &mut report) {
            let phase = report.halted_at.unwrap_or(Phase::Validate);
            report.halt(phase, e);
        }
        info!(batch_id = %report.batch_id, ok = report.ok(), "pipeline finished");
        report
    }

    fn run_stages(
        &self,
        opts: &PipelineOptions,
        report: &mut PipelineReport,
    ) -> Result<(), MigrationError> {
        let dry_run = opts.dry_run;
        if !dry_run {
            self.recorder.prepare()?;
        }

        // Stage markers are set before each stage so an error lands on it.
        report.halted_at = Some(Phase::Validate);
        let validation = PreconditionValidator::new(self.store.clone())
            .validate(ValidationMode::BeforeMigration)?;
        let valid = validation.ok;
        let codes: Vec<&str> = validation.errors.iter().map(|f| f.code.as_str()).collect();
        if !dry_run {
            self.recorder.event(
                Phase::Validate,
                "preconditions",
                json!({"ok": valid, "errors": codes, "warnings": validation.warnings.len()}),
            )?;
        }
        report.validation = Some(validation);
        if !valid {
            report.halt(Phase::Validate, format!("precondition findings: {}", codes.join(", ")));
            return Ok(());
        }

        report.halted_at = Some(Phase::Backup);
        let backups = BackupManager::new(self.store.clone(), self.recorder.clone());
        report.backup = Some(backups.backup(&opts.legacy_tables, dry_run)?);

        report.halted_at = Some(Phase::Migrate);
        let migration = MigrationExecutor::new(self.store.clone(), self.recorder.clone())
            .migrate(opts.batch_size, dry_run)?;
        let failed = migration.errors;
        report.migration = Some(migration);
        if failed > 0 {
            report.halt(Phase::Migrate, format!("{failed} products failed to migrate"));
            return Ok(());
        }

        report.halted_at = Some(Phase::NormalizeStock);
        let stock = StockNormalizer::new(self.store.clone(), self.recorder.clone())
            .with_page_size(opts.batch_size)
            .normalize(dry_run)?;
        let failed = stock.errors;
        report.stock = Some(stock);
        if failed > 0 {
            report.halt(Phase::NormalizeStock, format!("{failed} stock fixes failed"));
            return Ok(());
        }

        report.halted_at = Some(Phase::Retire);
        let retirement = LegacyRetirement::new(self.store.clone(), self.recorder.clone());
        report.retirement = Some(if dry_run {
            retirement.retire_preview(opts.mode, &opts.legacy_tables)?
        } else {
            retirement.retire(opts.mode, &opts.legacy_tables, false)?
        });

        report.halted_at = Some(Phase::Verify);
        let verification = PostMigrationValidator::new(self.store.clone()).verify(&VerifyOptions {
            legacy_tables: opts.legacy_tables.clone(),
            expect_legacy_dropped: opts.mode == RetirementMode::Hard && !dry_run,
            page_size: opts.batch_size,
        })?;
        let verified = verification.ok;
        let issues = verification.issues.len();
        report.verification = Some(verification);
        if !dry_run {
            self.recorder.event(
                Phase::Verify,
                "post_migration",
                json!({"ok": verified, "issues": issues}),
            )?;
        }
        // The last stage has not failed unless verification says so.
        report.halted_at = None;
        if !verified && !dry_run {
            report.halt(Phase::Verify, format!("{issues} verification issues"));
            return Ok(());
        }

        // Hard retirement keeps its backups: they are the only restore path.
        if !dry_run && !opts.keep_backup && opts.mode == RetirementMode::Soft {
            report.halted_at = Some(Phase::Backup);
            report.discarded_backups = backups.discard(&opts.legacy_tables)?;
            report.halted_at = None;
        } else if !dry_run {
            info!(batch_id = %report.batch_id, mode = %opts.mode, "backup tables kept");
        }
        Ok(())
    }
}
