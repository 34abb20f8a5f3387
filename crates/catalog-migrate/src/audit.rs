//! Audit Recorder
//!
//! Writes one `migration_audit_logs` row per step: opened when the step
//! starts, sealed exactly once when it ends. An [`AuditEntry`] is consumed
//! by sealing, so a step cannot be sealed twice through this API; the store
//! rejects a second seal as well.
//!
//! Components never call the recorder during a dry run, so a dry run leaves
//! no audit rows behind.

use catalog_model::{AuditId, AuditRecord, AuditSeal, BatchId, EntityType, Phase};
use catalog_store::{CatalogStore, StoreError};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Records audit entries for one batch
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn CatalogStore>,
    batch_id: BatchId,
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("batch_id", &self.batch_id)
            .finish_non_exhaustive()
    }
}

/// An open audit record
#[derive(Debug)]
#[must_use = "an open audit entry must be completed or failed"]
pub struct AuditEntry {
    id: AuditId,
    step: String,
    started: Instant,
}

impl AuditEntry {
    /// Store id of the open record
    #[must_use]
    pub fn id(&self) -> AuditId {
        self.id
    }
}

impl AuditRecorder {
    /// Create a recorder for a new batch
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self::for_batch(store, BatchId::new())
    }

    /// Create a recorder for an existing batch id
    #[must_use]
    pub fn for_batch(store: Arc<dyn CatalogStore>, batch_id: BatchId) -> Self {
        Self { store, batch_id }
    }

    /// Batch this recorder writes to
    #[inline]
    #[must_use]
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Create the audit table if needed
    ///
    /// # Errors
    /// Returns an error if the table cannot be created.
    pub fn prepare(&self) -> Result<(), StoreError> {
        self.store.ensure_audit_table()
    }

    /// Open a record for a starting step
    ///
    /// # Errors
    /// Returns an error if the record cannot be inserted.
    pub fn begin(
        &self,
        phase: Phase,
        step: &str,
        entity_type: EntityType,
        entity_id: Option<i64>,
        old_data: Option<Value>,
    ) -> Result<AuditEntry, StoreError> {
        let mut record = AuditRecord::begin(
            self.batch_id,
            phase,
            step,
            entity_type,
            entity_id,
            Utc::now(),
        );
        record.old_data = old_data;
        let id = self.store.insert_audit(&record)?;
        debug!(batch_id = %self.batch_id, %phase, step, audit_id = %id, "audit opened");
        Ok(AuditEntry {
            id,
            step: step.to_string(),
            started: Instant::now(),
        })
    }

    /// Seal a record as completed
    ///
    /// # Errors
    /// Returns an error if the seal cannot be written.
    pub fn complete(
        &self,
        entry: AuditEntry,
        new_data: Option<Value>,
        rollback_data: Option<Value>,
    ) -> Result<(), StoreError> {
        let seal = AuditSeal::completed(new_data, rollback_data, Utc::now(), elapsed_ms(&entry));
        self.store.seal_audit(entry.id, &seal)
    }

    /// Seal a record as failed
    ///
    /// A failure to write the seal is logged, not returned: the caller is
    /// already handling the original error.
    pub fn fail(&self, entry: AuditEntry, error: &dyn std::fmt::Display) {
        let seal = AuditSeal::failed(error.to_string(), Utc::now(), elapsed_ms(&entry));
        if let Err(e) = self.store.seal_audit(entry.id, &seal) {
            warn!(audit_id = %entry.id, step = %entry.step, error = %e, "could not seal failed audit record");
        }
    }

    /// Record a system-level event that starts and ends at once
    ///
    /// # Errors
    /// Returns an error if the record cannot be written.
    pub fn event(&self, phase: Phase, step: &str, new_data: Value) -> Result<(), StoreError> {
        let entry = self.begin(phase, step, EntityType::System, None, None)?;
        self.complete(entry, Some(new_data), None)
    }
}

fn elapsed_ms(entry: &AuditEntry) -> u64 {
    u64::try_from(entry.started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_model::AuditStatus;
    use catalog_store::MemoryStore;
    use serde_json::json;

    fn recorder() -> (Arc<MemoryStore>, AuditRecorder) {
        let store = Arc::new(MemoryStore::new());
        let recorder = AuditRecorder::new(store.clone());
        recorder.prepare().unwrap();
        (store, recorder)
    }

    #[test]
    fn complete_seals_record() {
        let (store, recorder) = recorder();
        let entry = recorder
            .begin(
                Phase::Migrate,
                "migrate_product",
                EntityType::Product,
                Some(1),
                Some(json!({"migrated_to_json": false})),
            )
            .unwrap();
        recorder
            .complete(entry, Some(json!({"migrated_to_json": true})), None)
            .unwrap();

        let records = store.audit_records(Some(recorder.batch_id())).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AuditStatus::Completed);
        assert_eq!(records[0].entity_id, Some(1));
        assert!(records[0].completed_at.is_some());
    }

    #[test]
    fn fail_records_message() {
        let (store, recorder) = recorder();
        let entry = recorder
            .begin(Phase::Backup, "backup_table", EntityType::Table, None, None)
            .unwrap();
        recorder.fail(entry, &"disk full");

        let records = store.audit_records(None).unwrap();
        assert_eq!(records[0].status, AuditStatus::Failed);
        assert_eq!(records[0].error_message.as_deref(), Some("disk full"));
    }

    #[test]
    fn batches_are_separate() {
        let (store, recorder) = recorder();
        let other = AuditRecorder::new(store.clone());
        recorder.event(Phase::Validate, "preconditions", json!({"ok": true})).unwrap();
        other.event(Phase::Verify, "verify", json!({"ok": true})).unwrap();

        assert_eq!(store.audit_records(Some(recorder.batch_id())).unwrap().len(), 1);
        assert_eq!(store.audit_records(None).unwrap().len(), 2);
    }
}
