use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;

use crate::decision::{DecisionSurface, MigrationConfirmation};
use crate::identity::Identity;
use crate::keys::{ContentKind, PartitionLayout, StorageKeys};
use crate::migration::backup::{digest, BackupPayload, BackupSnapshot, BackupSummary, BackupVault};
use crate::migration::error::{MigrationError, MigrationResult};
use crate::migration::progress::{
    batch_count, estimate_seconds, format_bytes, ProgressSink, ProgressTracker,
};
use crate::migration::state::{
    FailureKind, MigrationOutcome, MigrationPhase, MigrationPreview, MigrationRecord,
    MigrationStep, MigrationSummary, NotNeededReason,
};
use crate::primitives::activity::{ActivityReporter, ActivitySink};
use crate::primitives::config::{current_config, HandoffConfig};
use crate::primitives::partition_store::{PartitionStore, PartitionStoreExt, StoreError};
use crate::primitives::now_ms;
use crate::session::SessionPointer;

const ALREADY_RUNNING: &str =
    "Migration is already in progress. Please wait for the current migration to complete.";

/// The source partitions of one migration, as read before anything is written.
struct SourceContent {
    partitions: BTreeMap<ContentKind, String>,
    items: Vec<serde_json::Value>,
    has_draft: bool,
    byte_size: u64,
}

impl SourceContent {
    fn item_count(&self) -> u64 {
        self.items.len() as u64
    }
}

/// A failure that triggers a rollback.
struct TransferFailure {
    kind: FailureKind,
    message: String,
}

impl TransferFailure {
    fn transfer(e: impl std::fmt::Display) -> Self {
        Self {
            kind: FailureKind::Transfer,
            message: e.to_string(),
        }
    }
}

/// Moves a legacy account's content to a federated identity.
///
/// ## Phases
///
/// `Idle -> Detecting -> AwaitingUserConfirmation -> BackingUp -> Transferring ->
/// Verifying -> Recording -> CleaningUp -> Complete`
///
/// A failure while backing up leaves everything untouched. A failure (or a cancellation)
/// while transferring or verifying restores both sides from the backup and ends in
/// `Failed`. If that restore fails too, [`MigrationError::RollbackFailed`] is returned
/// with the id of the backup to restore by hand.
///
/// ## Storage
///
/// | key | value |
/// |-----|-------|
/// | `<ns>_migrationBackup_<id>` | JSON [`BackupSnapshot`] |
/// | `<ns>_migrationRecord` | JSON [`MigrationRecord`] of the last migration |
/// | `<ns>_migrationHistory` | JSON array of the last records |
///
/// ## Concurrency
///
/// One migration runs at a time per manager. A second call while one is in flight fails
/// immediately with `MigrationError::InvalidOperation` instead of waiting.
#[derive(uniffi::Object)]
pub struct MigrationManager {
    store: Arc<dyn PartitionStore>,
    decisions: Arc<dyn DecisionSurface>,
    progress_sink: Option<Arc<dyn ProgressSink>>,
    activity: ActivityReporter,
    keys: StorageKeys,
    config: HandoffConfig,
    run_lock: AsyncMutex<()>,
    phase: Mutex<MigrationPhase>,
    cancel_requested: AtomicBool,
}

#[crate::handoff_export]
impl MigrationManager {
    /// Creates a manager using the global [`HandoffConfig`].
    #[uniffi::constructor]
    pub fn new(
        store: Arc<dyn PartitionStore>,
        decisions: Arc<dyn DecisionSurface>,
        progress_sink: Option<Arc<dyn ProgressSink>>,
        activity_sink: Option<Arc<dyn ActivitySink>>,
    ) -> Arc<Self> {
        Arc::new(Self::with_config(
            store,
            decisions,
            progress_sink,
            ActivityReporter::new(activity_sink),
            current_config(),
        ))
    }

    /// Migrates the signed-in legacy account to `target` after the user confirms.
    ///
    /// Returns `NotNeeded` when the session is not a legacy account with content, and
    /// `Cancelled` when the user declines the preview.
    ///
    /// # Errors
    /// - `InvalidOperation` if a migration is already in progress
    /// - `RollbackFailed` if a failed migration could not be undone
    /// - `Store` if the session pointer cannot be read
    pub async fn migrate_active_session(
        &self,
        target: Identity,
    ) -> MigrationResult<MigrationOutcome> {
        let _guard = self.try_acquire()?;

        self.set_phase(MigrationPhase::Detecting);
        let Some(source) = self.detect_active_legacy(&target)? else {
            self.set_phase(MigrationPhase::Idle);
            return Ok(MigrationOutcome::NotNeeded {
                reason: NotNeededReason::NoActiveLegacySession,
            });
        };

        self.confirm_and_migrate_locked(source, target).await
    }

    /// Shows the preview for `source -> target`, and migrates if the user confirms.
    ///
    /// # Errors
    /// Same as [`MigrationManager::perform_migration`].
    pub async fn confirm_and_migrate(
        &self,
        source: Identity,
        target: Identity,
    ) -> MigrationResult<MigrationOutcome> {
        let _guard = self.try_acquire()?;
        self.set_phase(MigrationPhase::Detecting);
        self.confirm_and_migrate_locked(source, target).await
    }

    /// Migrates `source` to `target` without asking.
    ///
    /// Idempotent: once a pair has been migrated and the source is empty, repeating the
    /// call returns `NotNeeded` and writes nothing. Content written under the source
    /// afterwards is migrated by the next call.
    ///
    /// # Errors
    /// - `InvalidOperation` if a migration is already in progress
    /// - `RollbackFailed` if a failed migration could not be undone
    pub async fn perform_migration(
        &self,
        source: Identity,
        target: Identity,
    ) -> MigrationResult<MigrationOutcome> {
        let _guard = self.try_acquire()?;
        self.set_phase(MigrationPhase::Detecting);
        self.run_locked(source, target).await
    }

    /// The preview for `source -> target` without asking anything.
    ///
    /// # Errors
    /// `InvalidIdentity`, store failures, or `JsonError` for a malformed source collection.
    pub fn analyze(&self, source: Identity, target: Identity) -> MigrationResult<MigrationPreview> {
        let content = self.read_source(&source)?;
        Ok(self.preview(&source, &target, &content))
    }

    /// Requests cancellation of the running migration.
    ///
    /// Honoured between batches while backing up or transferring; the migration then
    /// rolls back. Returns `false` if nothing cancellable is running.
    pub fn cancel(&self) -> bool {
        let phase = self.current_phase();
        if !matches!(
            phase,
            MigrationPhase::BackingUp | MigrationPhase::Transferring
        ) {
            return false;
        }
        crate::info!("migration.cancel_requested phase={phase}");
        self.cancel_requested.store(true, Ordering::SeqCst);
        true
    }

    pub fn current_phase(&self) -> MigrationPhase {
        *self
            .phase
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The last successful migration, if any. A corrupted record reads as none.
    pub fn migration_record(&self) -> Option<MigrationRecord> {
        self.read_json(&self.keys.migration_record())
    }

    /// Previous migrations, oldest first.
    pub fn migration_history(&self) -> Vec<MigrationRecord> {
        self.read_json(&self.keys.migration_history())
            .unwrap_or_default()
    }

    /// Every stored backup, oldest first.
    ///
    /// # Errors
    /// Store failures while enumerating.
    pub fn list_backups(&self) -> MigrationResult<Vec<BackupSummary>> {
        BackupVault::new(self.store.as_ref(), &self.keys).summaries()
    }

    /// Restores both sides of a migration from backup `backup_id`.
    ///
    /// This is the manual recovery path after `RollbackFailed`.
    ///
    /// # Errors
    /// - `InvalidOperation` if a migration is in progress
    /// - `BackupNotFound` / `BackupCorrupted`
    /// - the first store failure while restoring
    pub fn restore_backup(&self, backup_id: String) -> MigrationResult<()> {
        let _guard = self.try_acquire()?;
        let vault = BackupVault::new(self.store.as_ref(), &self.keys);
        let snapshot = vault.read(&backup_id)?;
        vault.restore(&snapshot)?;
        self.activity.report(
            "backup_restored",
            "Backup restored",
            &[
                ("backup_id", backup_id),
                ("source", snapshot.source.to_string()),
            ],
        );
        Ok(())
    }

    /// Deletes backups older than the retention period. Returns how many were removed.
    ///
    /// # Errors
    /// - `InvalidOperation` if a migration is in progress
    /// - store failures while enumerating
    pub fn prune_backups(&self) -> MigrationResult<u32> {
        let _guard = self.try_acquire()?;
        BackupVault::new(self.store.as_ref(), &self.keys)
            .prune(now_ms(), self.config.backup_retention_days)
    }
}

impl MigrationManager {
    /// Creates a manager with an explicit configuration.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn PartitionStore>,
        decisions: Arc<dyn DecisionSurface>,
        progress_sink: Option<Arc<dyn ProgressSink>>,
        activity: ActivityReporter,
        config: HandoffConfig,
    ) -> Self {
        Self {
            store,
            decisions,
            progress_sink,
            activity,
            keys: StorageKeys::new(&config.namespace),
            config,
            run_lock: AsyncMutex::new(()),
            phase: Mutex::new(MigrationPhase::Idle),
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// The legacy identity the session points at, if it differs from `target` and owns
    /// content.
    ///
    /// # Errors
    /// Store failures while reading the session or the partitions.
    pub fn detect_active_legacy(&self, target: &Identity) -> MigrationResult<Option<Identity>> {
        let session = SessionPointer::new(self.store.as_ref(), &self.keys).current()?;
        let Some(current @ Identity::Legacy { .. }) = session else {
            return Ok(None);
        };
        if &current == target || !self.has_content(&current)? {
            return Ok(None);
        }
        crate::info!("migration.detected source={current} target={target}");
        Ok(Some(current))
    }

    fn has_content(&self, identity: &Identity) -> Result<bool, StoreError> {
        for kind in ContentKind::all() {
            if self
                .store
                .get_optional(&self.keys.content(kind, identity))?
                .is_some()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn try_acquire(&self) -> MigrationResult<tokio::sync::MutexGuard<'_, ()>> {
        self.run_lock
            .try_lock()
            .map_err(|_| MigrationError::InvalidOperation(ALREADY_RUNNING.to_string()))
    }

    fn set_phase(&self, phase: MigrationPhase) {
        let mut current = self
            .phase
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *current != phase {
            crate::debug!("migration.phase from={} to={phase}", *current);
            *current = phase;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get_optional(key) {
            Ok(raw) => raw?,
            Err(e) => {
                crate::warn!("migration.read_failed key={key} error={e}");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .inspect_err(|e| crate::warn!("migration.corrupted_entry key={key} error={e}"))
            .ok()
    }

    async fn confirm_and_migrate_locked(
        &self,
        source: Identity,
        target: Identity,
    ) -> MigrationResult<MigrationOutcome> {
        if let Err(message) = self.validate(&source, &target) {
            return Ok(self.validation_failure(&message));
        }
        let content = match self.read_source(&source) {
            Ok(content) => content,
            Err(MigrationError::Store(e)) => {
                return Ok(self.failure(FailureKind::Backup, &e.to_string(), false, None));
            }
            Err(e) => return Ok(self.validation_failure(&e.to_string())),
        };
        if content.partitions.is_empty() {
            return Ok(self.nothing_to_migrate(&source, &target));
        }

        let preview = self.preview(&source, &target, &content);
        self.set_phase(MigrationPhase::AwaitingUserConfirmation);
        let confirmation = self
            .decisions
            .confirm_migration(preview)
            .await
            .unwrap_or_else(|e| {
                crate::warn!("migration.confirmation_failed treating_as=cancel error={e}");
                MigrationConfirmation::Cancel
            });

        if confirmation != MigrationConfirmation::Confirm {
            self.set_phase(MigrationPhase::Idle);
            self.activity.report(
                "migration_cancelled",
                "Migration declined",
                &[("source", source.to_string()), ("target", target.to_string())],
            );
            return Ok(MigrationOutcome::Cancelled);
        }

        self.run_locked(source, target).await
    }

    /// Runs every phase after confirmation. Must be called with `run_lock` held.
    async fn run_locked(
        &self,
        source: Identity,
        target: Identity,
    ) -> MigrationResult<MigrationOutcome> {
        self.cancel_requested.store(false, Ordering::SeqCst);

        if let Err(message) = self.validate(&source, &target) {
            return Ok(self.validation_failure(&message));
        }

        let content = match self.read_source(&source) {
            Ok(content) => content,
            Err(MigrationError::Store(e)) => {
                return Ok(self.failure(FailureKind::Backup, &e.to_string(), false, None));
            }
            Err(e) => return Ok(self.validation_failure(&e.to_string())),
        };
        if content.partitions.is_empty() {
            return Ok(self.nothing_to_migrate(&source, &target));
        }

        let migration_id = generate_migration_id(now_ms());
        let tracker = ProgressTracker::start(self.progress_sink.clone(), content.item_count());
        crate::info!(
            "migration.started migration_id={migration_id} source={source} target={target} items={}",
            content.item_count()
        );
        self.activity.report(
            "migration_started",
            "Migration started",
            &[
                ("migration_id", migration_id.clone()),
                ("source", source.to_string()),
                ("target", target.to_string()),
                ("item_count", content.item_count().to_string()),
            ],
        );

        // Backing up
        self.set_phase(MigrationPhase::BackingUp);
        tracker.report(MigrationStep::Backup, 0, 0);
        let snapshot = match self.back_up(&migration_id, &source, &target, &content) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let message = format!("Backup failed: {e}");
                tracker.fail(&message);
                return Ok(self.failure(FailureKind::Backup, &message, false, None));
            }
        };
        tracker.report(MigrationStep::Backup, 0, 10);

        // Transferring and verifying
        if let Err(failure) = self.transfer_and_verify(&source, &target, &content, &tracker).await
        {
            tracker.fail(&failure.message);
            return self.roll_back(&snapshot, failure);
        }

        // Recording
        self.set_phase(MigrationPhase::Recording);
        tracker.report(MigrationStep::Finalize, content.item_count(), 90);
        let mut warnings = Vec::new();
        let record = MigrationRecord {
            migration_id: migration_id.clone(),
            source: source.clone(),
            target: target.clone(),
            migrated_at_ms: now_ms(),
            item_count: content.item_count(),
            backup_id: snapshot.backup_id.clone(),
            backup_digest: snapshot.integrity_digest.clone(),
            duration_ms: tracker.elapsed_ms(),
        };
        if let Err(e) = self.write_record(&record) {
            crate::warn!("migration.record_failed migration_id={migration_id} error={e}");
            warnings.push(format!("Migration record was not saved: {e}"));
        }

        // Cleaning up
        self.set_phase(MigrationPhase::CleaningUp);
        for kind in content.partitions.keys() {
            let key = self.keys.content(*kind, &source);
            if let Err(e) = self.store.delete_if_present(&key) {
                crate::warn!("migration.cleanup_failed key={key} error={e}");
                warnings.push(format!("Source partition {key} was not removed: {e}"));
            }
        }

        let summary = MigrationSummary {
            migration_id: migration_id.clone(),
            source: source.clone(),
            target: target.clone(),
            item_count: content.item_count(),
            partitions_moved: u32::try_from(content.partitions.len()).unwrap_or(u32::MAX),
            backup_id: snapshot.backup_id.clone(),
            duration_ms: tracker.elapsed_ms(),
            warnings,
        };

        self.set_phase(MigrationPhase::Complete);
        tracker.complete(&summary);
        crate::info!(
            "migration.completed migration_id={migration_id} items={} duration_ms={} warnings={}",
            summary.item_count,
            summary.duration_ms,
            summary.warnings.len()
        );
        self.activity.report(
            "migration_complete",
            "Migration completed",
            &[
                ("migration_id", migration_id),
                ("source", source.to_string()),
                ("target", target.to_string()),
                ("item_count", summary.item_count.to_string()),
                ("duration_ms", summary.duration_ms.to_string()),
            ],
        );

        Ok(MigrationOutcome::Completed { summary })
    }

    fn validate(&self, source: &Identity, target: &Identity) -> Result<(), String> {
        if source.key_fragment().is_empty() || target.key_fragment().is_empty() {
            return Err("Source and target identities must not be empty".to_string());
        }
        if source == target {
            return Err("Source and target identities are the same".to_string());
        }
        if let Identity::Federated { email } = target {
            Identity::federated(email).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn read_source(&self, source: &Identity) -> MigrationResult<SourceContent> {
        let mut content = SourceContent {
            partitions: BTreeMap::new(),
            items: Vec::new(),
            has_draft: false,
            byte_size: 0,
        };

        for kind in ContentKind::all() {
            let Some(raw) = self.store.get_optional(&self.keys.content(kind, source))? else {
                continue;
            };
            match kind.layout() {
                PartitionLayout::Collection => {
                    content.items = serde_json::from_str(&raw)?;
                }
                PartitionLayout::Document => content.has_draft = true,
            }
            content.byte_size += raw.len() as u64;
            content.partitions.insert(kind, raw);
        }

        Ok(content)
    }

    fn preview(
        &self,
        source: &Identity,
        target: &Identity,
        content: &SourceContent,
    ) -> MigrationPreview {
        let batches = batch_count(content.item_count(), self.config.batch_size);
        MigrationPreview {
            source: source.clone(),
            target: target.clone(),
            item_count: content.item_count(),
            has_draft: content.has_draft,
            byte_size: content.byte_size,
            readable_size: format_bytes(content.byte_size),
            batch_count: batches,
            estimated_seconds: estimate_seconds(batches),
        }
    }

    fn back_up(
        &self,
        migration_id: &str,
        source: &Identity,
        target: &Identity,
        content: &SourceContent,
    ) -> MigrationResult<BackupSnapshot> {
        let mut payload = BackupPayload::default();
        for (kind, raw) in &content.partitions {
            payload
                .source
                .insert(self.keys.content(*kind, source), raw.clone());
            let target_key = self.keys.content(*kind, target);
            let prior = self.store.get_optional(&target_key)?;
            payload.target_prior.insert(target_key, prior);
        }

        let snapshot = BackupSnapshot::seal(migration_id, source, target, now_ms(), &payload)?;
        BackupVault::new(self.store.as_ref(), &self.keys).write(&snapshot)?;
        crate::info!(
            "migration.backup_created backup_id={} digest={}",
            snapshot.backup_id,
            snapshot.integrity_digest
        );
        Ok(snapshot)
    }

    async fn transfer_and_verify(
        &self,
        source: &Identity,
        target: &Identity,
        content: &SourceContent,
        tracker: &ProgressTracker,
    ) -> Result<(), TransferFailure> {
        let cancelled = || TransferFailure {
            kind: FailureKind::Cancelled,
            message: "Migration was cancelled".to_string(),
        };

        if self.is_cancelled() {
            return Err(cancelled());
        }

        self.set_phase(MigrationPhase::Transferring);
        tracker.report_transfer(0);

        let mut expected: BTreeMap<ContentKind, String> = BTreeMap::new();
        for (kind, raw) in &content.partitions {
            let target_key = self.keys.content(*kind, target);
            match kind.layout() {
                PartitionLayout::Collection => {
                    let mut merged = self.existing_collection(&target_key);
                    let prior_len = merged.len();
                    let batch_size = self.config.batch_size.max(1) as usize;

                    // An empty source still creates the target collection.
                    let batches: Vec<&[serde_json::Value]> = if content.items.is_empty() {
                        vec![content.items.as_slice()]
                    } else {
                        content.items.chunks(batch_size).collect()
                    };

                    for batch in batches {
                        if self.is_cancelled() {
                            return Err(cancelled());
                        }
                        merged.extend_from_slice(batch);
                        let json = serde_json::to_string(&merged).map_err(TransferFailure::transfer)?;
                        self.store
                            .set(target_key.clone(), json)
                            .map_err(TransferFailure::transfer)?;
                        tracker.report_transfer((merged.len() - prior_len) as u64);
                        tokio::task::yield_now().await;
                    }

                    expected.insert(*kind, items_digest(&content.items));
                }
                PartitionLayout::Document => {
                    if self.is_cancelled() {
                        return Err(cancelled());
                    }
                    self.store
                        .set(target_key, raw.clone())
                        .map_err(TransferFailure::transfer)?;
                    expected.insert(*kind, digest(raw.as_bytes()));
                }
            }
            crate::debug!("migration.partition_transferred kind={} source={source}", kind.entity());
        }

        self.set_phase(MigrationPhase::Verifying);
        tracker.report(MigrationStep::Verify, content.item_count(), 80);
        self.verify(target, content, &expected)
    }

    /// Reads the target collection the source items are appended to.
    ///
    /// A malformed value is replaced; the backup still holds it.
    fn existing_collection(&self, key: &str) -> Vec<serde_json::Value> {
        let raw = match self.store.get_optional(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                crate::warn!("migration.target_read_failed key={key} error={e}");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            crate::warn!("migration.target_corrupted key={key} error={e}");
            Vec::new()
        })
    }

    fn verify(
        &self,
        target: &Identity,
        content: &SourceContent,
        expected: &BTreeMap<ContentKind, String>,
    ) -> Result<(), TransferFailure> {
        let mismatch = |message: String| TransferFailure {
            kind: FailureKind::Verification,
            message,
        };

        for (kind, expected_digest) in expected {
            let key = self.keys.content(*kind, target);
            let raw = self
                .store
                .get_optional(&key)
                .map_err(TransferFailure::transfer)?
                .ok_or_else(|| mismatch(format!("{key} is missing after transfer")))?;

            let actual_digest = match kind.layout() {
                PartitionLayout::Collection => {
                    let items: Vec<serde_json::Value> = serde_json::from_str(&raw)
                        .map_err(|e| mismatch(format!("{key} is unreadable: {e}")))?;
                    let count = content.items.len();
                    if items.len() < count {
                        return Err(mismatch(format!(
                            "{key} holds {} items, expected at least {count}",
                            items.len()
                        )));
                    }
                    items_digest(&items[items.len() - count..])
                }
                PartitionLayout::Document => digest(raw.as_bytes()),
            };

            if &actual_digest != expected_digest {
                return Err(mismatch(format!("{key} does not match the source data")));
            }
        }

        Ok(())
    }

    fn roll_back(
        &self,
        snapshot: &BackupSnapshot,
        failure: TransferFailure,
    ) -> MigrationResult<MigrationOutcome> {
        self.set_phase(MigrationPhase::RollingBack);
        crate::warn!(
            "migration.rolling_back backup_id={} kind={} reason={}",
            snapshot.backup_id,
            failure.kind,
            failure.message
        );

        if let Err(e) = BackupVault::new(self.store.as_ref(), &self.keys).restore(snapshot) {
            self.set_phase(MigrationPhase::Failed);
            crate::error!(
                "migration.rollback_failed backup_id={} error={e}",
                snapshot.backup_id
            );
            self.activity.report(
                "migration_rollback_failed",
                "Rollback failed",
                &[
                    ("backup_id", snapshot.backup_id.clone()),
                    ("error", e.to_string()),
                ],
            );
            return Err(MigrationError::RollbackFailed {
                backup_id: snapshot.backup_id.clone(),
                message: e.to_string(),
            });
        }

        Ok(self.failure(
            failure.kind,
            &failure.message,
            true,
            Some(snapshot.backup_id.clone()),
        ))
    }

    /// `NotNeeded` for a source without content. The record only decides the reason:
    /// content written under the source after an earlier migration is migrated again.
    fn nothing_to_migrate(&self, source: &Identity, target: &Identity) -> MigrationOutcome {
        let reason = if self
            .migration_record()
            .is_some_and(|r| &r.source == source && &r.target == target)
        {
            NotNeededReason::AlreadyMigrated
        } else {
            NotNeededReason::NoSourceContent
        };
        crate::info!("migration.skipped reason={reason} source={source}");
        self.set_phase(MigrationPhase::Idle);
        MigrationOutcome::NotNeeded { reason }
    }

    fn validation_failure(&self, message: &str) -> MigrationOutcome {
        self.failure(FailureKind::Validation, message, false, None)
    }

    fn failure(
        &self,
        kind: FailureKind,
        message: &str,
        rolled_back: bool,
        backup_id: Option<String>,
    ) -> MigrationOutcome {
        self.set_phase(MigrationPhase::Failed);
        crate::error!("migration.failed kind={kind} rolled_back={rolled_back} message={message}");
        self.activity.report(
            "migration_failed",
            "Migration failed",
            &[
                ("kind", kind.to_string()),
                ("rolled_back", rolled_back.to_string()),
                ("message", message.to_string()),
            ],
        );

        MigrationOutcome::Failed {
            kind,
            message: message.to_string(),
            rolled_back,
            backup_id,
            user_message: user_message(kind, rolled_back).to_string(),
        }
    }

    fn write_record(&self, record: &MigrationRecord) -> MigrationResult<()> {
        self.store.set(
            self.keys.migration_record(),
            serde_json::to_string(record)?,
        )?;

        let mut history = self.migration_history();
        history.push(record.clone());
        let limit = self.config.history_limit as usize;
        if history.len() > limit {
            history.drain(..history.len() - limit);
        }
        self.store.set(
            self.keys.migration_history(),
            serde_json::to_string(&history)?,
        )?;
        Ok(())
    }
}

fn user_message(kind: FailureKind, rolled_back: bool) -> &'static str {
    match (kind, rolled_back) {
        (FailureKind::Validation, _) => "The account details look invalid. Please check them and try again.",
        (FailureKind::Backup, _) => "We couldn't create a backup, so nothing was changed. Please try again.",
        (FailureKind::Cancelled, _) => "The migration was cancelled. Nothing was lost.",
        (_, true) => "The migration failed, but nothing was lost. Please try again.",
        (_, false) => "The migration failed. Please contact support and don't log out.",
    }
}

/// Digest of a list of items, over their canonical JSON.
fn items_digest(items: &[serde_json::Value]) -> String {
    digest(serde_json::to_string(items).unwrap_or_default().as_bytes())
}

/// `mig_<ms>_<9 base36 chars>`
fn generate_migration_id(now_ms: i64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect();
    format!("mig_{now_ms}_{suffix}")
}

#[cfg(test)]
mod test;
