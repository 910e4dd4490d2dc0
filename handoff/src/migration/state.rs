use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Where the migration state machine currently is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, uniffi::Enum)]
#[strum(serialize_all = "snake_case")]
pub enum MigrationPhase {
    /// No migration has run yet, or the last one needed nothing
    #[default]
    Idle,
    /// Looking for a legacy account that owns content
    Detecting,
    /// Waiting for the user to confirm the preview
    AwaitingUserConfirmation,
    /// Writing the backup snapshot
    BackingUp,
    /// Copying partitions to the target identity
    Transferring,
    /// Checking the target holds exactly the source items
    Verifying,
    /// Writing the migration record
    Recording,
    /// Removing the source partitions
    CleaningUp,
    /// Finished successfully
    Complete,
    /// Restoring the pre-migration state
    RollingBack,
    /// Finished unsuccessfully
    Failed,
}

/// Record of the last successful migration.
///
/// A single slot; the previous ones are kept in the history list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    /// `mig_<ms>_<random>`
    pub migration_id: String,
    pub source: Identity,
    pub target: Identity,
    #[serde(rename = "migratedAt")]
    pub migrated_at_ms: i64,
    /// Number of saved texts moved
    pub item_count: u64,
    /// Backup taken before the migration
    pub backup_id: String,
    /// Digest of that backup's payload
    pub backup_digest: String,
    #[serde(default)]
    pub duration_ms: u64,
}

/// What a migration will move, shown to the user before anything happens.
#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct MigrationPreview {
    pub source: Identity,
    pub target: Identity,
    /// Number of saved texts
    pub item_count: u64,
    /// Whether an unsaved draft is moved as well
    pub has_draft: bool,
    /// Bytes of stored JSON across every source partition
    pub byte_size: u64,
    /// `byte_size` rendered as B / KB / MB / GB
    pub readable_size: String,
    /// Number of write batches the transfer needs
    pub batch_count: u64,
    /// Rough duration estimate
    pub estimated_seconds: f64,
}

/// Why no migration was necessary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, uniffi::Enum)]
#[strum(serialize_all = "snake_case")]
pub enum NotNeededReason {
    /// The session does not point at a legacy identity
    NoActiveLegacySession,
    /// The source identity owns no content
    NoSourceContent,
    /// The migration record already names this pair
    AlreadyMigrated,
}

/// Classification of a failed migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, uniffi::Enum)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// The input was rejected before anything ran
    Validation,
    /// The backup could not be written; nothing was changed
    Backup,
    /// A write to the target failed; rolled back
    Transfer,
    /// The target did not hold the source items afterwards; rolled back
    Verification,
    /// The caller cancelled mid-flight; rolled back
    Cancelled,
}

impl FailureKind {
    /// Whether an identical retry may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Validation)
    }
}

/// Result of a successful migration.
#[derive(Clone, Debug, PartialEq, Eq, uniffi::Record)]
pub struct MigrationSummary {
    pub migration_id: String,
    pub source: Identity,
    pub target: Identity,
    pub item_count: u64,
    pub partitions_moved: u32,
    pub backup_id: String,
    pub duration_ms: u64,
    /// Non-fatal problems, e.g. the record or the cleanup failing
    pub warnings: Vec<String>,
}

/// How a migration attempt ended, unless it ended with a [`MigrationError`](super::MigrationError).
#[derive(Clone, Debug, PartialEq, uniffi::Enum)]
pub enum MigrationOutcome {
    /// Nothing to do; nothing was written
    NotNeeded { reason: NotNeededReason },
    /// The user declined the preview; nothing was written
    Cancelled,
    /// The data now lives under the target identity
    Completed { summary: MigrationSummary },
    /// The migration failed; `rolled_back` tells whether the source was restored
    Failed {
        kind: FailureKind,
        message: String,
        rolled_back: bool,
        backup_id: Option<String>,
        /// Text suitable for the user
        user_message: String,
    },
}

impl MigrationOutcome {
    /// Whether the outcome is [`MigrationOutcome::Completed`].
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// A step reported to the progress sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, uniffi::Enum)]
#[strum(serialize_all = "snake_case")]
pub enum MigrationStep {
    Backup,
    Transfer,
    Verify,
    Finalize,
    Complete,
}

/// One progress update.
#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct MigrationProgress {
    pub step: MigrationStep,
    /// Items transferred so far
    pub current: u64,
    /// Items to transfer
    pub total: u64,
    /// 0 to 100
    pub percentage: u8,
    pub elapsed_ms: u64,
    /// Extrapolated from the elapsed time; `None` before any progress
    pub estimated_remaining_ms: Option<u64>,
}
