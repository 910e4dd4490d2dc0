//! Migration System
//!
//! Moves the content of a legacy (username) account to a federated identity, with a
//! backup taken first and an automatic rollback on failure.
//!
//! # Overview
//!
//! The migration system consists of:
//! - [`MigrationManager`]: runs the phase state machine for one profile
//! - [`BackupSnapshot`]: the verbatim pre-migration state of both sides
//! - [`MigrationRecord`]: the last successful migration, plus a short history
//! - [`ProgressSink`]: advisory progress updates for the host UI
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = MigrationManager::new(store, decisions, Some(progress), None);
//!
//! match manager.migrate_active_session(federated).await? {
//!     MigrationOutcome::Completed { summary } => show_done(summary),
//!     MigrationOutcome::Failed { user_message, .. } => show_error(user_message),
//!     MigrationOutcome::NotNeeded { .. } | MigrationOutcome::Cancelled => {}
//! }
//! ```
//!
//! # Recovering from a failed rollback
//!
//! `MigrationError::RollbackFailed` carries the backup id. Backups are kept for
//! `backup_retention_days` (30 by default), and [`MigrationManager::restore_backup`]
//! puts both sides back exactly as they were before the migration started.

mod backup;
mod error;
mod manager;
mod progress;
mod state;

pub use backup::{BackupPayload, BackupSnapshot, BackupSummary};
pub use error::{MigrationError, MigrationResult};
pub use manager::MigrationManager;
pub use progress::{batch_count, estimate_seconds, format_bytes, ProgressSink};
pub use state::{
    FailureKind, MigrationOutcome, MigrationPhase, MigrationPreview, MigrationProgress,
    MigrationRecord, MigrationStep, MigrationSummary, NotNeededReason,
};
