use crate::primitives::partition_store::StoreError;

/// Errors returned by [`MigrationManager`](crate::migration::MigrationManager).
///
/// Ordinary migration failures are not errors: they are reported as
/// [`MigrationOutcome::Failed`](crate::migration::MigrationOutcome::Failed) after an
/// automatic rollback. Only conditions that need the caller's attention end up here.
#[crate::handoff_error]
pub enum MigrationError {
    /// An invalid operation was attempted
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The automatic rollback did not complete; the backup must be restored manually
    #[error("Rollback failed, restore backup {backup_id}: {message}")]
    RollbackFailed {
        /// Backup holding the pre-migration data
        backup_id: String,
        /// What went wrong while restoring
        message: String,
    },

    /// No backup exists under the given id
    #[error("Backup not found: {backup_id}")]
    BackupNotFound {
        /// The requested backup
        backup_id: String,
    },

    /// A backup's payload no longer matches its digest
    #[error("Backup {backup_id} failed its integrity check")]
    BackupCorrupted {
        /// The damaged backup
        backup_id: String,
    },

    /// An identity failed validation
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Partition store operation failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {message}")]
    JsonError {
        /// The error message from serde_json
        message: String,
    },
}

impl From<serde_json::Error> for MigrationError {
    fn from(e: serde_json::Error) -> Self {
        Self::JsonError {
            message: e.to_string(),
        }
    }
}

impl From<crate::identity::IdentityError> for MigrationError {
    fn from(e: crate::identity::IdentityError) -> Self {
        Self::InvalidIdentity(e.to_string())
    }
}

/// Result type for migration operations
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;
