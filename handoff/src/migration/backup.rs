//! Backup snapshots taken before a migration touches anything.
//!
//! A snapshot holds the verbatim source partitions plus the prior value of every target
//! partition, so a rollback can put both sides back exactly as they were. The payload is
//! stored as a JSON string and the digest is computed over those exact bytes.

use std::collections::BTreeMap;

use anyhow::Context;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::keys::StorageKeys;
use crate::migration::error::{MigrationError, MigrationResult};
use crate::primitives::partition_store::{PartitionStore, PartitionStoreExt};

/// Verbatim partition values, keyed by storage key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPayload {
    /// Every source partition that existed.
    pub source: BTreeMap<String, String>,
    /// Every target partition the migration may write, with its prior value or `None`.
    pub target_prior: BTreeMap<String, Option<String>>,
}

/// A persisted backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub backup_id: String,
    pub source: Identity,
    pub target: Identity,
    #[serde(rename = "createdAt")]
    pub created_at_ms: i64,
    /// JSON of [`BackupPayload`]
    pub payload: String,
    /// Hex BLAKE3 of `payload`
    pub integrity_digest: String,
}

/// Listing entry for a stored backup.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct BackupSummary {
    pub backup_id: String,
    pub source: Identity,
    pub target: Identity,
    pub created_at_ms: i64,
    pub partition_count: u32,
}

impl BackupSnapshot {
    /// Builds a snapshot, serialising `payload` and computing its digest.
    ///
    /// # Errors
    /// `MigrationError::Generic` if the payload cannot be serialised.
    pub fn seal(
        backup_id: &str,
        source: &Identity,
        target: &Identity,
        created_at_ms: i64,
        payload: &BackupPayload,
    ) -> MigrationResult<Self> {
        let payload = serde_json::to_string(payload).context("serialize BackupPayload")?;
        Ok(Self {
            backup_id: backup_id.to_string(),
            source: source.clone(),
            target: target.clone(),
            created_at_ms,
            integrity_digest: digest(payload.as_bytes()),
            payload,
        })
    }

    /// Decodes the payload after checking it against the digest.
    ///
    /// # Errors
    /// `MigrationError::BackupCorrupted` on a digest mismatch or an undecodable payload.
    pub fn open(&self) -> MigrationResult<BackupPayload> {
        let corrupted = || MigrationError::BackupCorrupted {
            backup_id: self.backup_id.clone(),
        };
        if digest(self.payload.as_bytes()) != self.integrity_digest {
            return Err(corrupted());
        }
        serde_json::from_str(&self.payload).map_err(|_| corrupted())
    }

    fn summary(&self) -> BackupSummary {
        let partition_count = self
            .open()
            .map(|payload| payload.source.len())
            .unwrap_or_default();
        BackupSummary {
            backup_id: self.backup_id.clone(),
            source: self.source.clone(),
            target: self.target.clone(),
            created_at_ms: self.created_at_ms,
            partition_count: u32::try_from(partition_count).unwrap_or(u32::MAX),
        }
    }
}

/// Hex BLAKE3 digest.
#[must_use]
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// Reads and writes snapshots under `<ns>_migrationBackup_<id>`.
pub struct BackupVault<'a> {
    store: &'a dyn PartitionStore,
    keys: &'a StorageKeys,
}

impl<'a> BackupVault<'a> {
    pub fn new(store: &'a dyn PartitionStore, keys: &'a StorageKeys) -> Self {
        Self { store, keys }
    }

    /// Persists `snapshot` and reads it back to make sure it landed intact.
    ///
    /// # Errors
    /// Store failures, or `BackupCorrupted` if the read-back differs.
    pub fn write(&self, snapshot: &BackupSnapshot) -> MigrationResult<()> {
        let key = self.keys.backup(&snapshot.backup_id);
        let json = serde_json::to_string(snapshot)?;
        self.store.set(key.clone(), json.clone())?;

        if self.store.get_optional(&key)?.as_deref() != Some(json.as_str()) {
            return Err(MigrationError::BackupCorrupted {
                backup_id: snapshot.backup_id.clone(),
            });
        }
        Ok(())
    }

    /// Loads a snapshot.
    ///
    /// # Errors
    /// `BackupNotFound`, store failures, or `JsonError` for an unreadable snapshot.
    pub fn read(&self, backup_id: &str) -> MigrationResult<BackupSnapshot> {
        let raw = self
            .store
            .get_optional(&self.keys.backup(backup_id))?
            .ok_or_else(|| MigrationError::BackupNotFound {
                backup_id: backup_id.to_string(),
            })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Every readable snapshot, oldest first. Unreadable ones are skipped with a warning.
    ///
    /// # Errors
    /// Store failures while enumerating.
    pub fn list(&self) -> MigrationResult<Vec<BackupSnapshot>> {
        let prefix = self.keys.backup_prefix();
        let mut snapshots = Vec::new();

        for key in self.store.list_keys()? {
            if !key.starts_with(&prefix) {
                continue;
            }
            let Some(raw) = self.store.get_optional(&key)? else {
                continue;
            };
            match serde_json::from_str::<BackupSnapshot>(&raw) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => crate::warn!("backup.unreadable key={key} error={e}"),
            }
        }

        snapshots.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.backup_id.cmp(&b.backup_id))
        });
        Ok(snapshots)
    }

    /// Summaries of every readable snapshot.
    ///
    /// # Errors
    /// Store failures while enumerating.
    pub fn summaries(&self) -> MigrationResult<Vec<BackupSummary>> {
        Ok(self.list()?.iter().map(BackupSnapshot::summary).collect())
    }

    /// Deletes snapshots older than `retention_days`. Returns how many were removed.
    ///
    /// # Errors
    /// Store failures while enumerating. Individual delete failures are logged.
    pub fn prune(&self, now_ms: i64, retention_days: u32) -> MigrationResult<u32> {
        let cutoff = now_ms - Duration::days(i64::from(retention_days)).num_milliseconds();
        let mut removed = 0;

        for snapshot in self.list()? {
            if snapshot.created_at_ms >= cutoff {
                continue;
            }
            match self
                .store
                .delete_if_present(&self.keys.backup(&snapshot.backup_id))
            {
                Ok(()) => {
                    removed += 1;
                    crate::info!(
                        "backup.pruned backup_id={} created_at_ms={}",
                        snapshot.backup_id,
                        snapshot.created_at_ms
                    );
                }
                Err(e) => {
                    crate::warn!(
                        "backup.prune_failed backup_id={} error={e}",
                        snapshot.backup_id
                    );
                }
            }
        }
        Ok(removed)
    }

    /// Writes the snapshot's partitions back: source values verbatim, target partitions to
    /// their prior value or removed if they did not exist.
    ///
    /// Every key is attempted; the first failure is returned.
    ///
    /// # Errors
    /// `BackupCorrupted` before anything is written, or the first store failure.
    pub fn restore(&self, snapshot: &BackupSnapshot) -> MigrationResult<()> {
        let payload = snapshot.open()?;
        let mut first_error: Option<MigrationError> = None;

        for (key, value) in payload.source {
            if let Err(e) = self.store.set(key.clone(), value) {
                crate::error!("backup.restore_failed key={key} error={e}");
                first_error.get_or_insert(e.into());
            }
        }
        for (key, prior) in payload.target_prior {
            let result = match prior {
                Some(value) => self.store.set(key.clone(), value),
                None => self.store.delete_if_present(&key),
            };
            if let Err(e) = result {
                crate::error!("backup.restore_failed key={key} error={e}");
                first_error.get_or_insert(e.into());
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
