use std::collections::BTreeMap;
use std::sync::Mutex;

/// Errors raised by a [`PartitionStore`] implementation.
#[crate::handoff_error]
pub enum StoreError {
    /// The requested key was not found in the store
    #[error("key not found")]
    KeyNotFound,
    /// The stored value could not be read back
    #[error("failed to parse value")]
    ParsingFailure,
    /// The write or delete was not applied
    #[error("failed to update value")]
    UpdateFailure,
    /// The host storage is full (browser `QuotaExceededError`)
    #[error("storage quota exceeded")]
    QuotaExceeded,
    /// The foreign implementation threw something it could not map
    #[error("unexpected error in foreign callback: {reason}")]
    UnexpectedUniFFICallbackError {
        /// Reason reported by the bindings
        reason: String,
    },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for StoreError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError { reason: e.reason }
    }
}

/// Key/value persistence of the current browser profile.
///
/// In the web app this is `window.localStorage`; every entity Handoff owns is stored
/// as a string under a key built by [`StorageKeys`](crate::keys::StorageKeys). JSON is
/// used for structured values.
///
/// There are no integrity guarantees: values may be edited or removed by the user at
/// any time, so every reader tolerates missing or malformed entries.
#[uniffi::export(with_foreign)]
pub trait PartitionStore: Send + Sync {
    /// Reads a value.
    ///
    /// # Errors
    /// - `StoreError::KeyNotFound` if nothing is stored under `key`
    fn get(&self, key: String) -> Result<String, StoreError>;

    /// Writes a value, replacing any previous one.
    ///
    /// # Errors
    /// - `StoreError::UpdateFailure` or `StoreError::QuotaExceeded` if the write was not applied
    fn set(&self, key: String, value: String) -> Result<(), StoreError>;

    /// Removes a value. Removing a missing key may report `KeyNotFound`.
    ///
    /// # Errors
    /// - `StoreError::UpdateFailure` if the removal was not applied
    fn delete(&self, key: String) -> Result<(), StoreError>;

    /// Lists every key currently stored.
    ///
    /// # Errors
    /// - any `StoreError` if the keys cannot be enumerated
    fn list_keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Convenience reads layered over [`PartitionStore`].
pub(crate) trait PartitionStoreExt {
    /// `Ok(None)` for a missing key instead of `KeyNotFound`.
    fn get_optional(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Deletes a key, treating "already gone" as success.
    fn delete_if_present(&self, key: &str) -> Result<(), StoreError>;
}

impl<T: PartitionStore + ?Sized> PartitionStoreExt for T {
    fn get_optional(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.get(key.to_string()) {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::KeyNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn delete_if_present(&self, key: &str) -> Result<(), StoreError> {
        match self.delete(key.to_string()) {
            Ok(()) | Err(StoreError::KeyNotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory [`PartitionStore`] for tests and for hosts without persistent storage.
///
/// Keys are kept ordered so enumeration is deterministic.
#[derive(Debug, Default)]
pub struct InMemoryPartitionStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryPartitionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every entry, for byte-for-byte comparisons.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A poisoned map is still a valid map.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl PartitionStore for InMemoryPartitionStore {
    fn get(&self, key: String) -> Result<String, StoreError> {
        self.lock().get(&key).cloned().ok_or(StoreError::KeyNotFound)
    }

    fn set(&self, key: String, value: String) -> Result<(), StoreError> {
        self.lock().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: String) -> Result<(), StoreError> {
        self.lock().remove(&key);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }
}
