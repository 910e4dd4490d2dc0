//! The session pointer: which identity is currently signed in on this profile.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::keys::StorageKeys;
use crate::primitives::partition_store::{PartitionStore, PartitionStoreExt, StoreError};

/// Extra data written next to a username session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameSessionData {
    pub user_id: String,
    pub auth_provider: String,
    pub login_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
}

/// Reads and writes the session keys of one namespace.
pub struct SessionPointer<'a> {
    store: &'a dyn PartitionStore,
    keys: &'a StorageKeys,
}

impl<'a> SessionPointer<'a> {
    pub fn new(store: &'a dyn PartitionStore, keys: &'a StorageKeys) -> Self {
        Self { store, keys }
    }

    /// The signed-in identity, if any.
    ///
    /// # Errors
    /// Propagates store failures other than a missing key.
    pub fn current(&self) -> Result<Option<Identity>, StoreError> {
        let Some(user) = self.store.get_optional(&self.keys.current_user())? else {
            return Ok(None);
        };
        let provider = self.store.get_optional(&self.keys.auth_provider())?;
        Ok(Identity::from_session(&user, provider.as_deref()))
    }

    /// Points the session at `identity`.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn sign_in(&self, identity: &Identity, now_ms: i64) -> Result<(), StoreError> {
        self.store.set(
            self.keys.current_user(),
            identity.key_fragment().to_string(),
        )?;
        self.store.set(
            self.keys.auth_provider(),
            identity.provider_tag().to_string(),
        )?;

        match identity {
            Identity::Legacy { username } => {
                let data = UsernameSessionData {
                    user_id: username.clone(),
                    auth_provider: identity.provider_tag().to_string(),
                    login_time: now_ms,
                    device_type: None,
                };
                let json = serde_json::to_string(&data).map_err(|_| StoreError::UpdateFailure)?;
                self.store.set(self.keys.username_session(), json)
            }
            Identity::Federated { .. } => {
                self.store.delete_if_present(&self.keys.username_session())
            }
        }
    }

    /// Removes every session key. Each key is attempted even if an earlier one fails.
    ///
    /// # Errors
    /// The first failure encountered.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut first_error = None;
        for key in [
            self.keys.current_user(),
            self.keys.auth_provider(),
            self.keys.username_session(),
        ] {
            if let Err(e) = self.store.delete_if_present(&key) {
                crate::warn!("session.clear_failed key={key} error={e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
