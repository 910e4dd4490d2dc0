//! Test utilities for unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::decision::{
    DecisionError, DecisionSurface, DeviceClassChoice, LinkDecision, MigrationConfirmation,
};
use crate::matching::MatchCandidate;
use crate::migration::MigrationPreview;
use crate::primitives::partition_store::{InMemoryPartitionStore, PartitionStore, StoreError};
use crate::security::DeviceClass;

/// Decision surface that answers from a script and records what it was asked.
pub struct ScriptedDecisions {
    pub link: Mutex<VecDeque<Result<LinkDecision, DecisionError>>>,
    pub confirmation: Mutex<MigrationConfirmation>,
    pub device: Mutex<Result<DeviceClassChoice, DecisionError>>,
    pub switch_to_personal: Mutex<bool>,
    pub previews: Mutex<Vec<MigrationPreview>>,
    pub candidates: Mutex<Vec<MatchCandidate>>,
    pub device_prompts: AtomicUsize,
}

impl Default for ScriptedDecisions {
    fn default() -> Self {
        Self {
            link: Mutex::new(VecDeque::new()),
            confirmation: Mutex::new(MigrationConfirmation::Confirm),
            device: Mutex::new(Ok(DeviceClassChoice {
                device_class: DeviceClass::Personal,
                remember: true,
            })),
            switch_to_personal: Mutex::new(true),
            previews: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            device_prompts: AtomicUsize::new(0),
        }
    }
}

impl ScriptedDecisions {
    /// Answers every link proposal with `decision`, once per entry.
    pub fn with_links(decisions: &[LinkDecision]) -> Self {
        let script = Self::default();
        script
            .link
            .lock()
            .unwrap()
            .extend(decisions.iter().copied().map(Ok));
        script
    }

    pub fn answer_device(&self, device_class: DeviceClass, remember: bool) {
        *self.device.lock().unwrap() = Ok(DeviceClassChoice {
            device_class,
            remember,
        });
    }

    pub fn answer_confirmation(&self, confirmation: MigrationConfirmation) {
        *self.confirmation.lock().unwrap() = confirmation;
    }
}

#[async_trait::async_trait]
impl DecisionSurface for ScriptedDecisions {
    async fn decide_account_link(
        &self,
        candidate: MatchCandidate,
    ) -> Result<LinkDecision, DecisionError> {
        self.candidates.lock().unwrap().push(candidate);
        self.link
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(LinkDecision::Later))
    }

    async fn confirm_migration(
        &self,
        preview: MigrationPreview,
    ) -> Result<MigrationConfirmation, DecisionError> {
        self.previews.lock().unwrap().push(preview);
        Ok(*self.confirmation.lock().unwrap())
    }

    async fn choose_device_class(&self) -> Result<DeviceClassChoice, DecisionError> {
        self.device_prompts.fetch_add(1, Ordering::SeqCst);
        match &*self.device.lock().unwrap() {
            Ok(choice) => Ok(*choice),
            Err(_) => Err(DecisionError::Dismissed),
        }
    }

    async fn confirm_switch_to_personal(&self) -> Result<bool, DecisionError> {
        Ok(*self.switch_to_personal.lock().unwrap())
    }
}

/// In-memory store whose writes fail for chosen keys.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: InMemoryPartitionStore,
    fail_get: Mutex<Vec<String>>,
    fail_set: Mutex<Vec<String>>,
    fail_delete: Mutex<Vec<String>>,
    pub writes: AtomicUsize,
}

impl FaultyStore {
    pub fn seeded(entries: &[(&str, &str)]) -> Self {
        let store = Self::default();
        for (key, value) in entries {
            store
                .inner
                .set((*key).to_string(), (*value).to_string())
                .unwrap();
        }
        store
    }

    /// Every `get` on a key containing `fragment` fails with `ParsingFailure`.
    pub fn fail_reads_of(&self, fragment: &str) {
        self.fail_get.lock().unwrap().push(fragment.to_string());
    }

    /// Every `set` on a key containing `fragment` fails with `QuotaExceeded`.
    pub fn fail_writes_to(&self, fragment: &str) {
        self.fail_set.lock().unwrap().push(fragment.to_string());
    }

    /// Every `delete` on a key containing `fragment` fails with `UpdateFailure`.
    pub fn fail_deletes_of(&self, fragment: &str) {
        self.fail_delete.lock().unwrap().push(fragment.to_string());
    }

    pub fn heal(&self) {
        self.fail_get.lock().unwrap().clear();
        self.fail_set.lock().unwrap().clear();
        self.fail_delete.lock().unwrap().clear();
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.snapshot()
    }

    fn matches(list: &Mutex<Vec<String>>, key: &str) -> bool {
        list.lock().unwrap().iter().any(|f| key.contains(f.as_str()))
    }
}

impl PartitionStore for FaultyStore {
    fn get(&self, key: String) -> Result<String, StoreError> {
        if Self::matches(&self.fail_get, &key) {
            return Err(StoreError::ParsingFailure);
        }
        self.inner.get(key)
    }

    fn set(&self, key: String, value: String) -> Result<(), StoreError> {
        if Self::matches(&self.fail_set, &key) {
            return Err(StoreError::QuotaExceeded);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value)
    }

    fn delete(&self, key: String) -> Result<(), StoreError> {
        if Self::matches(&self.fail_delete, &key) {
            return Err(StoreError::UpdateFailure);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key)
    }

    fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_keys()
    }
}

/// `count` saved texts with ids `1..=count`.
pub fn saved_texts(count: usize) -> String {
    let items: Vec<_> = (1..=count)
        .map(|id| serde_json::json!({ "id": id, "content": format!("text {id}"), "type": "edit" }))
        .collect();
    serde_json::to_string(&items).unwrap()
}
