#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use handoff::decision::{
    DecisionError, DecisionSurface, DeviceClassChoice, LinkDecision, MigrationConfirmation,
};
use handoff::matching::MatchCandidate;
use handoff::migration::MigrationPreview;
use handoff::primitives::{
    ActivityEvent, ActivitySink, InMemoryPartitionStore, PartitionStore, StoreError,
};
use handoff::security::{Clock, DeviceClass, SecurityNotifier};

pub const MINUTE_MS: i64 = 60 * 1000;

/// Plays the part of the browser UI: answers from a script, remembers every question.
pub struct ScriptedHost {
    links: Mutex<VecDeque<LinkDecision>>,
    confirmation: Mutex<MigrationConfirmation>,
    device: Mutex<Option<DeviceClassChoice>>,
    pub candidates: Mutex<Vec<MatchCandidate>>,
    pub previews: Mutex<Vec<MigrationPreview>>,
}

impl ScriptedHost {
    pub fn new(links: &[LinkDecision], confirmation: MigrationConfirmation) -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(links.iter().copied().collect()),
            confirmation: Mutex::new(confirmation),
            device: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            previews: Mutex::new(Vec::new()),
        })
    }

    pub fn choosing_device(device_class: DeviceClass, remember: bool) -> Arc<Self> {
        let host = Self::new(&[], MigrationConfirmation::Confirm);
        *host.device.lock().unwrap() = Some(DeviceClassChoice {
            device_class,
            remember,
        });
        host
    }
}

#[async_trait::async_trait]
impl DecisionSurface for ScriptedHost {
    async fn decide_account_link(
        &self,
        candidate: MatchCandidate,
    ) -> Result<LinkDecision, DecisionError> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(self
            .links
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(LinkDecision::Later))
    }

    async fn confirm_migration(
        &self,
        preview: MigrationPreview,
    ) -> Result<MigrationConfirmation, DecisionError> {
        self.previews.lock().unwrap().push(preview);
        Ok(*self.confirmation.lock().unwrap())
    }

    async fn choose_device_class(&self) -> Result<DeviceClassChoice, DecisionError> {
        (*self.device.lock().unwrap()).ok_or(DecisionError::Dismissed)
    }

    async fn confirm_switch_to_personal(&self) -> Result<bool, DecisionError> {
        Ok(true)
    }
}

/// Browser storage whose writes to chosen keys fail like a full quota.
#[derive(Default)]
pub struct FlakyStorage {
    inner: InMemoryPartitionStore,
    failing: Mutex<Vec<String>>,
    pub writes: AtomicUsize,
}

impl FlakyStorage {
    pub fn with(entries: &[(&str, String)]) -> Arc<Self> {
        let storage = Self::default();
        for (key, value) in entries {
            storage
                .inner
                .set((*key).to_string(), value.clone())
                .unwrap();
        }
        Arc::new(storage)
    }

    pub fn fail_writes_to(&self, fragment: &str) {
        self.failing.lock().unwrap().push(fragment.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.snapshot()
    }
}

impl PartitionStore for FlakyStorage {
    fn get(&self, key: String) -> Result<String, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: String, value: String) -> Result<(), StoreError> {
        if self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|fragment| key.contains(fragment.as_str()))
        {
            return Err(StoreError::QuotaExceeded);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value)
    }

    fn delete(&self, key: String) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key)
    }

    fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_keys()
    }
}

#[derive(Default)]
pub struct ActivityLog {
    events: Mutex<Vec<ActivityEvent>>,
}

impl ActivityLog {
    pub fn actions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.action.clone())
            .collect()
    }
}

impl ActivitySink for ActivityLog {
    fn record(&self, event: ActivityEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn advance_minutes(&self, minutes: i64) {
        self.0.fetch_add(minutes * MINUTE_MS, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct Notifications {
    pub warnings: AtomicUsize,
    pub logouts: AtomicUsize,
}

impl SecurityNotifier for Notifications {
    fn on_inactivity_warning(&self, _remaining_ms: u64) {
        self.warnings.fetch_add(1, Ordering::SeqCst);
    }

    fn on_forced_logout(&self) {
        self.logouts.fetch_add(1, Ordering::SeqCst);
    }
}

/// A saved-texts collection like the web app writes, with ids `1..=count`.
pub fn saved_texts(count: usize) -> String {
    let items: Vec<_> = (1..=count)
        .map(|id| {
            serde_json::json!({
                "id": 1_700_000_000_000_u64 + id as u64,
                "content": format!("draft number {id}"),
                "type": "edit",
            })
        })
        .collect();
    serde_json::to_string(&items).unwrap()
}
