use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::decision::DecisionSurface;
use crate::identity::Identity;
use crate::keys::{ContentKind, StorageKeys};
use crate::primitives::activity::{ActivityReporter, ActivitySink};
use crate::primitives::config::{current_config, HandoffConfig};
use crate::primitives::partition_store::{PartitionStore, PartitionStoreExt};
use crate::security::inactivity::{InactivityTimer, TimerEvent};
use crate::security::{ActivitySignal, DeviceClass, SecurityState};
use crate::session::SessionPointer;

/// Source of the current time, in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        crate::primitives::now_ms()
    }
}

/// Receives the user-facing side effects of public mode.
#[uniffi::export(with_foreign)]
pub trait SecurityNotifier: Send + Sync {
    /// Shows a non-blocking "you will be logged out" notice.
    fn on_inactivity_warning(&self, remaining_ms: u64);

    /// Account data was wiped; the host must reload into the signed-out state.
    fn on_forced_logout(&self);
}

struct PolicyState {
    state: SecurityState,
    timer: InactivityTimer,
}

/// Personal / public device policy of one browser profile.
///
/// On a public device every accepted [`ActivitySignal`] restarts a 30 minute idle
/// window. A warning goes out 5 minutes before the end; at the end the active
/// identity's content and the session pointer are wiped and a reload is requested.
/// The wipe never goes through the migration backup path.
///
/// Timing is driven by the host calling [`DeviceSecurityPolicy::tick`], or by
/// [`DeviceSecurityPolicy::run_inactivity_watch`] on an async runtime.
///
/// Persisted under `<ns>_deviceType`, `<ns>_rememberDevice` and `<ns>_publicModeActive`.
#[derive(uniffi::Object)]
pub struct DeviceSecurityPolicy {
    store: Arc<dyn PartitionStore>,
    decisions: Arc<dyn DecisionSurface>,
    notifier: Option<Arc<dyn SecurityNotifier>>,
    clock: Arc<dyn Clock>,
    activity: ActivityReporter,
    keys: StorageKeys,
    inner: Mutex<PolicyState>,
}

#[crate::handoff_export]
impl DeviceSecurityPolicy {
    /// Creates a policy using the global [`HandoffConfig`] and the wall clock.
    #[uniffi::constructor]
    pub fn new(
        store: Arc<dyn PartitionStore>,
        decisions: Arc<dyn DecisionSurface>,
        notifier: Option<Arc<dyn SecurityNotifier>>,
        activity_sink: Option<Arc<dyn ActivitySink>>,
    ) -> Arc<Self> {
        Arc::new(Self::with_clock(
            store,
            decisions,
            notifier,
            ActivityReporter::new(activity_sink),
            &current_config(),
            Arc::new(SystemClock),
        ))
    }

    /// Determines the device class at login.
    ///
    /// A remembered choice is reused unless `force` is set; otherwise the user is asked.
    /// If the user gives no answer the device stays unclassified and is asked about
    /// again at the next login.
    pub async fn classify_device(&self, force: bool) -> SecurityState {
        if !force {
            if let Some(class) = self.remembered_class() {
                crate::debug!("security.classification_remembered class={class}");
                return self.apply_class(class, true);
            }
        }

        match self.decisions.choose_device_class().await {
            Ok(choice) => self.apply_class(choice.device_class, choice.remember),
            Err(e) => {
                crate::warn!("security.classification_unanswered error={e}");
                self.state()
            }
        }
    }

    /// Sets the device class without asking.
    pub fn set_device_class(&self, device_class: DeviceClass, remember: bool) -> SecurityState {
        self.apply_class(device_class, remember)
    }

    /// Registers a user activity signal. Returns `true` if it reset the idle window.
    pub fn record_activity(&self, signal: ActivitySignal) -> bool {
        let now = self.clock.now_ms();
        let mut inner = self.lock();
        let accepted = inner.timer.record_activity(now);
        if accepted {
            if inner.state == SecurityState::PublicWarning {
                inner.state = SecurityState::PublicActive;
            }
            crate::trace!("security.activity signal={signal} now_ms={now}");
        }
        accepted
    }

    /// Advances the inactivity timer to the current time and performs what is due.
    pub fn tick(&self) -> SecurityState {
        let now = self.clock.now_ms();
        let event = self.lock().timer.poll(now);

        match event {
            TimerEvent::None => {}
            TimerEvent::Warn { remaining_ms } => {
                self.lock().state = SecurityState::PublicWarning;
                crate::info!("security.inactivity_warning remaining_ms={remaining_ms}");
                self.activity.report(
                    "inactivity_warning",
                    "Inactivity warning shown",
                    &[("remaining_ms", remaining_ms.to_string())],
                );
                if let Some(notifier) = &self.notifier {
                    notifier.on_inactivity_warning(remaining_ms);
                }
            }
            TimerEvent::Expired => {
                crate::warn!("security.inactivity_expired wiping account data");
                self.wipe("auto_logout");
                if let Some(notifier) = &self.notifier {
                    notifier.on_forced_logout();
                }
            }
        }

        self.state()
    }

    /// Leaves public mode after the user confirms. Returns `true` if the device is now
    /// personal.
    pub async fn switch_to_personal(&self) -> bool {
        match self.state() {
            SecurityState::Personal => return true,
            SecurityState::PublicActive | SecurityState::PublicWarning => {}
            SecurityState::Unclassified | SecurityState::LoggedOut => return false,
        }

        let confirmed = self
            .decisions
            .confirm_switch_to_personal()
            .await
            .unwrap_or_else(|e| {
                crate::warn!("security.switch_confirmation_failed treating_as=no error={e}");
                false
            });
        if !confirmed {
            return false;
        }

        self.apply_class(DeviceClass::Personal, true);
        self.activity
            .report("switched_to_personal", "Switched to personal device", &[]);
        true
    }

    /// Wipes account data if the page is closed in public mode. Returns `true` if it did.
    pub fn on_page_unload(&self) -> bool {
        if !self.state().is_public() {
            return false;
        }
        self.lock().timer.disarm();
        self.wipe("unload_wipe");
        true
    }

    /// Re-establishes the state after a reload from what was persisted.
    pub fn restore(&self) -> SecurityState {
        let public_active = self
            .read_flag(&self.keys.public_mode_active())
            .unwrap_or(false);

        if public_active {
            let now = self.clock.now_ms();
            let mut inner = self.lock();
            inner.timer.arm(now);
            inner.state = SecurityState::PublicActive;
            crate::info!("security.public_mode_restored");
            return inner.state;
        }

        let state = match self.remembered_class() {
            Some(DeviceClass::Personal) => SecurityState::Personal,
            // A remembered public device without the active flag was already wiped.
            Some(DeviceClass::Public) | None => SecurityState::Unclassified,
        };
        self.lock().state = state;
        state
    }

    pub fn state(&self) -> SecurityState {
        self.lock().state
    }

    /// Drives [`DeviceSecurityPolicy::tick`] every `poll_interval_ms` until the device
    /// leaves public mode. Returns the final state.
    pub async fn run_inactivity_watch(self: Arc<Self>, poll_interval_ms: u64) -> SecurityState {
        let mut interval = tokio::time::interval(Duration::from_millis(poll_interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let state = self.tick();
            if !state.is_public() {
                crate::debug!("security.watch_stopped state={state}");
                return state;
            }
        }
    }
}

impl DeviceSecurityPolicy {
    /// Creates a policy with an explicit configuration and clock.
    #[must_use]
    pub fn with_clock(
        store: Arc<dyn PartitionStore>,
        decisions: Arc<dyn DecisionSurface>,
        notifier: Option<Arc<dyn SecurityNotifier>>,
        activity: ActivityReporter,
        config: &HandoffConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            decisions,
            notifier,
            clock,
            activity,
            keys: StorageKeys::new(&config.namespace),
            inner: Mutex::new(PolicyState {
                state: SecurityState::Unclassified,
                timer: InactivityTimer::new(
                    config.inactivity_timeout_ms,
                    config.inactivity_warning_lead_ms,
                    config.activity_debounce_ms,
                ),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PolicyState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_flag(&self, key: &str) -> Option<bool> {
        match self.store.get_optional(key) {
            Ok(value) => value.map(|v| v == "true"),
            Err(e) => {
                crate::warn!("security.read_failed key={key} error={e}");
                None
            }
        }
    }

    fn remembered_class(&self) -> Option<DeviceClass> {
        if !self.read_flag(&self.keys.remember_device()).unwrap_or(false) {
            return None;
        }
        let raw = self
            .store
            .get_optional(&self.keys.device_type())
            .inspect_err(|e| crate::warn!("security.read_failed key=deviceType error={e}"))
            .ok()??;
        raw.parse().ok()
    }

    fn write(&self, key: String, value: String) {
        if let Err(e) = self.store.set(key.clone(), value) {
            crate::warn!("security.write_failed key={key} error={e}");
        }
    }

    fn delete(&self, key: &str) {
        if let Err(e) = self.store.delete_if_present(key) {
            crate::warn!("security.delete_failed key={key} error={e}");
        }
    }

    fn apply_class(&self, device_class: DeviceClass, remember: bool) -> SecurityState {
        self.write(self.keys.device_type(), device_class.to_string());
        self.write(self.keys.remember_device(), remember.to_string());

        let state = match device_class {
            DeviceClass::Public => {
                self.write(self.keys.public_mode_active(), "true".to_string());
                let now = self.clock.now_ms();
                let mut inner = self.lock();
                inner.timer.arm(now);
                inner.state = SecurityState::PublicActive;
                inner.state
            }
            DeviceClass::Personal => {
                self.delete(&self.keys.public_mode_active());
                let mut inner = self.lock();
                inner.timer.disarm();
                inner.state = SecurityState::Personal;
                inner.state
            }
        };

        crate::info!("security.classified class={device_class} remember={remember}");
        self.activity.report(
            "device_classified",
            "Device classified",
            &[
                ("device_class", device_class.to_string()),
                ("remember", remember.to_string()),
            ],
        );
        state
    }

    /// Removes the active identity's content, the session pointer and the public flag.
    ///
    /// Every key is attempted even if earlier ones fail.
    fn wipe(&self, action: &str) {
        let session = SessionPointer::new(self.store.as_ref(), &self.keys);
        let identity: Option<Identity> = session.current().unwrap_or_else(|e| {
            crate::error!("security.session_read_failed error={e}");
            None
        });

        if let Some(identity) = &identity {
            for kind in ContentKind::all() {
                self.delete(&self.keys.content(kind, identity));
            }
        }
        if let Err(e) = session.clear() {
            crate::error!("security.session_clear_failed error={e}");
        }
        self.delete(&self.keys.public_mode_active());

        self.lock().state = SecurityState::LoggedOut;
        self.activity.report(
            action,
            "Account data wiped on public device",
            &[(
                "identity",
                identity.map_or_else(|| "none".to_string(), |i| i.to_string()),
            )],
        );
    }
}
