use std::sync::OnceLock;

static CONFIG_INSTANCE: OnceLock<HandoffConfig> = OnceLock::new();

/// Namespace the original web app used for every storage key.
pub const DEFAULT_NAMESPACE: &str = "dualTextWriter";

/// Tunables shared by the matcher, the migration manager and the device security policy.
///
/// Hosts normally call [`init_handoff_config`] once at startup. Services can also be
/// constructed with an explicit config, which is how the tests isolate themselves.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct HandoffConfig {
    /// Prefix of every storage key, e.g. `dualTextWriter_savedTexts_alice`.
    pub namespace: String,
    /// Minimum similarity for a legacy account to be proposed.
    pub confidence_threshold: f64,
    /// Number of items appended to the target per write while transferring.
    pub batch_size: u32,
    /// Backups older than this many days are removed by `prune_backups`.
    pub backup_retention_days: u32,
    /// Continuous inactivity before a public device is wiped.
    pub inactivity_timeout_ms: u64,
    /// How long before the wipe the warning is raised.
    pub inactivity_warning_lead_ms: u64,
    /// Minimum spacing between two accepted activity signals.
    pub activity_debounce_ms: u64,
    /// Number of completed migrations kept in the history.
    pub history_limit: u32,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            confidence_threshold: 0.7,
            batch_size: 100,
            backup_retention_days: 30,
            inactivity_timeout_ms: 30 * 60 * 1000,
            inactivity_warning_lead_ms: 5 * 60 * 1000,
            activity_debounce_ms: 1000,
            history_limit: 10,
        }
    }
}

/// Returns the built-in defaults, for hosts that only want to tweak a field or two.
#[uniffi::export]
#[must_use]
pub fn default_handoff_config() -> HandoffConfig {
    HandoffConfig::default()
}

/// Installs the global configuration. Later calls are ignored with a warning.
///
/// ```rust
/// use handoff::primitives::config::{current_config, init_handoff_config, HandoffConfig};
///
/// init_handoff_config(HandoffConfig {
///     confidence_threshold: 0.8,
///     ..HandoffConfig::default()
/// });
/// assert!((current_config().confidence_threshold - 0.8).abs() < f64::EPSILON);
/// ```
#[uniffi::export]
pub fn init_handoff_config(config: HandoffConfig) {
    let namespace = config.namespace.clone();
    match CONFIG_INSTANCE.set(config) {
        Ok(()) => {
            crate::info!("config.initialized namespace={namespace}");
        }
        Err(_) => {
            crate::warn!("config.already_initialized ignoring namespace={namespace}");
        }
    }
}

/// The global configuration, or the defaults when the host never initialised it.
#[must_use]
pub fn current_config() -> HandoffConfig {
    CONFIG_INSTANCE.get().cloned().unwrap_or_else(|| {
        crate::debug!("config.not_initialized using defaults");
        HandoffConfig::default()
    })
}

/// Whether [`init_handoff_config`] has been called.
#[must_use]
pub fn is_initialized() -> bool {
    CONFIG_INSTANCE.get().is_some()
}
