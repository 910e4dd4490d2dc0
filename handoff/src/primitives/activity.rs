use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

/// One structured event for the host's activity log / analytics pipeline.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct ActivityEvent {
    /// Machine-readable action, e.g. `migration_complete`.
    pub action: String,
    /// Short human-readable description.
    pub message: String,
    /// Flat key/value details.
    pub details: HashMap<String, String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

/// Receives an [`ActivityEvent`] for every state transition.
///
/// Purely observational: nothing in Handoff depends on the sink succeeding.
#[uniffi::export(with_foreign)]
pub trait ActivitySink: Send + Sync {
    /// Records one event.
    fn record(&self, event: ActivityEvent);
}

/// Fans an event out to the `log` facade and, if present, the host sink.
#[derive(Clone, Default)]
pub struct ActivityReporter {
    sink: Option<Arc<dyn ActivitySink>>,
}

impl ActivityReporter {
    /// A reporter that forwards to `sink`.
    #[must_use]
    pub fn new(sink: Option<Arc<dyn ActivitySink>>) -> Self {
        Self { sink }
    }

    /// Reports `action`. A panicking sink is contained and logged.
    pub fn report(&self, action: &str, message: &str, details: &[(&str, String)]) {
        let rendered = details
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        crate::info!("{action} {rendered}");

        let Some(sink) = &self.sink else {
            return;
        };

        let event = ActivityEvent {
            action: action.to_string(),
            message: message.to_string(),
            details: details
                .iter()
                .map(|(key, value)| ((*key).to_string(), value.clone()))
                .collect(),
            timestamp_ms: Utc::now().timestamp_millis(),
        };

        // Foreign sinks may throw; lifting that can panic on our side of the FFI.
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            sink.record(event);
        }));
        if outcome.is_err() {
            crate::warn!("activity_sink.failed action={action}");
        }
    }
}
