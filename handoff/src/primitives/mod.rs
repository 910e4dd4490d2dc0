//! Host-facing primitives: persistence, logging, activity reporting and configuration.

/// Structured activity events for the host's analytics sink.
pub mod activity;

/// Global configuration.
pub mod config;

/// Logging bridged to the host through the `log` facade.
pub mod logger;

/// Key/value persistence of the current profile.
pub mod partition_store;

pub use activity::{ActivityEvent, ActivityReporter, ActivitySink};
pub use config::HandoffConfig;
pub use partition_store::{InMemoryPartitionStore, PartitionStore, StoreError};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
