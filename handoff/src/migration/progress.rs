use std::sync::Arc;

use crate::migration::state::{MigrationProgress, MigrationStep, MigrationSummary};
use crate::primitives::now_ms;

/// Delay the web app inserted between two write batches, kept for the estimate.
const BATCH_DELAY_MS: f64 = 10.0;
/// Rough cost of writing one batch.
const BATCH_WRITE_SECONDS: f64 = 0.1;

/// Receives progress while a migration runs. Purely advisory.
#[uniffi::export(with_foreign)]
pub trait ProgressSink: Send + Sync {
    /// Called at every step boundary and after every batch.
    fn on_progress(&self, progress: MigrationProgress);

    /// Called once after a successful migration.
    fn on_complete(&self, summary: MigrationSummary);

    /// Called once when a migration fails.
    fn on_error(&self, message: String);
}

/// Turns step / item counts into [`MigrationProgress`] updates for an optional sink.
pub(crate) struct ProgressTracker {
    sink: Option<Arc<dyn ProgressSink>>,
    started_at_ms: i64,
    total: u64,
}

impl ProgressTracker {
    pub(crate) fn start(sink: Option<Arc<dyn ProgressSink>>, total: u64) -> Self {
        Self {
            sink,
            started_at_ms: now_ms(),
            total,
        }
    }

    pub(crate) fn elapsed_ms(&self) -> u64 {
        u64::try_from(now_ms() - self.started_at_ms).unwrap_or_default()
    }

    pub(crate) fn report(&self, step: MigrationStep, current: u64, percentage: u8) {
        let percentage = percentage.min(100);
        let elapsed_ms = self.elapsed_ms();
        let estimated_remaining_ms = (percentage > 0).then(|| {
            elapsed_ms.saturating_mul(u64::from(100 - percentage)) / u64::from(percentage)
        });

        crate::debug!("migration.progress step={step} current={current} percentage={percentage}");

        let progress = MigrationProgress {
            step,
            current,
            total: self.total,
            percentage,
            elapsed_ms,
            estimated_remaining_ms,
        };
        self.notify(|sink| sink.on_progress(progress));
    }

    /// Progress inside the transfer step, mapped onto 10..=80 %.
    pub(crate) fn report_transfer(&self, transferred: u64) {
        let percentage = if self.total == 0 {
            80
        } else {
            10 + (transferred.min(self.total) * 70 / self.total)
        };
        self.report(
            MigrationStep::Transfer,
            transferred,
            u8::try_from(percentage).unwrap_or(80),
        );
    }

    pub(crate) fn complete(&self, summary: &MigrationSummary) {
        self.report(MigrationStep::Complete, self.total, 100);
        let summary = summary.clone();
        self.notify(|sink| sink.on_complete(summary));
    }

    pub(crate) fn fail(&self, message: &str) {
        let message = message.to_string();
        self.notify(|sink| sink.on_error(message));
    }

    fn notify(&self, f: impl FnOnce(&dyn ProgressSink)) {
        let Some(sink) = &self.sink else {
            return;
        };
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(sink.as_ref())));
        if outcome.is_err() {
            crate::warn!("migration.progress_sink_failed");
        }
    }
}

/// Number of write batches needed for `item_count` items.
#[must_use]
pub fn batch_count(item_count: u64, batch_size: u32) -> u64 {
    item_count.div_ceil(u64::from(batch_size.max(1)))
}

/// Estimated transfer duration in seconds for `batch_count` batches.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimate_seconds(batch_count: u64) -> f64 {
    let batches = batch_count as f64;
    batches * BATCH_WRITE_SECONDS + batches * BATCH_DELAY_MS / 1000.0
}

/// Renders a byte count with binary units, e.g. `1.5 KB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}
