//! The inactivity timer of a public device, as a pure state machine.
//!
//! Nothing here reads a clock or schedules anything: the caller passes the current time
//! to every method, which keeps presentation and timing out of the logic.

/// What the timer wants the caller to do after a [`InactivityTimer::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Nothing to do.
    None,
    /// Show the inactivity warning. Emitted once per idle period.
    Warn {
        /// Time left before the wipe.
        remaining_ms: u64,
    },
    /// The timeout elapsed. The timer has disarmed itself.
    Expired,
}

#[derive(Debug, Clone)]
pub struct InactivityTimer {
    timeout_ms: u64,
    warning_lead_ms: u64,
    debounce_ms: u64,
    armed: bool,
    warned: bool,
    last_activity_ms: i64,
    last_reset_ms: i64,
}

impl InactivityTimer {
    #[must_use]
    pub const fn new(timeout_ms: u64, warning_lead_ms: u64, debounce_ms: u64) -> Self {
        Self {
            timeout_ms,
            warning_lead_ms,
            debounce_ms,
            armed: false,
            warned: false,
            last_activity_ms: 0,
            last_reset_ms: 0,
        }
    }

    /// Starts a fresh idle period at `now_ms`.
    pub fn arm(&mut self, now_ms: i64) {
        self.armed = true;
        self.warned = false;
        self.last_activity_ms = now_ms;
        self.last_reset_ms = now_ms;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
        self.warned = false;
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether the warning has been shown for the current idle period.
    #[must_use]
    pub const fn is_warning(&self) -> bool {
        self.armed && self.warned
    }

    /// Registers user activity. Returns `true` if it reset the idle period.
    ///
    /// Signals closer than the debounce interval to the previous reset are ignored.
    pub fn record_activity(&mut self, now_ms: i64) -> bool {
        if !self.armed || elapsed(self.last_reset_ms, now_ms) <= self.debounce_ms {
            return false;
        }
        self.last_activity_ms = now_ms;
        self.last_reset_ms = now_ms;
        self.warned = false;
        true
    }

    /// Advances the timer to `now_ms`.
    pub fn poll(&mut self, now_ms: i64) -> TimerEvent {
        if !self.armed {
            return TimerEvent::None;
        }

        let idle = elapsed(self.last_activity_ms, now_ms);
        if idle >= self.timeout_ms {
            self.disarm();
            return TimerEvent::Expired;
        }

        let warn_at = self.timeout_ms.saturating_sub(self.warning_lead_ms);
        if idle >= warn_at && !self.warned {
            self.warned = true;
            return TimerEvent::Warn {
                remaining_ms: self.timeout_ms - idle,
            };
        }

        TimerEvent::None
    }
}

fn elapsed(since_ms: i64, now_ms: i64) -> u64 {
    u64::try_from(now_ms.saturating_sub(since_ms)).unwrap_or(0)
}
