use std::time::{Duration, Instant};

/// What the watchdog thinks of the current silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogStatus {
    Ok,
    /// Idle time has entered the warning margin. Reported once per stall.
    Warning(Duration),
    /// Idle time has passed the timeout.
    Expired(Duration),
}

/// Fails a stage whose tool has gone quiet.
///
/// Any output event counts as activity, progress line or not.
#[derive(Debug, Clone)]
pub struct StallWatchdog {
    timeout: Duration,
    warning_margin: Duration,
    last_activity: Instant,
    warned: bool,
}

impl StallWatchdog {
    pub fn new(timeout: Duration, warning_margin: Duration, now: Instant) -> Self {
        Self {
            timeout,
            warning_margin,
            last_activity: now,
            warned: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Note activity at `at`. Older timestamps are ignored.
    pub fn record(&mut self, at: Instant) {
        if at > self.last_activity {
            self.last_activity = at;
            self.warned = false;
        }
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn check(&mut self, now: Instant) -> WatchdogStatus {
        let idle = self.idle(now);
        if idle > self.timeout {
            return WatchdogStatus::Expired(idle);
        }
        if idle > self.timeout.saturating_sub(self.warning_margin) && !self.warned {
            self.warned = true;
            return WatchdogStatus::Warning(idle);
        }
        WatchdogStatus::Ok
    }
}
