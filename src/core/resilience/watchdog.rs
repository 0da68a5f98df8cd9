//! No-progress watchdog.
//!
//! Detects sessions where every connection looks healthy but nothing moves:
//! audio flows in, no recognition comes back, no phase changes. Any
//! meaningful activity refreshes the progress mark; a stall past the
//! threshold triggers a recognizer recovery, capped within a rolling window
//! before the session is ended with an explicit reason.

use std::collections::VecDeque;

use tracing::warn;

use crate::utils::epoch_ms;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// No progress for this long counts as a stall.
    pub stall_ms: u64,
    /// Recoveries allowed inside the rolling window before giving up.
    pub recovery_cap: u32,
    pub recovery_window_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stall_ms: 15_000,
            recovery_cap: 2,
            recovery_window_ms: 120_000,
        }
    }
}

/// Verdict for one watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Healthy,
    /// Stalled; force a recognizer reconnect.
    Recover,
    /// Stalled again beyond the cap; end the session.
    Exhausted,
}

pub struct ProgressWatchdog {
    config: WatchdogConfig,
    last_progress_ms: u64,
    recovery_times: VecDeque<u64>,
}

impl ProgressWatchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            last_progress_ms: epoch_ms(),
            recovery_times: VecDeque::new(),
        }
    }

    pub fn stall_ms(&self) -> u64 {
        self.config.stall_ms
    }

    /// Record meaningful activity: audio forwarded, provider message,
    /// phase change.
    pub fn mark_progress(&mut self) {
        self.last_progress_ms = epoch_ms();
    }

    /// Periodic check. A `Recover` verdict also counts as progress so the
    /// next check measures the recovery, not the original stall.
    pub fn check(&mut self) -> WatchdogVerdict {
        let now = epoch_ms();
        if now.saturating_sub(self.last_progress_ms) < self.config.stall_ms {
            return WatchdogVerdict::Healthy;
        }

        while let Some(&t) = self.recovery_times.front() {
            if now.saturating_sub(t) > self.config.recovery_window_ms {
                self.recovery_times.pop_front();
            } else {
                break;
            }
        }

        if self.recovery_times.len() as u32 >= self.config.recovery_cap {
            warn!(
                recoveries = self.recovery_times.len(),
                "stall recovery cap exhausted"
            );
            return WatchdogVerdict::Exhausted;
        }

        warn!(
            stalled_ms = now.saturating_sub(self.last_progress_ms),
            "no progress, forcing recovery"
        );
        self.recovery_times.push_back(now);
        self.last_progress_ms = now;
        WatchdogVerdict::Recover
    }
}
