//! Heartbeat tracking.
//!
//! Application-level ping/pong over the session transport. Missing pongs are
//! counted and, past the limit, the connection is proactively treated as an
//! abnormal close so the reconnect path runs instead of a half-dead socket
//! lingering.

/// Heartbeat tuning.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    /// Consecutive unanswered pings tolerated before declaring the
    /// connection dead.
    pub missed_limit: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            missed_limit: 3,
        }
    }
}

/// What to do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping and reschedule.
    SendPing,
    /// Too many misses; force the abnormal-close path.
    ConnectionDead,
}

pub struct HeartbeatTracker {
    config: HeartbeatConfig,
    missed: u32,
}

impl HeartbeatTracker {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self { config, missed: 0 }
    }

    pub fn interval_ms(&self) -> u64 {
        self.config.interval_ms
    }

    /// Called when the heartbeat timer fires. The previous ping is counted
    /// as missed if no pong arrived since.
    pub fn on_tick(&mut self) -> HeartbeatAction {
        if self.missed >= self.config.missed_limit {
            HeartbeatAction::ConnectionDead
        } else {
            self.missed += 1;
            HeartbeatAction::SendPing
        }
    }

    pub fn on_pong(&mut self) {
        self.missed = 0;
    }

    /// Reset after a transport reattach; the new socket starts clean.
    pub fn reset(&mut self) {
        self.missed = 0;
    }
}
