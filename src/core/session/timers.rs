//! Named session timers.
//!
//! Every timer a session uses is a named entry in one scheduler: scheduling
//! replaces any previous instance of the same name, cancellation is explicit,
//! and firing delivers a [`SessionEvent::Timer`] back into the session's own
//! channel. This keeps timer lifecycles enumerable instead of scattered
//! handles with manual clear/reset at call sites.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use super::events::SessionEvent;

/// All timers a session may arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Continuation-guard grace window.
    ContinuationGrace,
    /// Stuck turn-lock watchdog.
    TurnWatchdog,
    /// No-sentence-produced recovery fallback.
    ResponseFallback,
    /// Application heartbeat ping.
    Heartbeat,
    /// No-progress watchdog check.
    ProgressCheck,
    /// Reconnect grace window while parked.
    ReconnectGrace,
    /// Barge-in confirm window.
    BargeConfirm,
    /// Student inactivity timeout.
    Inactivity,
    /// Per-session wall-clock budget.
    SessionBudget,
}

pub struct TimerScheduler {
    events: mpsc::Sender<SessionEvent>,
    handles: HashMap<TimerKey, JoinHandle<()>>,
}

impl TimerScheduler {
    pub fn new(events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            events,
            handles: HashMap::new(),
        }
    }

    /// Arm `key` to fire once after `delay`. Replaces any armed instance.
    pub fn schedule(&mut self, key: TimerKey, delay: Duration) {
        self.cancel(key);
        trace!(?key, ?delay, "timer armed");
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::Timer(key)).await;
        });
        self.handles.insert(key, handle);
    }

    pub fn cancel(&mut self, key: TimerKey) {
        if let Some(handle) = self.handles.remove(&key) {
            handle.abort();
        }
    }

    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.handles
            .get(&key)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Cancel everything. Used by the finalizer.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
