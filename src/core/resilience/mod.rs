//! Session resilience: heartbeat tracking and the no-progress watchdog.
//! Reconnect parking itself lives in the session actor, which keeps running
//! with no sink attached and a grace timer armed.

pub mod heartbeat;
pub mod watchdog;

pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatTracker};
pub use watchdog::{ProgressWatchdog, WatchdogConfig, WatchdogVerdict};
