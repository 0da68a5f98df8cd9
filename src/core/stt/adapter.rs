//! Speech recognition adapter.
//!
//! Owns the provider connection for one session and everything about keeping
//! it alive: exponential backoff reconnects, replay of ring-buffered audio
//! produced while disconnected, a dead-man timer for "connected but silently
//! stalled" providers, and a one-time feature-downgrade retry for rejected
//! configurations. The session actor only sees normalized [`SpeechEvent`]s
//! and [`RecognizerStatus`] updates.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::base::{create_provider, BaseStt, SttConfig, SttError};
use crate::core::session::events::SessionEvent;
use crate::utils::epoch_ms;

/// Adapter lifecycle state surfaced to the session and the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerStatus {
    Connected,
    Reconnecting { attempt: u32 },
    /// Connected with the reduced feature set after a configuration fault.
    Degraded,
    /// Backoff exhausted; the session is unrecoverable.
    Failed,
}

impl RecognizerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognizerStatus::Connected => "connected",
            RecognizerStatus::Reconnecting { .. } => "reconnecting",
            RecognizerStatus::Degraded => "degraded",
            RecognizerStatus::Failed => "failed",
        }
    }
}

/// Commands accepted by the adapter task.
#[derive(Debug)]
pub enum SttCommand {
    Audio(Bytes),
    /// Externally requested reconnect (no-progress watchdog).
    Reconnect(&'static str),
    Close,
}

/// Reconnect and stall tuning. Values are configuration, not protocol.
#[derive(Debug, Clone)]
pub struct RecognizerTuning {
    pub max_reconnect_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Bound on audio retained for replay across a reconnect.
    pub ring_capacity_bytes: usize,
    /// No provider message for this long, despite fresh audio, forces a
    /// reconnect even without a close event.
    pub deadman_ms: u64,
    /// Consecutive send failures tolerated before forcing a reconnect.
    pub send_failure_limit: u32,
    /// Dead-man recoveries allowed inside the rolling window before the
    /// recognizer is declared failed. A provider that keeps accepting audio
    /// while staying silent would otherwise reconnect forever.
    pub deadman_recovery_cap: u32,
    pub deadman_recovery_window_ms: u64,
}

impl Default for RecognizerTuning {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 4000,
            ring_capacity_bytes: 512 * 1024,
            deadman_ms: 8000,
            send_failure_limit: 3,
            deadman_recovery_cap: 2,
            deadman_recovery_window_ms: 120_000,
        }
    }
}

/// Rolling budget of recoveries. Entries age out of the window; spending
/// past the cap is refused.
struct RecoveryBudget {
    cap: u32,
    window_ms: u64,
    times: VecDeque<u64>,
}

impl RecoveryBudget {
    fn new(cap: u32, window_ms: u64) -> Self {
        Self {
            cap,
            window_ms,
            times: VecDeque::new(),
        }
    }

    fn try_spend(&mut self, now: u64) -> bool {
        while let Some(&t) = self.times.front() {
            if now.saturating_sub(t) > self.window_ms {
                self.times.pop_front();
            } else {
                break;
            }
        }
        if self.times.len() as u32 >= self.cap {
            return false;
        }
        self.times.push_back(now);
        true
    }
}

/// Bounded FIFO of recently forwarded audio frames, replayed in order after
/// a successful reconnect.
struct AudioRing {
    frames: VecDeque<Bytes>,
    bytes: usize,
    capacity_bytes: usize,
}

impl AudioRing {
    fn new(capacity_bytes: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            bytes: 0,
            capacity_bytes,
        }
    }

    fn push(&mut self, frame: Bytes) {
        self.bytes += frame.len();
        self.frames.push_back(frame);
        while self.bytes > self.capacity_bytes {
            if let Some(dropped) = self.frames.pop_front() {
                self.bytes -= dropped.len();
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> Vec<Bytes> {
        self.frames.iter().cloned().collect()
    }
}

/// Handle the session actor uses to drive its recognizer.
pub struct RecognizerHandle {
    commands: mpsc::Sender<SttCommand>,
    task: Option<JoinHandle<()>>,
}

impl RecognizerHandle {
    /// Spawn the adapter task. Recognition events and status updates flow
    /// into `events`; the handle only carries commands the other way.
    pub fn spawn(
        config: SttConfig,
        tuning: RecognizerTuning,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(256);
        let task = tokio::spawn(run_adapter(config, tuning, events, command_rx));
        Self {
            commands: command_tx,
            task: Some(task),
        }
    }

    pub async fn send_audio(&self, frame: Bytes) {
        if self.commands.send(SttCommand::Audio(frame)).await.is_err() {
            debug!("recognizer task gone; dropping audio frame");
        }
    }

    pub async fn force_reconnect(&self, reason: &'static str) {
        let _ = self.commands.send(SttCommand::Reconnect(reason)).await;
    }

    pub async fn close(&mut self) {
        let _ = self.commands.send(SttCommand::Close).await;
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        }
    }
}

async fn run_adapter(
    config: SttConfig,
    tuning: RecognizerTuning,
    events: mpsc::Sender<SessionEvent>,
    mut commands: mpsc::Receiver<SttCommand>,
) {
    // Streaming errors from the provider callback funnel back into this loop
    // so reconnection decisions stay single-threaded.
    let (error_tx, mut error_rx) = mpsc::channel::<SttError>(16);

    let mut ring = AudioRing::new(tuning.ring_capacity_bytes);
    let mut downgraded = false;
    let mut send_failures: u32 = 0;
    let mut last_audio_ms: u64 = 0;
    let mut deadman_budget =
        RecoveryBudget::new(tuning.deadman_recovery_cap, tuning.deadman_recovery_window_ms);

    let mut provider = match establish(&config, downgraded, &events, &error_tx, &tuning).await {
        Some(p) => p,
        None => {
            let _ = events
                .send(SessionEvent::SttStatus(RecognizerStatus::Failed))
                .await;
            return;
        }
    };

    let mut deadman = tokio::time::interval(Duration::from_millis(tuning.deadman_ms.max(1000) / 2));
    deadman.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let mut reconnect_reason: Option<&'static str> = None;
        let mut force_downgrade = false;

        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(SttCommand::Audio(frame)) => {
                    last_audio_ms = epoch_ms();
                    ring.push(frame.clone());
                    if let Err(e) = provider.send_audio(frame).await {
                        send_failures += 1;
                        warn!(failures = send_failures, "audio forward failed: {e}");
                        if send_failures >= tuning.send_failure_limit {
                            reconnect_reason = Some("send failures");
                        }
                    } else {
                        send_failures = 0;
                    }
                }
                Some(SttCommand::Reconnect(reason)) => {
                    reconnect_reason = Some(reason);
                }
                Some(SttCommand::Close) | None => {
                    let _ = provider.disconnect().await;
                    info!("recognizer closed");
                    return;
                }
            },
            Some(err) = error_rx.recv() => {
                if err.is_configuration_fault() && !downgraded {
                    // One-time fallback with the reduced feature set instead
                    // of burning backoff attempts on a config the provider
                    // will keep rejecting.
                    warn!("provider rejected configuration, retrying downgraded: {err}");
                    force_downgrade = true;
                    reconnect_reason = Some("configuration rejected");
                } else {
                    warn!("provider stream fault: {err}");
                    reconnect_reason = Some("stream fault");
                }
            },
            _ = deadman.tick() => {
                let now = epoch_ms();
                let last_msg = provider.last_message_ms();
                let audio_fresh = now.saturating_sub(last_audio_ms) < tuning.deadman_ms;
                if provider.is_ready()
                    && last_msg > 0
                    && now.saturating_sub(last_msg) > tuning.deadman_ms
                    && audio_fresh
                {
                    if !deadman_budget.try_spend(now) {
                        error!("dead-man recovery cap exhausted, recognizer failed");
                        let _ = provider.disconnect().await;
                        let _ = events
                            .send(SessionEvent::SttStatus(RecognizerStatus::Failed))
                            .await;
                        return;
                    }
                    warn!(
                        silent_ms = now.saturating_sub(last_msg),
                        "provider silently stalled, forcing reconnect"
                    );
                    reconnect_reason = Some("dead-man timer");
                }
            },
        }

        if let Some(reason) = reconnect_reason {
            info!(reason, "recognizer reconnecting");
            let _ = provider.disconnect().await;
            if force_downgrade {
                downgraded = true;
            }
            send_failures = 0;
            match establish(&config, downgraded, &events, &error_tx, &tuning).await {
                Some(mut fresh) => {
                    // Replay audio captured while the connection was down so
                    // no speech is lost across the gap.
                    let replay = ring.snapshot();
                    debug!(frames = replay.len(), "replaying buffered audio");
                    for frame in replay {
                        if fresh.send_audio(frame).await.is_err() {
                            break;
                        }
                    }
                    provider = fresh;
                }
                None => {
                    error!("recognizer reconnect attempts exhausted");
                    let _ = events
                        .send(SessionEvent::SttStatus(RecognizerStatus::Failed))
                        .await;
                    return;
                }
            }
        }
    }
}

/// Connect with exponential backoff. Returns `None` once attempts are
/// exhausted; a new provider instance is created per attempt, never reused.
async fn establish(
    config: &SttConfig,
    downgraded: bool,
    events: &mpsc::Sender<SessionEvent>,
    error_tx: &mpsc::Sender<SttError>,
    tuning: &RecognizerTuning,
) -> Option<Box<dyn BaseStt>> {
    let effective = if downgraded {
        config.downgraded()
    } else {
        config.clone()
    };

    for attempt in 0..tuning.max_reconnect_attempts {
        if attempt > 0 {
            let _ = events
                .send(SessionEvent::SttStatus(RecognizerStatus::Reconnecting {
                    attempt,
                }))
                .await;
            let backoff = (tuning.initial_backoff_ms << (attempt - 1)).min(tuning.max_backoff_ms);
            let jitter = rand::thread_rng().gen_range(0..=backoff / 4);
            tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
        }

        let mut provider = match create_provider(&effective) {
            Ok(p) => p,
            Err(e) => {
                error!("provider construction failed: {e}");
                return None;
            }
        };

        let session_events = events.clone();
        provider.on_event(std::sync::Arc::new(move |event| {
            let tx = session_events.clone();
            Box::pin(async move {
                let _ = tx.send(SessionEvent::Speech(event)).await;
            })
        }));
        let errors = error_tx.clone();
        provider.on_error(std::sync::Arc::new(move |err| {
            let tx = errors.clone();
            Box::pin(async move {
                let _ = tx.send(err).await;
            })
        }));

        match provider.connect().await {
            Ok(()) => {
                let status = if downgraded {
                    RecognizerStatus::Degraded
                } else {
                    RecognizerStatus::Connected
                };
                let _ = events.send(SessionEvent::SttStatus(status)).await;
                info!(
                    provider = provider.provider_info(),
                    attempt, downgraded, "recognizer connected"
                );
                return Some(provider);
            }
            Err(e) => {
                warn!(attempt, "recognizer connect failed: {e}");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_when_over_capacity() {
        let mut ring = AudioRing::new(10);
        ring.push(Bytes::from(vec![1u8; 4]));
        ring.push(Bytes::from(vec![2u8; 4]));
        ring.push(Bytes::from(vec![3u8; 4]));
        let frames = ring.snapshot();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][0], 2);
        assert_eq!(frames[1][0], 3);
        assert!(ring.bytes <= 10);
    }

    #[test]
    fn ring_preserves_order() {
        let mut ring = AudioRing::new(1024);
        for i in 0..5u8 {
            ring.push(Bytes::from(vec![i; 2]));
        }
        let frames = ring.snapshot();
        let first: Vec<u8> = frames.iter().map(|f| f[0]).collect();
        assert_eq!(first, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn recovery_budget_refuses_past_the_cap() {
        let mut budget = RecoveryBudget::new(2, 60_000);
        assert!(budget.try_spend(1_000));
        assert!(budget.try_spend(2_000));
        assert!(!budget.try_spend(3_000));
    }

    #[test]
    fn recovery_budget_refills_as_entries_age_out() {
        let mut budget = RecoveryBudget::new(1, 1_000);
        assert!(budget.try_spend(1_000));
        assert!(!budget.try_spend(1_500));
        // The first spend has left the rolling window.
        assert!(budget.try_spend(3_000));
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(RecognizerStatus::Connected.as_str(), "connected");
        assert_eq!(
            RecognizerStatus::Reconnecting { attempt: 2 }.as_str(),
            "reconnecting"
        );
        assert_eq!(RecognizerStatus::Degraded.as_str(), "degraded");
        assert_eq!(RecognizerStatus::Failed.as_str(), "failed");
    }
}
