//! Session actor.
//!
//! One tokio task per session owns all mutable session state. Every input,
//! whatever its source, arrives as a [`SessionEvent`] on the actor's single
//! channel and is handled to completion before the next one, so there is no
//! locking and no interleaving anywhere in the conversation logic. The actor
//! outlives its transport: on an abnormal disconnect it parks with a grace
//! timer and a reconnecting client reclaims it through the registry.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{DisconnectKind, OutboundSink, SessionEvent};
use super::finalizer::flush_session;
use super::phase::{Phase, PhaseError};
use super::state::{CloseReason, SessionProfile, SessionState, Speaker};
use super::timers::{TimerKey, TimerScheduler};
use crate::config::ServerConfig;
use crate::core::barge_in::{BargeAction, BargeInController};
use crate::core::providers::{LanguageModel, Moderation, Persistence, SpeechSynth, Verdict};
use crate::core::resilience::{
    HeartbeatAction, HeartbeatTracker, ProgressWatchdog, WatchdogVerdict,
};
use crate::core::response::{spawn_response, ResponseRequest};
use crate::core::signal::{AudioClass, EchoGuard, EchoGuardConfig, NoiseGate, NoiseGateConfig};
use crate::core::stt::{RecognizerHandle, RecognizerStatus, SpeechEvent};
use crate::core::turn::{CommitOutcome, ContinuationGuard, GuardDecision, TurnPipeline};
use crate::handlers::ws::messages::{frame_audio_chunk, MessageRoute, OutgoingMessage};
use crate::state::SessionRegistry;

/// Spoken when generation produced nothing before the fallback deadline.
const RECOVERY_LINE: &str = "Sorry, I lost my train of thought for a moment. Could you say that again?";
/// Spoken in place of a reply the moderation collaborator blocked.
const SAFETY_LINE: &str = "Let's keep our conversation on the lesson. What would you like to work on?";

/// Fraction of speech-class frames inside the confirm window for the gate to
/// count as independent voice-activity agreement.
const VAD_AGREE_RATIO: f32 = 0.6;

/// Collaborators a session talks to. All trait objects so tests substitute
/// scripted implementations.
#[derive(Clone)]
pub struct SessionDeps {
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn SpeechSynth>,
    pub moderation: Arc<dyn Moderation>,
    pub persistence: Arc<dyn Persistence>,
}

enum Flow {
    Continue,
    Stop,
}

pub struct SessionActor {
    state: SessionState,
    config: Arc<ServerConfig>,
    deps: SessionDeps,
    registry: Arc<SessionRegistry>,

    sink: Option<OutboundSink>,
    events: mpsc::Sender<SessionEvent>,
    timers: TimerScheduler,

    gate: NoiseGate,
    echo: EchoGuard,
    guard: ContinuationGuard,
    pipeline: TurnPipeline,
    barge: BargeInController,
    heartbeat: HeartbeatTracker,
    watchdog: ProgressWatchdog,
    recognizer: RecognizerHandle,

    response_task: Option<JoinHandle<()>>,
    moderation_task: Option<JoinHandle<()>>,

    /// Live recognizer hypothesis, replace-only.
    last_partial: String,
    /// Hypothesis length at the moment the tutor was ducked.
    partial_len_at_duck: usize,
    /// Frame tallies inside the current barge-in confirm window.
    confirm_speech_frames: u32,
    confirm_total_frames: u32,
    /// Tutor audio is currently streaming to the client.
    playback_active: bool,
    /// At least one sentence was produced for the active generation.
    first_sentence_seen: bool,
    /// No transport attached; waiting out the reconnect grace window.
    parked: bool,
    /// Client said it intends to leave; shortens the next grace window.
    end_intent: bool,
    client_visible: bool,
}

impl SessionActor {
    /// Spawn a session. The returned sender is the session's only input; the
    /// registry keeps a clone so a reconnecting transport can find it.
    pub fn spawn(
        session_id: String,
        profile: SessionProfile,
        config: Arc<ServerConfig>,
        deps: SessionDeps,
        registry: Arc<SessionRegistry>,
        sink: OutboundSink,
    ) -> mpsc::Sender<SessionEvent> {
        let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(256);

        let mut stt_config = config.stt.clone();
        stt_config.language = profile.language.clone();
        let recognizer = RecognizerHandle::spawn(
            stt_config,
            config.tuning.recognizer.clone(),
            events_tx.clone(),
        );

        let band = config.band(&profile.band).clone();
        let actor = SessionActor {
            state: SessionState::new(session_id.clone(), profile),
            deps,
            registry: registry.clone(),
            sink: Some(sink),
            events: events_tx.clone(),
            timers: TimerScheduler::new(events_tx.clone()),
            gate: NoiseGate::new(NoiseGateConfig::default()),
            echo: EchoGuard::new(EchoGuardConfig::default()),
            guard: ContinuationGuard::new(band.guard_config()),
            pipeline: TurnPipeline::new(config.tuning.pipeline_config()),
            barge: BargeInController::new(band.barge_in_config()),
            heartbeat: HeartbeatTracker::new(config.tuning.heartbeat_config()),
            watchdog: ProgressWatchdog::new(config.tuning.watchdog_config()),
            recognizer,
            response_task: None,
            moderation_task: None,
            last_partial: String::new(),
            partial_len_at_duck: 0,
            confirm_speech_frames: 0,
            confirm_total_frames: 0,
            playback_active: false,
            first_sentence_seen: false,
            parked: false,
            end_intent: false,
            client_visible: true,
            config,
        };

        registry.register(session_id, events_tx.clone());
        tokio::spawn(actor.run(events_rx));
        events_tx
    }

    async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) {
        self.start();
        while let Some(event) = events.recv().await {
            if let Flow::Stop = self.dispatch(event).await {
                break;
            }
        }
        // Channel closed without an explicit end (process teardown, all
        // senders dropped). Make sure persistence still runs.
        if !self.state.ended {
            self.finalize(CloseReason::ServerShutdown).await;
        }
    }

    fn start(&mut self) {
        info!(
            session_id = %self.state.session_id,
            user_id = %self.state.profile.user_id,
            band = %self.state.profile.band,
            "session started"
        );
        self.send(OutgoingMessage::Ready {
            session_id: self.state.session_id.clone(),
            resumed: false,
        });
        self.timers.schedule(
            TimerKey::Heartbeat,
            Duration::from_millis(self.heartbeat.interval_ms()),
        );
        self.schedule_progress_check();
        self.refresh_inactivity();
        let budget = self.config.tuning.session_budget_ms;
        if budget > 0 {
            self.timers
                .schedule(TimerKey::SessionBudget, Duration::from_millis(budget));
        }
    }

    async fn dispatch(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::Attach { sink } => self.on_attach(sink),
            SessionEvent::Audio(frame) => self.on_audio(frame).await,
            SessionEvent::TextTurn(text) => {
                self.refresh_inactivity();
                self.commit_turn(text).await;
            }
            SessionEvent::Pong => self.heartbeat.on_pong(),
            SessionEvent::Visibility { visible } => {
                debug!(visible, "client visibility changed");
                self.client_visible = visible;
                if visible {
                    self.refresh_inactivity();
                } else {
                    // A hidden tab legitimately sends no audio; don't let the
                    // inactivity clock end the session underneath it.
                    self.timers.cancel(TimerKey::Inactivity);
                }
            }
            SessionEvent::EndIntent => {
                debug!("client signalled end intent");
                self.end_intent = true;
            }
            SessionEvent::End => {
                self.finalize(CloseReason::UserEnd).await;
                return Flow::Stop;
            }
            SessionEvent::SocketClosed(kind) => return self.on_socket_closed(kind).await,
            SessionEvent::Speech(event) => self.on_speech(event),
            SessionEvent::SttStatus(status) => return self.on_stt_status(status).await,
            SessionEvent::ModerationVerdict { turn, verdict } => {
                self.on_moderation_verdict(turn, verdict).await;
            }
            SessionEvent::Sentence { generation, text } => self.on_sentence(generation, text),
            SessionEvent::AudioChunk { generation, audio } => {
                self.on_audio_chunk(generation, audio);
            }
            SessionEvent::ResponseComplete {
                generation,
                text,
                aborted,
            } => self.on_response_complete(generation, text, aborted).await,
            SessionEvent::ResponseError {
                generation,
                message,
            } => {
                if generation == self.state.generation() {
                    warn!(generation, "response error: {message}");
                }
            }
            SessionEvent::Timer(key) => return self.on_timer(key).await,
            SessionEvent::Shutdown(reason) => {
                self.finalize(reason).await;
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn on_attach(&mut self, sink: OutboundSink) {
        let resumed = self.parked;
        self.sink = Some(sink);
        self.parked = false;
        self.end_intent = false;
        self.heartbeat.reset();
        self.timers.cancel(TimerKey::ReconnectGrace);
        self.timers.schedule(
            TimerKey::Heartbeat,
            Duration::from_millis(self.heartbeat.interval_ms()),
        );
        self.refresh_inactivity();
        if resumed {
            self.state.reconnect_attempts += 1;
            info!(
                session_id = %self.state.session_id,
                attempts = self.state.reconnect_attempts,
                "transport reattached, session resumed"
            );
        }
        self.send(OutgoingMessage::Ready {
            session_id: self.state.session_id.clone(),
            resumed,
        });
        if resumed {
            // Replay the current phase so the reconnected client can rebuild
            // its UI without guessing.
            let phase = self.state.phase.current();
            self.send(OutgoingMessage::PhaseUpdate {
                phase: phase.as_str(),
                previous: phase.as_str(),
                reason: "resumed",
            });
        }
    }

    async fn on_audio(&mut self, frame: Bytes) {
        if self.state.phase.current() == Phase::Finalizing {
            return;
        }
        let (class, energy) = self.gate.classify(&frame, self.playback_active);
        self.watchdog.mark_progress();

        if class == AudioClass::Speech {
            self.refresh_inactivity();
        }

        if self.state.phase.current() == Phase::TutorSpeaking {
            if self.barge.is_active() {
                self.confirm_total_frames += 1;
                if class == AudioClass::Speech {
                    self.confirm_speech_frames += 1;
                }
            }
            match self.barge.on_frame(class, energy, self.state.generation()) {
                BargeAction::Duck => {
                    self.partial_len_at_duck = self.last_partial.len();
                    self.confirm_speech_frames = 0;
                    self.confirm_total_frames = 0;
                    self.send(OutgoingMessage::Duck);
                    let window = self.band().confirm_window_ms;
                    self.timers
                        .schedule(TimerKey::BargeConfirm, Duration::from_millis(window));
                }
                BargeAction::CancelUnduck => {
                    self.timers.cancel(TimerKey::BargeConfirm);
                    self.send(OutgoingMessage::Unduck);
                }
                BargeAction::Interrupt => {
                    // Controller escalates via the confirm timer, not frames.
                }
                BargeAction::None => {}
            }
        } else if self.state.phase.current() == Phase::Listening && class == AudioClass::Speech {
            self.set_phase(Phase::SpeechDetected, "speech_energy");
        }

        self.recognizer.send_audio(frame).await;
    }

    fn on_speech(&mut self, event: SpeechEvent) {
        self.watchdog.mark_progress();

        if self.playback_active && self.echo.is_echo(&event.text) {
            debug!("suppressed echo of tutor output");
            return;
        }

        self.last_partial = event.text.clone();
        self.refresh_inactivity();
        self.send(OutgoingMessage::TranscriptUpdate {
            text: event.text.clone(),
        });

        if self.state.phase.current() == Phase::Listening {
            self.set_phase(Phase::SpeechDetected, "partial_transcript");
        }

        if event.end_of_turn {
            match self.guard.on_end_of_turn(&event.text, event.confidence) {
                GuardDecision::StartGrace(ms) | GuardDecision::RestartGrace(ms) => {
                    self.timers
                        .schedule(TimerKey::ContinuationGrace, Duration::from_millis(ms));
                }
                GuardDecision::Ignored => {}
            }
        }
    }

    async fn on_stt_status(&mut self, status: RecognizerStatus) -> Flow {
        self.send(OutgoingMessage::SttStatus {
            status: status.as_str(),
        });
        if status == RecognizerStatus::Failed {
            warn!(session_id = %self.state.session_id, "recognizer unrecoverable");
            self.send(OutgoingMessage::Error {
                message: "Speech recognition is unavailable right now.".to_string(),
            });
            self.finalize(CloseReason::ServerError).await;
            return Flow::Stop;
        }
        Flow::Continue
    }

    /// Accept a finished utterance into the pipeline. Dispatch starts
    /// processing; queueing only notifies the client.
    async fn commit_turn(&mut self, text: String) {
        let tutor_has_floor = self.state.phase.current().tutor_has_floor();
        match self.pipeline.commit(text, tutor_has_floor) {
            CommitOutcome::Dispatch(turn) => {
                self.set_phase(Phase::TurnCommitted, "turn_committed");
                self.start_processing(turn).await;
            }
            CommitOutcome::Queued(merged) => {
                debug!(queued = merged.len(), "turn queued behind the floor");
                self.send(OutgoingMessage::QueuedUserTurn { text: merged });
            }
        }
    }

    /// Open a new generation for `turn`: moderation first, then the response
    /// task once the verdict arrives.
    async fn start_processing(&mut self, turn: String) {
        let generation = self.state.bump_generation();
        self.pipeline.begin(turn.clone(), generation);
        self.last_partial.clear();
        self.send(OutgoingMessage::Transcript {
            speaker: Speaker::Student.as_str(),
            text: turn.clone(),
        });
        self.send(OutgoingMessage::TutorThinking);
        self.timers.schedule(
            TimerKey::TurnWatchdog,
            Duration::from_millis(self.config.tuning.turn_stuck_ceiling_ms),
        );

        let moderation = self.deps.moderation.clone();
        let events = self.events.clone();
        self.moderation_task = Some(tokio::spawn(async move {
            let verdict = moderation.review(&turn).await;
            let _ = events
                .send(SessionEvent::ModerationVerdict { turn, verdict })
                .await;
        }));
    }

    async fn on_moderation_verdict(&mut self, turn: String, verdict: Verdict) {
        self.moderation_task = None;
        let Some(in_progress) = self.pipeline.in_progress() else {
            debug!("moderation verdict for a cleared turn, ignored");
            return;
        };
        if in_progress.text != turn {
            debug!("moderation verdict for a superseded turn, ignored");
            return;
        }
        let generation = in_progress.generation;

        match verdict {
            Verdict::Appropriate => {
                self.set_phase(Phase::AwaitingResponse, "generation_started");
                self.send(OutgoingMessage::TutorResponding { generation });
                self.first_sentence_seen = false;
                self.timers.schedule(
                    TimerKey::ResponseFallback,
                    Duration::from_millis(self.config.tuning.response_fallback_ms),
                );
                let request = ResponseRequest {
                    generation,
                    history: self.state.history.clone(),
                    turn,
                    context: self.state.profile.document.clone(),
                };
                self.response_task = Some(spawn_response(
                    self.deps.llm.clone(),
                    self.deps.tts.clone(),
                    request,
                    self.events.clone(),
                ));
            }
            Verdict::Blocked(severity) => {
                self.state.safety_strikes += 1;
                warn!(
                    session_id = %self.state.session_id,
                    ?severity,
                    strikes = self.state.safety_strikes,
                    "turn blocked by moderation"
                );
                self.send(OutgoingMessage::TutorError {
                    message: SAFETY_LINE.to_string(),
                });
                self.timers.cancel(TimerKey::TurnWatchdog);
                self.set_phase(Phase::Listening, "turn_blocked");
                if self.state.safety_strikes >= self.config.tuning.safety_strike_limit {
                    self.finalize(CloseReason::UserEnd).await;
                    return;
                }
                self.release_turn_lock().await;
            }
        }
    }

    fn on_sentence(&mut self, generation: u64, text: String) {
        if generation != self.state.generation() {
            debug!(generation, "stale sentence dropped");
            return;
        }
        if !self.first_sentence_seen {
            self.first_sentence_seen = true;
            self.timers.cancel(TimerKey::ResponseFallback);
        }
        if self.state.phase.current() == Phase::AwaitingResponse {
            self.set_phase(Phase::TutorSpeaking, "first_sentence");
            self.playback_active = true;
        }
        self.echo.note_spoken(&text);
        self.send(OutgoingMessage::Transcript {
            speaker: Speaker::Tutor.as_str(),
            text,
        });
    }

    fn on_audio_chunk(&mut self, generation: u64, audio: Bytes) {
        if generation != self.state.generation() {
            debug!(generation, "stale audio chunk dropped");
            return;
        }
        self.send_binary(frame_audio_chunk(generation, &audio));
    }

    async fn on_response_complete(&mut self, generation: u64, text: String, aborted: bool) {
        if generation != self.state.generation() {
            debug!(generation, "stale response completion dropped");
            return;
        }
        self.response_task = None;
        self.playback_active = false;
        self.timers.cancel(TimerKey::ResponseFallback);
        self.timers.cancel(TimerKey::TurnWatchdog);
        if self.barge.cancel() {
            self.timers.cancel(TimerKey::BargeConfirm);
            self.send(OutgoingMessage::Unduck);
        }

        if !aborted && !text.is_empty() {
            if let Some(turn) = self.pipeline.in_progress().map(|t| t.text.clone()) {
                self.state.record_exchange(&turn, &text);
            }
        } else if aborted {
            self.send(OutgoingMessage::TutorError {
                message: "Sorry, something went wrong with that answer.".to_string(),
            });
        }

        self.set_phase(Phase::Listening, "response_complete");
        self.release_turn_lock().await;
    }

    async fn on_timer(&mut self, key: TimerKey) -> Flow {
        match key {
            TimerKey::ContinuationGrace => {
                if let Some(turn) = self.guard.take_committed() {
                    self.commit_turn(turn).await;
                }
            }
            TimerKey::TurnWatchdog => {
                if self.pipeline.is_stuck() {
                    self.recover_stuck_turn().await;
                }
            }
            TimerKey::ResponseFallback => {
                if self.pipeline.is_busy() && !self.first_sentence_seen {
                    self.speak_recovery_line().await;
                }
            }
            TimerKey::Heartbeat => {
                if self.parked {
                    return Flow::Continue;
                }
                match self.heartbeat.on_tick() {
                    HeartbeatAction::SendPing => {
                        self.send(OutgoingMessage::Ping);
                        self.timers.schedule(
                            TimerKey::Heartbeat,
                            Duration::from_millis(self.heartbeat.interval_ms()),
                        );
                    }
                    HeartbeatAction::ConnectionDead => {
                        warn!(
                            session_id = %self.state.session_id,
                            "heartbeat exhausted, treating connection as dropped"
                        );
                        self.sink = None;
                        return self.on_socket_closed(DisconnectKind::Dropped).await;
                    }
                }
            }
            TimerKey::ProgressCheck => {
                match self.watchdog.check() {
                    WatchdogVerdict::Healthy => {}
                    WatchdogVerdict::Recover => {
                        self.recognizer.force_reconnect("no session progress").await;
                    }
                    WatchdogVerdict::Exhausted => {
                        self.send(OutgoingMessage::Error {
                            message: "The session stalled and could not recover.".to_string(),
                        });
                        self.finalize(CloseReason::ServerError).await;
                        return Flow::Stop;
                    }
                }
                self.schedule_progress_check();
            }
            TimerKey::ReconnectGrace => {
                info!(
                    session_id = %self.state.session_id,
                    "reconnect grace expired"
                );
                self.finalize(CloseReason::DisconnectTimeout).await;
                return Flow::Stop;
            }
            TimerKey::BargeConfirm => self.resolve_barge_confirm().await,
            TimerKey::Inactivity => {
                self.finalize(CloseReason::InactivityTimeout).await;
                return Flow::Stop;
            }
            TimerKey::SessionBudget => {
                self.finalize(CloseReason::MinutesExhausted).await;
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn resolve_barge_confirm(&mut self) {
        // A lone "wait" or "hm" landing in the window is not enough; the
        // hypothesis must grow by the band's minimum before it confirms.
        let advanced_chars = self
            .last_partial
            .len()
            .saturating_sub(self.partial_len_at_duck);
        let transcript_advanced = advanced_chars >= self.band().confirm_min_advance_chars;
        let vad_agrees = self.confirm_total_frames > 0
            && self.confirm_speech_frames >= self.band().duck_min_frames
            && self.confirm_speech_frames as f32 / self.confirm_total_frames as f32
                >= VAD_AGREE_RATIO;

        match self
            .barge
            .on_confirm_timer(transcript_advanced, vad_agrees, self.state.generation())
        {
            BargeAction::Interrupt => self.interrupt_tutor().await,
            BargeAction::CancelUnduck => self.send(OutgoingMessage::Unduck),
            _ => {}
        }
    }

    /// Hard interrupt: the student took the floor back. Everything tagged
    /// with the interrupted generation becomes stale immediately.
    async fn interrupt_tutor(&mut self) {
        let interrupted = self.state.generation();
        info!(
            session_id = %self.state.session_id,
            generation = interrupted,
            "barge-in confirmed, interrupting tutor"
        );
        if let Some(task) = self.response_task.take() {
            task.abort();
        }
        self.state.bump_generation();
        self.playback_active = false;
        self.timers.cancel(TimerKey::ResponseFallback);
        self.timers.cancel(TimerKey::TurnWatchdog);

        // The interrupted turn is spent; queued turns stay for FIFO pickup on
        // the next commit.
        self.pipeline.force_clear();

        self.send(OutgoingMessage::TutorInterrupted);
        self.send(OutgoingMessage::Interrupt {
            generation: interrupted,
        });
        self.set_phase(Phase::Listening, "barge_in");
    }

    /// Watchdog found the turn lock leaked. Abort whatever held it and get
    /// the conversation moving again.
    async fn recover_stuck_turn(&mut self) {
        if let Some(task) = self.response_task.take() {
            task.abort();
        }
        if let Some(task) = self.moderation_task.take() {
            task.abort();
        }
        self.state.bump_generation();
        self.playback_active = false;
        self.timers.cancel(TimerKey::ResponseFallback);
        self.pipeline.force_clear();
        if self.state.phase.current().tutor_has_floor()
            || self.state.phase.current() == Phase::TurnCommitted
        {
            self.set_phase(Phase::Listening, "watchdog_recovery");
        }
        self.speak_canned(RECOVERY_LINE).await;
        self.release_turn_lock().await;
    }

    /// Response fallback: no sentence before the deadline. Replace the silent
    /// generation with a short canned line and free the floor.
    async fn speak_recovery_line(&mut self) {
        warn!(
            session_id = %self.state.session_id,
            generation = self.state.generation(),
            "no audio produced before fallback deadline"
        );
        if let Some(task) = self.response_task.take() {
            task.abort();
        }
        self.state.bump_generation();
        self.playback_active = false;
        self.pipeline.force_clear();
        self.timers.cancel(TimerKey::TurnWatchdog);
        self.set_phase(Phase::Listening, "response_timeout");
        self.speak_canned(RECOVERY_LINE).await;
        self.release_turn_lock().await;
    }

    /// Synthesize one canned line under the current generation, off-loop.
    async fn speak_canned(&mut self, line: &str) {
        self.echo.note_spoken(line);
        self.send(OutgoingMessage::Transcript {
            speaker: Speaker::Tutor.as_str(),
            text: line.to_string(),
        });
        let generation = self.state.generation();
        let tts = self.deps.tts.clone();
        let events = self.events.clone();
        let text = line.to_string();
        tokio::spawn(async move {
            match tts.synthesize(&text).await {
                Ok(audio) => {
                    let _ = events
                        .send(SessionEvent::AudioChunk { generation, audio })
                        .await;
                }
                Err(e) => warn!("canned line synthesis failed: {e}"),
            }
        });
    }

    /// Drop the in-progress marker and start the next queued turn, if any.
    async fn release_turn_lock(&mut self) {
        if let Some(next) = self.pipeline.finish() {
            debug!(queued = next.len(), "draining queued turn");
            self.set_phase(Phase::TurnCommitted, "queued_turn");
            self.start_processing(next).await;
        }
    }

    async fn on_socket_closed(&mut self, kind: DisconnectKind) -> Flow {
        self.sink = None;
        if self.state.phase.current() == Phase::Finalizing {
            return Flow::Continue;
        }
        match kind {
            DisconnectKind::Graceful => {
                self.finalize(CloseReason::WebsocketDisconnect).await;
                Flow::Stop
            }
            DisconnectKind::GoingAway | DisconnectKind::Dropped => {
                let grace = if kind == DisconnectKind::GoingAway || self.end_intent {
                    self.config.tuning.reconnect_grace_going_away_ms
                } else {
                    self.config.tuning.reconnect_grace_dropped_ms
                };
                info!(
                    session_id = %self.state.session_id,
                    ?kind,
                    grace_ms = grace,
                    "transport lost, parking session"
                );
                self.parked = true;
                self.timers.cancel(TimerKey::Heartbeat);
                self.timers.cancel(TimerKey::Inactivity);
                self.timers
                    .schedule(TimerKey::ReconnectGrace, Duration::from_millis(grace));
                Flow::Continue
            }
        }
    }

    /// Single teardown path. Idempotent via `state.ended`.
    async fn finalize(&mut self, reason: CloseReason) {
        if self.state.ended {
            return;
        }
        self.state.ended = true;

        if let Ok(change) = self.state.phase.transition(Phase::Finalizing, "finalize") {
            self.send(OutgoingMessage::PhaseUpdate {
                phase: change.phase.as_str(),
                previous: change.previous.as_str(),
                reason: change.reason,
            });
        }
        self.guard.cancel();
        self.barge.cancel();
        self.pipeline.clear();
        self.timers.cancel_all();
        if let Some(task) = self.response_task.take() {
            task.abort();
        }
        if let Some(task) = self.moderation_task.take() {
            task.abort();
        }
        self.recognizer.close().await;

        let report = flush_session(&self.state, &self.deps.persistence, reason).await;
        if report.needs_reconciliation() {
            warn!(
                session_id = %self.state.session_id,
                "session flush incomplete, flagged for reconciliation"
            );
        }

        self.send(OutgoingMessage::SessionEnded {
            reason: reason.as_str(),
        });
        self.registry.remove(&self.state.session_id);
    }

    /// Attempt a phase transition and surface it. Rejections are logged, not
    /// fatal: the invariants live in the machine, callers already gate on the
    /// current phase.
    fn set_phase(&mut self, to: Phase, reason: &'static str) {
        match self.state.phase.transition(to, reason) {
            Ok(change) => {
                self.watchdog.mark_progress();
                debug!(
                    from = change.previous.as_str(),
                    to = change.phase.as_str(),
                    reason,
                    "phase transition"
                );
                self.send(OutgoingMessage::PhaseUpdate {
                    phase: change.phase.as_str(),
                    previous: change.previous.as_str(),
                    reason: change.reason,
                });
            }
            Err(PhaseError::Terminal) => {}
            Err(e) => warn!(to = to.as_str(), reason, "phase transition rejected: {e}"),
        }
    }

    fn band(&self) -> &crate::config::BandTiming {
        self.config.band(&self.state.profile.band)
    }

    fn schedule_progress_check(&mut self) {
        let interval = (self.watchdog.stall_ms() / 2).max(1000);
        self.timers
            .schedule(TimerKey::ProgressCheck, Duration::from_millis(interval));
    }

    fn refresh_inactivity(&mut self) {
        let timeout = self.config.tuning.inactivity_timeout_ms;
        if timeout > 0 && !self.parked && self.client_visible {
            self.timers
                .schedule(TimerKey::Inactivity, Duration::from_millis(timeout));
        }
    }

    /// Queue one outbound frame. A saturated or detached transport drops the
    /// frame rather than blocking the event loop.
    fn send(&mut self, message: OutgoingMessage) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.try_send(MessageRoute::Outgoing(message)) {
                debug!("outbound frame dropped: {e}");
            }
        }
    }

    fn send_binary(&mut self, frame: Bytes) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.try_send(MessageRoute::Binary(frame)) {
                debug!("outbound audio dropped: {e}");
            }
        }
    }
}
