//! End-to-end session actor tests with scripted collaborators.
//!
//! Each test spawns a real session actor with the mock recognizer and drives
//! it through its event channel, asserting on the frames that reach the
//! transport sink and on what the persistence collaborator saw at teardown.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use cadenza::config::{BandTiming, ServerConfig};
use cadenza::core::providers::{
    ChatMessage, LanguageModel, LlmError, Moderation, PersistError, Persistence, Severity,
    SpeechSynth, TokenStream, TtsError, UsageRecord, Verdict,
};
use cadenza::core::session::{
    CloseReason, DisconnectKind, SessionActor, SessionDeps, SessionEvent, SessionProfile,
    TranscriptEntry,
};
use cadenza::core::stt::SpeechEvent;
use cadenza::handlers::ws::messages::{parse_audio_chunk, MessageRoute};
use cadenza::state::SessionRegistry;

/// Model collaborator replaying scripted replies. `delay_ms` defers the
/// chunk; `hold_open` keeps the stream alive after it so the tutor keeps the
/// floor until interrupted.
struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    delay_ms: u64,
    hold_open: bool,
}

impl ScriptedLlm {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            delay_ms: 0,
            hold_open: false,
        }
    }

    fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    fn holding_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedLlm {
    async fn stream_reply(
        &self,
        _history: &[ChatMessage],
        _turn: &str,
        _context: Option<&str>,
    ) -> Result<TokenStream, LlmError> {
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| "Okay.".to_string());
        let (tx, rx) = mpsc::channel(4);
        let delay = self.delay_ms;
        let hold = self.hold_open;
        let handle = tokio::spawn(async move {
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            let _ = tx.send(Ok(reply)).await;
            if hold {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });
        Ok(TokenStream::new(rx, Some(handle)))
    }
}

struct StaticTts;

#[async_trait::async_trait]
impl SpeechSynth for StaticTts {
    async fn synthesize(&self, _text: &str) -> Result<Bytes, TtsError> {
        Ok(Bytes::from_static(b"synthesized-pcm"))
    }
}

/// Blocks any turn containing "forbidden".
struct DenyListModeration;

#[async_trait::async_trait]
impl Moderation for DenyListModeration {
    async fn review(&self, text: &str) -> Verdict {
        if text.contains("forbidden") {
            Verdict::Blocked(Severity::High)
        } else {
            Verdict::Appropriate
        }
    }
}

struct PassModeration;

#[async_trait::async_trait]
impl Moderation for PassModeration {
    async fn review(&self, _text: &str) -> Verdict {
        Verdict::Appropriate
    }
}

#[derive(Default)]
struct MemoryPersistence {
    transcripts: Mutex<Vec<Vec<TranscriptEntry>>>,
    usage: Mutex<Vec<UsageRecord>>,
}

#[async_trait::async_trait]
impl Persistence for MemoryPersistence {
    async fn store_transcript(
        &self,
        _session_id: &str,
        transcript: &[TranscriptEntry],
    ) -> Result<(), PersistError> {
        self.transcripts.lock().push(transcript.to_vec());
        Ok(())
    }

    async fn record_usage(&self, usage: &UsageRecord) -> Result<(), PersistError> {
        self.usage.lock().push(usage.clone());
        Ok(())
    }

    async fn notify_session_ended(
        &self,
        _session_id: &str,
        _reason: CloseReason,
    ) -> Result<(), PersistError> {
        Ok(())
    }
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.stt.provider = "mock".to_string();
    // Fast timings so grace windows and barge confirmation resolve quickly.
    config.bands.insert(
        "test".to_string(),
        BandTiming {
            grace_default_ms: 30,
            grace_extended_ms: 80,
            grace_short_ms: 15,
            duck_min_frames: 3,
            confirm_window_ms: 50,
            cooldown_ms: 100,
            confirm_min_advance_chars: 10,
            energy_only_confirm: false,
        },
    );
    config
}

fn test_profile() -> SessionProfile {
    SessionProfile {
        user_id: "student-1".to_string(),
        profile_id: None,
        subject: Some("math".to_string()),
        language: "en-US".to_string(),
        band: "test".to_string(),
        document: None,
    }
}

struct Harness {
    events: mpsc::Sender<SessionEvent>,
    sink_rx: mpsc::Receiver<MessageRoute>,
    registry: Arc<SessionRegistry>,
    persistence: Arc<MemoryPersistence>,
}

fn spawn_session(
    config: ServerConfig,
    llm: Arc<dyn LanguageModel>,
    moderation: Arc<dyn Moderation>,
) -> Harness {
    let persistence = Arc::new(MemoryPersistence::default());
    let deps = SessionDeps {
        llm,
        tts: Arc::new(StaticTts),
        moderation,
        persistence: persistence.clone(),
    };
    let registry = Arc::new(SessionRegistry::new());
    let (sink_tx, sink_rx) = mpsc::channel(256);
    let events = SessionActor::spawn(
        "test-session".to_string(),
        test_profile(),
        Arc::new(config),
        deps,
        registry.clone(),
        sink_tx,
    );
    Harness {
        events,
        sink_rx,
        registry,
        persistence,
    }
}

/// Drain sink frames until one satisfies the predicate on its JSON form.
/// Binary frames are skipped (use `recv_binary` for those).
async fn recv_json<F>(rx: &mut mpsc::Receiver<MessageRoute>, mut pred: F) -> serde_json::Value
where
    F: FnMut(&serde_json::Value) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await.expect("sink closed") {
                MessageRoute::Outgoing(message) => {
                    let value = serde_json::to_value(&message).unwrap();
                    if pred(&value) {
                        return value;
                    }
                }
                MessageRoute::Binary(_) => {}
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

async fn recv_type(rx: &mut mpsc::Receiver<MessageRoute>, kind: &str) -> serde_json::Value {
    recv_json(rx, |v| v["type"] == kind).await
}

async fn recv_binary(rx: &mut mpsc::Receiver<MessageRoute>) -> Bytes {
    timeout(Duration::from_secs(2), async {
        loop {
            if let MessageRoute::Binary(frame) = rx.recv().await.expect("sink closed") {
                return frame;
            }
        }
    })
    .await
    .expect("timed out waiting for binary frame")
}

/// One 20ms PCM16-LE frame loud enough to clear the adaptive gate.
fn loud_frame() -> Bytes {
    let samples: Vec<u8> = (0..320)
        .flat_map(|i| {
            let value: i16 = if i % 2 == 0 { 16000 } else { -16000 };
            value.to_le_bytes()
        })
        .collect();
    Bytes::from(samples)
}

#[tokio::test]
async fn text_turn_produces_reply_and_tagged_audio() {
    let mut h = spawn_session(
        test_config(),
        Arc::new(ScriptedLlm::new(&["Seven times eight is fifty-six."])),
        Arc::new(PassModeration),
    );

    let ready = recv_type(&mut h.sink_rx, "ready").await;
    assert_eq!(ready["resumed"], false);

    h.events
        .send(SessionEvent::TextTurn("what is seven times eight".to_string()))
        .await
        .unwrap();

    let student_line = recv_json(&mut h.sink_rx, |v| {
        v["type"] == "transcript" && v["speaker"] == "student"
    })
    .await;
    assert_eq!(student_line["text"], "what is seven times eight");

    recv_type(&mut h.sink_rx, "tutor_thinking").await;
    let responding = recv_type(&mut h.sink_rx, "tutor_responding").await;
    assert_eq!(responding["generation"], 1);

    let tutor_line = recv_json(&mut h.sink_rx, |v| {
        v["type"] == "transcript" && v["speaker"] == "tutor"
    })
    .await;
    assert_eq!(tutor_line["text"], "Seven times eight is fifty-six.");

    let frame = recv_binary(&mut h.sink_rx).await;
    let (generation, audio) = parse_audio_chunk(&frame).unwrap();
    assert_eq!(generation, 1);
    assert_eq!(audio, Bytes::from_static(b"synthesized-pcm"));

    // Floor released after completion.
    recv_json(&mut h.sink_rx, |v| {
        v["type"] == "phase_update" && v["phase"] == "listening"
    })
    .await;

    h.events.send(SessionEvent::End).await.unwrap();
    let ended = recv_type(&mut h.sink_rx, "session_ended").await;
    assert_eq!(ended["reason"], "user_end");

    let usage = h.persistence.usage.lock();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].turns, 1);
    assert_eq!(usage[0].close_reason, CloseReason::UserEnd);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn end_of_turn_commits_after_grace_window() {
    let mut h = spawn_session(
        test_config(),
        Arc::new(ScriptedLlm::new(&["Good question."])),
        Arc::new(PassModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    h.events
        .send(SessionEvent::Speech(SpeechEvent::new(
            "how do".to_string(),
            false,
            0.9,
        )))
        .await
        .unwrap();
    let update = recv_type(&mut h.sink_rx, "transcript_update").await;
    assert_eq!(update["text"], "how do");

    h.events
        .send(SessionEvent::Speech(SpeechEvent::new(
            "how do fractions work".to_string(),
            true,
            0.9,
        )))
        .await
        .unwrap();

    // Nothing commits until the grace window elapses.
    let committed = recv_json(&mut h.sink_rx, |v| {
        v["type"] == "transcript" && v["speaker"] == "student"
    })
    .await;
    assert_eq!(committed["text"], "how do fractions work");
    recv_type(&mut h.sink_rx, "tutor_responding").await;
}

#[tokio::test]
async fn turn_during_response_is_queued_then_drained() {
    let mut h = spawn_session(
        test_config(),
        Arc::new(ScriptedLlm::new(&["First answer.", "Second answer."]).with_delay(150)),
        Arc::new(PassModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    h.events
        .send(SessionEvent::TextTurn("first question".to_string()))
        .await
        .unwrap();
    recv_type(&mut h.sink_rx, "tutor_responding").await;

    // Second turn arrives while the tutor holds the floor.
    h.events
        .send(SessionEvent::TextTurn("second question".to_string()))
        .await
        .unwrap();
    let queued = recv_type(&mut h.sink_rx, "queued_user_turn").await;
    assert_eq!(queued["text"], "second question");

    // First response completes, queue drains into a second generation.
    let first = recv_json(&mut h.sink_rx, |v| {
        v["type"] == "transcript" && v["speaker"] == "tutor"
    })
    .await;
    assert_eq!(first["text"], "First answer.");

    let second_responding = recv_json(&mut h.sink_rx, |v| {
        v["type"] == "tutor_responding" && v["generation"] == 2
    })
    .await;
    assert_eq!(second_responding["generation"], 2);
    let second = recv_json(&mut h.sink_rx, |v| {
        v["type"] == "transcript" && v["speaker"] == "tutor"
    })
    .await;
    assert_eq!(second["text"], "Second answer.");
}

#[tokio::test]
async fn sustained_speech_during_playback_ducks_then_interrupts() {
    let mut h = spawn_session(
        test_config(),
        Arc::new(ScriptedLlm::new(&["Let me explain this step by step. "]).holding_open()),
        Arc::new(PassModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    h.events
        .send(SessionEvent::TextTurn("explain fractions".to_string()))
        .await
        .unwrap();
    recv_json(&mut h.sink_rx, |v| {
        v["type"] == "phase_update" && v["phase"] == "tutor_speaking"
    })
    .await;

    // Sustained speech-class energy ducks the tutor.
    for _ in 0..4 {
        h.events
            .send(SessionEvent::Audio(loud_frame()))
            .await
            .unwrap();
    }
    recv_type(&mut h.sink_rx, "duck").await;

    // The live hypothesis advancing past the duck point confirms intent.
    h.events
        .send(SessionEvent::Speech(SpeechEvent::new(
            "wait I have a question about that".to_string(),
            false,
            0.9,
        )))
        .await
        .unwrap();

    recv_type(&mut h.sink_rx, "tutor_interrupted").await;
    let interrupt = recv_type(&mut h.sink_rx, "interrupt").await;
    assert_eq!(interrupt["generation"], 1);
    recv_json(&mut h.sink_rx, |v| {
        v["type"] == "phase_update" && v["phase"] == "listening" && v["reason"] == "barge_in"
    })
    .await;

    // Audio tagged with the interrupted generation is discarded, not sent.
    h.events
        .send(SessionEvent::AudioChunk {
            generation: 1,
            audio: Bytes::from_static(b"stale"),
        })
        .await
        .unwrap();
    let stale = timeout(Duration::from_millis(150), async {
        loop {
            if let MessageRoute::Binary(frame) = h.sink_rx.recv().await.expect("sink closed") {
                return frame;
            }
        }
    })
    .await;
    assert!(stale.is_err(), "stale-generation audio must be dropped");
}

#[tokio::test]
async fn one_word_exclamation_unducks_instead_of_interrupting() {
    let mut h = spawn_session(
        test_config(),
        Arc::new(ScriptedLlm::new(&["Let me explain this step by step. "]).holding_open()),
        Arc::new(PassModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    h.events
        .send(SessionEvent::TextTurn("explain fractions".to_string()))
        .await
        .unwrap();
    recv_json(&mut h.sink_rx, |v| {
        v["type"] == "phase_update" && v["phase"] == "tutor_speaking"
    })
    .await;

    for _ in 0..4 {
        h.events
            .send(SessionEvent::Audio(loud_frame()))
            .await
            .unwrap();
    }
    recv_type(&mut h.sink_rx, "duck").await;

    // The hypothesis grows by a single short word, below the band's
    // advance minimum: the tutor ducks through it and resumes.
    h.events
        .send(SessionEvent::Speech(SpeechEvent::new(
            "wait".to_string(),
            false,
            0.9,
        )))
        .await
        .unwrap();
    recv_type(&mut h.sink_rx, "unduck").await;

    let escalated = timeout(Duration::from_millis(150), async {
        loop {
            if let MessageRoute::Outgoing(message) = h.sink_rx.recv().await.expect("sink closed") {
                let value = serde_json::to_value(&message).unwrap();
                if value["type"] == "tutor_interrupted" {
                    return;
                }
            }
        }
    })
    .await;
    assert!(
        escalated.is_err(),
        "a sub-threshold advance must not escalate to an interrupt"
    );
}

#[tokio::test]
async fn blocked_turn_releases_floor_without_reply() {
    let mut config = test_config();
    config.tuning.safety_strike_limit = 2;
    let mut h = spawn_session(
        config,
        Arc::new(ScriptedLlm::new(&["Should never be spoken."])),
        Arc::new(DenyListModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    h.events
        .send(SessionEvent::TextTurn("something forbidden".to_string()))
        .await
        .unwrap();
    recv_type(&mut h.sink_rx, "tutor_thinking").await;
    recv_type(&mut h.sink_rx, "tutor_error").await;
    recv_json(&mut h.sink_rx, |v| {
        v["type"] == "phase_update" && v["phase"] == "listening" && v["reason"] == "turn_blocked"
    })
    .await;

    // A clean turn still works afterwards; the strike did not wedge the lock.
    h.events
        .send(SessionEvent::TextTurn("what is two plus two".to_string()))
        .await
        .unwrap();
    recv_type(&mut h.sink_rx, "tutor_responding").await;
}

#[tokio::test]
async fn strike_limit_ends_the_session() {
    let mut config = test_config();
    config.tuning.safety_strike_limit = 1;
    let mut h = spawn_session(
        config,
        Arc::new(ScriptedLlm::new(&[])),
        Arc::new(DenyListModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    h.events
        .send(SessionEvent::TextTurn("forbidden again".to_string()))
        .await
        .unwrap();
    recv_type(&mut h.sink_rx, "session_ended").await;
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn dropped_transport_parks_then_resumes_with_state() {
    let mut h = spawn_session(
        test_config(),
        Arc::new(ScriptedLlm::new(&["The answer is four."])),
        Arc::new(PassModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    h.events
        .send(SessionEvent::TextTurn("what is two plus two".to_string()))
        .await
        .unwrap();
    recv_json(&mut h.sink_rx, |v| {
        v["type"] == "transcript" && v["speaker"] == "tutor"
    })
    .await;

    h.events
        .send(SessionEvent::SocketClosed(DisconnectKind::Dropped))
        .await
        .unwrap();
    // Still registered while parked.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.registry.len(), 1);

    let (new_sink_tx, mut new_sink_rx) = mpsc::channel(256);
    h.events
        .send(SessionEvent::Attach { sink: new_sink_tx })
        .await
        .unwrap();
    let ready = recv_type(&mut new_sink_rx, "ready").await;
    assert_eq!(ready["resumed"], true);
    recv_json(&mut new_sink_rx, |v| {
        v["type"] == "phase_update" && v["reason"] == "resumed"
    })
    .await;

    h.events.send(SessionEvent::End).await.unwrap();
    recv_type(&mut new_sink_rx, "session_ended").await;
    // The completed exchange survived the reconnect.
    let usage = h.persistence.usage.lock();
    assert_eq!(usage[0].turns, 1);
}

#[tokio::test]
async fn reconnect_grace_expiry_finalizes_with_disconnect_timeout() {
    let mut config = test_config();
    config.tuning.reconnect_grace_dropped_ms = 40;
    let mut h = spawn_session(
        config,
        Arc::new(ScriptedLlm::new(&[])),
        Arc::new(PassModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    h.events
        .send(SessionEvent::SocketClosed(DisconnectKind::Dropped))
        .await
        .unwrap();

    timeout(Duration::from_secs(2), async {
        loop {
            if !h.persistence.usage.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session never finalized");

    let usage = h.persistence.usage.lock();
    assert_eq!(usage[0].close_reason, CloseReason::DisconnectTimeout);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn graceful_close_finalizes_immediately() {
    let mut h = spawn_session(
        test_config(),
        Arc::new(ScriptedLlm::new(&[])),
        Arc::new(PassModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    h.events
        .send(SessionEvent::SocketClosed(DisconnectKind::Graceful))
        .await
        .unwrap();

    timeout(Duration::from_secs(2), async {
        loop {
            if !h.persistence.usage.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session never finalized");
    assert_eq!(
        h.persistence.usage.lock()[0].close_reason,
        CloseReason::WebsocketDisconnect
    );
}

#[tokio::test]
async fn session_budget_ends_with_minutes_exhausted() {
    let mut config = test_config();
    config.tuning.session_budget_ms = 60;
    let mut h = spawn_session(
        config,
        Arc::new(ScriptedLlm::new(&[])),
        Arc::new(PassModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    let ended = recv_type(&mut h.sink_rx, "session_ended").await;
    assert_eq!(ended["reason"], "minutes_exhausted");
}

#[tokio::test]
async fn finalize_runs_exactly_once() {
    let mut h = spawn_session(
        test_config(),
        Arc::new(ScriptedLlm::new(&[])),
        Arc::new(PassModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    h.events.send(SessionEvent::End).await.unwrap();
    // The actor stops on the first End; a racing second event is harmless.
    let _ = h.events.send(SessionEvent::End).await;
    recv_type(&mut h.sink_rx, "session_ended").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.persistence.usage.lock().len(), 1);
    assert_eq!(h.persistence.transcripts.lock().len(), 1);
}

#[tokio::test]
async fn response_fallback_speaks_recovery_line() {
    let mut config = test_config();
    config.tuning.response_fallback_ms = 80;
    let mut h = spawn_session(
        config,
        // Delay far beyond the fallback deadline.
        Arc::new(ScriptedLlm::new(&["Too late."]).with_delay(5_000)),
        Arc::new(PassModeration),
    );
    recv_type(&mut h.sink_rx, "ready").await;

    h.events
        .send(SessionEvent::TextTurn("are you there".to_string()))
        .await
        .unwrap();
    recv_type(&mut h.sink_rx, "tutor_responding").await;

    // Fallback fires: floor released, canned line spoken.
    recv_json(&mut h.sink_rx, |v| {
        v["type"] == "phase_update" && v["phase"] == "listening" && v["reason"] == "response_timeout"
    })
    .await;
    let recovery = recv_json(&mut h.sink_rx, |v| {
        v["type"] == "transcript" && v["speaker"] == "tutor"
    })
    .await;
    assert!(recovery["text"]
        .as_str()
        .unwrap()
        .contains("train of thought"));
}
