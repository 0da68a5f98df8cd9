//! Response streaming coordinator.
//!
//! Drives one response generation: model chunks are sentence-chunked and each
//! completed sentence is synthesized and forwarded immediately, all tagged
//! with the generation id the response was opened under. The session actor
//! owns the returned task handle; aborting it is the cancellation path, and
//! the actor discards any event whose generation no longer matches.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::sentence::SentenceSplitter;
use crate::core::providers::{ChatMessage, LanguageModel, SpeechSynth};
use crate::core::session::events::SessionEvent;

/// Minimum sentence length handed to synthesis.
const MIN_SENTENCE_CHARS: usize = 4;

/// Inputs for one generation attempt.
pub struct ResponseRequest {
    pub generation: u64,
    pub history: Vec<ChatMessage>,
    pub turn: String,
    pub context: Option<String>,
}

/// Spawn the response task. All output flows back into the session channel as
/// generation-tagged events; the handle is the cancellation handle.
pub fn spawn_response(
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn SpeechSynth>,
    request: ResponseRequest,
    events: mpsc::Sender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let generation = request.generation;
        let mut stream = match llm
            .stream_reply(&request.history, &request.turn, request.context.as_deref())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(generation, "model call failed to open: {e}");
                let _ = events
                    .send(SessionEvent::ResponseError {
                        generation,
                        message: e.to_string(),
                    })
                    .await;
                let _ = events
                    .send(SessionEvent::ResponseComplete {
                        generation,
                        text: String::new(),
                        aborted: true,
                    })
                    .await;
                return;
            }
        };

        let mut splitter = SentenceSplitter::new(MIN_SENTENCE_CHARS);
        let mut full_text = String::new();
        let mut failed = false;

        while let Some(chunk) = stream.chunks.recv().await {
            match chunk {
                Ok(text) => {
                    for sentence in splitter.push(&text) {
                        speak_sentence(&tts, &events, generation, &sentence, &mut full_text).await;
                    }
                }
                Err(e) => {
                    warn!(generation, "model stream error: {e}");
                    let _ = events
                        .send(SessionEvent::ResponseError {
                            generation,
                            message: e.to_string(),
                        })
                        .await;
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            if let Some(rest) = splitter.flush() {
                speak_sentence(&tts, &events, generation, &rest, &mut full_text).await;
            }
        }

        debug!(generation, chars = full_text.len(), "response finished");
        let _ = events
            .send(SessionEvent::ResponseComplete {
                generation,
                text: full_text.clone(),
                aborted: failed && full_text.is_empty(),
            })
            .await;
    })
}

/// Synthesize one sentence and forward both the sentence and its audio.
/// A synthesis failure skips the audio but keeps the text flowing; the
/// session still has a transcript to show.
async fn speak_sentence(
    tts: &Arc<dyn SpeechSynth>,
    events: &mpsc::Sender<SessionEvent>,
    generation: u64,
    sentence: &str,
    full_text: &mut String,
) {
    if !full_text.is_empty() {
        full_text.push(' ');
    }
    full_text.push_str(sentence);

    let _ = events
        .send(SessionEvent::Sentence {
            generation,
            text: sentence.to_string(),
        })
        .await;

    match tts.synthesize(sentence).await {
        Ok(audio) => {
            let _ = events
                .send(SessionEvent::AudioChunk { generation, audio })
                .await;
        }
        Err(e) => {
            warn!(generation, "synthesis failed for sentence: {e}");
            let _ = events
                .send(SessionEvent::ResponseError {
                    generation,
                    message: format!("synthesis failed: {e}"),
                })
                .await;
        }
    }
}
