//! Deepgram streaming client.
//!
//! WebSocket client for the Deepgram live-transcription API, normalized to
//! the [`BaseStt`] contract. Partial results replace the running hypothesis;
//! `speech_final` frames become end-of-turn events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::base::{
    BaseStt, SpeechEvent, SpeechEventCallback, SttConfig, SttError, SttErrorCallback,
};
use crate::utils::epoch_ms;

const DEEPGRAM_WS_URL: &str = "wss://api.deepgram.com/v1/listen";

#[derive(Debug, Deserialize)]
struct LiveResponse {
    #[serde(rename = "type")]
    response_type: String,
    channel: Option<LiveChannel>,
    is_final: Option<bool>,
    speech_final: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct LiveChannel {
    alternatives: Vec<LiveAlternative>,
}

#[derive(Debug, Deserialize)]
struct LiveAlternative {
    transcript: String,
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct LiveError {
    description: Option<String>,
    message: Option<String>,
}

/// One Deepgram live-transcription connection.
///
/// Destroyed and recreated by the adapter on every reconnect; never reused.
pub struct DeepgramStream {
    config: SttConfig,
    ws_sender: Option<mpsc::UnboundedSender<Message>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    receive_handle: Option<tokio::task::JoinHandle<()>>,
    event_callback: Option<SpeechEventCallback>,
    error_callback: Option<SttErrorCallback>,
    /// Epoch ms of the last frame received from the provider.
    last_message_ms: Arc<AtomicU64>,
    /// Running hypothesis across interim results within one utterance.
    committed_text: Arc<parking_lot::Mutex<String>>,
}

impl DeepgramStream {
    pub fn new(config: SttConfig) -> Result<Self, SttError> {
        if config.api_key.is_empty() {
            return Err(SttError::AuthenticationFailed(
                "api key is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            ws_sender: None,
            shutdown_tx: None,
            receive_handle: None,
            event_callback: None,
            error_callback: None,
            last_message_ms: Arc::new(AtomicU64::new(0)),
            committed_text: Arc::new(parking_lot::Mutex::new(String::new())),
        })
    }

    fn build_url(&self) -> Result<String, SttError> {
        let mut url = Url::parse(DEEPGRAM_WS_URL)
            .map_err(|e| SttError::ConfigurationRejected(format!("invalid base url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("model", &self.config.model);
            query.append_pair("language", &self.config.language);
            query.append_pair("encoding", &self.config.encoding);
            query.append_pair("sample_rate", &self.config.sample_rate.to_string());
            query.append_pair("channels", &self.config.channels.to_string());
            query.append_pair("interim_results", "true");
            query.append_pair("punctuate", "true");
            query.append_pair("endpointing", &self.config.endpointing_ms.to_string());
            if self.config.extended_features {
                query.append_pair("smart_format", "true");
                query.append_pair("filler_words", "true");
            }
        }
        Ok(url.to_string())
    }

    /// Normalize one provider frame into zero or one [`SpeechEvent`].
    ///
    /// Deepgram interim results cover only the current fragment; finals append
    /// to the utterance. We accumulate finals so the emitted hypothesis is
    /// always the whole utterance (replace-only contract).
    fn normalize(
        text: &str,
        committed: &parking_lot::Mutex<String>,
    ) -> Result<Option<SpeechEvent>, SttError> {
        let response: LiveResponse = serde_json::from_str(text)
            .map_err(|e| SttError::ProviderError(format!("unparseable frame: {e}")))?;

        match response.response_type.as_str() {
            "Results" => {
                let Some(alt) = response
                    .channel
                    .as_ref()
                    .and_then(|c| c.alternatives.first())
                else {
                    return Ok(None);
                };
                let is_final = response.is_final.unwrap_or(false);
                let speech_final = response.speech_final.unwrap_or(false);

                let mut committed = committed.lock();
                let hypothesis = if committed.is_empty() {
                    alt.transcript.clone()
                } else if alt.transcript.is_empty() {
                    committed.clone()
                } else {
                    format!("{} {}", committed, alt.transcript)
                };
                if is_final && !alt.transcript.is_empty() {
                    *committed = hypothesis.clone();
                }
                if speech_final {
                    committed.clear();
                }
                if hypothesis.is_empty() {
                    return Ok(None);
                }
                Ok(Some(SpeechEvent::new(
                    hypothesis,
                    speech_final,
                    alt.confidence,
                )))
            }
            "Error" => {
                let detail = serde_json::from_str::<LiveError>(text)
                    .ok()
                    .and_then(|e| e.description.or(e.message))
                    .unwrap_or_else(|| "unknown provider error".to_string());
                // A rejected option set surfaces here, not at connect time.
                if detail.contains("option") || detail.contains("feature") {
                    Err(SttError::ConfigurationRejected(detail))
                } else {
                    Err(SttError::ProviderError(detail))
                }
            }
            "Metadata" | "UtteranceEnd" | "SpeechStarted" => Ok(None),
            other => {
                warn!("unknown deepgram frame type: {other}");
                Ok(None)
            }
        }
    }
}

#[async_trait::async_trait]
impl BaseStt for DeepgramStream {
    async fn connect(&mut self) -> Result<(), SttError> {
        let ws_url = self.build_url()?;
        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .uri(&ws_url)
            .header("Host", "api.deepgram.com")
            .header("Authorization", format!("Token {}", self.config.api_key))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| SttError::ConfigurationRejected(e.to_string()))?;

        let (ws_stream, _) = timeout(Duration::from_secs(10), connect_async(request))
            .await
            .map_err(|_| SttError::ConnectionFailed("connect timeout".to_string()))?
            .map_err(|e| SttError::ConnectionFailed(e.to_string()))?;
        info!("deepgram connection established");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        self.ws_sender = Some(ws_tx);
        self.shutdown_tx = Some(shutdown_tx);
        self.last_message_ms.store(epoch_ms(), Ordering::Release);
        self.committed_text.lock().clear();

        let event_callback = self.event_callback.clone();
        let error_callback = self.error_callback.clone();
        let last_message_ms = self.last_message_ms.clone();
        let committed = self.committed_text.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(message) = ws_rx.recv() => {
                        if let Err(e) = ws_sink.send(message).await {
                            error!("deepgram send failed: {e}");
                            if let Some(cb) = &error_callback {
                                cb(SttError::NetworkError(e.to_string())).await;
                            }
                            break;
                        }
                    }
                    frame = ws_source.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                last_message_ms.store(epoch_ms(), Ordering::Release);
                                match Self::normalize(&text, &committed) {
                                    Ok(Some(event)) => {
                                        if let Some(cb) = &event_callback {
                                            cb(event).await;
                                        }
                                    }
                                    Ok(None) => {}
                                    Err(e) => {
                                        warn!("deepgram stream error: {e}");
                                        if let Some(cb) = &error_callback {
                                            cb(e).await;
                                        }
                                    }
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("deepgram closed the stream: {frame:?}");
                                if let Some(cb) = &error_callback {
                                    cb(SttError::ConnectionFailed("provider closed".to_string())).await;
                                }
                                break;
                            }
                            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                                last_message_ms.store(epoch_ms(), Ordering::Release);
                            }
                            Some(Ok(other)) => {
                                debug!("ignoring deepgram frame: {other:?}");
                            }
                            Some(Err(e)) => {
                                error!("deepgram receive failed: {e}");
                                if let Some(cb) = &error_callback {
                                    cb(SttError::NetworkError(e.to_string())).await;
                                }
                                break;
                            }
                            None => {
                                info!("deepgram stream ended");
                                if let Some(cb) = &error_callback {
                                    cb(SttError::ConnectionFailed("stream ended".to_string())).await;
                                }
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });
        self.receive_handle = Some(handle);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SttError> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.receive_handle.take() {
            let _ = timeout(Duration::from_secs(2), handle).await;
        }
        self.ws_sender = None;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ws_sender.is_some()
    }

    async fn send_audio(&mut self, frame: Bytes) -> Result<(), SttError> {
        let sender = self
            .ws_sender
            .as_ref()
            .ok_or_else(|| SttError::ConnectionFailed("not connected".to_string()))?;
        sender
            .send(Message::Binary(frame))
            .map_err(|e| SttError::NetworkError(format!("send failed: {e}")))
    }

    fn on_event(&mut self, callback: SpeechEventCallback) {
        self.event_callback = Some(callback);
    }

    fn on_error(&mut self, callback: SttErrorCallback) {
        self.error_callback = Some(callback);
    }

    fn last_message_ms(&self) -> u64 {
        self.last_message_ms.load(Ordering::Acquire)
    }

    fn provider_info(&self) -> &'static str {
        "deepgram-live"
    }
}

impl Drop for DeepgramStream {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(());
        }
    }
}
