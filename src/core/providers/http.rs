//! HTTP-backed collaborator clients.
//!
//! Minimal chat-completion and synthesis clients for OpenAI-compatible
//! endpoints. These exist so the binary runs against real services; the
//! session core only ever sees the traits in this module's siblings.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::llm::{ChatMessage, LanguageModel, LlmError, TokenStream};
use super::tts::{SpeechSynth, TtsError};

/// Chat-completion client. The reply is requested in one shot and handed to
/// the coordinator as a single chunk; sentence chunking downstream still
/// starts synthesis before the peer has consumed anything.
pub struct HttpChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl HttpChatModel {
    pub fn new(base_url: String, api_key: String, model: String, system_prompt: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            system_prompt,
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for HttpChatModel {
    async fn stream_reply(
        &self,
        history: &[ChatMessage],
        turn: &str,
        context: Option<&str>,
    ) -> Result<TokenStream, LlmError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        let system = match context {
            Some(doc) => format!("{}\n\nLesson context:\n{}", self.system_prompt, doc),
            None => self.system_prompt.clone(),
        };
        messages.push(json!({"role": "system", "content": system}));
        for entry in history {
            messages.push(json!({"role": entry.role, "content": entry.content}));
        }
        messages.push(json!({"role": "user", "content": turn}));

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({"model": self.model, "messages": messages}));

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(async move {
            let outcome = async {
                let response = request
                    .send()
                    .await
                    .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(LlmError::ProviderError(format!(
                        "status {}",
                        response.status()
                    )));
                }
                let body: ChatCompletionResponse = response
                    .json()
                    .await
                    .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
                body.choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| LlmError::MalformedResponse("no choices".to_string()))
            }
            .await;

            match outcome {
                Ok(text) => {
                    debug!(chars = text.len(), "model reply received");
                    let _ = tx.send(Ok(text)).await;
                }
                Err(e) => {
                    warn!("model call failed: {e}");
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(TokenStream::new(rx, Some(handle)))
    }
}

/// Synthesis client posting one sentence per request, expecting raw audio
/// bytes back.
pub struct HttpSpeechSynth {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    voice: String,
}

impl HttpSpeechSynth {
    pub fn new(base_url: String, api_key: String, voice: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            voice,
        }
    }
}

#[async_trait::async_trait]
impl SpeechSynth for HttpSpeechSynth {
    async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError> {
        if text.trim().is_empty() {
            return Err(TtsError::EmptyInput);
        }
        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({"voice": self.voice, "input": text}))
            .send()
            .await
            .map_err(|e| TtsError::ConnectionFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TtsError::ProviderError(format!(
                "status {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map_err(|e| TtsError::ProviderError(e.to_string()))
    }
}
