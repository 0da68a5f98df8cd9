//! Base contract for streaming speech-to-text providers.
//!
//! A provider turns a continuous audio stream into normalized
//! [`SpeechEvent`]s: replace-only partial hypotheses plus end-of-turn events
//! carrying confidence. Provider quirks (append deltas, separate
//! `speech_final` flags, vendor status frames) are flattened here so the rest
//! of the session never branches on the vendor.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

/// Normalized recognition event.
///
/// `text` is always the full current hypothesis for the in-progress utterance
/// (replace-only). When `end_of_turn` is true the provider believes the
/// utterance is complete and `confidence` applies to the whole of `text`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechEvent {
    pub text: String,
    pub end_of_turn: bool,
    pub confidence: f32,
}

impl SpeechEvent {
    pub fn new(text: String, end_of_turn: bool, confidence: f32) -> Self {
        Self {
            text,
            end_of_turn,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Error types for STT operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SttError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("configuration rejected: {0}")]
    ConfigurationRejected(String),
    #[error("network error: {0}")]
    NetworkError(String),
}

impl SttError {
    /// Configuration faults get one automatic feature-downgrade retry instead
    /// of entering the backoff loop.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(self, SttError::ConfigurationRejected(_))
    }
}

/// Configuration for a streaming STT connection.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct SttConfig {
    /// Provider selector ("deepgram", "mock").
    pub provider: String,
    pub api_key: String,
    pub language: String,
    pub model: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: String,
    /// Provider-side endpointing pause, milliseconds.
    pub endpointing_ms: u32,
    /// Extended feature set (smart formatting, filler words). Dropped by
    /// [`SttConfig::downgraded`] when the provider rejects the configuration.
    pub extended_features: bool,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: "deepgram".to_string(),
            api_key: String::new(),
            language: "en-US".to_string(),
            model: "nova-2".to_string(),
            sample_rate: 16000,
            channels: 1,
            encoding: "linear16".to_string(),
            endpointing_ms: 300,
            extended_features: true,
        }
    }
}

impl SttConfig {
    /// Reduced feature set used for the one-time fallback reconnect after a
    /// provider-side configuration rejection.
    pub fn downgraded(&self) -> Self {
        Self {
            extended_features: false,
            ..self.clone()
        }
    }
}

/// Callback invoked for every normalized recognition event.
pub type SpeechEventCallback =
    Arc<dyn Fn(SpeechEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback invoked for streaming errors after connect.
pub type SttErrorCallback =
    Arc<dyn Fn(SttError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Base trait for streaming STT providers.
///
/// Exactly one upstream connection exists per instance; the adapter destroys
/// and recreates the instance on every reconnect rather than reusing it.
#[async_trait::async_trait]
pub trait BaseStt: Send + Sync {
    /// Open the upstream connection.
    async fn connect(&mut self) -> Result<(), SttError>;

    /// Close the upstream connection and release the receive task.
    async fn disconnect(&mut self) -> Result<(), SttError>;

    /// True when audio can be forwarded.
    fn is_ready(&self) -> bool;

    /// Forward one audio frame upstream.
    async fn send_audio(&mut self, frame: Bytes) -> Result<(), SttError>;

    /// Register the recognition-event callback. Must be set before `connect`.
    fn on_event(&mut self, callback: SpeechEventCallback);

    /// Register the streaming-error callback. Must be set before `connect`.
    fn on_error(&mut self, callback: SttErrorCallback);

    /// Milliseconds-since-epoch of the last provider message, 0 if none.
    /// The adapter's dead-man timer reads this to detect silent stalls.
    fn last_message_ms(&self) -> u64;

    fn provider_info(&self) -> &'static str;
}

/// Build a provider instance from configuration. Provider choice is data,
/// not duplicated control flow.
pub fn create_provider(config: &SttConfig) -> Result<Box<dyn BaseStt>, SttError> {
    match config.provider.as_str() {
        "deepgram" => Ok(Box::new(super::deepgram::DeepgramStream::new(
            config.clone(),
        )?)),
        "mock" => Ok(Box::new(super::mock::MockStt::new())),
        other => Err(SttError::ConfigurationRejected(format!(
            "unknown stt provider '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_event_clamps_confidence() {
        let e = SpeechEvent::new("hi".to_string(), true, 1.7);
        assert_eq!(e.confidence, 1.0);
        let e = SpeechEvent::new("hi".to_string(), false, -0.2);
        assert_eq!(e.confidence, 0.0);
    }

    #[test]
    fn downgrade_drops_extended_features_only() {
        let config = SttConfig {
            api_key: "k".to_string(),
            ..Default::default()
        };
        let down = config.downgraded();
        assert!(!down.extended_features);
        assert_eq!(down.model, config.model);
        assert_eq!(down.sample_rate, config.sample_rate);
    }

    #[test]
    fn configuration_faults_are_classified() {
        assert!(SttError::ConfigurationRejected("x".to_string()).is_configuration_fault());
        assert!(!SttError::NetworkError("x".to_string()).is_configuration_fault());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = SttConfig {
            provider: "nope".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
