//! Collaborator contracts consumed by the session core.
//!
//! Implementations are deliberately thin; the core depends only on the traits
//! so tests can substitute scripted collaborators.

pub mod http;
pub mod llm;
pub mod moderation;
pub mod persistence;
pub mod tts;

pub use llm::{ChatMessage, LanguageModel, LlmError, TokenStream};
pub use moderation::{Moderation, PassThroughModeration, Severity, Verdict};
pub use persistence::{LoggingPersistence, PersistError, Persistence, UsageRecord};
pub use tts::{SpeechSynth, TtsError};
