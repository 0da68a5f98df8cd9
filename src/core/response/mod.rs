//! Response production: sentence chunking and the streaming coordinator.

pub mod coordinator;
pub mod sentence;

pub use coordinator::{spawn_response, ResponseRequest};
pub use sentence::SentenceSplitter;
