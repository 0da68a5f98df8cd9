//! Conversation engine core. Everything here is transport-agnostic; the
//! WebSocket layer in [`crate::handlers`] only translates frames to and from
//! [`session::SessionEvent`]s.

pub mod barge_in;
pub mod providers;
pub mod resilience;
pub mod response;
pub mod session;
pub mod signal;
pub mod stt;
pub mod turn;
