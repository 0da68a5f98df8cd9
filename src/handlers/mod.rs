//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `ws` - WebSocket real-time tutoring sessions

pub mod api;
pub mod ws;

pub use ws::ws_session_handler;
