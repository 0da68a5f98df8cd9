//! Shared application state.
//!
//! The session registry is the only cross-session structure in the process:
//! a map from session id to the session's event sender. A reconnecting client
//! presents its `resume_session_id` and, if the parked actor is still inside
//! its grace window, gets the same sender back. Actors deregister themselves
//! in the finalizer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::core::session::{CloseReason, SessionDeps, SessionEvent};

/// Map of live sessions. Lock scope is lookup only; nothing is awaited while
/// it is held.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, mpsc::Sender<SessionEvent>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, session_id: String, events: mpsc::Sender<SessionEvent>) {
        debug!(%session_id, "session registered");
        self.sessions.write().insert(session_id, events);
    }

    /// Find a live (possibly parked) session for resumption.
    pub fn lookup(&self, session_id: &str) -> Option<mpsc::Sender<SessionEvent>> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) {
        if self.sessions.write().remove(session_id).is_some() {
            debug!(%session_id, "session deregistered");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Ask every live session to tear down. Used on process shutdown; actors
    /// flush their own persistence.
    pub async fn shutdown_all(&self) {
        let senders: Vec<_> = self.sessions.read().values().cloned().collect();
        info!(sessions = senders.len(), "shutting down all sessions");
        for sender in senders {
            let _ = sender
                .send(SessionEvent::Shutdown(CloseReason::ServerShutdown))
                .await;
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub deps: SessionDeps,
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: ServerConfig, deps: SessionDeps) -> Self {
        Self {
            config: Arc::new(config),
            deps,
            registry: Arc::new(SessionRegistry::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_lookup_remove_round_trip() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.register("s1".to_string(), tx);
        assert!(registry.lookup("s1").is_some());
        assert!(registry.lookup("s2").is_none());
        assert_eq!(registry.len(), 1);
        registry.remove("s1");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_all_reaches_every_session() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        registry.register("s1".to_string(), tx);
        registry.shutdown_all().await;
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Shutdown(CloseReason::ServerShutdown))
        ));
    }
}
