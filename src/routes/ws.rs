use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::handlers::ws;
use crate::state::AppState;

/// Create the WebSocket router.
///
/// The `/ws` endpoint is unauthenticated; session identity comes from the
/// `init` message and deployments are expected to put authentication at the
/// proxy layer in front of this service.
pub fn create_ws_router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_session_handler))
        .layer(TraceLayer::new_for_http())
}
