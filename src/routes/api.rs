use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;

pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(api::health_check))
        .layer(TraceLayer::new_for_http())
}
