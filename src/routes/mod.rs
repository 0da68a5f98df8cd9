//! Router assembly.

pub mod api;
pub mod ws;

use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(api::create_api_router())
        .merge(ws::create_ws_router())
        .with_state(state)
}
