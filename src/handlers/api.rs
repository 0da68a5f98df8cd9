use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::errors::AppResult;
use crate::state::AppState;

/// Health check handler
/// Returns server liveness plus the live session count.
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<Value>> {
    Ok(Json(json!({
        "status": "OK",
        "active_sessions": state.registry.len(),
    })))
}
