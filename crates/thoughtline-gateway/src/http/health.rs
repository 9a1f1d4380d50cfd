use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe with server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "allow_local": state.config.proxy.allow_local,
        "allowed_hosts": state.config.proxy.allowed_hosts.len(),
    }))
}
