use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /
/// Service banner with the endpoint list.
pub async fn root_handler() -> Json<Value> {
    Json(json!({
        "message": "LinkedIn Profile Optimizer API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "active",
        "endpoints": {
            "optimize": "POST /optimize-profile",
            "progress": "GET /progress/{optimization_id}",
            "result": "GET /results/{optimization_id}",
            "results": "GET /results?limit=10",
            "health": "GET /health"
        }
    }))
}

/// GET /health
/// Returns a simple status object with service version and storage backend.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": env!("CARGO_PKG_NAME"),
        "storage": state.results.backend(),
        "model": state.config.openai_model,
    }))
}
