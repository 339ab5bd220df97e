//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use super::AppState;

/// Reports lifecycle state, environment and build version, plus how much
/// background work and client state the process is currently holding.
pub async fn healthcheck_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": state.shutdown.health_state().as_str(),
        "system_info": {
            "environment": state.config.env.as_str(),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "background_tasks": state.dispatcher.in_flight(),
        "tracked_clients": state.admission.registry().len(),
    }))
}
