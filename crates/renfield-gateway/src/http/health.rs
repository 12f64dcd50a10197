use std::sync::Arc;

use axum::{extract::State, Json};

use renfield_core::config::PROTOCOL_VERSION;
use renfield_protocol::rest::HealthResponse;

use crate::app::AppState;

/// `GET /health` — liveness probe (§6).
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        protocol: PROTOCOL_VERSION,
        connected_devices: state.devices.len(),
    })
}
