use axum::{Json, extract::State, response::IntoResponse};
use tether_core::ConnectionState;

use super::RelayState;
use crate::metrics;

/// Health check endpoint - reports control channel state
pub async fn health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    let control = state.link.state();
    let known_players = state.ctx.directory.read().await.len() as u64;

    let status = if control == ConnectionState::Ready {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        control: control.to_string(),
        known_players,
        uptime_secs: state.ctx.metrics.uptime_secs(),
    })
}

/// Metrics endpoint - returns all bridge counters
pub async fn metrics_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(state.ctx.metrics.snapshot())
}

/// Liveness probe - returns 200 if the process is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}
