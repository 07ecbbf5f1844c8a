//! Health check endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    store: bool,
    mounted_gates: usize,
}

/// Readiness check (is the store reachable?)
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    if let Err(e) = state.store.ping().await {
        tracing::warn!(error = %e, "Store ping failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(ReadyResponse {
        status: "ready",
        store: true,
        mounted_gates: state.mounted().await,
    }))
}
