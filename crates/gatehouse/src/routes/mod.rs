//! HTTP route handlers for Gatehouse.

use axum::{
    Router,
    routing::{get, post},
    extract::State,
    Json,
};
use gatehouse_common::Theme;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod gate;
mod health;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))

        // Gate endpoints, keyed by X-Client-Id
        .route("/gate", get(gate::get_gate).delete(gate::unmount))
        .route("/gate/verify", post(gate::verify))
        .route("/gate/bypass", post(gate::bypass))
        .route("/gate/stats", get(gate::stats))

        .nest("/admin", admin_routes())

        .layer(TraceLayer::new_for_http())

        // Add shared state
        .with_state(state)
}

/// Admin routes (root theme signal)
fn admin_routes() -> Router<AppState> {
    Router::new().route("/theme", get(get_theme).post(set_theme))
}

// === Admin Handlers ===

#[derive(Serialize, Deserialize)]
struct ThemePayload {
    theme: Theme,
}

async fn get_theme(State(state): State<AppState>) -> Json<ThemePayload> {
    Json(ThemePayload {
        theme: state.theme(),
    })
}

async fn set_theme(
    State(state): State<AppState>,
    Json(payload): Json<ThemePayload>,
) -> Json<ThemePayload> {
    state.set_theme(payload.theme);
    Json(ThemePayload {
        theme: state.theme(),
    })
}
