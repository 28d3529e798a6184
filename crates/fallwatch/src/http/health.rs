//! Liveness and analysis status handlers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use super::AppState;

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/fall-detection/status
pub(crate) async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status())
}
