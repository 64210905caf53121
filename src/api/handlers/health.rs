//! Health check endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint; degraded while the store is unreachable
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.engine.store().is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "healthy" } else { "degraded" },
            "service": "balancer",
            "store_ready": ready,
            "uptime_secs": state.started_at.elapsed().as_secs(),
        })),
    )
}
