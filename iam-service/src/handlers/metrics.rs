use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

pub async fn metrics() -> impl IntoResponse {
    crate::services::metrics::get_metrics()
}

/// GET /health: reports the backing store as well as the process.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.core.stores.tenants.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "service": state.config.service_name, "store": "ok" })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check: store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "service": state.config.service_name, "store": "unavailable" })),
            )
        }
    }
}
