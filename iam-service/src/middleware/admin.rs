use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;

use crate::utils::crypto::constant_time_eq;
use crate::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";

/// Guards tenant administration with the bootstrap admin key.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.admin_api_key.as_ref() else {
        tracing::warn!("Admin request rejected: ADMIN_API_KEY is not configured");
        return Err(AppError::Forbidden(anyhow::anyhow!("admin API disabled")));
    };

    let presented = request
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if constant_time_eq(presented.as_bytes(), expected.expose_secret().as_bytes()) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(path = %request.uri().path(), "Failed admin authentication attempt");
        Err(AppError::Unauthorized(anyhow::anyhow!(
            "invalid or missing admin API key"
        )))
    }
}
