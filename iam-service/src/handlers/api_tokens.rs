use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::auth::CreateApiTokenRequest;
use crate::middleware::{AuthPrincipal, Meta};
use crate::services::api_token::IssueOptions;
use crate::utils::ValidatedJson;
use crate::AppState;

/// POST /api-tokens
///
/// The secret is in this response and nowhere else.
pub async fn create_api_token(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<CreateApiTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let options = IssueOptions {
        expires_in: req.expires_in.map(chrono::Duration::seconds),
        rate_limit_rps: req.rate_limit_rps,
    };
    let created = state
        .core
        .auth
        .create_api_token(&principal, &req.name, req.scopes, options, &meta)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api-tokens
pub async fn list_api_tokens(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state.core.auth.list_api_tokens(&principal).await?;
    Ok(Json(tokens))
}

/// DELETE /api-tokens/:token_id
pub async fn revoke_api_token(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
    Path(token_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .core
        .auth
        .revoke_api_token(&principal, token_id, &meta)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
