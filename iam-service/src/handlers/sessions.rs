use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::auth::{RevokeAllSessionsRequest, RevokedCountResponse};
use crate::middleware::{AuthPrincipal, Meta};
use crate::AppState;

/// GET /sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.core.auth.list_sessions(&principal).await?;
    Ok(Json(sessions))
}

/// DELETE /sessions/:session_id
pub async fn revoke_session(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .core
        .auth
        .revoke_session(&principal, session_id, &meta)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /sessions/revoke-all
pub async fn revoke_all_sessions(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
    body: Option<Json<RevokeAllSessionsRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let except_current = body.map(|Json(req)| req.except_current).unwrap_or(false);
    let revoked = state
        .core
        .auth
        .revoke_all_sessions(&principal, except_current, &meta)
        .await?;
    Ok(Json(RevokedCountResponse { revoked }))
}

/// DELETE /admin/sessions/:session_id
pub async fn admin_revoke_session(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .core
        .auth
        .admin_revoke_session(&principal, session_id, &meta)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
