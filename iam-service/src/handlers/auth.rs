//! Registration, login, second factor, refresh and logout.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::dtos::auth::{
    ChangePasswordRequest, LoginRequest, MessageResponse, RefreshRequest, RegisterRequest,
    RegisterResponse, RevokedCountResponse, VerifyMfaRequest,
};
use crate::middleware::{AuthPrincipal, Meta};
use crate::services::auth::RegisterInput;
use crate::utils::{Password, ValidatedJson};
use crate::AppState;

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    Meta(meta): Meta,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = RegisterInput {
        tenant_id: req.tenant_id,
        email: req.email,
        password: Password::new(req.password),
        username: req.username,
        display_name: req.display_name,
    };
    let user = state.core.auth.register(input, &meta).await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { user })))
}

/// POST /auth/login
///
/// A user with MFA gets 401 `mfa_required` carrying the challenge id.
pub async fn login(
    State(state): State<AppState>,
    Meta(meta): Meta,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let password = Password::new(req.password);
    let tokens = state
        .core
        .auth
        .login(req.tenant_id, &req.email, &password, &meta)
        .await?;
    Ok((StatusCode::OK, Json(tokens)))
}

/// POST /auth/mfa/verify
pub async fn verify_mfa(
    State(state): State<AppState>,
    Meta(meta): Meta,
    ValidatedJson(req): ValidatedJson<VerifyMfaRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state
        .core
        .auth
        .verify_mfa(req.tenant_id, req.challenge_id, &req.code, &meta)
        .await?;
    Ok((StatusCode::OK, Json(tokens)))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    Meta(meta): Meta,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state.core.auth.refresh(&req.refresh_token, &meta).await?;
    Ok((StatusCode::OK, Json(tokens)))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    state.core.auth.logout(&principal, &meta).await?;
    Ok((StatusCode::OK, Json(MessageResponse::new("Logged out successfully"))))
}

/// POST /auth/password
pub async fn change_password(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let current = Password::new(req.current_password);
    let new = Password::new(req.new_password);
    let revoked = state
        .core
        .auth
        .change_password(&principal, &current, &new, &meta)
        .await?;
    Ok((StatusCode::OK, Json(RevokedCountResponse { revoked })))
}
