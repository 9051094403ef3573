use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::dtos::auth::{
    ConfirmMfaRequest, DisableMfaRequest, MessageResponse, RecoveryCodesRemainingResponse,
    RecoveryCodesResponse, RegenerateRecoveryCodesRequest,
};
use crate::middleware::{AuthPrincipal, Meta};
use crate::utils::{Password, ValidatedJson};
use crate::AppState;

/// POST /mfa/enroll
pub async fn enroll(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let enrollment = state.core.auth.enroll_mfa(&principal, &meta).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// POST /mfa/confirm
pub async fn confirm(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<ConfirmMfaRequest>,
) -> Result<impl IntoResponse, AppError> {
    let recovery_codes = state
        .core
        .auth
        .confirm_mfa(&principal, req.device_id, &req.code, &meta)
        .await?;
    Ok(Json(RecoveryCodesResponse { recovery_codes }))
}

/// POST /mfa/disable
pub async fn disable(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<DisableMfaRequest>,
) -> Result<impl IntoResponse, AppError> {
    let password = Password::new(req.current_password);
    state.core.auth.disable_mfa(&principal, &password, &meta).await?;
    Ok(Json(MessageResponse::new("MFA disabled")))
}

/// POST /mfa/recovery-codes
pub async fn regenerate_recovery_codes(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<RegenerateRecoveryCodesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let recovery_codes = state
        .core
        .auth
        .regenerate_recovery_codes(&principal, &req.code, &meta)
        .await?;
    Ok(Json(RecoveryCodesResponse { recovery_codes }))
}

/// GET /mfa/recovery-codes
pub async fn recovery_codes_remaining(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let remaining = state.core.auth.recovery_codes_remaining(&principal).await?;
    Ok(Json(RecoveryCodesRemainingResponse { remaining }))
}
