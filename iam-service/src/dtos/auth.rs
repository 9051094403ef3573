use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::UserResponse;

#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    pub tenant_id: Uuid,
    #[validate(length(min = 3, max = 254, message = "Email must be 3-254 characters"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    pub username: Option<String>,
    #[validate(length(max = 100, message = "Display name must be at most 100 characters"))]
    pub display_name: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    pub tenant_id: Uuid,
    #[validate(length(min = 1, max = 254, message = "Email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyMfaRequest {
    pub tenant_id: Uuid,
    pub challenge_id: Uuid,
    #[validate(length(min = 6, max = 32, message = "Code must be 6-32 characters"))]
    pub code: String,
}

#[derive(Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(max = 100, message = "Display name must be at most 100 characters"))]
    pub display_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmMfaRequest {
    pub device_id: Uuid,
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

#[derive(Deserialize, Validate)]
pub struct DisableMfaRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegenerateRecoveryCodesRequest {
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeAllSessionsRequest {
    #[serde(default)]
    pub except_current: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiTokenRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(length(min = 1, message = "At least one scope is required"))]
    pub scopes: Vec<String>,
    /// Lifetime in seconds. Absent means the token does not expire.
    #[validate(range(min = 1, message = "expires_in must be positive"))]
    pub expires_in: Option<i64>,
    #[validate(range(min = 1, max = 10000, message = "rate_limit_rps must be 1-10000"))]
    pub rate_limit_rps: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct RecoveryCodesResponse {
    pub recovery_codes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RecoveryCodesRemainingResponse {
    pub remaining: usize,
}

#[derive(Debug, Serialize)]
pub struct RevokedCountResponse {
    pub revoked: usize,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
