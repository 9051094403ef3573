//! Domain error for the IAM core.
//!
//! Callers match on the variant, never on the message. `kind()` folds the
//! variants into the transport-independent taxonomy and `public_message()` is
//! the only text a caller ever sees.

use axum::http::StatusCode;
use service_core::error::{AppError, CodedError};
use thiserror::Error;

use crate::models::MfaChallengeTicket;
use crate::store::StoreError;

pub const GENERIC_CREDENTIALS_MESSAGE: &str = "invalid credentials";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Unauthenticated,
    Forbidden,
    Conflict,
    NotFound,
    RateLimited,
    Transient,
    Internal,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("weak password: {0}")]
    WeakPassword(String),

    #[error("invalid scopes: {0}")]
    InvalidScopes(String),

    #[error("email already registered")]
    EmailInUse,

    #[error("username already taken")]
    UsernameInUse,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked")]
    AccountLocked,

    #[error("user inactive")]
    UserInactive,

    #[error("multi-factor authentication required")]
    MfaRequired(MfaChallengeTicket),

    #[error("invalid one-time code")]
    InvalidCode,

    #[error("challenge expired")]
    ChallengeExpired,

    #[error("one-time code already used")]
    MfaReplay,

    #[error("mfa already enrolled")]
    MfaAlreadyEnrolled,

    #[error("mfa not enrolled")]
    MfaNotEnrolled,

    #[error("authentication required")]
    Unauthenticated,

    #[error("malformed token")]
    TokenMalformed,

    #[error("token signature invalid")]
    TokenSignatureInvalid,

    #[error("token type mismatch")]
    TokenTypeMismatch,

    #[error("token expired")]
    TokenExpired,

    #[error("refresh token reuse detected")]
    RefreshReused,

    #[error("session revoked")]
    SessionRevoked,

    #[error("tenant suspended")]
    TenantSuspended,

    #[error("forbidden")]
    Forbidden,

    #[error("role is still assigned")]
    RoleInUse,

    #[error("role already exists")]
    RoleExists,

    #[error("system roles cannot be modified")]
    SystemRoleImmutable,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("tenant mismatch on {0} row")]
    TenantMismatch(&'static str),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        use AuthError::*;
        match self {
            InvalidInput(_) | WeakPassword(_) | InvalidScopes(_) => ErrorKind::InvalidInput,
            EmailInUse | UsernameInUse | MfaAlreadyEnrolled | RoleInUse | RoleExists => {
                ErrorKind::Conflict
            }
            InvalidCredentials | AccountLocked | UserInactive | MfaRequired(_) | InvalidCode
            | ChallengeExpired | MfaReplay | Unauthenticated | TokenMalformed
            | TokenSignatureInvalid | TokenTypeMismatch | TokenExpired | RefreshReused
            | SessionRevoked | TenantSuspended => ErrorKind::Unauthenticated,
            Forbidden | SystemRoleImmutable => ErrorKind::Forbidden,
            NotFound(_) | MfaNotEnrolled => ErrorKind::NotFound,
            RateLimited { .. } => ErrorKind::RateLimited,
            DeadlineExceeded | Transient(_) => ErrorKind::Transient,
            TenantMismatch(_) | Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        use AuthError::*;
        match self {
            InvalidInput(_) => "invalid_input",
            WeakPassword(_) => "weak_password",
            InvalidScopes(_) => "invalid_scopes",
            EmailInUse => "email_in_use",
            UsernameInUse => "username_in_use",
            InvalidCredentials | AccountLocked | UserInactive | TenantSuspended => {
                "invalid_credentials"
            }
            MfaRequired(_) => "mfa_required",
            InvalidCode => "invalid_code",
            ChallengeExpired => "challenge_expired",
            MfaReplay => "mfa_replay",
            MfaAlreadyEnrolled => "mfa_already_enrolled",
            MfaNotEnrolled => "mfa_not_enrolled",
            Unauthenticated => "unauthenticated",
            TokenMalformed | TokenSignatureInvalid | TokenTypeMismatch => "token_invalid",
            TokenExpired => "token_expired",
            RefreshReused => "refresh_reused",
            SessionRevoked => "session_revoked",
            Forbidden => "forbidden",
            RoleInUse => "role_in_use",
            RoleExists => "role_exists",
            SystemRoleImmutable => "system_role_immutable",
            NotFound(_) => "not_found",
            RateLimited { .. } => "rate_limited",
            DeadlineExceeded => "deadline_exceeded",
            Transient(_) => "unavailable",
            TenantMismatch(_) | Internal(_) => "internal",
        }
    }

    /// The only text a caller sees. Credential and MFA proof failures collapse
    /// into one generic message; internal failures are opaque.
    pub fn public_message(&self) -> String {
        use AuthError::*;
        match self {
            InvalidInput(detail) | WeakPassword(detail) | InvalidScopes(detail) => detail.clone(),
            InvalidCredentials | AccountLocked | UserInactive | TenantSuspended | InvalidCode
            | MfaReplay => GENERIC_CREDENTIALS_MESSAGE.to_string(),
            TokenMalformed | TokenSignatureInvalid | TokenTypeMismatch => {
                "invalid token".to_string()
            }
            Transient(_) => "service temporarily unavailable".to_string(),
            TenantMismatch(_) | Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidInput => match self {
                AuthError::WeakPassword(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::BAD_REQUEST,
            },
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Transient => match self {
                AuthError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Credential failures whose distinction is kept out of responses.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::AccountLocked
                | AuthError::UserInactive
                | AuthError::TenantSuspended
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AuthError::Transient(msg),
            StoreError::Conflict(c) => {
                AuthError::Internal(anyhow::anyhow!("unexpected constraint violation: {}", c))
            }
            StoreError::Internal(msg) => AuthError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err.kind() {
            ErrorKind::Internal => {
                tracing::error!(error = %err, "IAM internal error");
            }
            ErrorKind::Transient => {
                tracing::warn!(error = %err, "IAM transient failure");
            }
            _ => {}
        }
        let mut coded = CodedError::new(err.status(), err.code(), err.public_message());
        match &err {
            AuthError::RateLimited { retry_after_secs } => {
                coded = coded.with_retry_after(*retry_after_secs);
            }
            AuthError::MfaRequired(ticket) => {
                coded = coded.with_data(serde_json::json!({
                    "challenge_id": ticket.challenge_id,
                    "expiry_utc": ticket.expiry_utc,
                }));
            }
            _ => {}
        }
        AppError::Coded(coded)
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_are_indistinguishable() {
        let errs = [
            AuthError::InvalidCredentials,
            AuthError::AccountLocked,
            AuthError::UserInactive,
            AuthError::TenantSuspended,
        ];
        for err in &errs {
            assert_eq!(err.kind(), ErrorKind::Unauthenticated);
            assert_eq!(err.code(), "invalid_credentials");
            assert_eq!(err.public_message(), GENERIC_CREDENTIALS_MESSAGE);
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn internal_errors_are_opaque() {
        let err = AuthError::Internal(anyhow::anyhow!("row for tenant 42 leaked"));
        assert_eq!(err.public_message(), "internal error");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AuthError::TenantMismatch("user").code(), "internal");
    }

    #[test]
    fn store_errors_map_to_kinds() {
        let transient: AuthError = StoreError::Unavailable("pool timed out".into()).into();
        assert_eq!(transient.kind(), ErrorKind::Transient);
        let internal: AuthError = StoreError::Internal("bad row".into()).into();
        assert_eq!(internal.kind(), ErrorKind::Internal);
    }

    #[test]
    fn deadline_maps_to_gateway_timeout() {
        assert_eq!(AuthError::DeadlineExceeded.kind(), ErrorKind::Transient);
        assert_eq!(AuthError::DeadlineExceeded.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
