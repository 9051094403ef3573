//! User model - tenant-scoped user accounts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// User entity (tenant-scoped).
///
/// `email` is stored in its normalized form (NFC, lowercase). Soft-deleted
/// users keep their row so that email and username stay reserved.
#[derive(Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: Option<String>,
    /// PHC-encoded password hash record (algorithm, params, salt, digest).
    pub password_hash: String,
    pub is_active: bool,
    pub failed_login_count: i32,
    pub lockout_until_utc: Option<DateTime<Utc>>,
    pub mfa_required: bool,
    pub deleted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("user_id", &self.user_id)
            .field("tenant_id", &self.tenant_id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .field("is_active", &self.is_active)
            .field("failed_login_count", &self.failed_login_count)
            .field("lockout_until_utc", &self.lockout_until_utc)
            .field("mfa_required", &self.mfa_required)
            .finish()
    }
}

impl User {
    /// Create a new user.
    pub fn new(
        tenant_id: Uuid,
        email: String,
        username: String,
        display_name: Option<String>,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            email,
            username,
            display_name,
            password_hash,
            is_active: true,
            failed_login_count: 0,
            lockout_until_utc: None,
            mfa_required: false,
            deleted_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Check if the account is locked at `now`.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until_utc.is_some_and(|until| now < until)
    }

    /// Active and not soft-deleted.
    pub fn can_authenticate(&self) -> bool {
        self.is_active && self.deleted_utc.is_none()
    }

    /// Convert to sanitized response (no sensitive fields).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self)
    }
}

/// Public view of a user.
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub mfa_required: bool,
    pub created_utc: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(u: &User) -> Self {
        Self {
            user_id: u.user_id,
            tenant_id: u.tenant_id,
            email: u.email.clone(),
            username: u.username.clone(),
            display_name: u.display_name.clone(),
            is_active: u.is_active,
            mfa_required: u.mfa_required,
            created_utc: u.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn lockout_expires() {
        let now = Utc::now();
        let mut user = User::new(
            Uuid::new_v4(),
            "a@example.com".into(),
            "a".into(),
            None,
            "$argon2id$stub".into(),
            now,
        );
        assert!(!user.is_locked(now));
        user.lockout_until_utc = Some(now + Duration::minutes(15));
        assert!(user.is_locked(now + Duration::minutes(14)));
        assert!(!user.is_locked(now + Duration::minutes(15)));
    }

    #[test]
    fn debug_redacts_password_hash() {
        let user = User::new(
            Uuid::new_v4(),
            "a@example.com".into(),
            "a".into(),
            None,
            "$argon2id$secret-material".into(),
            Utc::now(),
        );
        let rendered = format!("{:?}", user);
        assert!(!rendered.contains("secret-material"));
    }
}
