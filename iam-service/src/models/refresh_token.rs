//! Refresh token record - single-use, rotated within a chain.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored refresh token. Only the SHA-256 of the secret is kept.
#[derive(Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub token_id: Uuid,
    pub tenant_id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub chain_id: Uuid,
    pub token_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl std::fmt::Debug for RefreshTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenRecord")
            .field("token_id", &self.token_id)
            .field("tenant_id", &self.tenant_id)
            .field("session_id", &self.session_id)
            .field("chain_id", &self.chain_id)
            .field("token_hash", &"[REDACTED]")
            .field("expiry_utc", &self.expiry_utc)
            .field("consumed_utc", &self.consumed_utc)
            .finish()
    }
}

impl RefreshTokenRecord {
    /// `token_id` is generated by the caller since it is embedded in the wire token.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        token_id: Uuid,
        tenant_id: Uuid,
        session_id: Uuid,
        user_id: Uuid,
        chain_id: Uuid,
        token_hash: String,
        now: DateTime<Utc>,
        expiry_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            token_id,
            tenant_id,
            session_id,
            user_id,
            chain_id,
            token_hash,
            expiry_utc,
            consumed_utc: None,
            created_utc: now,
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }
}
