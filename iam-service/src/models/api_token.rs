//! API token model - long-lived machine credentials.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// API token entity. `token_hash` is `None` once revoked or purged after expiry.
#[derive(Clone, FromRow)]
pub struct ApiToken {
    pub token_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub token_prefix: String,
    pub token_hash: Option<String>,
    pub scopes: Vec<String>,
    pub rate_limit_rps: i32,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub use_count: i64,
    pub expiry_utc: Option<DateTime<Utc>>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiToken")
            .field("token_id", &self.token_id)
            .field("tenant_id", &self.tenant_id)
            .field("user_id", &self.user_id)
            .field("token_prefix", &self.token_prefix)
            .field("token_hash", &self.token_hash.as_ref().map(|_| "[REDACTED]"))
            .field("scopes", &self.scopes)
            .field("expiry_utc", &self.expiry_utc)
            .field("revoked_utc", &self.revoked_utc)
            .finish()
    }
}

impl ApiToken {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: Uuid,
        user_id: Uuid,
        display_name: String,
        token_prefix: String,
        token_hash: String,
        scopes: Vec<String>,
        rate_limit_rps: i32,
        now: DateTime<Utc>,
        expiry_utc: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            tenant_id,
            user_id,
            display_name,
            token_prefix,
            token_hash: Some(token_hash),
            scopes,
            rate_limit_rps,
            last_used_utc: None,
            last_used_ip: None,
            use_count: 0,
            expiry_utc,
            revoked_utc: None,
            created_utc: now,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc.is_some_and(|exp| now >= exp)
    }

    /// Public view without the hash.
    pub fn info(&self) -> ApiTokenInfo {
        ApiTokenInfo::from(self)
    }
}

/// API token info for responses. Never carries the secret or its hash.
#[derive(Debug, Clone, Serialize)]
pub struct ApiTokenInfo {
    pub token_id: Uuid,
    pub display_name: String,
    pub token_prefix: String,
    pub scopes: Vec<String>,
    pub rate_limit_rps: i32,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub use_count: i64,
    pub expiry_utc: Option<DateTime<Utc>>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<&ApiToken> for ApiTokenInfo {
    fn from(t: &ApiToken) -> Self {
        Self {
            token_id: t.token_id,
            display_name: t.display_name.clone(),
            token_prefix: t.token_prefix.clone(),
            scopes: t.scopes.clone(),
            rate_limit_rps: t.rate_limit_rps,
            last_used_utc: t.last_used_utc,
            last_used_ip: t.last_used_ip.clone(),
            use_count: t.use_count,
            expiry_utc: t.expiry_utc,
            revoked_utc: t.revoked_utc,
            created_utc: t.created_utc,
        }
    }
}

/// Returned exactly once at issuance.
#[derive(Clone, Serialize)]
pub struct ApiTokenCreated {
    pub token: ApiTokenInfo,
    pub secret: String,
}

impl std::fmt::Debug for ApiTokenCreated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTokenCreated")
            .field("token", &self.token)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Pending usage delta for one token, merged in memory before a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiTokenUsage {
    pub tenant_id: Uuid,
    pub token_id: Uuid,
    pub uses: i64,
    pub last_used_utc: DateTime<Utc>,
    pub last_used_ip: Option<String>,
}
