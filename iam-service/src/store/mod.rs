//! Repository traits for IAM persistence.
//!
//! Every method that reads or writes a tenant-owned row takes the tenant id and
//! filters on it. The only tenant-less lookup is
//! [`ApiTokenStore::find_api_tokens_by_prefix`] with `tenant_id = None`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ApiToken, ApiTokenUsage, MfaChallenge, MfaDevice, RecoveryCode, RefreshTokenRecord,
    RevocationReason, Role, RoleBinding, Session, Tenant, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Unique and foreign-key constraint names surfaced through [`StoreError::Conflict`].
pub mod constraint {
    pub const USER_EMAIL: &str = "users_tenant_email_key";
    pub const USER_USERNAME: &str = "users_tenant_username_key";
    pub const ROLE_NAME: &str = "roles_tenant_name_key";
    pub const ROLE_BINDING: &str = "role_bindings_unique_key";
    pub const ROLE_IN_USE: &str = "role_bindings_role_fkey";
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness or referential constraint rejected the write.
    #[error("constraint violated: {0}")]
    Conflict(String),

    /// The backing store could not be reached. Retry may succeed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_conflict_on(&self, name: &str) -> bool {
        matches!(self, StoreError::Conflict(c) if c == name)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
                StoreError::Conflict(db.constraint().unwrap_or("unknown").to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Internal(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;
    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()>;
    async fn get_tenant(&self, tenant_id: Uuid) -> StoreResult<Option<Tenant>>;
    async fn set_tenant_status(&self, tenant_id: Uuid, status_code: &str) -> StoreResult<bool>;
    /// Used by maintenance sweeps, which then work tenant by tenant.
    async fn list_tenant_ids(&self) -> StoreResult<Vec<Uuid>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn find_user_by_email(&self, tenant_id: Uuid, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_id(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Option<User>>;
    /// Writes profile, password, activity and MFA fields. Returns false if absent.
    async fn update_user(&self, user: &User) -> StoreResult<bool>;
    /// Atomically increments the failure counter and returns the new value.
    async fn increment_failed_logins(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<i32>>;
    /// Clears the failure counter and any lockout.
    async fn reset_failed_logins(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<bool>;
    async fn set_lockout(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        until: DateTime<Utc>,
    ) -> StoreResult<bool>;
    async fn count_users(&self, tenant_id: Uuid) -> StoreResult<i64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> StoreResult<()>;
    async fn get_session(&self, tenant_id: Uuid, session_id: Uuid) -> StoreResult<Option<Session>>;
    async fn touch_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Transitions ACTIVE to REVOKED. Returns false if already revoked or absent.
    async fn revoke_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Revokes every non-revoked session of the user except `except`. Returns revoked ids.
    async fn revoke_user_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        except: Option<Uuid>,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>>;
    /// Non-revoked sessions of the user, newest first.
    async fn list_user_sessions(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Vec<Session>>;
    /// Revokes sessions past expiry with reason `expired`. Returns revoked ids.
    async fn revoke_expired_sessions(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()>;
    async fn get_refresh_token(
        &self,
        tenant_id: Uuid,
        token_id: Uuid,
    ) -> StoreResult<Option<RefreshTokenRecord>>;
    /// Compare-and-set on `consumed_utc IS NULL`. Exactly one concurrent caller wins.
    async fn consume_refresh_token(
        &self,
        tenant_id: Uuid,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Marks every unconsumed token of the chain consumed.
    async fn consume_chain(
        &self,
        tenant_id: Uuid,
        chain_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
    async fn delete_expired_refresh_tokens(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

#[async_trait]
pub trait MfaStore: Send + Sync {
    async fn insert_device(&self, device: &MfaDevice) -> StoreResult<()>;
    async fn find_device(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        device_id: Uuid,
    ) -> StoreResult<Option<MfaDevice>>;
    async fn find_confirmed_device(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<MfaDevice>>;
    /// Confirms an unconfirmed device and records the step used to confirm it.
    /// Marks the device confirmed. The replay marker starts empty: the
    /// confirming code is an enrollment proof, not a login.
    async fn confirm_device(&self, tenant_id: Uuid, device_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;
    /// Compare-and-set: succeeds only if `step` is greater than the last used step.
    async fn advance_device_step(&self, tenant_id: Uuid, device_id: Uuid, step: i64) -> StoreResult<bool>;
    async fn delete_unconfirmed_devices(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<u64>;
    async fn delete_devices(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<u64>;

    /// Replaces the user's whole recovery code batch.
    async fn replace_recovery_codes(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        codes: &[RecoveryCode],
    ) -> StoreResult<()>;
    async fn list_unused_recovery_codes(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Vec<RecoveryCode>>;
    /// Compare-and-set on `used_utc IS NULL`.
    async fn use_recovery_code(
        &self,
        tenant_id: Uuid,
        code_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    async fn delete_recovery_codes(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<u64>;

    async fn insert_challenge(&self, challenge: &MfaChallenge) -> StoreResult<()>;
    /// Atomically marks the challenge consumed and returns it. `None` if absent or already consumed.
    async fn consume_challenge(
        &self,
        tenant_id: Uuid,
        challenge_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<MfaChallenge>>;
    async fn delete_expired_challenges(&self, tenant_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn insert_role(&self, role: &Role) -> StoreResult<()>;
    async fn get_role(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<Option<Role>>;
    async fn find_role_by_name(&self, tenant_id: Uuid, role_name: &str) -> StoreResult<Option<Role>>;
    async fn list_roles(&self, tenant_id: Uuid) -> StoreResult<Vec<Role>>;
    async fn update_role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        permissions: &[String],
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Fails with a [`constraint::ROLE_IN_USE`] conflict while any binding references the role.
    async fn delete_role(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<bool>;

    async fn insert_binding(&self, binding: &RoleBinding) -> StoreResult<()>;
    async fn delete_binding(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
        project_id: Option<Uuid>,
    ) -> StoreResult<bool>;
    async fn list_user_bindings(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Vec<RoleBinding>>;
}

#[async_trait]
pub trait ApiTokenStore: Send + Sync {
    async fn insert_api_token(&self, token: &ApiToken) -> StoreResult<()>;
    /// Candidates sharing the display prefix. `tenant_id = None` scans every tenant.
    async fn find_api_tokens_by_prefix(
        &self,
        tenant_id: Option<Uuid>,
        prefix: &str,
    ) -> StoreResult<Vec<ApiToken>>;
    async fn get_api_token(&self, tenant_id: Uuid, token_id: Uuid) -> StoreResult<Option<ApiToken>>;
    async fn list_user_api_tokens(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Vec<ApiToken>>;
    /// Sets `revoked_utc` and drops the hash. Returns false if the owner has no such token.
    async fn revoke_api_token(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    async fn apply_api_token_usage(&self, usage: &[ApiTokenUsage]) -> StoreResult<()>;
    /// Drops hashes of tokens past expiry. Rows remain for audit.
    async fn purge_expired_api_token_hashes(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

/// All repositories the core depends on.
#[derive(Clone)]
pub struct Stores {
    pub tenants: Arc<dyn TenantStore>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub mfa: Arc<dyn MfaStore>,
    pub roles: Arc<dyn RoleStore>,
    pub api_tokens: Arc<dyn ApiTokenStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            tenants: store.clone(),
            users: store.clone(),
            sessions: store.clone(),
            refresh_tokens: store.clone(),
            mfa: store.clone(),
            roles: store.clone(),
            api_tokens: store,
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            tenants: store.clone(),
            users: store.clone(),
            sessions: store.clone(),
            refresh_tokens: store.clone(),
            mfa: store.clone(),
            roles: store.clone(),
            api_tokens: store,
        }
    }
}
