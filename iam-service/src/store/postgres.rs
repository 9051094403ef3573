//! PostgreSQL store.
//!
//! Runtime-checked queries (`query_as::<_, T>`) so the crate builds without a
//! live database. Every statement filters on `tenant_id`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use super::{
    ApiTokenStore, MfaStore, RefreshTokenStore, RoleStore, SessionStore, StoreError, StoreResult,
    TenantStore, UserStore,
};
use crate::models::{
    ApiToken, ApiTokenUsage, MfaChallenge, MfaDevice, RecoveryCode, RefreshTokenRecord,
    RevocationReason, Role, RoleBinding, Session, Tenant, User,
};

/// PostgreSQL-backed implementation of every repository trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ==================== Tenants ====================

#[async_trait]
impl TenantStore for PgStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            StoreError::from(e)
        })?;
        Ok(())
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, tenant_name, status_code, created_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.tenant_name)
        .bind(&tenant.status_code)
        .bind(tenant.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> StoreResult<Option<Tenant>> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn set_tenant_status(&self, tenant_id: Uuid, status_code: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE tenants SET status_code = $2 WHERE tenant_id = $1")
            .bind(tenant_id)
            .bind(status_code)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_tenant_ids(&self) -> StoreResult<Vec<Uuid>> {
        Ok(sqlx::query_scalar::<_, Uuid>("SELECT tenant_id FROM tenants")
            .fetch_all(&self.pool)
            .await?)
    }
}

// ==================== Users ====================

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, tenant_id, email, username, display_name, password_hash, is_active,
                failed_login_count, lockout_until_utc, mfa_required, deleted_utc,
                created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(user.user_id)
        .bind(user.tenant_id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.failed_login_count)
        .bind(user.lockout_until_utc)
        .bind(user.mfa_required)
        .bind(user.deleted_utc)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user_by_email(&self, tenant_id: Uuid, email: &str) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 AND email = $2",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_user_by_id(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_user(&self, user: &User) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET username = $3, display_name = $4, password_hash = $5, is_active = $6,
                mfa_required = $7, deleted_utc = $8, updated_utc = $9
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(user.tenant_id)
        .bind(user.user_id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.mfa_required)
        .bind(user.deleted_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_failed_logins(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<i32>> {
        Ok(sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE users
            SET failed_login_count = failed_login_count + 1, updated_utc = $3
            WHERE tenant_id = $1 AND user_id = $2
            RETURNING failed_login_count
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn reset_failed_logins(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET failed_login_count = 0, lockout_until_utc = NULL
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_lockout(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET lockout_until_utc = $3, failed_login_count = 0
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(until)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_users(&self, tenant_id: Uuid) -> StoreResult<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }
}

// ==================== Sessions ====================

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, tenant_id, user_id, issued_utc, expiry_utc, last_seen_utc,
                device_fingerprint, ip_address, user_agent, revoked_utc, revocation_reason_code
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(session.session_id)
        .bind(session.tenant_id)
        .bind(session.user_id)
        .bind(session.issued_utc)
        .bind(session.expiry_utc)
        .bind(session.last_seen_utc)
        .bind(&session.device_fingerprint)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.revoked_utc)
        .bind(&session.revocation_reason_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, tenant_id: Uuid, session_id: Uuid) -> StoreResult<Option<Session>> {
        Ok(sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE tenant_id = $1 AND session_id = $2",
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn touch_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET last_seen_utc = $3
            WHERE tenant_id = $1 AND session_id = $2 AND revoked_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET revoked_utc = $4, revocation_reason_code = $3
            WHERE tenant_id = $1 AND session_id = $2 AND revoked_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(reason.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_user_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        except: Option<Uuid>,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE sessions SET revoked_utc = $5, revocation_reason_code = $4
            WHERE tenant_id = $1 AND user_id = $2 AND revoked_utc IS NULL
              AND ($3::uuid IS NULL OR session_id <> $3)
            RETURNING session_id
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(except)
        .bind(reason.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_user_sessions(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Vec<Session>> {
        Ok(sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE tenant_id = $1 AND user_id = $2 AND revoked_utc IS NULL
            ORDER BY issued_utc DESC
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn revoke_expired_sessions(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE sessions SET revoked_utc = $2, revocation_reason_code = $3
            WHERE tenant_id = $1 AND revoked_utc IS NULL AND expiry_utc <= $2
            RETURNING session_id
            "#,
        )
        .bind(tenant_id)
        .bind(now)
        .bind(RevocationReason::Expired.as_str())
        .fetch_all(&self.pool)
        .await?)
    }
}

// ==================== Refresh tokens ====================

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                token_id, tenant_id, session_id, user_id, chain_id, token_hash,
                expiry_utc, consumed_utc, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.token_id)
        .bind(record.tenant_id)
        .bind(record.session_id)
        .bind(record.user_id)
        .bind(record.chain_id)
        .bind(&record.token_hash)
        .bind(record.expiry_utc)
        .bind(record.consumed_utc)
        .bind(record.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_refresh_token(
        &self,
        tenant_id: Uuid,
        token_id: Uuid,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        Ok(sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT * FROM refresh_tokens WHERE tenant_id = $1 AND token_id = $2",
        )
        .bind(tenant_id)
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn consume_refresh_token(
        &self,
        tenant_id: Uuid,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens SET consumed_utc = $3
            WHERE tenant_id = $1 AND token_id = $2 AND consumed_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(token_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn consume_chain(
        &self,
        tenant_id: Uuid,
        chain_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens SET consumed_utc = $3
            WHERE tenant_id = $1 AND chain_id = $2 AND consumed_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(chain_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_refresh_tokens(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE tenant_id = $1 AND expiry_utc <= $2")
            .bind(tenant_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ==================== MFA ====================

#[async_trait]
impl MfaStore for PgStore {
    async fn insert_device(&self, device: &MfaDevice) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO mfa_devices (
                device_id, tenant_id, user_id, algorithm_code, secret_ciphertext, step_seconds,
                digits, is_confirmed, last_used_step, created_utc, confirmed_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(device.device_id)
        .bind(device.tenant_id)
        .bind(device.user_id)
        .bind(&device.algorithm_code)
        .bind(&device.secret_ciphertext)
        .bind(device.step_seconds)
        .bind(device.digits)
        .bind(device.is_confirmed)
        .bind(device.last_used_step)
        .bind(device.created_utc)
        .bind(device.confirmed_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_device(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        device_id: Uuid,
    ) -> StoreResult<Option<MfaDevice>> {
        Ok(sqlx::query_as::<_, MfaDevice>(
            "SELECT * FROM mfa_devices WHERE tenant_id = $1 AND user_id = $2 AND device_id = $3",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_confirmed_device(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<MfaDevice>> {
        Ok(sqlx::query_as::<_, MfaDevice>(
            "SELECT * FROM mfa_devices WHERE tenant_id = $1 AND user_id = $2 AND is_confirmed",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn confirm_device(&self, tenant_id: Uuid, device_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE mfa_devices
            SET is_confirmed = TRUE, confirmed_utc = $3, last_used_step = NULL
            WHERE tenant_id = $1 AND device_id = $2 AND NOT is_confirmed
            "#,
        )
        .bind(tenant_id)
        .bind(device_id)
        .bind(now)
        .execute(&self.pool)
        .await;
        match result {
            Ok(r) => Ok(r.rows_affected() > 0),
            // Another device won the one-confirmed-device index.
            Err(e) => match StoreError::from(e) {
                StoreError::Conflict(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn advance_device_step(&self, tenant_id: Uuid, device_id: Uuid, step: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE mfa_devices SET last_used_step = $3
            WHERE tenant_id = $1 AND device_id = $2 AND is_confirmed
              AND (last_used_step IS NULL OR last_used_step < $3)
            "#,
        )
        .bind(tenant_id)
        .bind(device_id)
        .bind(step)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_unconfirmed_devices(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM mfa_devices WHERE tenant_id = $1 AND user_id = $2 AND NOT is_confirmed",
        )
        .bind(tenant_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_devices(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM mfa_devices WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace_recovery_codes(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        codes: &[RecoveryCode],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM mfa_recovery_codes WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        for code in codes {
            sqlx::query(
                r#"
                INSERT INTO mfa_recovery_codes (code_id, tenant_id, user_id, code_hash, used_utc, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(code.code_id)
            .bind(code.tenant_id)
            .bind(code.user_id)
            .bind(&code.code_hash)
            .bind(code.used_utc)
            .bind(code.created_utc)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_unused_recovery_codes(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Vec<RecoveryCode>> {
        Ok(sqlx::query_as::<_, RecoveryCode>(
            r#"
            SELECT * FROM mfa_recovery_codes
            WHERE tenant_id = $1 AND user_id = $2 AND used_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn use_recovery_code(
        &self,
        tenant_id: Uuid,
        code_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE mfa_recovery_codes SET used_utc = $3
            WHERE tenant_id = $1 AND code_id = $2 AND used_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(code_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_recovery_codes(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM mfa_recovery_codes WHERE tenant_id = $1 AND user_id = $2")
                .bind(tenant_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn insert_challenge(&self, challenge: &MfaChallenge) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO mfa_challenges (challenge_id, tenant_id, user_id, expiry_utc, consumed_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(challenge.challenge_id)
        .bind(challenge.tenant_id)
        .bind(challenge.user_id)
        .bind(challenge.expiry_utc)
        .bind(challenge.consumed_utc)
        .bind(challenge.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_challenge(
        &self,
        tenant_id: Uuid,
        challenge_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<MfaChallenge>> {
        Ok(sqlx::query_as::<_, MfaChallenge>(
            r#"
            UPDATE mfa_challenges SET consumed_utc = $3
            WHERE tenant_id = $1 AND challenge_id = $2 AND consumed_utc IS NULL
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(challenge_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_expired_challenges(&self, tenant_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM mfa_challenges WHERE tenant_id = $1 AND expiry_utc <= $2")
            .bind(tenant_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ==================== Roles ====================

#[async_trait]
impl RoleStore for PgStore {
    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO roles (role_id, tenant_id, role_name, permissions, is_system, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(role.role_id)
        .bind(role.tenant_id)
        .bind(&role.role_name)
        .bind(&role.permissions)
        .bind(role.is_system)
        .bind(role.created_utc)
        .bind(role.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_role(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<Option<Role>> {
        Ok(sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE tenant_id = $1 AND role_id = $2",
        )
        .bind(tenant_id)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_role_by_name(&self, tenant_id: Uuid, role_name: &str) -> StoreResult<Option<Role>> {
        Ok(sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE tenant_id = $1 AND role_name = $2",
        )
        .bind(tenant_id)
        .bind(role_name)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_roles(&self, tenant_id: Uuid) -> StoreResult<Vec<Role>> {
        Ok(sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE tenant_id = $1 ORDER BY role_name",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update_role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        permissions: &[String],
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE roles SET permissions = $3, updated_utc = $4
            WHERE tenant_id = $1 AND role_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(role_id)
        .bind(permissions)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_role(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM roles WHERE tenant_id = $1 AND role_id = $2")
            .bind(tenant_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_binding(&self, binding: &RoleBinding) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO role_bindings (binding_id, tenant_id, user_id, role_id, project_id, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(binding.binding_id)
        .bind(binding.tenant_id)
        .bind(binding.user_id)
        .bind(binding.role_id)
        .bind(binding.project_id)
        .bind(binding.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_binding(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
        project_id: Option<Uuid>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM role_bindings
            WHERE tenant_id = $1 AND user_id = $2 AND role_id = $3
              AND project_id IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(role_id)
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_user_bindings(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Vec<RoleBinding>> {
        Ok(sqlx::query_as::<_, RoleBinding>(
            "SELECT * FROM role_bindings WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

// ==================== API tokens ====================

#[async_trait]
impl ApiTokenStore for PgStore {
    async fn insert_api_token(&self, token: &ApiToken) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_tokens (
                token_id, tenant_id, user_id, display_name, token_prefix, token_hash, scopes,
                rate_limit_rps, last_used_utc, last_used_ip, use_count, expiry_utc,
                revoked_utc, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(token.token_id)
        .bind(token.tenant_id)
        .bind(token.user_id)
        .bind(&token.display_name)
        .bind(&token.token_prefix)
        .bind(&token.token_hash)
        .bind(&token.scopes)
        .bind(token.rate_limit_rps)
        .bind(token.last_used_utc)
        .bind(&token.last_used_ip)
        .bind(token.use_count)
        .bind(token.expiry_utc)
        .bind(token.revoked_utc)
        .bind(token.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_api_tokens_by_prefix(
        &self,
        tenant_id: Option<Uuid>,
        prefix: &str,
    ) -> StoreResult<Vec<ApiToken>> {
        let rows = match tenant_id {
            Some(tenant_id) => {
                sqlx::query_as::<_, ApiToken>(
                    "SELECT * FROM api_tokens WHERE tenant_id = $1 AND token_prefix = $2",
                )
                .bind(tenant_id)
                .bind(prefix)
                .fetch_all(&self.pool)
                .await?
            }
            // No tenant hint: the one lookup allowed to span tenants.
            None => {
                sqlx::query_as::<_, ApiToken>("SELECT * FROM api_tokens WHERE token_prefix = $1")
                    .bind(prefix)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    async fn get_api_token(&self, tenant_id: Uuid, token_id: Uuid) -> StoreResult<Option<ApiToken>> {
        Ok(sqlx::query_as::<_, ApiToken>(
            "SELECT * FROM api_tokens WHERE tenant_id = $1 AND token_id = $2",
        )
        .bind(tenant_id)
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_user_api_tokens(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Vec<ApiToken>> {
        Ok(sqlx::query_as::<_, ApiToken>(
            r#"
            SELECT * FROM api_tokens
            WHERE tenant_id = $1 AND user_id = $2
            ORDER BY created_utc DESC
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn revoke_api_token(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE api_tokens
            SET revoked_utc = COALESCE(revoked_utc, $4), token_hash = NULL
            WHERE tenant_id = $1 AND user_id = $2 AND token_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(token_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn apply_api_token_usage(&self, usage: &[ApiTokenUsage]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for u in usage {
            sqlx::query(
                r#"
                UPDATE api_tokens
                SET use_count = use_count + $3,
                    last_used_ip = CASE WHEN last_used_utc IS NULL OR last_used_utc <= $4
                                        THEN $5 ELSE last_used_ip END,
                    last_used_utc = GREATEST(COALESCE(last_used_utc, $4), $4)
                WHERE tenant_id = $1 AND token_id = $2
                "#,
            )
            .bind(u.tenant_id)
            .bind(u.token_id)
            .bind(u.uses)
            .bind(u.last_used_utc)
            .bind(&u.last_used_ip)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn purge_expired_api_token_hashes(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE api_tokens SET token_hash = NULL
            WHERE tenant_id = $1 AND token_hash IS NOT NULL AND expiry_utc <= $2
            "#,
        )
        .bind(tenant_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
