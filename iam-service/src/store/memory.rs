//! In-memory store used in development and tests.
//!
//! One mutex per table. Every compare-and-set runs entirely under its table lock,
//! which gives the same atomicity the PostgreSQL statements provide.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    constraint, ApiTokenStore, MfaStore, RefreshTokenStore, RoleStore, SessionStore, StoreError,
    StoreResult, TenantStore, UserStore,
};
use crate::models::{
    ApiToken, ApiTokenUsage, MfaChallenge, MfaDevice, RecoveryCode, RefreshTokenRecord,
    RevocationReason, Role, RoleBinding, Session, Tenant, User,
};

#[derive(Default)]
pub struct MemoryStore {
    tenants: Mutex<HashMap<Uuid, Tenant>>,
    users: Mutex<HashMap<Uuid, User>>,
    sessions: Mutex<HashMap<Uuid, Session>>,
    refresh_tokens: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
    devices: Mutex<HashMap<Uuid, MfaDevice>>,
    recovery_codes: Mutex<HashMap<Uuid, RecoveryCode>>,
    challenges: Mutex<HashMap<Uuid, MfaChallenge>>,
    roles: Mutex<HashMap<Uuid, Role>>,
    bindings: Mutex<HashMap<Uuid, RoleBinding>>,
    api_tokens: Mutex<HashMap<Uuid, ApiToken>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<'a, T>(table: &'a Mutex<T>, name: &str) -> StoreResult<MutexGuard<'a, T>> {
    table
        .lock()
        .map_err(|e| StoreError::Internal(format!("{} table mutex poisoned: {}", name, e)))
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        lock(&self.tenants, "tenants")?.insert(tenant.tenant_id, tenant.clone());
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> StoreResult<Option<Tenant>> {
        Ok(lock(&self.tenants, "tenants")?.get(&tenant_id).cloned())
    }

    async fn set_tenant_status(&self, tenant_id: Uuid, status_code: &str) -> StoreResult<bool> {
        let mut tenants = lock(&self.tenants, "tenants")?;
        Ok(match tenants.get_mut(&tenant_id) {
            Some(t) => {
                t.status_code = status_code.to_string();
                true
            }
            None => false,
        })
    }

    async fn list_tenant_ids(&self) -> StoreResult<Vec<Uuid>> {
        Ok(lock(&self.tenants, "tenants")?.keys().copied().collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut users = lock(&self.users, "users")?;
        for existing in users.values().filter(|u| u.tenant_id == user.tenant_id) {
            if existing.email == user.email {
                return Err(StoreError::Conflict(constraint::USER_EMAIL.to_string()));
            }
            if existing.username == user.username {
                return Err(StoreError::Conflict(constraint::USER_USERNAME.to_string()));
            }
        }
        users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn find_user_by_email(&self, tenant_id: Uuid, email: &str) -> StoreResult<Option<User>> {
        Ok(lock(&self.users, "users")?
            .values()
            .find(|u| u.tenant_id == tenant_id && u.email == email)
            .cloned())
    }

    async fn find_user_by_id(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(lock(&self.users, "users")?
            .get(&user_id)
            .filter(|u| u.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_user(&self, user: &User) -> StoreResult<bool> {
        let mut users = lock(&self.users, "users")?;
        let username_taken = users.values().any(|u| {
            u.tenant_id == user.tenant_id && u.user_id != user.user_id && u.username == user.username
        });
        if username_taken {
            return Err(StoreError::Conflict(constraint::USER_USERNAME.to_string()));
        }
        Ok(match users.get_mut(&user.user_id) {
            Some(existing) if existing.tenant_id == user.tenant_id => {
                existing.username = user.username.clone();
                existing.display_name = user.display_name.clone();
                existing.password_hash = user.password_hash.clone();
                existing.is_active = user.is_active;
                existing.mfa_required = user.mfa_required;
                existing.deleted_utc = user.deleted_utc;
                existing.updated_utc = user.updated_utc;
                true
            }
            _ => false,
        })
    }

    async fn increment_failed_logins(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<i32>> {
        let mut users = lock(&self.users, "users")?;
        Ok(users
            .get_mut(&user_id)
            .filter(|u| u.tenant_id == tenant_id)
            .map(|u| {
                u.failed_login_count += 1;
                u.updated_utc = now;
                u.failed_login_count
            }))
    }

    async fn reset_failed_logins(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut users = lock(&self.users, "users")?;
        Ok(match users.get_mut(&user_id).filter(|u| u.tenant_id == tenant_id) {
            Some(u) => {
                u.failed_login_count = 0;
                u.lockout_until_utc = None;
                true
            }
            None => false,
        })
    }

    async fn set_lockout(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        until: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut users = lock(&self.users, "users")?;
        Ok(match users.get_mut(&user_id).filter(|u| u.tenant_id == tenant_id) {
            Some(u) => {
                u.lockout_until_utc = Some(until);
                u.failed_login_count = 0;
                true
            }
            None => false,
        })
    }

    async fn count_users(&self, tenant_id: Uuid) -> StoreResult<i64> {
        Ok(lock(&self.users, "users")?
            .values()
            .filter(|u| u.tenant_id == tenant_id)
            .count() as i64)
    }
}

fn revoke(session: &mut Session, reason: RevocationReason, now: DateTime<Utc>) {
    session.revoked_utc = Some(now);
    session.revocation_reason_code = Some(reason.as_str().to_string());
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        lock(&self.sessions, "sessions")?.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get_session(&self, tenant_id: Uuid, session_id: Uuid) -> StoreResult<Option<Session>> {
        Ok(lock(&self.sessions, "sessions")?
            .get(&session_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn touch_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut sessions = lock(&self.sessions, "sessions")?;
        Ok(
            match sessions
                .get_mut(&session_id)
                .filter(|s| s.tenant_id == tenant_id && !s.is_revoked())
            {
                Some(s) => {
                    s.last_seen_utc = now;
                    true
                }
                None => false,
            },
        )
    }

    async fn revoke_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut sessions = lock(&self.sessions, "sessions")?;
        Ok(
            match sessions
                .get_mut(&session_id)
                .filter(|s| s.tenant_id == tenant_id && !s.is_revoked())
            {
                Some(s) => {
                    revoke(s, reason, now);
                    true
                }
                None => false,
            },
        )
    }

    async fn revoke_user_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        except: Option<Uuid>,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>> {
        let mut sessions = lock(&self.sessions, "sessions")?;
        let mut revoked = Vec::new();
        for s in sessions.values_mut().filter(|s| {
            s.tenant_id == tenant_id
                && s.user_id == user_id
                && !s.is_revoked()
                && Some(s.session_id) != except
        }) {
            revoke(s, reason, now);
            revoked.push(s.session_id);
        }
        Ok(revoked)
    }

    async fn list_user_sessions(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Vec<Session>> {
        let mut list: Vec<Session> = lock(&self.sessions, "sessions")?
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.user_id == user_id && !s.is_revoked())
            .cloned()
            .collect();
        list.sort_by(|a, b| b.issued_utc.cmp(&a.issued_utc));
        Ok(list)
    }

    async fn revoke_expired_sessions(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>> {
        let mut sessions = lock(&self.sessions, "sessions")?;
        let mut revoked = Vec::new();
        for s in sessions
            .values_mut()
            .filter(|s| s.tenant_id == tenant_id && !s.is_revoked() && s.expiry_utc <= now)
        {
            revoke(s, RevocationReason::Expired, now);
            revoked.push(s.session_id);
        }
        Ok(revoked)
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> StoreResult<()> {
        lock(&self.refresh_tokens, "refresh_tokens")?.insert(record.token_id, record.clone());
        Ok(())
    }

    async fn get_refresh_token(
        &self,
        tenant_id: Uuid,
        token_id: Uuid,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        Ok(lock(&self.refresh_tokens, "refresh_tokens")?
            .get(&token_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn consume_refresh_token(
        &self,
        tenant_id: Uuid,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tokens = lock(&self.refresh_tokens, "refresh_tokens")?;
        Ok(
            match tokens
                .get_mut(&token_id)
                .filter(|r| r.tenant_id == tenant_id && !r.is_consumed())
            {
                Some(r) => {
                    r.consumed_utc = Some(now);
                    true
                }
                None => false,
            },
        )
    }

    async fn consume_chain(
        &self,
        tenant_id: Uuid,
        chain_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tokens = lock(&self.refresh_tokens, "refresh_tokens")?;
        let mut count = 0;
        for r in tokens
            .values_mut()
            .filter(|r| r.tenant_id == tenant_id && r.chain_id == chain_id && !r.is_consumed())
        {
            r.consumed_utc = Some(now);
            count += 1;
        }
        Ok(count)
    }

    async fn delete_expired_refresh_tokens(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tokens = lock(&self.refresh_tokens, "refresh_tokens")?;
        let before = tokens.len();
        tokens.retain(|_, r| !(r.tenant_id == tenant_id && r.is_expired(now)));
        Ok((before - tokens.len()) as u64)
    }
}

#[async_trait]
impl MfaStore for MemoryStore {
    async fn insert_device(&self, device: &MfaDevice) -> StoreResult<()> {
        lock(&self.devices, "mfa_devices")?.insert(device.device_id, device.clone());
        Ok(())
    }

    async fn find_device(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        device_id: Uuid,
    ) -> StoreResult<Option<MfaDevice>> {
        Ok(lock(&self.devices, "mfa_devices")?
            .get(&device_id)
            .filter(|d| d.tenant_id == tenant_id && d.user_id == user_id)
            .cloned())
    }

    async fn find_confirmed_device(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<MfaDevice>> {
        Ok(lock(&self.devices, "mfa_devices")?
            .values()
            .find(|d| d.tenant_id == tenant_id && d.user_id == user_id && d.is_confirmed)
            .cloned())
    }

    async fn confirm_device(&self, tenant_id: Uuid, device_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut devices = lock(&self.devices, "mfa_devices")?;
        let Some(target) = devices.get(&device_id).filter(|d| d.tenant_id == tenant_id) else {
            return Ok(false);
        };
        let user_id = target.user_id;
        let already_confirmed = devices
            .values()
            .any(|d| d.tenant_id == tenant_id && d.user_id == user_id && d.is_confirmed);
        if already_confirmed {
            return Ok(false);
        }
        Ok(match devices.get_mut(&device_id) {
            Some(d) => {
                d.is_confirmed = true;
                d.confirmed_utc = Some(now);
                d.last_used_step = None;
                true
            }
            None => false,
        })
    }

    async fn advance_device_step(&self, tenant_id: Uuid, device_id: Uuid, step: i64) -> StoreResult<bool> {
        let mut devices = lock(&self.devices, "mfa_devices")?;
        Ok(
            match devices
                .get_mut(&device_id)
                .filter(|d| d.tenant_id == tenant_id && d.is_confirmed)
            {
                Some(d) if d.last_used_step.is_none_or(|last| step > last) => {
                    d.last_used_step = Some(step);
                    true
                }
                _ => false,
            },
        )
    }

    async fn delete_unconfirmed_devices(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<u64> {
        let mut devices = lock(&self.devices, "mfa_devices")?;
        let before = devices.len();
        devices.retain(|_, d| !(d.tenant_id == tenant_id && d.user_id == user_id && !d.is_confirmed));
        Ok((before - devices.len()) as u64)
    }

    async fn delete_devices(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<u64> {
        let mut devices = lock(&self.devices, "mfa_devices")?;
        let before = devices.len();
        devices.retain(|_, d| !(d.tenant_id == tenant_id && d.user_id == user_id));
        Ok((before - devices.len()) as u64)
    }

    async fn replace_recovery_codes(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        codes: &[RecoveryCode],
    ) -> StoreResult<()> {
        let mut table = lock(&self.recovery_codes, "recovery_codes")?;
        table.retain(|_, c| !(c.tenant_id == tenant_id && c.user_id == user_id));
        for code in codes {
            table.insert(code.code_id, code.clone());
        }
        Ok(())
    }

    async fn list_unused_recovery_codes(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Vec<RecoveryCode>> {
        Ok(lock(&self.recovery_codes, "recovery_codes")?
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.user_id == user_id && c.used_utc.is_none())
            .cloned()
            .collect())
    }

    async fn use_recovery_code(
        &self,
        tenant_id: Uuid,
        code_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut table = lock(&self.recovery_codes, "recovery_codes")?;
        Ok(
            match table
                .get_mut(&code_id)
                .filter(|c| c.tenant_id == tenant_id && c.used_utc.is_none())
            {
                Some(c) => {
                    c.used_utc = Some(now);
                    true
                }
                None => false,
            },
        )
    }

    async fn delete_recovery_codes(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<u64> {
        let mut table = lock(&self.recovery_codes, "recovery_codes")?;
        let before = table.len();
        table.retain(|_, c| !(c.tenant_id == tenant_id && c.user_id == user_id));
        Ok((before - table.len()) as u64)
    }

    async fn insert_challenge(&self, challenge: &MfaChallenge) -> StoreResult<()> {
        lock(&self.challenges, "mfa_challenges")?.insert(challenge.challenge_id, challenge.clone());
        Ok(())
    }

    async fn consume_challenge(
        &self,
        tenant_id: Uuid,
        challenge_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<MfaChallenge>> {
        let mut table = lock(&self.challenges, "mfa_challenges")?;
        Ok(table
            .get_mut(&challenge_id)
            .filter(|c| c.tenant_id == tenant_id && c.consumed_utc.is_none())
            .map(|c| {
                c.consumed_utc = Some(now);
                c.clone()
            }))
    }

    async fn delete_expired_challenges(&self, tenant_id: Uuid, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut table = lock(&self.challenges, "mfa_challenges")?;
        let before = table.len();
        table.retain(|_, c| !(c.tenant_id == tenant_id && c.expiry_utc <= now));
        Ok((before - table.len()) as u64)
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let mut roles = lock(&self.roles, "roles")?;
        if roles
            .values()
            .any(|r| r.tenant_id == role.tenant_id && r.role_name == role.role_name)
        {
            return Err(StoreError::Conflict(constraint::ROLE_NAME.to_string()));
        }
        roles.insert(role.role_id, role.clone());
        Ok(())
    }

    async fn get_role(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<Option<Role>> {
        Ok(lock(&self.roles, "roles")?
            .get(&role_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_role_by_name(&self, tenant_id: Uuid, role_name: &str) -> StoreResult<Option<Role>> {
        Ok(lock(&self.roles, "roles")?
            .values()
            .find(|r| r.tenant_id == tenant_id && r.role_name == role_name)
            .cloned())
    }

    async fn list_roles(&self, tenant_id: Uuid) -> StoreResult<Vec<Role>> {
        let mut list: Vec<Role> = lock(&self.roles, "roles")?
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.role_name.cmp(&b.role_name));
        Ok(list)
    }

    async fn update_role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        permissions: &[String],
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut roles = lock(&self.roles, "roles")?;
        Ok(match roles.get_mut(&role_id).filter(|r| r.tenant_id == tenant_id) {
            Some(r) => {
                r.permissions = permissions.to_vec();
                r.updated_utc = now;
                true
            }
            None => false,
        })
    }

    async fn delete_role(&self, tenant_id: Uuid, role_id: Uuid) -> StoreResult<bool> {
        // Lock order: roles before bindings, same as insert_binding.
        let mut roles = lock(&self.roles, "roles")?;
        let bindings = lock(&self.bindings, "role_bindings")?;
        if !roles.get(&role_id).is_some_and(|r| r.tenant_id == tenant_id) {
            return Ok(false);
        }
        if bindings
            .values()
            .any(|b| b.tenant_id == tenant_id && b.role_id == role_id)
        {
            return Err(StoreError::Conflict(constraint::ROLE_IN_USE.to_string()));
        }
        roles.remove(&role_id);
        Ok(true)
    }

    async fn insert_binding(&self, binding: &RoleBinding) -> StoreResult<()> {
        let roles = lock(&self.roles, "roles")?;
        let mut bindings = lock(&self.bindings, "role_bindings")?;
        if !roles
            .get(&binding.role_id)
            .is_some_and(|r| r.tenant_id == binding.tenant_id)
        {
            return Err(StoreError::Conflict(constraint::ROLE_IN_USE.to_string()));
        }
        if bindings.values().any(|b| {
            b.tenant_id == binding.tenant_id
                && b.user_id == binding.user_id
                && b.role_id == binding.role_id
                && b.project_id == binding.project_id
        }) {
            return Err(StoreError::Conflict(constraint::ROLE_BINDING.to_string()));
        }
        bindings.insert(binding.binding_id, binding.clone());
        Ok(())
    }

    async fn delete_binding(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
        project_id: Option<Uuid>,
    ) -> StoreResult<bool> {
        let mut bindings = lock(&self.bindings, "role_bindings")?;
        let before = bindings.len();
        bindings.retain(|_, b| {
            !(b.tenant_id == tenant_id
                && b.user_id == user_id
                && b.role_id == role_id
                && b.project_id == project_id)
        });
        Ok(bindings.len() < before)
    }

    async fn list_user_bindings(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Vec<RoleBinding>> {
        Ok(lock(&self.bindings, "role_bindings")?
            .values()
            .filter(|b| b.tenant_id == tenant_id && b.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ApiTokenStore for MemoryStore {
    async fn insert_api_token(&self, token: &ApiToken) -> StoreResult<()> {
        lock(&self.api_tokens, "api_tokens")?.insert(token.token_id, token.clone());
        Ok(())
    }

    async fn find_api_tokens_by_prefix(
        &self,
        tenant_id: Option<Uuid>,
        prefix: &str,
    ) -> StoreResult<Vec<ApiToken>> {
        Ok(lock(&self.api_tokens, "api_tokens")?
            .values()
            .filter(|t| tenant_id.is_none_or(|tid| t.tenant_id == tid) && t.token_prefix == prefix)
            .cloned()
            .collect())
    }

    async fn get_api_token(&self, tenant_id: Uuid, token_id: Uuid) -> StoreResult<Option<ApiToken>> {
        Ok(lock(&self.api_tokens, "api_tokens")?
            .get(&token_id)
            .filter(|t| t.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_user_api_tokens(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Vec<ApiToken>> {
        let mut list: Vec<ApiToken> = lock(&self.api_tokens, "api_tokens")?
            .values()
            .filter(|t| t.tenant_id == tenant_id && t.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(list)
    }

    async fn revoke_api_token(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tokens = lock(&self.api_tokens, "api_tokens")?;
        Ok(
            match tokens
                .get_mut(&token_id)
                .filter(|t| t.tenant_id == tenant_id && t.user_id == user_id)
            {
                Some(t) => {
                    t.revoked_utc.get_or_insert(now);
                    t.token_hash = None;
                    true
                }
                None => false,
            },
        )
    }

    async fn apply_api_token_usage(&self, usage: &[ApiTokenUsage]) -> StoreResult<()> {
        let mut tokens = lock(&self.api_tokens, "api_tokens")?;
        for u in usage {
            if let Some(t) = tokens
                .get_mut(&u.token_id)
                .filter(|t| t.tenant_id == u.tenant_id)
            {
                t.use_count += u.uses;
                if t.last_used_utc.is_none_or(|prev| prev <= u.last_used_utc) {
                    t.last_used_utc = Some(u.last_used_utc);
                    t.last_used_ip = u.last_used_ip.clone();
                }
            }
        }
        Ok(())
    }

    async fn purge_expired_api_token_hashes(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tokens = lock(&self.api_tokens, "api_tokens")?;
        let mut count = 0;
        for t in tokens
            .values_mut()
            .filter(|t| t.tenant_id == tenant_id && t.token_hash.is_some() && t.is_expired(now))
        {
            t.token_hash = None;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceInfo;
    use chrono::Duration;

    fn user(tenant_id: Uuid, email: &str, username: &str) -> User {
        User::new(tenant_id, email.into(), username.into(), None, "hash".into(), Utc::now())
    }

    #[tokio::test]
    async fn email_unique_per_tenant_only() {
        let store = MemoryStore::new();
        let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());
        store.insert_user(&user(t1, "a@example.com", "a")).await.unwrap();
        store.insert_user(&user(t2, "a@example.com", "a")).await.unwrap();

        let err = store
            .insert_user(&user(t1, "a@example.com", "b"))
            .await
            .unwrap_err();
        assert!(err.is_conflict_on(constraint::USER_EMAIL));
    }

    #[tokio::test]
    async fn lookups_never_cross_tenants() {
        let store = MemoryStore::new();
        let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());
        let u = user(t1, "a@example.com", "a");
        store.insert_user(&u).await.unwrap();

        assert!(store.find_user_by_id(t2, u.user_id).await.unwrap().is_none());
        assert!(store
            .find_user_by_email(t2, "a@example.com")
            .await
            .unwrap()
            .is_none());
        assert!(store.increment_failed_logins(t2, u.user_id, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_consume_is_single_use() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let tenant = Uuid::new_v4();
        let record = RefreshTokenRecord::new(
            Uuid::new_v4(),
            tenant,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "h".into(),
            now,
            now + Duration::days(7),
        );
        store.insert_refresh_token(&record).await.unwrap();

        assert!(store.consume_refresh_token(tenant, record.token_id, now).await.unwrap());
        assert!(!store.consume_refresh_token(tenant, record.token_id, now).await.unwrap());
    }

    #[tokio::test]
    async fn revoke_session_is_idempotent() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let s = Session::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &DeviceInfo::default(),
            now,
            now + Duration::hours(1),
        );
        store.insert_session(&s).await.unwrap();

        assert!(store
            .revoke_session(s.tenant_id, s.session_id, RevocationReason::UserLogout, now)
            .await
            .unwrap());
        assert!(!store
            .revoke_session(s.tenant_id, s.session_id, RevocationReason::AdminRevoked, now)
            .await
            .unwrap());

        let stored = store.get_session(s.tenant_id, s.session_id).await.unwrap().unwrap();
        assert_eq!(stored.revocation_reason_code.as_deref(), Some("user_logout"));
    }

    #[tokio::test]
    async fn device_step_only_moves_forward() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let d = MfaDevice::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), vec![1, 2, 3], now);
        store.insert_device(&d).await.unwrap();
        assert!(store.confirm_device(d.tenant_id, d.device_id, now).await.unwrap());
        assert!(store.advance_device_step(d.tenant_id, d.device_id, 100).await.unwrap());

        assert!(!store.advance_device_step(d.tenant_id, d.device_id, 100).await.unwrap());
        assert!(store.advance_device_step(d.tenant_id, d.device_id, 101).await.unwrap());
        assert!(!store.advance_device_step(d.tenant_id, d.device_id, 99).await.unwrap());
    }

    #[tokio::test]
    async fn referenced_role_cannot_be_deleted() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let tenant = Uuid::new_v4();
        let role = Role::new(tenant, "qa".into(), vec!["tasks.read".into()], now);
        store.insert_role(&role).await.unwrap();
        let user_id = Uuid::new_v4();
        store
            .insert_binding(&RoleBinding::new(tenant, user_id, role.role_id, None, now))
            .await
            .unwrap();

        let err = store.delete_role(tenant, role.role_id).await.unwrap_err();
        assert!(err.is_conflict_on(constraint::ROLE_IN_USE));

        assert!(store.delete_binding(tenant, user_id, role.role_id, None).await.unwrap());
        assert!(store.delete_role(tenant, role.role_id).await.unwrap());
    }
}
