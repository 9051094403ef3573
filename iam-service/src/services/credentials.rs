//! Credential store: tenant-scoped user lookup and lockout accounting.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::User;
use crate::services::error::{AuthError, AuthResult};
use crate::store::{constraint, StoreError, UserStore};
use crate::utils::normalize_email;

#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Counted(i32),
    Locked(DateTime<Utc>),
}

#[derive(Clone)]
pub struct CredentialStore {
    users: Arc<dyn UserStore>,
    lockout: LockoutPolicy,
}

impl CredentialStore {
    pub fn new(users: Arc<dyn UserStore>, lockout: LockoutPolicy) -> Self {
        Self { users, lockout }
    }

    /// Looks up by normalized email. Malformed addresses simply find nothing.
    pub async fn lookup_by_email(&self, tenant_id: Uuid, email: &str) -> AuthResult<Option<User>> {
        let Some(email) = normalize_email(email) else {
            return Ok(None);
        };
        let user = self.users.find_user_by_email(tenant_id, &email).await?;
        ensure_tenant(tenant_id, user)
    }

    pub async fn lookup_by_id(&self, tenant_id: Uuid, user_id: Uuid) -> AuthResult<Option<User>> {
        let user = self.users.find_user_by_id(tenant_id, user_id).await?;
        ensure_tenant(tenant_id, user)
    }

    pub async fn create(&self, user: &User) -> AuthResult<()> {
        self.users.insert_user(user).await.map_err(map_user_conflict)
    }

    pub async fn update(&self, user: &User) -> AuthResult<()> {
        if self.users.update_user(user).await.map_err(map_user_conflict)? {
            Ok(())
        } else {
            Err(AuthError::NotFound("user"))
        }
    }

    /// Counts a failure and locks the account once the threshold is reached.
    pub async fn record_failed_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> AuthResult<FailureOutcome> {
        let count = self
            .users
            .increment_failed_logins(tenant_id, user_id, now)
            .await?
            .ok_or(AuthError::NotFound("user"))?;

        if count >= self.lockout.max_attempts as i32 {
            let until = now + self.lockout.duration;
            self.mark_locked(tenant_id, user_id, until).await?;
            tracing::warn!(
                tenant_id = %tenant_id,
                user_id = %user_id,
                failures = count,
                lockout_until = %until,
                "Account locked after repeated failed logins"
            );
            return Ok(FailureOutcome::Locked(until));
        }
        Ok(FailureOutcome::Counted(count))
    }

    pub async fn reset_failures(&self, tenant_id: Uuid, user_id: Uuid) -> AuthResult<()> {
        self.users.reset_failed_logins(tenant_id, user_id).await?;
        Ok(())
    }

    pub async fn mark_locked(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        until: DateTime<Utc>,
    ) -> AuthResult<()> {
        self.users.set_lockout(tenant_id, user_id, until).await?;
        Ok(())
    }

    pub async fn count(&self, tenant_id: Uuid) -> AuthResult<i64> {
        Ok(self.users.count_users(tenant_id).await?)
    }
}

/// A row from another tenant means a broken query. Fail closed.
fn ensure_tenant(tenant_id: Uuid, user: Option<User>) -> AuthResult<Option<User>> {
    match user {
        Some(u) if u.tenant_id != tenant_id => {
            tracing::error!(
                requested_tenant = %tenant_id,
                row_tenant = %u.tenant_id,
                user_id = %u.user_id,
                "Cross-tenant user row returned by store"
            );
            Err(AuthError::TenantMismatch("user"))
        }
        other => Ok(other),
    }
}

fn map_user_conflict(err: StoreError) -> AuthError {
    if err.is_conflict_on(constraint::USER_EMAIL) {
        AuthError::EmailInUse
    } else if err.is_conflict_on(constraint::USER_USERNAME) {
        AuthError::UsernameInUse
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreResult};
    use async_trait::async_trait;

    fn store() -> CredentialStore {
        CredentialStore::new(
            Arc::new(MemoryStore::new()),
            LockoutPolicy {
                max_attempts: 3,
                duration: Duration::minutes(15),
            },
        )
    }

    fn user(tenant_id: Uuid, email: &str) -> User {
        User::new(tenant_id, email.into(), email.replace('@', "_"), None, "h".into(), Utc::now())
    }

    #[tokio::test]
    async fn email_lookup_normalizes() {
        let creds = store();
        let tenant = Uuid::new_v4();
        creds.create(&user(tenant, "alice@example.com")).await.unwrap();

        assert!(creds
            .lookup_by_email(tenant, "  ALICE@Example.com")
            .await
            .unwrap()
            .is_some());
        assert!(creds.lookup_by_email(tenant, "not-an-email").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_maps_to_email_in_use() {
        let creds = store();
        let tenant = Uuid::new_v4();
        creds.create(&user(tenant, "alice@example.com")).await.unwrap();
        let mut dup = user(tenant, "alice@example.com");
        dup.username = "other".into();
        assert!(matches!(creds.create(&dup).await, Err(AuthError::EmailInUse)));
    }

    #[tokio::test]
    async fn threshold_locks_account() {
        let creds = store();
        let tenant = Uuid::new_v4();
        let u = user(tenant, "alice@example.com");
        creds.create(&u).await.unwrap();
        let now = Utc::now();

        assert_eq!(
            creds.record_failed_login(tenant, u.user_id, now).await.unwrap(),
            FailureOutcome::Counted(1)
        );
        creds.record_failed_login(tenant, u.user_id, now).await.unwrap();
        let outcome = creds.record_failed_login(tenant, u.user_id, now).await.unwrap();
        assert_eq!(outcome, FailureOutcome::Locked(now + Duration::minutes(15)));

        let stored = creds.lookup_by_id(tenant, u.user_id).await.unwrap().unwrap();
        assert!(stored.is_locked(now + Duration::minutes(14)));

        creds.reset_failures(tenant, u.user_id).await.unwrap();
        let stored = creds.lookup_by_id(tenant, u.user_id).await.unwrap().unwrap();
        assert!(!stored.is_locked(now));
        assert_eq!(stored.failed_login_count, 0);
    }

    /// Store that ignores the tenant predicate, to prove the guard fails closed.
    struct LeakyStore(User);

    #[async_trait]
    impl UserStore for LeakyStore {
        async fn insert_user(&self, _: &User) -> StoreResult<()> {
            Ok(())
        }
        async fn find_user_by_email(&self, _: Uuid, _: &str) -> StoreResult<Option<User>> {
            Ok(Some(self.0.clone()))
        }
        async fn find_user_by_id(&self, _: Uuid, _: Uuid) -> StoreResult<Option<User>> {
            Ok(Some(self.0.clone()))
        }
        async fn update_user(&self, _: &User) -> StoreResult<bool> {
            Ok(true)
        }
        async fn increment_failed_logins(&self, _: Uuid, _: Uuid, _: DateTime<Utc>) -> StoreResult<Option<i32>> {
            Ok(Some(1))
        }
        async fn reset_failed_logins(&self, _: Uuid, _: Uuid) -> StoreResult<bool> {
            Ok(true)
        }
        async fn set_lockout(&self, _: Uuid, _: Uuid, _: DateTime<Utc>) -> StoreResult<bool> {
            Ok(true)
        }
        async fn count_users(&self, _: Uuid) -> StoreResult<i64> {
            Ok(1)
        }
    }

    #[tokio::test]
    async fn cross_tenant_row_fails_closed() {
        let other_tenant_user = user(Uuid::new_v4(), "bob@example.com");
        let creds = CredentialStore::new(
            Arc::new(LeakyStore(other_tenant_user)),
            LockoutPolicy {
                max_attempts: 3,
                duration: Duration::minutes(15),
            },
        );
        let requested = Uuid::new_v4();
        assert!(matches!(
            creds.lookup_by_email(requested, "bob@example.com").await,
            Err(AuthError::TenantMismatch("user"))
        ));
        assert!(matches!(
            creds.lookup_by_id(requested, Uuid::new_v4()).await,
            Err(AuthError::TenantMismatch(_))
        ));
    }
}
