//! Session registry: authoritative liveness, revocation and expiry sweep.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::models::{DeviceInfo, RevocationReason, Session, SessionInfo};
use crate::services::error::{AuthError, AuthResult};
use crate::services::metrics;
use crate::store::{SessionStore, TenantStore};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Lifetime of a session from login.
    pub session_ttl: Duration,
    /// Minimum gap between two `last_seen` writes for one session.
    pub touch_interval: Duration,
    /// How long a positive liveness lookup is trusted without the store.
    pub live_cache_ttl: Duration,
    /// How long a revoked session id stays in the fast-path set.
    /// Matches the access token lifetime: after that no token can carry it.
    pub revoked_cache_ttl: Duration,
}

#[derive(Debug, Clone, Copy)]
struct LiveEntry {
    tenant_id: Uuid,
    cached_until: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<dyn SessionStore>,
    tenants: Arc<dyn TenantStore>,
    clock: SharedClock,
    settings: SessionSettings,
    revoked: Arc<DashMap<Uuid, DateTime<Utc>>>,
    live: Arc<DashMap<Uuid, LiveEntry>>,
    touched: Arc<DashMap<Uuid, DateTime<Utc>>>,
}

impl SessionRegistry {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        tenants: Arc<dyn TenantStore>,
        clock: SharedClock,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions,
            tenants,
            clock,
            settings,
            revoked: Arc::new(DashMap::new()),
            live: Arc::new(DashMap::new()),
            touched: Arc::new(DashMap::new()),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        self.settings.session_ttl
    }

    pub async fn create(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        device: &DeviceInfo,
    ) -> AuthResult<Session> {
        let now = self.clock.now();
        let session = Session::new(tenant_id, user_id, device, now, now + self.settings.session_ttl);
        self.sessions.insert_session(&session).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            session_id = %session.session_id,
            "Session created"
        );
        Ok(session)
    }

    pub async fn get(&self, tenant_id: Uuid, session_id: Uuid) -> AuthResult<Option<Session>> {
        let session = self.sessions.get_session(tenant_id, session_id).await?;
        match session {
            Some(s) if s.tenant_id != tenant_id => {
                tracing::error!(
                    requested_tenant = %tenant_id,
                    row_tenant = %s.tenant_id,
                    session_id = %session_id,
                    "Cross-tenant session row returned by store"
                );
                Err(AuthError::TenantMismatch("session"))
            }
            other => Ok(other),
        }
    }

    /// Updates `last_seen`, at most once per touch interval per session.
    pub async fn touch(&self, tenant_id: Uuid, session_id: Uuid) -> AuthResult<()> {
        let now = self.clock.now();
        if let Some(last) = self.touched.get(&session_id) {
            if now - *last < self.settings.touch_interval {
                return Ok(());
            }
        }
        self.touched.insert(session_id, now);
        self.sessions.touch_session(tenant_id, session_id, now).await?;
        Ok(())
    }

    /// Liveness check consulted by access-token verification.
    ///
    /// Once `revoke` has returned, this observes the session as revoked: the
    /// revoked set is checked first and re-checked after populating the live cache.
    pub async fn is_live(&self, tenant_id: Uuid, session_id: Uuid) -> AuthResult<bool> {
        let now = self.clock.now();
        if self.revoked.contains_key(&session_id) {
            return Ok(false);
        }
        if let Some(entry) = self.live.get(&session_id) {
            if entry.tenant_id == tenant_id && now < entry.cached_until {
                return Ok(true);
            }
        }

        let Some(session) = self.get(tenant_id, session_id).await? else {
            return Ok(false);
        };
        if !session.is_live(now) {
            return Ok(false);
        }

        let cached_until = (now + self.settings.live_cache_ttl).min(session.expiry_utc);
        self.live.insert(
            session_id,
            LiveEntry {
                tenant_id,
                cached_until,
            },
        );
        if self.revoked.contains_key(&session_id) {
            self.live.remove(&session_id);
            return Ok(false);
        }
        Ok(true)
    }

    /// Idempotent. Returns true when this call moved the session to REVOKED.
    pub async fn revoke(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        reason: RevocationReason,
    ) -> AuthResult<bool> {
        let now = self.clock.now();
        let changed = self
            .sessions
            .revoke_session(tenant_id, session_id, reason, now)
            .await?;
        self.forget_live(session_id, now);

        if changed {
            metrics::record_sessions_revoked(reason.as_str(), 1);
            tracing::info!(
                tenant_id = %tenant_id,
                session_id = %session_id,
                reason = %reason,
                "Session revoked"
            );
        }
        Ok(changed)
    }

    pub async fn revoke_all_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        except: Option<Uuid>,
        reason: RevocationReason,
    ) -> AuthResult<Vec<Uuid>> {
        let now = self.clock.now();
        let revoked = self
            .sessions
            .revoke_user_sessions(tenant_id, user_id, except, reason, now)
            .await?;
        for session_id in &revoked {
            self.forget_live(*session_id, now);
        }

        if !revoked.is_empty() {
            metrics::record_sessions_revoked(reason.as_str(), revoked.len());
            tracing::info!(
                tenant_id = %tenant_id,
                user_id = %user_id,
                count = revoked.len(),
                reason = %reason,
                "User sessions revoked"
            );
        }
        Ok(revoked)
    }

    /// Live sessions of the user, newest first, with the caller's own marked.
    pub async fn list_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        current: Option<Uuid>,
    ) -> AuthResult<Vec<SessionInfo>> {
        let now = self.clock.now();
        let sessions = self.sessions.list_user_sessions(tenant_id, user_id).await?;

        Ok(sessions
            .into_iter()
            .filter(|s| s.tenant_id == tenant_id && s.is_live(now))
            .map(|s| {
                let is_current = Some(s.session_id) == current;
                let mut info = SessionInfo::from(s);
                info.is_current = is_current;
                info
            })
            .collect())
    }

    /// Moves expired ACTIVE sessions of every tenant to REVOKED(`expired`).
    pub async fn sweep_expired(&self) -> AuthResult<usize> {
        let now = self.clock.now();
        let mut total = 0;
        for tenant_id in self.tenants.list_tenant_ids().await? {
            let expired = self.sessions.revoke_expired_sessions(tenant_id, now).await?;
            for session_id in &expired {
                self.forget_live(*session_id, now);
            }
            total += expired.len();
        }

        if total > 0 {
            metrics::record_sessions_revoked(RevocationReason::Expired.as_str(), total);
            tracing::info!(count = total, "Expired sessions swept");
        }
        Ok(total)
    }

    /// Drops cache entries that can no longer matter.
    pub fn gc_caches(&self) -> usize {
        let now = self.clock.now();
        let before = self.revoked.len() + self.live.len() + self.touched.len();
        self.revoked.retain(|_, forget_after| now < *forget_after);
        self.live.retain(|_, entry| now < entry.cached_until);
        let touch_interval = self.settings.touch_interval;
        self.touched.retain(|_, last| now - *last < touch_interval);
        let after = self.revoked.len() + self.live.len() + self.touched.len();
        before.saturating_sub(after)
    }

    fn forget_live(&self, session_id: Uuid, now: DateTime<Utc>) {
        // Revoked set first so a concurrent `is_live` re-check observes it.
        self.revoked
            .insert(session_id, now + self.settings.revoked_cache_ttl);
        self.live.remove(&session_id);
        self.touched.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::models::Tenant;
    use crate::store::MemoryStore;

    fn registry(clock: ManualClock) -> (SessionRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(
            store.clone(),
            store.clone(),
            Arc::new(clock),
            SessionSettings {
                session_ttl: Duration::days(7),
                touch_interval: Duration::seconds(60),
                live_cache_ttl: Duration::seconds(5),
                revoked_cache_ttl: Duration::hours(1),
            },
        );
        (registry, store)
    }

    #[tokio::test]
    async fn revoke_is_immediately_visible_even_when_cached() {
        let (registry, _) = registry(ManualClock::default());
        let tenant = Uuid::new_v4();
        let session = registry
            .create(tenant, Uuid::new_v4(), &DeviceInfo::default())
            .await
            .unwrap();

        assert!(registry.is_live(tenant, session.session_id).await.unwrap());
        assert!(registry
            .revoke(tenant, session.session_id, RevocationReason::UserLogout)
            .await
            .unwrap());
        assert!(!registry.is_live(tenant, session.session_id).await.unwrap());

        // Second revoke is a no-op.
        assert!(!registry
            .revoke(tenant, session.session_id, RevocationReason::AdminRevoked)
            .await
            .unwrap());
        let stored = registry.get(tenant, session.session_id).await.unwrap().unwrap();
        assert_eq!(stored.revocation_reason_code.as_deref(), Some("user_logout"));
    }

    #[tokio::test]
    async fn other_tenant_cannot_see_session() {
        let (registry, _) = registry(ManualClock::default());
        let tenant = Uuid::new_v4();
        let session = registry
            .create(tenant, Uuid::new_v4(), &DeviceInfo::default())
            .await
            .unwrap();
        assert!(registry.is_live(tenant, session.session_id).await.unwrap());
        assert!(!registry.is_live(Uuid::new_v4(), session.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn revoke_all_keeps_the_excepted_session() {
        let (registry, _) = registry(ManualClock::default());
        let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
        let keep = registry.create(tenant, user, &DeviceInfo::default()).await.unwrap();
        let drop_a = registry.create(tenant, user, &DeviceInfo::default()).await.unwrap();
        let drop_b = registry.create(tenant, user, &DeviceInfo::default()).await.unwrap();

        let mut revoked = registry
            .revoke_all_for_user(tenant, user, Some(keep.session_id), RevocationReason::UserRevokedAll)
            .await
            .unwrap();
        revoked.sort();
        let mut expected = vec![drop_a.session_id, drop_b.session_id];
        expected.sort();
        assert_eq!(revoked, expected);

        let listed = registry
            .list_for_user(tenant, user, Some(keep.session_id))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_current);
    }

    #[tokio::test]
    async fn sweep_revokes_expired_sessions() {
        let clock = ManualClock::default();
        let (registry, store) = registry(clock.clone());
        let tenant = Tenant::new("acme".into(), clock.now());
        store.insert_tenant(&tenant).await.unwrap();

        let session = registry
            .create(tenant.tenant_id, Uuid::new_v4(), &DeviceInfo::default())
            .await
            .unwrap();
        assert_eq!(registry.sweep_expired().await.unwrap(), 0);

        clock.advance(Duration::days(7));
        assert!(!registry.is_live(tenant.tenant_id, session.session_id).await.unwrap());
        assert_eq!(registry.sweep_expired().await.unwrap(), 1);
        let stored = registry
            .get(tenant.tenant_id, session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.revocation_reason_code.as_deref(), Some("expired"));
    }

    #[tokio::test]
    async fn touch_is_throttled() {
        let clock = ManualClock::default();
        let (registry, _) = registry(clock.clone());
        let tenant = Uuid::new_v4();
        let session = registry
            .create(tenant, Uuid::new_v4(), &DeviceInfo::default())
            .await
            .unwrap();

        clock.advance(Duration::seconds(10));
        registry.touch(tenant, session.session_id).await.unwrap();
        let first = registry.get(tenant, session.session_id).await.unwrap().unwrap();
        assert_eq!(first.last_seen_utc, clock.now());

        clock.advance(Duration::seconds(10));
        registry.touch(tenant, session.session_id).await.unwrap();
        let second = registry.get(tenant, session.session_id).await.unwrap().unwrap();
        assert_eq!(second.last_seen_utc, first.last_seen_utc);

        clock.advance(Duration::seconds(60));
        registry.touch(tenant, session.session_id).await.unwrap();
        let third = registry.get(tenant, session.session_id).await.unwrap().unwrap();
        assert_eq!(third.last_seen_utc, clock.now());
    }

    #[tokio::test]
    async fn gc_drops_stale_cache_entries() {
        let clock = ManualClock::default();
        let (registry, _) = registry(clock.clone());
        let tenant = Uuid::new_v4();
        let session = registry
            .create(tenant, Uuid::new_v4(), &DeviceInfo::default())
            .await
            .unwrap();
        registry
            .revoke(tenant, session.session_id, RevocationReason::UserLogout)
            .await
            .unwrap();
        assert_eq!(registry.gc_caches(), 0);

        clock.advance(Duration::hours(2));
        assert!(registry.gc_caches() >= 1);
        // Store still says revoked after the fast path forgets it.
        assert!(!registry.is_live(tenant, session.session_id).await.unwrap());
    }
}
