//! Session model - server-side record of an interactive login.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Why a session left the ACTIVE state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    UserLogout,
    UserRevoked,
    UserRevokedAll,
    AdminRevoked,
    PasswordChanged,
    Expired,
    RefreshReuse,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::UserLogout => "user_logout",
            RevocationReason::UserRevoked => "user_revoked",
            RevocationReason::UserRevokedAll => "user_revoked_all",
            RevocationReason::AdminRevoked => "admin_revoked",
            RevocationReason::PasswordChanged => "password_changed",
            RevocationReason::Expired => "expired",
            RevocationReason::RefreshReuse => "refresh_reuse",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device metadata captured at login.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl DeviceInfo {
    /// SHA-256 over `ip|user_agent`, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.ip.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"|");
        hasher.update(self.user_agent.as_deref().unwrap_or_default().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Session entity.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
    pub device_fingerprint: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub revocation_reason_code: Option<String>,
}

impl Session {
    pub fn new(
        tenant_id: Uuid,
        user_id: Uuid,
        device: &DeviceInfo,
        now: DateTime<Utc>,
        expiry_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tenant_id,
            user_id,
            issued_utc: now,
            expiry_utc,
            last_seen_utc: now,
            device_fingerprint: device.fingerprint(),
            ip_address: device.ip.clone(),
            user_agent: device.user_agent.clone(),
            revoked_utc: None,
            revocation_reason_code: None,
        }
    }

    /// Live iff not revoked and not yet expired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_utc.is_none() && now < self.expiry_utc
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }
}

/// Session info for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_current: bool,
}

impl From<Session> for SessionInfo {
    fn from(s: Session) -> Self {
        Self {
            session_id: s.session_id,
            issued_utc: s.issued_utc,
            expiry_utc: s.expiry_utc,
            last_seen_utc: s.last_seen_utc,
            ip_address: s.ip_address,
            user_agent: s.user_agent,
            is_current: false, // Set by caller
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn liveness_follows_expiry_and_revocation() {
        let now = Utc::now();
        let mut session = Session::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            &DeviceInfo::default(),
            now,
            now + Duration::hours(1),
        );
        assert!(session.is_live(now));
        assert!(!session.is_live(now + Duration::hours(1)));

        session.revoked_utc = Some(now);
        assert!(!session.is_live(now));
    }

    #[test]
    fn fingerprint_depends_on_ip_and_agent() {
        let a = DeviceInfo {
            ip: Some("10.0.0.1".into()),
            user_agent: Some("curl/8".into()),
        };
        let b = DeviceInfo {
            ip: Some("10.0.0.2".into()),
            user_agent: Some("curl/8".into()),
        };
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
