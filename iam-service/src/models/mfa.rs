//! MFA models - TOTP devices, recovery codes and login challenges.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub const TOTP_ALGORITHM_SHA1: &str = "SHA1";
pub const TOTP_STEP_SECONDS: i32 = 30;
pub const TOTP_DIGITS: i32 = 6;

/// A TOTP device. The shared secret is stored as `nonce || ciphertext`.
#[derive(Clone, FromRow)]
pub struct MfaDevice {
    pub device_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub algorithm_code: String,
    pub secret_ciphertext: Vec<u8>,
    pub step_seconds: i32,
    pub digits: i32,
    pub is_confirmed: bool,
    /// Highest TOTP step accepted so far; codes at or below it are replays.
    pub last_used_step: Option<i64>,
    pub created_utc: DateTime<Utc>,
    pub confirmed_utc: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for MfaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MfaDevice")
            .field("device_id", &self.device_id)
            .field("tenant_id", &self.tenant_id)
            .field("user_id", &self.user_id)
            .field("algorithm_code", &self.algorithm_code)
            .field("secret_ciphertext", &"[REDACTED]")
            .field("is_confirmed", &self.is_confirmed)
            .field("last_used_step", &self.last_used_step)
            .finish()
    }
}

impl MfaDevice {
    pub fn new(
        device_id: Uuid,
        tenant_id: Uuid,
        user_id: Uuid,
        secret_ciphertext: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            tenant_id,
            user_id,
            algorithm_code: TOTP_ALGORITHM_SHA1.to_string(),
            secret_ciphertext,
            step_seconds: TOTP_STEP_SECONDS,
            digits: TOTP_DIGITS,
            is_confirmed: false,
            last_used_step: None,
            created_utc: now,
            confirmed_utc: None,
        }
    }
}

/// Single-use recovery code; only the keyed hash is stored.
#[derive(Debug, Clone, FromRow)]
pub struct RecoveryCode {
    pub code_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub code_hash: String,
    pub used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl RecoveryCode {
    pub fn new(tenant_id: Uuid, user_id: Uuid, code_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            code_id: Uuid::new_v4(),
            tenant_id,
            user_id,
            code_hash,
            used_utc: None,
            created_utc: now,
        }
    }
}

/// Pending second-factor challenge created by a password-verified login.
#[derive(Debug, Clone, FromRow)]
pub struct MfaChallenge {
    pub challenge_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl MfaChallenge {
    pub fn new(
        tenant_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
        expiry_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            challenge_id: Uuid::new_v4(),
            tenant_id,
            user_id,
            expiry_utc,
            consumed_utc: None,
            created_utc: now,
        }
    }

    pub fn ticket(&self) -> MfaChallengeTicket {
        MfaChallengeTicket {
            challenge_id: self.challenge_id,
            expiry_utc: self.expiry_utc,
        }
    }
}

/// What the caller receives when a login needs a second factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MfaChallengeTicket {
    pub challenge_id: Uuid,
    pub expiry_utc: DateTime<Utc>,
}

/// Result of starting enrollment. Carries the plaintext secret once.
#[derive(Clone, Serialize)]
pub struct MfaEnrollment {
    pub device_id: Uuid,
    pub secret_base32: String,
    pub provisioning_uri: String,
}

impl std::fmt::Debug for MfaEnrollment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MfaEnrollment")
            .field("device_id", &self.device_id)
            .field("secret_base32", &"[REDACTED]")
            .finish()
    }
}

/// How a second factor was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaMethod {
    Totp,
    RecoveryCode,
}
