//! MFA engine: TOTP enrollment and verification, recovery codes and
//! login challenges.

use chrono::Duration;
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::models::mfa::{TOTP_DIGITS, TOTP_STEP_SECONDS};
use crate::models::{MfaChallenge, MfaChallengeTicket, MfaDevice, MfaEnrollment, MfaMethod, RecoveryCode};
use crate::services::error::{AuthError, AuthResult};
use crate::store::MfaStore;
use crate::utils::crypto::{constant_time_eq, SecretKey};
use crate::utils::recovery;

const RECOVERY_PEPPER_LABEL: &str = "mfa-recovery-codes";

#[derive(Debug, Clone)]
pub struct MfaSettings {
    pub issuer_label: String,
    pub drift_steps: u8,
    pub recovery_code_count: usize,
    pub challenge_ttl: Duration,
}

#[derive(Clone)]
pub struct MfaEngine {
    store: Arc<dyn MfaStore>,
    key: SecretKey,
    pepper: [u8; 32],
    clock: SharedClock,
    settings: MfaSettings,
}

impl MfaEngine {
    pub fn new(
        store: Arc<dyn MfaStore>,
        key: SecretKey,
        clock: SharedClock,
        settings: MfaSettings,
    ) -> Self {
        let pepper = key.subkey(RECOVERY_PEPPER_LABEL);
        Self {
            store,
            key,
            pepper,
            clock,
            settings,
        }
    }

    pub async fn is_enrolled(&self, tenant_id: Uuid, user_id: Uuid) -> AuthResult<bool> {
        Ok(self
            .store
            .find_confirmed_device(tenant_id, user_id)
            .await?
            .is_some())
    }

    /// Starts enrollment. Any earlier unconfirmed device is discarded.
    pub async fn enroll(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        account_name: &str,
    ) -> AuthResult<MfaEnrollment> {
        if self.is_enrolled(tenant_id, user_id).await? {
            return Err(AuthError::MfaAlreadyEnrolled);
        }
        self.store.delete_unconfirmed_devices(tenant_id, user_id).await?;

        let secret = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("Failed to generate TOTP secret: {:?}", e))?;
        let totp = self.totp(secret.clone(), account_name, TOTP_STEP_SECONDS)?;

        let device_id = Uuid::new_v4();
        let ciphertext = self.key.encrypt(&secret, tenant_id, user_id, device_id)?;
        let device = MfaDevice::new(device_id, tenant_id, user_id, ciphertext, self.clock.now());
        self.store.insert_device(&device).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            device_id = %device_id,
            "MFA enrollment started"
        );

        Ok(MfaEnrollment {
            device_id,
            secret_base32: Secret::Raw(secret).to_encoded().to_string(),
            provisioning_uri: totp.get_url(),
        })
    }

    /// Confirms the device with a first valid code and issues recovery codes.
    /// The plaintext codes are returned exactly once.
    pub async fn confirm(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        device_id: Uuid,
        code: &str,
    ) -> AuthResult<Vec<String>> {
        let device = self
            .store
            .find_device(tenant_id, user_id, device_id)
            .await?
            .filter(|d| d.tenant_id == tenant_id && d.user_id == user_id)
            .ok_or(AuthError::NotFound("mfa device"))?;
        if device.is_confirmed {
            return Err(AuthError::MfaAlreadyEnrolled);
        }

        if self.match_step(&device, code)?.is_none() {
            return Err(AuthError::InvalidCode);
        }
        let now = self.clock.now();
        if !self.store.confirm_device(tenant_id, device_id, now).await? {
            return Err(AuthError::MfaAlreadyEnrolled);
        }

        let codes = self.issue_recovery_codes(tenant_id, user_id).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            device_id = %device_id,
            "MFA device confirmed"
        );
        Ok(codes)
    }

    /// Second-factor check at login: a TOTP code from the confirmed device or
    /// an unused recovery code.
    pub async fn verify_login(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        code: &str,
    ) -> AuthResult<MfaMethod> {
        let code = code.trim();
        if is_totp_shaped(code) {
            self.verify_totp(tenant_id, user_id, code).await?;
            return Ok(MfaMethod::Totp);
        }
        if recovery::looks_like_code(code) {
            self.use_recovery_code(tenant_id, user_id, code).await?;
            return Ok(MfaMethod::RecoveryCode);
        }
        Err(AuthError::InvalidCode)
    }

    /// TOTP-only proof. Each accepted step moves the device's replay marker forward.
    pub async fn verify_totp(&self, tenant_id: Uuid, user_id: Uuid, code: &str) -> AuthResult<()> {
        let device = self
            .store
            .find_confirmed_device(tenant_id, user_id)
            .await?
            .filter(|d| d.tenant_id == tenant_id)
            .ok_or(AuthError::MfaNotEnrolled)?;

        let step = self.match_step(&device, code)?.ok_or(AuthError::InvalidCode)?;
        if device.last_used_step.is_some_and(|last| step <= last) {
            tracing::warn!(
                tenant_id = %tenant_id,
                user_id = %user_id,
                step,
                "TOTP code replayed"
            );
            return Err(AuthError::MfaReplay);
        }
        if !self
            .store
            .advance_device_step(tenant_id, device.device_id, step)
            .await?
        {
            tracing::warn!(
                tenant_id = %tenant_id,
                user_id = %user_id,
                step,
                "TOTP code replayed concurrently"
            );
            return Err(AuthError::MfaReplay);
        }
        Ok(())
    }

    async fn use_recovery_code(&self, tenant_id: Uuid, user_id: Uuid, code: &str) -> AuthResult<()> {
        let presented = recovery::hash_code(&self.pepper, code)?;
        let candidates = self.store.list_unused_recovery_codes(tenant_id, user_id).await?;

        let mut matched = None;
        for candidate in &candidates {
            if constant_time_eq(presented.as_bytes(), candidate.code_hash.as_bytes()) {
                matched = Some(candidate.code_id);
            }
        }
        let code_id = matched.ok_or(AuthError::InvalidCode)?;

        if !self
            .store
            .use_recovery_code(tenant_id, code_id, self.clock.now())
            .await?
        {
            return Err(AuthError::InvalidCode);
        }
        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            remaining = candidates.len().saturating_sub(1),
            "Recovery code used"
        );
        Ok(())
    }

    /// Replaces the recovery code batch after a fresh TOTP proof.
    pub async fn regenerate_recovery_codes(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        code: &str,
    ) -> AuthResult<Vec<String>> {
        self.verify_totp(tenant_id, user_id, code.trim()).await?;
        self.issue_recovery_codes(tenant_id, user_id).await
    }

    pub async fn recovery_codes_remaining(&self, tenant_id: Uuid, user_id: Uuid) -> AuthResult<usize> {
        Ok(self
            .store
            .list_unused_recovery_codes(tenant_id, user_id)
            .await?
            .len())
    }

    /// Removes every device and recovery code of the user.
    pub async fn disable(&self, tenant_id: Uuid, user_id: Uuid) -> AuthResult<()> {
        let devices = self.store.delete_devices(tenant_id, user_id).await?;
        self.store.delete_recovery_codes(tenant_id, user_id).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            devices,
            "MFA disabled"
        );
        Ok(())
    }

    pub async fn issue_challenge(&self, tenant_id: Uuid, user_id: Uuid) -> AuthResult<MfaChallengeTicket> {
        let now = self.clock.now();
        let challenge = MfaChallenge::new(tenant_id, user_id, now, now + self.settings.challenge_ttl);
        self.store.insert_challenge(&challenge).await?;
        Ok(challenge.ticket())
    }

    /// Single use: the challenge is consumed whether or not the proof that follows succeeds.
    pub async fn consume_challenge(&self, tenant_id: Uuid, challenge_id: Uuid) -> AuthResult<MfaChallenge> {
        let now = self.clock.now();
        let challenge = self
            .store
            .consume_challenge(tenant_id, challenge_id, now)
            .await?
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or(AuthError::ChallengeExpired)?;
        if now >= challenge.expiry_utc {
            return Err(AuthError::ChallengeExpired);
        }
        Ok(challenge)
    }

    pub async fn purge_expired_challenges(&self, tenant_id: Uuid) -> AuthResult<u64> {
        Ok(self
            .store
            .delete_expired_challenges(tenant_id, self.clock.now())
            .await?)
    }

    async fn issue_recovery_codes(&self, tenant_id: Uuid, user_id: Uuid) -> AuthResult<Vec<String>> {
        let now = self.clock.now();
        let codes = recovery::generate_codes(self.settings.recovery_code_count);
        let records = codes
            .iter()
            .map(|code| {
                recovery::hash_code(&self.pepper, code)
                    .map(|hash| RecoveryCode::new(tenant_id, user_id, hash, now))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.store
            .replace_recovery_codes(tenant_id, user_id, &records)
            .await?;
        Ok(codes)
    }

    /// Step whose code matches within the drift window, if any.
    fn match_step(&self, device: &MfaDevice, code: &str) -> AuthResult<Option<i64>> {
        let code = code.trim();
        if !is_totp_shaped(code) {
            return Ok(None);
        }
        let secret = self
            .key
            .decrypt(
                &device.secret_ciphertext,
                device.tenant_id,
                device.user_id,
                device.device_id,
            )
            .map_err(|e| {
                tracing::error!(device_id = %device.device_id, "Failed to decrypt TOTP secret");
                AuthError::Internal(e)
            })?;
        let step_seconds = device.step_seconds.max(1);
        let totp = self.totp(secret, "device", step_seconds)?;

        let step_seconds = i64::from(step_seconds);
        let current = self.clock.now().timestamp() / step_seconds;
        let drift = i64::from(self.settings.drift_steps);

        // Every candidate is compared so timing does not depend on which step matched.
        let mut matched = None;
        for step in (current - drift)..=(current + drift) {
            if step < 0 {
                continue;
            }
            let expected = totp.generate((step * step_seconds) as u64);
            if constant_time_eq(expected.as_bytes(), code.as_bytes()) {
                matched = Some(step);
            }
        }
        Ok(matched)
    }

    fn totp(&self, secret: Vec<u8>, account_name: &str, step_seconds: i32) -> AuthResult<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS as usize,
            0,
            step_seconds as u64,
            secret,
            Some(self.settings.issuer_label.clone()),
            account_name.to_string(),
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("Invalid TOTP parameters: {:?}", e)))
    }
}

fn is_totp_shaped(code: &str) -> bool {
    code.len() == TOTP_DIGITS as usize && code.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::MemoryStore;

    fn engine(clock: ManualClock) -> MfaEngine {
        MfaEngine::new(
            Arc::new(MemoryStore::new()),
            SecretKey::new([3u8; 32]),
            Arc::new(clock),
            MfaSettings {
                issuer_label: "IAM".into(),
                drift_steps: 1,
                recovery_code_count: 4,
                challenge_ttl: Duration::minutes(5),
            },
        )
    }

    fn code_at(enrollment: &MfaEnrollment, clock: &ManualClock, offset_steps: i64) -> String {
        let secret = Secret::Encoded(enrollment.secret_base32.clone())
            .to_bytes()
            .unwrap();
        let totp = TOTP::new(Algorithm::SHA1, 6, 0, 30, secret, None, "t".into()).unwrap();
        let at = clock.now().timestamp() + offset_steps * 30;
        totp.generate(at as u64)
    }

    async fn enrolled(engine: &MfaEngine, clock: &ManualClock) -> (Uuid, Uuid, MfaEnrollment, Vec<String>) {
        let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
        let enrollment = engine.enroll(tenant, user, "alice@example.com").await.unwrap();
        let codes = engine
            .confirm(tenant, user, enrollment.device_id, &code_at(&enrollment, clock, 0))
            .await
            .unwrap();
        (tenant, user, enrollment, codes)
    }

    #[tokio::test]
    async fn enrollment_returns_secret_and_uri() {
        let engine = engine(ManualClock::default());
        let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
        let enrollment = engine.enroll(tenant, user, "alice@example.com").await.unwrap();
        assert!(enrollment.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(enrollment.provisioning_uri.contains("issuer=IAM"));
        // >= 160 bits of secret
        assert!(enrollment.secret_base32.len() >= 32);
        assert!(!engine.is_enrolled(tenant, user).await.unwrap());
    }

    #[tokio::test]
    async fn confirm_rejects_wrong_code_and_then_accepts_right_one() {
        let clock = ManualClock::default();
        let engine = engine(clock.clone());
        let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
        let enrollment = engine.enroll(tenant, user, "alice@example.com").await.unwrap();

        let wrong = if code_at(&enrollment, &clock, 0) == "000000" { "111111" } else { "000000" };
        assert!(matches!(
            engine.confirm(tenant, user, enrollment.device_id, wrong).await,
            Err(AuthError::InvalidCode)
        ));

        let codes = engine
            .confirm(tenant, user, enrollment.device_id, &code_at(&enrollment, &clock, 0))
            .await
            .unwrap();
        assert_eq!(codes.len(), 4);
        assert!(engine.is_enrolled(tenant, user).await.unwrap());
        assert!(matches!(
            engine.enroll(tenant, user, "alice@example.com").await,
            Err(AuthError::MfaAlreadyEnrolled)
        ));
    }

    #[tokio::test]
    async fn same_step_is_accepted_once() {
        let clock = ManualClock::default();
        let engine = engine(clock.clone());
        let (tenant, user, enrollment, _) = enrolled(&engine, &clock).await;

        // Logging in right after confirming, still inside the confirming step.
        clock.advance(Duration::seconds(5));
        let code = code_at(&enrollment, &clock, 0);
        assert_eq!(
            engine.verify_login(tenant, user, &code).await.unwrap(),
            MfaMethod::Totp
        );
        assert!(matches!(
            engine.verify_login(tenant, user, &code).await,
            Err(AuthError::MfaReplay)
        ));
        // An older step inside the drift window is also spent.
        assert!(matches!(
            engine.verify_login(tenant, user, &code_at(&enrollment, &clock, -1)).await,
            Err(AuthError::MfaReplay)
        ));

        clock.advance(Duration::seconds(30));
        assert!(engine
            .verify_login(tenant, user, &code_at(&enrollment, &clock, 0))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn drift_window_is_one_step_each_way() {
        let clock = ManualClock::default();
        let engine = engine(clock.clone());
        let (tenant, user, enrollment, _) = enrolled(&engine, &clock).await;
        clock.advance(Duration::minutes(5));

        assert!(matches!(
            engine.verify_login(tenant, user, &code_at(&enrollment, &clock, 3)).await,
            Err(AuthError::InvalidCode)
        ));
        assert!(engine
            .verify_login(tenant, user, &code_at(&enrollment, &clock, 1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn recovery_codes_are_single_use() {
        let clock = ManualClock::default();
        let engine = engine(clock.clone());
        let (tenant, user, _, codes) = enrolled(&engine, &clock).await;

        let code = codes[0].to_uppercase();
        assert_eq!(
            engine.verify_login(tenant, user, &code).await.unwrap(),
            MfaMethod::RecoveryCode
        );
        assert!(matches!(
            engine.verify_login(tenant, user, &code).await,
            Err(AuthError::InvalidCode)
        ));
        assert_eq!(engine.recovery_codes_remaining(tenant, user).await.unwrap(), 3);

        // Another user's codes never match.
        assert!(matches!(
            engine.verify_login(tenant, Uuid::new_v4(), &codes[1]).await,
            Err(AuthError::InvalidCode)
        ));
    }

    #[tokio::test]
    async fn regenerate_replaces_batch_and_disable_clears_everything() {
        let clock = ManualClock::default();
        let engine = engine(clock.clone());
        let (tenant, user, enrollment, old) = enrolled(&engine, &clock).await;

        clock.advance(Duration::seconds(30));
        let fresh = engine
            .regenerate_recovery_codes(tenant, user, &code_at(&enrollment, &clock, 0))
            .await
            .unwrap();
        assert_eq!(fresh.len(), 4);
        assert!(matches!(
            engine.verify_login(tenant, user, &old[0]).await,
            Err(AuthError::InvalidCode)
        ));

        engine.disable(tenant, user).await.unwrap();
        assert!(!engine.is_enrolled(tenant, user).await.unwrap());
        assert_eq!(engine.recovery_codes_remaining(tenant, user).await.unwrap(), 0);
        assert!(matches!(
            engine.verify_totp(tenant, user, "123456").await,
            Err(AuthError::MfaNotEnrolled)
        ));
    }

    #[tokio::test]
    async fn challenges_are_single_use_and_expire() {
        let clock = ManualClock::default();
        let engine = engine(clock.clone());
        let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());

        let ticket = engine.issue_challenge(tenant, user).await.unwrap();
        assert_eq!(ticket.expiry_utc, clock.now() + Duration::minutes(5));
        assert!(matches!(
            engine.consume_challenge(Uuid::new_v4(), ticket.challenge_id).await,
            Err(AuthError::ChallengeExpired)
        ));
        let challenge = engine.consume_challenge(tenant, ticket.challenge_id).await.unwrap();
        assert_eq!(challenge.user_id, user);
        assert!(matches!(
            engine.consume_challenge(tenant, ticket.challenge_id).await,
            Err(AuthError::ChallengeExpired)
        ));

        let late = engine.issue_challenge(tenant, user).await.unwrap();
        clock.advance(Duration::minutes(5));
        assert!(matches!(
            engine.consume_challenge(tenant, late.challenge_id).await,
            Err(AuthError::ChallengeExpired)
        ));
    }
}
