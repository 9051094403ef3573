//! Password hasher: policy, argon2id hashing on a bounded worker pool.

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::services::error::{AuthError, AuthResult};
use crate::utils::{self, Deadline, HashParams, Password, PasswordHashString};

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_bytes: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_bytes: 1024,
        }
    }
}

/// Hashing and verification run on the blocking pool, at most `workers` at a
/// time. Callers queue for a permit until their deadline.
#[derive(Clone)]
pub struct PasswordService {
    params: HashParams,
    policy: PasswordPolicy,
    permits: Arc<Semaphore>,
    /// Verified against when the user does not exist, so both paths cost one hash.
    dummy_hash: PasswordHashString,
}

impl PasswordService {
    pub fn new(params: HashParams, policy: PasswordPolicy, workers: usize) -> AuthResult<Self> {
        let dummy_hash = utils::hash_password(
            &Password::new("dummy-password-for-timing-equalization".to_string()),
            &params,
        )?;
        Ok(Self {
            params,
            policy,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            dummy_hash,
        })
    }

    pub fn params(&self) -> &HashParams {
        &self.params
    }

    /// Policy checks applied before any hashing work.
    pub fn check_policy(&self, password: &Password) -> AuthResult<()> {
        let raw = password.expose();
        if raw.is_empty() {
            return Err(AuthError::WeakPassword("password must not be empty".into()));
        }
        if raw.len() > self.policy.max_bytes {
            return Err(AuthError::WeakPassword(format!(
                "password must be at most {} bytes",
                self.policy.max_bytes
            )));
        }
        if raw.chars().count() < self.policy.min_length {
            return Err(AuthError::WeakPassword(format!(
                "password must be at least {} characters",
                self.policy.min_length
            )));
        }
        Ok(())
    }

    pub async fn hash(&self, password: &Password, deadline: &Deadline) -> AuthResult<PasswordHashString> {
        self.check_policy(password)?;
        let password = password.clone();
        let params = self.params;
        self.run_blocking(deadline, move || {
            utils::hash_password(&password, &params).map_err(AuthError::Internal)
        })
        .await
    }

    /// Constant-time verification against a stored record.
    pub async fn verify(
        &self,
        password: &Password,
        record: &PasswordHashString,
        deadline: &Deadline,
    ) -> AuthResult<bool> {
        // Oversized input never reaches argon2.
        if password.expose().len() > self.policy.max_bytes {
            return Ok(false);
        }
        let password = password.clone();
        let record = record.clone();
        self.run_blocking(deadline, move || {
            utils::verify_password(&password, &record).map_err(AuthError::Internal)
        })
        .await
    }

    /// Burns one verification so unknown-user lookups cost the same as real ones.
    pub async fn verify_dummy(&self, password: &Password, deadline: &Deadline) -> AuthResult<()> {
        let record = self.dummy_hash.clone();
        self.verify(password, &record, deadline).await.map(|_| ())
    }

    pub fn needs_rehash(&self, record: &PasswordHashString) -> bool {
        utils::needs_rehash(record, &self.params)
    }

    async fn run_blocking<T, F>(&self, deadline: &Deadline, work: F) -> AuthResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> AuthResult<T> + Send + 'static,
    {
        let permit = deadline
            .run(async {
                self.permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| AuthError::Internal(anyhow::anyhow!("hash pool closed: {}", e)))
            })
            .await?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        });
        // The hash finishes even if the caller stops waiting; the permit is held until then.
        deadline
            .run(async {
                handle
                    .await
                    .map_err(|e| AuthError::Internal(anyhow::anyhow!("hash task failed: {}", e)))?
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn service(workers: usize) -> PasswordService {
        PasswordService::new(
            HashParams {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            PasswordPolicy::default(),
            workers,
        )
        .unwrap()
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let svc = service(2);
        let pw = Password::new("Passw0rd!Good".into());
        let record = svc.hash(&pw, &deadline()).await.unwrap();
        assert!(svc.verify(&pw, &record, &deadline()).await.unwrap());
        assert!(!svc
            .verify(&Password::new("Passw0rd!Bad".into()), &record, &deadline())
            .await
            .unwrap());
        assert!(!svc.needs_rehash(&record));
    }

    #[tokio::test]
    async fn policy_rejects_before_hashing() {
        let svc = service(1);
        for bad in ["", "short", &"x".repeat(1025)] {
            let err = svc.hash(&Password::new(bad.to_string()), &deadline()).await.unwrap_err();
            assert!(matches!(err, AuthError::WeakPassword(_)));
        }
    }

    #[tokio::test]
    async fn queued_hash_respects_deadline() {
        let svc = service(1);
        let _held = svc.permits.clone().acquire_owned().await.unwrap();
        let expired = Deadline::after(Duration::from_millis(20));
        let err = svc
            .hash(&Password::new("Passw0rd!Good".into()), &expired)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn dummy_verification_succeeds_quietly() {
        let svc = service(1);
        svc.verify_dummy(&Password::new("whatever-input".into()), &deadline())
            .await
            .unwrap();
    }
}
