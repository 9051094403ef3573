//! Request deadlines.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::services::error::{AuthError, AuthResult};

/// Point in time after which an operation must give up with `DeadlineExceeded`.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Fails fast before starting work that would mutate state.
    pub fn check(&self) -> AuthResult<()> {
        if self.is_expired() {
            Err(AuthError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Runs `fut` until the deadline.
    pub async fn run<F, T>(&self, fut: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        tokio::time::timeout_at(self.0, fut)
            .await
            .map_err(|_| AuthError::DeadlineExceeded)?
    }
}
