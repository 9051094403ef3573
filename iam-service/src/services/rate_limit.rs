//! Per-token request budgets for API tokens.

use dashmap::DashMap;
use governor::{clock::Clock, clock::DefaultClock, DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::services::error::{AuthError, AuthResult};
use crate::services::metrics;

struct Bucket {
    limiter: DefaultDirectRateLimiter,
    rps: u32,
    last_used: Instant,
}

impl Bucket {
    fn new(rps: u32, now: Instant) -> Self {
        let rate = NonZeroU32::new(rps.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(rate)),
            rps,
            last_used: now,
        }
    }
}

/// One token bucket per API token id (refill = rps, burst = max(rps, 1)).
///
/// Buckets live in a sharded map so checks on different tokens do not contend.
/// Idle buckets are evicted, with their denial counts, and come back full on
/// next use.
#[derive(Clone)]
pub struct TokenRateLimiter {
    buckets: Arc<DashMap<Uuid, Bucket>>,
    denials: Arc<DashMap<Uuid, u64>>,
    total_denials: Arc<AtomicU64>,
    idle_ttl: Duration,
    clock: DefaultClock,
}

impl TokenRateLimiter {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            denials: Arc::new(DashMap::new()),
            total_denials: Arc::new(AtomicU64::new(0)),
            idle_ttl,
            clock: DefaultClock::default(),
        }
    }

    pub fn check(&self, token_id: Uuid, rps: u32) -> AuthResult<()> {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(token_id)
            .or_insert_with(|| Bucket::new(rps, now));
        if bucket.rps != rps {
            *bucket = Bucket::new(rps, now);
        }
        bucket.last_used = now;
        let decision = bucket.limiter.check();
        drop(bucket);

        match decision {
            Ok(()) => Ok(()),
            Err(negative) => {
                let wait = negative.wait_time_from(self.clock.now());

                *self.denials.entry(token_id).or_insert(0) += 1;
                self.total_denials.fetch_add(1, Ordering::Relaxed);
                metrics::record_rate_limited();
                tracing::warn!(token_id = %token_id, rps, "API token rate limit exceeded");

                let retry_after_secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                Err(AuthError::RateLimited {
                    retry_after_secs: retry_after_secs.max(1),
                })
            }
        }
    }

    /// Drops buckets idle longer than the configured TTL. Returns how many were dropped.
    pub fn evict_idle(&self) -> usize {
        let before = self.buckets.len();
        let ttl = self.idle_ttl;
        self.buckets.retain(|_, bucket| bucket.last_used.elapsed() < ttl);
        self.denials.retain(|token_id, _| self.buckets.contains_key(token_id));
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Idle API token buckets evicted");
        }
        evicted
    }

    pub fn forget(&self, token_id: Uuid) {
        self.buckets.remove(&token_id);
        self.denials.remove(&token_id);
    }

    pub fn denials_for(&self, token_id: Uuid) -> u64 {
        self.denials.get(&token_id).map(|d| *d).unwrap_or(0)
    }

    pub fn total_denials(&self) -> u64 {
        self.total_denials.load(Ordering::Relaxed)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_denial_with_retry_hint() {
        let limiter = TokenRateLimiter::new(Duration::from_secs(600));
        let token = Uuid::new_v4();
        assert!(limiter.check(token, 2).is_ok());
        assert!(limiter.check(token, 2).is_ok());
        match limiter.check(token, 2) {
            Err(AuthError::RateLimited { retry_after_secs }) => assert!(retry_after_secs >= 1),
            other => panic!("expected rate limit, got {:?}", other),
        }
        assert_eq!(limiter.denials_for(token), 1);
        assert_eq!(limiter.total_denials(), 1);
    }

    #[test]
    fn buckets_are_independent_per_token() {
        let limiter = TokenRateLimiter::new(Duration::from_secs(600));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(limiter.check(a, 1).is_ok());
        assert!(limiter.check(a, 1).is_err());
        assert!(limiter.check(b, 1).is_ok());
        assert_eq!(limiter.denials_for(b), 0);
    }

    #[test]
    fn idle_buckets_are_evicted_and_return_full() {
        let limiter = TokenRateLimiter::new(Duration::ZERO);
        let token = Uuid::new_v4();
        assert!(limiter.check(token, 1).is_ok());
        assert!(limiter.check(token, 1).is_err());
        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.bucket_count(), 0);
        assert_eq!(limiter.denials_for(token), 0);
        assert!(limiter.check(token, 1).is_ok());
    }

    #[test]
    fn forgetting_a_token_drops_its_denials() {
        let limiter = TokenRateLimiter::new(Duration::from_secs(600));
        let (gone, kept) = (Uuid::new_v4(), Uuid::new_v4());
        for token in [gone, kept] {
            assert!(limiter.check(token, 1).is_ok());
            assert!(limiter.check(token, 1).is_err());
        }

        limiter.forget(gone);
        assert_eq!(limiter.denials_for(gone), 0);
        assert_eq!(limiter.denials_for(kept), 1);
        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(limiter.total_denials(), 2);
    }

    #[test]
    fn zero_rps_still_allows_one_per_second() {
        let limiter = TokenRateLimiter::new(Duration::from_secs(600));
        let token = Uuid::new_v4();
        assert!(limiter.check(token, 0).is_ok());
        assert!(limiter.check(token, 0).is_err());
    }
}
