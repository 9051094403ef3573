//! API token service: long-lived bearer secrets with scopes, per-token
//! rate limits and batched usage accounting.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::models::permission::{parse_permissions, Permission};
use crate::models::{ApiToken, ApiTokenCreated, ApiTokenInfo, ApiTokenUsage, User};
use crate::services::error::{AuthError, AuthResult};
use crate::services::rate_limit::TokenRateLimiter;
use crate::store::{ApiTokenStore, TenantStore, UserStore};
use crate::utils::crypto::{constant_time_eq, random_secret, sha256_hex};

const SECRET_BYTES: usize = 32;
/// base64url length of 32 bytes without padding.
const SECRET_LEN: usize = 43;
pub const PREFIX_LEN: usize = 8;
const MAX_NAME_LEN: usize = 100;
const MAX_RPS: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct ApiTokenSettings {
    pub default_rps: u32,
}

/// Options accepted at issuance.
#[derive(Debug, Clone, Default)]
pub struct IssueOptions {
    pub expires_in: Option<Duration>,
    pub rate_limit_rps: Option<u32>,
}

/// A verified API token together with its active owner.
#[derive(Debug, Clone)]
pub struct VerifiedApiToken {
    pub token: ApiToken,
    pub owner: User,
}

#[derive(Clone)]
pub struct ApiTokenService {
    store: Arc<dyn ApiTokenStore>,
    users: Arc<dyn UserStore>,
    tenants: Arc<dyn TenantStore>,
    limiter: TokenRateLimiter,
    pending_usage: Arc<Mutex<HashMap<Uuid, ApiTokenUsage>>>,
    clock: SharedClock,
    settings: ApiTokenSettings,
}

impl ApiTokenService {
    pub fn new(
        store: Arc<dyn ApiTokenStore>,
        users: Arc<dyn UserStore>,
        tenants: Arc<dyn TenantStore>,
        limiter: TokenRateLimiter,
        clock: SharedClock,
        settings: ApiTokenSettings,
    ) -> Self {
        Self {
            store,
            users,
            tenants,
            limiter,
            pending_usage: Arc::new(Mutex::new(HashMap::new())),
            clock,
            settings,
        }
    }

    pub fn limiter(&self) -> &TokenRateLimiter {
        &self.limiter
    }

    /// Issues a token. Requested scopes must be covered by `owner_permissions`.
    /// The secret appears in the result and nowhere else.
    pub async fn issue(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        display_name: &str,
        scopes: Vec<String>,
        owner_permissions: &[String],
        options: IssueOptions,
    ) -> AuthResult<ApiTokenCreated> {
        let display_name = display_name.trim();
        if display_name.is_empty() || display_name.chars().count() > MAX_NAME_LEN {
            return Err(AuthError::InvalidInput(format!(
                "token name must be 1-{} characters",
                MAX_NAME_LEN
            )));
        }
        let scopes = self.check_scopes(scopes, owner_permissions)?;

        let rps = options.rate_limit_rps.unwrap_or(self.settings.default_rps);
        if rps == 0 || rps > MAX_RPS {
            return Err(AuthError::InvalidInput(format!(
                "rate_limit_rps must be between 1 and {}",
                MAX_RPS
            )));
        }
        let now = self.clock.now();
        let expiry_utc = match options.expires_in {
            Some(ttl) if ttl <= Duration::zero() => {
                return Err(AuthError::InvalidInput("expires_in must be positive".into()))
            }
            Some(ttl) => Some(now + ttl),
            None => None,
        };

        let secret = random_secret(SECRET_BYTES);
        let token = ApiToken::new(
            tenant_id,
            user_id,
            display_name.to_string(),
            secret[..PREFIX_LEN].to_string(),
            sha256_hex(secret.as_bytes()),
            scopes,
            rps as i32,
            now,
            expiry_utc,
        );
        self.store.insert_api_token(&token).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            token_id = %token.token_id,
            token_prefix = %token.token_prefix,
            scopes = ?token.scopes,
            "API token issued"
        );
        Ok(ApiTokenCreated {
            token: token.info(),
            secret,
        })
    }

    /// Resolves a presented secret to its token and owner, charging the
    /// token's rate budget and recording usage.
    pub async fn verify(
        &self,
        secret: &str,
        tenant_hint: Option<Uuid>,
        ip: Option<&str>,
    ) -> AuthResult<VerifiedApiToken> {
        let secret = secret.trim();
        if !is_secret_shaped(secret) {
            return Err(AuthError::Unauthenticated);
        }
        let presented = sha256_hex(secret.as_bytes());
        let candidates = self
            .store
            .find_api_tokens_by_prefix(tenant_hint, &secret[..PREFIX_LEN])
            .await?;

        // Compare against every candidate; no early exit.
        let mut matched: Option<ApiToken> = None;
        for candidate in candidates {
            let hit = candidate
                .token_hash
                .as_deref()
                .is_some_and(|stored| constant_time_eq(presented.as_bytes(), stored.as_bytes()));
            if hit {
                matched = Some(candidate);
            }
        }
        let token = matched.ok_or(AuthError::Unauthenticated)?;
        if tenant_hint.is_some_and(|hint| hint != token.tenant_id) {
            return Err(AuthError::TenantMismatch("api token"));
        }

        let now = self.clock.now();
        if token.is_revoked() {
            tracing::info!(token_id = %token.token_id, "Revoked API token presented");
            return Err(AuthError::Unauthenticated);
        }
        if token.is_expired(now) {
            return Err(AuthError::TokenExpired);
        }

        let owner = self
            .users
            .find_user_by_id(token.tenant_id, token.user_id)
            .await?
            .filter(|u| u.tenant_id == token.tenant_id && u.can_authenticate())
            .ok_or_else(|| {
                tracing::info!(
                    token_id = %token.token_id,
                    user_id = %token.user_id,
                    "API token owner is inactive"
                );
                AuthError::Unauthenticated
            })?;

        self.limiter
            .check(token.token_id, token.rate_limit_rps.max(0) as u32)?;
        self.record_usage(&token, now, ip);

        Ok(VerifiedApiToken { token, owner })
    }

    pub async fn revoke(&self, tenant_id: Uuid, user_id: Uuid, token_id: Uuid) -> AuthResult<()> {
        let revoked = self
            .store
            .revoke_api_token(tenant_id, user_id, token_id, self.clock.now())
            .await?;
        if !revoked {
            return Err(AuthError::NotFound("api token"));
        }
        self.limiter.forget(token_id);
        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            token_id = %token_id,
            "API token revoked"
        );
        Ok(())
    }

    /// Public views, newest first. Pending usage is folded in.
    pub async fn list(&self, tenant_id: Uuid, user_id: Uuid) -> AuthResult<Vec<ApiTokenInfo>> {
        let tokens = self.store.list_user_api_tokens(tenant_id, user_id).await?;
        let pending = self.pending_snapshot();
        Ok(tokens
            .iter()
            .filter(|t| t.tenant_id == tenant_id)
            .map(|t| {
                let mut info = t.info();
                if let Some(usage) = pending.get(&t.token_id) {
                    info.use_count += usage.uses;
                    if info.last_used_utc.is_none_or(|last| last <= usage.last_used_utc) {
                        info.last_used_utc = Some(usage.last_used_utc);
                        info.last_used_ip = usage.last_used_ip.clone();
                    }
                }
                info
            })
            .collect())
    }

    /// Writes accumulated usage deltas. Deltas are merged back if the write fails.
    pub async fn flush_usage(&self) -> AuthResult<usize> {
        let batch: Vec<ApiTokenUsage> = {
            let mut pending = self.pending_usage.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().map(|(_, usage)| usage).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.store.apply_api_token_usage(&batch).await {
            let mut pending = self.pending_usage.lock().unwrap_or_else(|e| e.into_inner());
            for usage in batch {
                merge_usage(&mut pending, usage);
            }
            return Err(e.into());
        }
        tracing::debug!(tokens = batch.len(), "API token usage flushed");
        Ok(batch.len())
    }

    /// Drops hashes of expired tokens in every tenant. Rows stay for audit.
    pub async fn purge_expired(&self) -> AuthResult<u64> {
        let now = self.clock.now();
        let mut purged = 0;
        for tenant_id in self.tenants.list_tenant_ids().await? {
            purged += self
                .store
                .purge_expired_api_token_hashes(tenant_id, now)
                .await?;
        }
        if purged > 0 {
            tracing::info!(count = purged, "Expired API token hashes purged");
        }
        Ok(purged)
    }

    fn check_scopes(&self, scopes: Vec<String>, owner_permissions: &[String]) -> AuthResult<Vec<String>> {
        if scopes.is_empty() {
            return Err(AuthError::InvalidScopes("at least one scope is required".into()));
        }
        let requested =
            parse_permissions(&scopes).map_err(|e| AuthError::InvalidScopes(e.to_string()))?;
        let granted: Vec<Permission> = owner_permissions
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect();

        let mut normalized = Vec::with_capacity(requested.len());
        for scope in requested {
            if !granted.iter().any(|g| g.covers(&scope)) {
                return Err(AuthError::InvalidScopes(format!(
                    "scope '{}' exceeds the owner's permissions",
                    scope
                )));
            }
            let scope = scope.to_string();
            if !normalized.contains(&scope) {
                normalized.push(scope);
            }
        }
        normalized.sort();
        Ok(normalized)
    }

    fn record_usage(&self, token: &ApiToken, now: DateTime<Utc>, ip: Option<&str>) {
        let mut pending = self.pending_usage.lock().unwrap_or_else(|e| e.into_inner());
        merge_usage(
            &mut pending,
            ApiTokenUsage {
                tenant_id: token.tenant_id,
                token_id: token.token_id,
                uses: 1,
                last_used_utc: now,
                last_used_ip: ip.map(str::to_string),
            },
        );
    }

    fn pending_snapshot(&self) -> HashMap<Uuid, ApiTokenUsage> {
        self.pending_usage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn merge_usage(pending: &mut HashMap<Uuid, ApiTokenUsage>, usage: ApiTokenUsage) {
    match pending.get_mut(&usage.token_id) {
        Some(existing) => {
            existing.uses += usage.uses;
            if usage.last_used_utc >= existing.last_used_utc {
                existing.last_used_utc = usage.last_used_utc;
                existing.last_used_ip = usage.last_used_ip;
            }
        }
        None => {
            pending.insert(usage.token_id, usage);
        }
    }
}

fn is_secret_shaped(secret: &str) -> bool {
    secret.len() == SECRET_LEN
        && secret
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
