//! Authentication orchestrator: the user-facing flows over every component.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::context::RequestMeta;
use crate::models::{
    ApiTokenCreated, ApiTokenInfo, MfaEnrollment, MfaMethod, Principal, RefreshTokenRecord,
    RevocationReason, SessionInfo, User, UserResponse, ROLE_ADMIN, ROLE_MEMBER,
};
use crate::services::api_token::{ApiTokenService, IssueOptions};
use crate::services::credentials::{CredentialStore, FailureOutcome};
use crate::services::error::{AuthError, AuthResult};
use crate::services::jwt::{TokenPair, TokenService};
use crate::services::metrics;
use crate::services::mfa::MfaEngine;
use crate::services::password::PasswordService;
use crate::services::rbac::RbacEvaluator;
use crate::services::session::SessionRegistry;
use crate::services::tenant::TenantService;
use crate::store::RefreshTokenStore;
use crate::utils::validation::username_from_email;
use crate::utils::{normalize_email, normalize_username, Password, PasswordHashString};

const MAX_DISPLAY_NAME_LEN: usize = 100;

/// Registration input. The password is checked against policy before hashing.
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub tenant_id: Uuid,
    pub email: String,
    pub password: Password,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

/// Fields a user may change on their own profile. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Clone)]
pub struct AuthService {
    credentials: CredentialStore,
    passwords: PasswordService,
    tokens: TokenService,
    sessions: SessionRegistry,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    mfa: MfaEngine,
    rbac: RbacEvaluator,
    api_tokens: ApiTokenService,
    tenants: TenantService,
    clock: SharedClock,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credentials: CredentialStore,
        passwords: PasswordService,
        tokens: TokenService,
        sessions: SessionRegistry,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        mfa: MfaEngine,
        rbac: RbacEvaluator,
        api_tokens: ApiTokenService,
        tenants: TenantService,
        clock: SharedClock,
    ) -> Self {
        Self {
            credentials,
            passwords,
            tokens,
            sessions,
            refresh_tokens,
            mfa,
            rbac,
            api_tokens,
            tenants,
            clock,
        }
    }

    // ------------------------------------------------------------------
    // Registration and login
    // ------------------------------------------------------------------

    /// Creates a user bound to `member`. The first user of a tenant also gets `admin`.
    pub async fn register(&self, input: RegisterInput, meta: &RequestMeta) -> AuthResult<UserResponse> {
        meta.deadline.check()?;
        let tenant = self.tenants.get_tenant(input.tenant_id).await?;
        if !tenant.is_active() {
            return Err(AuthError::TenantSuspended);
        }

        let email = normalize_email(&input.email)
            .ok_or_else(|| AuthError::InvalidInput("invalid email address".into()))?;
        let (username, derived) = match input.username.as_deref() {
            Some(raw) => (
                normalize_username(raw).ok_or_else(|| {
                    AuthError::InvalidInput(
                        "username must be 3-64 characters of a-z, 0-9, '_', '.', '-'".into(),
                    )
                })?,
                false,
            ),
            None => (username_from_email(&email), true),
        };
        let display_name = clean_display_name(input.display_name)?;

        self.passwords.check_policy(&input.password)?;
        let hash = self.passwords.hash(&input.password, &meta.deadline).await?;
        meta.deadline.check()?;

        let first_user = self.credentials.count(tenant.tenant_id).await? == 0;
        let mut user = User::new(
            tenant.tenant_id,
            email,
            username,
            display_name,
            hash.into_string(),
            self.clock.now(),
        );
        match self.credentials.create(&user).await {
            // A username derived from the email may collide; retry once with a suffix.
            Err(AuthError::UsernameInUse) if derived => {
                let base: String = user.username.chars().take(57).collect();
                let suffix = Uuid::new_v4().simple().to_string();
                user.username = format!("{}-{}", base, &suffix[..6]);
                self.credentials.create(&user).await?;
            }
            other => other?,
        }

        self.rbac
            .assign_role_by_name(tenant.tenant_id, user.user_id, ROLE_MEMBER)
            .await?;
        if first_user {
            self.rbac
                .assign_role_by_name(tenant.tenant_id, user.user_id, ROLE_ADMIN)
                .await?;
        }

        tracing::info!(
            tenant_id = %tenant.tenant_id,
            user_id = %user.user_id,
            first_user,
            "User registered"
        );
        Ok(user.sanitized())
    }

    /// Password login. Returns tokens, or `MfaRequired` with a challenge when
    /// the user has a confirmed MFA device.
    ///
    /// Unknown user, wrong password, locked and inactive accounts all cost one
    /// hash verification and surface the same public error.
    pub async fn login(
        &self,
        tenant_id: Uuid,
        email: &str,
        password: &Password,
        meta: &RequestMeta,
    ) -> AuthResult<TokenPair> {
        meta.deadline.check()?;

        if let Err(e) = self.tenants.require_active(tenant_id).await {
            self.passwords.verify_dummy(password, &meta.deadline).await?;
            metrics::record_login("tenant_inactive");
            return Err(e);
        }

        let Some(user) = self.credentials.lookup_by_email(tenant_id, email).await? else {
            self.passwords.verify_dummy(password, &meta.deadline).await?;
            metrics::record_login("unknown_user");
            tracing::info!(tenant_id = %tenant_id, "Login failed: unknown user");
            return Err(AuthError::InvalidCredentials);
        };

        let now = self.clock.now();
        if !user.can_authenticate() {
            self.passwords.verify_dummy(password, &meta.deadline).await?;
            metrics::record_login("inactive");
            tracing::info!(tenant_id = %tenant_id, user_id = %user.user_id, "Login failed: user inactive");
            return Err(AuthError::UserInactive);
        }
        if user.is_locked(now) {
            self.passwords.verify_dummy(password, &meta.deadline).await?;
            metrics::record_login("locked");
            tracing::warn!(
                tenant_id = %tenant_id,
                user_id = %user.user_id,
                lockout_until = ?user.lockout_until_utc,
                "Login rejected: account locked"
            );
            return Err(AuthError::AccountLocked);
        }

        let record = PasswordHashString::new(user.password_hash.clone());
        if !self.passwords.verify(password, &record, &meta.deadline).await? {
            let outcome = self
                .credentials
                .record_failed_login(tenant_id, user.user_id, now)
                .await?;
            metrics::record_login("invalid_password");
            tracing::info!(
                tenant_id = %tenant_id,
                user_id = %user.user_id,
                outcome = ?outcome,
                "Login failed: wrong password"
            );
            return Err(AuthError::InvalidCredentials);
        }

        if self.passwords.needs_rehash(&record) {
            self.rehash(&user, password, meta).await;
        }

        // Failures are only cleared once both factors have passed.
        if self.mfa.is_enrolled(tenant_id, user.user_id).await? {
            let ticket = self.mfa.issue_challenge(tenant_id, user.user_id).await?;
            metrics::record_login("mfa_required");
            tracing::info!(
                tenant_id = %tenant_id,
                user_id = %user.user_id,
                challenge_id = %ticket.challenge_id,
                "Password accepted, awaiting second factor"
            );
            return Err(AuthError::MfaRequired(ticket));
        }

        if user.failed_login_count > 0 || user.lockout_until_utc.is_some() {
            self.credentials.reset_failures(tenant_id, user.user_id).await?;
        }
        let pair = self.start_session(tenant_id, user.user_id, meta).await?;
        metrics::record_login("success");
        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user.user_id,
            session_id = %pair.session_id,
            "User logged in"
        );
        Ok(pair)
    }

    /// Completes a login with a TOTP or recovery code. The challenge is spent
    /// even when the code is wrong.
    pub async fn verify_mfa(
        &self,
        tenant_id: Uuid,
        challenge_id: Uuid,
        code: &str,
        meta: &RequestMeta,
    ) -> AuthResult<TokenPair> {
        meta.deadline.check()?;
        self.tenants.require_active(tenant_id).await?;

        let challenge = self.mfa.consume_challenge(tenant_id, challenge_id).await?;
        let user = self
            .credentials
            .lookup_by_id(tenant_id, challenge.user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        let now = self.clock.now();
        if !user.can_authenticate() {
            return Err(AuthError::UserInactive);
        }
        if user.is_locked(now) {
            return Err(AuthError::AccountLocked);
        }

        let method = match self.mfa.verify_login(tenant_id, user.user_id, code).await {
            Ok(method) => method,
            Err(e @ (AuthError::InvalidCode | AuthError::MfaReplay)) => {
                let outcome = self
                    .credentials
                    .record_failed_login(tenant_id, user.user_id, now)
                    .await?;
                metrics::record_login("mfa_failed");
                tracing::info!(
                    tenant_id = %tenant_id,
                    user_id = %user.user_id,
                    outcome = ?outcome,
                    error = %e,
                    "Second factor rejected"
                );
                if let FailureOutcome::Locked(_) = outcome {
                    return Err(AuthError::AccountLocked);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if user.failed_login_count > 0 || user.lockout_until_utc.is_some() {
            self.credentials.reset_failures(tenant_id, user.user_id).await?;
        }
        let pair = self.start_session(tenant_id, user.user_id, meta).await?;
        metrics::record_login("success");
        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user.user_id,
            session_id = %pair.session_id,
            method = ?method,
            "User logged in with second factor"
        );
        if method == MfaMethod::RecoveryCode {
            tracing::warn!(
                tenant_id = %tenant_id,
                user_id = %user.user_id,
                "Login used a recovery code"
            );
        }
        Ok(pair)
    }

    /// Rotates a refresh token. A token presented twice revokes its session.
    pub async fn refresh(&self, refresh_token: &str, meta: &RequestMeta) -> AuthResult<TokenPair> {
        meta.deadline.check()?;
        let presented = self.tokens.parse_refresh(refresh_token)?;
        let tenant_id = presented.tenant_id;
        self.tenants.require_active(tenant_id).await?;

        let record = self
            .refresh_tokens
            .get_refresh_token(tenant_id, presented.token_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        if record.tenant_id != tenant_id {
            return Err(AuthError::TenantMismatch("refresh_token"));
        }
        if !presented.matches(&record.token_hash) {
            tracing::info!(
                tenant_id = %tenant_id,
                token_id = %record.token_id,
                "Refresh token secret mismatch"
            );
            return Err(AuthError::Unauthenticated);
        }

        if record.is_consumed() {
            return Err(self.handle_reuse(&record).await);
        }
        let now = self.clock.now();
        if record.is_expired(now) {
            return Err(AuthError::TokenExpired);
        }

        let session = self
            .sessions
            .get(tenant_id, record.session_id)
            .await?
            .filter(|s| s.user_id == record.user_id)
            .ok_or(AuthError::SessionRevoked)?;
        if !session.is_live(now) {
            // A concurrent presentation of this token already tripped reuse detection.
            let reason = RevocationReason::RefreshReuse.as_str();
            if session.revocation_reason_code.as_deref() == Some(reason) {
                return Err(AuthError::RefreshReused);
            }
            return Err(AuthError::SessionRevoked);
        }

        meta.deadline.check()?;
        if !self
            .refresh_tokens
            .consume_refresh_token(tenant_id, record.token_id, now)
            .await?
        {
            // Lost the race to a concurrent refresh of the same token.
            return Err(self.handle_reuse(&record).await);
        }

        let user = self
            .credentials
            .lookup_by_id(tenant_id, record.user_id)
            .await?
            .filter(User::can_authenticate)
            .ok_or(AuthError::SessionRevoked)?;

        let pair = self
            .mint_pair(
                tenant_id,
                user.user_id,
                session.session_id,
                record.chain_id,
                session.expiry_utc,
            )
            .await?;
        if let Err(e) = self.sessions.touch(tenant_id, session.session_id).await {
            tracing::warn!(session_id = %session.session_id, error = %e, "Failed to touch session");
        }
        tracing::debug!(
            tenant_id = %tenant_id,
            session_id = %session.session_id,
            chain_id = %record.chain_id,
            "Refresh token rotated"
        );
        Ok(pair)
    }

    /// Revokes the caller's session.
    pub async fn logout(&self, principal: &Principal, meta: &RequestMeta) -> AuthResult<()> {
        meta.deadline.check()?;
        let session_id = require_session(principal)?;
        self.sessions
            .revoke(principal.tenant_id, session_id, RevocationReason::UserLogout)
            .await?;
        tracing::info!(
            tenant_id = %principal.tenant_id,
            user_id = %principal.user_id,
            session_id = %session_id,
            "User logged out"
        );
        Ok(())
    }

    /// Replaces the password and revokes every session of the user. Returns
    /// how many sessions were revoked.
    pub async fn change_password(
        &self,
        principal: &Principal,
        current: &Password,
        new: &Password,
        meta: &RequestMeta,
    ) -> AuthResult<usize> {
        meta.deadline.check()?;
        require_session(principal)?;
        let mut user = self.current_user(principal).await?;

        self.verify_current_password(&user, current, meta).await?;
        self.passwords.check_policy(new)?;
        let hash = self.passwords.hash(new, &meta.deadline).await?;
        meta.deadline.check()?;

        user.password_hash = hash.into_string();
        user.updated_utc = self.clock.now();
        self.credentials.update(&user).await?;

        let revoked = self
            .sessions
            .revoke_all_for_user(
                principal.tenant_id,
                principal.user_id,
                None,
                RevocationReason::PasswordChanged,
            )
            .await?;
        tracing::info!(
            tenant_id = %principal.tenant_id,
            user_id = %principal.user_id,
            sessions_revoked = revoked.len(),
            "Password changed"
        );
        Ok(revoked.len())
    }

    // ------------------------------------------------------------------
    // MFA
    // ------------------------------------------------------------------

    pub async fn enroll_mfa(&self, principal: &Principal, meta: &RequestMeta) -> AuthResult<MfaEnrollment> {
        meta.deadline.check()?;
        require_session(principal)?;
        let user = self.current_user(principal).await?;
        self.mfa
            .enroll(principal.tenant_id, principal.user_id, &user.email)
            .await
    }

    /// Confirms the pending device and marks MFA as required for the user.
    /// Returns the plaintext recovery codes.
    pub async fn confirm_mfa(
        &self,
        principal: &Principal,
        device_id: Uuid,
        code: &str,
        meta: &RequestMeta,
    ) -> AuthResult<Vec<String>> {
        meta.deadline.check()?;
        require_session(principal)?;
        let codes = self
            .mfa
            .confirm(principal.tenant_id, principal.user_id, device_id, code)
            .await?;

        let mut user = self.current_user(principal).await?;
        user.mfa_required = true;
        user.updated_utc = self.clock.now();
        self.credentials.update(&user).await?;
        Ok(codes)
    }

    pub async fn disable_mfa(
        &self,
        principal: &Principal,
        current_password: &Password,
        meta: &RequestMeta,
    ) -> AuthResult<()> {
        meta.deadline.check()?;
        require_session(principal)?;
        let mut user = self.current_user(principal).await?;
        self.verify_current_password(&user, current_password, meta).await?;

        if !self.mfa.is_enrolled(principal.tenant_id, principal.user_id).await? {
            return Err(AuthError::MfaNotEnrolled);
        }
        self.mfa.disable(principal.tenant_id, principal.user_id).await?;

        user.mfa_required = false;
        user.updated_utc = self.clock.now();
        self.credentials.update(&user).await
    }

    pub async fn regenerate_recovery_codes(
        &self,
        principal: &Principal,
        code: &str,
        meta: &RequestMeta,
    ) -> AuthResult<Vec<String>> {
        meta.deadline.check()?;
        require_session(principal)?;
        self.mfa
            .regenerate_recovery_codes(principal.tenant_id, principal.user_id, code)
            .await
    }

    pub async fn recovery_codes_remaining(&self, principal: &Principal) -> AuthResult<usize> {
        self.mfa
            .recovery_codes_remaining(principal.tenant_id, principal.user_id)
            .await
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub async fn list_sessions(&self, principal: &Principal) -> AuthResult<Vec<SessionInfo>> {
        self.sessions
            .list_for_user(principal.tenant_id, principal.user_id, principal.session_id)
            .await
    }

    /// Revokes one of the caller's own sessions.
    pub async fn revoke_session(
        &self,
        principal: &Principal,
        session_id: Uuid,
        meta: &RequestMeta,
    ) -> AuthResult<()> {
        meta.deadline.check()?;
        self.sessions
            .get(principal.tenant_id, session_id)
            .await?
            .filter(|s| s.user_id == principal.user_id)
            .ok_or(AuthError::NotFound("session"))?;
        self.sessions
            .revoke(principal.tenant_id, session_id, RevocationReason::UserRevoked)
            .await?;
        Ok(())
    }

    /// Revokes every session of the caller, optionally keeping the one the
    /// request was made with.
    pub async fn revoke_all_sessions(
        &self,
        principal: &Principal,
        except_current: bool,
        meta: &RequestMeta,
    ) -> AuthResult<usize> {
        meta.deadline.check()?;
        let except = if except_current {
            Some(require_session(principal)?)
        } else {
            None
        };
        let revoked = self
            .sessions
            .revoke_all_for_user(
                principal.tenant_id,
                principal.user_id,
                except,
                RevocationReason::UserRevokedAll,
            )
            .await?;
        Ok(revoked.len())
    }

    /// Revokes any session in the caller's tenant. Needs `sessions.revoke`.
    pub async fn admin_revoke_session(
        &self,
        principal: &Principal,
        session_id: Uuid,
        meta: &RequestMeta,
    ) -> AuthResult<()> {
        meta.deadline.check()?;
        self.require_permission(principal, "sessions", "revoke").await?;
        let session = self
            .sessions
            .get(principal.tenant_id, session_id)
            .await?
            .ok_or(AuthError::NotFound("session"))?;
        self.sessions
            .revoke(principal.tenant_id, session_id, RevocationReason::AdminRevoked)
            .await?;
        tracing::info!(
            tenant_id = %principal.tenant_id,
            admin_id = %principal.user_id,
            user_id = %session.user_id,
            session_id = %session_id,
            "Session revoked by administrator"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // API tokens
    // ------------------------------------------------------------------

    /// Issues an API token for the caller. Scopes are capped by the caller's
    /// own effective permissions.
    pub async fn create_api_token(
        &self,
        principal: &Principal,
        name: &str,
        scopes: Vec<String>,
        options: IssueOptions,
        meta: &RequestMeta,
    ) -> AuthResult<ApiTokenCreated> {
        meta.deadline.check()?;
        require_session(principal)?;
        let owner_permissions = self
            .rbac
            .effective_permissions(principal.tenant_id, principal.user_id, None)
            .await?;
        self.api_tokens
            .issue(
                principal.tenant_id,
                principal.user_id,
                name,
                scopes,
                &owner_permissions,
                options,
            )
            .await
    }

    pub async fn list_api_tokens(&self, principal: &Principal) -> AuthResult<Vec<ApiTokenInfo>> {
        self.api_tokens
            .list(principal.tenant_id, principal.user_id)
            .await
    }

    /// Interactive sessions only; an API token cannot revoke tokens.
    pub async fn revoke_api_token(
        &self,
        principal: &Principal,
        token_id: Uuid,
        meta: &RequestMeta,
    ) -> AuthResult<()> {
        meta.deadline.check()?;
        require_session(principal)?;
        self.api_tokens
            .revoke(principal.tenant_id, principal.user_id, token_id)
            .await
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Own profile, or any user of the tenant with `users.read`.
    pub async fn get_user(&self, principal: &Principal, user_id: Uuid) -> AuthResult<UserResponse> {
        if user_id != principal.user_id {
            self.require_permission(principal, "users", "read").await?;
        }
        self.credentials
            .lookup_by_id(principal.tenant_id, user_id)
            .await?
            .map(|u| u.sanitized())
            .ok_or(AuthError::NotFound("user"))
    }

    pub async fn update_profile(
        &self,
        principal: &Principal,
        update: ProfileUpdate,
        meta: &RequestMeta,
    ) -> AuthResult<UserResponse> {
        meta.deadline.check()?;
        let mut user = self.current_user(principal).await?;

        if let Some(raw) = update.username.as_deref() {
            user.username = normalize_username(raw).ok_or_else(|| {
                AuthError::InvalidInput(
                    "username must be 3-64 characters of a-z, 0-9, '_', '.', '-'".into(),
                )
            })?;
        }
        if update.display_name.is_some() {
            user.display_name = clean_display_name(update.display_name)?;
        }
        user.updated_utc = self.clock.now();
        self.credentials.update(&user).await?;
        Ok(user.sanitized())
    }

    /// Soft delete: the row stays so email and username remain reserved.
    /// Needs `users.delete`. Returns how many sessions were revoked.
    pub async fn deactivate_user(
        &self,
        principal: &Principal,
        user_id: Uuid,
        meta: &RequestMeta,
    ) -> AuthResult<usize> {
        meta.deadline.check()?;
        self.require_permission(principal, "users", "delete").await?;
        let mut user = self
            .credentials
            .lookup_by_id(principal.tenant_id, user_id)
            .await?
            .ok_or(AuthError::NotFound("user"))?;

        let now = self.clock.now();
        user.is_active = false;
        user.deleted_utc.get_or_insert(now);
        user.updated_utc = now;
        self.credentials.update(&user).await?;

        let revoked = self
            .sessions
            .revoke_all_for_user(principal.tenant_id, user_id, None, RevocationReason::AdminRevoked)
            .await?;
        tracing::info!(
            tenant_id = %principal.tenant_id,
            admin_id = %principal.user_id,
            user_id = %user_id,
            sessions_revoked = revoked.len(),
            "User deactivated"
        );
        Ok(revoked.len())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn start_session(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        meta: &RequestMeta,
    ) -> AuthResult<TokenPair> {
        let session = self.sessions.create(tenant_id, user_id, &meta.device()).await?;
        self.mint_pair(
            tenant_id,
            user_id,
            session.session_id,
            Uuid::new_v4(),
            session.expiry_utc,
        )
        .await
    }

    /// Mints an access token and stores a new refresh token in `chain_id`.
    /// Neither outlives the session.
    async fn mint_pair(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        session_id: Uuid,
        chain_id: Uuid,
        session_expiry: DateTime<Utc>,
    ) -> AuthResult<TokenPair> {
        let roles = self.rbac.role_names(tenant_id, user_id).await?;
        let access_token = self.tokens.mint_access(user_id, tenant_id, session_id, roles)?;

        let now = self.clock.now();
        let token_id = Uuid::new_v4();
        let minted = self.tokens.mint_refresh(tenant_id, token_id);
        let record = RefreshTokenRecord::new(
            token_id,
            tenant_id,
            session_id,
            user_id,
            chain_id,
            minted.token_hash,
            now,
            self.tokens.refresh_expiry(now).min(session_expiry),
        );
        self.refresh_tokens.insert_refresh_token(&record).await?;

        Ok(TokenPair {
            access_token,
            refresh_token: minted.token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_ttl().num_seconds(),
            session_id,
        })
    }

    /// Burns the chain and revokes its session. Always yields `RefreshReused`.
    async fn handle_reuse(&self, record: &RefreshTokenRecord) -> AuthError {
        let now = self.clock.now();
        metrics::record_refresh_reuse();
        tracing::warn!(
            tenant_id = %record.tenant_id,
            user_id = %record.user_id,
            session_id = %record.session_id,
            chain_id = %record.chain_id,
            "Refresh token reuse detected, revoking session"
        );

        if let Err(e) = self
            .refresh_tokens
            .consume_chain(record.tenant_id, record.chain_id, now)
            .await
        {
            return AuthError::from(e);
        }
        if let Err(e) = self
            .sessions
            .revoke(record.tenant_id, record.session_id, RevocationReason::RefreshReuse)
            .await
        {
            return e;
        }
        AuthError::RefreshReused
    }

    async fn current_user(&self, principal: &Principal) -> AuthResult<User> {
        self.credentials
            .lookup_by_id(principal.tenant_id, principal.user_id)
            .await?
            .filter(User::can_authenticate)
            .ok_or(AuthError::Unauthenticated)
    }

    /// A wrong current password counts toward lockout like a failed login.
    async fn verify_current_password(
        &self,
        user: &User,
        password: &Password,
        meta: &RequestMeta,
    ) -> AuthResult<()> {
        let record = PasswordHashString::new(user.password_hash.clone());
        if self.passwords.verify(password, &record, &meta.deadline).await? {
            return Ok(());
        }
        self.credentials
            .record_failed_login(user.tenant_id, user.user_id, self.clock.now())
            .await?;
        tracing::info!(
            tenant_id = %user.tenant_id,
            user_id = %user.user_id,
            "Current password check failed"
        );
        Err(AuthError::InvalidCredentials)
    }

    async fn require_permission(
        &self,
        principal: &Principal,
        resource: &str,
        action: &str,
    ) -> AuthResult<()> {
        if self
            .rbac
            .allow(principal, principal.tenant_id, resource, action)
            .await?
        {
            Ok(())
        } else {
            tracing::info!(
                tenant_id = %principal.tenant_id,
                user_id = %principal.user_id,
                resource,
                action,
                "Permission denied"
            );
            Err(AuthError::Forbidden)
        }
    }

    /// Best effort: a failed rehash leaves the old record in place.
    async fn rehash(&self, user: &User, password: &Password, meta: &RequestMeta) {
        let hash = match self.passwords.hash(password, &meta.deadline).await {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(user_id = %user.user_id, error = %e, "Password rehash failed");
                return;
            }
        };
        let mut updated = user.clone();
        updated.password_hash = hash.into_string();
        updated.updated_utc = self.clock.now();
        match self.credentials.update(&updated).await {
            Ok(()) => tracing::info!(user_id = %user.user_id, "Password rehashed with current parameters"),
            Err(e) => tracing::warn!(user_id = %user.user_id, error = %e, "Failed to store rehashed password"),
        }
    }
}

/// Interactive-only operations reject API-token principals.
fn require_session(principal: &Principal) -> AuthResult<Uuid> {
    principal.session_id.ok_or(AuthError::Forbidden)
}

fn clean_display_name(raw: Option<String>) -> AuthResult<Option<String>> {
    let Some(name) = raw else {
        return Ok(None);
    };
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(AuthError::InvalidInput(format!(
            "display name must be at most {} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    Ok(Some(name.to_string()))
}
