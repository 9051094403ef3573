pub mod clock;
pub mod config;
pub mod context;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod tasks;
pub mod utils;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::{
    create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimit,
};
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::clock::SharedClock;
use crate::config::IamConfig;
use crate::services::{
    ApiTokenService, ApiTokenSettings, AuthService, CredentialStore, LockoutPolicy, MfaEngine,
    MfaSettings, PasswordPolicy, PasswordService, PrincipalResolver, RbacEvaluator,
    SessionRegistry, SessionSettings, TenantService, TokenRateLimiter, TokenService,
    TokenSettings,
};
use crate::store::Stores;

/// The wired IAM core: every component over one set of stores and one clock.
#[derive(Clone)]
pub struct IamCore {
    pub auth: AuthService,
    pub principals: PrincipalResolver,
    pub tenants: TenantService,
    pub rbac: RbacEvaluator,
    pub sessions: SessionRegistry,
    pub api_tokens: ApiTokenService,
    pub mfa: MfaEngine,
    pub tokens: TokenService,
    pub stores: Stores,
    pub clock: SharedClock,
}

impl IamCore {
    pub fn build(config: &IamConfig, stores: Stores, clock: SharedClock) -> Result<Self, AppError> {
        let access_ttl = chrono_duration(config.jwt.access_ttl, "JWT_ACCESS_TTL")?;
        let refresh_ttl = chrono_duration(config.jwt.refresh_ttl, "JWT_REFRESH_TTL")?;

        let tokens = TokenService::new(
            &config.jwt.signing_key_id,
            &config.jwt.signing_secret,
            &config.jwt.previous_keys,
            TokenSettings {
                access_ttl,
                refresh_ttl,
                key_grace_period: chrono_duration(config.jwt.key_grace_period, "JWT_KEY_GRACE_PERIOD")?,
            },
            clock.clone(),
        );

        let passwords = PasswordService::new(
            config.password.hash,
            PasswordPolicy {
                min_length: config.password.min_length,
                max_bytes: config.password.max_bytes,
            },
            config.password.workers,
        )
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("password hasher: {}", e)))?;

        let credentials = CredentialStore::new(
            stores.users.clone(),
            LockoutPolicy {
                max_attempts: config.lockout.max_login_attempts,
                duration: chrono_duration(config.lockout.lockout_duration, "LOCKOUT_DURATION")?,
            },
        );

        // A session lives as long as its first refresh token; rotation does not extend it.
        let sessions = SessionRegistry::new(
            stores.sessions.clone(),
            stores.tenants.clone(),
            clock.clone(),
            SessionSettings {
                session_ttl: refresh_ttl,
                touch_interval: chrono_duration(config.session.touch_interval, "SESSION_TOUCH_INTERVAL")?,
                live_cache_ttl: chrono_duration(config.session.live_cache_ttl, "SESSION_LIVE_CACHE_TTL")?,
                revoked_cache_ttl: access_ttl,
            },
        );

        let mfa = MfaEngine::new(
            stores.mfa.clone(),
            config.mfa.encryption_key.clone(),
            clock.clone(),
            MfaSettings {
                issuer_label: config.mfa.issuer_label.clone(),
                drift_steps: config.mfa.drift_steps,
                recovery_code_count: config.mfa.recovery_code_count,
                challenge_ttl: chrono_duration(config.mfa.challenge_ttl, "MFA_CHALLENGE_TTL")?,
            },
        );

        let rbac = RbacEvaluator::new(stores.roles.clone(), stores.users.clone(), clock.clone());
        let tenants = TenantService::new(stores.tenants.clone(), rbac.clone(), clock.clone());

        let api_tokens = ApiTokenService::new(
            stores.api_tokens.clone(),
            stores.users.clone(),
            stores.tenants.clone(),
            TokenRateLimiter::new(config.api_token.bucket_idle_ttl),
            clock.clone(),
            ApiTokenSettings {
                default_rps: config.api_token.default_rps,
            },
        );

        let principals = PrincipalResolver::new(
            tokens.clone(),
            sessions.clone(),
            api_tokens.clone(),
            rbac.clone(),
            tenants.clone(),
        );

        let auth = AuthService::new(
            credentials,
            passwords,
            tokens.clone(),
            sessions.clone(),
            stores.refresh_tokens.clone(),
            mfa.clone(),
            rbac.clone(),
            api_tokens.clone(),
            tenants.clone(),
            clock.clone(),
        );

        Ok(Self {
            auth,
            principals,
            tenants,
            rbac,
            sessions,
            api_tokens,
            mfa,
            tokens,
            stores,
            clock,
        })
    }
}

fn chrono_duration(d: std::time::Duration, name: &str) -> Result<chrono::Duration, AppError> {
    chrono::Duration::from_std(d)
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{} out of range: {}", name, e)))
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IamConfig>,
    pub core: IamCore,
    pub login_rate_limiter: IpRateLimit,
    pub register_rate_limiter: IpRateLimit,
}

impl AppState {
    pub fn new(config: IamConfig, core: IamCore) -> Self {
        let trust_forwarded_for = config.trust_proxy_headers;
        let login_rate_limiter = IpRateLimit::new(
            create_ip_rate_limiter(
                config.rate_limit.login_attempts,
                config.rate_limit.login_window_seconds,
            ),
            trust_forwarded_for,
        );
        let register_rate_limiter = IpRateLimit::new(
            create_ip_rate_limiter(
                config.rate_limit.register_attempts,
                config.rate_limit.register_window_seconds,
            ),
            trust_forwarded_for,
        );
        Self {
            config: Arc::new(config),
            core,
            login_rate_limiter,
            register_rate_limiter,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let login_routes = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/mfa/verify", post(handlers::auth::verify_mfa))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let register_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let tenant_admin_routes = Router::new()
        .route("/admin/tenants", post(handlers::admin::create_tenant))
        .route("/admin/tenants/:tenant_id", get(handlers::admin::get_tenant))
        .route(
            "/admin/tenants/:tenant_id/suspend",
            post(handlers::admin::suspend_tenant),
        )
        .route(
            "/admin/tenants/:tenant_id/activate",
            post(handlers::admin::activate_tenant),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    let api_routes = Router::new()
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/password", post(handlers::auth::change_password))
        .route(
            "/users/me",
            get(handlers::users::get_me).patch(handlers::users::update_me),
        )
        .route(
            "/users/:user_id",
            get(handlers::users::get_user).delete(handlers::users::deactivate_user),
        )
        .route(
            "/users/:user_id/permissions",
            get(handlers::users::effective_permissions),
        )
        .route("/users/:user_id/roles", post(handlers::users::assign_role))
        .route(
            "/users/:user_id/roles/:role_id",
            delete(handlers::users::unassign_role),
        )
        .route("/mfa/enroll", post(handlers::mfa::enroll))
        .route("/mfa/confirm", post(handlers::mfa::confirm))
        .route("/mfa/disable", post(handlers::mfa::disable))
        .route(
            "/mfa/recovery-codes",
            get(handlers::mfa::recovery_codes_remaining).post(handlers::mfa::regenerate_recovery_codes),
        )
        .route("/sessions", get(handlers::sessions::list_sessions))
        .route(
            "/sessions/revoke-all",
            post(handlers::sessions::revoke_all_sessions),
        )
        .route(
            "/sessions/:session_id",
            delete(handlers::sessions::revoke_session),
        )
        .route(
            "/admin/sessions/:session_id",
            delete(handlers::sessions::admin_revoke_session),
        )
        .route(
            "/api-tokens",
            get(handlers::api_tokens::list_api_tokens).post(handlers::api_tokens::create_api_token),
        )
        .route(
            "/api-tokens/:token_id",
            delete(handlers::api_tokens::revoke_api_token),
        )
        .route(
            "/roles",
            get(handlers::admin::list_roles).post(handlers::admin::create_role),
        )
        .route(
            "/roles/:role_id",
            put(handlers::admin::update_role).delete(handlers::admin::delete_role),
        )
        .route("/iam/resolve", post(handlers::principal::resolve))
        .route("/iam/authorize", post(handlers::principal::authorize));

    Router::new()
        .route("/health", get(handlers::metrics::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(login_routes)
        .merge(register_routes)
        .merge(tenant_admin_routes)
        .merge(api_routes)
        .route_layer(from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
