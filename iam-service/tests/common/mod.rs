//! Shared setup for iam-service integration tests.
//!
//! Everything runs against the in-memory store with a manual clock, so no
//! database or wall-clock waits are needed.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, Response},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use http_body_util::BodyExt;
use iam_service::{
    build_router,
    clock::ManualClock,
    config::IamConfig,
    context::RequestMeta,
    models::{Principal, Tenant, UserResponse},
    services::{AuthResult, Credential, RegisterInput, TokenPair},
    store::Stores,
    AppState, IamCore,
};
use iam_service::utils::Password;
use std::collections::HashMap;
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tower::ServiceExt;

pub const SIGNING_SECRET: &str = "integration-test-signing-secret-0123456789";
pub const ADMIN_API_KEY: &str = "test-admin-key-12345";
pub const PASSWORD: &str = "Passw0rd!Good";

pub struct TestApp {
    pub core: IamCore,
    pub config: IamConfig,
    pub clock: ManualClock,
    pub tenant: Tenant,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_env(&[]).await
    }

    /// Builds an app with `overrides` layered over the test defaults.
    pub async fn with_env(overrides: &[(&str, &str)]) -> Self {
        let mut vars: HashMap<String, String> = [
            ("JWT_SIGNING_SECRET", SIGNING_SECRET),
            ("ADMIN_API_KEY", ADMIN_API_KEY),
            ("PASSWORD_HASH_MEMORY_KIB", "256"),
            ("PASSWORD_HASH_ITERATIONS", "1"),
            ("PASSWORD_HASH_PARALLELISM", "1"),
            ("PASSWORD_HASH_WORKERS", "4"),
            ("JWT_ACCESS_TTL", "15m"),
            ("JWT_REFRESH_TTL", "7d"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in overrides {
            vars.insert(k.to_string(), v.to_string());
        }

        let config = IamConfig::from_source(service_core::config::Config::default(), |key| {
            vars.get(key).cloned()
        })
        .expect("test config");

        // Aligned to a TOTP step boundary.
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap());
        let core = IamCore::build(&config, Stores::in_memory(), Arc::new(clock.clone()))
            .expect("core");
        let tenant = core.tenants.create_tenant("Acme").await.expect("tenant");

        Self {
            core,
            config,
            clock,
            tenant,
        }
    }

    pub fn router(&self) -> Router {
        build_router(AppState::new(self.config.clone(), self.core.clone()))
    }

    pub fn now(&self) -> DateTime<Utc> {
        use iam_service::clock::Clock;
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub async fn new_tenant(&self, name: &str) -> Tenant {
        self.core.tenants.create_tenant(name).await.expect("tenant")
    }

    pub async fn register_in(&self, tenant: &Tenant, email: &str, password: &str) -> UserResponse {
        self.core
            .auth
            .register(
                RegisterInput {
                    tenant_id: tenant.tenant_id,
                    email: email.to_string(),
                    password: Password::new(password.to_string()),
                    username: None,
                    display_name: None,
                },
                &meta(),
            )
            .await
            .expect("register")
    }

    pub async fn register(&self, email: &str) -> UserResponse {
        let tenant = self.tenant.clone();
        self.register_in(&tenant, email, PASSWORD).await
    }

    pub async fn login_in(&self, tenant: &Tenant, email: &str, password: &str) -> AuthResult<TokenPair> {
        self.core
            .auth
            .login(
                tenant.tenant_id,
                email,
                &Password::new(password.to_string()),
                &meta(),
            )
            .await
    }

    pub async fn login(&self, email: &str) -> TokenPair {
        let tenant = self.tenant.clone();
        self.login_in(&tenant, email, PASSWORD).await.expect("login")
    }

    pub async fn resolve(&self, access_token: &str) -> AuthResult<Principal> {
        self.core
            .principals
            .resolve(&Credential::Access(access_token.to_string()), None, None)
            .await
    }

    pub async fn resolve_api_token(&self, secret: &str) -> AuthResult<Principal> {
        self.core
            .principals
            .resolve(
                &Credential::ApiToken(secret.to_string()),
                None,
                Some("10.0.0.7"),
            )
            .await
    }

    /// Code a TOTP app would show at the current manual time.
    pub fn totp_code(&self, secret_base32: &str) -> String {
        totp_code_at(secret_base32, self.now())
    }
}

pub fn meta() -> RequestMeta {
    RequestMeta::default()
        .with_ip("10.0.0.7")
        .with_user_agent("integration-test")
}

pub fn totp_code_at(secret_base32: &str, at: DateTime<Utc>) -> String {
    let secret = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .expect("base32 secret");
    let totp = TOTP::new(Algorithm::SHA1, 6, 0, 30, secret, None, "test".into()).expect("totp");
    totp.generate(at.timestamp() as u64)
}

// ==================== HTTP helpers ====================

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");
    app.clone().oneshot(request).await.expect("response")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}
