use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::client_ip;
use service_core::middleware::tracing::RequestId;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::context::{RequestMeta, DEFAULT_REQUEST_TIMEOUT};
use crate::models::Principal;
use crate::services::error::AuthError;
use crate::services::principal::Credential;
use crate::utils::Deadline;
use crate::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// The authenticated caller, resolved from the `Authorization` header.
///
/// `Bearer` carries an access token, `Token` an API token. When present,
/// `X-Tenant-Id` must name the credential's tenant.
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub Principal);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthPrincipal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(AuthPrincipal(principal.clone()));
        }

        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::Unauthenticated)?;
        let credential = Credential::from_authorization(header_value)?;
        let tenant_hint = tenant_hint(&parts.headers)?;
        let ip = peer_ip(parts, state.config.trust_proxy_headers);

        let principal = state
            .core
            .principals
            .resolve(&credential, tenant_hint, ip.as_deref())
            .await?;

        parts.extensions.insert(principal.clone());
        Ok(AuthPrincipal(principal))
    }
}

/// Deadline and client metadata for the orchestrator.
#[derive(Debug, Clone)]
pub struct Meta(pub RequestMeta);

#[axum::async_trait]
impl FromRequestParts<AppState> for Meta {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let mut meta = RequestMeta::new(Deadline::after(DEFAULT_REQUEST_TIMEOUT));
        if let Some(ip) = peer_ip(parts, state.config.trust_proxy_headers) {
            meta = meta.with_ip(ip);
        }
        if let Some(agent) = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
        {
            meta = meta.with_user_agent(agent.chars().take(512).collect::<String>());
        }
        if let Some(RequestId(id)) = parts.extensions.get::<RequestId>() {
            meta = meta.with_request_id(id.clone());
        }
        Ok(Meta(meta))
    }
}

fn tenant_hint(headers: &HeaderMap) -> Result<Option<Uuid>, AuthError> {
    match headers.get(TENANT_HEADER).and_then(|v| v.to_str().ok()) {
        Some(raw) => Uuid::try_parse(raw.trim())
            .map(Some)
            .map_err(|_| AuthError::InvalidInput("X-Tenant-Id must be a UUID".into())),
        None => Ok(None),
    }
}

fn peer_ip(parts: &Parts, trust_forwarded_for: bool) -> Option<String> {
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_ip(&parts.headers, peer.as_ref(), trust_forwarded_for).map(|ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn tenant_hint_must_be_a_uuid() {
        let mut headers = HeaderMap::new();
        assert_eq!(tenant_hint(&headers).unwrap(), None);

        let id = Uuid::new_v4();
        headers.insert(TENANT_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(tenant_hint(&headers).unwrap(), Some(id));

        headers.insert(TENANT_HEADER, HeaderValue::from_static("acme"));
        assert!(matches!(tenant_hint(&headers), Err(AuthError::InvalidInput(_))));
    }

    #[test]
    fn recorded_ip_follows_the_proxy_setting() {
        let mut request = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.9")
            .body(())
            .unwrap();
        let peer: SocketAddr = "192.0.2.1:443".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        let (parts, _) = request.into_parts();

        assert_eq!(peer_ip(&parts, false).as_deref(), Some("192.0.2.1"));
        assert_eq!(peer_ip(&parts, true).as_deref(), Some("203.0.113.9"));
    }
}
