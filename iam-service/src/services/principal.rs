//! Principal resolution and authorization checks consumed by other services.

use uuid::Uuid;

use crate::models::Principal;
use crate::services::api_token::ApiTokenService;
use crate::services::error::{AuthError, AuthResult};
use crate::services::jwt::TokenService;
use crate::services::rbac::RbacEvaluator;
use crate::services::session::SessionRegistry;
use crate::services::tenant::TenantService;

/// A bearer credential as carried in the `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// `Authorization: Bearer <access-token>`
    Access(String),
    /// `Authorization: Token <api-token>`
    ApiToken(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Access(_) => f.write_str("Credential::Access([REDACTED])"),
            Credential::ApiToken(_) => f.write_str("Credential::ApiToken([REDACTED])"),
        }
    }
}

impl Credential {
    /// Parses an `Authorization` header value. The scheme decides the credential kind.
    pub fn from_authorization(value: &str) -> AuthResult<Self> {
        let (scheme, rest) = value
            .trim()
            .split_once(' ')
            .ok_or(AuthError::Unauthenticated)?;
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(AuthError::Unauthenticated);
        }
        if scheme.eq_ignore_ascii_case("bearer") {
            Ok(Credential::Access(rest.to_string()))
        } else if scheme.eq_ignore_ascii_case("token") {
            Ok(Credential::ApiToken(rest.to_string()))
        } else {
            Err(AuthError::Unauthenticated)
        }
    }
}

#[derive(Clone)]
pub struct PrincipalResolver {
    tokens: TokenService,
    sessions: SessionRegistry,
    api_tokens: ApiTokenService,
    rbac: RbacEvaluator,
    tenants: TenantService,
}

impl PrincipalResolver {
    pub fn new(
        tokens: TokenService,
        sessions: SessionRegistry,
        api_tokens: ApiTokenService,
        rbac: RbacEvaluator,
        tenants: TenantService,
    ) -> Self {
        Self {
            tokens,
            sessions,
            api_tokens,
            rbac,
            tenants,
        }
    }

    /// Resolves a credential to a principal.
    ///
    /// Access tokens are checked against the session registry, so a revoked
    /// session fails here even while its access token is unexpired.
    pub async fn resolve(
        &self,
        credential: &Credential,
        tenant_hint: Option<Uuid>,
        ip: Option<&str>,
    ) -> AuthResult<Principal> {
        match credential {
            Credential::Access(token) => self.resolve_access(token, tenant_hint).await,
            Credential::ApiToken(secret) => self.resolve_api_token(secret, tenant_hint, ip).await,
        }
    }

    async fn resolve_access(&self, token: &str, tenant_hint: Option<Uuid>) -> AuthResult<Principal> {
        let claims = self.tokens.verify_access(token)?;
        if tenant_hint.is_some_and(|hint| hint != claims.tid) {
            tracing::warn!(
                token_tenant = %claims.tid,
                requested_tenant = ?tenant_hint,
                "Access token presented to another tenant"
            );
            return Err(AuthError::TenantMismatch("access token"));
        }
        self.tenants.require_active(claims.tid).await?;

        if !self.sessions.is_live(claims.tid, claims.sid).await? {
            tracing::info!(
                tenant_id = %claims.tid,
                session_id = %claims.sid,
                "Access token presented for a dead session"
            );
            return Err(AuthError::SessionRevoked);
        }
        if let Err(e) = self.sessions.touch(claims.tid, claims.sid).await {
            tracing::warn!(session_id = %claims.sid, error = %e, "Failed to touch session");
        }

        Ok(Principal::access(claims.sub, claims.tid, claims.sid, claims.roles))
    }

    async fn resolve_api_token(
        &self,
        secret: &str,
        tenant_hint: Option<Uuid>,
        ip: Option<&str>,
    ) -> AuthResult<Principal> {
        let verified = self.api_tokens.verify(secret, tenant_hint, ip).await?;
        let token = verified.token;
        self.tenants.require_active(token.tenant_id).await?;
        let roles = self.rbac.role_names(token.tenant_id, token.user_id).await?;

        Ok(Principal::api_token(
            token.user_id,
            token.tenant_id,
            token.token_id,
            roles,
            token.scopes,
        ))
    }

    /// Tenant-wide decision in the principal's own tenant.
    pub async fn authorize(&self, principal: &Principal, resource: &str, action: &str) -> AuthResult<bool> {
        self.rbac
            .allow(principal, principal.tenant_id, resource, action)
            .await
    }

    pub async fn authorize_in_project(
        &self,
        principal: &Principal,
        project_id: Uuid,
        resource: &str,
        action: &str,
    ) -> AuthResult<bool> {
        self.rbac
            .allow_in_project(principal, principal.tenant_id, project_id, resource, action)
            .await
    }

    /// Like [`authorize`](Self::authorize) but fails with `Forbidden` on deny.
    pub async fn require(&self, principal: &Principal, resource: &str, action: &str) -> AuthResult<()> {
        if self.authorize(principal, resource, action).await? {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_selects_credential_kind() {
        assert_eq!(
            Credential::from_authorization("Bearer abc.def.ghi").unwrap(),
            Credential::Access("abc.def.ghi".into())
        );
        assert_eq!(
            Credential::from_authorization("token  secret-value").unwrap(),
            Credential::ApiToken("secret-value".into())
        );
        assert!(Credential::from_authorization("Basic dXNlcjpwdw==").is_err());
        assert!(Credential::from_authorization("Bearer").is_err());
        assert!(Credential::from_authorization("Bearer   ").is_err());
        assert!(Credential::from_authorization("").is_err());
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let rendered = format!("{:?}", Credential::ApiToken("super-secret".into()));
        assert!(!rendered.contains("super-secret"));
    }
}
