//! Principal - the authenticated identity passed explicitly to every core call.

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Access,
    ApiToken,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Access => "access",
            AuthType::ApiToken => "api_token",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    /// Role names snapshotted into the access token, or the owner's roles for API tokens.
    pub roles: Vec<String>,
    pub session_id: Option<Uuid>,
    pub token_id: Option<Uuid>,
    pub auth_type: AuthType,
    /// Scope set capping an API token's authority. Empty for access principals.
    pub scopes: Vec<String>,
}

impl Principal {
    pub fn access(user_id: Uuid, tenant_id: Uuid, session_id: Uuid, roles: Vec<String>) -> Self {
        Self {
            user_id,
            tenant_id,
            roles,
            session_id: Some(session_id),
            token_id: None,
            auth_type: AuthType::Access,
            scopes: Vec::new(),
        }
    }

    pub fn api_token(
        user_id: Uuid,
        tenant_id: Uuid,
        token_id: Uuid,
        roles: Vec<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            user_id,
            tenant_id,
            roles,
            session_id: None,
            token_id: Some(token_id),
            auth_type: AuthType::ApiToken,
            scopes,
        }
    }

    pub fn is_api_token(&self) -> bool {
        self.auth_type == AuthType::ApiToken
    }
}
