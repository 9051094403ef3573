use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{AuthType, Principal};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTenantRequest {
    #[validate(length(min = 1, max = 128, message = "Tenant name must be 1-128 characters"))]
    pub tenant_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "Role name must be 1-64 characters"))]
    pub role_name: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
    pub project_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectQuery {
    pub project_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub user_id: Uuid,
    pub project_id: Option<Uuid>,
    pub permissions: Vec<String>,
}

/// Credential handed over by a sibling service, as it appeared in the
/// caller's `Authorization` header.
#[derive(Deserialize, Validate)]
pub struct ResolveRequest {
    #[validate(length(min = 1, message = "Credential is required"))]
    pub authorization: String,
    pub tenant_id: Option<Uuid>,
    pub client_ip: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct AuthorizeRequest {
    #[validate(length(min = 1, message = "Credential is required"))]
    pub authorization: String,
    pub tenant_id: Option<Uuid>,
    pub client_ip: Option<String>,
    #[validate(length(min = 1, max = 64, message = "Resource must be 1-64 characters"))]
    pub resource: String,
    #[validate(length(min = 1, max = 64, message = "Action must be 1-64 characters"))]
    pub action: String,
    pub project_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PrincipalResponse {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<Uuid>,
    pub auth_type: AuthType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl From<Principal> for PrincipalResponse {
    fn from(p: Principal) -> Self {
        Self {
            user_id: p.user_id,
            tenant_id: p.tenant_id,
            roles: p.roles,
            session_id: p.session_id,
            token_id: p.token_id,
            auth_type: p.auth_type,
            scopes: p.scopes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub allowed: bool,
    pub principal: PrincipalResponse,
}
