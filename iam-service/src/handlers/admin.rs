//! Tenant administration (admin key) and role management (RBAC-guarded).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::admin::{CreateRoleRequest, CreateTenantRequest, UpdateRoleRequest};
use crate::middleware::AuthPrincipal;
use crate::utils::ValidatedJson;
use crate::AppState;

/// POST /admin/tenants
pub async fn create_tenant(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateTenantRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.core.tenants.create_tenant(&req.tenant_name).await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

/// GET /admin/tenants/:tenant_id
pub async fn get_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.core.tenants.get_tenant(tenant_id).await?;
    Ok(Json(tenant))
}

/// POST /admin/tenants/:tenant_id/suspend
pub async fn suspend_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.core.tenants.suspend_tenant(tenant_id).await?;
    Ok(Json(tenant))
}

/// POST /admin/tenants/:tenant_id/activate
pub async fn activate_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.core.tenants.activate_tenant(tenant_id).await?;
    Ok(Json(tenant))
}

/// GET /roles
pub async fn list_roles(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    state.core.principals.require(&principal, "roles", "read").await?;
    let roles = state.core.rbac.list_roles(principal.tenant_id).await?;
    Ok(Json(roles))
}

/// POST /roles
pub async fn create_role(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.core.principals.require(&principal, "roles", "write").await?;
    let role = state
        .core
        .rbac
        .create_role(principal.tenant_id, &req.role_name, req.permissions)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// PUT /roles/:role_id
pub async fn update_role(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(role_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.core.principals.require(&principal, "roles", "write").await?;
    let role = state
        .core
        .rbac
        .update_role_permissions(principal.tenant_id, role_id, req.permissions)
        .await?;
    Ok(Json(role))
}

/// DELETE /roles/:role_id
pub async fn delete_role(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(role_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.core.principals.require(&principal, "roles", "write").await?;
    state.core.rbac.delete_role(principal.tenant_id, role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
