use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::admin::{AssignRoleRequest, PermissionsResponse, ProjectQuery};
use crate::dtos::auth::{RevokedCountResponse, UpdateProfileRequest};
use crate::middleware::{AuthPrincipal, Meta};
use crate::services::auth::ProfileUpdate;
use crate::utils::ValidatedJson;
use crate::AppState;

/// GET /users/me
pub async fn get_me(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let user = state.core.auth.get_user(&principal, principal.user_id).await?;
    Ok(Json(user))
}

/// PATCH /users/me
pub async fn update_me(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let update = ProfileUpdate {
        display_name: req.display_name,
        username: req.username,
    };
    let user = state.core.auth.update_profile(&principal, update, &meta).await?;
    Ok(Json(user))
}

/// GET /users/:user_id
pub async fn get_user(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.core.auth.get_user(&principal, user_id).await?;
    Ok(Json(user))
}

/// DELETE /users/:user_id
pub async fn deactivate_user(
    State(state): State<AppState>,
    Meta(meta): Meta,
    AuthPrincipal(principal): AuthPrincipal,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state
        .core
        .auth
        .deactivate_user(&principal, user_id, &meta)
        .await?;
    Ok(Json(RevokedCountResponse { revoked }))
}

/// GET /users/:user_id/permissions
pub async fn effective_permissions(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ProjectQuery>,
) -> Result<impl IntoResponse, AppError> {
    if user_id != principal.user_id {
        state.core.principals.require(&principal, "users", "read").await?;
    }
    let permissions = state
        .core
        .rbac
        .effective_permissions(principal.tenant_id, user_id, query.project_id)
        .await?;
    Ok(Json(PermissionsResponse {
        user_id,
        project_id: query.project_id,
        permissions,
    }))
}

/// POST /users/:user_id/roles
pub async fn assign_role(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.core.principals.require(&principal, "roles", "write").await?;
    let binding = state
        .core
        .rbac
        .assign_role(principal.tenant_id, user_id, req.role_id, req.project_id)
        .await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

/// DELETE /users/:user_id/roles/:role_id
pub async fn unassign_role(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ProjectQuery>,
) -> Result<impl IntoResponse, AppError> {
    state.core.principals.require(&principal, "roles", "write").await?;
    state
        .core
        .rbac
        .unassign_role(principal.tenant_id, user_id, role_id, query.project_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
