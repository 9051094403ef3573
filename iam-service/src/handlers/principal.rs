//! Principal Resolution API for sibling services.

use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::dtos::admin::{AuthorizeRequest, AuthorizeResponse, PrincipalResponse, ResolveRequest};
use crate::services::principal::Credential;
use crate::utils::ValidatedJson;
use crate::AppState;

/// POST /iam/resolve
pub async fn resolve(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResolveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let credential = Credential::from_authorization(&req.authorization)?;
    let principal = state
        .core
        .principals
        .resolve(&credential, req.tenant_id, req.client_ip.as_deref())
        .await?;
    Ok(Json(PrincipalResponse::from(principal)))
}

/// POST /iam/authorize
pub async fn authorize(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<AuthorizeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let credential = Credential::from_authorization(&req.authorization)?;
    let principals = &state.core.principals;
    let principal = principals
        .resolve(&credential, req.tenant_id, req.client_ip.as_deref())
        .await?;

    let allowed = match req.project_id {
        Some(project_id) => {
            principals
                .authorize_in_project(&principal, project_id, &req.resource, &req.action)
                .await?
        }
        None => {
            principals
                .authorize(&principal, &req.resource, &req.action)
                .await?
        }
    };
    Ok(Json(AuthorizeResponse {
        allowed,
        principal: PrincipalResponse::from(principal),
    }))
}
