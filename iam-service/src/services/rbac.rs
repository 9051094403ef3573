//! RBAC evaluator: role bindings to effective permissions, allow/deny
//! decisions and role administration.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::models::permission::{any_allows, parse_permissions};
use crate::models::role::SYSTEM_ROLES;
use crate::models::{Principal, Role, RoleBinding};
use crate::services::error::{AuthError, AuthResult};
use crate::store::{constraint, RoleStore, UserStore};

const MAX_ROLE_NAME_LEN: usize = 64;

#[derive(Clone)]
pub struct RbacEvaluator {
    roles: Arc<dyn RoleStore>,
    users: Arc<dyn UserStore>,
    clock: SharedClock,
}

impl RbacEvaluator {
    pub fn new(roles: Arc<dyn RoleStore>, users: Arc<dyn UserStore>, clock: SharedClock) -> Self {
        Self {
            roles,
            users,
            clock,
        }
    }

    /// Inserts the immutable system roles into a new tenant.
    pub async fn seed_system_roles(&self, tenant_id: Uuid) -> AuthResult<()> {
        let now = self.clock.now();
        for (name, permissions) in SYSTEM_ROLES {
            let role = Role::system(tenant_id, name, permissions, now);
            match self.roles.insert_role(&role).await {
                Ok(()) => {}
                Err(e) if e.is_conflict_on(constraint::ROLE_NAME) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Union of the permissions of every binding that applies to `project_id`.
    pub async fn effective_permissions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        project_id: Option<Uuid>,
    ) -> AuthResult<Vec<String>> {
        let roles = self.bound_roles(tenant_id, user_id, project_id).await?;
        let permissions: BTreeSet<String> = roles
            .into_iter()
            .flat_map(|role| role.permissions.into_iter())
            .collect();
        Ok(permissions.into_iter().collect())
    }

    /// Names of the roles bound to the user tenant-wide, for the access token snapshot.
    pub async fn role_names(&self, tenant_id: Uuid, user_id: Uuid) -> AuthResult<Vec<String>> {
        let names: BTreeSet<String> = self
            .bound_roles(tenant_id, user_id, None)
            .await?
            .into_iter()
            .map(|role| role.role_name)
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Tenant-wide decision.
    pub async fn allow(
        &self,
        principal: &Principal,
        tenant_id: Uuid,
        resource: &str,
        action: &str,
    ) -> AuthResult<bool> {
        self.decide(principal, tenant_id, None, resource, action).await
    }

    /// Decision including bindings narrowed to `project_id`.
    pub async fn allow_in_project(
        &self,
        principal: &Principal,
        tenant_id: Uuid,
        project_id: Uuid,
        resource: &str,
        action: &str,
    ) -> AuthResult<bool> {
        self.decide(principal, tenant_id, Some(project_id), resource, action)
            .await
    }

    async fn decide(
        &self,
        principal: &Principal,
        tenant_id: Uuid,
        project_id: Option<Uuid>,
        resource: &str,
        action: &str,
    ) -> AuthResult<bool> {
        if principal.tenant_id != tenant_id {
            tracing::warn!(
                principal_tenant = %principal.tenant_id,
                requested_tenant = %tenant_id,
                user_id = %principal.user_id,
                "Authorization denied across tenants"
            );
            return Ok(false);
        }

        // Machine credentials are capped by their scopes.
        if principal.is_api_token() && !any_allows(&principal.scopes, resource, action) {
            return Ok(false);
        }

        let permissions = self
            .effective_permissions(tenant_id, principal.user_id, project_id)
            .await?;
        let allowed = any_allows(&permissions, resource, action);
        tracing::debug!(
            tenant_id = %tenant_id,
            user_id = %principal.user_id,
            resource,
            action,
            allowed,
            "Authorization decision"
        );
        Ok(allowed)
    }

    pub async fn list_roles(&self, tenant_id: Uuid) -> AuthResult<Vec<Role>> {
        let roles = self.roles.list_roles(tenant_id).await?;
        Ok(roles.into_iter().filter(|r| r.tenant_id == tenant_id).collect())
    }

    pub async fn create_role(
        &self,
        tenant_id: Uuid,
        role_name: &str,
        permissions: Vec<String>,
    ) -> AuthResult<Role> {
        let role_name = validate_role_name(role_name)?;
        let permissions = validate_permissions(permissions)?;

        let role = Role::new(tenant_id, role_name, permissions, self.clock.now());
        self.roles.insert_role(&role).await.map_err(|e| {
            if e.is_conflict_on(constraint::ROLE_NAME) {
                AuthError::RoleExists
            } else {
                e.into()
            }
        })?;

        tracing::info!(
            tenant_id = %tenant_id,
            role_id = %role.role_id,
            role_name = %role.role_name,
            "Role created"
        );
        Ok(role)
    }

    pub async fn update_role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
        permissions: Vec<String>,
    ) -> AuthResult<Role> {
        let mut role = self.mutable_role(tenant_id, role_id).await?;
        let permissions = validate_permissions(permissions)?;
        let now = self.clock.now();

        if !self
            .roles
            .update_role_permissions(tenant_id, role_id, &permissions, now)
            .await?
        {
            return Err(AuthError::NotFound("role"));
        }
        role.permissions = permissions;
        role.updated_utc = now;
        Ok(role)
    }

    pub async fn delete_role(&self, tenant_id: Uuid, role_id: Uuid) -> AuthResult<()> {
        self.mutable_role(tenant_id, role_id).await?;
        match self.roles.delete_role(tenant_id, role_id).await {
            Ok(true) => {
                tracing::info!(tenant_id = %tenant_id, role_id = %role_id, "Role deleted");
                Ok(())
            }
            Ok(false) => Err(AuthError::NotFound("role")),
            Err(e) if e.is_conflict_on(constraint::ROLE_IN_USE) => Err(AuthError::RoleInUse),
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent: assigning an existing binding succeeds.
    pub async fn assign_role(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
        project_id: Option<Uuid>,
    ) -> AuthResult<RoleBinding> {
        self.role(tenant_id, role_id).await?;
        self.users
            .find_user_by_id(tenant_id, user_id)
            .await?
            .filter(|u| u.tenant_id == tenant_id)
            .ok_or(AuthError::NotFound("user"))?;

        let binding = RoleBinding::new(tenant_id, user_id, role_id, project_id, self.clock.now());
        match self.roles.insert_binding(&binding).await {
            Ok(()) => {}
            Err(e) if e.is_conflict_on(constraint::ROLE_BINDING) => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            role_id = %role_id,
            project_id = ?project_id,
            "Role assigned"
        );
        Ok(binding)
    }

    pub async fn assign_role_by_name(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_name: &str,
    ) -> AuthResult<()> {
        let role = self
            .roles
            .find_role_by_name(tenant_id, role_name)
            .await?
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or(AuthError::NotFound("role"))?;
        self.assign_role(tenant_id, user_id, role.role_id, None).await?;
        Ok(())
    }

    pub async fn unassign_role(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
        project_id: Option<Uuid>,
    ) -> AuthResult<()> {
        if !self
            .roles
            .delete_binding(tenant_id, user_id, role_id, project_id)
            .await?
        {
            return Err(AuthError::NotFound("role binding"));
        }
        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            role_id = %role_id,
            "Role unassigned"
        );
        Ok(())
    }

    async fn role(&self, tenant_id: Uuid, role_id: Uuid) -> AuthResult<Role> {
        self.roles
            .get_role(tenant_id, role_id)
            .await?
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or(AuthError::NotFound("role"))
    }

    async fn mutable_role(&self, tenant_id: Uuid, role_id: Uuid) -> AuthResult<Role> {
        let role = self.role(tenant_id, role_id).await?;
        if role.is_system {
            return Err(AuthError::SystemRoleImmutable);
        }
        Ok(role)
    }

    async fn bound_roles(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        project_id: Option<Uuid>,
    ) -> AuthResult<Vec<Role>> {
        let bindings = self.roles.list_user_bindings(tenant_id, user_id).await?;
        let role_ids: BTreeSet<Uuid> = bindings
            .iter()
            .filter(|b| b.tenant_id == tenant_id && b.applies_to(project_id))
            .map(|b| b.role_id)
            .collect();
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        let by_id: HashMap<Uuid, Role> = self
            .roles
            .list_roles(tenant_id)
            .await?
            .into_iter()
            .map(|r| (r.role_id, r))
            .collect();

        role_ids
            .into_iter()
            .filter_map(|id| by_id.get(&id).cloned())
            .map(|role| {
                if role.tenant_id != tenant_id {
                    tracing::error!(
                        requested_tenant = %tenant_id,
                        row_tenant = %role.tenant_id,
                        role_id = %role.role_id,
                        "Cross-tenant role row returned by store"
                    );
                    return Err(AuthError::TenantMismatch("role"));
                }
                Ok(role)
            })
            .collect()
    }
}

fn validate_role_name(raw: &str) -> AuthResult<String> {
    let name = raw.trim().to_lowercase();
    let valid = !name.is_empty()
        && name.len() <= MAX_ROLE_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    if !valid {
        return Err(AuthError::InvalidInput(
            "role name must be 1-64 characters of a-z, 0-9, '_' or '-'".into(),
        ));
    }
    Ok(name)
}

fn validate_permissions(permissions: Vec<String>) -> AuthResult<Vec<String>> {
    let parsed = parse_permissions(&permissions).map_err(|e| AuthError::InvalidInput(e.to_string()))?;
    let unique: BTreeSet<String> = parsed.iter().map(|p| p.to_string()).collect();
    Ok(unique.into_iter().collect())
}
