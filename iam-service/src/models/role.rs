//! Role model - tenant-scoped roles holding permission strings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MANAGER: &str = "manager";
pub const ROLE_MEMBER: &str = "member";
pub const ROLE_VIEWER: &str = "viewer";

/// System roles seeded into every tenant, with their permission sets.
pub const SYSTEM_ROLES: &[(&str, &[&str])] = &[
    (ROLE_ADMIN, &["*"]),
    (
        ROLE_MANAGER,
        &[
            "projects.*",
            "tasks.*",
            "teams.*",
            "kb.*",
            "notifications.*",
            "users.read",
            "roles.read",
        ],
    ),
    (
        ROLE_MEMBER,
        &[
            "projects.read",
            "projects.write",
            "tasks.read",
            "tasks.write",
            "teams.read",
            "kb.read",
            "kb.write",
            "notifications.read",
        ],
    ),
    (ROLE_VIEWER, &["*.read"]),
];

/// Role entity (tenant-scoped).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub tenant_id: Uuid,
    pub role_name: String,
    pub permissions: Vec<String>,
    pub is_system: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Role {
    /// Create a new user-defined role.
    pub fn new(
        tenant_id: Uuid,
        role_name: String,
        permissions: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            tenant_id,
            role_name,
            permissions,
            is_system: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Create an immutable system role.
    pub fn system(tenant_id: Uuid, role_name: &str, permissions: &[&str], now: DateTime<Utc>) -> Self {
        Self {
            is_system: true,
            ..Self::new(
                tenant_id,
                role_name.to_string(),
                permissions.iter().map(|p| p.to_string()).collect(),
                now,
            )
        }
    }
}

/// Binding of a user to a role, optionally narrowed to one project.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RoleBinding {
    pub binding_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub project_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl RoleBinding {
    pub fn new(
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
        project_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            binding_id: Uuid::new_v4(),
            tenant_id,
            user_id,
            role_id,
            project_id,
            created_utc: now,
        }
    }

    /// Tenant-wide bindings apply everywhere; project bindings only inside their project.
    pub fn applies_to(&self, project_id: Option<Uuid>) -> bool {
        match self.project_id {
            None => true,
            Some(bound) => project_id == Some(bound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::permission::Permission;

    #[test]
    fn system_role_permissions_parse() {
        for (_, perms) in SYSTEM_ROLES {
            for p in *perms {
                assert!(p.parse::<Permission>().is_ok(), "{} must parse", p);
            }
        }
    }

    #[test]
    fn project_binding_scope() {
        let now = Utc::now();
        let project = Uuid::new_v4();
        let tenant_wide = RoleBinding::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), None, now);
        let scoped = RoleBinding::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Some(project), now);

        assert!(tenant_wide.applies_to(None));
        assert!(tenant_wide.applies_to(Some(project)));
        assert!(scoped.applies_to(Some(project)));
        assert!(!scoped.applies_to(None));
        assert!(!scoped.applies_to(Some(Uuid::new_v4())));
    }
}
