//! Tenant administration.

use std::sync::Arc;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::models::{Tenant, TenantStatus};
use crate::services::error::{AuthError, AuthResult};
use crate::services::rbac::RbacEvaluator;
use crate::store::TenantStore;

const MAX_TENANT_NAME_LEN: usize = 128;

#[derive(Clone)]
pub struct TenantService {
    tenants: Arc<dyn TenantStore>,
    rbac: RbacEvaluator,
    clock: SharedClock,
}

impl TenantService {
    pub fn new(tenants: Arc<dyn TenantStore>, rbac: RbacEvaluator, clock: SharedClock) -> Self {
        Self {
            tenants,
            rbac,
            clock,
        }
    }

    /// Creates an active tenant and seeds its system roles.
    pub async fn create_tenant(&self, tenant_name: &str) -> AuthResult<Tenant> {
        let tenant_name = tenant_name.trim();
        if tenant_name.is_empty() || tenant_name.chars().count() > MAX_TENANT_NAME_LEN {
            return Err(AuthError::InvalidInput(format!(
                "tenant name must be 1-{} characters",
                MAX_TENANT_NAME_LEN
            )));
        }

        let tenant = Tenant::new(tenant_name.to_string(), self.clock.now());
        self.tenants.insert_tenant(&tenant).await?;
        self.rbac.seed_system_roles(tenant.tenant_id).await?;

        tracing::info!(
            tenant_id = %tenant.tenant_id,
            tenant_name = %tenant.tenant_name,
            "Tenant created"
        );
        Ok(tenant)
    }

    pub async fn get_tenant(&self, tenant_id: Uuid) -> AuthResult<Tenant> {
        self.tenants
            .get_tenant(tenant_id)
            .await?
            .ok_or(AuthError::NotFound("tenant"))
    }

    pub async fn suspend_tenant(&self, tenant_id: Uuid) -> AuthResult<Tenant> {
        self.set_status(tenant_id, TenantStatus::Suspended).await
    }

    pub async fn activate_tenant(&self, tenant_id: Uuid) -> AuthResult<Tenant> {
        self.set_status(tenant_id, TenantStatus::Active).await
    }

    /// Gate for authentication paths. Unknown and suspended tenants look the same.
    pub async fn require_active(&self, tenant_id: Uuid) -> AuthResult<Tenant> {
        match self.tenants.get_tenant(tenant_id).await? {
            Some(tenant) if tenant.is_active() => Ok(tenant),
            Some(_) => {
                tracing::info!(tenant_id = %tenant_id, "Request for suspended tenant rejected");
                Err(AuthError::TenantSuspended)
            }
            None => Err(AuthError::TenantSuspended),
        }
    }

    async fn set_status(&self, tenant_id: Uuid, status: TenantStatus) -> AuthResult<Tenant> {
        if !self
            .tenants
            .set_tenant_status(tenant_id, status.as_str())
            .await?
        {
            return Err(AuthError::NotFound("tenant"));
        }
        tracing::info!(tenant_id = %tenant_id, status = status.as_str(), "Tenant status changed");
        self.get_tenant(tenant_id).await
    }
}
