//! Tenant model - the isolation boundary every IAM entity belongs to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Tenant status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
        }
    }
}

/// Tenant entity.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub status_code: String,
    pub created_utc: DateTime<Utc>,
}

impl Tenant {
    pub fn new(tenant_name: String, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            tenant_name,
            status_code: TenantStatus::Active.as_str().to_string(),
            created_utc: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status_code == TenantStatus::Active.as_str()
    }
}
