//! Domain models for the IAM core.

pub mod api_token;
pub mod mfa;
pub mod permission;
pub mod principal;
pub mod refresh_token;
pub mod role;
pub mod session;
pub mod tenant;
pub mod user;

pub use api_token::{ApiToken, ApiTokenCreated, ApiTokenInfo, ApiTokenUsage};
pub use mfa::{MfaChallenge, MfaChallengeTicket, MfaDevice, MfaEnrollment, MfaMethod, RecoveryCode};
pub use permission::Permission;
pub use principal::{AuthType, Principal};
pub use refresh_token::RefreshTokenRecord;
pub use role::{Role, RoleBinding, ROLE_ADMIN, ROLE_MANAGER, ROLE_MEMBER, ROLE_VIEWER};
pub use session::{DeviceInfo, RevocationReason, Session, SessionInfo};
pub use tenant::{Tenant, TenantStatus};
pub use user::{User, UserResponse};
