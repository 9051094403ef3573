//! Services layer: the IAM components and the orchestrator built on them.

pub mod api_token;
pub mod auth;
pub mod credentials;
pub mod error;
pub mod jwt;
pub mod metrics;
pub mod mfa;
pub mod password;
pub mod principal;
pub mod rate_limit;
pub mod rbac;
pub mod session;
pub mod tenant;

pub use api_token::{ApiTokenService, ApiTokenSettings, IssueOptions, VerifiedApiToken};
pub use auth::{AuthService, ProfileUpdate, RegisterInput};
pub use credentials::{CredentialStore, FailureOutcome, LockoutPolicy};
pub use error::{AuthError, AuthResult, ErrorKind};
pub use jwt::{AccessClaims, TokenPair, TokenService, TokenSettings};
pub use mfa::{MfaEngine, MfaSettings};
pub use password::{PasswordPolicy, PasswordService};
pub use principal::{Credential, PrincipalResolver};
pub use rate_limit::TokenRateLimiter;
pub use rbac::RbacEvaluator;
pub use session::{SessionRegistry, SessionSettings};
pub use tenant::TenantService;
