pub mod admin;
pub mod api_tokens;
pub mod auth;
pub mod metrics;
pub mod mfa;
pub mod principal;
pub mod sessions;
pub mod users;
