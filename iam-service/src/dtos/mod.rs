pub mod admin;
pub mod auth;

pub use service_core::error::ErrorResponse;
