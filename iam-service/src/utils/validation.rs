use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use unicode_normalization::UnicodeNormalization;
use validator::Validate;

pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e)))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

const MAX_EMAIL_LEN: usize = 254;

/// Normalize an email for lookup and uniqueness: trim, Unicode NFC, lowercase.
///
/// Returns `None` when the result is not shaped like `local@domain`.
pub fn normalize_email(raw: &str) -> Option<String> {
    let normalized: String = raw.trim().nfc().collect::<String>().to_lowercase();
    if normalized.is_empty() || normalized.len() > MAX_EMAIL_LEN {
        return None;
    }
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || normalized.chars().any(char::is_whitespace)
    {
        return None;
    }
    Some(normalized)
}

/// Usernames: 3-64 chars of `[a-z0-9_.-]` after lowercasing.
pub fn normalize_username(raw: &str) -> Option<String> {
    let username = raw.trim().to_lowercase();
    let valid = (3..=64).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'));
    valid.then_some(username)
}

/// Derive a username from the email's local part when none is supplied.
pub fn username_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let mut username: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .to_lowercase();
    while username.len() < 3 {
        username.push('_');
    }
    username.truncate(64);
    username
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_case_folded_and_composed() {
        assert_eq!(
            normalize_email("  Alice@Example.COM ").as_deref(),
            Some("alice@example.com")
        );
        // "e" + combining acute composes to U+00E9.
        let decomposed = "jose\u{0301}@example.com";
        assert_eq!(
            normalize_email(decomposed).as_deref(),
            Some("jos\u{e9}@example.com")
        );
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for bad in ["", "alice", "@example.com", "alice@", "alice@localhost", "a b@example.com", "a@b@c.com"] {
            assert!(normalize_email(bad).is_none(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn username_rules() {
        assert_eq!(normalize_username("Alice_01").as_deref(), Some("alice_01"));
        assert!(normalize_username("ab").is_none());
        assert!(normalize_username("has space").is_none());
        assert_eq!(username_from_email("a+b@example.com"), "ab_");
    }
}
