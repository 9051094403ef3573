//! Token service: HS256 access tokens with a rotating key ring and opaque
//! single-use refresh tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey,
    EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::services::error::{AuthError, AuthResult};
use crate::utils::crypto::{constant_time_eq, random_secret, sha256_hex};

pub const ACCESS_TOKEN_TYPE: &str = "access";
const REFRESH_SECRET_BYTES: usize = 32;

/// Claims carried by every access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Tenant ID
    pub tid: Uuid,
    /// Session ID
    pub sid: Uuid,
    /// Role names at issuance
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: String,
}

/// Token pair returned to the client.
#[derive(Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub session_id: Uuid,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// A freshly minted refresh token: the wire form goes to the client, the hash to the store.
pub struct MintedRefresh {
    pub token: String,
    pub token_hash: String,
}

/// Refresh token as presented by a client: `<tenant>.<record id>.<secret>`.
pub struct PresentedRefresh {
    pub tenant_id: Uuid,
    pub token_id: Uuid,
    secret: SecretString,
}

impl PresentedRefresh {
    /// Constant-time comparison of the presented secret against a stored hash.
    pub fn matches(&self, stored_hash: &str) -> bool {
        let presented = sha256_hex(self.secret.expose_secret().as_bytes());
        constant_time_eq(presented.as_bytes(), stored_hash.as_bytes())
    }
}

struct SigningKey {
    kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    /// When the key stopped signing. `None` for the active key.
    retired_utc: Option<DateTime<Utc>>,
}

impl SigningKey {
    fn new(kid: String, secret: &[u8], retired_utc: Option<DateTime<Utc>>) -> Self {
        Self {
            kid,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            retired_utc,
        }
    }
}

struct KeySet {
    active: Arc<SigningKey>,
    previous: Vec<Arc<SigningKey>>,
}

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub key_grace_period: Duration,
}

/// Mints and verifies credentials.
///
/// The key set is swapped atomically on rotation; readers clone the `Arc` and
/// never hold the lock across signing or verification.
#[derive(Clone)]
pub struct TokenService {
    keys: Arc<RwLock<Arc<KeySet>>>,
    settings: TokenSettings,
    clock: SharedClock,
}

impl TokenService {
    pub fn new(
        active_kid: &str,
        active_secret: &SecretString,
        previous: &[(String, SecretString)],
        settings: TokenSettings,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        let active = Arc::new(SigningKey::new(
            active_kid.to_string(),
            active_secret.expose_secret().as_bytes(),
            None,
        ));
        let previous = previous
            .iter()
            .map(|(kid, secret)| {
                Arc::new(SigningKey::new(
                    kid.clone(),
                    secret.expose_secret().as_bytes(),
                    Some(now),
                ))
            })
            .collect();

        tracing::info!(kid = %active_kid, "Token service initialized with HS256 key ring");

        Self {
            keys: Arc::new(RwLock::new(Arc::new(KeySet { active, previous }))),
            settings,
            clock,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.settings.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.settings.refresh_ttl
    }

    fn key_set(&self) -> Arc<KeySet> {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Publishes a new active key. The old one keeps verifying for the grace period.
    pub fn rotate_keys(&self, new_kid: &str, new_secret: &SecretString) {
        let now = self.clock.now();
        let grace = self.settings.key_grace_period;
        let mut guard = self.keys.write().unwrap_or_else(|e| e.into_inner());
        let current = guard.clone();

        let retired = Arc::new(SigningKey {
            kid: current.active.kid.clone(),
            encoding: current.active.encoding.clone(),
            decoding: current.active.decoding.clone(),
            retired_utc: Some(now),
        });
        let mut previous: Vec<Arc<SigningKey>> = current
            .previous
            .iter()
            .filter(|k| k.retired_utc.is_some_and(|r| now < r + grace))
            .cloned()
            .collect();
        previous.insert(0, retired);

        *guard = Arc::new(KeySet {
            active: Arc::new(SigningKey::new(
                new_kid.to_string(),
                new_secret.expose_secret().as_bytes(),
                None,
            )),
            previous,
        });
        tracing::info!(kid = %new_kid, "Signing key rotated");
    }

    pub fn mint_access(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        session_id: Uuid,
        roles: Vec<String>,
    ) -> AuthResult<String> {
        let now = self.clock.now();
        let claims = AccessClaims {
            sub: user_id,
            tid: tenant_id,
            sid: session_id,
            roles,
            iat: now.timestamp(),
            exp: (now + self.settings.access_ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
            typ: ACCESS_TOKEN_TYPE.to_string(),
        };

        let keys = self.key_set();
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(keys.active.kid.clone());

        encode(&header, &claims, &keys.active.encoding)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }

    /// Checks signature, `typ` and expiry (against the injected clock).
    pub fn verify_access(&self, token: &str) -> AuthResult<AccessClaims> {
        let header = decode_header(token).map_err(|_| AuthError::TokenMalformed)?;
        if header.alg != Algorithm::HS256 {
            return Err(AuthError::TokenMalformed);
        }
        let kid = header.kid.ok_or(AuthError::TokenMalformed)?;

        let now = self.clock.now();
        let keys = self.key_set();
        let key = std::iter::once(&keys.active)
            .chain(keys.previous.iter())
            .find(|k| k.kid == kid)
            .filter(|k| {
                k.retired_utc
                    .is_none_or(|r| now < r + self.settings.key_grace_period)
            })
            .ok_or(AuthError::TokenSignatureInvalid)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<AccessClaims>(token, &key.decoding, &validation).map_err(|e| {
            match e.kind() {
                JwtErrorKind::InvalidSignature => AuthError::TokenSignatureInvalid,
                _ => AuthError::TokenMalformed,
            }
        })?;
        let claims = data.claims;

        if claims.typ != ACCESS_TOKEN_TYPE {
            return Err(AuthError::TokenTypeMismatch);
        }
        if now.timestamp() >= claims.exp {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }

    pub fn mint_refresh(&self, tenant_id: Uuid, token_id: Uuid) -> MintedRefresh {
        let secret = random_secret(REFRESH_SECRET_BYTES);
        MintedRefresh {
            token: format!("{}.{}.{}", tenant_id.simple(), token_id.simple(), secret),
            token_hash: sha256_hex(secret.as_bytes()),
        }
    }

    pub fn parse_refresh(&self, token: &str) -> AuthResult<PresentedRefresh> {
        let mut parts = token.trim().splitn(3, '.');
        let (Some(tenant), Some(id), Some(secret)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::TokenMalformed);
        };
        let tenant_id = Uuid::try_parse(tenant).map_err(|_| AuthError::TokenMalformed)?;
        let token_id = Uuid::try_parse(id).map_err(|_| AuthError::TokenMalformed)?;
        if secret.len() < 43 || secret.contains('.') {
            return Err(AuthError::TokenMalformed);
        }
        Ok(PresentedRefresh {
            tenant_id,
            token_id,
            secret: SecretString::new(secret.to_string()),
        })
    }

    pub fn refresh_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.settings.refresh_ttl
    }
}
