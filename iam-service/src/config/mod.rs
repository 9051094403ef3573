use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::utils::crypto::SecretKey;
use crate::utils::HashParams;

const MIN_SIGNING_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct IamConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub lockout: LockoutConfig,
    pub mfa: MfaConfig,
    pub api_token: ApiTokenConfig,
    pub session: SessionConfig,
    pub database: DatabaseConfig,
    pub admin_api_key: Option<SecretString>,
    pub rate_limit: RateLimitConfig,
    /// Take the client address from `X-Forwarded-For`. Only set behind a proxy
    /// that overwrites the header.
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub signing_secret: SecretString,
    pub signing_key_id: String,
    /// Verify-only keys as `(kid, secret)`.
    pub previous_keys: Vec<(String, SecretString)>,
    pub key_grace_period: Duration,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct PasswordConfig {
    pub min_length: usize,
    pub max_bytes: usize,
    pub hash: HashParams,
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub max_login_attempts: u32,
    pub lockout_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct MfaConfig {
    pub issuer_label: String,
    pub drift_steps: u8,
    pub encryption_key: SecretKey,
    pub recovery_code_count: usize,
    pub challenge_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct ApiTokenConfig {
    pub default_rps: u32,
    pub bucket_idle_ttl: Duration,
    pub usage_flush_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub sweep_interval: Duration,
    pub touch_interval: Duration,
    pub live_cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub connection_string: Option<SecretString>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
}

impl IamConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_source(common_config, |key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` passes the process environment.
    pub fn from_source<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Source { lookup: &lookup };

        let environment: Environment = env
            .get("ENVIRONMENT", Some("dev"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        // Required in every environment.
        let signing_secret = env.get("JWT_SIGNING_SECRET", None, true)?;

        let encryption_key = match env.optional("MFA_ENCRYPTION_KEY") {
            Some(hex_key) => {
                SecretKey::from_hex(&hex_key).map_err(AppError::ConfigError)?
            }
            None if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "MFA_ENCRYPTION_KEY is required in production but not set"
                )))
            }
            None => SecretKey::derive(signing_secret.as_bytes()),
        };

        let config = IamConfig {
            common,
            environment,
            service_name: env.get("SERVICE_NAME", Some("iam-service"), false)?,
            log_level: env.get("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env.optional("OTLP_ENDPOINT").filter(|s| !s.is_empty()),
            jwt: JwtConfig {
                signing_secret: SecretString::new(signing_secret),
                signing_key_id: env.get("JWT_SIGNING_KEY_ID", Some("k1"), false)?,
                previous_keys: parse_previous_keys(
                    &env.get("JWT_PREVIOUS_SIGNING_SECRETS", Some(""), false)?,
                )?,
                key_grace_period: env.duration("JWT_KEY_GRACE_PERIOD", "1h")?,
                access_ttl: env.duration("JWT_ACCESS_TTL", "1h")?,
                refresh_ttl: env.duration("JWT_REFRESH_TTL", "7d")?,
            },
            password: PasswordConfig {
                min_length: env.number("PASSWORD_MIN_LENGTH", 8)?,
                max_bytes: env.number("PASSWORD_MAX_BYTES", 1024)?,
                hash: HashParams {
                    memory_kib: env.number("PASSWORD_HASH_MEMORY_KIB", HashParams::default().memory_kib)?,
                    iterations: env.number("PASSWORD_HASH_ITERATIONS", HashParams::default().iterations)?,
                    parallelism: env.number("PASSWORD_HASH_PARALLELISM", HashParams::default().parallelism)?,
                },
                workers: env.number("PASSWORD_HASH_WORKERS", default_workers())?,
            },
            lockout: LockoutConfig {
                max_login_attempts: env.number("MAX_LOGIN_ATTEMPTS", 5)?,
                lockout_duration: env.duration("LOCKOUT_DURATION", "15m")?,
            },
            mfa: MfaConfig {
                issuer_label: env.get("MFA_ISSUER_LABEL", Some("IAM"), false)?,
                drift_steps: env.number("MFA_DRIFT_STEPS", 1)?,
                encryption_key,
                recovery_code_count: env.number("MFA_RECOVERY_CODE_COUNT", 10)?,
                challenge_ttl: env.duration("MFA_CHALLENGE_TTL", "5m")?,
            },
            api_token: ApiTokenConfig {
                default_rps: env.number("API_TOKEN_DEFAULT_RPS", 10)?,
                bucket_idle_ttl: env.duration("API_TOKEN_BUCKET_IDLE_TTL", "10m")?,
                usage_flush_interval: env.duration("API_TOKEN_USAGE_FLUSH_INTERVAL", "2s")?,
            },
            session: SessionConfig {
                sweep_interval: env.duration("SESSION_SWEEP_INTERVAL", "60s")?,
                touch_interval: env.duration("SESSION_TOUCH_INTERVAL", "60s")?,
                live_cache_ttl: env.duration("SESSION_LIVE_CACHE_TTL", "5s")?,
            },
            database: DatabaseConfig {
                connection_string: match env.optional("DB_CONNECTION_STRING") {
                    Some(url) => Some(SecretString::new(url)),
                    None if is_prod => {
                        return Err(AppError::ConfigError(anyhow::anyhow!(
                            "DB_CONNECTION_STRING is required in production but not set"
                        )))
                    }
                    None => None,
                },
                max_connections: env.number("DB_MAX_CONNECTIONS", 10)?,
            },
            admin_api_key: match env.optional("ADMIN_API_KEY") {
                Some(key) => Some(SecretString::new(key)),
                None if is_prod => {
                    return Err(AppError::ConfigError(anyhow::anyhow!(
                        "ADMIN_API_KEY is required in production but not set"
                    )))
                }
                None => None,
            },
            rate_limit: RateLimitConfig {
                login_attempts: env.number("RATE_LIMIT_LOGIN_ATTEMPTS", 30)?,
                login_window_seconds: env.number("RATE_LIMIT_LOGIN_WINDOW_SECONDS", 60)?,
                register_attempts: env.number("RATE_LIMIT_REGISTER_ATTEMPTS", 10)?,
                register_window_seconds: env.number("RATE_LIMIT_REGISTER_WINDOW_SECONDS", 3600)?,
            },
            trust_proxy_headers: env.flag("TRUST_PROXY_HEADERS", false)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.signing_secret.expose_secret().len() < MIN_SIGNING_SECRET_BYTES {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SIGNING_SECRET must be at least {} bytes",
                MIN_SIGNING_SECRET_BYTES
            )));
        }

        if self.jwt.access_ttl.is_zero() || self.jwt.refresh_ttl.is_zero() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TTL and JWT_REFRESH_TTL must be positive"
            )));
        }

        if self.mfa.challenge_ttl.is_zero() || self.mfa.challenge_ttl > Duration::from_secs(300) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MFA_CHALLENGE_TTL must be between 1s and 5m"
            )));
        }

        if self.password.min_length == 0 || self.password.min_length > self.password.max_bytes {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASSWORD_MIN_LENGTH must be between 1 and PASSWORD_MAX_BYTES"
            )));
        }

        if self.password.workers == 0 || self.lockout.max_login_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASSWORD_HASH_WORKERS and MAX_LOGIN_ATTEMPTS must be positive"
            )));
        }

        if self.environment == Environment::Prod && self.otlp_endpoint.is_none() {
            tracing::warn!("OTLP_ENDPOINT not set in production; traces stay local");
        }

        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }
}

struct Source<'a, F> {
    lookup: &'a F,
}

impl<F> Source<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn get(&self, key: &str, default: Option<&str>, required: bool) -> Result<String, AppError> {
        match (self.lookup)(key) {
            Some(val) => Ok(val),
            None => match default {
                Some(def) if !required => Ok(def.to_string()),
                _ => Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                ))),
            },
        }
    }

    fn number<T>(&self, key: &str, default: T) -> Result<T, AppError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| {
                AppError::ConfigError(anyhow::anyhow!("{} is not a valid number: {}", key, e))
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, AppError> {
        match (self.lookup)(key).map(|raw| raw.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(raw) => match raw.as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must be true or false",
                    key
                ))),
            },
        }
    }

    fn duration(&self, key: &str, default: &str) -> Result<Duration, AppError> {
        let raw = self.get(key, Some(default), false)?;
        parse_duration(&raw)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Parses `45`, `30s`, `15m`, `1h` or `7d`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", raw))?;
    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(format!("invalid duration unit in '{}'", raw)),
    };
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' overflows", raw))
}

fn parse_previous_keys(raw: &str) -> Result<Vec<(String, SecretString)>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (kid, secret) = entry.split_once('=').ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!(
                    "JWT_PREVIOUS_SIGNING_SECRETS entries must be kid=secret"
                ))
            })?;
            Ok((kid.trim().to_string(), SecretString::new(secret.trim().to_string())))
        })
        .collect()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
