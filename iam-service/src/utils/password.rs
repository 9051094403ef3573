use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use secrecy::{ExposeSecret, SecretString};

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(SecretString);

impl Password {
    pub fn new(password: String) -> Self {
        Self(SecretString::new(password))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Newtype for a PHC-encoded password hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Argon2id cost parameters for the current hashing generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl HashParams {
    fn hasher(&self) -> Result<Argon2<'static>, anyhow::Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| anyhow::anyhow!("Invalid argon2 parameters: {}", e))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hash a password using Argon2id with the given parameters.
///
/// Salt is generated per call and, together with the parameters, embedded in
/// the PHC string.
pub fn hash_password(
    password: &Password,
    params: &HashParams,
) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = params
        .hasher()?
        .hash_password(password.expose().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Verify a password against a PHC hash.
///
/// Parameters are read from the record itself so older generations keep
/// verifying. The digest comparison is constant-time. Returns `Ok(false)` on a
/// mismatch and `Err` only when the record cannot be parsed.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<bool, anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    match Argon2::default().verify_password(password.expose().as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e)),
    }
}

/// True when the record was produced by a different algorithm or parameter set.
pub fn needs_rehash(password_hash: &PasswordHashString, current: &HashParams) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash.as_str()) else {
        return true;
    };
    if parsed.algorithm != Algorithm::Argon2id.ident() {
        return true;
    }
    match Params::try_from(&parsed) {
        Ok(p) => {
            p.m_cost() != current.memory_kib
                || p.t_cost() != current.iterations
                || p.p_cost() != current.parallelism
        }
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> HashParams {
        HashParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_hash_password() {
        let password = Password::new("mySecurePassword123".to_string());
        let hash = hash_password(&password, &cheap()).expect("Failed to hash password");

        assert!(hash.as_str().starts_with("$argon2id$"));
        assert!(hash.as_str().contains("m=1024,t=1,p=1"));
    }

    #[test]
    fn test_verify_password() {
        let password = Password::new("mySecurePassword123".to_string());
        let hash = hash_password(&password, &cheap()).expect("Failed to hash password");

        assert!(verify_password(&password, &hash).unwrap());
        let wrong = Password::new("wrongPassword".to_string());
        assert!(!verify_password(&wrong, &hash).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_error() {
        let password = Password::new("x".repeat(12));
        let bogus = PasswordHashString::new("not-a-phc-string".into());
        assert!(verify_password(&password, &bogus).is_err());
    }

    #[test]
    fn test_older_generation_still_verifies() {
        let password = Password::new("mySecurePassword123".to_string());
        let old = hash_password(&password, &cheap()).unwrap();
        let current = HashParams {
            memory_kib: 2048,
            ..cheap()
        };

        assert!(verify_password(&password, &old).unwrap());
        assert!(needs_rehash(&old, &current));
        assert!(!needs_rehash(&old, &cheap()));
    }

    #[test]
    fn test_debug_redacts() {
        let password = Password::new("hunter2hunter2".into());
        assert!(!format!("{:?}", password).contains("hunter2"));
    }
}
