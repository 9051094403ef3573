//! Hashing, random secrets and at-rest encryption of MFA secrets.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

const NONCE_LEN: usize = 12;

/// Random bytes encoded as unpadded base64url.
pub fn random_secret(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

pub fn sha256_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

pub fn hmac_sha256_hex(key: &[u8], input: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(input);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time equality. Length is not secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Key-encryption key for MFA secrets.
#[derive(Clone)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, anyhow::Error> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| anyhow::anyhow!("MFA encryption key is not hex: {}", e))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("MFA encryption key must be 32 bytes"))?;
        Ok(Self(bytes))
    }

    /// Derive a key from other key material (used when no dedicated key is configured).
    pub fn derive(material: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"iam-mfa-kek:v1|");
        hasher.update(material);
        Self(hasher.finalize().into())
    }

    /// Labelled sub-key for other uses of the same root (e.g. the recovery code pepper).
    pub fn subkey(&self, label: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"iam-subkey:v1|");
        hasher.update(label.as_bytes());
        hasher.update(b"|");
        hasher.update(self.0);
        hasher.finalize().into()
    }

    /// Encrypts with a fresh nonce. Returns `nonce (12 bytes) || ciphertext`.
    ///
    /// The ciphertext is bound to its owner through the AAD, so a row copied to
    /// another user or tenant fails to decrypt.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        tenant_id: Uuid,
        user_id: Uuid,
        device_id: Uuid,
    ) -> Result<Vec<u8>, anyhow::Error> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let aad = aad(tenant_id, user_id, device_id);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| anyhow::anyhow!("Encryption failure: {}", e))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(
        &self,
        data: &[u8],
        tenant_id: Uuid,
        user_id: Uuid,
        device_id: Uuid,
    ) -> Result<Vec<u8>, anyhow::Error> {
        if data.len() <= NONCE_LEN {
            return Err(anyhow::anyhow!("Invalid ciphertext length"));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let aad = aad(tenant_id, user_id, device_id);

        cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|e| anyhow::anyhow!("Decryption failure: {}", e))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

fn aad(tenant_id: Uuid, user_id: Uuid, device_id: Uuid) -> Vec<u8> {
    format!("totp-secret:v1|{}|{}|{}", tenant_id, user_id, device_id).into_bytes()
}
