//! Recovery code generation and hashing.

use rand::{rngs::OsRng, Rng};

use super::crypto::hmac_sha256_hex;

/// Lowercase alphanumerics without look-alikes (0/o, 1/l/i).
const ALPHABET: &[u8] = b"23456789abcdefghjkmnpqrstuvwxyz";
const GROUPS: usize = 3;
const GROUP_LEN: usize = 4;

/// `xxxx-xxxx-xxxx`, roughly 59 bits of entropy.
pub fn generate_code() -> String {
    let mut rng = OsRng;
    (0..GROUPS)
        .map(|_| {
            (0..GROUP_LEN)
                .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
}

pub fn generate_codes(count: usize) -> Vec<String> {
    (0..count).map(|_| generate_code()).collect()
}

/// Strip separators and whitespace, lowercase. Users retype these by hand.
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Keyed hash of the normalized code.
pub fn hash_code(pepper: &[u8], code: &str) -> Result<String, anyhow::Error> {
    hmac_sha256_hex(pepper, normalize(code).as_bytes())
}

/// Shape check so arbitrary input never reaches the hash comparison loop.
pub fn looks_like_code(input: &str) -> bool {
    let n = normalize(input);
    n.len() == GROUPS * GROUP_LEN && n.bytes().all(|b| ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_have_expected_shape() {
        let codes = generate_codes(10);
        assert_eq!(codes.len(), 10);
        for code in &codes {
            assert_eq!(code.len(), 14);
            assert!(looks_like_code(code));
        }
    }

    #[test]
    fn hash_ignores_formatting() {
        let pepper = b"pepper";
        let code = "abcd-efgh-jkmn";
        assert_eq!(
            hash_code(pepper, code).unwrap(),
            hash_code(pepper, " ABCD efgh-JKMN ").unwrap()
        );
        assert_ne!(
            hash_code(pepper, code).unwrap(),
            hash_code(b"other", code).unwrap()
        );
    }

    #[test]
    fn totp_codes_are_not_recovery_codes() {
        assert!(!looks_like_code("123456"));
    }
}
