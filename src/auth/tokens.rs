//! Confirmation token primitives
//!
//! # Algorithms
//!
//! - **Token**: 32 bytes from the OS RNG, base64url without padding (43 chars)
//! - **Salted hash**: Argon2id over the token with a per-token random salt,
//!   32-byte output rendered as lowercase hex
//! - **Lookup hash**: SHA-256 of the token, lowercase hex. Deterministic, so it
//!   can be indexed; it reveals nothing useful because tokens carry 256 bits
//!   of entropy.
//!
//! The raw token is only ever handed to the email transport. Storage sees
//! `hash`, `salt` and `lookup_hash`.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::types::{Result, WaitlistError};

// =============================================================================
// Constants
// =============================================================================

/// Random bytes per token (256 bits)
pub const TOKEN_BYTES: usize = 32;

/// Tokens shorter than this are rejected without a lookup
pub const MIN_TOKEN_LEN: usize = 20;

/// Random bytes per salt
pub const SALT_BYTES: usize = 16;

/// Argon2id memory cost in KiB. Tokens are full-entropy, so the KDF only has
/// to make a stolen hash useless, not resist dictionary attacks.
pub const ARGON2_MEMORY_KB: u32 = 4096;

/// Argon2id iteration count
pub const ARGON2_ITERATIONS: u32 = 2;

/// Argon2id parallelism
pub const ARGON2_PARALLELISM: u32 = 1;

/// Salted hash output length in bytes (64 hex chars)
pub const HASH_LEN: usize = 32;

// =============================================================================
// Token generation and hashing
// =============================================================================

/// Hashed form of a confirmation token, as persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHash {
    pub hash: String,
    pub salt: String,
    pub lookup_hash: String,
}

/// Generate a URL-safe confirmation token.
pub fn generate_token() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; TOKEN_BYTES]);
    OsRng.fill_bytes(&mut *bytes);
    Zeroizing::new(URL_SAFE_NO_PAD.encode(&*bytes))
}

fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Deterministic, unsalted digest of a token used as the index key
pub fn lookup_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Hash a token with `salt`, or with a fresh salt when `None`.
pub fn hash_token(token: &str, salt: Option<&str>) -> Result<TokenHash> {
    let salt = match salt {
        Some(s) => s.to_string(),
        None => generate_salt(),
    };

    let params = Params::new(
        ARGON2_MEMORY_KB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(HASH_LEN),
    )
    .map_err(|e| WaitlistError::Internal(format!("Invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; HASH_LEN]);
    argon2
        .hash_password_into(token.as_bytes(), salt.as_bytes(), &mut *output)
        .map_err(|e| WaitlistError::Internal(format!("Token hashing failed: {e}")))?;

    Ok(TokenHash {
        hash: hex::encode(&*output),
        salt,
        lookup_hash: lookup_hash(token),
    })
}

/// Compare two strings without leaking where they first differ.
///
/// A length mismatch returns false; the lengths themselves are not secret.
pub fn constant_time_equals(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// =============================================================================
// Email helpers
// =============================================================================

/// Record key for a normalized email: hex SHA-256 of `secret || 0x00 || email`
pub fn email_hash(secret: &str, normalized_email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized_email.as_bytes());
    hex::encode(hasher.finalize())
}

/// Leading characters of a hash, enough to correlate log lines
pub fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Mask an email for display: `alice@example.com` -> `a***e@example.com`
pub fn mask_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return "***".to_string();
    };

    let chars: Vec<char> = local.chars().collect();
    let masked_local = match chars.len() {
        0 => "***".to_string(),
        1 | 2 => format!("{}***", chars[0]),
        n => format!("{}***{}", chars[0], chars[n - 1]),
    };

    format!("{masked_local}@{domain}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(*generate_token(), *token);
    }

    #[test]
    fn test_hash_is_hex_and_salted() {
        let token = generate_token();
        let first = hash_token(&token, None).unwrap();
        let second = hash_token(&token, None).unwrap();

        assert_eq!(first.hash.len(), 64);
        assert!(first.hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(first.salt.len(), SALT_BYTES * 2);

        // Different salts, different hashes, same lookup hash
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.hash, second.hash);
        assert_eq!(first.lookup_hash, second.lookup_hash);
    }

    #[test]
    fn test_hash_reproducible_with_salt() {
        let token = generate_token();
        let original = hash_token(&token, None).unwrap();
        let again = hash_token(&token, Some(&original.salt)).unwrap();
        assert_eq!(original, again);

        let other = hash_token("a-completely-different-token", Some(&original.salt)).unwrap();
        assert!(!constant_time_equals(&original.hash, &other.hash));
    }

    #[test]
    fn test_constant_time_equals() {
        assert!(constant_time_equals("abc", "abc"));
        assert!(!constant_time_equals("abc", "abd"));
        assert!(!constant_time_equals("abc", "abcd"));
        assert!(constant_time_equals("", ""));
    }

    #[test]
    fn test_email_hash_depends_on_secret() {
        let a = email_hash("one", "a@b.com");
        assert_eq!(a, email_hash("one", "a@b.com"));
        assert_ne!(a, email_hash("two", "a@b.com"));
        assert_ne!(a, email_hash("one", "b@b.com"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("alice@example.com"), "a***e@example.com");
        assert_eq!(mask_email("al@example.com"), "a***@example.com");
        assert_eq!(mask_email("not-an-email"), "***");
    }
}
