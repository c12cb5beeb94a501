//! Credential primitives: password hashing, opaque-token hashing, and
//! JWT sign/parse. Kept free of any repository or HTTP concern so it can
//! be unit-tested in isolation.

use std::time::{SystemTime, UNIX_EPOCH};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use hearth_protocol::Claims;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Passwords longer than this are rejected *before* they reach the KDF,
/// so an attacker can't use an enormous password to burn CPU.
pub const MAX_PASSWORD_BYTES: usize = 128;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("password exceeds {MAX_PASSWORD_BYTES} bytes")]
    PasswordTooLong,
    #[error("password hashing failed: {0}")]
    HashFailed(String),
    #[error("stored password hash is malformed: {0}")]
    HashParseFailed(String),
    #[error("token signing failed: {0}")]
    SignFailed(String),
    #[error("token is invalid or expired")]
    TokenInvalid,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Hash a password with Argon2id. Rejects oversized input before doing
/// any KDF work.
pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(CryptoError::PasswordTooLong);
    }
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CryptoError::HashFailed(e.to_string()))
}

/// Verify a password against a stored PHC hash.
///
/// A malformed hash (`HashParseFailed`) is a distinct, internal-error
/// condition from a correctly-parsed hash that simply doesn't match
/// (`Ok(false)`) — callers must map the former to a 500 and the latter
/// to the same 401 used for "user not found", so the two never leak
/// which case occurred.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, CryptoError> {
    if password.len() > MAX_PASSWORD_BYTES {
        return Ok(false);
    }
    let parsed = PasswordHash::new(hash).map_err(|e| CryptoError::HashParseFailed(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Keyless cryptographic hash used to store refresh/panel tokens at
/// rest without persisting the raw secret.
pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// 256 bits of CSPRNG output, hex-encoded. Reads from the OS CSPRNG,
/// which never blocks long enough to matter for a request handler.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Same shape, used for tickets and as a general-purpose random hex
/// token generator so the gateway has one audited source of randomness.
pub fn generate_random_hex(n_bytes: usize) -> String {
    let mut bytes = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a fresh HMAC secret for JWT signing (used when no
/// `jwt_secret` is configured).
pub fn generate_secret() -> String {
    generate_random_hex(32)
}

pub fn generate_access_token(
    user_id: &str,
    role: hearth_protocol::Role,
    secret: &str,
    ttl_minutes: u64,
) -> Result<String, CryptoError> {
    let now = unix_now();
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        iat: now,
        exp: now + ttl_minutes * 60,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| CryptoError::SignFailed(e.to_string()))
}

pub fn parse_token(token: &str, secret: &str) -> Result<Claims, CryptoError> {
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|_| CryptoError::TokenInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_protocol::Role;

    #[test]
    fn password_roundtrip() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
        assert!(!verify_password("wrong password", &hash).unwrap());
    }

    #[test]
    fn password_too_long_is_rejected_before_kdf() {
        let long = "a".repeat(MAX_PASSWORD_BYTES + 1);
        assert!(matches!(
            hash_password(&long),
            Err(CryptoError::PasswordTooLong)
        ));
    }

    #[test]
    fn verify_malformed_hash_is_distinct_from_mismatch() {
        assert!(matches!(
            verify_password("x", "not-a-phc-hash"),
            Err(CryptoError::HashParseFailed(_))
        ));
    }

    #[test]
    fn token_hash_is_deterministic_and_keyless() {
        let raw = "some-refresh-token";
        assert_eq!(hash_token(raw), hash_token(raw));
        assert_ne!(hash_token(raw), raw);
    }

    #[test]
    fn refresh_token_is_64_hex_chars_and_unique() {
        let a = generate_refresh_token();
        let b = generate_refresh_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn jwt_roundtrip() {
        let secret = "test-secret";
        let token = generate_access_token("user-1", Role::User, secret, 15).unwrap();
        let claims = parse_token(&token, secret).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn jwt_rejects_wrong_secret() {
        let token = generate_access_token("user-1", Role::User, "secret-a", 15).unwrap();
        assert!(parse_token(&token, "secret-b").is_err());
    }

    #[test]
    fn jwt_rejects_garbage() {
        assert!(parse_token("not.a.token", "secret").is_err());
    }
}
