// src/core/registry/token.rs

//! Registration secret minting and verification.
//!
//! Secrets are 32 random bytes, base64url-encoded. Only the hex-encoded
//! SHA-256 of a secret is ever persisted; verification compares raw digests in
//! constant time.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Mints a fresh registration secret.
pub fn mint_secret() -> String {
    let raw: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(raw)
}

/// The stored form of a secret: hex-encoded SHA-256.
pub fn token_hash(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Verifies a presented token against a stored hash.
///
/// Runs in time independent of the position of the first differing byte.
pub fn matches_token(stored_hash_hex: &str, presented: &str) -> bool {
    let Ok(stored) = hex::decode(stored_hash_hex) else {
        return false;
    };
    let presented_digest = Sha256::digest(presented.as_bytes());
    constant_time_eq(&stored, presented_digest.as_slice())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_secrets_are_unique_and_urlsafe() {
        let a = mint_secret();
        let b = mint_secret();
        assert_ne!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
        // 32 bytes of entropy survive the encoding round trip.
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn hash_round_trip() {
        let secret = mint_secret();
        let hash = token_hash(&secret);
        assert!(matches_token(&hash, &secret));
        assert!(!matches_token(&hash, "not-the-secret"));
    }

    #[test]
    fn malformed_stored_hash_never_matches() {
        assert!(!matches_token("zz-not-hex", "anything"));
        assert!(!matches_token("", "anything"));
    }
}
