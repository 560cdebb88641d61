//! Opaque token generation and hashing.
//!
//! Raw tokens only ever leave the process (cookies, forms); storage sees the
//! SHA-256 hex digest.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

pub(crate) const TOKEN_BYTES: usize = 32;

/// Fill `N` bytes from the OS random source.
///
/// Failure of the secure source is fatal for the caller; there is no fallback.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("secure random source unavailable")?;
    Ok(bytes)
}

/// Create a new session token: 32 random bytes, URL-safe base64 without padding.
pub fn generate_token() -> Result<String> {
    let bytes = random_bytes::<TOKEN_BYTES>().context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// SHA-256 hex digest of a token, used as the session id.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn generate_token_is_32_bytes_unpadded() {
        let token = generate_token().ok();
        assert!(token.as_deref().is_some_and(|t| !t.contains('=')));
        let decoded_len = token
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(TOKEN_BYTES));
    }

    #[test]
    fn generate_token_is_unique() {
        let first = generate_token().ok();
        let second = generate_token().ok();
        assert!(first.is_some());
        assert_ne!(first, second);
    }

    #[test]
    fn hash_token_is_stable_hex() {
        let first = hash_token("token");
        let second = hash_token("token");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_token_known_vector() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hash_token_differs_by_one_byte() {
        assert_ne!(hash_token("token-a"), hash_token("token-b"));
    }
}
