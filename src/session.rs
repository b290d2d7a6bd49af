//! Session credential material.
//!
//! Access tokens are Session-purpose signed tokens. Refresh credentials are
//! opaque random values: the raw value is only returned to the caller, the
//! store keeps a SHA-256 hash, so a database leak never yields usable
//! credentials.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

/// Create a new opaque refresh credential value.
///
/// # Errors
///
/// Returns an error if system randomness is unavailable.
pub(crate) fn generate_refresh_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh credential")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a refresh credential so raw values never touch the store.
#[must_use]
pub(crate) fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_decode_to_32_bytes() {
        let decoded_len = generate_refresh_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn hash_is_stable_and_discriminating() {
        let first = hash_refresh_token("token");
        let second = hash_refresh_token("token");
        let different = hash_refresh_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }
}
