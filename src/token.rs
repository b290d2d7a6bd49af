//! Purpose-scoped signed tokens.
//!
//! A token is an opaque `payload_b64.sig_b64` string: the payload is JSON
//! claims (subject, purpose tag, issue time, optional candidate email) and
//! the signature is HMAC-SHA256 over the encoded payload with the
//! process-wide secret. Nothing is persisted; validity derives from the
//! signature plus a purpose-specific max-age checked at consumption time.
//!
//! The purpose tag is a deliberate scope check: every purpose is signed with
//! the same key, so a token minted for activation must not replay against
//! password reset even though its signature verifies.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Workflow a token was minted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Activation,
    PasswordReset,
    SecondaryEmailActivation,
    Session,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("token purpose mismatch")]
    ScopeMismatch,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    action: Purpose,
    iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

/// Claims returned from a successfully consumed token, purpose stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub sub: Uuid,
    pub email: Option<String>,
    pub issued_at: OffsetDateTime,
}

/// Issues and consumes purpose-scoped tokens with a process-wide secret.
#[derive(Clone, Debug)]
pub struct TokenSigner {
    secret: SecretString,
}

impl TokenSigner {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length, so new_from_slice cannot fail here.
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"))
    }

    /// Mint a token for `sub` scoped to `purpose`, optionally carrying a
    /// candidate email as auxiliary payload.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Invalid`] if the claims fail to serialize.
    pub fn issue(
        &self,
        sub: Uuid,
        purpose: Purpose,
        email: Option<&str>,
    ) -> Result<String, TokenError> {
        self.issue_at(sub, purpose, email, OffsetDateTime::now_utc())
    }

    fn issue_at(
        &self,
        sub: Uuid,
        purpose: Purpose,
        email: Option<&str>,
        issued_at: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub,
            action: purpose,
            iat: issued_at.unix_timestamp(),
            email: email.map(str::to_string),
        };
        let payload = serde_json::to_vec(&claims).map_err(|_| TokenError::Invalid)?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);

        let mut mac = self.mac();
        mac.update(payload_b64.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{payload_b64}.{sig_b64}"))
    }

    /// Verify a token and return its claims.
    ///
    /// Checks run in order: signature, purpose scope, age. The scope check is
    /// mandatory even for tokens whose signature and age are fine.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Invalid`] for malformed tokens or bad signatures,
    /// - [`TokenError::ScopeMismatch`] when the purpose tag differs,
    /// - [`TokenError::Expired`] when older than `max_age`.
    pub fn consume(
        &self,
        token: &str,
        expected: Purpose,
        max_age: Duration,
    ) -> Result<TokenPayload, TokenError> {
        self.consume_at(token, expected, max_age, OffsetDateTime::now_utc())
    }

    fn consume_at(
        &self,
        token: &str,
        expected: Purpose,
        max_age: Duration,
        now: OffsetDateTime,
    ) -> Result<TokenPayload, TokenError> {
        let (payload_b64, sig_b64) = token.split_once('.').ok_or(TokenError::Invalid)?;

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::Invalid)?;
        let mut mac = self.mac();
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::Invalid)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Invalid)?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| TokenError::Invalid)?;

        if claims.action != expected {
            return Err(TokenError::ScopeMismatch);
        }

        let issued_at = OffsetDateTime::from_unix_timestamp(claims.iat)
            .map_err(|_| TokenError::Invalid)?;
        if now - issued_at > max_age {
            return Err(TokenError::Expired);
        }

        Ok(TokenPayload {
            sub: claims.sub,
            email: claims.email,
            issued_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(SecretString::from("unit-test-secret".to_string()))
    }

    #[test]
    fn round_trip_preserves_claims() {
        let signer = signer();
        let sub = Uuid::new_v4();
        let token = signer
            .issue(sub, Purpose::Activation, Some("new@example.com"))
            .unwrap();
        let payload = signer
            .consume(&token, Purpose::Activation, Duration::hours(1))
            .unwrap();
        assert_eq!(payload.sub, sub);
        assert_eq!(payload.email.as_deref(), Some("new@example.com"));
    }

    #[test]
    fn scope_mismatch_beats_everything_else() {
        let signer = signer();
        let token = signer
            .issue(Uuid::new_v4(), Purpose::Activation, None)
            .unwrap();
        // Signature and age are both fine; the purpose tag alone must reject.
        let err = signer
            .consume(&token, Purpose::PasswordReset, Duration::days(30))
            .unwrap_err();
        assert_eq!(err, TokenError::ScopeMismatch);
    }

    #[test]
    fn expired_token_is_distinguished() {
        let signer = signer();
        let issued = OffsetDateTime::now_utc() - Duration::hours(2);
        let token = signer
            .issue_at(Uuid::new_v4(), Purpose::PasswordReset, None, issued)
            .unwrap();
        let err = signer
            .consume(&token, Purpose::PasswordReset, Duration::hours(1))
            .unwrap_err();
        assert_eq!(err, TokenError::Expired);
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let signer = signer();
        let token = signer
            .issue(Uuid::new_v4(), Purpose::Activation, None)
            .unwrap();
        let (payload, sig) = token.split_once('.').unwrap();
        let mut payload = payload.to_string();
        payload.replace_range(0..1, if payload.starts_with('A') { "B" } else { "A" });
        let err = signer
            .consume(
                &format!("{payload}.{sig}"),
                Purpose::Activation,
                Duration::hours(1),
            )
            .unwrap_err();
        assert_eq!(err, TokenError::Invalid);
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = signer()
            .issue(Uuid::new_v4(), Purpose::Activation, None)
            .unwrap();
        let other = TokenSigner::new(SecretString::from("other-secret".to_string()));
        let err = other
            .consume(&token, Purpose::Activation, Duration::hours(1))
            .unwrap_err();
        assert_eq!(err, TokenError::Invalid);
    }

    #[test]
    fn garbage_is_invalid() {
        let err = signer()
            .consume("not-a-token", Purpose::Activation, Duration::hours(1))
            .unwrap_err();
        assert_eq!(err, TokenError::Invalid);
    }
}
