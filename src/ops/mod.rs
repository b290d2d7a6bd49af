//! Operation surface: the mutation entry points and their shared machinery.
//!
//! Every state-changing operation runs the same way: validate input shape,
//! run the guard chain, execute domain logic against the store and token
//! service, and wrap the outcome in the uniform envelope. Domain failures
//! become `success=false` envelopes; backend failures and API misuse
//! propagate as hard errors.

pub mod account;
pub mod envelope;
pub mod guards;
pub mod login;
pub mod password;
pub mod register;
pub mod verification;

use std::sync::Arc;

use regex::Regex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::email::EmailSender;
use crate::error::Error;
use crate::fields::{self, FieldSpec};
use crate::session;
use crate::store::{RefreshCredential, UserStore};
use crate::token::{Purpose, TokenSigner};

pub use envelope::{
    CredentialsPayload, Envelope, ErrorEntry, ErrorMap, LoginPayload, NON_FIELD_ERRORS,
    RevokedPayload, TokenStatusPayload,
};

/// The authenticated (or not) caller of an operation, resolved by the
/// transport from a session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User(Uuid),
}

/// The account state machine and token-mediated workflow engine.
pub struct AccountService<S> {
    store: S,
    sender: Arc<dyn EmailSender>,
    signer: TokenSigner,
    config: AuthConfig,
    register_fields: Vec<FieldSpec>,
    update_fields: Vec<FieldSpec>,
}

impl<S: UserStore> AccountService<S> {
    /// Build the engine; field descriptors are compiled here, once.
    #[must_use]
    pub fn new(store: S, sender: Arc<dyn EmailSender>, config: AuthConfig) -> Self {
        let register_fields = fields::compile(
            config.register_required_fields(),
            config.register_optional_fields(),
        );
        let update_fields = fields::compile(&[], config.update_fields());
        let signer = TokenSigner::new(config.secret().clone());
        Self {
            store,
            sender,
            signer,
            config,
            register_fields,
            update_fields,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve a session token into a caller for the guard chain.
    ///
    /// Invalid or expired tokens resolve to [`Caller::Anonymous`]; transports
    /// decide whether that is a 401 or a pass-through.
    #[must_use]
    pub fn authenticate(&self, access_token: &str) -> Caller {
        match self.signer.consume(
            access_token,
            Purpose::Session,
            self.config.access_token_ttl(),
        ) {
            Ok(payload) => Caller::User(payload.sub),
            Err(_) => Caller::Anonymous,
        }
    }

    /// Issue a fresh access token and refresh credential for the account.
    pub(crate) async fn issue_credentials(&self, user_id: Uuid) -> Result<(String, String), Error> {
        let access = self
            .signer
            .issue(user_id, Purpose::Session, None)
            .map_err(|err| Error::usage(format!("failed to sign access token: {err}")))?;
        let refresh = session::generate_refresh_token()
            .map_err(crate::store::StoreError::Backend)
            .map_err(Error::Store)?;
        let now = OffsetDateTime::now_utc();
        self.store
            .insert_refresh(RefreshCredential {
                user_id,
                token_hash: session::hash_refresh_token(&refresh),
                issued_at: now,
                expires_at: now + self.config.refresh_token_ttl(),
                revoked_at: None,
            })
            .await?;
        Ok((access, refresh))
    }

    pub(crate) fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Hand a message to the delivery collaborator; failures are logged and
    /// reported to the caller as `email_fail`, never a rollback.
    pub(crate) fn deliver(&self, message: &crate::email::EmailMessage) -> bool {
        match self.sender.send(message) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(to_email = %message.to_email, "failed to send email: {err:?}");
                false
            }
        }
    }
}

/// Normalize an email for lookup and uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }
}
