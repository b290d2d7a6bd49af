//! Password change and reset workflows.

use tracing::{debug, instrument};

use crate::email::{password_reset_message, resend_activation_message};
use crate::error::Error;
use crate::password::{hash_password, validate_policy};
use crate::store::{StoreError, UserStore};
use crate::token::{Purpose, TokenError};

use super::envelope::{CredentialsPayload, Envelope, ErrorEntry, ErrorMap};
use super::guards::{Guard, GuardOutcome};
use super::{AccountService, Caller, normalize_email, valid_email};

impl<S: UserStore> AccountService<S> {
    fn validate_new_password(
        &self,
        new_password: &str,
        new_password_confirm: &str,
    ) -> Option<ErrorMap> {
        let mut errors = ErrorMap::new();
        for violation in validate_policy(new_password, self.config.min_password_length()) {
            errors.push(
                "new_password",
                ErrorEntry::new(violation.message(), violation.code()),
            );
        }
        if new_password != new_password_confirm {
            errors.push("new_password_confirm", ErrorEntry::password_mismatch());
        }
        if errors.is_empty() { None } else { Some(errors) }
    }

    /// Change the caller's password, revoking every refresh credential and
    /// returning a fresh pair.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn password_change(
        &self,
        caller: Caller,
        old_password: &str,
        new_password: &str,
        new_password_confirm: &str,
    ) -> Result<CredentialsPayload, Error> {
        let chain = [
            Guard::Authenticated,
            Guard::Verified,
            Guard::PasswordConfirmed,
        ];
        let user = match self
            .run_guards(caller, &chain, Some(("old_password", old_password)))
            .await?
        {
            GuardOutcome::Proceed(user) => user,
            GuardOutcome::Halt(errors) => return Ok(CredentialsPayload::fail(errors)),
        };

        if let Some(errors) = self.validate_new_password(new_password, new_password_confirm) {
            return Ok(CredentialsPayload::fail(errors));
        }

        let hash =
            hash_password(new_password).map_err(|err| Error::Store(StoreError::Backend(err)))?;
        self.store.set_password_and_revoke(user.id, &hash).await?;
        debug!(user_id = %user.id, "password changed, refresh credentials revoked");

        let (token, refresh) = self.issue_credentials(user.id).await?;
        Ok(CredentialsPayload::ok(Some(token), Some(refresh)))
    }

    /// Send a password-reset token to a primary or secondary address.
    ///
    /// Unknown addresses report success so existence is never leaked; an
    /// unverified account gets its activation email resent instead and the
    /// outcome says so.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn send_password_reset_email(&self, email: &str) -> Result<Envelope, Error> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(Envelope::fail(ErrorMap::field(
                "email",
                ErrorEntry::invalid_email(),
            )));
        }

        let Some(user) = self.store.find_by_any_email(&email).await? else {
            // Report success even when the address is unknown.
            return Ok(Envelope::ok());
        };

        if !user.status.verified {
            let token = self
                .signer()
                .issue(user.id, Purpose::Activation, None)
                .map_err(|err| Error::usage(format!("failed to sign activation token: {err}")))?;
            if !self.deliver(&resend_activation_message(&self.config, &email, &token)) {
                return Ok(Envelope::fail(ErrorMap::non_field(ErrorEntry::email_fail())));
            }
            return Ok(Envelope::fail(ErrorMap::field(
                "email",
                ErrorEntry::not_verified_password_reset(),
            )));
        }

        let token = self
            .signer()
            .issue(user.id, Purpose::PasswordReset, None)
            .map_err(|err| Error::usage(format!("failed to sign reset token: {err}")))?;
        if !self.deliver(&password_reset_message(&self.config, &email, &token)) {
            return Ok(Envelope::fail(ErrorMap::non_field(ErrorEntry::email_fail())));
        }
        Ok(Envelope::ok())
    }

    /// Consume a reset token and set a new password, revoking every refresh
    /// credential.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn password_reset(
        &self,
        token: &str,
        new_password: &str,
        new_password_confirm: &str,
    ) -> Result<Envelope, Error> {
        let payload = match self.signer().consume(
            token,
            Purpose::PasswordReset,
            self.config.password_reset_token_ttl(),
        ) {
            Ok(payload) => payload,
            Err(TokenError::Expired) => {
                return Ok(Envelope::fail(ErrorMap::field(
                    "token",
                    ErrorEntry::expired_token(),
                )));
            }
            Err(_) => {
                return Ok(Envelope::fail(ErrorMap::field(
                    "token",
                    ErrorEntry::invalid_token(),
                )));
            }
        };

        if let Some(errors) = self.validate_new_password(new_password, new_password_confirm) {
            return Ok(Envelope::fail(errors));
        }

        let Some(user) = self.store.find_by_id(payload.sub).await? else {
            // Token for an account that no longer exists.
            return Ok(Envelope::fail(ErrorMap::field(
                "token",
                ErrorEntry::invalid_token(),
            )));
        };

        let hash =
            hash_password(new_password).map_err(|err| Error::Store(StoreError::Backend(err)))?;
        self.store.set_password_and_revoke(user.id, &hash).await?;
        debug!(user_id = %user.id, "password reset, refresh credentials revoked");
        Ok(Envelope::ok())
    }
}
