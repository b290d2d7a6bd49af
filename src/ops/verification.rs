//! Email verification and the secondary-email workflow.

use tracing::{debug, instrument};

use crate::email::{resend_activation_message, secondary_email_activation_message};
use crate::error::Error;
use crate::store::{StoreError, UserStore};
use crate::token::{Purpose, TokenError};

use super::envelope::{Envelope, ErrorEntry, ErrorMap};
use super::guards::{Guard, GuardOutcome};
use super::{AccountService, Caller, normalize_email, valid_email};

const CONFIRM_CHAIN: [Guard; 3] = [
    Guard::Authenticated,
    Guard::Verified,
    Guard::PasswordConfirmed,
];

impl<S: UserStore> AccountService<S> {
    /// Consume an activation token and mark the account verified.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn verify_account(&self, token: &str) -> Result<Envelope, Error> {
        let payload = match self.signer().consume(
            token,
            Purpose::Activation,
            self.config.activation_token_ttl(),
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

        match self.store.verify(payload.sub).await {
            Ok(()) => {
                debug!(user_id = %payload.sub, "account verified");
                Ok(Envelope::ok())
            }
            Err(StoreError::AlreadyVerified) => Ok(Envelope::fail(ErrorMap::non_field(
                ErrorEntry::already_verified(),
            ))),
            // A valid token for a vanished account reads as invalid.
            Err(StoreError::NotFound) => Ok(Envelope::fail(ErrorMap::field(
                "token",
                ErrorEntry::invalid_token(),
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Resend the activation email.
    ///
    /// Unknown addresses report success so existence is never leaked.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn resend_activation_email(&self, email: &str) -> Result<Envelope, Error> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(Envelope::fail(ErrorMap::field(
                "email",
                ErrorEntry::invalid_email(),
            )));
        }

        let Some(user) = self.store.find_by_any_email(&email).await? else {
            return Ok(Envelope::ok());
        };
        if user.status.verified {
            return Ok(Envelope::fail(ErrorMap::field(
                "email",
                ErrorEntry::already_verified(),
            )));
        }

        let token = self
            .signer()
            .issue(user.id, Purpose::Activation, None)
            .map_err(|err| Error::usage(format!("failed to sign activation token: {err}")))?;
        if !self.deliver(&resend_activation_message(&self.config, &email, &token)) {
            return Ok(Envelope::fail(ErrorMap::non_field(ErrorEntry::email_fail())));
        }
        Ok(Envelope::ok())
    }

    /// Mint a secondary-email activation token and send it to the candidate
    /// address.
    ///
    /// The candidate address is carried in the token payload and reserved
    /// nowhere until the token is consumed.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn send_secondary_email_activation(
        &self,
        caller: Caller,
        candidate_email: &str,
        password: &str,
    ) -> Result<Envelope, Error> {
        let user = match self
            .run_guards(caller, &CONFIRM_CHAIN, Some(("password", password)))
            .await?
        {
            GuardOutcome::Proceed(user) => user,
            GuardOutcome::Halt(errors) => return Ok(Envelope::fail(errors)),
        };

        let candidate = normalize_email(candidate_email);
        if !valid_email(&candidate) {
            return Ok(Envelope::fail(ErrorMap::field(
                "email",
                ErrorEntry::invalid_email(),
            )));
        }
        if !self.store.email_is_free(&candidate).await? {
            return Ok(Envelope::fail(ErrorMap::field(
                "email",
                ErrorEntry::email_in_use(),
            )));
        }

        let token = self
            .signer()
            .issue(user.id, Purpose::SecondaryEmailActivation, Some(&candidate))
            .map_err(|err| Error::usage(format!("failed to sign activation token: {err}")))?;
        if !self.deliver(&secondary_email_activation_message(
            &self.config,
            &candidate,
            &token,
        )) {
            return Ok(Envelope::fail(ErrorMap::non_field(ErrorEntry::email_fail())));
        }
        Ok(Envelope::ok())
    }

    /// Consume a secondary-email activation token and set the address.
    ///
    /// Availability is re-checked at consumption time, closing most of the
    /// race window left open since minting.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn verify_secondary_email(&self, token: &str) -> Result<Envelope, Error> {
        let payload = match self.signer().consume(
            token,
            Purpose::SecondaryEmailActivation,
            self.config.secondary_email_token_ttl(),
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
        let Some(candidate) = payload.email else {
            return Ok(Envelope::fail(ErrorMap::field(
                "token",
                ErrorEntry::invalid_token(),
            )));
        };

        if !self.store.email_is_free(&candidate).await? {
            return Ok(Envelope::fail(ErrorMap::field(
                "email",
                ErrorEntry::email_in_use(),
            )));
        }

        match self.store.set_secondary_email(payload.sub, &candidate).await {
            Ok(()) => {
                debug!(user_id = %payload.sub, "secondary email verified");
                Ok(Envelope::ok())
            }
            Err(StoreError::Duplicate { .. }) => Ok(Envelope::fail(ErrorMap::field(
                "email",
                ErrorEntry::email_in_use(),
            ))),
            Err(StoreError::NotFound) => Ok(Envelope::fail(ErrorMap::field(
                "token",
                ErrorEntry::invalid_token(),
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Atomically exchange primary and secondary email.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn swap_emails(&self, caller: Caller, password: &str) -> Result<Envelope, Error> {
        let user = match self
            .run_guards(caller, &CONFIRM_CHAIN, Some(("password", password)))
            .await?
        {
            GuardOutcome::Proceed(user) => user,
            GuardOutcome::Halt(errors) => return Ok(Envelope::fail(errors)),
        };

        match self.store.swap_emails(user.id).await {
            Ok(()) => Ok(Envelope::ok()),
            Err(StoreError::NoSecondaryEmail) => Ok(Envelope::fail(ErrorMap::non_field(
                ErrorEntry::no_secondary_email(),
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Clear the secondary email.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn remove_secondary_email(
        &self,
        caller: Caller,
        password: &str,
    ) -> Result<Envelope, Error> {
        let user = match self
            .run_guards(caller, &CONFIRM_CHAIN, Some(("password", password)))
            .await?
        {
            GuardOutcome::Proceed(user) => user,
            GuardOutcome::Halt(errors) => return Ok(Envelope::fail(errors)),
        };

        match self.store.remove_secondary_email(user.id).await {
            Ok(()) => Ok(Envelope::ok()),
            Err(StoreError::NoSecondaryEmail) => Ok(Envelope::fail(ErrorMap::non_field(
                ErrorEntry::no_secondary_email(),
            ))),
            Err(err) => Err(err.into()),
        }
    }
}
