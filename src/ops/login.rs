//! Login resolution and session-token operations.

use std::collections::BTreeMap;

use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::error::Error;
use crate::password::verify_password;
use crate::session::hash_refresh_token;
use crate::store::{UserRecord, UserStore};
use crate::token::{Purpose, TokenError};

use super::envelope::{
    CredentialsPayload, Envelope, ErrorEntry, ErrorMap, LoginPayload, RevokedPayload,
    TokenStatusPayload,
};
use super::{AccountService, normalize_email};

impl<S: UserStore> AccountService<S> {
    /// Resolve a login attempt and issue credentials.
    ///
    /// `credentials` must hold exactly two entries: `password` plus one
    /// identifying field from the configured allow-list. Violating that shape
    /// is a programmer error, not a user-facing failure.
    ///
    /// # Errors
    ///
    /// [`Error::Usage`] on arity or allow-list violations; store failures
    /// propagate.
    #[instrument(skip_all)]
    pub async fn token_auth(
        &self,
        credentials: &BTreeMap<String, String>,
    ) -> Result<LoginPayload, Error> {
        if credentials.len() != 2 {
            return Err(Error::usage(format!(
                "must login with password and one of the following fields: {:?}",
                self.config.login_allowed_fields()
            )));
        }
        let password = credentials
            .get("password")
            .ok_or_else(|| Error::usage("login requires a password field"))?;
        let (field, value) = credentials
            .iter()
            .find(|(name, _)| name.as_str() != "password")
            .ok_or_else(|| Error::usage("login requires one identifying field"))?;
        if !self
            .config
            .login_allowed_fields()
            .iter()
            .any(|allowed| allowed == field)
        {
            return Err(Error::usage(format!(
                "field {field} is not in the allowed login fields {:?}",
                self.config.login_allowed_fields()
            )));
        }

        // Emails are stored normalized, so the lookup value must match.
        let value = if field == "email" {
            normalize_email(value)
        } else {
            value.to_string()
        };
        let mut user = self.store.find_by_field(field, &value).await?;
        if user.is_none() && field == "email" && self.config.allow_login_with_secondary_email() {
            user = self.store.find_by_secondary_email(&value).await?;
        }
        let Some(user) = user else {
            // Never reveal which part of the credentials was wrong.
            return Ok(LoginPayload::fail(ErrorMap::non_field(
                ErrorEntry::invalid_credentials(),
            )));
        };

        // Soft-deleted accounts are indistinguishable from unknown ones.
        // Deletion requires a verified caller, so an inactive unverified
        // account is pending verification, not deleted; it falls through to
        // the verification check below.
        if !user.active && !user.status.archived && user.status.verified {
            return Ok(LoginPayload::fail(ErrorMap::non_field(
                ErrorEntry::invalid_credentials(),
            )));
        }

        let password_ok = verify_password(password, &user.password_hash);

        if !user.status.verified && !self.config.allow_login_not_verified() {
            // Distinguish "right password, unverified" from "wrong password"
            // only once the password actually checked out.
            return Ok(LoginPayload::fail(ErrorMap::non_field(if password_ok {
                ErrorEntry::not_verified()
            } else {
                ErrorEntry::invalid_credentials()
            })));
        }

        if !password_ok {
            return Ok(LoginPayload::fail(ErrorMap::non_field(
                ErrorEntry::invalid_credentials(),
            )));
        }

        // Reactivation is gated on the password check above so a guesser can
        // neither mutate state nor learn the account exists.
        let unarchiving = user.status.archived;
        if unarchiving {
            debug!(user_id = %user.id, "reactivating archived account on login");
            self.store.unarchive(user.id).await?;
        }

        let (token, refresh) = self.issue_credentials(user.id).await?;
        self.store
            .record_login(user.id, OffsetDateTime::now_utc())
            .await?;

        Ok(LoginPayload {
            envelope: Envelope::ok(),
            token: Some(token),
            refresh_token: Some(refresh),
            unarchiving,
        })
    }

    /// Verify an access token and report its subject.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    pub async fn verify_token(&self, access_token: &str) -> Result<TokenStatusPayload, Error> {
        match self.signer().consume(
            access_token,
            Purpose::Session,
            self.config.access_token_ttl(),
        ) {
            Ok(payload) => Ok(TokenStatusPayload {
                envelope: Envelope::ok(),
                user_id: Some(payload.sub),
            }),
            Err(TokenError::Expired) => Ok(TokenStatusPayload::fail(ErrorMap::field(
                "token",
                ErrorEntry::expired_token(),
            ))),
            Err(_) => Ok(TokenStatusPayload::fail(ErrorMap::field(
                "token",
                ErrorEntry::invalid_token(),
            ))),
        }
    }

    /// Exchange a refresh credential for a fresh pair, rotating it.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<CredentialsPayload, Error> {
        let now = OffsetDateTime::now_utc();
        let token_hash = hash_refresh_token(refresh_token);

        let Some(credential) = self.store.find_refresh(&token_hash).await? else {
            return Ok(CredentialsPayload::fail(ErrorMap::field(
                "refresh_token",
                ErrorEntry::invalid_token(),
            )));
        };
        if !credential.usable_at(now) {
            return Ok(CredentialsPayload::fail(ErrorMap::field(
                "refresh_token",
                ErrorEntry::invalid_token(),
            )));
        }
        let user: Option<UserRecord> = self.store.find_by_id(credential.user_id).await?;
        let Some(user) = user.filter(|user| user.active) else {
            return Ok(CredentialsPayload::fail(ErrorMap::field(
                "refresh_token",
                ErrorEntry::invalid_token(),
            )));
        };

        // Rotation: the presented credential dies with the exchange.
        self.store.revoke_refresh(&token_hash, now).await?;
        let (token, refresh) = self.issue_credentials(user.id).await?;
        Ok(CredentialsPayload::ok(Some(token), Some(refresh)))
    }

    /// Revoke a refresh credential.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    pub async fn revoke_token(&self, refresh_token: &str) -> Result<RevokedPayload, Error> {
        let now = OffsetDateTime::now_utc();
        let token_hash = hash_refresh_token(refresh_token);
        let Some(credential) = self.store.find_refresh(&token_hash).await? else {
            return Ok(RevokedPayload::fail(ErrorMap::field(
                "refresh_token",
                ErrorEntry::invalid_token(),
            )));
        };
        if credential.revoked_at.is_none() {
            self.store.revoke_refresh(&token_hash, now).await?;
        }
        let revoked_at = credential.revoked_at.unwrap_or(now);
        Ok(RevokedPayload {
            envelope: Envelope::ok(),
            revoked: Some(revoked_at.unix_timestamp()),
        })
    }
}
