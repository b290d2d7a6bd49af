//! Account registration.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::email::activation_message;
use crate::error::Error;
use crate::fields::{self, FieldIssue};
use crate::password::{hash_password, validate_policy};
use crate::store::{NewUser, StoreError, UserStore};
use crate::token::Purpose;

use super::envelope::{CredentialsPayload, ErrorEntry, ErrorMap};
use super::{AccountService, normalize_email, valid_email};

/// Registration input: configured identity fields plus the password pair.
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub fields: BTreeMap<String, String>,
    pub password: String,
    pub password_confirm: String,
}

impl<S: UserStore> AccountService<S> {
    /// Register a new account.
    ///
    /// Uniqueness (including secondary-email collisions) is checked before
    /// creation so a failure leaves no orphaned account; the store's own
    /// constraints close the remaining race. When policy permits unverified
    /// login the response carries a fresh credential pair.
    ///
    /// # Errors
    ///
    /// Hard failures only; domain failures land in the envelope.
    #[instrument(skip_all)]
    pub async fn register(&self, input: RegisterInput) -> Result<CredentialsPayload, Error> {
        let mut errors = ErrorMap::new();

        for issue in fields::validate(&self.register_fields, &input.fields) {
            match issue {
                FieldIssue::Missing { field } | FieldIssue::Blank { field } => {
                    let entry = ErrorEntry::required(&field);
                    errors.push(field, entry);
                }
                FieldIssue::Unexpected { field } => {
                    let entry = ErrorEntry::unexpected(&field);
                    errors.push(field, entry);
                }
            }
        }

        let email = input.fields.get("email").map(|email| normalize_email(email));
        if let Some(email) = &email {
            if !email.is_empty() && !valid_email(email) {
                errors.push("email", ErrorEntry::invalid_email());
            }
        }

        for violation in validate_policy(&input.password, self.config.min_password_length()) {
            errors.push(
                "password",
                ErrorEntry::new(violation.message(), violation.code()),
            );
        }
        if input.password != input.password_confirm {
            errors.push("password_confirm", ErrorEntry::password_mismatch());
        }

        // Pre-creation uniqueness checks keep the errors friendly and field
        // scoped; the store constraint is still authoritative below.
        if let Some(username) = input.fields.get("username") {
            if self
                .store
                .find_by_field("username", username)
                .await?
                .is_some()
            {
                errors.push("username", ErrorEntry::username_in_use());
            }
        }
        if let Some(email) = &email {
            if valid_email(email) && !self.store.email_is_free(email).await? {
                errors.push("email", ErrorEntry::email_in_use());
            }
        }

        if !errors.is_empty() {
            return Ok(CredentialsPayload::fail(errors));
        }

        let username = input
            .fields
            .get("username")
            .cloned()
            .ok_or_else(|| Error::usage("register fields must include username"))?;
        let email = email.ok_or_else(|| Error::usage("register fields must include email"))?;

        let send_activation = self.config.send_activation_email() && !email.is_empty();
        // Accounts stay inactive only while verification gates login.
        let active = !(send_activation && !self.config.allow_login_not_verified());

        let password_hash =
            hash_password(&input.password).map_err(|err| Error::Store(StoreError::Backend(err)))?;

        let user = match self
            .store
            .create_user(NewUser {
                username,
                email: email.clone(),
                first_name: input.fields.get("first_name").cloned(),
                last_name: input.fields.get("last_name").cloned(),
                password_hash,
                active,
            })
            .await
        {
            Ok(user) => user,
            Err(StoreError::Duplicate { field: "username" }) => {
                return Ok(CredentialsPayload::fail(ErrorMap::field(
                    "username",
                    ErrorEntry::username_in_use(),
                )));
            }
            Err(StoreError::Duplicate { .. }) => {
                return Ok(CredentialsPayload::fail(ErrorMap::field(
                    "email",
                    ErrorEntry::email_in_use(),
                )));
            }
            Err(err) => return Err(err.into()),
        };
        debug!(user_id = %user.id, "account created");

        if send_activation {
            let token = self
                .signer()
                .issue(user.id, Purpose::Activation, None)
                .map_err(|err| Error::usage(format!("failed to sign activation token: {err}")))?;
            // State is committed; a failed send is reported, not rolled back.
            if !self.deliver(&activation_message(&self.config, &email, &token)) {
                return Ok(CredentialsPayload::fail(ErrorMap::non_field(
                    ErrorEntry::email_fail(),
                )));
            }
        }

        if self.config.allow_login_not_verified() {
            let (token, refresh) = self.issue_credentials(user.id).await?;
            self.store
                .record_login(user.id, time::OffsetDateTime::now_utc())
                .await?;
            return Ok(CredentialsPayload::ok(Some(token), Some(refresh)));
        }

        Ok(CredentialsPayload::ok(None, None))
    }
}
