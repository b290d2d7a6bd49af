//! Profile update and account archive/delete.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::error::Error;
use crate::fields::{self, FieldIssue};
use crate::store::UserStore;

use super::envelope::{Envelope, ErrorEntry, ErrorMap};
use super::guards::{Guard, GuardOutcome};
use super::{AccountService, Caller};

impl<S: UserStore> AccountService<S> {
    /// Update the configured profile fields on the caller's account.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn update_account(
        &self,
        caller: Caller,
        updates: &BTreeMap<String, String>,
    ) -> Result<Envelope, Error> {
        let chain = [Guard::Authenticated, Guard::Verified];
        let user = match self.run_guards(caller, &chain, None).await? {
            GuardOutcome::Proceed(user) => user,
            GuardOutcome::Halt(errors) => return Ok(Envelope::fail(errors)),
        };

        let mut errors = ErrorMap::new();
        for issue in fields::validate(&self.update_fields, updates) {
            if let FieldIssue::Unexpected { field } = issue {
                let entry = ErrorEntry::unexpected(&field);
                errors.push(field, entry);
            }
        }
        if !errors.is_empty() {
            return Ok(Envelope::fail(errors));
        }

        self.store.update_profile(user.id, updates).await?;
        Ok(Envelope::ok())
    }

    /// Archive the caller's account and revoke its refresh credentials.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn archive_account(&self, caller: Caller, password: &str) -> Result<Envelope, Error> {
        let chain = [
            Guard::Authenticated,
            Guard::Verified,
            Guard::PasswordConfirmed,
        ];
        let user = match self
            .run_guards(caller, &chain, Some(("password", password)))
            .await?
        {
            GuardOutcome::Proceed(user) => user,
            GuardOutcome::Halt(errors) => return Ok(Envelope::fail(errors)),
        };

        self.store.archive(user.id).await?;
        self.store.revoke_all_refresh(user.id).await?;
        debug!(user_id = %user.id, "account archived");
        Ok(Envelope::ok())
    }

    /// Delete the caller's account, hard or soft per policy, always revoking
    /// refresh credentials.
    ///
    /// # Errors
    ///
    /// Hard failures only.
    #[instrument(skip_all)]
    pub async fn delete_account(&self, caller: Caller, password: &str) -> Result<Envelope, Error> {
        let chain = [
            Guard::Authenticated,
            Guard::Verified,
            Guard::PasswordConfirmed,
        ];
        let user = match self
            .run_guards(caller, &chain, Some(("password", password)))
            .await?
        {
            GuardOutcome::Proceed(user) => user,
            GuardOutcome::Halt(errors) => return Ok(Envelope::fail(errors)),
        };

        self.store.revoke_all_refresh(user.id).await?;
        if self.config.allow_delete_account() {
            self.store.delete_user(user.id).await?;
            debug!(user_id = %user.id, "account deleted");
        } else {
            self.store.set_active(user.id, false).await?;
            debug!(user_id = %user.id, "account deactivated");
        }
        Ok(Envelope::ok())
    }
}
