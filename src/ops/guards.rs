//! Precondition chain for state-changing operations.
//!
//! Guards are an explicit ordered list, not stacked wrappers: each gate
//! either lets the chain proceed or halts with a terminal envelope, and the
//! order (authenticated, then verified, then password-confirmed) is fixed by
//! the caller of [`AccountService::run_guards`].

use crate::error::Error;
use crate::password::verify_password;
use crate::store::{UserRecord, UserStore};

use super::envelope::{ErrorEntry, ErrorMap};
use super::{AccountService, Caller};

/// One precondition gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Guard {
    Authenticated,
    Verified,
    /// Re-prove possession of the current password; the field name scopes the
    /// error to the input that carried it.
    PasswordConfirmed,
}

/// Result of running the chain: the resolved account, or a terminal envelope.
pub(crate) enum GuardOutcome {
    Proceed(UserRecord),
    Halt(ErrorMap),
}

impl<S: UserStore> AccountService<S> {
    /// Run the guard chain in order, short-circuiting on the first failure.
    ///
    /// `password` carries the confirming password input and its field name;
    /// it is required iff the chain contains
    /// [`Guard::PasswordConfirmed`].
    ///
    /// # Errors
    ///
    /// [`Error::Usage`] when a password guard is requested without a password
    /// input; store failures propagate.
    pub(crate) async fn run_guards(
        &self,
        caller: Caller,
        chain: &[Guard],
        password: Option<(&str, &str)>,
    ) -> Result<GuardOutcome, Error> {
        let mut user: Option<UserRecord> = None;

        for guard in chain {
            match guard {
                Guard::Authenticated => {
                    let Caller::User(id) = caller else {
                        return Ok(GuardOutcome::Halt(ErrorMap::non_field(
                            ErrorEntry::unauthenticated(),
                        )));
                    };
                    // Archived and soft-deleted accounts lose their session
                    // immediately, not at access-token expiry.
                    match self.store().find_by_id(id).await? {
                        Some(record) if record.active => user = Some(record),
                        _ => {
                            return Ok(GuardOutcome::Halt(ErrorMap::non_field(
                                ErrorEntry::unauthenticated(),
                            )));
                        }
                    }
                }
                Guard::Verified => {
                    let record = user.as_ref().ok_or_else(|| {
                        Error::usage("Verified guard requires Authenticated earlier in the chain")
                    })?;
                    if !record.status.verified {
                        return Ok(GuardOutcome::Halt(ErrorMap::non_field(
                            ErrorEntry::not_verified(),
                        )));
                    }
                }
                Guard::PasswordConfirmed => {
                    let record = user.as_ref().ok_or_else(|| {
                        Error::usage(
                            "PasswordConfirmed guard requires Authenticated earlier in the chain",
                        )
                    })?;
                    let (field, value) = password.ok_or_else(|| {
                        Error::usage(
                            "PasswordConfirmed guard used on an operation without a password input",
                        )
                    })?;
                    if !verify_password(value, &record.password_hash) {
                        return Ok(GuardOutcome::Halt(ErrorMap::field(
                            field,
                            ErrorEntry::invalid_password(),
                        )));
                    }
                }
            }
        }

        match user {
            Some(record) => Ok(GuardOutcome::Proceed(record)),
            None => Err(Error::usage("guard chain must include Authenticated")),
        }
    }
}
