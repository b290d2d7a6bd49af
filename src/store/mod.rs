//! Storage interface for accounts, status, and refresh credentials.
//!
//! The engine talks to one narrow trait. Multi-step updates that the engine
//! needs to be atomic are single trait methods (`create_user`,
//! `set_password_and_revoke`, `swap_emails`) so each backend owns its own
//! transaction boundary. Uniqueness is ultimately the backend's job: the
//! engine pre-checks for friendly errors, the backend's constraint closes
//! the race and reports [`StoreError::Duplicate`].

pub mod memory;
pub mod postgres;

use std::collections::BTreeMap;

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Per-account satellite state, created together with the account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountStatus {
    pub verified: bool,
    pub archived: bool,
    pub secondary_email: Option<String>,
}

/// Identity and credential holder plus its status record.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_hash: String,
    pub active: bool,
    pub last_login: Option<OffsetDateTime>,
    pub status: AccountStatus,
}

/// Input for atomic account + status creation.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_hash: String,
    pub active: bool,
}

/// Long-lived session artifact; only the hash of the opaque value is stored.
#[derive(Debug, Clone)]
pub struct RefreshCredential {
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}

impl RefreshCredential {
    /// Usable right now: not revoked and not past its expiry.
    #[must_use]
    pub fn usable_at(&self, now: OffsetDateTime) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique-constraint violation on the named field.
    #[error("duplicate value for {field}")]
    Duplicate { field: &'static str },
    #[error("account already verified")]
    AlreadyVerified,
    #[error("no secondary email set")]
    NoSecondaryEmail,
    #[error("account not found")]
    NotFound,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Narrow storage interface consumed by the engine.
///
/// Every method is atomic per account; callers never coordinate multi-call
/// transactions themselves.
#[allow(async_fn_in_trait)]
pub trait UserStore: Send + Sync {
    /// Create account and status in one transaction; a partial failure must
    /// leave neither row.
    async fn create_user(&self, new: NewUser) -> Result<UserRecord, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;

    /// Lookup by an identifying field (`username` or `email`).
    async fn find_by_field(&self, field: &str, value: &str)
        -> Result<Option<UserRecord>, StoreError>;

    /// Lookup by primary or secondary email.
    async fn find_by_any_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_secondary_email(&self, email: &str)
        -> Result<Option<UserRecord>, StoreError>;

    /// True iff no account's primary or secondary email equals `email`.
    async fn email_is_free(&self, email: &str) -> Result<bool, StoreError>;

    /// Flip `verified` to true exactly once; a second call fails
    /// [`StoreError::AlreadyVerified`].
    async fn verify(&self, id: Uuid) -> Result<(), StoreError>;

    /// Idempotent: persists only when the state actually changes.
    async fn archive(&self, id: Uuid) -> Result<(), StoreError>;

    /// Idempotent counterpart of [`UserStore::archive`].
    async fn unarchive(&self, id: Uuid) -> Result<(), StoreError>;

    async fn set_secondary_email(&self, id: Uuid, email: &str) -> Result<(), StoreError>;

    /// Exchange primary and secondary email in one transaction.
    async fn swap_emails(&self, id: Uuid) -> Result<(), StoreError>;

    async fn remove_secondary_email(&self, id: Uuid) -> Result<(), StoreError>;

    /// Update profile columns from an allow-listed field map.
    async fn update_profile(
        &self,
        id: Uuid,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Persist a new password hash and revoke every outstanding refresh
    /// credential, atomically.
    async fn set_password_and_revoke(&self, id: Uuid, hash: &str) -> Result<(), StoreError>;

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError>;

    /// Hard delete; refresh credentials for the account go with it.
    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_refresh(&self, credential: RefreshCredential) -> Result<(), StoreError>;

    async fn find_refresh(&self, token_hash: &[u8])
        -> Result<Option<RefreshCredential>, StoreError>;

    async fn revoke_refresh(&self, token_hash: &[u8], at: OffsetDateTime)
        -> Result<(), StoreError>;

    async fn revoke_all_refresh(&self, id: Uuid) -> Result<(), StoreError>;

    /// Outstanding non-revoked, non-expired credentials for the account.
    async fn active_refresh_count(&self, id: Uuid) -> Result<u64, StoreError>;
}
