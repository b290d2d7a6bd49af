//! In-memory store for development and tests.
//!
//! Behavior mirrors the Postgres store, including uniqueness enforcement:
//! every mutation runs under one lock, so check-then-act inside a method is
//! as atomic as a database transaction.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{NewUser, RefreshCredential, StoreError, UserRecord, UserStore};

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<Uuid, UserRecord>,
    refresh: Vec<RefreshCredential>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn user(&self, id: Uuid) -> Result<&UserRecord, StoreError> {
        self.users.get(&id).ok_or(StoreError::NotFound)
    }

    fn user_mut(&mut self, id: Uuid) -> Result<&mut UserRecord, StoreError> {
        self.users.get_mut(&id).ok_or(StoreError::NotFound)
    }

    fn email_taken(&self, email: &str, exclude: Option<Uuid>) -> bool {
        self.users.values().any(|user| {
            user.email == email
                || (Some(user.id) != exclude && user.status.secondary_email.as_deref() == Some(email))
        })
    }
}

impl UserStore for MemoryStore {
    async fn create_user(&self, new: NewUser) -> Result<UserRecord, StoreError> {
        let mut inner = self.lock();
        if inner.users.values().any(|user| user.username == new.username) {
            return Err(StoreError::Duplicate { field: "username" });
        }
        if inner.email_taken(&new.email, None) {
            return Err(StoreError::Duplicate { field: "email" });
        }
        let record = UserRecord {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            first_name: new.first_name,
            last_name: new.last_name,
            password_hash: new.password_hash,
            active: new.active,
            last_login: None,
            status: super::AccountStatus::default(),
        };
        inner.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_by_field(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let inner = self.lock();
        let found = match field {
            "username" => inner.users.values().find(|user| user.username == value),
            "email" => inner.users.values().find(|user| user.email == value),
            other => {
                return Err(StoreError::Backend(anyhow!(
                    "unknown identifying field: {other}"
                )));
            }
        };
        Ok(found.cloned())
    }

    async fn find_by_any_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .users
            .values()
            .find(|user| {
                user.email == email || user.status.secondary_email.as_deref() == Some(email)
            })
            .cloned())
    }

    async fn find_by_secondary_email(
        &self,
        email: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .users
            .values()
            .find(|user| user.status.secondary_email.as_deref() == Some(email))
            .cloned())
    }

    async fn email_is_free(&self, email: &str) -> Result<bool, StoreError> {
        Ok(!self.lock().email_taken(email, None))
    }

    async fn verify(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let user = inner.user_mut(id)?;
        if user.status.verified {
            return Err(StoreError::AlreadyVerified);
        }
        user.status.verified = true;
        // Accounts held inactive pending verification become usable now;
        // archived accounts stay inactive until a login reactivates them.
        if !user.status.archived {
            user.active = true;
        }
        Ok(())
    }

    async fn archive(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let user = inner.user_mut(id)?;
        if !user.status.archived {
            user.status.archived = true;
            user.active = false;
        }
        Ok(())
    }

    async fn unarchive(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let user = inner.user_mut(id)?;
        if user.status.archived {
            user.status.archived = false;
            user.active = true;
        }
        Ok(())
    }

    async fn set_secondary_email(&self, id: Uuid, email: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.user(id)?;
        if inner.email_taken(email, Some(id)) {
            return Err(StoreError::Duplicate { field: "email" });
        }
        inner.user_mut(id)?.status.secondary_email = Some(email.to_string());
        Ok(())
    }

    async fn swap_emails(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let user = inner.user_mut(id)?;
        let secondary = user
            .status
            .secondary_email
            .take()
            .ok_or(StoreError::NoSecondaryEmail)?;
        user.status.secondary_email = Some(std::mem::replace(&mut user.email, secondary));
        Ok(())
    }

    async fn remove_secondary_email(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let user = inner.user_mut(id)?;
        if user.status.secondary_email.take().is_none() {
            return Err(StoreError::NoSecondaryEmail);
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let user = inner.user_mut(id)?;
        for (name, value) in fields {
            match name.as_str() {
                "first_name" => user.first_name = Some(value.clone()),
                "last_name" => user.last_name = Some(value.clone()),
                other => {
                    return Err(StoreError::Backend(anyhow!(
                        "unknown profile field: {other}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn set_password_and_revoke(&self, id: Uuid, hash: &str) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.lock();
        inner.user_mut(id)?.password_hash = hash.to_string();
        for credential in &mut inner.refresh {
            if credential.user_id == id && credential.revoked_at.is_none() {
                credential.revoked_at = Some(now);
            }
        }
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError> {
        self.lock().user_mut(id)?.last_login = Some(at);
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        self.lock().user_mut(id)?.active = active;
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.users.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        inner.refresh.retain(|credential| credential.user_id != id);
        Ok(())
    }

    async fn insert_refresh(&self, credential: RefreshCredential) -> Result<(), StoreError> {
        self.lock().refresh.push(credential);
        Ok(())
    }

    async fn find_refresh(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<RefreshCredential>, StoreError> {
        Ok(self
            .lock()
            .refresh
            .iter()
            .find(|credential| credential.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_refresh(
        &self,
        token_hash: &[u8],
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let credential = inner
            .refresh
            .iter_mut()
            .find(|credential| credential.token_hash == token_hash)
            .ok_or(StoreError::NotFound)?;
        if credential.revoked_at.is_none() {
            credential.revoked_at = Some(at);
        }
        Ok(())
    }

    async fn revoke_all_refresh(&self, id: Uuid) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.lock();
        for credential in &mut inner.refresh {
            if credential.user_id == id && credential.revoked_at.is_none() {
                credential.revoked_at = Some(now);
            }
        }
        Ok(())
    }

    async fn active_refresh_count(&self, id: Uuid) -> Result<u64, StoreError> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .lock()
            .refresh
            .iter()
            .filter(|credential| credential.user_id == id && credential.usable_at(now))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            first_name: None,
            last_name: None,
            password_hash: "hash".to_string(),
            active: true,
        }
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = MemoryStore::new();
        store.create_user(new_user("a", "a@x.com")).await.unwrap();
        let err = store
            .create_user(new_user("a", "other@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { field: "username" }));
    }

    #[tokio::test]
    async fn email_is_free_covers_secondary_addresses() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a", "a@x.com")).await.unwrap();
        store
            .set_secondary_email(user.id, "alt@x.com")
            .await
            .unwrap();
        assert!(!store.email_is_free("a@x.com").await.unwrap());
        assert!(!store.email_is_free("alt@x.com").await.unwrap());
        assert!(store.email_is_free("free@x.com").await.unwrap());
    }

    #[tokio::test]
    async fn registering_with_existing_secondary_email_conflicts() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a", "a@x.com")).await.unwrap();
        store
            .set_secondary_email(user.id, "alt@x.com")
            .await
            .unwrap();
        let err = store
            .create_user(new_user("b", "alt@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { field: "email" }));
    }

    #[tokio::test]
    async fn verify_is_idempotent_guarded() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a", "a@x.com")).await.unwrap();
        store.verify(user.id).await.unwrap();
        let err = store.verify(user.id).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyVerified));
    }

    #[tokio::test]
    async fn archive_unarchive_are_idempotent() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a", "a@x.com")).await.unwrap();
        store.archive(user.id).await.unwrap();
        store.archive(user.id).await.unwrap();
        let record = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(record.status.archived);
        assert!(!record.active);
        store.unarchive(user.id).await.unwrap();
        store.unarchive(user.id).await.unwrap();
        let record = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(!record.status.archived);
        assert!(record.active);
    }

    #[tokio::test]
    async fn swap_exchanges_primary_and_secondary() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a", "a@x.com")).await.unwrap();
        assert!(matches!(
            store.swap_emails(user.id).await.unwrap_err(),
            StoreError::NoSecondaryEmail
        ));
        store
            .set_secondary_email(user.id, "alt@x.com")
            .await
            .unwrap();
        store.swap_emails(user.id).await.unwrap();
        let record = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(record.email, "alt@x.com");
        assert_eq!(record.status.secondary_email.as_deref(), Some("a@x.com"));
    }

    #[tokio::test]
    async fn own_secondary_email_can_be_reset_to_same_value() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a", "a@x.com")).await.unwrap();
        store
            .set_secondary_email(user.id, "alt@x.com")
            .await
            .unwrap();
        store
            .set_secondary_email(user.id, "alt@x.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn set_password_and_revoke_clears_credentials() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a", "a@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .insert_refresh(RefreshCredential {
                user_id: user.id,
                token_hash: vec![1, 2, 3],
                issued_at: now,
                expires_at: now + time::Duration::days(7),
                revoked_at: None,
            })
            .await
            .unwrap();
        assert_eq!(store.active_refresh_count(user.id).await.unwrap(), 1);
        store
            .set_password_and_revoke(user.id, "new-hash")
            .await
            .unwrap();
        assert_eq!(store.active_refresh_count(user.id).await.unwrap(), 0);
        let record = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(record.password_hash, "new-hash");
    }
}
