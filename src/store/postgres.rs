//! Postgres-backed store.
//!
//! Runtime `sqlx::query` with per-statement tracing spans, explicit
//! transactions around multi-step updates, and SQLSTATE 23505 mapped to
//! [`StoreError::Duplicate`] so database constraints stay authoritative for
//! uniqueness. Expected schema (migrations live with the hosting service):
//!
//! ```sql
//! CREATE TABLE users (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     username TEXT NOT NULL,
//!     email TEXT NOT NULL,
//!     first_name TEXT,
//!     last_name TEXT,
//!     password_hash TEXT NOT NULL,
//!     active BOOLEAN NOT NULL DEFAULT TRUE,
//!     last_login TIMESTAMPTZ,
//!     CONSTRAINT users_username_key UNIQUE (username),
//!     CONSTRAINT users_email_key UNIQUE (email)
//! );
//!
//! CREATE TABLE account_status (
//!     user_id UUID PRIMARY KEY REFERENCES users (id) ON DELETE CASCADE,
//!     verified BOOLEAN NOT NULL DEFAULT FALSE,
//!     archived BOOLEAN NOT NULL DEFAULT FALSE,
//!     secondary_email TEXT,
//!     CONSTRAINT account_status_secondary_email_key UNIQUE (secondary_email)
//! );
//!
//! CREATE TABLE refresh_credentials (
//!     token_hash BYTEA PRIMARY KEY,
//!     user_id UUID NOT NULL REFERENCES users (id) ON DELETE CASCADE,
//!     issued_at TIMESTAMPTZ NOT NULL,
//!     expires_at TIMESTAMPTZ NOT NULL,
//!     revoked_at TIMESTAMPTZ
//! );
//! ```

use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

use super::{AccountStatus, NewUser, RefreshCredential, StoreError, UserRecord, UserStore};

const USER_COLUMNS: &str = r"
    u.id, u.username, u.email, u.first_name, u.last_name,
    u.password_hash, u.active, u.last_login,
    s.verified, s.archived, s.secondary_email
";

const PROFILE_COLUMNS: &[&str] = &["first_name", "last_name"];

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_span(operation: &str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Name the colliding field from the violated constraint.
fn duplicate_field(err: &sqlx::Error) -> &'static str {
    if let sqlx::Error::Database(db_err) = err {
        if db_err
            .constraint()
            .is_some_and(|name| name.contains("username"))
        {
            return "username";
        }
    }
    "email"
}

fn record_from_row(row: &PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        password_hash: row.get("password_hash"),
        active: row.get("active"),
        last_login: row.get("last_login"),
        status: AccountStatus {
            verified: row.get("verified"),
            archived: row.get("archived"),
            secondary_email: row.get("secondary_email"),
        },
    }
}

fn refresh_from_row(row: &PgRow) -> RefreshCredential {
    RefreshCredential {
        user_id: row.get("user_id"),
        token_hash: row.get("token_hash"),
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
        revoked_at: row.get("revoked_at"),
    }
}

impl PgStore {
    async fn fetch_one_user(
        &self,
        query: &str,
        value: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user")?;
        Ok(row.as_ref().map(record_from_row))
    }
}

impl UserStore for PgStore {
    async fn create_user(&self, new: NewUser) -> Result<UserRecord, StoreError> {
        // Account and status are one transaction; a partial failure leaves
        // neither row.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin create-user transaction")?;

        let query = r"
            INSERT INTO users (username, email, first_name, last_name, password_hash, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.first_name)
            .bind(&new.last_name)
            .bind(&new.password_hash)
            .bind(new.active)
            .fetch_one(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await;

        let id: Uuid = match row {
            Ok(row) => row.get("id"),
            Err(err) => {
                let _ = tx.rollback().await;
                if is_unique_violation(&err) {
                    return Err(StoreError::Duplicate {
                        field: duplicate_field(&err),
                    });
                }
                return Err(StoreError::Backend(
                    anyhow!(err).context("failed to insert user"),
                ));
            }
        };

        let query = "INSERT INTO account_status (user_id) VALUES ($1)";
        sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert account status")?;

        tx.commit().await.context("commit create-user transaction")?;

        Ok(UserRecord {
            id,
            username: new.username,
            email: new.email,
            first_name: new.first_name,
            last_name: new.last_name,
            password_hash: new.password_hash,
            active: new.active,
            last_login: None,
            status: AccountStatus::default(),
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let query = &format!(
            "SELECT {USER_COLUMNS} FROM users u JOIN account_status s ON s.user_id = u.id WHERE u.id = $1"
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user by id")?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn find_by_field(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        // Identifier is matched against an allow-list, never interpolated
        // from caller input.
        let column = match field {
            "username" => "u.username",
            "email" => "u.email",
            other => {
                return Err(StoreError::Backend(anyhow!(
                    "unknown identifying field: {other}"
                )));
            }
        };
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users u JOIN account_status s ON s.user_id = u.id WHERE {column} = $1"
        );
        self.fetch_one_user(&query, value).await
    }

    async fn find_by_any_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users u JOIN account_status s ON s.user_id = u.id
             WHERE u.email = $1 OR s.secondary_email = $1"
        );
        self.fetch_one_user(&query, email).await
    }

    async fn find_by_secondary_email(
        &self,
        email: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users u JOIN account_status s ON s.user_id = u.id
             WHERE s.secondary_email = $1"
        );
        self.fetch_one_user(&query, email).await
    }

    async fn email_is_free(&self, email: &str) -> Result<bool, StoreError> {
        let query = r"
            SELECT NOT EXISTS (SELECT 1 FROM users WHERE email = $1)
               AND NOT EXISTS (SELECT 1 FROM account_status WHERE secondary_email = $1) AS free
        ";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to check email availability")?;
        Ok(row.get("free"))
    }

    async fn verify(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin verify transaction")?;

        let query = r"
            UPDATE account_status SET verified = TRUE
            WHERE user_id = $1 AND verified = FALSE
        ";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to mark account verified")?;
        if result.rows_affected() != 1 {
            tx.rollback().await.context("rollback verify transaction")?;

            let query = "SELECT EXISTS (SELECT 1 FROM account_status WHERE user_id = $1) AS found";
            let row = sqlx::query(query)
                .bind(id)
                .fetch_one(&self.pool)
                .instrument(query_span("SELECT", query))
                .await
                .context("failed to check account status")?;
            return if row.get::<bool, _>("found") {
                Err(StoreError::AlreadyVerified)
            } else {
                Err(StoreError::NotFound)
            };
        }

        // Accounts held inactive pending verification become usable now;
        // archived accounts stay inactive until a login reactivates them.
        let query = r"
            UPDATE users u SET active = TRUE
            FROM account_status s
            WHERE u.id = $1 AND s.user_id = u.id AND s.archived = FALSE
        ";
        sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to reactivate verified account")?;

        tx.commit().await.context("commit verify transaction")?;
        Ok(())
    }

    async fn archive(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin archive transaction")?;
        let query = r"
            UPDATE account_status SET archived = TRUE
            WHERE user_id = $1 AND archived = FALSE
        ";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to archive account")?;
        if result.rows_affected() == 1 {
            let query = "UPDATE users SET active = FALSE WHERE id = $1";
            sqlx::query(query)
                .bind(id)
                .execute(&mut *tx)
                .instrument(query_span("UPDATE", query))
                .await
                .context("failed to deactivate archived account")?;
        }
        tx.commit().await.context("commit archive transaction")?;
        Ok(())
    }

    async fn unarchive(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin unarchive transaction")?;
        let query = r"
            UPDATE account_status SET archived = FALSE
            WHERE user_id = $1 AND archived = TRUE
        ";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to unarchive account")?;
        if result.rows_affected() == 1 {
            let query = "UPDATE users SET active = TRUE WHERE id = $1";
            sqlx::query(query)
                .bind(id)
                .execute(&mut *tx)
                .instrument(query_span("UPDATE", query))
                .await
                .context("failed to reactivate unarchived account")?;
        }
        tx.commit().await.context("commit unarchive transaction")?;
        Ok(())
    }

    async fn set_secondary_email(&self, id: Uuid, email: &str) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin secondary-email transaction")?;

        // The unique constraint only covers secondary addresses; primary
        // collisions are checked here inside the same transaction.
        let query = "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1) AS taken";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_one(&mut *tx)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to check primary email collision")?;
        if row.get::<bool, _>("taken") {
            let _ = tx.rollback().await;
            return Err(StoreError::Duplicate { field: "email" });
        }

        let query = "UPDATE account_status SET secondary_email = $2 WHERE user_id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(email)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await;
        match result {
            Ok(result) if result.rows_affected() == 1 => {}
            Ok(_) => {
                let _ = tx.rollback().await;
                return Err(StoreError::NotFound);
            }
            Err(err) if is_unique_violation(&err) => {
                let _ = tx.rollback().await;
                return Err(StoreError::Duplicate { field: "email" });
            }
            Err(err) => {
                let _ = tx.rollback().await;
                return Err(StoreError::Backend(
                    anyhow!(err).context("failed to set secondary email"),
                ));
            }
        }

        tx.commit()
            .await
            .context("commit secondary-email transaction")?;
        Ok(())
    }

    async fn swap_emails(&self, id: Uuid) -> Result<(), StoreError> {
        // Two-field exchange in one transaction with the rows locked.
        let mut tx = self.pool.begin().await.context("begin swap transaction")?;

        let query = r"
            SELECT u.email, s.secondary_email
            FROM users u JOIN account_status s ON s.user_id = u.id
            WHERE u.id = $1
            FOR UPDATE OF u, s
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lock emails for swap")?
            .ok_or(StoreError::NotFound)?;

        let primary: String = row.get("email");
        let secondary: Option<String> = row.get("secondary_email");
        let Some(secondary) = secondary else {
            let _ = tx.rollback().await;
            return Err(StoreError::NoSecondaryEmail);
        };

        let query = "UPDATE users SET email = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(&secondary)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update primary email")?;

        let query = "UPDATE account_status SET secondary_email = $2 WHERE user_id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(&primary)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update secondary email")?;

        tx.commit().await.context("commit swap transaction")?;
        Ok(())
    }

    async fn remove_secondary_email(&self, id: Uuid) -> Result<(), StoreError> {
        let query = r"
            UPDATE account_status SET secondary_email = NULL
            WHERE user_id = $1 AND secondary_email IS NOT NULL
        ";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to remove secondary email")?;
        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::NoSecondaryEmail)
        }
    }

    async fn update_profile(
        &self,
        id: Uuid,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin profile transaction")?;
        for (name, value) in fields {
            if !PROFILE_COLUMNS.contains(&name.as_str()) {
                let _ = tx.rollback().await;
                return Err(StoreError::Backend(anyhow!("unknown profile field: {name}")));
            }
            let query = format!("UPDATE users SET {name} = $2 WHERE id = $1");
            let result = sqlx::query(&query)
                .bind(id)
                .bind(value)
                .execute(&mut *tx)
                .instrument(query_span("UPDATE", &query))
                .await
                .context("failed to update profile field")?;
            if result.rows_affected() == 0 {
                let _ = tx.rollback().await;
                return Err(StoreError::NotFound);
            }
        }
        tx.commit().await.context("commit profile transaction")?;
        Ok(())
    }

    async fn set_password_and_revoke(&self, id: Uuid, hash: &str) -> Result<(), StoreError> {
        // Save-then-revoke is all-or-nothing.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin password transaction")?;

        let query = "UPDATE users SET password_hash = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(hash)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update password hash")?;
        if result.rows_affected() == 0 {
            let _ = tx.rollback().await;
            return Err(StoreError::NotFound);
        }

        let query = r"
            UPDATE refresh_credentials SET revoked_at = NOW()
            WHERE user_id = $1 AND revoked_at IS NULL
        ";
        sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to revoke refresh credentials")?;

        tx.commit().await.context("commit password transaction")?;
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError> {
        let query = "UPDATE users SET last_login = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to record login")?;
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let query = "UPDATE users SET active = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update active flag")?;
        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        // Status and refresh credentials cascade.
        let query = "DELETE FROM users WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete user")?;
        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn insert_refresh(&self, credential: RefreshCredential) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO refresh_credentials (token_hash, user_id, issued_at, expires_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        sqlx::query(query)
            .bind(&credential.token_hash)
            .bind(credential.user_id)
            .bind(credential.issued_at)
            .bind(credential.expires_at)
            .bind(credential.revoked_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert refresh credential")?;
        Ok(())
    }

    async fn find_refresh(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<RefreshCredential>, StoreError> {
        let query = r"
            SELECT token_hash, user_id, issued_at, expires_at, revoked_at
            FROM refresh_credentials WHERE token_hash = $1
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup refresh credential")?;
        Ok(row.as_ref().map(refresh_from_row))
    }

    async fn revoke_refresh(
        &self,
        token_hash: &[u8],
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE refresh_credentials SET revoked_at = $2
            WHERE token_hash = $1 AND revoked_at IS NULL
        ";
        sqlx::query(query)
            .bind(token_hash)
            .bind(at)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to revoke refresh credential")?;
        Ok(())
    }

    async fn revoke_all_refresh(&self, id: Uuid) -> Result<(), StoreError> {
        let query = r"
            UPDATE refresh_credentials SET revoked_at = NOW()
            WHERE user_id = $1 AND revoked_at IS NULL
        ";
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to revoke refresh credentials")?;
        Ok(())
    }

    async fn active_refresh_count(&self, id: Uuid) -> Result<u64, StoreError> {
        let query = r"
            SELECT COUNT(*) AS active
            FROM refresh_credentials
            WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to count refresh credentials")?;
        let count: i64 = row.get("active");
        Ok(count.try_into().unwrap_or(0))
    }
}
