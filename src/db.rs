//! Durable store: accounts, prekeys, the sealed message queue, and the
//! token revocation set, on Postgres.
//!
//! The handle is cheap to clone and injected into the router state at
//! startup. Referential integrity lives in the schema (UNIQUE identity
//! keys, ON DELETE CASCADE from every per-account table), so account
//! deletion and expiry reaping never leave orphans.
//!
//! Queue rows deliberately have no sender column. Nothing in this module
//! accepts a sender identity, so the property holds structurally rather
//! than by handler discipline.

use std::time::Duration as StdDuration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::config::{DB_IDLE_TIMEOUT_SECS, DB_MAX_CONNECTIONS, DRAIN_LIMIT};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum DbError {
    /// Unique violation on the identity key during registration.
    AlreadyRegistered,
    /// Foreign-key violation on enqueue: no such recipient account.
    RecipientUnknown,
    Sqlx(sqlx::Error),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::AlreadyRegistered => write!(f, "identity key already registered"),
            DbError::RecipientUnknown => write!(f, "recipient unknown"),
            DbError::Sqlx(e) => write!(f, "database error: {e}"),
        }
    }
}

impl std::error::Error for DbError {}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        DbError::Sqlx(e)
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation))
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if matches!(db.kind(), sqlx::error::ErrorKind::ForeignKeyViolation))
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: Uuid,
    pub public_key: Vec<u8>,
    pub registration_id: i32,
}

#[derive(Debug, Clone)]
pub struct SignedPrekeyRow {
    pub key_id: i32,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OneTimePrekeyRow {
    pub key_id: i32,
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct QueuedMessageRow {
    pub id: Uuid,
    pub ciphertext: Vec<u8>,
    pub message_type: i16,
}

/// One-time prekey as uploaded by a client.
#[derive(Debug, Clone)]
pub struct NewOneTimePrekey {
    pub key_id: i32,
    pub public_key: Vec<u8>,
}

/// Signed prekey as uploaded by a client, signature already verified.
#[derive(Debug, Clone)]
pub struct NewSignedPrekey {
    pub key_id: i32,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA: &[&str] = &[
    r#"CREATE EXTENSION IF NOT EXISTS "pgcrypto""#,
    r#"CREATE EXTENSION IF NOT EXISTS "uuid-ossp""#,
    r#"CREATE TABLE IF NOT EXISTS accounts (
        id UUID PRIMARY KEY,
        public_key BYTEA NOT NULL UNIQUE,
        registration_id INTEGER NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS signed_prekeys (
        account_id UUID PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
        key_id INTEGER NOT NULL,
        public_key BYTEA NOT NULL,
        signature BYTEA NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS one_time_prekeys (
        id BIGSERIAL PRIMARY KEY,
        account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
        key_id INTEGER NOT NULL,
        public_key BYTEA NOT NULL,
        UNIQUE (account_id, key_id)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS one_time_prekeys_account_idx
        ON one_time_prekeys (account_id)"#,
    r#"CREATE TABLE IF NOT EXISTS message_queue (
        id UUID PRIMARY KEY,
        recipient_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
        ciphertext BYTEA NOT NULL,
        message_type SMALLINT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS message_queue_recipient_idx
        ON message_queue (recipient_id)"#,
    r#"CREATE INDEX IF NOT EXISTS message_queue_expires_idx
        ON message_queue (expires_at)"#,
    r#"CREATE TABLE IF NOT EXISTS revoked_tokens (
        token_id UUID PRIMARY KEY,
        expires_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS revoked_tokens_expires_idx
        ON revoked_tokens (expires_at)"#,
];

// ---------------------------------------------------------------------------
// Store handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect with the bounded pool the relay runs on: at most 20 worker
    /// connections, idle connections reaped after 30 seconds.
    pub async fn connect(db_url: &str) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(DB_MAX_CONNECTIONS)
            .idle_timeout(StdDuration::from_secs(DB_IDLE_TIMEOUT_SECS))
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }

    /// Create tables, extensions, and indexes. Safe to call on every boot.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // -- accounts -----------------------------------------------------------

    /// Register an account with its initial key material in one transaction.
    pub async fn create_account(
        &self,
        public_key: &[u8],
        registration_id: i32,
        signed_prekey: &NewSignedPrekey,
        one_time_prekeys: &[NewOneTimePrekey],
    ) -> Result<Uuid, DbError> {
        let account_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO accounts (id, public_key, registration_id) VALUES ($1, $2, $3)",
        )
        .bind(account_id)
        .bind(public_key)
        .bind(registration_id)
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(DbError::AlreadyRegistered);
            }
            return Err(e.into());
        }

        sqlx::query(
            "INSERT INTO signed_prekeys (account_id, key_id, public_key, signature)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(account_id)
        .bind(signed_prekey.key_id)
        .bind(&signed_prekey.public_key)
        .bind(&signed_prekey.signature)
        .execute(&mut *tx)
        .await?;

        for prekey in one_time_prekeys {
            sqlx::query(
                "INSERT INTO one_time_prekeys (account_id, key_id, public_key)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (account_id, key_id) DO NOTHING",
            )
            .bind(account_id)
            .bind(prekey.key_id)
            .bind(&prekey.public_key)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(account_id)
    }

    pub async fn account_id_by_public_key(
        &self,
        public_key: &[u8],
    ) -> Result<Option<Uuid>, DbError> {
        let row = sqlx::query("SELECT id FROM accounts WHERE public_key = $1")
            .bind(public_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("id")))
    }

    pub async fn get_account(&self, account_id: Uuid) -> Result<Option<AccountRow>, DbError> {
        let row = sqlx::query(
            "SELECT id, public_key, registration_id FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| AccountRow {
            id: r.get("id"),
            public_key: r.get("public_key"),
            registration_id: r.get("registration_id"),
        }))
    }

    /// Cascades to prekeys and queued ciphertext.
    pub async fn delete_account(&self, account_id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- prekeys ------------------------------------------------------------

    pub async fn get_signed_prekey(
        &self,
        account_id: Uuid,
    ) -> Result<Option<SignedPrekeyRow>, DbError> {
        let row = sqlx::query(
            "SELECT key_id, public_key, signature FROM signed_prekeys WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| SignedPrekeyRow {
            key_id: r.get("key_id"),
            public_key: r.get("public_key"),
            signature: r.get("signature"),
        }))
    }

    /// Replace the single per-account signed prekey, refreshing its
    /// creation time (the rotation clock).
    pub async fn upsert_signed_prekey(
        &self,
        account_id: Uuid,
        prekey: &NewSignedPrekey,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO signed_prekeys (account_id, key_id, public_key, signature)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (account_id) DO UPDATE SET
                 key_id = EXCLUDED.key_id,
                 public_key = EXCLUDED.public_key,
                 signature = EXCLUDED.signature,
                 created_at = now()",
        )
        .bind(account_id)
        .bind(prekey.key_id)
        .bind(&prekey.public_key)
        .bind(&prekey.signature)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Consume the oldest one-time prekey for `account_id`, or report that
    /// none is available.
    ///
    /// The row lock skips rows already locked by a concurrent fetch, so two
    /// simultaneous bundle requests either receive distinct prekeys or one
    /// of them receives `None` without blocking. The select and delete
    /// commit together.
    pub async fn take_one_time_prekey(
        &self,
        account_id: Uuid,
    ) -> Result<Option<OneTimePrekeyRow>, DbError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id, key_id, public_key FROM one_time_prekeys
             WHERE account_id = $1
             ORDER BY id ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?;

        let taken = match row {
            Some(r) => {
                let row_id: i64 = r.get("id");
                sqlx::query("DELETE FROM one_time_prekeys WHERE id = $1")
                    .bind(row_id)
                    .execute(&mut *tx)
                    .await?;
                Some(OneTimePrekeyRow {
                    key_id: r.get("key_id"),
                    public_key: r.get("public_key"),
                })
            }
            None => None,
        };

        tx.commit().await?;
        Ok(taken)
    }

    pub async fn count_one_time_prekeys(&self, account_id: Uuid) -> Result<i64, DbError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM one_time_prekeys WHERE account_id = $1")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Upload a batch of one-time prekeys. Collisions on (account, key id)
    /// are silent no-ops, making replenish idempotent. Returns how many rows
    /// were actually inserted.
    pub async fn insert_one_time_prekeys(
        &self,
        account_id: Uuid,
        prekeys: &[NewOneTimePrekey],
    ) -> Result<u64, DbError> {
        let mut inserted = 0u64;
        let mut tx = self.pool.begin().await?;
        for prekey in prekeys {
            let result = sqlx::query(
                "INSERT INTO one_time_prekeys (account_id, key_id, public_key)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (account_id, key_id) DO NOTHING",
            )
            .bind(account_id)
            .bind(prekey.key_id)
            .bind(&prekey.public_key)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    // -- sealed message queue ----------------------------------------------

    /// Append opaque ciphertext to a recipient's queue.
    ///
    /// The id is a UUIDv7: 128-bit, and byte order equals ingestion order,
    /// which is what makes drain order stable under concurrent sends.
    pub async fn enqueue_message(
        &self,
        recipient_id: Uuid,
        ciphertext: &[u8],
        message_type: i16,
        ttl_days: i64,
    ) -> Result<Uuid, DbError> {
        let id = Uuid::now_v7();
        let expires_at = OffsetDateTime::now_utc() + Duration::days(ttl_days);
        let result = sqlx::query(
            "INSERT INTO message_queue (id, recipient_id, ciphertext, message_type, expires_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(recipient_id)
        .bind(ciphertext)
        .bind(message_type)
        .bind(expires_at)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(id),
            Err(e) if is_foreign_key_violation(&e) => Err(DbError::RecipientUnknown),
            Err(e) => Err(e.into()),
        }
    }

    /// Unexpired queue rows for `recipient_id`, oldest first, capped at the
    /// drain limit.
    pub async fn fetch_messages(
        &self,
        recipient_id: Uuid,
    ) -> Result<Vec<QueuedMessageRow>, DbError> {
        let rows = sqlx::query(
            "SELECT id, ciphertext, message_type FROM message_queue
             WHERE recipient_id = $1 AND expires_at > now()
             ORDER BY id ASC
             LIMIT $2",
        )
        .bind(recipient_id)
        .bind(DRAIN_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| QueuedMessageRow {
                id: r.get("id"),
                ciphertext: r.get("ciphertext"),
                message_type: r.get("message_type"),
            })
            .collect())
    }

    /// Delete a queue row, but only when it belongs to `recipient_id`. This
    /// dual predicate is the whole of cross-account isolation on the queue.
    pub async fn delete_message(
        &self,
        recipient_id: Uuid,
        message_id: Uuid,
    ) -> Result<bool, DbError> {
        let result =
            sqlx::query("DELETE FROM message_queue WHERE id = $1 AND recipient_id = $2")
                .bind(message_id)
                .bind(recipient_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- token revocation ---------------------------------------------------

    /// Record a token as revoked until its natural expiry.
    pub async fn insert_revocation(
        &self,
        token_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO revoked_tokens (token_id, expires_at) VALUES ($1, $2)
             ON CONFLICT (token_id) DO NOTHING",
        )
        .bind(token_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn is_token_revoked(&self, token_id: Uuid) -> Result<bool, DbError> {
        let row = sqlx::query("SELECT 1 FROM revoked_tokens WHERE token_id = $1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    // -- reaping ------------------------------------------------------------

    /// Delete all queued ciphertext and revocation records past expiry.
    /// Safe on any schedule. Returns (queue rows, revocation rows) removed.
    pub async fn reap(&self) -> Result<(u64, u64), DbError> {
        let messages = sqlx::query("DELETE FROM message_queue WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?
            .rows_affected();
        let tokens = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok((messages, tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_name_their_cause() {
        assert_eq!(
            DbError::AlreadyRegistered.to_string(),
            "identity key already registered"
        );
        assert_eq!(DbError::RecipientUnknown.to_string(), "recipient unknown");
    }

    #[test]
    fn queue_schema_carries_no_sender_column() {
        let queue_table = SCHEMA
            .iter()
            .find(|s| s.contains("message_queue ("))
            .expect("queue table in schema");
        assert!(!queue_table.contains("sender"));
        assert!(!queue_table.contains("origin"));
        // The only instant on the row is the expiry used by the reaper.
        assert_eq!(queue_table.matches("TIMESTAMPTZ").count(), 1);
    }
}
