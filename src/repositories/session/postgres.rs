use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::{Row, error::SqlState};

use super::{SessionStore, expiry_after};
use crate::{crypto::session_key::SessionKey, error::StoreError, models::session::Session};

/// The `sessions` table. `account_id` is UNIQUE so that a second concurrent
/// login for the same account fails at the database, whatever the caller did first.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_key     TEXT PRIMARY KEY,
    account_id      TEXT NOT NULL UNIQUE,
    expiration_date TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS sessions_expiration_date_idx ON sessions (expiration_date);
"#;

/// A helper function to map a `tokio_postgres::Row` to a `Session`.
fn row_to_session(row: &Row) -> Result<Session, StoreError> {
    let session_key: String = row
        .try_get("session_key")
        .map_err(|_| StoreError::Corrupt("session_key".to_string()))?;

    Ok(Session {
        account_id: row
            .try_get("account_id")
            .map_err(|_| StoreError::Corrupt("account_id".to_string()))?,
        session_key: SessionKey::from(session_key),
        expiration_date: row
            .try_get::<_, DateTime<Utc>>("expiration_date")
            .map_err(|_| StoreError::Corrupt("expiration_date".to_string()))?,
    })
}

/// A session store backed by a PostgreSQL table.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: Pool,
}

impl PgSessionStore {
    /// Creates a new `PgSessionStore` over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates the `sessions` table if it does not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        tracing::info!("✅ sessions table ready");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(
        &self,
        account_id: &str,
        session_key: &SessionKey,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expiration_date = expiry_after(Utc::now(), ttl)?;
        let client = self.pool.get().await?;

        client
            .execute(
                r#"
                INSERT INTO sessions (session_key, account_id, expiration_date)
                VALUES ($1, $2, $3)
                "#,
                &[&session_key.expose(), &account_id, &expiration_date],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    StoreError::Conflict
                } else {
                    StoreError::Database(e)
                }
            })?;

        Ok(())
    }

    async fn fetch_possibly_expired(
        &self,
        account_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT session_key, account_id, expiration_date
                FROM sessions
                WHERE account_id = $1
                "#,
                &[&account_id],
            )
            .await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn delete(&self, session_key: &str) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM sessions WHERE session_key = $1",
                &[&session_key],
            )
            .await?;

        if deleted == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn extend_and_fetch(
        &self,
        session_key: &str,
        ttl: Duration,
    ) -> Result<Session, StoreError> {
        let now = Utc::now();
        let extended_to = expiry_after(now, ttl)?;
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                r#"
                UPDATE sessions
                SET expiration_date = GREATEST(expiration_date, $1)
                WHERE session_key = $2 AND expiration_date > $3
                RETURNING session_key, account_id, expiration_date
                "#,
                &[&extended_to, &session_key, &now],
            )
            .await?;

        if let Some(row) = row {
            return row_to_session(&row);
        }

        // Zero rows: the key is either absent or present-but-expired.
        let exists = client
            .query_opt(
                "SELECT 1 FROM sessions WHERE session_key = $1",
                &[&session_key],
            )
            .await?;

        match exists {
            Some(_) => Err(StoreError::Expired),
            None => Err(StoreError::NotFound),
        }
    }

    async fn reap_expired(&self) -> Result<u64, StoreError> {
        let client = self.pool.get().await?;
        let now = Utc::now();
        let reaped = client
            .execute(
                "DELETE FROM sessions WHERE expiration_date <= $1",
                &[&now],
            )
            .await?;
        Ok(reaped)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close();
        Ok(())
    }
}
