use async_trait::async_trait;
use deadpool_postgres::Pool;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_postgres::{Row, error::SqlState};
use uuid::Uuid;

use sesh::{SessionPointer, UserDelegate};

use crate::{
    handlers::error::{AppError, Result},
    models::user::User,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        current_session_id TEXT NULL
    )
"#;

/// The server's account table.
#[derive(Clone)]
pub enum Users {
    /// Users held in process memory.
    Memory(Arc<Mutex<HashMap<Uuid, User>>>),
    /// Users in the PostgreSQL `users` table.
    Postgres(Pool),
}

/// A helper function to map a `tokio_postgres::Row` to a `User`.
fn row_to_user(row: &Row) -> Result<User> {
    Ok(User::new(
        row.try_get("id")?,
        row.try_get("username")?,
        row.try_get("current_session_id")?,
    ))
}

fn duplicate_username(username: &str) -> AppError {
    AppError::Conflict(format!("Username {} is already taken", username))
}

impl Users {
    /// An empty in-memory account table.
    pub fn memory() -> Self {
        Users::Memory(Arc::new(Mutex::new(HashMap::new())))
    }

    /// Creates the `users` table if it does not exist. A no-op in memory.
    pub async fn migrate(&self) -> Result<()> {
        if let Users::Postgres(pool) = self {
            let client = pool.get().await?;
            client.batch_execute(SCHEMA).await?;
        }
        Ok(())
    }

    /// Creates a new user.
    pub async fn create(&self, username: &str) -> Result<User> {
        match self {
            Users::Memory(users) => {
                let mut users = users.lock();
                if users.values().any(|u| u.username == username) {
                    return Err(duplicate_username(username));
                }
                let user = User::new(Uuid::new_v4(), username.to_string(), None);
                users.insert(user.id, user.clone());
                Ok(user)
            }
            Users::Postgres(pool) => {
                let client = pool.get().await?;
                let row = client
                    .query_one(
                        r#"
                        INSERT INTO users (id, username)
                        VALUES ($1, $2)
                        RETURNING id, username, current_session_id
                        "#,
                        &[&Uuid::new_v4(), &username],
                    )
                    .await
                    .map_err(|e| {
                        if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                            duplicate_username(username)
                        } else {
                            AppError::Database(e)
                        }
                    })?;
                row_to_user(&row)
            }
        }
    }

    /// Finds a user by their username.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        match self {
            Users::Memory(users) => Ok(users
                .lock()
                .values()
                .find(|u| u.username == username)
                .cloned()),
            Users::Postgres(pool) => {
                let client = pool.get().await?;
                let row = client
                    .query_opt(
                        r#"
                        SELECT id, username, current_session_id
                        FROM users
                        WHERE username = $1
                        "#,
                        &[&username],
                    )
                    .await?;
                row.map(|r| row_to_user(&r)).transpose()
            }
        }
    }

    /// Finds a user by their ID.
    pub async fn find_by_id(&self, user_id: &Uuid) -> Result<Option<User>> {
        match self {
            Users::Memory(users) => Ok(users.lock().get(user_id).cloned()),
            Users::Postgres(pool) => {
                let client = pool.get().await?;
                let row = client
                    .query_opt(
                        r#"
                        SELECT id, username, current_session_id
                        FROM users
                        WHERE id = $1
                        "#,
                        &[user_id],
                    )
                    .await?;
                row.map(|r| row_to_user(&r)).transpose()
            }
        }
    }

    /// Sets or clears a user's current session pointer.
    pub async fn set_current_session(&self, user_id: &Uuid, pointer: Option<&str>) -> Result<()> {
        match self {
            Users::Memory(users) => {
                let mut users = users.lock();
                let user = users
                    .get_mut(user_id)
                    .ok_or_else(|| AppError::Internal(format!("user {} vanished", user_id)))?;
                user.current_session_id = pointer.map(str::to_string);
                Ok(())
            }
            Users::Postgres(pool) => {
                let client = pool.get().await?;
                let updated = client
                    .execute(
                        "UPDATE users SET current_session_id = $1 WHERE id = $2",
                        &[&pointer, user_id],
                    )
                    .await?;
                if updated == 0 {
                    return Err(AppError::Internal(format!("user {} vanished", user_id)));
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl UserDelegate for Users {
    type User = User;

    async fn fetch_user_by_id(&self, account_id: &str) -> anyhow::Result<User> {
        let user_id: Uuid = account_id.parse()?;
        self.find_by_id(&user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no user with id {}", user_id))
    }

    async fn update_current_session(
        &self,
        user: &User,
        pointer: Option<&SessionPointer>,
    ) -> anyhow::Result<()> {
        self.set_current_session(&user.id, pointer.map(SessionPointer::as_str))
            .await?;
        Ok(())
    }
}
