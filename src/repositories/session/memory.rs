use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use super::{SessionStore, expiry_after};
use crate::{crypto::session_key::SessionKey, error::StoreError, models::session::Session};

/// An in-process session store.
///
/// Sessions live only as long as the process and are not shared between
/// instances, so this suits tests and single-node development servers.
/// Every operation runs under one lock, which makes each of them atomic.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

#[derive(Default)]
struct Tables {
    by_key: HashMap<String, Row>,
    by_account: HashMap<String, String>,
}

struct Row {
    account_id: String,
    expiration_date: DateTime<Utc>,
}

impl Row {
    fn to_session(&self, session_key: &str) -> Session {
        Session {
            account_id: self.account_id.clone(),
            session_key: SessionKey::from(session_key.to_string()),
            expiration_date: self.expiration_date,
        }
    }
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.by_key.len()
    }

    /// Whether the store holds no rows.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(
        &self,
        account_id: &str,
        session_key: &SessionKey,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expiration_date = expiry_after(Utc::now(), ttl)?;
        let mut tables = self.inner.lock().await;
        let key = session_key.expose();

        if tables.by_account.contains_key(account_id) || tables.by_key.contains_key(key) {
            return Err(StoreError::Conflict);
        }

        tables.by_key.insert(
            key.to_string(),
            Row {
                account_id: account_id.to_string(),
                expiration_date,
            },
        );
        tables
            .by_account
            .insert(account_id.to_string(), key.to_string());

        Ok(())
    }

    async fn fetch_possibly_expired(
        &self,
        account_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let tables = self.inner.lock().await;

        let session = tables.by_account.get(account_id).and_then(|key| {
            tables.by_key.get(key).map(|row| row.to_session(key))
        });

        Ok(session)
    }

    async fn delete(&self, session_key: &str) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().await;

        let row = tables
            .by_key
            .remove(session_key)
            .ok_or(StoreError::NotFound)?;

        if tables.by_account.get(&row.account_id).map(String::as_str) == Some(session_key) {
            tables.by_account.remove(&row.account_id);
        }

        Ok(())
    }

    async fn extend_and_fetch(
        &self,
        session_key: &str,
        ttl: Duration,
    ) -> Result<Session, StoreError> {
        let mut tables = self.inner.lock().await;
        let now = Utc::now();
        let extended_to = expiry_after(now, ttl)?;

        let row = tables
            .by_key
            .get_mut(session_key)
            .ok_or(StoreError::NotFound)?;

        if row.expiration_date <= now {
            return Err(StoreError::Expired);
        }

        row.expiration_date = row.expiration_date.max(extended_to);

        Ok(row.to_session(session_key))
    }

    async fn reap_expired(&self) -> Result<u64, StoreError> {
        let mut tables = self.inner.lock().await;
        let now = Utc::now();

        let expired: Vec<(String, String)> = tables
            .by_key
            .iter()
            .filter(|(_, row)| row.expiration_date <= now)
            .map(|(key, row)| (key.clone(), row.account_id.clone()))
            .collect();

        for (key, account_id) in &expired {
            tables.by_key.remove(key);
            if tables.by_account.get(account_id) == Some(key) {
                tables.by_account.remove(account_id);
            }
        }

        Ok(expired.len() as u64)
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
