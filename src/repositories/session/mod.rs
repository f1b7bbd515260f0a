//! The session store contract and its backends.
//!
//! A store is an opaque keyed table of [`Session`] rows. It owns the two
//! uniqueness constraints (one row per account, one row per key) and each
//! operation must be atomic on its own; the policy engine never holds a lock
//! across calls.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{crypto::session_key::SessionKey, error::StoreError, models::session::Session};

pub mod memory;
pub mod postgres;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::postgres::PgSessionStore;
pub use self::redis::RedisSessionStore;

/// `now + ttl`, or [`StoreError::ExpiryOutOfRange`] if that overflows.
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
    now.checked_add_signed(ttl)
        .ok_or(StoreError::ExpiryOutOfRange(ttl))
}

/// Backend-facing session storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a row expiring at `now + ttl`.
    ///
    /// Fails with [`StoreError::Conflict`] if the account already has a row,
    /// expired or not, or if the key is taken.
    async fn create(
        &self,
        account_id: &str,
        session_key: &SessionKey,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Returns the account's row regardless of its expiration date.
    ///
    /// Only the login flow may use this; it must never be used to authorize a request.
    async fn fetch_possibly_expired(&self, account_id: &str)
    -> Result<Option<Session>, StoreError>;

    /// Deletes the row with the given key, or fails with [`StoreError::NotFound`].
    async fn delete(&self, session_key: &str) -> Result<(), StoreError>;

    /// Extends a still-valid row to `max(expiration_date, now + ttl)` and returns it.
    ///
    /// The validity check and the extension are one atomic step. A miss is
    /// reported as [`StoreError::Expired`] if the row exists and
    /// [`StoreError::NotFound`] if it does not.
    async fn extend_and_fetch(&self, session_key: &str, ttl: Duration)
    -> Result<Session, StoreError>;

    /// Deletes rows whose expiration date has passed, returning how many went.
    async fn reap_expired(&self) -> Result<u64, StoreError>;

    /// Releases the backend's connections.
    async fn close(&self) -> Result<(), StoreError>;
}
