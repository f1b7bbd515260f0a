use chrono::{DateTime, Utc};

use crate::crypto::session_key::SessionKey;

/// Represents one authenticated client context.
///
/// A session is valid iff `now < expiration_date`. At most one row exists per
/// `account_id` in any store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The account this session authenticates.
    pub account_id: String,
    /// The opaque key carried by the session cookie.
    pub session_key: SessionKey,
    /// The instant the session stops being valid.
    pub expiration_date: DateTime<Utc>,
}

impl Session {
    /// Whether the session is still valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiration_date
    }
}
