use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::{Script, aio::ConnectionManager};

use super::{SessionStore, expiry_after};
use crate::{crypto::session_key::SessionKey, error::StoreError, models::session::Session};

/// How long an expired row lingers before Redis drops it on its own.
const DEFAULT_RETENTION_HOURS: i64 = 24;

// KEYS[1] = session hash, KEYS[2] = account index
// ARGV[1] = account id, ARGV[2] = session key, ARGV[3] = expires_at ms, ARGV[4] = retain-until ms
const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 or redis.call('EXISTS', KEYS[2]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], 'account_id', ARGV[1], 'expires_at', ARGV[3])
redis.call('SET', KEYS[2], ARGV[2])
redis.call('PEXPIREAT', KEYS[1], ARGV[4])
redis.call('PEXPIREAT', KEYS[2], ARGV[4])
return 1
"#;

// KEYS[1] = account index
// ARGV[1] = session hash key prefix
const FETCH_BY_ACCOUNT_SCRIPT: &str = r#"
local key = redis.call('GET', KEYS[1])
if not key then
    return {}
end
local fields = redis.call('HMGET', ARGV[1] .. key, 'account_id', 'expires_at')
if not fields[1] then
    return {}
end
return {key, fields[1], fields[2]}
"#;

// KEYS[1] = session hash
// ARGV[1] = account index prefix, ARGV[2] = session key
const DELETE_SCRIPT: &str = r#"
local account = redis.call('HGET', KEYS[1], 'account_id')
if not account then
    return 0
end
redis.call('DEL', KEYS[1])
local index = ARGV[1] .. account
if redis.call('GET', index) == ARGV[2] then
    redis.call('DEL', index)
end
return 1
"#;

// KEYS[1] = session hash
// ARGV[1] = now ms, ARGV[2] = now + ttl ms, ARGV[3] = retention ms, ARGV[4] = account index prefix
// Returns {status, account_id, expires_at}: 1 extended, -1 missing, -2 expired.
const EXTEND_SCRIPT: &str = r#"
local fields = redis.call('HMGET', KEYS[1], 'account_id', 'expires_at')
if not fields[1] then
    return {-1, '', '0'}
end
local expires_at = tonumber(fields[2])
if expires_at <= tonumber(ARGV[1]) then
    return {-2, fields[1], fields[2]}
end
local extended = fields[2]
if tonumber(ARGV[2]) > expires_at then
    extended = ARGV[2]
end
local retain_until = string.format('%.0f', tonumber(extended) + tonumber(ARGV[3]))
redis.call('HSET', KEYS[1], 'expires_at', extended)
redis.call('PEXPIREAT', KEYS[1], retain_until)
redis.call('PEXPIREAT', ARGV[4] .. fields[1], retain_until)
return {1, fields[1], extended}
"#;

// KEYS[1] = session hash
// ARGV[1] = now ms, ARGV[2] = account index prefix, ARGV[3] = session key
const REAP_SCRIPT: &str = r#"
local fields = redis.call('HMGET', KEYS[1], 'account_id', 'expires_at')
local expires_at = tonumber(fields[2])
if not fields[1] or not expires_at or expires_at > tonumber(ARGV[1]) then
    return 0
end
redis.call('DEL', KEYS[1])
local index = ARGV[2] .. fields[1]
if redis.call('GET', index) == ARGV[3] then
    redis.call('DEL', index)
end
return 1
"#;

/// How many keys one `SCAN` step asks for while reaping.
const REAP_SCAN_COUNT: usize = 100;

/// A session store backed by Redis.
///
/// Each operation is a Lua script, so checks and writes happen atomically
/// on the server. Expired rows are kept for a retention window so that a
/// lookup can still tell "expired" from "never existed". Redis drops them
/// once the window passes, and [`SessionStore::reap_expired`] removes them
/// sooner.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
    prefix: String,
    retention: Duration,
    create_script: Script,
    fetch_script: Script,
    delete_script: Script,
    extend_script: Script,
    reap_script: Script,
}

impl RedisSessionStore {
    /// Creates a new `RedisSessionStore` with the `sesh` key prefix.
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            prefix: "sesh".to_string(),
            retention: Duration::hours(DEFAULT_RETENTION_HOURS),
            create_script: Script::new(CREATE_SCRIPT),
            fetch_script: Script::new(FETCH_BY_ACCOUNT_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
            extend_script: Script::new(EXTEND_SCRIPT),
            reap_script: Script::new(REAP_SCRIPT),
        }
    }

    /// Sets the key prefix shared by every key this store writes.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets how long expired rows linger before Redis drops them.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn session_prefix(&self) -> String {
        format!("{}:session:", self.prefix)
    }

    fn account_prefix(&self) -> String {
        format!("{}:session_account:", self.prefix)
    }

    fn parse_millis(value: &str) -> Result<DateTime<Utc>, StoreError> {
        value
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| StoreError::Corrupt(format!("expires_at={}", value)))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(
        &self,
        account_id: &str,
        session_key: &SessionKey,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = expiry_after(Utc::now(), ttl)?;
        let retain_until = expiry_after(expires_at, self.retention)?;

        let created: i64 = self
            .create_script
            .key(format!("{}{}", self.session_prefix(), session_key.expose()))
            .key(format!("{}{}", self.account_prefix(), account_id))
            .arg(account_id)
            .arg(session_key.expose())
            .arg(expires_at.timestamp_millis())
            .arg(retain_until.timestamp_millis())
            .invoke_async(&mut self.redis.clone())
            .await?;

        if created == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    async fn fetch_possibly_expired(
        &self,
        account_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let fields: Vec<String> = self
            .fetch_script
            .key(format!("{}{}", self.account_prefix(), account_id))
            .arg(self.session_prefix())
            .invoke_async(&mut self.redis.clone())
            .await?;

        match fields.as_slice() {
            [] => Ok(None),
            [key, account, expires_at] => Ok(Some(Session {
                account_id: account.clone(),
                session_key: SessionKey::from(key.clone()),
                expiration_date: Self::parse_millis(expires_at)?,
            })),
            other => Err(StoreError::Corrupt(format!(
                "account index returned {} fields",
                other.len()
            ))),
        }
    }

    async fn delete(&self, session_key: &str) -> Result<(), StoreError> {
        let deleted: i64 = self
            .delete_script
            .key(format!("{}{}", self.session_prefix(), session_key))
            .arg(self.account_prefix())
            .arg(session_key)
            .invoke_async(&mut self.redis.clone())
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
        // The script adds the retention window on top.
        expiry_after(extended_to, self.retention)?;

        let (status, account_id, expires_at): (i64, String, String) = self
            .extend_script
            .key(format!("{}{}", self.session_prefix(), session_key))
            .arg(now.timestamp_millis())
            .arg(extended_to.timestamp_millis())
            .arg(self.retention.num_milliseconds())
            .arg(self.account_prefix())
            .invoke_async(&mut self.redis.clone())
            .await?;

        match status {
            1 => Ok(Session {
                account_id,
                session_key: SessionKey::from(session_key.to_string()),
                expiration_date: Self::parse_millis(&expires_at)?,
            }),
            -2 => Err(StoreError::Expired),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn reap_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now().timestamp_millis();
        let session_prefix = self.session_prefix();
        let account_prefix = self.account_prefix();
        let mut cursor = 0u64;
        let mut reaped = 0u64;

        loop {
            let mut conn = self.redis.clone();
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{}*", session_prefix))
                .arg("COUNT")
                .arg(REAP_SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            for hash_key in keys {
                let Some(session_key) = hash_key.strip_prefix(&session_prefix) else {
                    continue;
                };

                let removed: i64 = self
                    .reap_script
                    .key(&hash_key)
                    .arg(now)
                    .arg(&account_prefix)
                    .arg(session_key)
                    .invoke_async(&mut conn)
                    .await?;
                if removed == 1 {
                    reaped += 1;
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(reaped)
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
