use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::{
    crypto::session_key::{SessionKey, session_key_hash},
    error::{Result, SessionError, StoreError},
    models::session::Session,
    repositories::session::SessionStore,
    services::events::{EventSink, SessionEvent, TracingEventSink, session_fields},
};

/// The session lifecycle state machine.
///
/// Holds no per-request state: clone it freely and share it across request
/// handlers. All cross-request coordination is left to the store.
#[derive(Clone)]
pub struct SessionPolicy {
    store: Arc<dyn SessionStore>,
    events: Arc<dyn EventSink>,
    timeout: Duration,
}

impl SessionPolicy {
    /// Creates a new `SessionPolicy`.
    ///
    /// # Arguments
    ///
    /// * `store` - The backing session store.
    /// * `timeout` - The sliding session lifetime. A negative value makes
    ///   every new session expired on arrival.
    pub fn new(store: Arc<dyn SessionStore>, timeout: Duration) -> Self {
        Self {
            store,
            events: Arc::new(TracingEventSink),
            timeout,
        }
    }

    /// Replaces the default `tracing` event sink.
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The configured sliding session lifetime.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts a session for `account_id`, displacing any session it already has.
    ///
    /// On success exactly one session exists for the account and it is the
    /// returned one. A concurrent login for the same account that wins the
    /// race surfaces here as [`SessionError::ConstraintConflict`].
    pub async fn authenticate(&self, account_id: &str) -> Result<SessionKey> {
        let session_key = self.create_session(account_id).await?;
        self.record_created(account_id, &session_key);
        Ok(session_key)
    }

    /// Displaces any existing session and commits a new one, without
    /// emitting `session-created`.
    pub(crate) async fn create_session(&self, account_id: &str) -> Result<SessionKey> {
        if account_id.is_empty() {
            return Err(SessionError::EmptySubject);
        }

        let session_key = SessionKey::generate();

        if let Some(existing) = self.store.fetch_possibly_expired(account_id).await? {
            self.displace(existing).await;
        }

        self.store
            .create(account_id, &session_key, self.timeout)
            .await?;

        Ok(session_key)
    }

    pub(crate) fn record_created(&self, account_id: &str, session_key: &SessionKey) {
        let mut fields = session_fields(session_key.hash());
        fields.insert("account_id", account_id.to_string());
        self.events.record(SessionEvent::SessionCreated, &fields);
    }

    /// Removes a prior session during login. Failures are logged, not raised:
    /// a stale row is either overwritten later or rejected by `create`.
    async fn displace(&self, existing: Session) {
        let now = Utc::now();
        let old_hash = existing.session_key.hash();

        let mut fields = session_fields(old_hash.clone());
        fields.insert("account_id", existing.account_id.clone());

        if existing.is_valid_at(now) {
            self.events
                .record(SessionEvent::ConcurrentLoginDisplaced, &fields);
        } else {
            fields.insert("expired_at", existing.expiration_date.to_rfc3339());
            self.events.record(SessionEvent::PreviousSessionExpired, &fields);
        }

        if let Err(e) = self.store.delete(existing.session_key.expose()).await {
            tracing::warn!(
                session_hash = %old_hash,
                account_id = %existing.account_id,
                "⚠️ Failed to delete displaced session, continuing with login: {}",
                e
            );
        }
    }

    /// Checks a presented key and slides its expiration forward.
    ///
    /// Returns the extended session, or `SessionExpired` / `SessionNotFound`.
    pub async fn validate(&self, session_key: &str) -> Result<Session> {
        match self.store.extend_and_fetch(session_key, self.timeout).await {
            Ok(session) => {
                tracing::debug!(session_hash = %session.session_key.hash(), "✅ Session valid");
                Ok(session)
            }
            Err(StoreError::Expired) => {
                let fields = session_fields(session_key_hash(session_key));
                self.events.record(SessionEvent::SessionExpired, &fields);
                Err(SessionError::SessionExpired)
            }
            Err(StoreError::NotFound) => {
                let fields = session_fields(session_key_hash(session_key));
                self.events.record(SessionEvent::SessionNotFound, &fields);
                Err(SessionError::SessionNotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ends a session. A key with no row is reported as `SessionNotFound`.
    pub async fn destroy(&self, session_key: &str) -> Result<()> {
        let fields = session_fields(session_key_hash(session_key));

        match self.store.delete(session_key).await {
            Ok(()) => {
                self.events.record(SessionEvent::SessionDestroyed, &fields);
                Ok(())
            }
            Err(StoreError::NotFound) => {
                self.events.record(SessionEvent::SessionNotFound, &fields);
                Err(SessionError::SessionNotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every expired row in the store.
    pub async fn reap_expired(&self) -> Result<u64> {
        let reaped = self.store.reap_expired().await?;
        if reaped > 0 {
            tracing::info!("🧹 Reaped {} expired sessions", reaped);
        }
        Ok(reaped)
    }

    /// Releases the store's connections.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await?;
        Ok(())
    }
}
