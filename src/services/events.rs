//! Session lifecycle events.
//!
//! Every lifecycle transition is reported to an [`EventSink`] exactly once.
//! Fields carry the hashed session key under `session_hash`, never the raw key.

use std::collections::BTreeMap;
use std::fmt;

/// Structured fields attached to an event.
pub type EventFields = BTreeMap<&'static str, String>;

/// A session lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    /// A new session row was committed.
    SessionCreated,
    /// A session was deleted by logout.
    SessionDestroyed,
    /// A presented key matched an expired session.
    SessionExpired,
    /// A presented key matched no session.
    SessionNotFound,
    /// A login replaced a session that was still valid.
    ConcurrentLoginDisplaced,
    /// A login replaced a session that had already expired.
    PreviousSessionExpired,
}

impl SessionEvent {
    /// The event name as it appears in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEvent::SessionCreated => "session-created",
            SessionEvent::SessionDestroyed => "session-destroyed",
            SessionEvent::SessionExpired => "session-expired",
            SessionEvent::SessionNotFound => "session-not-found",
            SessionEvent::ConcurrentLoginDisplaced => "concurrent-login-displaced",
            SessionEvent::PreviousSessionExpired => "previous-session-expired",
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives session lifecycle events.
pub trait EventSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: SessionEvent, fields: &EventFields);
}

/// The default sink: one `tracing` record per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: SessionEvent, fields: &EventFields) {
        match event {
            SessionEvent::SessionExpired | SessionEvent::SessionNotFound => {
                tracing::info!(event = event.as_str(), ?fields, "🔒 Session rejected");
            }
            _ => {
                tracing::info!(event = event.as_str(), ?fields, "🔑 Session lifecycle");
            }
        }
    }
}

/// Builds the field set shared by every event.
pub(crate) fn session_fields(session_hash: String) -> EventFields {
    let mut fields = EventFields::new();
    fields.insert("session_hash", session_hash);
    fields
}
