//! In-memory doubles for tests of code built on this crate.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{
    crypto::session_key::SessionPointer,
    services::{
        events::{EventFields, EventSink, SessionEvent},
        user_sessions::{SessionUser, UserDelegate},
    },
};

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLine {
    pub event: SessionEvent,
    pub fields: EventFields,
}

/// An [`EventSink`] that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    lines: Mutex<Vec<EventLine>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, oldest first.
    pub fn all(&self) -> Vec<EventLine> {
        self.lines.lock().clone()
    }

    /// The recorded events of one kind.
    pub fn matching(&self, event: SessionEvent) -> Vec<EventLine> {
        self.lines
            .lock()
            .iter()
            .filter(|line| line.event == event)
            .cloned()
            .collect()
    }

    /// The single recorded event of one kind. Fails on zero or several.
    pub fn only_matching(&self, event: SessionEvent) -> anyhow::Result<EventLine> {
        let mut lines = self.matching(event);
        match lines.len() {
            1 => Ok(lines.remove(0)),
            n => anyhow::bail!("expected exactly one {} event, found {}", event, n),
        }
    }
}

impl EventSink for RecordingEventSink {
    fn record(&self, event: SessionEvent, fields: &EventFields) {
        self.lines.lock().push(EventLine {
            event,
            fields: fields.clone(),
        });
    }
}

/// A minimal user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUser {
    pub id: String,
    pub username: String,
}

impl SessionUser for TestUser {
    fn session_account_id(&self) -> &str {
        &self.id
    }
}

/// A [`UserDelegate`] over an in-memory user table.
#[derive(Debug, Default)]
pub struct MemoryUserDelegate {
    users: Mutex<HashMap<String, TestUser>>,
    pointers: Mutex<HashMap<String, SessionPointer>>,
    fail_updates: AtomicBool,
    updates: AtomicUsize,
}

impl MemoryUserDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user and returns it.
    pub fn insert(&self, id: &str, username: &str) -> TestUser {
        let user = TestUser {
            id: id.to_string(),
            username: username.to_string(),
        };
        self.users.lock().insert(user.id.clone(), user.clone());
        user
    }

    /// Deletes a user, leaving any session it owns in place.
    pub fn remove(&self, id: &str) {
        self.users.lock().remove(id);
    }

    /// The user's current session pointer.
    pub fn pointer(&self, id: &str) -> Option<SessionPointer> {
        self.pointers.lock().get(id).cloned()
    }

    /// Makes every later pointer update fail.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// How many pointer updates were attempted.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDelegate for MemoryUserDelegate {
    type User = TestUser;

    async fn fetch_user_by_id(&self, account_id: &str) -> anyhow::Result<TestUser> {
        self.users
            .lock()
            .get(account_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("user {} not found", account_id))
    }

    async fn update_current_session(
        &self,
        user: &TestUser,
        pointer: Option<&SessionPointer>,
    ) -> anyhow::Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            anyhow::bail!("user table unavailable");
        }

        let mut pointers = self.pointers.lock();
        match pointer {
            Some(pointer) => pointers.insert(user.id.clone(), pointer.clone()),
            None => pointers.remove(&user.id),
        };
        Ok(())
    }
}
