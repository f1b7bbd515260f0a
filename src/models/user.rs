use serde::Serialize;
use uuid::Uuid;

use sesh::SessionUser;

/// Represents a user in the system.
#[derive(Clone, Debug, Serialize)]
pub struct User {
    /// The unique identifier for the user.
    pub id: Uuid,
    /// The user's username.
    pub username: String,
    /// The pointer to the user's current session, if any.
    #[serde(skip)]
    pub current_session_id: Option<String>,
    #[serde(skip)]
    account_id: String,
}

impl User {
    /// Creates a new `User`.
    pub fn new(id: Uuid, username: String, current_session_id: Option<String>) -> Self {
        Self {
            id,
            username,
            current_session_id,
            account_id: id.to_string(),
        }
    }
}

impl SessionUser for User {
    fn session_account_id(&self) -> &str {
        &self.account_id
    }
}
