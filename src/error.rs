use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors raised by a [`SessionStore`](crate::repositories::session::SessionStore) backend.
///
/// `NotFound`, `Expired` and `Conflict` are the store's sentinels; every other
/// variant is an unexpected backend failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No row matched the given session key.
    #[error("session not found")]
    NotFound,

    /// A row matched, but its expiration date has passed.
    #[error("session expired")]
    Expired,

    /// A uniqueness constraint (account or session key) rejected the write.
    #[error("a session already exists for this account or key")]
    Conflict,

    /// A PostgreSQL error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A connection pool construction error.
    #[error("Pool creation error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// `now + ttl` does not fit in a timestamp.
    #[error("session expiration out of range (ttl {0})")]
    ExpiryOutOfRange(chrono::Duration),

    /// A row that could not be decoded into a session.
    #[error("Corrupt session record: {0}")]
    Corrupt(String),
}

/// The session manager's error taxonomy.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Authenticate was called with an empty account identifier. No I/O was performed.
    #[error("cannot create a session for an empty account id")]
    EmptySubject,

    /// The request carried no session credential.
    #[error("no session credential present")]
    NoSession,

    /// The credential matched a session whose expiration date has passed.
    #[error("session is expired")]
    SessionExpired,

    /// The credential matched no session at all.
    #[error("valid session not found")]
    SessionNotFound,

    /// The store rejected a duplicate session for the same account or key.
    #[error("a session for this account was created concurrently")]
    ConstraintConflict,

    /// The session store changed but the account's session pointer could not be updated.
    #[error("failed to synchronize the account session pointer: {0}")]
    PointerSyncFailure(#[source] anyhow::Error),

    /// A handler asked for request-scoped session state that no gate attached.
    #[error("{0} was not attached to the request; is the route behind require_session?")]
    MissingContext(&'static str),

    /// Any unexpected store or collaborator failure.
    #[error("internal session failure: {0}")]
    InternalFailure(#[source] anyhow::Error),
}

/// A `Result` type that uses `SessionError` as the error type.
pub type Result<T> = std::result::Result<T, SessionError>;

impl From<StoreError> for SessionError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => SessionError::SessionNotFound,
            StoreError::Expired => SessionError::SessionExpired,
            StoreError::Conflict => SessionError::ConstraintConflict,
            other => SessionError::InternalFailure(other.into()),
        }
    }
}

impl SessionError {
    /// Whether this error means "the caller is not authenticated".
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            SessionError::NoSession | SessionError::SessionExpired | SessionError::SessionNotFound
        )
    }

    /// Renders the error's response without logging it.
    ///
    /// Use this where the failure has already been logged, as
    /// [`require_session`](crate::require_session) does before rejecting.
    pub fn render(&self) -> Response {
        let (status, message) = match self {
            SessionError::NoSession
            | SessionError::SessionExpired
            | SessionError::SessionNotFound => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            SessionError::ConstraintConflict => (StatusCode::CONFLICT, "Conflict"),
            SessionError::EmptySubject
            | SessionError::PointerSyncFailure(_)
            | SessionError::MissingContext(_)
            | SessionError::InternalFailure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        match &self {
            SessionError::ConstraintConflict => {
                tracing::warn!("Session creation lost a concurrent login race");
            }
            SessionError::EmptySubject => {
                tracing::error!("Session requested for an empty account id");
            }
            SessionError::MissingContext(what) => {
                tracing::error!("Missing request context: {}", what);
            }
            SessionError::InternalFailure(e) => {
                tracing::error!("Internal session error: {:#}", e);
            }
            // Logged where the pointer update failed.
            SessionError::PointerSyncFailure(_) => {}
            SessionError::NoSession
            | SessionError::SessionExpired
            | SessionError::SessionNotFound => {}
        }

        self.render()
    }
}
