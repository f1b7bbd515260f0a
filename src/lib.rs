//! Single-session-per-account user sessions for axum services.
//!
//! An account holds at most one valid session. Logging in again displaces the
//! previous session, every authenticated request slides the expiration
//! forward, and logout deletes the session outright.
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::{Router, middleware::from_fn_with_state, routing::get};
//! use tower_cookies::CookieManagerLayer;
//! use sesh::{
//!     MemoryStore, SessionCookie, SessionGate, SessionPolicy, UserSessions,
//!     require_session, testing::MemoryUserDelegate,
//! };
//!
//! # async fn run() {
//! let policy = SessionPolicy::new(Arc::new(MemoryStore::new()), chrono::Duration::minutes(5));
//! let sessions = UserSessions::new(policy, Arc::new(MemoryUserDelegate::new()));
//! let gate = SessionGate::new(sessions, SessionCookie::default());
//!
//! let app: Router = Router::new()
//!     .route("/private", get(|| async { "hello" }))
//!     .route_layer(from_fn_with_state(gate, require_session::<MemoryUserDelegate>))
//!     .layer(CookieManagerLayer::new());
//! # }
//! ```

pub mod db;
pub mod error;
pub mod testing;

pub mod crypto {
    pub mod session_key;
}

pub mod models {
    pub mod session;
}

pub mod repositories {
    pub mod session;
}

pub mod services {
    pub mod events;
    pub mod policy;
    pub mod user_sessions;
}

pub mod middleware_layer {
    pub mod cookie;
    pub mod session;
}

pub use crypto::session_key::{SessionKey, SessionPointer, session_key_hash};
pub use error::{SessionError, StoreError};
pub use middleware_layer::{
    cookie::{DEFAULT_SESSION_COOKIE_NAME, SessionCookie},
    session::{AuthContext, CurrentSession, RejectionHandler, SessionGate, require_session},
};
pub use models::session::Session;
pub use repositories::session::{MemoryStore, PgSessionStore, RedisSessionStore, SessionStore};
pub use services::{
    events::{EventFields, EventSink, SessionEvent, TracingEventSink},
    policy::SessionPolicy,
    user_sessions::{SessionUser, UserDelegate, UserSessions},
};
