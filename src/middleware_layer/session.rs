use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, request::Parts},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tower_cookies::Cookies;

use crate::{
    crypto::session_key::session_key_hash,
    error::SessionError,
    middleware_layer::cookie::SessionCookie,
    models::session::Session,
    services::user_sessions::{UserDelegate, UserSessions},
};

/// Renders a rejected request. Receives the typed cause.
pub type RejectionHandler = Arc<dyn Fn(SessionError) -> Response + Send + Sync>;

/// The session and user a gated request was authenticated as.
///
/// [`require_session`] inserts one into the request extensions before the
/// wrapped handler runs; handlers take it as an extractor.
#[derive(Debug, Clone)]
pub struct AuthContext<U> {
    session: Session,
    user: U,
}

impl<U> AuthContext<U> {
    /// Creates a new `AuthContext`.
    pub fn new(session: Session, user: U) -> Self {
        Self { session, user }
    }

    /// The validated, freshly extended session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The user the session belongs to.
    pub fn user(&self) -> &U {
        &self.user
    }

    /// Splits the context into its parts.
    pub fn into_parts(self) -> (Session, U) {
        (self.session, self.user)
    }
}

impl<U, S> FromRequestParts<S> for AuthContext<U>
where
    U: Clone + Send + Sync + 'static,
    S: Send + Sync,
{
    type Rejection = SessionError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext<U>>()
            .cloned()
            .ok_or(SessionError::MissingContext("AuthContext"))
    }
}

/// The validated session of a gated request, without its user.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = SessionError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(CurrentSession)
            .ok_or(SessionError::MissingContext("CurrentSession"))
    }
}

/// The state behind [`require_session`].
pub struct SessionGate<D: UserDelegate> {
    sessions: UserSessions<D>,
    cookie: SessionCookie,
    on_reject: RejectionHandler,
}

impl<D: UserDelegate> Clone for SessionGate<D> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
            cookie: self.cookie.clone(),
            on_reject: self.on_reject.clone(),
        }
    }
}

impl<D: UserDelegate> SessionGate<D> {
    /// Creates a new `SessionGate` that answers rejections with
    /// [`SessionError::render`]. The gate logs every failure itself.
    pub fn new(sessions: UserSessions<D>, cookie: SessionCookie) -> Self {
        Self {
            sessions,
            cookie,
            on_reject: Arc::new(|error: SessionError| error.render()),
        }
    }

    /// Replaces the rejection handler.
    pub fn with_rejection_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(SessionError) -> Response + Send + Sync + 'static,
    {
        self.on_reject = Arc::new(handler);
        self
    }

    /// The session lifecycle this gate validates against.
    pub fn sessions(&self) -> &UserSessions<D> {
        &self.sessions
    }

    /// The session cookie settings.
    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }

    fn reject(&self, error: SessionError) -> Response {
        (self.on_reject)(error)
    }
}

/// A middleware that requires a valid session to be present.
///
/// # Arguments
///
/// * `gate` - The session gate.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The wrapped handler's response, or the gate's rejection response. The
/// wrapped handler never runs for a rejected request.
pub async fn require_session<D: UserDelegate>(
    State(gate): State<SessionGate<D>>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    tracing::debug!("🔐 Checking session...");

    let Some(session_key) = gate.cookie.read(&cookies) else {
        tracing::warn!("❌ Unauthorized: request is missing a session cookie");
        return gate.reject(SessionError::NoSession);
    };

    match gate.sessions.resolve(&session_key).await {
        Ok(context) => {
            tracing::debug!("✅ Session valid for account: {}", context.session().account_id);
            request.extensions_mut().insert(context.session().clone());
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(error) => {
            let session_hash = session_key_hash(&session_key);
            match &error {
                SessionError::SessionExpired => {
                    tracing::warn!(%session_hash, "❌ Auth failed because of an expired session");
                }
                SessionError::SessionNotFound => {
                    tracing::warn!(%session_hash, "❌ Auth failed because of an invalid session");
                }
                other => {
                    tracing::error!(%session_hash, "❌ Unexpected error while checking the session: {:#}", other);
                }
            }
            gate.reject(error)
        }
    }
}
