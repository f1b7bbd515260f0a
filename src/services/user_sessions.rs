use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    crypto::session_key::{SessionKey, SessionPointer},
    error::{Result, SessionError},
    middleware_layer::{cookie::SessionCookie, session::AuthContext},
    services::policy::SessionPolicy,
};

/// A user record that can own a session.
pub trait SessionUser {
    /// The account identifier sessions are keyed by.
    fn session_account_id(&self) -> &str;
}

/// The embedding application's account store, as seen by the session manager.
#[async_trait]
pub trait UserDelegate: Send + Sync + 'static {
    /// The application's user type.
    type User: SessionUser + Clone + Send + Sync + 'static;

    /// Loads the user a validated session belongs to.
    async fn fetch_user_by_id(&self, account_id: &str) -> anyhow::Result<Self::User>;

    /// Records `pointer` as the user's current session, or clears it on `None`.
    async fn update_current_session(
        &self,
        user: &Self::User,
        pointer: Option<&SessionPointer>,
    ) -> anyhow::Result<()>;
}

/// Session lifecycle bound to an application's users.
///
/// Runs the policy engine first and only then touches the user's session
/// pointer, so a pointer never names a session the store did not commit.
pub struct UserSessions<D: UserDelegate> {
    policy: SessionPolicy,
    delegate: Arc<D>,
}

impl<D: UserDelegate> Clone for UserSessions<D> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            delegate: self.delegate.clone(),
        }
    }
}

impl<D: UserDelegate> UserSessions<D> {
    /// Creates a new `UserSessions`.
    pub fn new(policy: SessionPolicy, delegate: Arc<D>) -> Self {
        Self { policy, delegate }
    }

    /// The underlying policy engine.
    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// The application's user delegate.
    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    /// Creates a session for a user who just proved their identity.
    ///
    /// `session-created` is emitted once the pointer is in place. If the
    /// pointer update fails, the new session already exists in the store; the
    /// error is returned as [`SessionError::PointerSyncFailure`] and the
    /// caller decides whether to retry.
    pub async fn user_did_authenticate(&self, user: &D::User) -> Result<SessionKey> {
        let account_id = user.session_account_id();
        let session_key = self.policy.create_session(account_id).await?;

        self.delegate
            .update_current_session(user, Some(&session_key.pointer()))
            .await
            .map_err(|e| {
                tracing::error!(
                    account_id = %account_id,
                    session_hash = %session_key.hash(),
                    "❌ Session created but pointer update failed: {:#}",
                    e
                );
                SessionError::PointerSyncFailure(e)
            })?;

        self.policy.record_created(account_id, &session_key);
        tracing::info!("✅ User logged in: {}", account_id);
        Ok(session_key)
    }

    /// Ends the session a gated request was made with and clears the user's pointer.
    pub async fn user_did_logout(&self, context: &AuthContext<D::User>) -> Result<()> {
        let session = context.session();
        self.policy.destroy(session.session_key.expose()).await?;

        self.delegate
            .update_current_session(context.user(), None)
            .await
            .map_err(|e| {
                tracing::error!(
                    account_id = %session.account_id,
                    "❌ Session destroyed but pointer reset failed: {:#}",
                    e
                );
                SessionError::PointerSyncFailure(e)
            })?;

        tracing::info!("✅ User logged out: {}", session.account_id);
        Ok(())
    }

    /// Validates a presented key and loads the user it belongs to.
    pub async fn resolve(&self, session_key: &str) -> Result<AuthContext<D::User>> {
        let session = self.policy.validate(session_key).await?;

        let user = self
            .delegate
            .fetch_user_by_id(&session.account_id)
            .await
            .map_err(|e| {
                SessionError::InternalFailure(e.context(format!(
                    "fetching user {} for a valid session",
                    session.account_id
                )))
            })?;

        Ok(AuthContext::new(session, user))
    }

    /// Logs `user` in and attaches the session cookie to a request under
    /// construction. For tests of gated routes that should skip the login flow.
    pub async fn authenticate_test_request<B>(
        &self,
        request: &mut http::Request<B>,
        user: &D::User,
        cookie: &SessionCookie,
    ) -> Result<SessionKey> {
        let session_key = self.user_did_authenticate(user).await?;
        request
            .headers_mut()
            .append(http::header::COOKIE, cookie.request_header(&session_key)?);
        Ok(session_key)
    }
}
