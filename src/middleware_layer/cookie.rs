use http::HeaderValue;
use std::borrow::Cow;
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};

use crate::{
    crypto::session_key::SessionKey,
    error::{Result, SessionError},
};

/// The default session cookie name.
pub const DEFAULT_SESSION_COOKIE_NAME: &str = "sesh-session-key";

/// Writes and reads the session cookie.
///
/// The cookie is HttpOnly and scoped to `/`. It carries no Max-Age or
/// Expires, so the browser drops it when the browser session ends; the
/// server-side expiration is the one that counts.
#[derive(Debug, Clone)]
pub struct SessionCookie {
    name: Cow<'static, str>,
    secure: bool,
}

impl Default for SessionCookie {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_COOKIE_NAME, false)
    }
}

impl SessionCookie {
    /// Creates a new `SessionCookie`.
    ///
    /// # Arguments
    ///
    /// * `name` - The cookie name.
    /// * `secure` - Whether to set the `Secure` attribute. Must be `false` for plain-HTTP development.
    pub fn new(name: impl Into<Cow<'static, str>>, secure: bool) -> Self {
        Self {
            name: name.into(),
            secure,
        }
    }

    /// The cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the cookie that carries `session_key`.
    pub fn build(&self, session_key: &SessionKey) -> Cookie<'static> {
        let mut cookie = Cookie::new(self.name.clone(), session_key.expose().to_string());
        cookie.set_http_only(true);
        cookie.set_secure(self.secure);
        cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
        cookie.set_path("/");
        cookie
    }

    /// Adds the session cookie to the response.
    pub fn issue(&self, cookies: &Cookies, session_key: &SessionKey) {
        cookies.add(self.build(session_key));
    }

    /// Instructs the browser to drop the session cookie immediately.
    pub fn clear(&self, cookies: &Cookies) {
        let mut cookie = Cookie::new(self.name.clone(), "");
        cookie.set_http_only(true);
        cookie.set_path("/");
        cookie.set_max_age(Duration::seconds(-1));
        cookies.add(cookie);
    }

    /// Reads the presented session key. An empty value counts as no cookie.
    pub fn read(&self, cookies: &Cookies) -> Option<String> {
        cookies
            .get(&self.name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
    }

    /// A `Cookie` request header value carrying `session_key`.
    pub fn request_header(&self, session_key: &SessionKey) -> Result<HeaderValue> {
        HeaderValue::from_str(&format!("{}={}", self.name, session_key.expose())).map_err(|e| {
            SessionError::InternalFailure(anyhow::Error::new(e).context("invalid session cookie name"))
        })
    }
}
