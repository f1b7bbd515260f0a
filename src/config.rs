use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use anyhow::{Context, Result};

use sesh::DEFAULT_SESSION_COOKIE_NAME;

/// Which session store backs the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Postgres,
    Redis,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            "redis" => Ok(StoreKind::Redis),
            other => anyhow::bail!("SESSION_STORE must be memory, postgres or redis, got {:?}", other),
        }
    }
}

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The session store backend.
    pub store: StoreKind,
    /// The URL of the PostgreSQL database. Required for the `postgres` store.
    pub database_url: Option<String>,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The sliding session lifetime.
    pub session_timeout: chrono::Duration,
    /// The name of the session cookie.
    pub cookie_name: String,
    /// Whether the session cookie carries the `Secure` attribute.
    pub secure_cookies: bool,
    /// The address the server listens on.
    pub bind_addr: SocketAddr,
    /// How often expired sessions are reaped, in seconds.
    pub reap_interval_seconds: u64,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let store: StoreKind = env::var("SESSION_STORE")
            .unwrap_or_else(|_| "memory".to_string())
            .parse()?;

        let database_url = env::var("DATABASE_URL").ok();
        if store == StoreKind::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set when SESSION_STORE=postgres");
        }

        let is_production = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string()) == "production";

        let reap_interval_seconds: u64 = env::var("REAP_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .context("Invalid REAP_INTERVAL_SECONDS")?;
        if reap_interval_seconds == 0 {
            anyhow::bail!("REAP_INTERVAL_SECONDS must be greater than zero");
        }

        Ok(Self {
            store,
            database_url,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            session_timeout: parse_session_timeout(
                &env::var("SESSION_TIMEOUT_SECONDS").unwrap_or_else(|_| "300".to_string()),
            )?,
            cookie_name: env::var("SESSION_COOKIE_NAME")
                .unwrap_or_else(|_| DEFAULT_SESSION_COOKIE_NAME.to_string()),
            secure_cookies: is_production,
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
                .parse()
                .context("Invalid BIND_ADDR")?,
            reap_interval_seconds,
        })
    }
}

/// Parses `SESSION_TIMEOUT_SECONDS`. Negative values are allowed.
fn parse_session_timeout(value: &str) -> Result<chrono::Duration> {
    let seconds: i64 = value
        .parse()
        .context("Invalid SESSION_TIMEOUT_SECONDS")?;
    chrono::Duration::try_seconds(seconds)
        .context("SESSION_TIMEOUT_SECONDS is out of range")
}
