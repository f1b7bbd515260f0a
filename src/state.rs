use anyhow::Result;
use redis::aio::ConnectionManager;
use std::sync::Arc;

use sesh::{
    MemoryStore, PgSessionStore, RedisSessionStore, SessionCookie, SessionGate, SessionPolicy,
    SessionStore, UserSessions,
};

use crate::config::{Config, StoreKind};
use crate::repositories::user::Users;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// The account table.
    pub users: Users,
    /// The session gate, which also owns the session lifecycle.
    pub gate: SessionGate<Users>,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let (store, users): (Arc<dyn SessionStore>, Users) = match config.store {
            StoreKind::Memory => {
                let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
                tracing::info!("✅ In-memory session store initialized");
                (store, Users::memory())
            }
            StoreKind::Postgres => {
                let database_url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;
                let db = sesh::db::create_pool(database_url)?;
                tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

                let store = PgSessionStore::new(db.clone());
                store.migrate().await?;
                let users = Users::Postgres(db);
                users.migrate().await?;
                tracing::info!("✅ Schema migrations applied");

                let store: Arc<dyn SessionStore> = Arc::new(store);
                (store, users)
            }
            StoreKind::Redis => {
                let redis_client = redis::Client::open(config.redis_url.as_str())?;
                let redis = ConnectionManager::new(redis_client).await?;
                tracing::info!("✅ Redis Connection Manager initialized (pooled)");

                let store: Arc<dyn SessionStore> = Arc::new(RedisSessionStore::new(redis));
                (store, Users::memory())
            }
        };

        let policy = SessionPolicy::new(store, config.session_timeout);
        let sessions = UserSessions::new(policy, Arc::new(users.clone()));
        let cookie = SessionCookie::new(config.cookie_name.clone(), config.secure_cookies);

        Ok(AppState {
            config: config.clone(),
            users,
            gate: SessionGate::new(sessions, cookie),
        })
    }

    /// The session lifecycle.
    pub fn sessions(&self) -> &UserSessions<Users> {
        self.gate.sessions()
    }

    /// The session cookie settings.
    pub fn cookie(&self) -> &SessionCookie {
        self.gate.cookie()
    }
}
