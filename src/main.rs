use axum::{
    Router,
    routing::{get, post},
    middleware::from_fn_with_state,
};

use std::time::Duration;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{TraceLayer, DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, DefaultOnFailure};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod state;

mod models {
    pub mod user;
}

mod repositories {
    pub mod user;
}

mod handlers {
    pub mod auth;
    pub mod error;
}

mod validation {
    pub mod auth;
}

use config::Config;
use repositories::user::Users;
use state::AppState;

/// Builds the server's router.
fn app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/me", get(handlers::auth::me))
        .route_layer(from_fn_with_state(
            state.gate.clone(),
            sesh::require_session::<Users>,
        ))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully ({:?} session store)", config.store);

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let reap_policy = state.sessions().policy().clone();
    let reap_interval = Duration::from_secs(state.config.reap_interval_seconds);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(reap_interval).await;
            tracing::info!("🧹 Running scheduled cleanup of expired sessions...");
            match reap_policy.reap_expired().await {
                Ok(removed) => {
                    tracing::info!("✅ Cleanup job completed, {} sessions removed", removed);
                }
                Err(e) => {
                    tracing::error!("❌ Cleanup job failed: {}", e);
                }
            }
        }
    });

    let policy = state.sessions().policy().clone();
    let addr = state.config.bind_addr;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!(
        "✅ Background cleanup job started (runs every {}s)",
        config.reap_interval_seconds
    );
    tracing::info!("✅ All systems operational");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("👋 Shutdown signal received");
        })
        .await?;

    policy.close().await?;
    tracing::info!("✅ Session store closed");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use tower::ServiceExt;

    fn memory_config() -> Config {
        Config {
            store: config::StoreKind::Memory,
            database_url: None,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            session_timeout: chrono::Duration::minutes(5),
            cookie_name: sesh::DEFAULT_SESSION_COOKIE_NAME.to_string(),
            secure_cookies: false,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            reap_interval_seconds: 3600,
        }
    }

    fn json_post(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn session_cookie(response: &axum::response::Response) -> String {
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn register_login_me_logout() {
        let state = AppState::new(&memory_config()).await.unwrap();
        let app = app(state.clone());

        let response = app
            .clone()
            .oneshot(json_post("/api/auth/register", r#"{"username":"some-pig"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_post("/api/auth/login", r#"{"username":"some-pig"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response);

        let user = state.users.find_by_username("some-pig").await.unwrap().unwrap();
        assert!(user.current_session_id.is_some());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/me")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let me: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(me["username"], "some-pig");

        let response = app
            .clone()
            .oneshot(json_post("/api/auth/logout", "", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let user = state.users.find_by_username("some-pig").await.unwrap().unwrap();
        assert!(user.current_session_id.is_none());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/me")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_user_cannot_log_in() {
        let state = AppState::new(&memory_config()).await.unwrap();

        let response = app(state)
            .oneshot(json_post("/api/auth/login", r#"{"username":"nobody"}"#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn duplicate_and_invalid_registrations_are_rejected() {
        let state = AppState::new(&memory_config()).await.unwrap();
        let app = app(state);

        let first = app
            .clone()
            .oneshot(json_post("/api/auth/register", r#"{"username":"wilbur"}"#, None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let again = app
            .clone()
            .oneshot(json_post("/api/auth/register", r#"{"username":"wilbur"}"#, None))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::CONFLICT);

        let invalid = app
            .oneshot(json_post("/api/auth/register", r#"{"username":"x"}"#, None))
            .await
            .unwrap();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }
}
