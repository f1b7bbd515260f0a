use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use sesh::AuthContext;

use crate::{
    handlers::error::{AppError, Result},
    models::user::User,
    state::AppState,
    validation::auth::*,
};

/// The request payload for user registration.
#[derive(Deserialize, Debug)]
pub struct RegisterRequest {
    pub username: String,
}

/// The request payload for user login.
#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
}

/// The response payload for authentication-related requests.
#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

/// The response payload for the current user.
#[derive(Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub username: String,
    pub session_expires_at: DateTime<Utc>,
}

/// Handles user registration.
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response> {
    tracing::info!("📝 Register attempt for: {}", payload.username);
    validate_username(&payload.username)?;

    let user = state.users.create(&payload.username).await?;
    tracing::info!("✅ User registered: {}", user.id);

    let response = AuthResponse {
        success: true,
        message: "Registration successful. Welcome!".to_string(),
    };

    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Handles user login.
///
/// Any session the user already holds, on this device or another, is
/// displaced.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    tracing::info!("🔐 Login attempt for: {}", payload.username);
    validate_username(&payload.username)?;

    let user = state
        .users
        .find_by_username(&payload.username)
        .await?
        .ok_or_else(|| AppError::Authentication(format!("unknown user {}", payload.username)))?;

    let session_key = state.sessions().user_did_authenticate(&user).await?;
    state.cookie().issue(&cookies, &session_key);
    tracing::debug!("🔑 Session cookie added: {:?}", session_key);

    let response = AuthResponse {
        success: true,
        message: "Login successful".to_string(),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Handles user logout.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
    context: AuthContext<User>,
) -> Result<Response> {
    tracing::info!("👋 Logout for user: {}", context.user().id);

    let outcome = state.sessions().user_did_logout(&context).await;
    state.cookie().clear(&cookies);
    outcome?;

    let response = AuthResponse {
        success: true,
        message: "Logout successful".to_string(),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Returns the user the request is authenticated as.
#[axum::debug_handler]
pub async fn me(context: AuthContext<User>) -> Result<Response> {
    let response = MeResponse {
        id: context.user().id,
        username: context.user().username.clone(),
        session_expires_at: context.session().expiration_date,
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}
