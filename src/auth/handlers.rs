use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, PublicUser, RefreshRequest},
        repo,
        services::{verify_password, AuthUser, JwtKeys},
    },
    error::{AppError, ValidationErrors},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn issue_tokens(state: &AppState, user: crate::auth::repo_types::User) -> Result<AuthResponse, AppError> {
    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: user.into(),
    })
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let username = payload.username.trim();

    let mut errors = ValidationErrors::new();
    if username.is_empty() {
        errors.add("username", "This field is required.");
    }
    if payload.password.is_empty() {
        errors.add("password", "This field is required.");
    }
    errors.into_result(())?;

    let mut conn = state.db.acquire().await?;
    let Some(user) = repo::find_by_username(&mut conn, username).await? else {
        warn!(%username, "login unknown username");
        return Err(AppError::Unauthorized("Invalid username or password".into()));
    };
    drop(conn);

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(%username, user_id = user.id, "login invalid password");
        return Err(AppError::Unauthorized("Invalid username or password".into()));
    }

    info!(user_id = user.id, %username, "user logged in");
    Ok(Json(issue_tokens(&state, user)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let mut conn = state.db.acquire().await?;
    let user = repo::find_by_id(&mut conn, claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".into()))?;
    drop(conn);

    Ok(Json(issue_tokens(&state, user)?))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let mut conn = state.db.acquire().await?;
    let user = repo::find_by_id(&mut conn, user_id).await?.ok_or_else(|| {
        warn!(user_id, "token for missing user");
        AppError::Unauthorized("User not found".into())
    })?;
    Ok(Json(user.into()))
}
