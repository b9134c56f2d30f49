use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use tracing::{debug, instrument};

use super::services::{self, SessionDetails};
use crate::{auth::AuthUser, error::AppError, forms::SessionForm, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route(
            "/sessions/:id",
            get(get_session).put(update_session).delete(delete_session),
        )
}

fn location(id: i64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&format!("/api/v1/sessions/{id}")) {
        headers.insert(header::LOCATION, v);
    }
    headers
}

#[instrument(skip(state))]
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<SessionDetails>>, AppError> {
    let mut conn = state.db.acquire().await?;
    let viewer = services::viewer_for(&mut conn, user_id).await?;
    Ok(Json(services::list_sessions(&mut conn, viewer).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<SessionForm>,
) -> Result<(StatusCode, HeaderMap, Json<SessionDetails>), AppError> {
    let cmd = payload.validate()?;

    let mut tx = state.db.begin().await?;
    let created = services::create_session(&mut tx, user_id, &cmd).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, location(created.session.id), Json(created)))
}

#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<SessionDetails>, AppError> {
    let mut conn = state.db.acquire().await?;
    let viewer = services::viewer_for(&mut conn, user_id).await?;
    Ok(Json(services::get_session(&mut conn, id, viewer).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<SessionForm>,
) -> Result<Json<SessionDetails>, AppError> {
    let cmd = payload.validate()?;

    let mut tx = state.db.begin().await?;
    let viewer = services::viewer_for(&mut tx, user_id).await?;
    services::ensure_editable(&mut tx, id, viewer)
        .await?
        .ok_or_else(|| AppError::not_found(format!("session {id}")))?;
    let updated = services::update_session(&mut tx, id, &cmd).await?;
    tx.commit().await?;

    Ok(Json(updated))
}

/// Deleting an id that is already gone succeeds.
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let mut tx = state.db.begin().await?;
    let viewer = services::viewer_for(&mut tx, user_id).await?;
    if services::ensure_editable(&mut tx, id, viewer).await?.is_none() {
        debug!(session_id = id, "delete of absent session");
        return Ok(StatusCode::NO_CONTENT);
    }
    services::delete_session(&mut tx, id).await?;
    tx.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}
