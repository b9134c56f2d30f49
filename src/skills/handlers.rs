use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::repo_types::{Skill, SkillSummary};
use super::services::{self, SkillDetails};
use crate::{
    auth::AuthUser, error::AppError, forms::SkillForm, sessions::services::viewer_for,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/skills", get(list_skills).post(create_skill))
        .route("/skills/:id", get(get_skill).put(update_skill))
}

#[instrument(skip(state))]
pub async fn list_skills(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
) -> Result<Json<Vec<SkillSummary>>, AppError> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(services::list_skills(&mut conn).await?))
}

/// Posting a name that already exists returns that skill.
#[instrument(skip(state, payload))]
pub async fn create_skill(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Json(payload): Json<SkillForm>,
) -> Result<(StatusCode, Json<Skill>), AppError> {
    let cmd = payload.validate()?;
    let mut tx = state.db.begin().await?;
    let skill = services::create_skill(&mut tx, &cmd).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(skill)))
}

#[instrument(skip(state))]
pub async fn get_skill(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<SkillDetails>, AppError> {
    let mut conn = state.db.acquire().await?;
    let viewer = viewer_for(&mut conn, user_id).await?;
    Ok(Json(services::get_skill(&mut conn, id, viewer).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_skill(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<SkillForm>,
) -> Result<Json<Skill>, AppError> {
    let cmd = payload.validate()?;
    let mut tx = state.db.begin().await?;
    let skill = services::update_skill(&mut tx, id, &cmd).await?;
    tx.commit().await?;
    Ok(Json(skill))
}
