use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::instrument;

use super::repo_types::{Project, ProjectSummary};
use super::services::{self, ProjectDetails};
use crate::{
    auth::AuthUser, error::AppError, forms::ProjectForm, sessions::services::viewer_for,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route(
            "/projects/:id",
            get(get_project).put(rename_project).delete(delete_project),
        )
}

#[derive(Debug, Serialize)]
pub struct DeletedProject {
    pub id: i64,
    pub reassigned_sessions: u64,
}

#[instrument(skip(state))]
pub async fn list_projects(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
) -> Result<Json<Vec<ProjectSummary>>, AppError> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(services::list_projects(&mut conn).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_project(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Json(payload): Json<ProjectForm>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let cmd = payload.validate()?;
    let mut tx = state.db.begin().await?;
    let project = services::create_project(&mut tx, &cmd).await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(project)))
}

#[instrument(skip(state))]
pub async fn get_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ProjectDetails>, AppError> {
    let mut conn = state.db.acquire().await?;
    let viewer = viewer_for(&mut conn, user_id).await?;
    Ok(Json(services::get_project(&mut conn, id, viewer).await?))
}

#[instrument(skip(state, payload))]
pub async fn rename_project(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<ProjectForm>,
) -> Result<Json<Project>, AppError> {
    let cmd = payload.validate()?;
    let mut tx = state.db.begin().await?;
    let project = services::rename_project(&mut tx, id, &cmd).await?;
    tx.commit().await?;
    Ok(Json(project))
}

#[instrument(skip(state))]
pub async fn delete_project(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<DeletedProject>, AppError> {
    let mut tx = state.db.begin().await?;
    let reassigned_sessions = services::delete_project(&mut tx, id).await?;
    tx.commit().await?;
    Ok(Json(DeletedProject {
        id,
        reassigned_sessions,
    }))
}
