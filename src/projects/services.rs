use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::info;

use super::repo;
use super::repo_types::{Project, ProjectSummary, DEFAULT_PROJECT_ID};
use crate::error::AppError;
use crate::forms::{ProjectCommand, ProjectSelector};
use crate::sessions::{self, repo_types::Viewer, services::SessionDetails};

/// Creates the project for `New`, checks existence for `Existing`.
pub async fn resolve_project(
    conn: &mut SqliteConnection,
    selector: &ProjectSelector,
) -> Result<Project, AppError> {
    match selector {
        ProjectSelector::New(name) => {
            let project = repo::insert(conn, name).await?;
            info!(project_id = project.id, name = %project.name, "project created");
            Ok(project)
        }
        ProjectSelector::Existing(id) => repo::find_by_id(conn, *id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("project {id}"))),
    }
}

pub async fn create_project(conn: &mut SqliteConnection, cmd: &ProjectCommand) -> Result<Project, AppError> {
    resolve_project(conn, &ProjectSelector::New(cmd.name.clone())).await
}

pub async fn rename_project(
    conn: &mut SqliteConnection,
    project_id: i64,
    cmd: &ProjectCommand,
) -> Result<Project, AppError> {
    let project = repo::rename(conn, project_id, &cmd.name)
        .await?
        .ok_or_else(|| AppError::not_found(format!("project {project_id}")))?;
    info!(project_id, name = %project.name, "project renamed");
    Ok(project)
}

/// Moves every session of the project to the default project, then removes
/// it. Returns how many sessions were moved.
pub async fn delete_project(conn: &mut SqliteConnection, project_id: i64) -> Result<u64, AppError> {
    if project_id == DEFAULT_PROJECT_ID {
        return Err(AppError::invalid("project", "The default project cannot be deleted."));
    }
    repo::find_by_id(&mut *conn, project_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("project {project_id}")))?;

    let moved = sessions::repo::reassign_project(&mut *conn, project_id, DEFAULT_PROJECT_ID).await?;
    repo::delete(conn, project_id).await?;
    info!(project_id, moved, "project deleted");
    Ok(moved)
}

pub async fn list_projects(conn: &mut SqliteConnection) -> Result<Vec<ProjectSummary>, AppError> {
    Ok(repo::list_with_counts(conn).await?)
}

#[derive(Debug, Serialize)]
pub struct ProjectDetails {
    #[serde(flatten)]
    pub project: Project,
    pub sessions: Vec<SessionDetails>,
}

pub async fn get_project(
    conn: &mut SqliteConnection,
    project_id: i64,
    viewer: Viewer,
) -> Result<ProjectDetails, AppError> {
    let project = repo::find_by_id(&mut *conn, project_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("project {project_id}")))?;
    let rows = sessions::repo::list_by_project(&mut *conn, project_id, viewer).await?;
    let sessions = sessions::services::load_details(conn, rows).await?;
    Ok(ProjectDetails { project, sessions })
}
