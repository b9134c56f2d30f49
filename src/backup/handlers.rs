use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use tracing::{info, instrument, warn};

use super::codec::Backup;
use super::services::{export_backup, import_backup, ImportSummary};
use crate::{
    auth::AdminUser,
    error::AppError,
    forms::REQUIRED,
    state::AppState,
};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/backup", get(download).post(upload))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

#[instrument(skip(state))]
pub async fn download(
    State(state): State<AppState>,
    AdminUser(user_id): AdminUser,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.db.acquire().await?;
    let backup = export_backup(&mut conn).await?;
    drop(conn);

    let body = backup.to_zip()?;
    let disposition = format!(
        "attachment; filename=\"practicelog-{}.zip\"",
        Utc::now().format("%Y-%m-%d")
    );
    info!(user_id, bytes = body.len(), "backup downloaded");
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// POST /admin/backup (multipart)
/// Field: `file`, the zip produced by `download`.
#[instrument(skip(state, mp))]
pub async fn upload(
    State(state): State<AppState>,
    AdminUser(user_id): AdminUser,
    mut mp: Multipart,
) -> Result<Json<ImportSummary>, AppError> {
    let mut archive: Option<Bytes> = None;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::invalid("file", e.body_text()))?
    {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::invalid("file", e.body_text()))?;
            archive = Some(data);
        }
    }
    let Some(data) = archive.filter(|d| !d.is_empty()) else {
        warn!(user_id, "backup upload without file");
        return Err(AppError::invalid("file", REQUIRED));
    };

    let backup = Backup::from_zip(&data).map_err(|e| {
        warn!(user_id, error = %e, "backup archive rejected");
        e
    })?;

    let mut tx = state.db.begin().await?;
    let summary = import_backup(&mut tx, &backup).await?;
    tx.commit().await?;

    info!(user_id, bytes = data.len(), "backup restored");
    Ok(Json(summary))
}
