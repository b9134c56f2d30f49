use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqliteConnection;

use super::repo_types::{Session, SessionRow, SessionWrite, Viewer};
use crate::skills::repo_types::Skill;

const COLUMNS: &str = "s.id, s.name, s.duration, s.level, s.explanation, s.created, s.edited, \
                       s.starttime, s.endtime, s.private, s.user_id, s.project_id";

/// Fixed-width UTC text (`2024-01-01T10:00:00.000000Z`), so that ordering
/// the column as text orders by instant.
fn stored(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn convert(rows: Vec<SessionRow>) -> sqlx::Result<Vec<Session>> {
    rows.into_iter().map(Session::try_from).collect()
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> sqlx::Result<Option<Session>> {
    let row = sqlx::query_as::<_, SessionRow>(&format!("SELECT {COLUMNS} FROM sessions s WHERE s.id = ?"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    row.map(Session::try_from).transpose()
}

pub async fn insert(
    conn: &mut SqliteConnection,
    user_id: i64,
    w: &SessionWrite<'_>,
) -> sqlx::Result<Session> {
    let row = sqlx::query_as::<_, SessionRow>(
        r#"
        INSERT INTO sessions (name, duration, level, explanation, created, edited,
                              starttime, endtime, private, user_id, project_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id, name, duration, level, explanation, created, edited,
                  starttime, endtime, private, user_id, project_id
        "#,
    )
    .bind(w.name)
    .bind(w.duration)
    .bind(w.level.as_str())
    .bind(w.explanation)
    .bind(stored(w.created))
    .bind(stored(w.edited))
    .bind(w.window.map(|t| t.start()))
    .bind(w.window.map(|t| t.end()))
    .bind(w.private)
    .bind(user_id)
    .bind(w.project_id)
    .fetch_one(conn)
    .await?;
    Session::try_from(row)
}

/// Rewrites every mutable column; the author never changes.
pub async fn update(
    conn: &mut SqliteConnection,
    id: i64,
    w: &SessionWrite<'_>,
) -> sqlx::Result<Option<Session>> {
    let row = sqlx::query_as::<_, SessionRow>(
        r#"
        UPDATE sessions
           SET name = ?, duration = ?, level = ?, explanation = ?, created = ?, edited = ?,
               starttime = ?, endtime = ?, private = ?, project_id = ?
         WHERE id = ?
        RETURNING id, name, duration, level, explanation, created, edited,
                  starttime, endtime, private, user_id, project_id
        "#,
    )
    .bind(w.name)
    .bind(w.duration)
    .bind(w.level.as_str())
    .bind(w.explanation)
    .bind(stored(w.created))
    .bind(stored(w.edited))
    .bind(w.window.map(|t| t.start()))
    .bind(w.window.map(|t| t.end()))
    .bind(w.private)
    .bind(w.project_id)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.map(Session::try_from).transpose()
}

pub async fn delete(conn: &mut SqliteConnection, id: i64) -> sqlx::Result<u64> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

/// Every session in id order, as written to a backup.
pub async fn list_all(conn: &mut SqliteConnection) -> sqlx::Result<Vec<Session>> {
    let rows = sqlx::query_as::<_, SessionRow>(&format!("SELECT {COLUMNS} FROM sessions s ORDER BY s.id"))
        .fetch_all(conn)
        .await?;
    convert(rows)
}

pub async fn list_visible(conn: &mut SqliteConnection, viewer: Viewer) -> sqlx::Result<Vec<Session>> {
    let rows = sqlx::query_as::<_, SessionRow>(&format!(
        r#"
        SELECT {COLUMNS}
          FROM sessions s
         WHERE s.private = 0 OR s.user_id = ? OR ?
         ORDER BY s.created DESC, s.id DESC
        "#
    ))
    .bind(viewer.user_id)
    .bind(viewer.admin)
    .fetch_all(conn)
    .await?;
    convert(rows)
}

pub async fn list_by_project(
    conn: &mut SqliteConnection,
    project_id: i64,
    viewer: Viewer,
) -> sqlx::Result<Vec<Session>> {
    let rows = sqlx::query_as::<_, SessionRow>(&format!(
        r#"
        SELECT {COLUMNS}
          FROM sessions s
         WHERE s.project_id = ? AND (s.private = 0 OR s.user_id = ? OR ?)
         ORDER BY s.created DESC, s.id DESC
        "#
    ))
    .bind(project_id)
    .bind(viewer.user_id)
    .bind(viewer.admin)
    .fetch_all(conn)
    .await?;
    convert(rows)
}

pub async fn list_by_skill(
    conn: &mut SqliteConnection,
    skill_id: i64,
    viewer: Viewer,
) -> sqlx::Result<Vec<Session>> {
    let rows = sqlx::query_as::<_, SessionRow>(&format!(
        r#"
        SELECT {COLUMNS}
          FROM sessions s
          JOIN session_skills b ON b.session_id = s.id
         WHERE b.skill_id = ? AND (s.private = 0 OR s.user_id = ? OR ?)
         ORDER BY s.created DESC, s.id DESC
        "#
    ))
    .bind(skill_id)
    .bind(viewer.user_id)
    .bind(viewer.admin)
    .fetch_all(conn)
    .await?;
    convert(rows)
}

pub async fn reassign_project(conn: &mut SqliteConnection, from: i64, to: i64) -> sqlx::Result<u64> {
    let res = sqlx::query("UPDATE sessions SET project_id = ? WHERE project_id = ?")
        .bind(to)
        .bind(from)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

// ---- session_skills bridge ----

pub async fn clear_skills(conn: &mut SqliteConnection, session_id: i64) -> sqlx::Result<u64> {
    let res = sqlx::query("DELETE FROM session_skills WHERE session_id = ?")
        .bind(session_id)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

pub async fn link_skill(conn: &mut SqliteConnection, session_id: i64, skill_id: i64) -> sqlx::Result<()> {
    sqlx::query("INSERT OR IGNORE INTO session_skills (session_id, skill_id) VALUES (?, ?)")
        .bind(session_id)
        .bind(skill_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn skills_of(conn: &mut SqliteConnection, session_id: i64) -> sqlx::Result<Vec<Skill>> {
    sqlx::query_as::<_, Skill>(
        r#"
        SELECT k.id, k.name, k.explanation
          FROM skills k
          JOIN session_skills b ON b.skill_id = k.id
         WHERE b.session_id = ?
         ORDER BY k.name, k.id
        "#,
    )
    .bind(session_id)
    .fetch_all(conn)
    .await
}
