use sqlx::SqliteConnection;

use super::repo_types::{Project, ProjectSummary};

pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> sqlx::Result<Option<Project>> {
    sqlx::query_as::<_, Project>("SELECT id, name FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn insert(conn: &mut SqliteConnection, name: &str) -> sqlx::Result<Project> {
    sqlx::query_as::<_, Project>("INSERT INTO projects (name) VALUES (?) RETURNING id, name")
        .bind(name)
        .fetch_one(conn)
        .await
}

pub async fn rename(conn: &mut SqliteConnection, id: i64, name: &str) -> sqlx::Result<Option<Project>> {
    sqlx::query_as::<_, Project>("UPDATE projects SET name = ? WHERE id = ? RETURNING id, name")
        .bind(name)
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn delete(conn: &mut SqliteConnection, id: i64) -> sqlx::Result<u64> {
    let res = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

pub async fn list(conn: &mut SqliteConnection) -> sqlx::Result<Vec<Project>> {
    sqlx::query_as::<_, Project>("SELECT id, name FROM projects ORDER BY id")
        .fetch_all(conn)
        .await
}

pub async fn list_with_counts(conn: &mut SqliteConnection) -> sqlx::Result<Vec<ProjectSummary>> {
    sqlx::query_as::<_, ProjectSummary>(
        r#"
        SELECT p.id, p.name, COUNT(s.id) AS session_count
          FROM projects p
          LEFT JOIN sessions s ON s.project_id = p.id
         GROUP BY p.id, p.name
         ORDER BY p.id
        "#,
    )
    .fetch_all(conn)
    .await
}
