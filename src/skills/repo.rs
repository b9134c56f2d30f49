use sqlx::SqliteConnection;

use super::repo_types::{Skill, SkillSummary};

pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> sqlx::Result<Option<Skill>> {
    sqlx::query_as::<_, Skill>("SELECT id, name, explanation FROM skills WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// Exact, case-sensitive match; the oldest row wins if duplicates exist.
pub async fn find_by_name(conn: &mut SqliteConnection, name: &str) -> sqlx::Result<Option<Skill>> {
    sqlx::query_as::<_, Skill>(
        "SELECT id, name, explanation FROM skills WHERE name = ? ORDER BY id LIMIT 1",
    )
    .bind(name)
    .fetch_optional(conn)
    .await
}

pub async fn insert(
    conn: &mut SqliteConnection,
    name: &str,
    explanation: Option<&str>,
) -> sqlx::Result<Skill> {
    sqlx::query_as::<_, Skill>(
        "INSERT INTO skills (name, explanation) VALUES (?, ?) RETURNING id, name, explanation",
    )
    .bind(name)
    .bind(explanation)
    .fetch_one(conn)
    .await
}

pub async fn update(
    conn: &mut SqliteConnection,
    id: i64,
    name: &str,
    explanation: Option<&str>,
) -> sqlx::Result<Option<Skill>> {
    sqlx::query_as::<_, Skill>(
        r#"
        UPDATE skills SET name = ?, explanation = ?
         WHERE id = ?
        RETURNING id, name, explanation
        "#,
    )
    .bind(name)
    .bind(explanation)
    .bind(id)
    .fetch_optional(conn)
    .await
}

pub async fn list(conn: &mut SqliteConnection) -> sqlx::Result<Vec<Skill>> {
    sqlx::query_as::<_, Skill>("SELECT id, name, explanation FROM skills ORDER BY id")
        .fetch_all(conn)
        .await
}

pub async fn list_with_counts(conn: &mut SqliteConnection) -> sqlx::Result<Vec<SkillSummary>> {
    sqlx::query_as::<_, SkillSummary>(
        r#"
        SELECT k.id, k.name, k.explanation, COUNT(b.session_id) AS session_count
          FROM skills k
          LEFT JOIN session_skills b ON b.skill_id = k.id
         GROUP BY k.id, k.name, k.explanation
         ORDER BY k.name, k.id
        "#,
    )
    .fetch_all(conn)
    .await
}
