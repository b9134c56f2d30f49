use sqlx::SqliteConnection;

use crate::auth::repo_types::{NewUser, User};

pub async fn find_by_username(
    conn: &mut SqliteConnection,
    username: &str,
) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, email, password_hash, admin
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(username)
    .fetch_optional(conn)
    .await
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, email, password_hash, admin
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// All users in id order, as written to a backup.
pub async fn list_users(conn: &mut SqliteConnection) -> sqlx::Result<Vec<User>> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, email, password_hash, admin
        FROM users
        ORDER BY id
        "#,
    )
    .fetch_all(conn)
    .await
}

pub async fn count_users(conn: &mut SqliteConnection) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(conn)
        .await
}

pub async fn insert_user(conn: &mut SqliteConnection, user: &NewUser) -> sqlx::Result<User> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, email, password_hash, admin)
        VALUES (?, ?, ?, ?)
        RETURNING id, username, email, password_hash, admin
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.admin)
    .fetch_one(conn)
    .await
}
