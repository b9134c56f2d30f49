use std::str::FromStr;

use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::{info, warn};

use crate::auth::repo_types::NewUser;
use crate::auth::services::is_valid_email;
use crate::config::AdminSeed;

/// Name of the account that marks an installation as already set up.
pub const ADMIN_USERNAME: &str = "admin";

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parse database url {database_url}"))?
        .create_if_missing(true)
        .foreign_keys(true);
    let db = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await
        .context("connect to database")?;
    info!(url = %database_url, "database connected");
    Ok(db)
}

pub async fn migrate(db: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")?;
    Ok(())
}

/// Creates the admin account when the store has no users at all.
pub async fn seed_admin(db: &SqlitePool, seed: &AdminSeed) -> anyhow::Result<bool> {
    let mut conn = db.acquire().await.context("acquire connection")?;
    if crate::auth::repo::count_users(&mut conn).await? > 0 {
        return Ok(false);
    }
    if !is_valid_email(&seed.email) {
        warn!(email = %seed.email, "ADMIN_EMAIL is not a valid address; skipping admin seed");
        return Ok(false);
    }
    let user = crate::auth::repo::insert_user(
        &mut conn,
        &NewUser {
            username: ADMIN_USERNAME.into(),
            email: seed.email.clone(),
            password_hash: seed.password_hash.clone(),
            admin: true,
        },
    )
    .await
    .context("insert admin user")?;
    info!(user_id = user.id, "seeded admin user");
    Ok(true)
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("memory url")
        .foreign_keys(true);
    // a single never-recycled connection keeps the in-memory database alive
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("in-memory pool");
    migrate(&db).await.expect("migrations apply");
    db
}
