use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Project every session falls back to; created by the first migration.
pub const DEFAULT_PROJECT_ID: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProjectSummary {
    pub id: i64,
    pub name: String,
    pub session_count: i64,
}
