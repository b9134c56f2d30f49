use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Skill {
    pub id: i64,
    pub name: String,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SkillSummary {
    pub id: i64,
    pub name: String,
    pub explanation: Option<String>,
    pub session_count: i64,
}
