use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::repo;
use super::repo_types::{Skill, SkillSummary};
use crate::error::AppError;
use crate::forms::{SkillCommand, SkillList};
use crate::sessions::{self, repo_types::Viewer, services::SessionDetails};

/// Looks `name` up and creates it when absent. `explanation` is only used
/// for a newly created skill.
pub async fn get_or_create(
    conn: &mut SqliteConnection,
    name: &str,
    explanation: Option<&str>,
) -> Result<(Skill, bool), AppError> {
    if let Some(existing) = repo::find_by_name(&mut *conn, name).await? {
        return Ok((existing, false));
    }
    let skill = repo::insert(conn, name, explanation).await?;
    debug!(skill_id = skill.id, name = %skill.name, "skill created");
    Ok((skill, true))
}

/// One skill per listed name, reusing rows that already exist.
pub async fn resolve_skills(conn: &mut SqliteConnection, names: &SkillList) -> Result<Vec<Skill>, AppError> {
    let mut skills = Vec::with_capacity(names.names().len());
    for name in names.names() {
        let (skill, _) = get_or_create(&mut *conn, name, None).await?;
        skills.push(skill);
    }
    Ok(skills)
}

/// Creates the skill, or fills in the explanation of an existing one that has none.
pub async fn create_skill(conn: &mut SqliteConnection, cmd: &SkillCommand) -> Result<Skill, AppError> {
    let (skill, created) = get_or_create(&mut *conn, &cmd.name, cmd.explanation.as_deref()).await?;
    if created || skill.explanation.is_some() || cmd.explanation.is_none() {
        return Ok(skill);
    }
    let updated = repo::update(conn, skill.id, &skill.name, cmd.explanation.as_deref())
        .await?
        .ok_or_else(|| AppError::not_found(format!("skill {}", skill.id)))?;
    Ok(updated)
}

pub async fn update_skill(
    conn: &mut SqliteConnection,
    skill_id: i64,
    cmd: &SkillCommand,
) -> Result<Skill, AppError> {
    if let Some(other) = repo::find_by_name(&mut *conn, &cmd.name).await? {
        if other.id != skill_id {
            return Err(AppError::Integrity {
                field: "name",
                message: format!("A skill named {:?} already exists.", cmd.name),
            });
        }
    }
    let skill = repo::update(conn, skill_id, &cmd.name, cmd.explanation.as_deref())
        .await?
        .ok_or_else(|| AppError::not_found(format!("skill {skill_id}")))?;
    info!(skill_id, name = %skill.name, "skill updated");
    Ok(skill)
}

pub async fn list_skills(conn: &mut SqliteConnection) -> Result<Vec<SkillSummary>, AppError> {
    Ok(repo::list_with_counts(conn).await?)
}

#[derive(Debug, Serialize)]
pub struct SkillDetails {
    #[serde(flatten)]
    pub skill: Skill,
    pub sessions: Vec<SessionDetails>,
}

pub async fn get_skill(
    conn: &mut SqliteConnection,
    skill_id: i64,
    viewer: Viewer,
) -> Result<SkillDetails, AppError> {
    let skill = repo::find_by_id(&mut *conn, skill_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("skill {skill_id}")))?;
    let rows = sessions::repo::list_by_skill(&mut *conn, skill_id, viewer).await?;
    let sessions = sessions::services::load_details(conn, rows).await?;
    Ok(SkillDetails { skill, sessions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::SKILL_SEPARATOR;
    use crate::state::AppState;

    #[tokio::test]
    async fn repeated_names_reuse_one_row() {
        let state = AppState::fake().await;
        let mut conn = state.db.acquire().await.unwrap();

        let first = resolve_skills(&mut conn, &SkillList::parse("reading, scales", SKILL_SEPARATOR))
            .await
            .unwrap();
        let second = resolve_skills(&mut conn, &SkillList::parse("reading", SKILL_SEPARATOR))
            .await
            .unwrap();
        assert_eq!(first[0].id, second[0].id);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM skills WHERE name = 'reading'")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn create_fills_missing_explanation_only() {
        let state = AppState::fake().await;
        let mut conn = state.db.acquire().await.unwrap();
        let cmd = |e: Option<&str>| SkillCommand {
            name: "theory".into(),
            explanation: e.map(str::to_string),
        };

        let bare = create_skill(&mut conn, &cmd(None)).await.unwrap();
        assert_eq!(bare.explanation, None);
        let filled = create_skill(&mut conn, &cmd(Some("harmony"))).await.unwrap();
        assert_eq!(filled.id, bare.id);
        assert_eq!(filled.explanation.as_deref(), Some("harmony"));
        let kept = create_skill(&mut conn, &cmd(Some("other"))).await.unwrap();
        assert_eq!(kept.explanation.as_deref(), Some("harmony"));
    }

    #[tokio::test]
    async fn rename_onto_existing_name_conflicts() {
        let state = AppState::fake().await;
        let mut conn = state.db.acquire().await.unwrap();
        let (a, _) = get_or_create(&mut conn, "a", None).await.unwrap();
        get_or_create(&mut conn, "b", None).await.unwrap();

        let err = update_skill(
            &mut conn,
            a.id,
            &SkillCommand {
                name: "b".into(),
                explanation: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Integrity { field: "name", .. }));

        let err = update_skill(
            &mut conn,
            999,
            &SkillCommand {
                name: "c".into(),
                explanation: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
