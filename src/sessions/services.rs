use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::repo;
use super::repo_types::{Session, SessionWrite, Viewer};
use crate::auth;
use crate::error::AppError;
use crate::forms::SessionCommand;
use crate::projects::{self, repo_types::Project};
use crate::skills::{self, repo_types::Skill};

/// A session with its author, project and skills resolved.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetails {
    #[serde(flatten)]
    pub session: Session,
    pub author: String,
    pub project: Project,
    pub skills: Vec<Skill>,
}

pub async fn viewer_for(conn: &mut SqliteConnection, user_id: i64) -> Result<Viewer, AppError> {
    Ok(Viewer {
        user_id,
        admin: auth::services::is_admin(conn, user_id).await?,
    })
}

/// Resolves author names, projects and skills for each session, in order.
pub async fn load_details(
    conn: &mut SqliteConnection,
    sessions: Vec<Session>,
) -> Result<Vec<SessionDetails>, AppError> {
    let mut authors: HashMap<i64, String> = HashMap::new();
    let mut projects: HashMap<i64, Project> = HashMap::new();
    let mut out = Vec::with_capacity(sessions.len());

    for session in sessions {
        let author = match authors.get(&session.user_id) {
            Some(name) => name.clone(),
            None => {
                let user = auth::repo::find_by_id(&mut *conn, session.user_id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("user {}", session.user_id)))?;
                authors.insert(user.id, user.username.clone());
                user.username
            }
        };
        let project = match projects.get(&session.project_id) {
            Some(p) => p.clone(),
            None => {
                let p = projects::repo::find_by_id(&mut *conn, session.project_id)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("project {}", session.project_id)))?;
                projects.insert(p.id, p.clone());
                p
            }
        };
        let skills = repo::skills_of(&mut *conn, session.id).await?;
        out.push(SessionDetails {
            session,
            author,
            project,
            skills,
        });
    }
    Ok(out)
}

async fn details(conn: &mut SqliteConnection, session: Session) -> Result<SessionDetails, AppError> {
    let mut all = load_details(conn, vec![session]).await?;
    all.pop()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("session details vanished")))
}

/// Links exactly `skills` to the session, dropping previous links.
async fn replace_skills(
    conn: &mut SqliteConnection,
    session_id: i64,
    skills: &[Skill],
) -> Result<(), AppError> {
    let removed = repo::clear_skills(&mut *conn, session_id).await?;
    for skill in skills {
        repo::link_skill(&mut *conn, session_id, skill.id).await?;
    }
    debug!(session_id, removed, linked = skills.len(), "session skills replaced");
    Ok(())
}

pub async fn create_session(
    conn: &mut SqliteConnection,
    author_id: i64,
    cmd: &SessionCommand,
) -> Result<SessionDetails, AppError> {
    auth::repo::find_by_id(&mut *conn, author_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {author_id}")))?;

    let project = projects::services::resolve_project(&mut *conn, &cmd.project).await?;
    let skills = skills::services::resolve_skills(&mut *conn, &cmd.skills).await?;

    let now = Utc::now();
    let f = &cmd.fields;
    let session = repo::insert(
        &mut *conn,
        author_id,
        &SessionWrite {
            name: &f.name,
            duration: f.duration,
            level: f.level,
            explanation: f.explanation.as_deref(),
            created: f.created.unwrap_or(now),
            edited: f.edited.unwrap_or(now),
            window: f.window,
            private: f.private,
            project_id: project.id,
        },
    )
    .await?;
    replace_skills(&mut *conn, session.id, &skills).await?;

    info!(
        session_id = session.id,
        user_id = author_id,
        project_id = project.id,
        skills = skills.len(),
        "session created"
    );
    details(conn, session).await
}

pub async fn update_session(
    conn: &mut SqliteConnection,
    session_id: i64,
    cmd: &SessionCommand,
) -> Result<SessionDetails, AppError> {
    let current = repo::find_by_id(&mut *conn, session_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("session {session_id}")))?;

    let project = projects::services::resolve_project(&mut *conn, &cmd.project).await?;
    let skills = skills::services::resolve_skills(&mut *conn, &cmd.skills).await?;

    let f = &cmd.fields;
    let session = repo::update(
        &mut *conn,
        session_id,
        &SessionWrite {
            name: &f.name,
            duration: f.duration,
            level: f.level,
            explanation: f.explanation.as_deref(),
            created: f.created.unwrap_or(current.created),
            edited: f.edited.unwrap_or_else(Utc::now),
            window: f.window,
            private: f.private,
            project_id: project.id,
        },
    )
    .await?
    .ok_or_else(|| AppError::not_found(format!("session {session_id}")))?;
    replace_skills(&mut *conn, session_id, &skills).await?;

    info!(
        session_id,
        from_project = current.project_id,
        to_project = project.id,
        "session updated"
    );
    details(conn, session).await
}

/// Removes the session and its skill links. Absent ids are a no-op.
pub async fn delete_session(conn: &mut SqliteConnection, session_id: i64) -> Result<bool, AppError> {
    let unlinked = repo::clear_skills(&mut *conn, session_id).await?;
    let deleted = repo::delete(conn, session_id).await? > 0;
    if deleted {
        info!(session_id, unlinked, "session deleted");
    }
    Ok(deleted)
}

/// The session if `viewer` may see it; private sessions of others read as missing.
pub async fn get_session(
    conn: &mut SqliteConnection,
    session_id: i64,
    viewer: Viewer,
) -> Result<SessionDetails, AppError> {
    let session = repo::find_by_id(&mut *conn, session_id)
        .await?
        .filter(|s| viewer.can_see(s))
        .ok_or_else(|| AppError::not_found(format!("session {session_id}")))?;
    details(conn, session).await
}

/// `Ok(None)` when the session does not exist, NotFound when it belongs to
/// someone else.
pub async fn ensure_editable(
    conn: &mut SqliteConnection,
    session_id: i64,
    viewer: Viewer,
) -> Result<Option<Session>, AppError> {
    match repo::find_by_id(conn, session_id).await? {
        None => Ok(None),
        Some(s) if viewer.can_edit(&s) => Ok(Some(s)),
        Some(_) => Err(AppError::not_found(format!("session {session_id}"))),
    }
}

pub async fn list_sessions(
    conn: &mut SqliteConnection,
    viewer: Viewer,
) -> Result<Vec<SessionDetails>, AppError> {
    let sessions = repo::list_visible(&mut *conn, viewer).await?;
    load_details(conn, sessions).await
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;
    use serde_json::json;
    use sqlx::pool::PoolConnection;
    use sqlx::Sqlite;

    use super::*;
    use crate::forms::{ProjectSelector, SessionForm};
    use crate::projects::repo_types::DEFAULT_PROJECT_ID;
    use crate::state::AppState;
    use crate::test_support::insert_user;

    fn command(v: serde_json::Value) -> SessionCommand {
        let mut base = json!({
            "name": "Scales",
            "duration": 30,
            "level": "basic",
            "timezone": "UTC",
            "skills": "piano"
        });
        for (k, val) in v.as_object().unwrap() {
            base[k] = val.clone();
        }
        serde_json::from_value::<SessionForm>(base).unwrap().validate().unwrap()
    }

    async fn setup() -> (AppState, i64, PoolConnection<Sqlite>) {
        let state = AppState::fake().await;
        let user = insert_user(&state, "ana", false).await;
        let conn = state.db.acquire().await.unwrap();
        (state, user.id, conn)
    }

    async fn count(conn: &mut SqliteConnection, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(conn).await.unwrap()
    }

    #[tokio::test]
    async fn create_links_project_and_skills() {
        let (_state, uid, mut conn) = setup().await;
        let created = create_session(
            &mut conn,
            uid,
            &command(json!({
                "skills": "piano, theory, piano",
                "project": {"new_project": "Etudes"},
                "starttime": "09:00",
                "endtime": "09:30"
            })),
        )
        .await
        .unwrap();

        assert_eq!(created.author, "ana");
        assert_eq!(created.project.name, "Etudes");
        let names: Vec<_> = created.skills.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["piano", "theory"]);
        assert_eq!(
            created.session.window.unwrap().end(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert_eq!(created.session.created, created.session.edited);

        let by_project =
            repo::list_by_project(&mut conn, created.project.id, Viewer { user_id: uid, admin: false })
                .await
                .unwrap();
        assert_eq!(by_project.len(), 1);
    }

    #[tokio::test]
    async fn shared_skill_name_resolves_to_one_skill() {
        let (_state, uid, mut conn) = setup().await;
        let a = create_session(&mut conn, uid, &command(json!({"skills": "reading, scales"})))
            .await
            .unwrap();
        let b = create_session(&mut conn, uid, &command(json!({"skills": "arpeggios,reading"})))
            .await
            .unwrap();

        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM skills WHERE name = 'reading'").await, 1);
        let reading_a = a.skills.iter().find(|s| s.name == "reading").unwrap();
        let reading_b = b.skills.iter().find(|s| s.name == "reading").unwrap();
        assert_eq!(reading_a.id, reading_b.id);
    }

    #[tokio::test]
    async fn create_with_unknown_project_is_not_found() {
        let (_state, uid, mut conn) = setup().await;
        let err = create_session(&mut conn, uid, &command(json!({"project": {"old_project": 77}})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM sessions").await, 0);
    }

    #[tokio::test]
    async fn update_moves_project_and_replaces_skills() {
        let (_state, uid, mut conn) = setup().await;
        let s = create_session(
            &mut conn,
            uid,
            &command(json!({"skills": "piano, theory", "project": {"new_project": "A"}})),
        )
        .await
        .unwrap();

        let updated = update_session(
            &mut conn,
            s.session.id,
            &command(json!({"name": "Chords", "skills": "harmony", "level": "advanced"})),
        )
        .await
        .unwrap();

        assert_eq!(updated.session.name, "Chords");
        assert_eq!(updated.session.project_id, DEFAULT_PROJECT_ID);
        assert_eq!(updated.session.created, s.session.created);
        assert!(updated.session.edited >= s.session.edited);
        let names: Vec<_> = updated.skills.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["harmony"]);
        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM session_skills").await, 1);
        // old skills survive unlinked
        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM skills").await, 3);

        let a_sessions = count(
            &mut conn,
            "SELECT COUNT(*) FROM sessions s JOIN projects p ON p.id = s.project_id WHERE p.name = 'A'",
        )
        .await;
        assert_eq!(a_sessions, 0);
    }

    #[tokio::test]
    async fn update_missing_session_is_not_found() {
        let (_state, _uid, mut conn) = setup().await;
        let err = update_session(&mut conn, 404, &command(json!({}))).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_keeps_skills_and_is_idempotent() {
        let (_state, uid, mut conn) = setup().await;
        let s = create_session(&mut conn, uid, &command(json!({"skills": "piano, theory"})))
            .await
            .unwrap();
        let skills_before = count(&mut conn, "SELECT COUNT(*) FROM skills").await;

        assert!(delete_session(&mut conn, s.session.id).await.unwrap());
        assert!(!delete_session(&mut conn, s.session.id).await.unwrap());

        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM skills").await, skills_before);
        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM session_skills").await, 0);
        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM sessions").await, 0);
    }

    #[tokio::test]
    async fn private_sessions_are_hidden_from_others() {
        let (state, uid, conn) = setup().await;
        drop(conn);
        let other = insert_user(&state, "ben", false).await;
        let admin = insert_user(&state, "root", true).await;
        let mut conn = state.db.acquire().await.unwrap();

        let s = create_session(&mut conn, uid, &command(json!({"private": true})))
            .await
            .unwrap();
        let id = s.session.id;

        let ben = viewer_for(&mut conn, other.id).await.unwrap();
        let root = viewer_for(&mut conn, admin.id).await.unwrap();
        assert!(root.admin);

        assert!(matches!(
            get_session(&mut conn, id, ben).await,
            Err(AppError::NotFound(_))
        ));
        assert!(list_sessions(&mut conn, ben).await.unwrap().is_empty());
        assert_eq!(list_sessions(&mut conn, root).await.unwrap().len(), 1);
        assert!(ensure_editable(&mut conn, id, ben).await.is_err());
        assert!(ensure_editable(&mut conn, id, root).await.unwrap().is_some());
        assert!(ensure_editable(&mut conn, id + 1, ben).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn selector_resolution_creates_named_project() {
        let (_state, uid, mut conn) = setup().await;
        let cmd = command(json!({"project": {"new_project": "Bach"}}));
        assert_eq!(cmd.project, ProjectSelector::New("Bach".into()));
        create_session(&mut conn, uid, &cmd).await.unwrap();
        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM projects WHERE name = 'Bach'").await, 1);
    }
}
