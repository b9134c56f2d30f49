use std::collections::HashMap;

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use super::codec::{Backup, ProjectRecord, SessionRecord, SkillRecord, UserRecord};
use crate::auth::{self, repo_types::NewUser};
use crate::db::ADMIN_USERNAME;
use crate::error::AppError;
use crate::forms::{SkillList, BACKUP_SKILL_SEPARATOR};
use crate::projects::{self, repo_types::DEFAULT_PROJECT_ID};
use crate::sessions::{self, repo_types::SessionWrite};
use crate::skills;

/// Row counts of one import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub users_imported: usize,
    pub users_skipped: usize,
    pub skills_imported: usize,
    pub skills_reused: usize,
    pub projects_imported: usize,
    pub projects_reused: usize,
    pub sessions_imported: usize,
}

/// Reads every table in id order. Session rows point at users and projects
/// by their 1-based position in `user.csv` and `project.csv`.
pub async fn export_backup(conn: &mut SqliteConnection) -> Result<Backup, AppError> {
    let users = auth::repo::list_users(&mut *conn).await?;
    let user_rows: HashMap<i64, i64> = ordinals(users.iter().map(|u| u.id));
    let users = users
        .into_iter()
        .map(|u| UserRecord {
            username: u.username,
            email: u.email,
            password_hash: u.password_hash,
            admin: u.admin,
        })
        .collect();
    let skills = skills::repo::list(&mut *conn)
        .await?
        .into_iter()
        .map(|s| SkillRecord {
            name: s.name,
            explanation: s.explanation,
        })
        .collect();
    let projects = projects::repo::list(&mut *conn).await?;
    let project_rows: HashMap<i64, i64> = ordinals(projects.iter().map(|p| p.id));
    let projects = projects
        .into_iter()
        .map(|p| ProjectRecord { name: p.name })
        .collect();

    let mut sessions = Vec::new();
    for s in sessions::repo::list_all(&mut *conn).await? {
        let (Some(&user_id), Some(&project_id)) =
            (user_rows.get(&s.user_id), project_rows.get(&s.project_id))
        else {
            return Err(AppError::Internal(anyhow::anyhow!(
                "session {} references a missing user or project",
                s.id
            )));
        };
        let names = sessions::repo::skills_of(&mut *conn, s.id)
            .await?
            .into_iter()
            .map(|k| k.name)
            .collect::<Vec<_>>()
            .join(&BACKUP_SKILL_SEPARATOR.to_string());
        sessions.push(SessionRecord {
            name: s.name,
            duration: s.duration,
            level: s.level,
            explanation: s.explanation,
            created: s.created,
            edited: s.edited,
            window: s.window,
            private: s.private,
            user_id,
            project_id,
            skills: SkillList::parse(&names, BACKUP_SKILL_SEPARATOR),
        });
    }

    let backup = Backup {
        users,
        skills,
        projects,
        sessions,
    };
    info!(
        users = backup.users.len(),
        skills = backup.skills.len(),
        projects = backup.projects.len(),
        sessions = backup.sessions.len(),
        "backup exported"
    );
    Ok(backup)
}

fn ordinals(ids: impl Iterator<Item = i64>) -> HashMap<i64, i64> {
    ids.zip(1..).collect()
}

/// Applies a parsed archive.
///
/// Users are only taken when no `admin` account exists; otherwise each row
/// stands for the local user with the same username. Skills are matched by
/// name. The first project row is the default project and renames it; the
/// remaining rows are always inserted. Session references are archive row
/// numbers and are translated to the ids assigned here.
pub async fn import_backup(conn: &mut SqliteConnection, backup: &Backup) -> Result<ImportSummary, AppError> {
    let mut summary = ImportSummary::default();
    let mut user_ids: HashMap<i64, i64> = HashMap::new();

    if auth::repo::find_by_username(&mut *conn, ADMIN_USERNAME).await?.is_some() {
        summary.users_skipped = backup.users.len();
        if !backup.users.is_empty() {
            warn!(rows = backup.users.len(), "admin already present; skipping user rows");
        }
        for (row, u) in (1..).zip(&backup.users) {
            if let Some(existing) = auth::repo::find_by_username(&mut *conn, &u.username).await? {
                user_ids.insert(row, existing.id);
            }
        }
    } else {
        for (row, u) in (1..).zip(&backup.users) {
            if auth::repo::find_by_username(&mut *conn, &u.username).await?.is_some() {
                return Err(AppError::import(format!(
                    "user.csv record {row}: username {:?} already exists",
                    u.username
                )));
            }
            let user = auth::repo::insert_user(
                &mut *conn,
                &NewUser {
                    username: u.username.clone(),
                    email: u.email.clone(),
                    password_hash: u.password_hash.clone(),
                    admin: u.admin,
                },
            )
            .await
            .map_err(AppError::conflict_on("email", "email already registered"))?;
            user_ids.insert(row, user.id);
            summary.users_imported += 1;
        }
    }

    for s in &backup.skills {
        let (_, created) =
            skills::services::get_or_create(&mut *conn, &s.name, s.explanation.as_deref()).await?;
        if created {
            summary.skills_imported += 1;
        } else {
            summary.skills_reused += 1;
        }
    }

    let mut project_ids: HashMap<i64, i64> = HashMap::new();
    for (row, p) in (1..).zip(&backup.projects) {
        if row == 1 {
            let current = projects::repo::find_by_id(&mut *conn, DEFAULT_PROJECT_ID)
                .await?
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("default project is missing")))?;
            if current.name != p.name {
                projects::repo::rename(&mut *conn, DEFAULT_PROJECT_ID, &p.name).await?;
            }
            project_ids.insert(row, DEFAULT_PROJECT_ID);
            summary.projects_reused += 1;
        } else {
            let project = projects::repo::insert(&mut *conn, &p.name).await?;
            project_ids.insert(row, project.id);
            summary.projects_imported += 1;
        }
    }

    for (record, s) in (1..).zip(&backup.sessions) {
        let Some(&user_id) = user_ids.get(&s.user_id) else {
            return Err(AppError::import(format!(
                "session.csv record {record}: unknown user_id {}",
                s.user_id
            )));
        };
        let Some(&project_id) = project_ids.get(&s.project_id) else {
            return Err(AppError::import(format!(
                "session.csv record {record}: unknown project_id {}",
                s.project_id
            )));
        };

        let session = sessions::repo::insert(
            &mut *conn,
            user_id,
            &SessionWrite {
                name: &s.name,
                duration: s.duration,
                level: s.level,
                explanation: s.explanation.as_deref(),
                created: s.created,
                edited: s.edited,
                window: s.window,
                private: s.private,
                project_id,
            },
        )
        .await?;
        for skill in skills::services::resolve_skills(&mut *conn, &s.skills).await? {
            sessions::repo::link_skill(&mut *conn, session.id, skill.id).await?;
        }
        summary.sessions_imported += 1;
    }

    info!(?summary, "backup imported");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use sqlx::SqlitePool;

    use super::*;
    use crate::forms::SessionForm;
    use crate::sessions::services::create_session;
    use crate::state::AppState;
    use crate::test_support::insert_user;

    async fn count(db: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(db)
            .await
            .unwrap()
    }

    /// Store with two users (one admin), three skills, two projects and
    /// three sessions.
    async fn populated() -> AppState {
        let state = AppState::fake().await;
        let admin = insert_user(&state, ADMIN_USERNAME, true).await;
        let ana = insert_user(&state, "ana", false).await;
        let mut conn = state.db.acquire().await.unwrap();

        let forms = [
            (admin.id, json!({"skills": "piano, theory", "project": {"new_project": "Etudes"},
                              "starttime": "09:00", "endtime": "09:40", "explanation": "slow, then fast"})),
            (ana.id, json!({"skills": "reading", "private": true})),
            (ana.id, json!({"skills": "reading, piano", "project": {"old_project": 2}, "level": "master"})),
        ];
        for (uid, extra) in forms {
            let mut v = json!({
                "name": "Scales",
                "duration": 30,
                "level": "basic",
                "timezone": "Asia/Tokyo",
                "created": "2024-03-01",
                "edited": "2024-03-02"
            });
            for (k, val) in extra.as_object().unwrap() {
                v[k] = val.clone();
            }
            let cmd = serde_json::from_value::<SessionForm>(v).unwrap().validate().unwrap();
            create_session(&mut conn, uid, &cmd).await.unwrap();
        }
        drop(conn);
        state
    }

    #[tokio::test]
    async fn round_trip_into_empty_store() {
        let source = populated().await;
        let mut conn = source.db.acquire().await.unwrap();
        let exported = export_backup(&mut conn).await.unwrap();
        drop(conn);
        let bytes = exported.to_zip().unwrap();

        let target = AppState::fake().await;
        let mut conn = target.db.acquire().await.unwrap();
        let summary = import_backup(&mut conn, &Backup::from_zip(&bytes).unwrap())
            .await
            .unwrap();
        let reexported = export_backup(&mut conn).await.unwrap();
        drop(conn);

        assert_eq!(summary.users_imported, 2);
        assert_eq!(summary.projects_reused, 1, "seeded default project is not duplicated");
        assert_eq!(summary.projects_imported, 1);
        assert_eq!(summary.skills_imported, 3);
        assert_eq!(summary.sessions_imported, 3);
        for table in ["users", "skills", "projects", "sessions", "session_skills"] {
            assert_eq!(count(&source.db, table).await, count(&target.db, table).await, "{table}");
        }
        assert_eq!(reexported, exported);

        let created = exported.sessions[0].created;
        assert_eq!(created, Utc.with_ymd_and_hms(2024, 2, 29, 15, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn existing_admin_skips_user_rows_only() {
        let source = populated().await;
        let mut conn = source.db.acquire().await.unwrap();
        let backup = export_backup(&mut conn).await.unwrap();
        drop(conn);

        // the source already has "admin": users are skipped, the rest is applied
        let mut conn = source.db.acquire().await.unwrap();
        let summary = import_backup(&mut conn, &backup).await.unwrap();
        drop(conn);

        assert_eq!(summary.users_imported, 0);
        assert_eq!(summary.users_skipped, 2);
        assert_eq!(summary.skills_reused, 3);
        assert_eq!(summary.projects_reused, 1);
        assert_eq!(summary.projects_imported, 1);
        assert_eq!(summary.sessions_imported, 3);
        assert_eq!(count(&source.db, "users").await, 2);
        assert_eq!(count(&source.db, "skills").await, 3);
        assert_eq!(count(&source.db, "sessions").await, 6);
    }

    async fn session_projects(db: &SqlitePool) -> Vec<(i64, String)> {
        sqlx::query_as(
            "SELECT p.id, p.name FROM sessions s JOIN projects p ON p.id = s.project_id ORDER BY s.id",
        )
        .fetch_all(db)
        .await
        .unwrap()
    }

    async fn new_project_session(state: &AppState, user_id: i64, project: &str) {
        let cmd = serde_json::from_value::<SessionForm>(json!({
            "name": "Scales", "duration": 15, "level": "basic", "timezone": "UTC",
            "project": {"new_project": project}
        }))
        .unwrap()
        .validate()
        .unwrap();
        let mut conn = state.db.acquire().await.unwrap();
        create_session(&mut conn, user_id, &cmd).await.unwrap();
    }

    async fn restore(source: &AppState) -> (AppState, ImportSummary) {
        let mut conn = source.db.acquire().await.unwrap();
        let bytes = export_backup(&mut conn).await.unwrap().to_zip().unwrap();
        drop(conn);
        let target = AppState::fake().await;
        let mut conn = target.db.acquire().await.unwrap();
        let summary = import_backup(&mut conn, &Backup::from_zip(&bytes).unwrap())
            .await
            .unwrap();
        drop(conn);
        (target, summary)
    }

    #[tokio::test]
    async fn renamed_default_project_keeps_sessions_apart() {
        let source = AppState::fake().await;
        let ana = insert_user(&source, "ana", false).await;
        let mut conn = source.db.acquire().await.unwrap();
        projects::repo::rename(&mut conn, DEFAULT_PROJECT_ID, "Main").await.unwrap();
        drop(conn);
        new_project_session(&source, ana.id, "Etudes").await;

        let (target, summary) = restore(&source).await;
        assert_eq!((summary.projects_reused, summary.projects_imported), (1, 1));
        let mut conn = target.db.acquire().await.unwrap();
        let default = projects::repo::find_by_id(&mut conn, DEFAULT_PROJECT_ID)
            .await
            .unwrap()
            .unwrap();
        drop(conn);
        assert_eq!(default.name, "Main");
        assert_eq!(session_projects(&target.db).await, vec![(2, "Etudes".to_string())]);
    }

    #[tokio::test]
    async fn duplicate_project_names_stay_distinct() {
        let source = AppState::fake().await;
        let ana = insert_user(&source, "ana", false).await;
        new_project_session(&source, ana.id, "X").await;
        new_project_session(&source, ana.id, "X").await;

        let (target, summary) = restore(&source).await;
        assert_eq!(summary.projects_imported, 2);
        assert_eq!(count(&target.db, "projects").await, 3);
        assert_eq!(
            session_projects(&target.db).await,
            vec![(2, "X".to_string()), (3, "X".to_string())]
        );
    }

    #[tokio::test]
    async fn sparse_source_ids_are_renumbered() {
        let source = AppState::fake().await;
        let ana = insert_user(&source, "ana", false).await;
        new_project_session(&source, ana.id, "Dropped").await;
        new_project_session(&source, ana.id, "Kept").await;
        let mut conn = source.db.acquire().await.unwrap();
        crate::projects::services::delete_project(&mut conn, 2).await.unwrap();
        let backup = export_backup(&mut conn).await.unwrap();
        drop(conn);
        assert_eq!(
            backup.sessions.iter().map(|s| s.project_id).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let (target, _) = restore(&source).await;
        assert_eq!(
            session_projects(&target.db).await,
            vec![(1, "default".to_string()), (2, "Kept".to_string())]
        );
    }

    #[tokio::test]
    async fn unknown_project_id_fails_import() {
        let source = populated().await;
        let mut conn = source.db.acquire().await.unwrap();
        let mut backup = export_backup(&mut conn).await.unwrap();
        drop(conn);
        backup.sessions[0].project_id = 99;

        let target = AppState::fake().await;
        let mut tx = target.db.begin().await.unwrap();
        let err = import_backup(&mut tx, &backup).await.unwrap_err();
        assert!(err.to_string().contains("unknown project_id 99"), "{err}");
        tx.rollback().await.unwrap();

        assert_eq!(count(&target.db, "users").await, 0);
        assert_eq!(count(&target.db, "sessions").await, 0);
    }

    #[tokio::test]
    async fn empty_archive_imports_nothing() {
        let target = AppState::fake().await;
        let mut conn = target.db.acquire().await.unwrap();
        let summary = import_backup(&mut conn, &Backup::default()).await.unwrap();
        assert_eq!(summary, ImportSummary::default());
    }
}
