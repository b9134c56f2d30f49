//! The backup archive: a zip holding one CSV file per entity kind.
//!
//! Column order and header rows are fixed; archives written by older
//! installations must keep importing, so only additive leniency (fractional
//! seconds, bare time-of-day cells) is accepted on read.
//!
//! `user_id` and `project_id` in `session.csv` are 1-based row numbers into
//! `user.csv` and `project.csv`, not database ids.

use std::io::{Cursor, Read, Write};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use csv::StringRecord;
use tracing::{debug, warn};
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::auth::services::is_valid_email;
use crate::error::AppError;
use crate::forms::{SkillList, BACKUP_SKILL_SEPARATOR};
use crate::sessions::repo_types::{Level, TimeWindow};

pub const USER_FILE: &str = "user.csv";
pub const SKILL_FILE: &str = "skill.csv";
pub const PROJECT_FILE: &str = "project.csv";
pub const SESSION_FILE: &str = "session.csv";

pub const USER_HEADER: [&str; 4] = ["username", "email", "password_hash", "admin"];
pub const SKILL_HEADER: [&str; 2] = ["name", "explanation"];
pub const PROJECT_HEADER: [&str; 1] = ["name"];
pub const SESSION_HEADER: [&str; 12] = [
    "name",
    "duration",
    "level",
    "explanation",
    "created",
    "edited",
    "starttime",
    "endtime",
    "private",
    "user_id",
    "project_id",
    "skills",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillRecord {
    pub name: String,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub name: String,
    pub duration: i64,
    pub level: Level,
    pub explanation: Option<String>,
    pub created: DateTime<Utc>,
    pub edited: DateTime<Utc>,
    pub window: Option<TimeWindow>,
    pub private: bool,
    pub user_id: i64,
    pub project_id: i64,
    pub skills: SkillList,
}

/// Full contents of one archive, rows in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Backup {
    pub users: Vec<UserRecord>,
    pub skills: Vec<SkillRecord>,
    pub projects: Vec<ProjectRecord>,
    pub sessions: Vec<SessionRecord>,
}

// ---- cell formatting ----

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Time-of-day cells carry a placeholder date, like every other timestamp column.
fn format_time_of_day(t: NaiveTime) -> String {
    match NaiveDate::from_ymd_opt(1900, 1, 1) {
        Some(d) => NaiveDateTime::new(d, t).format(TIMESTAMP_FORMAT).to_string(),
        None => t.format("%H:%M:%S").to_string(),
    }
}

fn format_bool(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

/// `YYYY-MM-DD HH:MM:SS` with any `.ffffff` suffix dropped, read as UTC.
pub fn parse_timestamp(cell: &str) -> Option<DateTime<Utc>> {
    let cell = cell.trim();
    let whole = cell.split_once('.').map_or(cell, |(head, _)| head);
    NaiveDateTime::parse_from_str(whole, TIMESTAMP_FORMAT)
        .ok()
        .map(|n| Utc.from_utc_datetime(&n))
}

fn parse_time_of_day(cell: &str) -> Option<NaiveTime> {
    if let Some(ts) = parse_timestamp(cell) {
        return Some(ts.time());
    }
    let cell = cell.trim();
    let whole = cell.split_once('.').map_or(cell, |(head, _)| head);
    NaiveTime::parse_from_str(whole, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(whole, "%H:%M"))
        .ok()
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" | "" => Some(false),
        _ => None,
    }
}

fn optional(cell: &str) -> Option<String> {
    let cell = cell.trim();
    (!cell.is_empty()).then(|| cell.to_string())
}

// ---- writing ----

fn write_table<const N: usize>(
    header: [&str; N],
    rows: impl IntoIterator<Item = [String; N]>,
) -> anyhow::Result<Vec<u8>> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(header)?;
    for row in rows {
        w.write_record(&row)?;
    }
    Ok(w.into_inner().map_err(|e| anyhow::anyhow!(e.to_string()))?)
}

impl Backup {
    /// Serializes the four tables into a zip archive.
    pub fn to_zip(&self) -> Result<Vec<u8>, AppError> {
        let users = write_table(
            USER_HEADER,
            self.users.iter().map(|u| {
                [
                    u.username.clone(),
                    u.email.clone(),
                    u.password_hash.clone(),
                    format_bool(u.admin).to_string(),
                ]
            }),
        )?;
        let skills = write_table(
            SKILL_HEADER,
            self.skills
                .iter()
                .map(|s| [s.name.clone(), s.explanation.clone().unwrap_or_default()]),
        )?;
        let projects = write_table(PROJECT_HEADER, self.projects.iter().map(|p| [p.name.clone()]))?;
        let sessions = write_table(
            SESSION_HEADER,
            self.sessions.iter().map(|s| {
                [
                    s.name.clone(),
                    s.duration.to_string(),
                    s.level.to_string(),
                    s.explanation.clone().unwrap_or_default(),
                    format_timestamp(&s.created),
                    format_timestamp(&s.edited),
                    s.window.map(|w| format_time_of_day(w.start())).unwrap_or_default(),
                    s.window.map(|w| format_time_of_day(w.end())).unwrap_or_default(),
                    format_bool(s.private).to_string(),
                    s.user_id.to_string(),
                    s.project_id.to_string(),
                    s.skills.names().join(&BACKUP_SKILL_SEPARATOR.to_string()),
                ]
            }),
        )?;

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, body) in [
            (USER_FILE, users),
            (SKILL_FILE, skills),
            (PROJECT_FILE, projects),
            (SESSION_FILE, sessions),
        ] {
            zip.start_file(name, options).map_err(anyhow::Error::from)?;
            zip.write_all(&body).map_err(anyhow::Error::from)?;
        }
        let cursor = zip.finish().map_err(anyhow::Error::from)?;
        debug!(
            users = self.users.len(),
            skills = self.skills.len(),
            projects = self.projects.len(),
            sessions = self.sessions.len(),
            "backup archive written"
        );
        Ok(cursor.into_inner())
    }

    /// Parses and checks an uploaded archive; nothing is applied here.
    pub fn from_zip(bytes: &[u8]) -> Result<Self, AppError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| AppError::import(format!("not a zip archive: {e}")))?;

        for name in archive.file_names() {
            if ![USER_FILE, SKILL_FILE, PROJECT_FILE, SESSION_FILE].contains(&name) {
                warn!(file = %name, "ignoring unexpected file in backup archive");
            }
        }

        let users = read_table(&mut archive, USER_FILE, USER_HEADER)?
            .into_iter()
            .map(|(n, r)| user_record(n, &r))
            .collect::<Result<_, _>>()?;
        let skills = read_table(&mut archive, SKILL_FILE, SKILL_HEADER)?
            .into_iter()
            .map(|(n, r)| skill_record(n, &r))
            .collect::<Result<_, _>>()?;
        let projects = read_table(&mut archive, PROJECT_FILE, PROJECT_HEADER)?
            .into_iter()
            .map(|(n, r)| project_record(n, &r))
            .collect::<Result<_, _>>()?;
        let sessions = read_table(&mut archive, SESSION_FILE, SESSION_HEADER)?
            .into_iter()
            .map(|(n, r)| session_record(n, &r))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            users,
            skills,
            projects,
            sessions,
        })
    }
}

// ---- reading ----

/// Non-blank data rows of `name` with their line numbers, after checking
/// the header and the column count of every row.
fn read_table<const N: usize>(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
    header: [&str; N],
) -> Result<Vec<(u64, StringRecord)>, AppError> {
    let mut body = Vec::new();
    archive
        .by_name(name)
        .map_err(|_| AppError::import(format!("missing {name}")))?
        .read_to_end(&mut body)
        .map_err(|e| AppError::import(format!("{name}: {e}")))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_slice());

    let found = reader
        .headers()
        .map_err(|e| AppError::import(format!("{name}: {e}")))?;
    if found.iter().map(str::trim).ne(header.iter().copied()) {
        return Err(AppError::import(format!(
            "{name}: expected header {:?}, found {:?}",
            header.join(","),
            found.iter().collect::<Vec<_>>().join(",")
        )));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AppError::import(format!("{name}: {e}")))?;
        let line = record.position().map_or(0, |p| p.line());
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        if record.len() != N {
            return Err(AppError::import(format!(
                "{name} line {line}: expected {N} columns, found {}",
                record.len()
            )));
        }
        rows.push((line, record));
    }
    Ok(rows)
}

fn bad(file: &str, line: u64, column: &str, cell: &str) -> AppError {
    AppError::import(format!("{file} line {line}: invalid {column} {cell:?}"))
}

fn required(file: &str, line: u64, column: &str, cell: &str) -> Result<String, AppError> {
    optional(cell).ok_or_else(|| AppError::import(format!("{file} line {line}: {column} is empty")))
}

fn user_record(line: u64, r: &StringRecord) -> Result<UserRecord, AppError> {
    let f = USER_FILE;
    let email = required(f, line, "email", &r[1])?;
    if !is_valid_email(&email) {
        return Err(bad(f, line, "email", &email));
    }
    Ok(UserRecord {
        username: required(f, line, "username", &r[0])?,
        email,
        password_hash: required(f, line, "password_hash", &r[2])?,
        admin: parse_bool(&r[3]).ok_or_else(|| bad(f, line, "admin", &r[3]))?,
    })
}

fn skill_record(line: u64, r: &StringRecord) -> Result<SkillRecord, AppError> {
    Ok(SkillRecord {
        name: required(SKILL_FILE, line, "name", &r[0])?,
        explanation: optional(&r[1]),
    })
}

fn project_record(line: u64, r: &StringRecord) -> Result<ProjectRecord, AppError> {
    Ok(ProjectRecord {
        name: required(PROJECT_FILE, line, "name", &r[0])?,
    })
}

fn session_record(line: u64, r: &StringRecord) -> Result<SessionRecord, AppError> {
    let f = SESSION_FILE;
    let int = |i: usize| r[i].trim().parse::<i64>().map_err(|_| bad(f, line, SESSION_HEADER[i], &r[i]));
    let timestamp = |i: usize| parse_timestamp(&r[i]).ok_or_else(|| bad(f, line, SESSION_HEADER[i], &r[i]));
    let time_of_day = |i: usize| match optional(&r[i]) {
        None => Ok(None),
        Some(cell) => parse_time_of_day(&cell)
            .map(Some)
            .ok_or_else(|| bad(f, line, SESSION_HEADER[i], &r[i])),
    };

    let duration = int(1)?;
    if duration <= 0 {
        return Err(bad(f, line, "duration", &r[1]));
    }
    let window = TimeWindow::from_pair(time_of_day(6)?, time_of_day(7)?)
        .map_err(|m| AppError::import(format!("{f} line {line}: {m}")))?;

    Ok(SessionRecord {
        name: required(f, line, "name", &r[0])?,
        duration,
        level: r[2].trim().parse().map_err(|_| bad(f, line, "level", &r[2]))?,
        explanation: optional(&r[3]),
        created: timestamp(4)?,
        edited: timestamp(5)?,
        window,
        private: parse_bool(&r[8]).ok_or_else(|| bad(f, line, "private", &r[8]))?,
        user_id: int(9)?,
        project_id: int(10)?,
        skills: SkillList::parse(&r[11], BACKUP_SKILL_SEPARATOR),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in files {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    const USERS: &str = "username,email,password_hash,admin\nadmin,a@example.com,hash,True\n";
    const SKILLS: &str = "name,explanation\npiano,keys\ntheory,\n";
    const PROJECTS: &str = "name\ndefault\nEtudes\n";
    const SESSIONS: &str = "name,duration,level,explanation,created,edited,starttime,endtime,private,user_id,project_id,skills\n\
        Scales,30,basic,slow,2024-01-15 10:00:00.123456,2024-01-16 11:30:00,1900-01-01 09:00:00,1900-01-01 09:30:00,False,1,2,piano|theory\n\
        ,,,,,,,,,,,\n";

    fn valid() -> Vec<u8> {
        zip_of(&[
            (USER_FILE, USERS),
            (SKILL_FILE, SKILLS),
            (PROJECT_FILE, PROJECTS),
            (SESSION_FILE, SESSIONS),
        ])
    }

    #[test]
    fn reads_reference_archive() {
        let backup = Backup::from_zip(&valid()).unwrap();
        assert_eq!(backup.users.len(), 1);
        assert!(backup.users[0].admin);
        assert_eq!(backup.skills[1].explanation, None);
        assert_eq!(backup.projects.len(), 2);
        assert_eq!(backup.sessions.len(), 1, "blank row is skipped");

        let s = &backup.sessions[0];
        assert_eq!(s.level, Level::Basic);
        assert_eq!(s.created, Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
        assert_eq!(s.window.unwrap().end(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(s.skills.names(), ["piano", "theory"]);
        assert_eq!((s.user_id, s.project_id), (1, 2));
    }

    #[test]
    fn written_archive_has_exact_headers() {
        let backup = Backup::from_zip(&valid()).unwrap();
        let bytes = backup.to_zip().unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let mut session_csv = String::new();
        archive
            .by_name(SESSION_FILE)
            .unwrap()
            .read_to_string(&mut session_csv)
            .unwrap();
        let mut lines = session_csv.lines();
        assert_eq!(lines.next().unwrap(), SESSION_HEADER.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "Scales,30,basic,slow,2024-01-15 10:00:00,2024-01-16 11:30:00,\
             1900-01-01 09:00:00,1900-01-01 09:30:00,False,1,2,piano|theory"
        );

        assert_eq!(Backup::from_zip(&bytes).unwrap(), backup);
    }

    #[test]
    fn missing_file_is_rejected() {
        let bytes = zip_of(&[(USER_FILE, USERS), (SKILL_FILE, SKILLS), (PROJECT_FILE, PROJECTS)]);
        let err = Backup::from_zip(&bytes).unwrap_err();
        assert!(matches!(&err, AppError::ImportFormat(m) if m.contains("session.csv")));
    }

    #[test]
    fn wrong_header_or_width_is_rejected() {
        let bytes = zip_of(&[
            (USER_FILE, "user,email,password_hash,admin\n"),
            (SKILL_FILE, SKILLS),
            (PROJECT_FILE, PROJECTS),
            (SESSION_FILE, SESSIONS),
        ]);
        assert!(matches!(Backup::from_zip(&bytes), Err(AppError::ImportFormat(_))));

        let bytes = zip_of(&[
            (USER_FILE, USERS),
            (SKILL_FILE, "name,explanation\npiano\n"),
            (PROJECT_FILE, PROJECTS),
            (SESSION_FILE, SESSIONS),
        ]);
        let err = Backup::from_zip(&bytes).unwrap_err();
        assert!(err.to_string().contains("expected 2 columns"), "{err}");
    }

    #[test]
    fn malformed_timestamp_is_rejected() {
        let sessions = format!(
            "{}\nScales,30,basic,,15/01/2024,2024-01-16 11:30:00,,,False,1,1,piano\n",
            SESSION_HEADER.join(",")
        );
        let bytes = zip_of(&[
            (USER_FILE, USERS),
            (SKILL_FILE, SKILLS),
            (PROJECT_FILE, PROJECTS),
            (SESSION_FILE, &sessions),
        ]);
        let err = Backup::from_zip(&bytes).unwrap_err();
        assert!(err.to_string().contains("created"), "{err}");
    }

    #[test]
    fn half_time_window_is_rejected() {
        let sessions = format!(
            "{}\nScales,30,basic,,2024-01-15 10:00:00,2024-01-16 11:30:00,09:00,,False,1,1,piano\n",
            SESSION_HEADER.join(",")
        );
        let bytes = zip_of(&[
            (USER_FILE, USERS),
            (SKILL_FILE, SKILLS),
            (PROJECT_FILE, PROJECTS),
            (SESSION_FILE, &sessions),
        ]);
        assert!(matches!(Backup::from_zip(&bytes), Err(AppError::ImportFormat(_))));
    }

    #[test]
    fn cell_parsers() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(""), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(
            parse_timestamp("2023-05-01 07:08:09.5"),
            Some(Utc.with_ymd_and_hms(2023, 5, 1, 7, 8, 9).unwrap())
        );
        assert_eq!(parse_timestamp("2023-05-01"), None);
        assert_eq!(parse_time_of_day("07:15"), NaiveTime::from_hms_opt(7, 15, 0));
        assert_eq!(format_time_of_day(NaiveTime::from_hms_opt(7, 15, 0).unwrap()), "1900-01-01 07:15:00");
    }
}
