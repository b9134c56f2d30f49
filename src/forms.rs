//! Raw request bodies and their validation into typed commands.
//!
//! Every form is deserialized with all fields optional so that missing or
//! malformed values are reported per field instead of as a body rejection.
//! `validate` either returns an immutable command or an
//! [`AppError::Validation`] carrying every problem found.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, ValidationErrors};
use crate::projects::repo_types::DEFAULT_PROJECT_ID;
use crate::sessions::repo_types::{Level, TimeWindow};

pub const REQUIRED: &str = "This field is required.";
const MAX_NAME_LEN: usize = 120;

/// Separator between skill names in a session form.
pub const SKILL_SEPARATOR: char = ',';
/// Separator between skill names inside one backup cell.
pub const BACKUP_SKILL_SEPARATOR: char = '|';

// ---- shared field helpers ----

fn blank_to_none(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required_name(errors: &mut ValidationErrors, field: &'static str, value: &Option<String>) -> String {
    match blank_to_none(value) {
        None => {
            errors.add(field, REQUIRED);
            String::new()
        }
        Some(v) if v.chars().count() > MAX_NAME_LEN => {
            errors.add(
                field,
                format!("Field cannot be longer than {MAX_NAME_LEN} characters."),
            );
            String::new()
        }
        Some(v) => v.to_string(),
    }
}

fn optional_text(value: &Option<String>) -> Option<String> {
    blank_to_none(value).map(str::to_string)
}

fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// Local midnight of `date` in `tz`, as UTC.
fn local_date_to_utc(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&NaiveDateTime::new(date, NaiveTime::MIN))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_duration(value: &Value) -> Result<i64, &'static str> {
    let minutes = match value {
        Value::Number(n) => n.as_i64().ok_or("Not a valid integer value.")?,
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| "Not a valid integer value.")?,
        _ => return Err("Not a valid integer value."),
    };
    if minutes <= 0 {
        return Err("Duration must be a positive number of minutes.");
    }
    Ok(minutes)
}

// ---- skills ----

/// Trimmed, non-empty, de-duplicated skill names in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkillList(Vec<String>);

impl SkillList {
    pub fn parse(raw: &str, separator: char) -> Self {
        let mut names: Vec<String> = Vec::new();
        for token in raw.split(separator).map(str::trim).filter(|t| !t.is_empty()) {
            if !names.iter().any(|n| n == token) {
                names.push(token.to_string());
            }
        }
        Self(names)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---- sessions ----

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProjectChoice {
    pub new_project: Option<String>,
    pub old_project: Option<i64>,
}

/// Untrusted session input as posted by a client.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionForm {
    pub name: Option<String>,
    /// Minutes, as a JSON number or a numeric string.
    pub duration: Option<Value>,
    pub level: Option<String>,
    pub explanation: Option<String>,
    /// IANA zone the dates below are expressed in.
    pub timezone: Option<String>,
    pub project: ProjectChoice,
    /// `YYYY-MM-DD`
    pub created: Option<String>,
    /// `YYYY-MM-DD`
    pub edited: Option<String>,
    /// `HH:MM`
    pub starttime: Option<String>,
    /// `HH:MM`
    pub endtime: Option<String>,
    pub private: bool,
    /// Comma separated skill names.
    pub skills: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectSelector {
    New(String),
    Existing(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionFields {
    pub name: String,
    pub duration: i64,
    pub level: Level,
    pub explanation: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub edited: Option<DateTime<Utc>>,
    pub window: Option<TimeWindow>,
    pub private: bool,
}

/// Validated input for creating or updating a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCommand {
    pub fields: SessionFields,
    pub project: ProjectSelector,
    pub skills: SkillList,
}

impl SessionForm {
    pub fn validate(&self) -> Result<SessionCommand, AppError> {
        let mut errors = ValidationErrors::new();

        let name = required_name(&mut errors, "name", &self.name);

        let duration = match &self.duration {
            None | Some(Value::Null) => {
                errors.add("duration", REQUIRED);
                0
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                errors.add("duration", REQUIRED);
                0
            }
            Some(v) => parse_duration(v).unwrap_or_else(|m| {
                errors.add("duration", m);
                0
            }),
        };

        let level = match blank_to_none(&self.level) {
            None => {
                errors.add("level", REQUIRED);
                None
            }
            Some(l) => l.parse::<Level>().map_err(|_| errors.add("level", "Not a valid choice.")).ok(),
        };

        let tz = match blank_to_none(&self.timezone) {
            None => {
                errors.add("timezone", REQUIRED);
                None
            }
            Some(z) => z.parse::<Tz>().map_err(|_| errors.add("timezone", "Not a valid choice.")).ok(),
        };

        let mut date_field = |field: &'static str, value: &Option<String>| -> Option<DateTime<Utc>> {
            let raw = blank_to_none(value)?;
            let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") else {
                errors.add(field, "Not a valid date value.");
                return None;
            };
            // without a zone the date cannot be placed; the timezone error is already recorded
            let tz = tz?;
            local_date_to_utc(date, tz).or_else(|| {
                errors.add(field, "Date does not exist in the selected timezone.");
                None
            })
        };
        let created = date_field("created", &self.created);
        let edited = date_field("edited", &self.edited);

        let mut time_field = |field: &'static str, value: &Option<String>| -> Result<Option<NaiveTime>, ()> {
            match blank_to_none(value) {
                None => Ok(None),
                Some(raw) => parse_time_of_day(raw).map(Some).ok_or_else(|| {
                    errors.add(field, "Not a valid time value.");
                }),
            }
        };
        let start = time_field("starttime", &self.starttime);
        let end = time_field("endtime", &self.endtime);
        let window = match (start, end) {
            (Ok(start), Ok(end)) => TimeWindow::from_pair(start, end).unwrap_or_else(|m| {
                errors.add("endtime", m);
                None
            }),
            _ => None,
        };

        let skills = match blank_to_none(&self.skills) {
            None => {
                errors.add("skills", REQUIRED);
                SkillList::default()
            }
            Some(raw) => {
                let list = SkillList::parse(raw, SKILL_SEPARATOR);
                if list.is_empty() {
                    errors.add("skills", REQUIRED);
                }
                if list.names().iter().any(|n| n.contains(BACKUP_SKILL_SEPARATOR)) {
                    errors.add("skills", "Skill names cannot contain '|'.");
                }
                if list.names().iter().any(|n| n.chars().count() > MAX_NAME_LEN) {
                    errors.add(
                        "skills",
                        format!("Skill names cannot be longer than {MAX_NAME_LEN} characters."),
                    );
                }
                list
            }
        };

        let project = match blank_to_none(&self.project.new_project) {
            Some(new) if new.chars().count() > MAX_NAME_LEN => {
                errors.add(
                    "project",
                    format!("Field cannot be longer than {MAX_NAME_LEN} characters."),
                );
                ProjectSelector::Existing(DEFAULT_PROJECT_ID)
            }
            Some(new) => ProjectSelector::New(new.to_string()),
            None => ProjectSelector::Existing(self.project.old_project.unwrap_or(DEFAULT_PROJECT_ID)),
        };

        let (Some(level), true) = (level, errors.is_empty()) else {
            return Err(AppError::Validation(errors));
        };

        Ok(SessionCommand {
            fields: SessionFields {
                name,
                duration,
                level,
                explanation: optional_text(&self.explanation),
                created,
                edited,
                window,
                private: self.private,
            },
            project,
            skills,
        })
    }
}

// ---- projects ----

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProjectForm {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectCommand {
    pub name: String,
}

impl ProjectForm {
    pub fn validate(&self) -> Result<ProjectCommand, AppError> {
        let mut errors = ValidationErrors::new();
        let name = required_name(&mut errors, "name", &self.name);
        errors.into_result(ProjectCommand { name })
    }
}

// ---- skills ----

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SkillForm {
    pub name: Option<String>,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillCommand {
    pub name: String,
    pub explanation: Option<String>,
}

impl SkillForm {
    pub fn validate(&self) -> Result<SkillCommand, AppError> {
        let mut errors = ValidationErrors::new();
        let name = required_name(&mut errors, "name", &self.name);
        if name.contains(SKILL_SEPARATOR) || name.contains(BACKUP_SKILL_SEPARATOR) {
            errors.add("name", "Skill names cannot contain ',' or '|'.");
        }
        errors.into_result(SkillCommand {
            name,
            explanation: optional_text(&self.explanation),
        })
    }
}
