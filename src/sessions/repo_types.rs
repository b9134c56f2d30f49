use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const NEED_BOTH_TIMES: &str = "Either, fill out both Start and End time, or neither.";
pub const END_BEFORE_START: &str = "End Time must not be earlier than Start Time.";

/// Proficiency reached in a session, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Untrained,
    Basic,
    Intermediate,
    Advanced,
    Master,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Untrained,
        Level::Basic,
        Level::Intermediate,
        Level::Advanced,
        Level::Master,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Untrained => "untrained",
            Level::Basic => "basic",
            Level::Intermediate => "intermediate",
            Level::Advanced => "advanced",
            Level::Master => "master",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown level {0:?}")]
pub struct UnknownLevel(pub String);

impl FromStr for Level {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| UnknownLevel(s.to_string()))
    }
}

/// Start/end time of day; `end` is never earlier than `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (end >= start).then_some(Self { start, end })
    }

    /// Both-or-neither: `Ok(None)` when both are absent, the failure message
    /// when only one is set or the pair is inverted.
    pub fn from_pair(
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
    ) -> Result<Option<Self>, &'static str> {
        match (start, end) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) => Self::new(start, end).map(Some).ok_or(END_BEFORE_START),
            _ => Err(NEED_BOTH_TIMES),
        }
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }
}

/// Row of the `sessions` table as stored.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: i64,
    pub name: String,
    pub duration: i64,
    pub level: String,
    pub explanation: Option<String>,
    pub created: DateTime<Utc>,
    pub edited: DateTime<Utc>,
    pub starttime: Option<NaiveTime>,
    pub endtime: Option<NaiveTime>,
    pub private: bool,
    pub user_id: i64,
    pub project_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: i64,
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
}

impl TryFrom<SessionRow> for Session {
    type Error = sqlx::Error;

    fn try_from(r: SessionRow) -> Result<Self, Self::Error> {
        let level = r
            .level
            .parse::<Level>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let window = TimeWindow::from_pair(r.starttime, r.endtime)
            .map_err(|m| sqlx::Error::Decode(m.into()))?;
        Ok(Self {
            id: r.id,
            name: r.name,
            duration: r.duration,
            level,
            explanation: r.explanation,
            created: r.created,
            edited: r.edited,
            window,
            private: r.private,
            user_id: r.user_id,
            project_id: r.project_id,
        })
    }
}

/// Values written by an insert or a full update.
#[derive(Debug, Clone)]
pub struct SessionWrite<'a> {
    pub name: &'a str,
    pub duration: i64,
    pub level: Level,
    pub explanation: Option<&'a str>,
    pub created: DateTime<Utc>,
    pub edited: DateTime<Utc>,
    pub window: Option<TimeWindow>,
    pub private: bool,
    pub project_id: i64,
}

/// Who is looking; private sessions are shown only to their author or admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: i64,
    pub admin: bool,
}

impl Viewer {
    pub fn can_see(&self, session: &Session) -> bool {
        !session.private || self.can_edit(session)
    }

    pub fn can_edit(&self, session: &Session) -> bool {
        self.admin || session.user_id == self.user_id
    }
}
