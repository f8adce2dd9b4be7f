use chrono::{Duration, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw value stored for a link the user explicitly declined to map.
pub const DECLINED_SENTINEL: i64 = -1;

/// Wall-clock component attached to every submitted entry; only the date is meaningful.
const SUBMISSION_WALL_CLOCK: &str = "17:00:00";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: Option<i64>,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub duration: Duration,
    pub project_code: String,
    pub description: String,
    pub notes: String,
}

impl Entry {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.project_code, "entry.project_code")?;
        if self.duration <= Duration::zero() {
            return Err("empty hours or project code, please check inputs".to_string());
        }
        Ok(())
    }
}

/// Unvalidated entry input. The duration is derived from start/end when both are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryDraft {
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub duration: Option<Duration>,
    pub project_code: String,
    pub description: String,
    pub notes: String,
}

impl EntryDraft {
    pub fn into_entry(self, id: Option<i64>) -> Result<Entry, String> {
        let date = self.date.ok_or_else(|| "entry.date is required".to_string())?;
        let project_code = self.project_code.trim().to_string();
        if project_code.is_empty() {
            return Err("empty hours or project code, please check inputs".to_string());
        }

        let duration = match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => {
                if end <= start {
                    return Err("entry.end_time must be after entry.start_time".to_string());
                }
                end - start
            }
            _ => self.duration.unwrap_or_else(Duration::zero),
        };

        let entry = Entry {
            id,
            date,
            start_time: self.start_time,
            end_time: self.end_time,
            duration,
            project_code,
            description: self.description.trim().to_string(),
            notes: self.notes,
        };
        entry.validate()?;
        Ok(entry)
    }
}

impl From<&Entry> for EntryDraft {
    fn from(entry: &Entry) -> Self {
        Self {
            date: Some(entry.date),
            start_time: entry.start_time,
            end_time: entry.end_time,
            duration: Some(entry.duration),
            project_code: entry.project_code.clone(),
            description: entry.description.clone(),
            notes: entry.notes.clone(),
        }
    }
}

/// Resolved side of a project link: either a concrete remote id or an explicit decline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkTarget {
    Remote(i64),
    Declined,
}

impl LinkTarget {
    pub fn from_raw(raw: i64) -> Self {
        if raw == DECLINED_SENTINEL {
            Self::Declined
        } else {
            Self::Remote(raw)
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            Self::Remote(id) => id,
            Self::Declined => DECLINED_SENTINEL,
        }
    }

    pub fn remote_id(self) -> Option<i64> {
        match self {
            Self::Remote(id) => Some(id),
            Self::Declined => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLink {
    pub project_code: String,
    pub task: Option<LinkTarget>,
    pub activity: Option<LinkTarget>,
    pub stale: bool,
}

impl ProjectLink {
    /// A link counts as resolved once its task side is set, declined included.
    pub fn is_resolved(&self) -> bool {
        self.task.is_some()
    }

    pub fn is_declined(&self) -> bool {
        self.task == Some(LinkTarget::Declined)
    }

    /// Activity id sent with a submission; unset and declined both map to 0.
    pub fn activity_for_submission(&self) -> i64 {
        self.activity.and_then(LinkTarget::remote_id).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub master_account_id: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.username, "username")?;
        validate_non_empty(&self.password, "password")?;
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub id: i64,
    pub name: String,
    pub project: String,
}

impl RemoteTask {
    pub fn label(&self) -> String {
        format!("Project: {} Task: {}", self.project, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteActivity {
    pub id: i64,
    pub name: String,
    pub parent: String,
    pub active: bool,
}

impl RemoteActivity {
    pub fn label(&self) -> String {
        format!(
            "Parent: {} Activity Name: {} is Active?: {}",
            self.parent, self.name, self.active
        )
    }
}

/// Snapshot of the tasks and activities visible to the authenticated user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCatalog {
    pub tasks: Vec<RemoteTask>,
    pub activities: Vec<RemoteActivity>,
}

impl RemoteCatalog {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: i64) -> Option<&RemoteTask> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn activity(&self, id: i64) -> Option<&RemoteActivity> {
        self.activities.iter().find(|activity| activity.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    pub project_code: String,
    pub duration: Duration,
    pub descriptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub projects: Vec<ProjectSummary>,
}

/// Totals entries per day and project code. Days keep the order they first appear in
/// `entries`, projects keep first-seen order within a day. Blank descriptions are dropped.
pub fn summarize(entries: &[Entry]) -> Vec<DaySummary> {
    let mut days: Vec<DaySummary> = Vec::new();
    for entry in entries {
        let day_index = match days.iter().position(|day| day.date == entry.date) {
            Some(index) => index,
            None => {
                days.push(DaySummary {
                    date: entry.date,
                    projects: Vec::new(),
                });
                days.len() - 1
            }
        };
        let projects = &mut days[day_index].projects;
        let project_index = match projects
            .iter()
            .position(|project| project.project_code == entry.project_code)
        {
            Some(index) => index,
            None => {
                projects.push(ProjectSummary {
                    project_code: entry.project_code.clone(),
                    duration: Duration::zero(),
                    descriptions: Vec::new(),
                });
                projects.len() - 1
            }
        };
        let project = &mut projects[project_index];
        project.duration += entry.duration;
        let description = entry.description.trim();
        if !description.is_empty() {
            project.descriptions.push(description.to_string());
        }
    }
    days
}

/// Formats a duration as zero-padded `HH:MM:SS`; hours are not wrapped at 24.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total / 60) % 60,
        total % 60
    )
}

/// ISO-8601 timestamp for `date` at the fixed submission wall clock in `offset`.
pub fn completed_timestamp(date: NaiveDate, offset: FixedOffset) -> String {
    let seconds = offset.local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let seconds = seconds.abs();
    format!(
        "{}T{SUBMISSION_WALL_CLOCK}{sign}{:02}:{:02}",
        date.format("%Y-%m-%d"),
        seconds / 3600,
        (seconds / 60) % 60
    )
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
