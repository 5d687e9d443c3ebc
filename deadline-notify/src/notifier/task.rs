// Task records as read from the task store
// The notifier only reads status; mutation belongs to the CRUD layer

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle status as declared by the task store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TaskStatus {
    /// Task is still open and its deadline may trigger notifications
    Upcoming,
    /// Task was finished by the user
    Completed,
    /// Task was reopened after its deadline passed
    Overdue,
}

impl TaskStatus {
    /// Status a completed task returns to when reopened.
    ///
    /// A task whose deadline is still ahead goes back to `Upcoming`,
    /// otherwise it is `Overdue`.
    pub fn reopened(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if deadline > now {
            TaskStatus::Upcoming
        } else {
            TaskStatus::Overdue
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Upcoming => write!(f, "Upcoming"),
            TaskStatus::Completed => write!(f, "Completed"),
            TaskStatus::Overdue => write!(f, "Overdue"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Upcoming" => Ok(TaskStatus::Upcoming),
            "Completed" => Ok(TaskStatus::Completed),
            "Overdue" => Ok(TaskStatus::Overdue),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// Opaque, stable task identifier assigned by the task store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A deadline that could not be turned into a timestamp
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task {0} has no end date")]
    MissingEndDate(TaskId),
    #[error("task {id} has an unparseable end date {value:?}")]
    MalformedEndDate { id: TaskId, value: String },
}

/// Task record owned by the task store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Deadline as stored: RFC 3339 or a plain `YYYY-MM-DD` date.
    /// Kept as text so records with a broken deadline still load.
    #[serde(
        rename = "endDate",
        alias = "end_date",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date: Option<String>,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        end_date: DateTime<Utc>,
        status: TaskStatus,
    ) -> Self {
        Self {
            id: TaskId::new(id),
            title: title.into(),
            description: String::new(),
            end_date: Some(end_date.to_rfc3339()),
            status,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Parse the stored end date into a UTC deadline.
    ///
    /// Plain dates are read as midnight UTC.
    pub fn deadline(&self) -> Result<DateTime<Utc>, TaskError> {
        let raw = match self.end_date.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Err(TaskError::MissingEndDate(self.id.clone())),
        };

        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(ts.with_timezone(&Utc));
        }

        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| TaskError::MalformedEndDate {
                id: self.id.clone(),
                value: raw.to_string(),
            })
    }
}
