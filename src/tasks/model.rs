//! Task data model — conversion jobs, statuses, partial updates, and progress reports.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message set when a task is first created.
pub const MSG_STARTING: &str = "Starting…";
/// Message set once the upload is on disk and the runner has been dispatched.
pub const MSG_QUEUED: &str = "Queued…";
/// Message repeated on every progress tick while the converter runs.
pub const MSG_CONVERTING: &str = "Converting…";
/// Message set on successful completion.
pub const MSG_COMPLETE: &str = "Complete";

/// Opaque task identifier. Rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for TaskId {
    type Error = uuid::Error;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Upload received or conversion running.
    Processing,
    /// Output is on disk and downloadable until `expires_at`.
    Complete,
    /// Conversion (or its setup) failed. Terminal.
    Error,
}

impl TaskStatus {
    /// Whether no further transition can leave this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One conversion job and the files it owns.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    /// 0–100. Only ever raised while processing.
    pub progress: u8,
    /// Human-readable status text.
    pub message: String,
    /// Set when the upload has been written to disk.
    pub input_path: Option<PathBuf>,
    /// Where the converter is asked to write its output.
    pub output_path: Option<PathBuf>,
    /// Name of the uploaded file as supplied by the client.
    pub filename: String,
    pub created_at: DateTime<Utc>,
    /// Set if and only if the task is complete.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a fresh processing task for an uploaded file.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            status: TaskStatus::Processing,
            progress: 0,
            message: MSG_STARTING.to_string(),
            input_path: None,
            output_path: None,
            filename: filename.into(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Check whether the download deadline has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    /// Merge a partial update into this task.
    pub(crate) fn apply(&mut self, update: TaskUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            let progress = progress.min(100);
            // Progress never moves backwards while processing.
            self.progress = if self.status == TaskStatus::Processing {
                self.progress.max(progress)
            } else {
                progress
            };
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(path) = update.input_path {
            self.input_path = Some(path);
        }
        if let Some(path) = update.output_path {
            self.output_path = Some(path);
        }
        if let Some(expires_at) = update.expires_at {
            self.expires_at = Some(expires_at);
        }
    }
}

/// A partial set of task fields to merge atomically.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    /// Progress tick while still processing.
    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Terminal failure. Progress is left untouched unless `progress` is given.
    pub fn failed(message: impl Into<String>, progress: Option<u8>) -> Self {
        Self {
            status: Some(TaskStatus::Error),
            progress,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Terminal success with a download deadline.
    pub fn completed(expires_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Complete),
            progress: Some(100),
            message: Some(MSG_COMPLETE.to_string()),
            expires_at: Some(expires_at),
            ..Default::default()
        }
    }

    /// Record the task's files and mark it queued for conversion.
    pub fn queued(input_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            progress: Some(10),
            message: Some(MSG_QUEUED.to_string()),
            input_path: Some(input_path),
            output_path: Some(output_path),
            ..Default::default()
        }
    }
}

/// Snapshot returned by the progress query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub progress: u8,
    pub status: TaskStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Whole seconds until the result expires, never negative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl ProgressReport {
    /// Build a report for `task` as seen at `now`.
    pub fn at(task: &Task, now: DateTime<Utc>) -> Self {
        let mut report = Self {
            progress: task.progress,
            status: task.status,
            message: task.message.clone(),
            download_url: None,
            expires_in: None,
        };
        if task.status == TaskStatus::Complete {
            report.download_url = Some(format!("/api/download/{}", task.id));
            let remaining = task
                .expires_at
                .map(|exp| (exp - now).num_seconds())
                .unwrap_or(0);
            report.expires_in = Some(remaining.max(0) as u64);
        }
        report
    }
}
