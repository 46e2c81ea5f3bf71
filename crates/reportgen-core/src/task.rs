//! Task records and their lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{Fingerprint, ModelError, TaskId};

/// Lifecycle state of a task
///
/// ```text
/// PENDING --claim--> IN_PROGRESS --clean--> COMPLETE
/// IN_PROGRESS --over threshold--> FLAGGED
/// IN_PROGRESS --transient error, attempts < max--> PENDING
/// IN_PROGRESS --transient error, attempts >= max--> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed once `next_attempt_at` has passed
    Pending,
    /// Held by exactly one worker
    InProgress,
    /// Generated, sanitized and accepted
    Complete,
    /// Too many corrections; waits for a human reviewer
    Flagged,
    /// Retries exhausted
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Complete,
        TaskStatus::Flagged,
        TaskStatus::Failed,
    ];

    /// Storage and display form
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Complete => "complete",
            TaskStatus::Flagged => "flagged",
            TaskStatus::Failed => "failed",
        }
    }

    /// Terminal states are never left automatically.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Flagged | TaskStatus::Failed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "complete" | "completed" => Ok(TaskStatus::Complete),
            "flagged" => Ok(TaskStatus::Flagged),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(ModelError::UnknownStatus(s.to_string())),
        }
    }
}

/// Producer input for `enqueue`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Source document the generated content belongs to
    pub document_path: PathBuf,
    /// Prompt / context blob handed to the provider
    pub payload: String,
    /// Dedupe key
    pub fingerprint: Fingerprint,
}

impl NewTask {
    pub fn new(
        document_path: impl Into<PathBuf>,
        payload: impl Into<String>,
        fingerprint: impl Into<Fingerprint>,
    ) -> Self {
        Self {
            document_path: document_path.into(),
            payload: payload.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

/// A unit of work: one document awaiting AI-generated content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub document_path: PathBuf,
    pub payload: String,
    pub fingerprint: Fingerprint,
    pub status: TaskStatus,
    /// Failed attempts so far; never exceeds the configured maximum
    pub attempts: u32,
    /// Earliest time the task may be claimed again
    pub next_attempt_at: DateTime<Utc>,
    pub provider_used: Option<String>,
    pub response: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build the initial PENDING record for `new`.
    pub fn pending(id: TaskId, new: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            document_path: new.document_path,
            payload: new.payload,
            fingerprint: new.fingerprint,
            status: TaskStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            provider_used: None,
            response: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Eligible for `claim_next` at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_attempt_at <= now
    }
}
