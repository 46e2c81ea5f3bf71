//! Append-only sanitizer audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{AuditId, ModelError, TaskId};

/// What produced an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Automatic sanitizer pass over a provider response
    Sanitization,
    /// Sanitizer pass over a reviewer-edited response
    Revision,
    /// Reviewer approval that was refused
    ApprovalRejected,
    /// Reviewer approval that moved the task to COMPLETE
    Approved,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::Sanitization => "sanitization",
            AuditKind::Revision => "revision",
            AuditKind::ApprovalRejected => "approval_rejected",
            AuditKind::Approved => "approved",
        }
    }

    /// Records produced by running the sanitizer; approval gates on the latest one.
    pub fn is_sanitizer_pass(self) -> bool {
        matches!(self, AuditKind::Sanitization | AuditKind::Revision)
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sanitization" => Ok(AuditKind::Sanitization),
            "revision" => Ok(AuditKind::Revision),
            "approval_rejected" => Ok(AuditKind::ApprovalRejected),
            "approved" => Ok(AuditKind::Approved),
            other => Err(ModelError::UnknownAuditKind(other.to_string())),
        }
    }
}

/// One correction: `original` in the response was replaced by `corrected`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditNote {
    pub field: String,
    pub original: String,
    pub corrected: String,
}

impl AuditNote {
    pub fn new(
        field: impl Into<String>,
        original: impl Into<String>,
        corrected: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            original: original.into(),
            corrected: corrected.into(),
        }
    }
}

/// An audit record before the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuditRecord {
    pub kind: AuditKind,
    pub corrections_count: u32,
    pub notes: Vec<AuditNote>,
}

impl NewAuditRecord {
    /// Sanitizer pass; `corrections_count` is the number of notes, zero included.
    pub fn sanitization(notes: Vec<AuditNote>) -> Self {
        Self {
            kind: AuditKind::Sanitization,
            corrections_count: notes.len() as u32,
            notes,
        }
    }

    pub fn revision(notes: Vec<AuditNote>) -> Self {
        Self {
            kind: AuditKind::Revision,
            corrections_count: notes.len() as u32,
            notes,
        }
    }

    /// Refused approval; carries the outstanding correction count it was refused for.
    pub fn approval_rejected(outstanding: u32) -> Self {
        Self {
            kind: AuditKind::ApprovalRejected,
            corrections_count: outstanding,
            notes: vec![AuditNote::new(
                "approval",
                "flagged",
                format!("rejected: {outstanding} unresolved correction(s)"),
            )],
        }
    }

    pub fn approved() -> Self {
        Self {
            kind: AuditKind::Approved,
            corrections_count: 0,
            notes: vec![AuditNote::new("approval", "flagged", "complete")],
        }
    }
}

/// Immutable record of one sanitizer pass or review action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizerAuditRecord {
    pub id: AuditId,
    pub task_id: TaskId,
    pub kind: AuditKind,
    pub corrections_count: u32,
    pub notes: Vec<AuditNote>,
    pub created_at: DateTime<Utc>,
}

impl SanitizerAuditRecord {
    pub fn from_new(
        id: AuditId,
        task_id: TaskId,
        record: NewAuditRecord,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            kind: record.kind,
            corrections_count: record.corrections_count,
            notes: record.notes,
            created_at,
        }
    }
}
