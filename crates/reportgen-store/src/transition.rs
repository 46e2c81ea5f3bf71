//! Task lifecycle rules shared by every store implementation
//!
//! Each function validates the current status, then mutates the task in
//! place. Stores load the row, apply one of these and persist the result in
//! the same transaction.

use chrono::{DateTime, Utc};
use reportgen_core::{SanitizerAuditRecord, Task, TaskStatus};

use crate::{Result, RetryPolicy, StoreError};

fn ensure_status(task: &Task, allowed: &[TaskStatus], operation: &'static str) -> Result<()> {
    if allowed.contains(&task.status) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            task_id: task.id,
            status: task.status,
            operation,
        })
    }
}

pub(crate) fn claim(task: &mut Task, now: DateTime<Utc>) {
    task.status = TaskStatus::InProgress;
    task.updated_at = now;
}

pub(crate) fn complete(
    task: &mut Task,
    response: String,
    provider_used: String,
    now: DateTime<Utc>,
) -> Result<()> {
    ensure_status(task, &[TaskStatus::InProgress], "complete")?;
    task.status = TaskStatus::Complete;
    task.response = Some(response);
    task.provider_used = Some(provider_used);
    task.last_error = None;
    task.updated_at = now;
    Ok(())
}

pub(crate) fn flag(
    task: &mut Task,
    response: String,
    provider_used: String,
    now: DateTime<Utc>,
) -> Result<()> {
    ensure_status(task, &[TaskStatus::InProgress], "flag")?;
    task.status = TaskStatus::Flagged;
    task.response = Some(response);
    task.provider_used = Some(provider_used);
    task.last_error = None;
    task.updated_at = now;
    Ok(())
}

pub(crate) fn retry_or_fail(
    task: &mut Task,
    error: String,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<()> {
    ensure_status(task, &[TaskStatus::InProgress], "retry")?;
    task.attempts += 1;
    task.last_error = Some(error);
    task.updated_at = now;
    if policy.exhausted(task.attempts) {
        task.status = TaskStatus::Failed;
    } else {
        task.status = TaskStatus::Pending;
        task.next_attempt_at = policy.next_attempt_at(now, task.attempts);
    }
    Ok(())
}

/// IN_PROGRESS → PENDING for a claim whose worker never recorded an outcome.
/// Attempts are kept; the task is due immediately.
pub(crate) fn requeue(task: &mut Task, now: DateTime<Utc>) -> Result<()> {
    ensure_status(task, &[TaskStatus::InProgress], "requeue")?;
    task.last_error = Some(format!(
        "claim abandoned, held since {}",
        task.updated_at.to_rfc3339()
    ));
    task.status = TaskStatus::Pending;
    task.next_attempt_at = now;
    task.updated_at = now;
    Ok(())
}

pub(crate) fn revise(task: &mut Task, response: String, now: DateTime<Utc>) -> Result<()> {
    ensure_status(task, &[TaskStatus::Flagged], "revise")?;
    task.response = Some(response);
    task.updated_at = now;
    Ok(())
}

/// Outstanding corrections blocking approval, or `None` when approval may proceed.
pub(crate) fn approval_blocker(
    task: &Task,
    latest_pass: Option<&SanitizerAuditRecord>,
) -> Result<Option<u32>> {
    ensure_status(task, &[TaskStatus::Flagged], "approve")?;
    let outstanding = latest_pass.map_or(0, |record| record.corrections_count);
    Ok((outstanding > 0).then_some(outstanding))
}

pub(crate) fn approve(task: &mut Task, now: DateTime<Utc>) {
    task.status = TaskStatus::Complete;
    task.updated_at = now;
}

pub(crate) fn rerun(task: &mut Task, now: DateTime<Utc>) -> Result<()> {
    ensure_status(
        task,
        &[TaskStatus::Complete, TaskStatus::Flagged, TaskStatus::Failed],
        "rerun",
    )?;
    task.status = TaskStatus::Pending;
    task.attempts = 0;
    task.next_attempt_at = now;
    task.provider_used = None;
    task.response = None;
    task.last_error = None;
    task.updated_at = now;
    Ok(())
}
