//! Row mapping between SQLite and the core model

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use reportgen_core::{
    AuditId, AuditKind, AuditNote, Fingerprint, ProviderHealth, ProviderState, QuotaWindow,
    SanitizerAuditRecord, Task, TaskId, TaskStatus,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::{Result, StoreError};

pub(crate) const TASK_COLUMNS: &str = "id, document_path, payload, fingerprint, status, attempts, \
     next_attempt_at_ms, provider_used, response, last_error, created_at_ms, updated_at_ms";

pub(crate) const AUDIT_COLUMNS: &str =
    "id, task_id, kind, corrections_count, notes, created_at_ms";

pub(crate) const PROVIDER_COLUMNS: &str = "name, priority, health, consecutive_failures, \
     calls_used, calls_quota, quota_window, window_started_at_ms, backoff_until_ms, total_calls, \
     total_failures, avg_latency_ms, success_rate, updated_at_ms";

pub(crate) fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: TaskId::new(row.get(0)?),
        document_path: PathBuf::from(row.get::<_, String>(1)?),
        payload: row.get(2)?,
        fingerprint: Fingerprint::from(row.get::<_, String>(3)?),
        status: parse_column::<TaskStatus>(row, 4)?,
        attempts: row.get(5)?,
        next_attempt_at: ms_to_dt(row.get(6)?),
        provider_used: row.get(7)?,
        response: row.get(8)?,
        last_error: row.get(9)?,
        created_at: ms_to_dt(row.get(10)?),
        updated_at: ms_to_dt(row.get(11)?),
    })
}

pub(crate) fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<SanitizerAuditRecord> {
    let notes_json: String = row.get(4)?;
    let notes: Vec<AuditNote> = serde_json::from_str(&notes_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(SanitizerAuditRecord {
        id: AuditId::new(row.get(0)?),
        task_id: TaskId::new(row.get(1)?),
        kind: parse_column::<AuditKind>(row, 2)?,
        corrections_count: row.get(3)?,
        notes,
        created_at: ms_to_dt(row.get(5)?),
    })
}

pub(crate) fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<ProviderState> {
    Ok(ProviderState {
        name: row.get(0)?,
        priority: row.get(1)?,
        health: parse_column::<ProviderHealth>(row, 2)?,
        consecutive_failures: row.get(3)?,
        calls_used: row.get(4)?,
        calls_quota: row.get(5)?,
        quota_window: parse_column::<QuotaWindow>(row, 6)?,
        window_started_at: ms_to_dt(row.get(7)?),
        backoff_until: row.get::<_, Option<i64>>(8)?.map(ms_to_dt),
        total_calls: row.get::<_, i64>(9)? as u64,
        total_failures: row.get::<_, i64>(10)? as u64,
        avg_latency_ms: row.get(11)?,
        success_rate: row.get(12)?,
        updated_at: ms_to_dt(row.get(13)?),
    })
}

pub(crate) fn load_task(conn: &Connection, id: TaskId) -> Result<Task> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        params![id.get()],
        task_from_row,
    )
    .optional()?
    .ok_or(StoreError::TaskNotFound(id))
}

/// Write back every mutable column of `task`.
pub(crate) fn save_task(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET status = ?2, attempts = ?3, next_attempt_at_ms = ?4,
             provider_used = ?5, response = ?6, last_error = ?7, updated_at_ms = ?8
         WHERE id = ?1",
        params![
            task.id.get(),
            task.status.as_str(),
            task.attempts,
            dt_to_ms(task.next_attempt_at),
            task.provider_used,
            task.response,
            task.last_error,
            dt_to_ms(task.updated_at),
        ],
    )?;
    Ok(())
}

/// Id of a non-terminal task holding `fingerprint`, other than `except`.
pub(crate) fn active_holder(
    conn: &Connection,
    fingerprint: &Fingerprint,
    except: Option<TaskId>,
) -> Result<Option<TaskId>> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT id FROM tasks
             WHERE fingerprint = ?1 AND status IN ('pending', 'in_progress') AND id != ?2
             LIMIT 1",
            params![fingerprint.as_str(), except.map_or(-1, TaskId::get)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(TaskId::new))
}

pub(crate) fn insert_audit(
    conn: &Connection,
    task_id: TaskId,
    record: reportgen_core::NewAuditRecord,
    now: DateTime<Utc>,
) -> Result<SanitizerAuditRecord> {
    let notes = serde_json::to_string(&record.notes)?;
    conn.execute(
        "INSERT INTO audit_records (task_id, kind, corrections_count, notes, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            task_id.get(),
            record.kind.as_str(),
            record.corrections_count,
            notes,
            dt_to_ms(now),
        ],
    )?;
    let id = AuditId::new(conn.last_insert_rowid());
    Ok(SanitizerAuditRecord::from_new(id, task_id, record, now))
}

pub(crate) fn latest_pass(conn: &Connection, task_id: TaskId) -> Result<Option<SanitizerAuditRecord>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_records
                 WHERE task_id = ?1 AND kind IN ('sanitization', 'revision')
                 ORDER BY id DESC LIMIT 1"
            ),
            params![task_id.get()],
            audit_from_row,
        )
        .optional()?)
}

pub(crate) fn load_provider(conn: &Connection, name: &str) -> Result<Option<ProviderState>> {
    Ok(conn
        .query_row(
            &format!("SELECT {PROVIDER_COLUMNS} FROM provider_states WHERE name = ?1"),
            params![name],
            provider_from_row,
        )
        .optional()?)
}

pub(crate) fn save_provider(conn: &Connection, state: &ProviderState) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO provider_states ({PROVIDER_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT (name) DO UPDATE SET
                priority = excluded.priority,
                health = excluded.health,
                consecutive_failures = excluded.consecutive_failures,
                calls_used = excluded.calls_used,
                calls_quota = excluded.calls_quota,
                quota_window = excluded.quota_window,
                window_started_at_ms = excluded.window_started_at_ms,
                backoff_until_ms = excluded.backoff_until_ms,
                total_calls = excluded.total_calls,
                total_failures = excluded.total_failures,
                avg_latency_ms = excluded.avg_latency_ms,
                success_rate = excluded.success_rate,
                updated_at_ms = excluded.updated_at_ms"
        ),
        params![
            state.name,
            state.priority,
            state.health.as_str(),
            state.consecutive_failures,
            state.calls_used,
            state.calls_quota,
            state.quota_window.as_str(),
            dt_to_ms(state.window_started_at),
            state.backoff_until.map(dt_to_ms),
            state.total_calls as i64,
            state.total_failures as i64,
            state.avg_latency_ms,
            state.success_rate,
            dt_to_ms(state.updated_at),
        ],
    )?;
    Ok(())
}
