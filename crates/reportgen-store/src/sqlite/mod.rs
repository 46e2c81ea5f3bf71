//! SQLite-backed task store
//!
//! One connection per store behind a mutex; several processes may open the
//! same file. Write paths run in `IMMEDIATE` transactions so the read-modify-
//! write of a task or provider row is never interleaved with another writer.

mod rows;
mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reportgen_core::{
    HealthPolicy, NewAuditRecord, NewTask, ProviderRegistration, ProviderState,
    SanitizerAuditRecord, SkipReason, SlotDecision, Task, TaskId, TaskStatus,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use self::rows::{
    AUDIT_COLUMNS, PROVIDER_COLUMNS, TASK_COLUMNS, active_holder, audit_from_row, dt_to_ms,
    insert_audit, latest_pass, load_provider, load_task, provider_from_row, save_provider,
    save_task, task_from_row,
};
use crate::store::{ApprovalOutcome, TaskStore};
use crate::{Result, RetryPolicy, StoreError, transition};

const PAUSED_FLAG: &str = "claims_paused";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Task store persisted in a SQLite database file
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
    retry_policy: RetryPolicy,
}

impl std::fmt::Debug for SqliteTaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTaskStore")
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl SqliteTaskStore {
    /// Open (or create) the database at `path` and apply pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "opened sqlite database");
        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&mut conn)?;
        info!(version = schema::schema_version(&conn)?, "task store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub async fn schema_version(&self) -> Result<i64> {
        self.with_conn(|conn| schema::schema_version(conn)).await
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }

    /// Run `f` inside an immediate transaction and commit on success.
    async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }

    /// Load, transition and persist a task, optionally appending an audit record.
    async fn transition_task<F>(
        &self,
        id: TaskId,
        audit: Option<NewAuditRecord>,
        now: DateTime<Utc>,
        apply: F,
    ) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()> + Send + 'static,
    {
        self.write(move |tx| {
            let mut task = load_task(tx, id)?;
            apply(&mut task)?;
            save_task(tx, &task)?;
            if let Some(record) = audit {
                insert_audit(tx, id, record, now)?;
            }
            Ok(task)
        })
        .await
    }

    async fn update_provider<F>(&self, name: &str, apply: F) -> Result<ProviderState>
    where
        F: FnOnce(&mut ProviderState) + Send + 'static,
    {
        let name = name.to_string();
        self.write(move |tx| {
            let mut state = load_provider(tx, &name)?.ok_or(StoreError::ProviderNotFound(name))?;
            apply(&mut state);
            save_provider(tx, &state)?;
            Ok(state)
        })
        .await
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn enqueue(&self, task: NewTask, now: DateTime<Utc>) -> Result<Task> {
        let task = self
            .write(move |tx| {
                if let Some(existing) = active_holder(tx, &task.fingerprint, None)? {
                    return Err(StoreError::DuplicateFingerprint {
                        fingerprint: task.fingerprint,
                        existing,
                    });
                }
                let inserted = tx.execute(
                    "INSERT INTO tasks (document_path, payload, fingerprint, status, attempts,
                         next_attempt_at_ms, created_at_ms, updated_at_ms)
                     VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4, ?4)",
                    params![
                        task.document_path.to_string_lossy(),
                        task.payload,
                        task.fingerprint.as_str(),
                        dt_to_ms(now),
                    ],
                );
                match inserted {
                    Ok(_) => {}
                    Err(err) if is_constraint_violation(&err) => {
                        let existing = active_holder(tx, &task.fingerprint, None)?
                            .ok_or(StoreError::Database(err))?;
                        return Err(StoreError::DuplicateFingerprint {
                            fingerprint: task.fingerprint,
                            existing,
                        });
                    }
                    Err(err) => return Err(err.into()),
                }
                let id = TaskId::new(tx.last_insert_rowid());
                Ok(Task::pending(id, task, now))
            })
            .await?;
        debug!(task_id = %task.id, fingerprint = %task.fingerprint, "task enqueued");
        Ok(task)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Task>> {
        self.with_conn(move |conn| {
            let now_ms = dt_to_ms(now);
            let claimed = conn
                .query_row(
                    &format!(
                        "UPDATE tasks SET status = 'in_progress', updated_at_ms = ?1
                         WHERE id = (
                             SELECT id FROM tasks
                             WHERE status = 'pending' AND next_attempt_at_ms <= ?1
                             ORDER BY created_at_ms, id
                             LIMIT 1
                         )
                         AND status = 'pending'
                         RETURNING {TASK_COLUMNS}"
                    ),
                    params![now_ms],
                    task_from_row,
                )
                .optional()?;
            Ok(claimed)
        })
        .await
    }

    async fn complete(
        &self,
        id: TaskId,
        response: String,
        provider_used: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        self.transition_task(id, Some(audit), now, move |task| {
            transition::complete(task, response, provider_used, now)
        })
        .await
    }

    async fn flag(
        &self,
        id: TaskId,
        response: String,
        provider_used: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        self.transition_task(id, Some(audit), now, move |task| {
            transition::flag(task, response, provider_used, now)
        })
        .await
    }

    async fn retry_or_fail(&self, id: TaskId, error: String, now: DateTime<Utc>) -> Result<Task> {
        let policy = self.retry_policy.clone();
        self.transition_task(id, None, now, move |task| {
            transition::retry_or_fail(task, error, &policy, now)
        })
        .await
    }

    async fn revise(
        &self,
        id: TaskId,
        response: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        self.transition_task(id, Some(audit), now, move |task| {
            transition::revise(task, response, now)
        })
        .await
    }

    async fn approve(&self, id: TaskId, now: DateTime<Utc>) -> Result<ApprovalOutcome> {
        self.write(move |tx| {
            let mut task = load_task(tx, id)?;
            let latest = latest_pass(tx, id)?;
            if let Some(outstanding) = transition::approval_blocker(&task, latest.as_ref())? {
                let record =
                    insert_audit(tx, id, NewAuditRecord::approval_rejected(outstanding), now)?;
                return Ok(ApprovalOutcome::Rejected {
                    task,
                    outstanding,
                    record,
                });
            }
            transition::approve(&mut task, now);
            save_task(tx, &task)?;
            let record = insert_audit(tx, id, NewAuditRecord::approved(), now)?;
            Ok(ApprovalOutcome::Approved { task, record })
        })
        .await
    }

    async fn rerun(&self, id: TaskId, now: DateTime<Utc>) -> Result<Task> {
        self.write(move |tx| {
            let mut task = load_task(tx, id)?;
            if let Some(existing) = active_holder(tx, &task.fingerprint, Some(id))? {
                return Err(StoreError::DuplicateFingerprint {
                    fingerprint: task.fingerprint,
                    existing,
                });
            }
            transition::rerun(&mut task, now)?;
            save_task(tx, &task)?;
            Ok(task)
        })
        .await
    }

    async fn requeue_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        self.write(move |tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE status = 'in_progress' AND updated_at_ms <= ?1
                 ORDER BY created_at_ms, id"
            ))?;
            let stale = stmt
                .query_map(params![dt_to_ms(claimed_before)], task_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let mut requeued = Vec::with_capacity(stale.len());
            for mut task in stale {
                transition::requeue(&mut task, now)?;
                save_task(tx, &task)?;
                requeued.push(task);
            }
            Ok(requeued)
        })
        .await
    }

    async fn get_task(&self, id: TaskId) -> Result<Task> {
        self.with_conn(move |conn| load_task(conn, id)).await
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY created_at_ms, id"
            ))?;
            let rows = stmt.query_map(params![status.map(TaskStatus::as_str)], task_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn queue_length(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn audit_for_task(&self, id: TaskId) -> Result<Vec<SanitizerAuditRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_records WHERE task_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![id.get()], audit_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn audit_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SanitizerAuditRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_records
                 WHERE created_at_ms >= ?1 AND created_at_ms <= ?2
                 ORDER BY created_at_ms, id"
            ))?;
            let rows = stmt.query_map(params![dt_to_ms(since), dt_to_ms(until)], audit_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn register_provider(
        &self,
        registration: &ProviderRegistration,
        now: DateTime<Utc>,
    ) -> Result<ProviderState> {
        let registration = registration.clone();
        self.write(move |tx| {
            let state = match load_provider(tx, &registration.name)? {
                Some(mut state) => {
                    state.apply_registration(&registration, now);
                    state
                }
                None => ProviderState::new(&registration, now),
            };
            save_provider(tx, &state)?;
            Ok(state)
        })
        .await
    }

    async fn acquire_provider_slot(&self, name: &str, now: DateTime<Utc>) -> Result<SlotDecision> {
        let name = name.to_string();
        self.write(move |tx| {
            let Some(mut state) = load_provider(tx, &name)? else {
                return Ok(SlotDecision::Unavailable(SkipReason::Unregistered));
            };
            let decision = state.try_acquire(now);
            save_provider(tx, &state)?;
            Ok(decision)
        })
        .await
    }

    async fn record_provider_success(
        &self,
        name: &str,
        latency: Duration,
        now: DateTime<Utc>,
    ) -> Result<ProviderState> {
        self.update_provider(name, move |state| state.record_success(latency, now))
            .await
    }

    async fn record_provider_failure(
        &self,
        name: &str,
        policy: &HealthPolicy,
        now: DateTime<Utc>,
    ) -> Result<ProviderState> {
        let policy = *policy;
        self.update_provider(name, move |state| state.record_failure(now, &policy))
            .await
    }

    async fn set_provider_priority(
        &self,
        name: &str,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Result<ProviderState> {
        self.update_provider(name, move |state| {
            state.priority = priority;
            state.updated_at = now;
        })
        .await
    }

    async fn provider_states(&self) -> Result<Vec<ProviderState>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROVIDER_COLUMNS} FROM provider_states ORDER BY priority, name"
            ))?;
            let rows = stmt.query_map([], provider_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn set_paused(&self, paused: bool, now: DateTime<Utc>) -> Result<()> {
        self.write(move |tx| {
            tx.execute(
                "INSERT INTO control_flags (name, value, updated_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT (name) DO UPDATE SET value = excluded.value,
                     updated_at_ms = excluded.updated_at_ms",
                params![PAUSED_FLAG, if paused { "1" } else { "0" }, dt_to_ms(now)],
            )?;
            Ok(())
        })
        .await?;
        info!(paused, "claim pause flag updated");
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM control_flags WHERE name = ?1",
                    params![PAUSED_FLAG],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.as_deref() == Some("1"))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn store() -> SqliteTaskStore {
        SqliteTaskStore::open_in_memory()
            .unwrap()
            .with_retry_policy(contract::test_retry_policy())
    }

    fn temp_store(dir: &TempDir) -> SqliteTaskStore {
        SqliteTaskStore::open(dir.path().join("reportgen.db"))
            .unwrap()
            .with_retry_policy(contract::test_retry_policy())
    }

    #[tokio::test]
    async fn test_enqueue_and_claim_fifo() {
        contract::enqueue_and_claim_fifo(&store()).await;
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint() {
        contract::duplicate_fingerprint(&store()).await;
    }

    #[tokio::test]
    async fn test_backoff_hides_task_until_due() {
        contract::backoff_hides_task_until_due(&store()).await;
    }

    #[tokio::test]
    async fn test_retries_exhaust_to_failed() {
        contract::retries_exhaust_to_failed(&store()).await;
    }

    #[tokio::test]
    async fn test_complete_writes_audit_once() {
        contract::complete_writes_audit_once(&store()).await;
    }

    #[tokio::test]
    async fn test_approval_gate() {
        contract::approval_gate(&store()).await;
    }

    #[tokio::test]
    async fn test_rerun_and_fingerprint_reuse() {
        contract::rerun_and_fingerprint_reuse(&store()).await;
    }

    #[tokio::test]
    async fn test_provider_bookkeeping() {
        contract::provider_bookkeeping(&store()).await;
    }

    #[tokio::test]
    async fn test_pause_flag() {
        contract::pause_flag(&store()).await;
    }

    #[tokio::test]
    async fn test_audit_queries() {
        contract::audit_queries(&store()).await;
    }

    #[tokio::test]
    async fn test_stale_claims_requeue() {
        contract::stale_claims_requeue(&store()).await;
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_exclusive() {
        contract::concurrent_claims_are_exclusive(&store()).await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir);
        assert_eq!(store.schema_version().await.unwrap(), schema::SCHEMA_VERSION);
        store.enqueue(contract::new_task(1), contract::t0()).await.unwrap();
        drop(store);

        let reopened = temp_store(&dir);
        assert_eq!(reopened.schema_version().await.unwrap(), schema::SCHEMA_VERSION);
        assert_eq!(reopened.queue_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_audit_rows_are_append_only() {
        let store = store();
        let task = store.enqueue(contract::new_task(1), contract::t0()).await.unwrap();
        store.claim_next(contract::t0()).await.unwrap().unwrap();
        store
            .complete(
                task.id,
                "ok".into(),
                "p".into(),
                NewAuditRecord::sanitization(vec![]),
                contract::t0(),
            )
            .await
            .unwrap();

        let result = store
            .with_conn(|conn| {
                conn.execute("UPDATE audit_records SET corrections_count = 5", [])?;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Database(_))));
        let result = store
            .with_conn(|conn| {
                conn.execute("DELETE FROM audit_records", [])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.audit_for_task(task.id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_separate_connections_never_double_claim() {
        let dir = tempfile::tempdir().unwrap();
        let seed = temp_store(&dir);
        for n in 0..20 {
            seed.enqueue(contract::new_task(n), contract::t0()).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = temp_store(&dir);
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                loop {
                    match store.claim_next(contract::t0()).await {
                        Ok(Some(task)) => claimed.push(task.id),
                        Ok(None) => break,
                        Err(StoreError::Contention) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 20);
        assert_eq!(unique.len(), 20);
    }
}
