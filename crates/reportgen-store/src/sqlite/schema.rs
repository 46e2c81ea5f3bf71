//! Versioned schema migrations

use rusqlite::{Connection, params};

use crate::{Result, StoreError};

pub(crate) const SCHEMA_VERSION: i64 = 2;

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at_ms INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn current_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

fn record_migration(conn: &Connection, version: i64, name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, name, applied_at_ms) VALUES (?1, ?2, ?3)",
        params![version, name, chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

/// v1: tasks, provider state, audit log and control flags.
fn migration_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_path TEXT NOT NULL,
            payload TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at_ms INTEGER NOT NULL,
            provider_used TEXT,
            response TEXT,
            last_error TEXT,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );
        CREATE INDEX idx_tasks_claim
            ON tasks (status, next_attempt_at_ms, created_at_ms, id);
        CREATE UNIQUE INDEX idx_tasks_active_fingerprint
            ON tasks (fingerprint) WHERE status IN ('pending', 'in_progress');

        CREATE TABLE audit_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL REFERENCES tasks (id),
            kind TEXT NOT NULL,
            corrections_count INTEGER NOT NULL,
            notes TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        );
        CREATE INDEX idx_audit_task ON audit_records (task_id, id);
        CREATE INDEX idx_audit_created ON audit_records (created_at_ms, id);

        CREATE TABLE provider_states (
            name TEXT PRIMARY KEY,
            priority INTEGER NOT NULL,
            health TEXT NOT NULL,
            consecutive_failures INTEGER NOT NULL,
            calls_used INTEGER NOT NULL,
            calls_quota INTEGER,
            quota_window TEXT NOT NULL,
            window_started_at_ms INTEGER NOT NULL,
            backoff_until_ms INTEGER,
            total_calls INTEGER NOT NULL,
            total_failures INTEGER NOT NULL,
            avg_latency_ms REAL,
            success_rate REAL NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE control_flags (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

/// v2: audit rows can be inserted but never changed.
fn migration_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TRIGGER audit_records_no_update
            BEFORE UPDATE ON audit_records
            BEGIN SELECT RAISE(ABORT, 'audit records are append-only'); END;
        CREATE TRIGGER audit_records_no_delete
            BEFORE DELETE ON audit_records
            BEGIN SELECT RAISE(ABORT, 'audit records are append-only'); END;",
    )?;
    Ok(())
}

pub(crate) fn migrate(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    ensure_migration_table(&tx)?;
    let current = current_version(&tx)?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    if current < 1 {
        migration_v1(&tx)?;
        record_migration(&tx, 1, "baseline_tables")?;
    }
    if current < 2 {
        migration_v2(&tx)?;
        record_migration(&tx, 2, "append_only_audit")?;
    }
    tx.commit()?;
    Ok(())
}

pub(crate) fn schema_version(conn: &Connection) -> Result<i64> {
    current_version(conn)
}
