//! Table rendering for command output

use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use reportgen_core::{AuditNote, ProviderState, SanitizerAuditRecord, Task};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

pub fn tasks(tasks: &[Task]) -> Table {
    let mut out = table(&["id", "status", "attempts", "next attempt", "provider", "document", "last error"]);
    for task in tasks {
        out.add_row(vec![
            task.id.to_string(),
            task.status.to_string(),
            task.attempts.to_string(),
            task.next_attempt_at.format(TIME_FORMAT).to_string(),
            or_dash(task.provider_used.as_deref()),
            task.document_path.display().to_string(),
            or_dash(task.last_error.as_deref()),
        ]);
    }
    out
}

pub fn task_detail(task: &Task) -> Table {
    let mut out = table(&["field", "value"]);
    let rows = [
        ("id", task.id.to_string()),
        ("status", task.status.to_string()),
        ("document", task.document_path.display().to_string()),
        ("fingerprint", task.fingerprint.to_string()),
        ("attempts", task.attempts.to_string()),
        ("next attempt", task.next_attempt_at.format(TIME_FORMAT).to_string()),
        ("provider", or_dash(task.provider_used.as_deref())),
        ("last error", or_dash(task.last_error.as_deref())),
        ("created", task.created_at.format(TIME_FORMAT).to_string()),
        ("updated", task.updated_at.format(TIME_FORMAT).to_string()),
    ];
    for (field, value) in rows {
        out.add_row(vec![field.to_string(), value]);
    }
    out
}

pub fn audit(records: &[SanitizerAuditRecord]) -> Table {
    let mut out = table(&["id", "task", "kind", "corrections", "notes", "created"]);
    for record in records {
        let notes = record
            .notes
            .iter()
            .map(|note| format!("{}: {} → {}", note.field, note.original, note.corrected))
            .collect::<Vec<_>>()
            .join("\n");
        out.add_row(vec![
            record.id.to_string(),
            record.task_id.to_string(),
            record.kind.to_string(),
            record.corrections_count.to_string(),
            notes,
            record.created_at.format(TIME_FORMAT).to_string(),
        ]);
    }
    out
}

pub fn audit_notes(notes: &[AuditNote]) -> Table {
    let mut out = table(&["field", "claimed", "canonical"]);
    for note in notes {
        out.add_row(vec![note.field.clone(), note.original.clone(), note.corrected.clone()]);
    }
    out
}

pub fn providers(states: &[ProviderState]) -> Table {
    let mut out = table(&[
        "priority",
        "provider",
        "health",
        "failures",
        "quota",
        "window resets",
        "backoff until",
        "success",
        "latency",
    ]);
    for state in states {
        let quota = match state.calls_quota {
            Some(quota) => format!("{}/{} {}", state.calls_used, quota, state.quota_window),
            None => format!("{} (unlimited)", state.calls_used),
        };
        out.add_row(vec![
            state.priority.to_string(),
            state.name.clone(),
            state.health.to_string(),
            state.consecutive_failures.to_string(),
            quota,
            state.window_resets_at().format(TIME_FORMAT).to_string(),
            state
                .backoff_until
                .map_or_else(|| "-".to_string(), |t| t.format(TIME_FORMAT).to_string()),
            format!("{:.0}%", state.success_rate * 100.0),
            state
                .avg_latency_ms
                .map_or_else(|| "-".to_string(), |ms| format!("{ms:.0} ms")),
        ]);
    }
    out
}
