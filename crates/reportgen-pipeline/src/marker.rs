//! Document metadata marker
//!
//! After a task reaches COMPLETE or FLAGGED, the source document is marked so
//! downstream publishing can tell generated content apart from content that
//! still needs a reviewer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reportgen_core::{TaskId, TaskStatus};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Generation state recorded against a source document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMark {
    pub status: TaskStatus,
    pub task_id: TaskId,
    pub corrections: u32,
    pub updated_at: DateTime<Utc>,
}

/// Records generation state against a source document
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentMarker: Send + Sync {
    async fn mark(&self, document: &Path, mark: &DocumentMark) -> Result<()>;
}

/// Writes `<document stem>.llm.json` next to the document
///
/// Keys written by other tools are kept; the four mark keys are replaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarMarker;

impl SidecarMarker {
    /// `reports/AAPL.json` → `reports/AAPL.llm.json`
    pub fn sidecar_path(document: &Path) -> PathBuf {
        document.with_extension("llm.json")
    }

    async fn existing_fields(path: &Path) -> Result<Map<String, Value>> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(fields)) => Ok(fields),
                _ => {
                    warn!(path = %path.display(), "sidecar is not a JSON object, replacing it");
                    Ok(Map::new())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Map::new()),
            Err(source) => Err(PipelineError::Marker {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[async_trait]
impl DocumentMarker for SidecarMarker {
    async fn mark(&self, document: &Path, mark: &DocumentMark) -> Result<()> {
        let path = Self::sidecar_path(document);
        let mut fields = Self::existing_fields(&path).await?;
        fields.insert("status".into(), json!(mark.status));
        fields.insert("task_id".into(), json!(mark.task_id));
        fields.insert("corrections".into(), json!(mark.corrections));
        fields.insert("updated_at".into(), json!(mark.updated_at));

        let body = serde_json::to_string_pretty(&Value::Object(fields))?;
        let staging = path.with_extension("json.tmp");
        let io_err = |source| PipelineError::Marker {
            path: path.clone(),
            source,
        };
        tokio::fs::write(&staging, body).await.map_err(io_err)?;
        tokio::fs::rename(&staging, &path).await.map_err(io_err)?;

        debug!(path = %path.display(), status = %mark.status, "document marked");
        Ok(())
    }
}

/// Marker that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMarker;

#[async_trait]
impl DocumentMarker for NoopMarker {
    async fn mark(&self, _document: &Path, _mark: &DocumentMark) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::t0;

    fn mark(status: TaskStatus, corrections: u32) -> DocumentMark {
        DocumentMark {
            status,
            task_id: TaskId::new(7),
            corrections,
            updated_at: t0(),
        }
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            SidecarMarker::sidecar_path(Path::new("reports/AAPL.json")),
            PathBuf::from("reports/AAPL.llm.json")
        );
        assert_eq!(
            SidecarMarker::sidecar_path(Path::new("reports/AAPL")),
            PathBuf::from("reports/AAPL.llm.json")
        );
    }

    #[tokio::test]
    async fn test_sidecar_written() {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("AAPL.json");

        SidecarMarker
            .mark(&document, &mark(TaskStatus::Flagged, 3))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("AAPL.llm.json")).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["status"], "flagged");
        assert_eq!(value["task_id"], 7);
        assert_eq!(value["corrections"], 3);
        assert!(!dir.path().join("AAPL.llm.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_sidecar_merge_keeps_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("AAPL.json");
        std::fs::write(
            dir.path().join("AAPL.llm.json"),
            r#"{"reviewer": "desk-2", "status": "flagged"}"#,
        )
        .unwrap();

        SidecarMarker
            .mark(&document, &mark(TaskStatus::Complete, 0))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("AAPL.llm.json")).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["status"], "complete");
        assert_eq!(value["reviewer"], "desk-2");
    }

    #[tokio::test]
    async fn test_non_object_sidecar_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("AAPL.json");
        std::fs::write(dir.path().join("AAPL.llm.json"), "[1, 2, 3]").unwrap();

        SidecarMarker
            .mark(&document, &mark(TaskStatus::Complete, 1))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("AAPL.llm.json")).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["corrections"], 1);
    }

    #[tokio::test]
    async fn test_missing_directory_is_marker_error() {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("missing").join("AAPL.json");
        let err = SidecarMarker
            .mark(&document, &mark(TaskStatus::Complete, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Marker { .. }));
    }
}
