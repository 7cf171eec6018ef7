// src/core/exporter.rs

use crate::core::api::ControlApi;
use crate::core::errors::ExportError;
use crate::core::models::{issue_count, Completeness, RunResult, Target};
use crate::core::session::{ScanSession, ScanState};
use crate::logging::file_timestamp;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Suffix that marks artifacts exported from aborted or failed sessions.
pub const INCOMPLETE_SUFFIX: &str = "_INCOMPLETE";

/// Builds the artifact file name for one export.
pub fn artifact_name(target: &Target, completeness: Completeness, timestamp: &str) -> String {
    let suffix = if completeness.is_complete() { "" } else { INCOMPLETE_SUFFIX };
    format!("scan_{}_{}{}.json", target.slug(), timestamp, suffix)
}

/// Fetches findings from the engine and persists them as one JSON artifact.
pub struct ResultExporter {
    api: Arc<dyn ControlApi>,
    output_dir: PathBuf,
}

impl ResultExporter {
    pub fn new(api: Arc<dyn ControlApi>, output_dir: PathBuf) -> Self {
        Self { api, output_dir }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Writes the artifact for a terminal session.
    ///
    /// The fetch is issued for incomplete sessions too, since the engine keeps
    /// partial findings for aborted scans.
    ///
    /// # Errors
    /// `NoTask` when the session never got a task, `Fetch` when the engine is
    /// unreachable, `Write` when the file cannot be created.
    pub async fn export(&self, session: &ScanSession, completeness: Completeness) -> Result<RunResult, ExportError> {
        let task = session.task().ok_or(ExportError::NoTask)?.clone();
        info!(target = %session.target, task_id = %task, completeness = %completeness, "Fetching findings.");

        let findings = self.api.fetch_findings(&task).await?;
        let issues = issue_count(&findings);
        let exported_at = Utc::now();
        let finished_at = session.finished_at.unwrap_or(exported_at);

        let (abort_reason, failure_reason) = match session.state() {
            ScanState::Aborted { reason, .. } => (Some(reason.to_string()), None),
            ScanState::Failed { reason, .. } => (None, Some(reason.clone())),
            _ => (None, None),
        };

        let mut document = match findings {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("findings".to_string(), other);
                map
            }
        };
        document.insert(
            "scan_metadata".to_string(),
            json!({
                "target": session.target,
                "task_id": task,
                "complete": completeness.is_complete(),
                "scan_status": session.state().label(),
                "abort_reason": abort_reason,
                "failure_reason": failure_reason,
                "started_at": session.started_at,
                "finished_at": finished_at,
                "exported_at": exported_at,
                "paused_seconds": session.paused_total.as_secs(),
                "resume_attempts": session.resume_attempts,
            }),
        );

        let bytes = to_pretty_json(&Value::Object(document))?;
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| ExportError::Write { path: self.output_dir.clone(), source })?;
        let path = self
            .output_dir
            .join(artifact_name(&session.target, completeness, &file_timestamp()));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| ExportError::Write { path: path.clone(), source })?;

        info!(
            artifact = %path.display(),
            size_kb = %format!("{:.1}", bytes.len() as f64 / 1024.0),
            issues,
            "Results exported."
        );

        Ok(RunResult {
            target: session.target.clone(),
            task_id: task,
            completeness,
            artifact: path,
            size_bytes: bytes.len() as u64,
            issue_count: issues,
            started_at: session.started_at,
            finished_at,
            exported_at,
        })
    }
}

/// Pretty JSON with a four-space indent.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
    value.serialize(&mut serializer)?;
    bytes.push(b'\n');
    Ok(bytes)
}
