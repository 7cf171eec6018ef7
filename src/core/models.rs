// src/core/models.rs

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

// --- Target Models ---

/// Scheme prepended to target entries that do not carry one.
pub const DEFAULT_SCHEME: &str = "https://";

/// Maximum number of characters a target contributes to a file name.
const SLUG_MAX_CHARS: usize = 50;

static RE_UNSAFE_FILENAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._\-]").unwrap());

/// One scan subject, always stored with an explicit `http://` or `https://` scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Normalizes a raw list entry and validates it as a URL.
    ///
    /// # Arguments
    /// * `raw` - A host or URL as written in the target list (e.g. "a.test").
    ///
    /// # Returns
    /// The normalized target, or the URL parse error for entries that are not valid URLs.
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        let trimmed = raw.trim();
        let normalized = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("{}{}", DEFAULT_SCHEME, trimmed)
        };
        let parsed = url::Url::parse(&normalized)?;
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(url::ParseError::EmptyHost);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A filesystem-safe identifier derived from the target, used in artifact,
    /// project and log names.
    pub fn slug(&self) -> String {
        let without_scheme = self
            .0
            .strip_prefix("https://")
            .or_else(|| self.0.strip_prefix("http://"))
            .unwrap_or(&self.0);
        let flattened = without_scheme.replace('/', "_");
        let safe = RE_UNSAFE_FILENAME.replace_all(&flattened, "_");
        safe.chars().take(SLUG_MAX_CHARS).collect()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the engine assigns to a created scan task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Accepts identifiers made of ASCII letters, digits, `-` and `_`.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then_some(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Engine Status Models ---

/// Overall scan state as reported by the engine's `scan_status` field.
#[derive(Debug, Clone, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EngineScanState {
    Queued,
    Crawling,
    Auditing,
    Running,
    Paused,
    Succeeded,
    Failed,
    #[strum(default)]
    Unknown(String),
}

/// One decoded status poll.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanStatus {
    pub state: EngineScanState,
    /// Set when the payload carries an explicit `paused: true` next to another state.
    pub paused_flag: bool,
    pub progress: Option<f64>,
    pub issue_count: usize,
}

impl ScanStatus {
    /// Decodes the engine's JSON status payload.
    ///
    /// Returns a description of the problem when the payload is not an object or
    /// has no `scan_status` string.
    pub fn from_payload(payload: &Value) -> Result<Self, String> {
        let object = payload
            .as_object()
            .ok_or_else(|| "status payload is not a JSON object".to_string())?;
        let raw_state = object
            .get("scan_status")
            .and_then(Value::as_str)
            .ok_or_else(|| "status payload has no scan_status field".to_string())?;
        // The `default` variant makes this parse infallible.
        let state = EngineScanState::from_str(raw_state)
            .unwrap_or_else(|_| EngineScanState::Unknown(raw_state.to_string()));

        let paused_flag = object.get("paused").and_then(Value::as_bool).unwrap_or(false);
        let progress = object
            .get("scan_metrics")
            .and_then(|m| m.get("crawl_and_audit_progress"))
            .and_then(Value::as_f64);

        Ok(Self {
            state,
            paused_flag,
            progress,
            issue_count: issue_count(payload),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.state == EngineScanState::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.state == EngineScanState::Failed
    }

    pub fn is_paused(&self) -> bool {
        self.state == EngineScanState::Paused || self.paused_flag
    }
}

/// Counts findings in a payload whose `issue_events` is either a list or a number.
pub fn issue_count(payload: &Value) -> usize {
    match payload.get("issue_events") {
        Some(Value::Array(events)) => events.len(),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
        _ => 0,
    }
}

// --- Outcome Models ---

/// Whether an exported artifact holds the findings of a finished scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Completeness {
    Complete,
    Incomplete,
}

impl Completeness {
    pub fn is_complete(self) -> bool {
        self == Completeness::Complete
    }
}

/// Policy reasons for aborting a session. These are expected outcomes, not engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
pub enum AbortReason {
    #[strum(serialize = "pause_timeout_exceeded")]
    #[serde(rename = "pause_timeout_exceeded")]
    PauseTimeout,
    #[strum(serialize = "scan_deadline_exceeded")]
    #[serde(rename = "scan_deadline_exceeded")]
    ScanDeadline,
}

/// The persisted result of one export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub target: Target,
    pub task_id: TaskId,
    pub completeness: Completeness,
    pub artifact: PathBuf,
    pub size_bytes: u64,
    pub issue_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exported_at: DateTime<Utc>,
}

/// Terminal classification of one target in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    Complete,
    Incomplete,
    Failed,
}

/// Where a scan session stands, as recorded in reports and artifact metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionPhase {
    Pending,
    Created,
    Running,
    Paused,
    Completed,
    Aborted,
    Failed,
}

/// Everything the summary knows about one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: Target,
    pub outcome: Outcome,
    pub final_state: SessionPhase,
    pub reason: Option<String>,
    pub task_id: Option<TaskId>,
    pub artifact: Option<PathBuf>,
    pub attempts: u32,
    pub paused_seconds: u64,
    pub resume_attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TargetReport {
    /// A failure that happened before any scan session existed.
    pub fn failed(target: &Target, started_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            target: target.clone(),
            outcome: Outcome::Failed,
            final_state: SessionPhase::Failed,
            reason: Some(reason.into()),
            task_id: None,
            artifact: None,
            attempts: 1,
            paused_seconds: 0,
            resume_attempts: 0,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Only failures without an artifact and without a policy abort are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.outcome == Outcome::Failed && self.final_state != SessionPhase::Aborted
    }
}

/// End-of-run aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reports: Vec<TargetReport>,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    pub fn complete(&self) -> usize {
        self.count(Outcome::Complete)
    }

    pub fn incomplete(&self) -> usize {
        self.count(Outcome::Incomplete)
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::Failed)
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.reports.iter().filter(|r| r.outcome == outcome).count()
    }
}
