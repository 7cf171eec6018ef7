// src/core/errors.rs

//! Error taxonomy of the orchestration engine.
//!
//! Each component returns its own error type and the `TargetRunner` converts
//! all of them into a `Failed` entry of the run summary. Pause-timeout aborts
//! are deliberately absent: they are modeled as `AbortReason::PauseTimeout`.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures while copying the template project for one target.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("template project not found: {0}")]
    TemplateMissing(PathBuf),

    #[error("template project {path} is unreadable: {source}")]
    TemplateUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not create project copy at {path}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why a single launch attempt did not yield a ready engine.
#[derive(Debug, Error)]
pub enum EngineAttemptError {
    #[error("another engine instance is still alive")]
    AlreadyRunning,

    #[error("failed to spawn engine process: {0}")]
    Spawn(#[from] io::Error),

    #[error("engine process exited during startup (code {code:?})")]
    Exited { code: Option<i32> },

    #[error("control API not reachable within {0:?}")]
    NotReady(Duration),
}

/// Launch failure after the retry policy gave up.
#[derive(Debug, Error)]
pub enum EngineLaunchError {
    #[error("an engine instance is already running (pid {pid:?})")]
    AlreadyRunning { pid: Option<u32> },

    #[error("engine failed to start after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: EngineAttemptError,
    },
}

/// A single control-API round trip that did not succeed.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("control API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("control API timed out after {0:?}")]
    Timeout(Duration),

    #[error("control API answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed control API response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
#[error("scan creation failed after {attempts} attempt(s): {last}")]
pub struct ScanCreationError {
    pub attempts: u32,
    #[source]
    pub last: ApiError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("status polling failed {failures} time(s) in a row: {last}")]
pub struct ScanPollError {
    pub failures: u32,
    pub last: String,
}

/// Failures while persisting a result artifact.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("session has no engine task to export")]
    NoTask,

    #[error("could not fetch findings: {0}")]
    Fetch(#[from] ApiError),

    #[error("could not serialize findings: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TargetListError {
    #[error("could not read target list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
