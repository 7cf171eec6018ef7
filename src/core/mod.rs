// src/core/mod.rs

// The orchestration engine. Leaf modules first; `runner` ties them together:
// provision -> launch -> scan -> export -> terminate, one target at a time.

/// Targets, engine status payloads, outcomes and the run summary.
pub mod models;

/// Error types returned by every component.
pub mod errors;

/// Attempt limit plus backoff, shared by engine launch and scan creation.
pub mod retry;

/// Loading and normalizing the newline-delimited target list.
pub mod targets;

/// The scan-creation body and the optional scan template.
pub mod request;

/// The engine's REST control API (`ControlApi`) and its reqwest client.
pub mod api;

/// Disposable per-target copies of the template project.
pub mod provisioner;

/// Launching, health-checking and terminating the engine process.
pub mod engine;

/// The scan-session state machine and its pause accounting.
pub mod session;

/// Drives a session through the control API until it is terminal.
pub mod controller;

/// Writes complete and incomplete result artifacts.
pub mod exporter;

/// Sequential processing of the whole target list.
pub mod runner;
