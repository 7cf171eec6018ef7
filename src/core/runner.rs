// src/core/runner.rs

use crate::config::Config;
use crate::core::api::ControlApi;
use crate::core::controller::ScanController;
use crate::core::engine::process::EngineSpawner;
use crate::core::engine::EngineProcessManager;
use crate::core::exporter::{to_pretty_json, ResultExporter};
use crate::core::models::{Outcome, RunResult, Summary, Target, TargetReport};
use crate::core::provisioner::{ProjectProvisioner, ProvisionedProject};
use crate::core::session::ScanSession;
use crate::logging::file_timestamp;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Processes the target list strictly one target after another.
///
/// Every target ends up with exactly one report, whatever happens inside its
/// attempt (including panics).
pub struct TargetRunner {
    provisioner: ProjectProvisioner,
    engine: EngineProcessManager,
    controller: ScanController,
    exporter: ResultExporter,
    target_attempts: u32,
    target_retry_delay: Duration,
    target_cooldown: Duration,
    keep_projects: bool,
}

impl TargetRunner {
    pub fn new(
        config: &Config,
        api: Arc<dyn ControlApi>,
        spawner: Arc<dyn EngineSpawner>,
        template: Option<Value>,
    ) -> Self {
        Self {
            provisioner: ProjectProvisioner::new(
                config.paths.template_project.clone(),
                config.paths.projects_dir.clone(),
            ),
            engine: EngineProcessManager::new(
                spawner,
                Arc::clone(&api),
                config.engine.clone(),
                config.launch_retry,
                config.paths.logs_dir.clone(),
            ),
            controller: ScanController::new(
                Arc::clone(&api),
                config.scan.clone(),
                config.creation_retry,
                template,
            ),
            exporter: ResultExporter::new(api, config.paths.output_dir.clone()),
            target_attempts: config.target_attempts.max(1),
            target_retry_delay: config.target_retry_delay,
            target_cooldown: config.target_cooldown,
            keep_projects: config.keep_projects,
        }
    }

    /// Removes project copies left over from earlier runs.
    pub async fn purge_stale_projects(&self) -> usize {
        let removed = self.provisioner.purge_stale().await;
        if removed > 0 {
            info!(removed, "Purged stale project copies.");
        }
        removed
    }

    /// Runs every target and returns the end-of-run summary.
    pub async fn run_all(&self, targets: &[Target]) -> Summary {
        let started_at = Utc::now();
        let total = targets.len();
        let mut reports = Vec::with_capacity(total);
        info!(total, "Starting scan run.");

        for (index, target) in targets.iter().enumerate() {
            info!("{}", "=".repeat(60));
            info!(target = %target, position = index + 1, total, "Processing target.");
            info!("{}", "=".repeat(60));

            let report = self.run_target(target).await;
            match report.outcome {
                Outcome::Complete => info!(target = %target, "Target complete."),
                Outcome::Incomplete => warn!(
                    target = %target,
                    reason = report.reason.as_deref().unwrap_or("unknown"),
                    "Target incomplete."
                ),
                Outcome::Failed => error!(
                    target = %target,
                    reason = report.reason.as_deref().unwrap_or("unknown"),
                    attempts = report.attempts,
                    "Target failed."
                ),
            }
            reports.push(report);

            if index + 1 < total && !self.target_cooldown.is_zero() {
                info!(cooldown = ?self.target_cooldown, "Cooling down before next target.");
                sleep(self.target_cooldown).await;
            }
        }

        let summary = Summary { started_at, finished_at: Utc::now(), reports };
        log_summary(&summary);
        self.write_summary(&summary).await;
        summary
    }

    /// Runs one target, retrying whole attempts that failed without an artifact.
    pub async fn run_target(&self, target: &Target) -> TargetReport {
        let mut attempt = 1;
        loop {
            let mut report = self.guarded_attempt(target).await;
            report.attempts = attempt;
            if !report.is_retryable() || attempt >= self.target_attempts {
                return report;
            }
            warn!(
                target = %target,
                attempt,
                max_attempts = self.target_attempts,
                retry_in = ?self.target_retry_delay,
                reason = report.reason.as_deref().unwrap_or("unknown"),
                "Target failed without results, retrying."
            );
            sleep(self.target_retry_delay).await;
            attempt += 1;
        }
    }

    /// provision -> (launch -> scan -> export -> terminate) -> release
    ///
    /// The project is released on every path out of the attempt, including a
    /// panic inside the scan phase.
    async fn guarded_attempt(&self, target: &Target) -> TargetReport {
        let started_at = Utc::now();

        let project = match AssertUnwindSafe(self.provisioner.provision(target)).catch_unwind().await {
            Ok(Ok(project)) => project,
            Ok(Err(e)) => {
                error!(target = %target, error = %e, "Could not provision project.");
                return TargetReport::failed(target, started_at, e.to_string());
            }
            Err(panic) => return panicked(target, started_at, panic),
        };

        let scanned = AssertUnwindSafe(self.scan_project(&project)).catch_unwind().await;
        project.release(self.keep_projects).await;

        match scanned {
            Ok(report) => report,
            Err(panic) => panicked(target, started_at, panic),
        }
    }

    async fn scan_project(&self, project: &ProvisionedProject) -> TargetReport {
        let started_at = Utc::now();
        let target = project.target();

        let mut handle = match self.engine.launch(project).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(target = %target, error = %e, "Engine launch failed.");
                return TargetReport::failed(target, started_at, e.to_string());
            }
        };

        let mut session = ScanSession::new(target.clone());
        session.launch_attempts = handle.attempt();

        let plan = self.controller.run(&mut session).await;
        let (result, export_error) = match plan {
            Some(completeness) => match self.exporter.export(&session, completeness).await {
                Ok(result) => (Some(result), None),
                Err(e) => {
                    error!(target = %target, error = %e, "Export failed.");
                    (None, Some(format!("export failed: {}", e)))
                }
            },
            None => (None, None),
        };

        self.engine.terminate(&mut handle).await;

        report_for(&session, result, export_error)
    }

    async fn write_summary(&self, summary: &Summary) -> Option<PathBuf> {
        let path = self
            .exporter
            .output_dir()
            .join(format!("run_summary_{}.json", file_timestamp()));
        let document = json!({
            "started_at": summary.started_at,
            "finished_at": summary.finished_at,
            "total": summary.total(),
            "complete": summary.complete(),
            "incomplete": summary.incomplete(),
            "failed": summary.failed(),
            "targets": summary.reports,
        });
        let bytes = match to_pretty_json(&document) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Could not serialize run summary.");
                return None;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(self.exporter.output_dir()).await {
            warn!(error = %e, "Could not create output directory for run summary.");
            return None;
        }
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => {
                info!(path = %path.display(), "Run summary written.");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not write run summary.");
                None
            }
        }
    }
}

fn panicked(target: &Target, started_at: DateTime<Utc>, panic: Box<dyn Any + Send>) -> TargetReport {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(target = %target, panic = %message, "Target attempt panicked.");
    TargetReport::failed(target, started_at, format!("internal error: {}", message))
}

fn report_for(session: &ScanSession, result: Option<RunResult>, export_error: Option<String>) -> TargetReport {
    let outcome = match &result {
        Some(result) if result.completeness.is_complete() => Outcome::Complete,
        Some(_) => Outcome::Incomplete,
        None => Outcome::Failed,
    };
    TargetReport {
        target: session.target.clone(),
        outcome,
        final_state: session.state().phase(),
        reason: export_error.or_else(|| session.terminal_reason()),
        task_id: session.task().cloned(),
        artifact: result.map(|r| r.artifact),
        attempts: 1,
        paused_seconds: session.paused_total.as_secs(),
        resume_attempts: session.resume_attempts,
        started_at: session.started_at,
        finished_at: session.finished_at.unwrap_or_else(Utc::now),
    }
}

fn log_summary(summary: &Summary) {
    info!("{}", "=".repeat(60));
    info!(
        total = summary.total(),
        complete = summary.complete(),
        incomplete = summary.incomplete(),
        failed = summary.failed(),
        duration_secs = (summary.finished_at - summary.started_at).num_seconds(),
        "Scan run finished."
    );
    for report in &summary.reports {
        match report.outcome {
            Outcome::Complete => info!(
                target = %report.target,
                artifact = ?report.artifact,
                "complete"
            ),
            Outcome::Incomplete => warn!(
                target = %report.target,
                reason = report.reason.as_deref().unwrap_or("unknown"),
                artifact = ?report.artifact,
                "incomplete"
            ),
            Outcome::Failed => error!(
                target = %report.target,
                reason = report.reason.as_deref().unwrap_or("unknown"),
                attempts = report.attempts,
                "failed"
            ),
        }
    }
    info!("{}", "=".repeat(60));
}
