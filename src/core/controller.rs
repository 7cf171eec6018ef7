// src/core/controller.rs

use crate::config::ScanSettings;
use crate::core::api::ControlApi;
use crate::core::errors::{ScanCreationError, ScanPollError};
use crate::core::models::{Completeness, TaskId};
use crate::core::request::build_scan_request;
use crate::core::retry::RetryPolicy;
use crate::core::session::{Action, PausePolicy, ScanEvent, ScanSession, ScanState};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

/// Drives one scan session from creation to a terminal state.
///
/// All decisions are taken by `ScanState::apply`; this type only performs the
/// round trips the state machine asks for and feeds the answers back in.
pub struct ScanController {
    api: Arc<dyn ControlApi>,
    settings: ScanSettings,
    creation_retry: RetryPolicy,
    template: Option<Value>,
}

impl ScanController {
    pub fn new(
        api: Arc<dyn ControlApi>,
        settings: ScanSettings,
        creation_retry: RetryPolicy,
        template: Option<Value>,
    ) -> Self {
        Self { api, settings, creation_retry, template }
    }

    pub fn policy(&self) -> PausePolicy {
        PausePolicy {
            pause_timeout: self.settings.pause_timeout,
            max_poll_failures: self.settings.max_poll_failures,
        }
    }

    /// Creates the scan and polls it until the session is terminal.
    ///
    /// # Returns
    /// The export the terminal state calls for, or `None` when there is no
    /// task to export from (creation failed).
    pub async fn run(&self, session: &mut ScanSession) -> Option<Completeness> {
        let policy = self.policy();

        match self.create(session).await {
            Ok(task) => {
                info!(target = %session.target, task_id = %task, "Scan created.");
                session.apply(ScanEvent::Created(task), Instant::now(), &policy);
            }
            Err(e) => {
                error!(target = %session.target, error = %e, "Could not create scan.");
                session.apply(ScanEvent::CreationFailed(e.to_string()), Instant::now(), &policy);
                return None;
            }
        }

        self.poll_until_terminal(session, &policy).await;
        session.export_plan()
    }

    async fn create(&self, session: &mut ScanSession) -> Result<TaskId, ScanCreationError> {
        let request = build_scan_request(&session.target, self.template.as_ref());
        let mut attempts = 0;
        let result = self
            .creation_retry
            .run("scan creation", |attempt| {
                attempts = attempt;
                self.api.create_scan(&request)
            })
            .await;
        session.creation_attempts = attempts;
        result.map_err(|e| ScanCreationError { attempts: e.attempts, last: e.last })
    }

    async fn poll_until_terminal(&self, session: &mut ScanSession, policy: &PausePolicy) {
        let started = Instant::now();
        let deadline = started + self.settings.max_scan_duration;

        while !session.state().is_terminal() {
            let Some(task) = session.task().cloned() else {
                return;
            };

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    target = %session.target,
                    task_id = %task,
                    limit = ?self.settings.max_scan_duration,
                    "Scan exceeded its maximum duration, aborting."
                );
                session.apply(ScanEvent::DeadlineExceeded, now, policy);
                return;
            }

            let event = match self.api.scan_status(&task).await {
                Ok(status) => {
                    session.poll_failures = 0;
                    info!(
                        target = %session.target,
                        elapsed = started.elapsed().as_secs(),
                        state = %status.state,
                        progress = ?status.progress,
                        issues = status.issue_count,
                        "Scan status."
                    );
                    ScanEvent::Polled(status)
                }
                Err(e) => {
                    session.poll_failures += 1;
                    let failure = ScanPollError { failures: session.poll_failures, last: e.to_string() };
                    warn!(
                        target = %session.target,
                        max_failures = policy.max_poll_failures,
                        error = %failure,
                        "Status poll failed."
                    );
                    ScanEvent::PollFailed(failure)
                }
            };

            let now = Instant::now();
            let action = session.apply(event, now, policy);
            match action {
                Action::Resume => self.resume(session, policy).await,
                Action::Export(completeness) => self.log_terminal(session, completeness),
                Action::None => {}
            }

            if !session.state().is_terminal() {
                sleep(self.settings.poll_interval).await;
            }
        }
    }

    async fn resume(&self, session: &mut ScanSession, policy: &PausePolicy) {
        let Some(task) = session.task().cloned() else {
            return;
        };
        let now = Instant::now();
        let paused_for = session.state().paused_for(now).unwrap_or_default();
        info!(
            target = %session.target,
            task_id = %task,
            paused = %format!("{}s/{}s", paused_for.as_secs(), policy.pause_timeout.as_secs()),
            paused_total_secs = session.paused_time(now).as_secs(),
            attempt = session.resume_attempts + 1,
            "Scan is paused, requesting resume."
        );

        let event = match self.api.resume_scan(&task).await {
            Ok(()) => {
                info!(target = %session.target, "Resume request accepted.");
                ScanEvent::ResumeAccepted
            }
            Err(e) => {
                warn!(target = %session.target, error = %e, "Resume request failed, retrying on next poll.");
                ScanEvent::ResumeRejected(e.to_string())
            }
        };
        session.apply(event, Instant::now(), policy);
    }

    fn log_terminal(&self, session: &ScanSession, completeness: Completeness) {
        match session.state() {
            ScanState::Completed { task } => {
                info!(target = %session.target, task_id = %task, "Scan finished.");
            }
            ScanState::Aborted { task, reason } => warn!(
                target = %session.target,
                task_id = %task,
                reason = %reason,
                resume_attempts = session.resume_attempts,
                "Scan aborted, exporting partial findings."
            ),
            ScanState::Failed { reason, .. } => error!(
                target = %session.target,
                reason = %reason,
                export = %completeness,
                "Scan failed."
            ),
            _ => {}
        }
    }
}
