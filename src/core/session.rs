// src/core/session.rs

//! The per-target scan-session state machine.
//!
//! ```text
//! Pending -> Created -> Running <-> Paused -> { Completed, Aborted, Failed }
//! ```
//!
//! `ScanState::apply` is a pure function of the current state, one event, the
//! current instant and the policy limits. It returns the next state plus the
//! single action the controller must perform (resume the task or export). All
//! I/O lives in `ScanController`, so pause accounting and abort decisions can
//! be tested without an engine.

use crate::core::errors::ScanPollError;
use crate::core::models::{AbortReason, Completeness, ScanStatus, SessionPhase, Target, TaskId};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Limits that turn observations into terminal decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PausePolicy {
    /// Longest contiguous pause tolerated before the session is aborted.
    pub pause_timeout: Duration,
    /// Consecutive failed polls tolerated before the session fails.
    pub max_poll_failures: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Pending,
    Created {
        task: TaskId,
    },
    Running {
        task: TaskId,
    },
    Paused {
        task: TaskId,
        /// Start of the current contiguous pause segment.
        since: Instant,
        /// Resume requests issued during this segment.
        resume_requests: u32,
    },
    Completed {
        task: TaskId,
    },
    Aborted {
        task: TaskId,
        reason: AbortReason,
    },
    Failed {
        task: Option<TaskId>,
        reason: String,
    },
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Created(TaskId),
    CreationFailed(String),
    Polled(ScanStatus),
    PollFailed(ScanPollError),
    ResumeAccepted,
    ResumeRejected(String),
    DeadlineExceeded,
}

/// What the controller has to do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Resume,
    Export(Completeness),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: ScanState,
    pub action: Action,
}

impl Transition {
    fn stay(state: ScanState) -> Self {
        Self { state, action: Action::None }
    }

    fn to(state: ScanState, action: Action) -> Self {
        Self { state, action }
    }
}

impl ScanState {
    pub fn task(&self) -> Option<&TaskId> {
        match self {
            ScanState::Pending => None,
            ScanState::Created { task }
            | ScanState::Running { task }
            | ScanState::Paused { task, .. }
            | ScanState::Completed { task }
            | ScanState::Aborted { task, .. } => Some(task),
            ScanState::Failed { task, .. } => task.as_ref(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanState::Completed { .. } | ScanState::Aborted { .. } | ScanState::Failed { .. }
        )
    }

    pub fn phase(&self) -> SessionPhase {
        match self {
            ScanState::Pending => SessionPhase::Pending,
            ScanState::Created { .. } => SessionPhase::Created,
            ScanState::Running { .. } => SessionPhase::Running,
            ScanState::Paused { .. } => SessionPhase::Paused,
            ScanState::Completed { .. } => SessionPhase::Completed,
            ScanState::Aborted { .. } => SessionPhase::Aborted,
            ScanState::Failed { .. } => SessionPhase::Failed,
        }
    }

    pub fn label(&self) -> &'static str {
        self.phase().into()
    }

    /// Length of the current pause segment, if paused.
    pub fn paused_for(&self, now: Instant) -> Option<Duration> {
        match self {
            ScanState::Paused { since, .. } => Some(now.saturating_duration_since(*since)),
            _ => None,
        }
    }

    /// Computes the next state.
    ///
    /// Rules beyond the plain diagram:
    /// * a finished poll wins over everything, including an ongoing pause;
    /// * entering `Paused` always asks for a resume on the same poll;
    /// * a pause segment ends only when a poll shows the scan active again,
    ///   an acknowledged resume request alone does not reset the timer;
    /// * once a segment exceeds the pause timeout no further resume is requested.
    pub fn apply(self, event: ScanEvent, now: Instant, policy: &PausePolicy) -> Transition {
        if self.is_terminal() {
            return Transition::stay(self);
        }

        match (self, event) {
            (ScanState::Pending, ScanEvent::Created(task)) => Transition::stay(ScanState::Created { task }),
            (ScanState::Pending, ScanEvent::CreationFailed(reason)) => {
                Transition::stay(ScanState::Failed { task: None, reason })
            }
            (ScanState::Pending, ScanEvent::DeadlineExceeded) => Transition::stay(ScanState::Failed {
                task: None,
                reason: "scan deadline exceeded before creation".to_string(),
            }),
            (state @ ScanState::Pending, _) => Transition::stay(state),

            (state, ScanEvent::Polled(status)) => apply_poll(state, status, now, policy),

            (state, ScanEvent::PollFailed(failure)) => {
                if let Some(paused) = state.paused_for(now) {
                    if paused > policy.pause_timeout {
                        return abort(state, AbortReason::PauseTimeout);
                    }
                }
                if failure.failures >= policy.max_poll_failures {
                    let task = state.task().cloned();
                    return Transition::to(
                        ScanState::Failed { task, reason: failure.to_string() },
                        Action::Export(Completeness::Incomplete),
                    );
                }
                Transition::stay(state)
            }

            (
                ScanState::Paused { task, since, resume_requests },
                ScanEvent::ResumeAccepted | ScanEvent::ResumeRejected(_),
            ) => Transition::stay(ScanState::Paused {
                task,
                since,
                resume_requests: resume_requests + 1,
            }),

            (state, ScanEvent::DeadlineExceeded) => abort(state, AbortReason::ScanDeadline),

            (state, _) => Transition::stay(state),
        }
    }
}

fn abort(state: ScanState, reason: AbortReason) -> Transition {
    match state.task().cloned() {
        Some(task) => Transition::to(
            ScanState::Aborted { task, reason },
            Action::Export(Completeness::Incomplete),
        ),
        None => Transition::stay(ScanState::Failed { task: None, reason: reason.to_string() }),
    }
}

fn apply_poll(state: ScanState, status: ScanStatus, now: Instant, policy: &PausePolicy) -> Transition {
    let Some(task) = state.task().cloned() else {
        return Transition::stay(state);
    };

    if status.is_finished() {
        return Transition::to(ScanState::Completed { task }, Action::Export(Completeness::Complete));
    }
    if status.is_failed() {
        return Transition::to(
            ScanState::Failed { task: Some(task), reason: "engine reported scan failure".to_string() },
            Action::Export(Completeness::Incomplete),
        );
    }
    if status.is_paused() {
        return match state {
            ScanState::Paused { since, resume_requests, .. } => {
                if now.saturating_duration_since(since) > policy.pause_timeout {
                    abort(ScanState::Paused { task, since, resume_requests }, AbortReason::PauseTimeout)
                } else {
                    Transition::to(ScanState::Paused { task, since, resume_requests }, Action::Resume)
                }
            }
            _ => Transition::to(
                ScanState::Paused { task, since: now, resume_requests: 0 },
                Action::Resume,
            ),
        };
    }
    Transition::stay(ScanState::Running { task })
}

/// One target's scan attempt, owned by the controller until it is exported.
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub target: Target,
    state: ScanState,
    /// Sum of all completed pause segments.
    pub paused_total: Duration,
    pub resume_attempts: u32,
    pub creation_attempts: u32,
    pub launch_attempts: u32,
    /// Consecutive failed polls; reset by every successful poll.
    pub poll_failures: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanSession {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            state: ScanState::Pending,
            paused_total: Duration::ZERO,
            resume_attempts: 0,
            creation_attempts: 0,
            launch_attempts: 0,
            poll_failures: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn task(&self) -> Option<&TaskId> {
        self.state.task()
    }

    /// Feeds one event through the state machine and updates the bookkeeping.
    pub fn apply(&mut self, event: ScanEvent, now: Instant, policy: &PausePolicy) -> Action {
        if matches!(event, ScanEvent::ResumeAccepted | ScanEvent::ResumeRejected(_)) {
            self.resume_attempts += 1;
        }
        let pause_started = match &self.state {
            ScanState::Paused { since, .. } => Some(*since),
            _ => None,
        };
        let previous = self.state.label();

        let current = std::mem::replace(&mut self.state, ScanState::Pending);
        let Transition { state, action } = current.apply(event, now, policy);

        if let Some(since) = pause_started {
            if !matches!(state, ScanState::Paused { .. }) {
                let segment = now.saturating_duration_since(since);
                self.paused_total += segment;
                if !state.is_terminal() {
                    info!(
                        target = %self.target,
                        paused_secs = segment.as_secs(),
                        "Scan resumed, pause timer reset."
                    );
                }
            }
        }
        if state.label() != previous {
            debug!(target = %self.target, from = previous, to = state.label(), "Session state changed.");
        }
        if state.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        self.state = state;
        action
    }

    /// Paused time including a segment that is still open.
    pub fn paused_time(&self, now: Instant) -> Duration {
        self.paused_total + self.state.paused_for(now).unwrap_or_default()
    }

    /// Which artifact, if any, the terminal state calls for.
    pub fn export_plan(&self) -> Option<Completeness> {
        match &self.state {
            ScanState::Completed { .. } => Some(Completeness::Complete),
            ScanState::Aborted { .. } => Some(Completeness::Incomplete),
            ScanState::Failed { task: Some(_), .. } => Some(Completeness::Incomplete),
            _ => None,
        }
    }

    /// Human-readable reason for non-complete terminal states.
    pub fn terminal_reason(&self) -> Option<String> {
        match &self.state {
            ScanState::Aborted { reason, .. } => Some(reason.to_string()),
            ScanState::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::EngineScanState;

    const POLICY: PausePolicy = PausePolicy {
        pause_timeout: Duration::from_secs(60),
        max_poll_failures: 3,
    };

    fn status(state: EngineScanState) -> ScanStatus {
        ScanStatus { state, paused_flag: false, progress: None, issue_count: 0 }
    }

    fn task() -> TaskId {
        TaskId::new("7").unwrap()
    }

    fn polled(state: EngineScanState) -> ScanEvent {
        ScanEvent::Polled(status(state))
    }

    fn poll_failed(failures: u32, last: &str) -> ScanEvent {
        ScanEvent::PollFailed(ScanPollError { failures, last: last.to_string() })
    }

    fn created_session(start: Instant) -> ScanSession {
        let mut session = ScanSession::new(Target::parse("a.test").unwrap());
        session.apply(ScanEvent::Created(task()), start, &POLICY);
        session
    }

    #[test]
    fn creation_moves_pending_to_created() {
        let t = ScanState::Pending.apply(ScanEvent::Created(task()), Instant::now(), &POLICY);
        assert_eq!(t.state, ScanState::Created { task: task() });
        assert_eq!(t.action, Action::None);
    }

    #[test]
    fn creation_failure_fails_without_export() {
        let mut session = ScanSession::new(Target::parse("a.test").unwrap());
        let action = session.apply(ScanEvent::CreationFailed("500".into()), Instant::now(), &POLICY);
        assert_eq!(action, Action::None);
        assert_eq!(session.state().label(), "failed");
        assert_eq!(session.export_plan(), None);
    }

    #[test]
    fn first_active_poll_confirms_running() {
        let now = Instant::now();
        let t = ScanState::Created { task: task() }.apply(polled(EngineScanState::Crawling), now, &POLICY);
        assert_eq!(t.state, ScanState::Running { task: task() });
    }

    #[test]
    fn clean_scan_completes_with_full_export() {
        let start = Instant::now();
        let mut session = created_session(start);
        session.apply(polled(EngineScanState::Auditing), start, &POLICY);
        let action = session.apply(polled(EngineScanState::Succeeded), start + Duration::from_secs(30), &POLICY);

        assert_eq!(action, Action::Export(Completeness::Complete));
        assert_eq!(session.export_plan(), Some(Completeness::Complete));
        assert!(session.finished_at.is_some());
    }

    #[test]
    fn entering_pause_requests_resume() {
        let now = Instant::now();
        let t = ScanState::Running { task: task() }.apply(polled(EngineScanState::Paused), now, &POLICY);
        assert_eq!(t.action, Action::Resume);
        assert!(matches!(t.state, ScanState::Paused { since, resume_requests: 0, .. } if since == now));
    }

    #[test]
    fn finished_wins_over_pause() {
        let start = Instant::now();
        let paused = ScanState::Paused { task: task(), since: start, resume_requests: 4 };
        let t = paused.apply(polled(EngineScanState::Succeeded), start + Duration::from_secs(600), &POLICY);
        assert_eq!(t.state, ScanState::Completed { task: task() });
        assert_eq!(t.action, Action::Export(Completeness::Complete));
    }

    #[test]
    fn long_pause_aborts_after_resume_attempts() {
        let start = Instant::now();
        let mut session = created_session(start);
        session.apply(polled(EngineScanState::Running), start, &POLICY);

        let mut now = start + Duration::from_secs(5);
        let mut action = session.apply(polled(EngineScanState::Paused), now, &POLICY);
        while action == Action::Resume {
            session.apply(ScanEvent::ResumeAccepted, now, &POLICY);
            now += Duration::from_secs(15);
            action = session.apply(polled(EngineScanState::Paused), now, &POLICY);
        }

        assert_eq!(action, Action::Export(Completeness::Incomplete));
        assert!(matches!(
            session.state(),
            ScanState::Aborted { reason: AbortReason::PauseTimeout, .. }
        ));
        assert!(session.resume_attempts >= 1);
        assert!(now - start > Duration::from_secs(65));
        assert_eq!(session.terminal_reason().as_deref(), Some("pause_timeout_exceeded"));
    }

    #[test]
    fn pause_exactly_at_timeout_is_still_tolerated() {
        let start = Instant::now();
        let paused = ScanState::Paused { task: task(), since: start, resume_requests: 1 };
        let t = paused.apply(polled(EngineScanState::Paused), start + POLICY.pause_timeout, &POLICY);
        assert_eq!(t.action, Action::Resume);
    }

    #[test]
    fn confirmed_resume_resets_pause_timer() {
        let start = Instant::now();
        let mut session = created_session(start);

        // 40s pause, recovered, then another 40s pause: 80s in total but no single
        // segment above the 60s timeout.
        session.apply(polled(EngineScanState::Paused), start, &POLICY);
        session.apply(ScanEvent::ResumeAccepted, start, &POLICY);
        session.apply(polled(EngineScanState::Paused), start + Duration::from_secs(40), &POLICY);
        session.apply(polled(EngineScanState::Auditing), start + Duration::from_secs(41), &POLICY);
        assert_eq!(session.state().label(), "running");

        let second = start + Duration::from_secs(50);
        session.apply(polled(EngineScanState::Paused), second, &POLICY);
        let action = session.apply(polled(EngineScanState::Paused), second + Duration::from_secs(40), &POLICY);
        assert_eq!(action, Action::Resume);
        assert_eq!(session.state().paused_for(second + Duration::from_secs(40)), Some(Duration::from_secs(40)));
        // Closed segment plus the one still open.
        assert_eq!(session.paused_time(second + Duration::from_secs(40)), Duration::from_secs(41 + 40));

        let action = session.apply(polled(EngineScanState::Succeeded), second + Duration::from_secs(45), &POLICY);
        assert_eq!(action, Action::Export(Completeness::Complete));
        assert_eq!(session.paused_total, Duration::from_secs(41 + 45));
    }

    #[test]
    fn acknowledged_resume_alone_keeps_the_segment_open() {
        let start = Instant::now();
        let mut session = created_session(start);
        session.apply(polled(EngineScanState::Paused), start, &POLICY);
        session.apply(ScanEvent::ResumeAccepted, start, &POLICY);

        assert!(matches!(session.state(), ScanState::Paused { since, resume_requests: 1, .. } if *since == start));
    }

    #[test]
    fn resume_rejection_is_retried_on_next_poll() {
        let start = Instant::now();
        let mut session = created_session(start);
        session.apply(polled(EngineScanState::Paused), start, &POLICY);
        session.apply(ScanEvent::ResumeRejected("503".into()), start, &POLICY);

        let action = session.apply(polled(EngineScanState::Paused), start + Duration::from_secs(15), &POLICY);
        assert_eq!(action, Action::Resume);
        assert_eq!(session.resume_attempts, 1);
    }

    #[test]
    fn engine_failure_fails_with_partial_export() {
        let t = ScanState::Running { task: task() }.apply(polled(EngineScanState::Failed), Instant::now(), &POLICY);
        assert!(matches!(t.state, ScanState::Failed { task: Some(_), .. }));
        assert_eq!(t.action, Action::Export(Completeness::Incomplete));
    }

    #[test]
    fn poll_failures_escalate_only_at_the_limit() {
        let now = Instant::now();
        let t = ScanState::Running { task: task() }.apply(poll_failed(2, "timeout"), now, &POLICY);
        assert_eq!(t.state, ScanState::Running { task: task() });

        let t = t.state.apply(poll_failed(3, "timeout"), now, &POLICY);
        assert_eq!(t.action, Action::Export(Completeness::Incomplete));
        match t.state {
            ScanState::Failed { task: Some(_), reason } => {
                assert_eq!(reason, "status polling failed 3 time(s) in a row: timeout");
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn unreachable_engine_during_long_pause_still_aborts() {
        let start = Instant::now();
        let paused = ScanState::Paused { task: task(), since: start, resume_requests: 2 };
        let t = paused.apply(
            poll_failed(1, "refused"),
            start + Duration::from_secs(61),
            &POLICY,
        );
        assert!(matches!(t.state, ScanState::Aborted { reason: AbortReason::PauseTimeout, .. }));
    }

    #[test]
    fn deadline_aborts_a_running_scan() {
        let t = ScanState::Running { task: task() }.apply(ScanEvent::DeadlineExceeded, Instant::now(), &POLICY);
        assert!(matches!(t.state, ScanState::Aborted { reason: AbortReason::ScanDeadline, .. }));
        assert_eq!(t.action, Action::Export(Completeness::Incomplete));
    }

    #[test]
    fn phase_labels_are_lowercase() {
        assert_eq!(ScanState::Pending.label(), "pending");
        assert_eq!(ScanState::Running { task: task() }.phase(), SessionPhase::Running);
        let aborted = ScanState::Aborted { task: task(), reason: AbortReason::PauseTimeout };
        assert_eq!(aborted.phase(), SessionPhase::Aborted);
        assert_eq!(aborted.label(), "aborted");
    }

    #[test]
    fn terminal_states_ignore_further_events() {
        let done = ScanState::Completed { task: task() };
        let t = done.clone().apply(polled(EngineScanState::Paused), Instant::now(), &POLICY);
        assert_eq!(t.state, done);
        assert_eq!(t.action, Action::None);
    }
}
