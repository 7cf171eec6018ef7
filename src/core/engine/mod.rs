// src/core/engine/mod.rs

//! Supervision of the external scanning engine.
//!
//! At most one engine is alive at a time. `EngineProcessManager` hands out an
//! `EngineHandle` per successful launch; the handle holds the manager's single
//! live lease until it is terminated (or dropped), so a second launch while a
//! handle is alive is refused.

pub mod command;
pub mod process;

use crate::config::EngineSettings;
use crate::core::api::ControlApi;
use crate::core::errors::{EngineAttemptError, EngineLaunchError};
use crate::core::provisioner::ProvisionedProject;
use crate::core::retry::RetryPolicy;
use crate::logging::file_timestamp;
use chrono::{DateTime, Utc};
use process::{EngineProcess, EngineSpawner, ProcessExit};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// How long to wait for exit after a forced kill.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Bytes of the startup log echoed when a launch attempt fails.
const STARTUP_LOG_TAIL: usize = 2000;

/// Result of the readiness handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
    /// The process died before the control API answered.
    Exited(ProcessExit),
}

/// Exclusive claim on the single engine slot; released on drop.
#[derive(Debug)]
struct LiveLease(Arc<AtomicBool>);

impl LiveLease {
    fn acquire(slot: &Arc<AtomicBool>) -> Option<Self> {
        slot.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(Arc::clone(slot)))
    }
}

impl Drop for LiveLease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One running engine bound to one provisioned project.
pub struct EngineHandle {
    process: Box<dyn EngineProcess>,
    pid: Option<u32>,
    project: PathBuf,
    startup_log: PathBuf,
    launched_at: DateTime<Utc>,
    attempt: u32,
    lease: Option<LiveLease>,
}

impl EngineHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    pub fn startup_log(&self) -> &Path {
        &self.startup_log
    }

    pub fn launched_at(&self) -> DateTime<Utc> {
        self.launched_at
    }

    /// Launch attempt that produced this handle (1-based).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_terminated(&self) -> bool {
        self.lease.is_none()
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("pid", &self.pid)
            .field("project", &self.project)
            .field("attempt", &self.attempt)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        // Abandoned without terminate (panic or cancellation): never leave the engine behind.
        if self.lease.is_some() {
            warn!(pid = ?self.pid, "Engine handle dropped while alive, killing process.");
            if let Err(e) = self.process.force_kill() {
                error!(pid = ?self.pid, error = %e, "Could not kill abandoned engine.");
            }
        }
    }
}

/// Launches, health-checks and terminates the engine.
pub struct EngineProcessManager {
    spawner: Arc<dyn EngineSpawner>,
    api: Arc<dyn ControlApi>,
    settings: EngineSettings,
    launch_retry: RetryPolicy,
    logs_dir: PathBuf,
    live: Arc<AtomicBool>,
}

impl EngineProcessManager {
    pub fn new(
        spawner: Arc<dyn EngineSpawner>,
        api: Arc<dyn ControlApi>,
        settings: EngineSettings,
        launch_retry: RetryPolicy,
        logs_dir: PathBuf,
    ) -> Self {
        Self {
            spawner,
            api,
            settings,
            launch_retry,
            logs_dir,
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a handle from this manager is currently alive.
    pub fn has_live_engine(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Starts the engine for `project` and waits until its control API answers.
    ///
    /// Attempts that fail to spawn, exit early or never become reachable are
    /// torn down and retried according to the launch retry policy.
    pub async fn launch(&self, project: &ProvisionedProject) -> Result<EngineHandle, EngineLaunchError> {
        if self.has_live_engine() {
            return Err(EngineLaunchError::AlreadyRunning { pid: None });
        }
        self.launch_retry
            .run("engine launch", |attempt| self.launch_attempt(project, attempt))
            .await
            .map_err(|e| EngineLaunchError::Exhausted { attempts: e.attempts, last: e.last })
    }

    async fn launch_attempt(
        &self,
        project: &ProvisionedProject,
        attempt: u32,
    ) -> Result<EngineHandle, EngineAttemptError> {
        let lease = LiveLease::acquire(&self.live).ok_or(EngineAttemptError::AlreadyRunning)?;
        let startup_log = self
            .logs_dir
            .join(format!("engine_startup_{}_{}.log", project.target().slug(), file_timestamp()));

        info!(
            target = %project.target(),
            project = %project.path().display(),
            attempt,
            "Starting engine."
        );
        let process = self.spawner.spawn(project.path(), &startup_log)?;
        let pid = process.id();
        let mut handle = EngineHandle {
            process,
            pid,
            project: project.path().to_path_buf(),
            startup_log,
            launched_at: Utc::now(),
            attempt,
            lease: Some(lease),
        };

        let readiness_timeout = self.settings.readiness_timeout;
        let failure = match self.await_ready(&mut handle, readiness_timeout).await {
            Readiness::Ready => {
                info!(pid = ?pid, "Engine control API is responding.");
                if !self.settings.settle_delay.is_zero() {
                    info!(delay = ?self.settings.settle_delay, "Waiting for the project to finish loading.");
                    sleep(self.settings.settle_delay).await;
                }
                return Ok(handle);
            }
            Readiness::TimedOut => EngineAttemptError::NotReady(readiness_timeout),
            Readiness::Exited(exit) => EngineAttemptError::Exited { code: exit.code },
        };

        error!(pid = ?pid, error = %failure, "Engine did not become ready.");
        if let Some(tail) = read_tail(&handle.startup_log, STARTUP_LOG_TAIL).await {
            error!(log = %handle.startup_log.display(), "Engine startup output:\n{}", tail);
        }
        self.terminate(&mut handle).await;
        Err(failure)
    }

    /// Polls the control endpoint until it answers or `timeout` elapses.
    ///
    /// Readiness is a pure reachability handshake; it says nothing about scans.
    pub async fn await_ready(&self, handle: &mut EngineHandle, timeout: Duration) -> Readiness {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            if let Some(exit) = handle.process.exited() {
                return Readiness::Exited(exit);
            }
            match self.api.ping().await {
                Ok(()) => return Readiness::Ready,
                Err(e) => debug!(
                    elapsed = started.elapsed().as_secs(),
                    timeout = timeout.as_secs(),
                    error = %e,
                    "Waiting for engine API."
                ),
            }
            let now = Instant::now();
            if now >= deadline {
                return Readiness::TimedOut;
            }
            sleep(self.settings.readiness_poll_interval.min(deadline - now)).await;
        }
    }

    /// Stops the engine: graceful signal, then a forced kill after the grace period.
    ///
    /// Idempotent and infallible: a second call, or a call on a process that is
    /// already gone, only logs.
    pub async fn terminate(&self, handle: &mut EngineHandle) {
        let Some(lease) = handle.lease.take() else {
            debug!(pid = ?handle.pid, "Engine already terminated.");
            return;
        };

        if let Some(exit) = handle.process.exited() {
            info!(pid = ?handle.pid, code = ?exit.code, "Engine had already exited.");
            drop(lease);
            return;
        }

        info!(pid = ?handle.pid, "Stopping engine.");
        if let Err(e) = handle.process.signal_shutdown() {
            warn!(pid = ?handle.pid, error = %e, "Graceful shutdown signal failed.");
        }
        if !handle.process.wait_exit(self.settings.terminate_grace).await {
            warn!(
                pid = ?handle.pid,
                grace = ?self.settings.terminate_grace,
                "Engine ignored shutdown request, killing it."
            );
            if let Err(e) = handle.process.force_kill() {
                warn!(pid = ?handle.pid, error = %e, "Forced kill failed.");
            }
            if !handle.process.wait_exit(KILL_WAIT).await {
                error!(pid = ?handle.pid, "Engine still running after forced kill.");
            }
        }
        info!(
            pid = ?handle.pid,
            uptime_secs = (Utc::now() - handle.launched_at()).num_seconds(),
            "Engine stopped."
        );
        drop(lease);
    }
}

/// Last `max_bytes` of a log file, if it exists and is not empty.
async fn read_tail(path: &Path, max_bytes: usize) -> Option<String> {
    let bytes = tokio::fs::read(path).await.ok()?;
    if bytes.is_empty() {
        return None;
    }
    let start = bytes.len().saturating_sub(max_bytes);
    Some(String::from_utf8_lossy(&bytes[start..]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_exclusive_and_released_on_drop() {
        let slot = Arc::new(AtomicBool::new(false));
        let first = LiveLease::acquire(&slot).unwrap();
        assert!(LiveLease::acquire(&slot).is_none());
        drop(first);
        assert!(LiveLease::acquire(&slot).is_some());
    }

    #[tokio::test]
    async fn tail_keeps_the_end_of_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("startup.log");
        std::fs::write(&path, format!("{}END", "x".repeat(5000))).unwrap();

        let tail = read_tail(&path, 10).await.unwrap();
        assert_eq!(tail, "xxxxxxxEND");
        assert!(read_tail(&dir.path().join("missing.log"), 10).await.is_none());
    }
}
