// src/core/engine/process.rs

use super::command::{EngineCommand, IdleInhibitor};
use crate::config::{Config, EngineSettings};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How an engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

/// A running engine process, as seen by the supervisor.
#[async_trait]
pub trait EngineProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn exited(&mut self) -> Option<ProcessExit>;

    /// Asks the process (and anything it spawned) to shut down.
    fn signal_shutdown(&mut self) -> io::Result<()>;

    /// Kills the process (and anything it spawned) outright.
    fn force_kill(&mut self) -> io::Result<()>;

    /// Waits up to `within` for the process to exit. Returns whether it did.
    async fn wait_exit(&mut self, within: Duration) -> bool;
}

/// Starts engine processes bound to a project file.
pub trait EngineSpawner: Send + Sync {
    /// Spawns one engine process; its stdout and stderr go to `startup_log`.
    fn spawn(&self, project: &Path, startup_log: &Path) -> io::Result<Box<dyn EngineProcess>>;
}

/// Spawns the engine jar through `java`, optionally under an idle inhibitor.
#[derive(Debug, Clone)]
pub struct JavaSpawner {
    settings: EngineSettings,
    engine_config: Option<PathBuf>,
    inhibitor: Option<IdleInhibitor>,
}

impl JavaSpawner {
    pub fn new(config: &Config) -> Self {
        let inhibitor = if config.engine.inhibit_idle { IdleInhibitor::detect() } else { None };
        let engine_config = config.engine_config_file().map(Path::to_path_buf);
        if let Some(path) = &engine_config {
            info!(path = %path.display(), "Engine config file will be loaded.");
        }
        Self {
            settings: config.engine.clone(),
            engine_config,
            inhibitor,
        }
    }

    pub fn command_for(&self, project: &Path) -> EngineCommand {
        let command = EngineCommand::for_project(&self.settings, project, self.engine_config.as_deref());
        match &self.inhibitor {
            Some(inhibitor) => command.inhibited(inhibitor),
            None => command,
        }
    }
}

impl EngineSpawner for JavaSpawner {
    fn spawn(&self, project: &Path, startup_log: &Path) -> io::Result<Box<dyn EngineProcess>> {
        let command = self.command_for(project);
        let stdout = std::fs::File::create(startup_log)?;
        let stderr = stdout.try_clone()?;

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        #[cfg(unix)]
        process.process_group(0);

        debug!(command = %command, "Spawning engine.");
        let child = process.spawn()?;
        Ok(Box::new(ChildProcess::new(child)))
    }
}

/// `EngineProcess` backed by a tokio child in its own process group.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    pid: Option<u32>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self { child, pid }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Group already gone.
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) -> io::Result<()> {
    match pid {
        Some(pid) => signal_group(pid, libc::SIGKILL),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) -> io::Result<()> {
    Ok(())
}

#[async_trait]
impl EngineProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn exited(&mut self) -> Option<ProcessExit> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(ProcessExit { code: status.code() }),
            Ok(None) => None,
            Err(e) => {
                warn!(pid = ?self.pid, error = %e, "Could not query engine process state.");
                None
            }
        }
    }

    fn signal_shutdown(&mut self) -> io::Result<()> {
        match self.pid {
            #[cfg(unix)]
            Some(pid) => signal_group(pid, libc::SIGTERM),
            _ => self.child.start_kill(),
        }
    }

    fn force_kill(&mut self) -> io::Result<()> {
        kill_group(self.pid)?;
        match self.child.start_kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    async fn wait_exit(&mut self, within: Duration) -> bool {
        matches!(tokio::time::timeout(within, self.child.wait()).await, Ok(Ok(_)))
    }
}
