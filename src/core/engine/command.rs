// src/core/engine/command.rs

use crate::config::EngineSettings;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Platform helper that keeps the host awake while the engine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleInhibitor {
    /// `systemd-inhibit --what=idle:sleep` on Linux.
    SystemdInhibit(PathBuf),
    /// `caffeinate -i` on macOS.
    Caffeinate(PathBuf),
}

impl IdleInhibitor {
    /// Finds the inhibitor helper for the current platform on `PATH`.
    pub fn detect() -> Option<Self> {
        let detected = if cfg!(target_os = "linux") {
            which::which("systemd-inhibit").ok().map(IdleInhibitor::SystemdInhibit)
        } else if cfg!(target_os = "macos") {
            which::which("caffeinate").ok().map(IdleInhibitor::Caffeinate)
        } else {
            None
        };
        if detected.is_none() {
            warn!("No idle/sleep inhibitor available on this host; the engine runs unprotected.");
        }
        detected
    }

    fn prefix(&self) -> (String, Vec<String>) {
        match self {
            IdleInhibitor::SystemdInhibit(path) => (
                path.display().to_string(),
                vec![
                    "--what=idle:sleep".to_string(),
                    format!("--who={}", env!("CARGO_PKG_NAME")),
                    "--why=Unattended vulnerability scan in progress".to_string(),
                    "--mode=block".to_string(),
                ],
            ),
            IdleInhibitor::Caffeinate(path) => (path.display().to_string(), vec!["-i".to_string()]),
        }
    }
}

/// Fully resolved program and arguments for one engine launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EngineCommand {
    /// Builds the JVM command line bound to one provisioned project.
    ///
    /// Order: memory limits, fixed JVM flags, `-jar`, project file, engine
    /// flags, then the optional engine config file.
    pub fn for_project(settings: &EngineSettings, project: &Path, engine_config: Option<&Path>) -> Self {
        let mut args = vec![
            format!("-Xmx{}", settings.max_memory),
            format!("-Xms{}", settings.min_memory),
        ];
        args.extend(settings.jvm_flags.iter().cloned());
        args.push("-jar".to_string());
        args.push(settings.jar_path.display().to_string());
        args.push(format!("--project-file={}", project.display()));
        args.extend(settings.engine_flags.iter().cloned());
        if let Some(config) = engine_config {
            args.push(format!("--config-file={}", config.display()));
        }
        args.retain(|arg| !arg.is_empty());

        let command = Self { program: settings.java_path.clone(), args };
        debug!(command = %command, "Built engine command.");
        command
    }

    /// Runs the same command under an idle inhibitor.
    pub fn inhibited(self, inhibitor: &IdleInhibitor) -> Self {
        let (program, mut args) = inhibitor.prefix();
        args.push(self.program);
        args.extend(self.args);
        Self { program, args }
    }
}

impl std::fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
