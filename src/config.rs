// src/config.rs

//! Runtime configuration for the orchestrator.
//!
//! Defaults mirror a project directory laid out as:
//!
//! ```text
//! <root>/
//!   burpsuite_pro.jar
//!   config/fix.burp            template project copied once per target
//!   config/scan_template.json  optional scan settings injected into scan creation
//!   config/burp_config.json    optional engine configuration file
//!   input/websites.txt         newline-delimited targets
//!   logs/                      run logs and engine startup logs
//!   output/                    result artifacts and run summaries
//!   output/burp_projects_temp/ provisioned project copies
//! ```
//!
//! Every value can be overridden from the command line (see `cli`).

use crate::core::retry::{Backoff, RetryPolicy};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_ENGINE_JAR: &str = "burpsuite_pro.jar";
const DEFAULT_TEMPLATE_PROJECT: &str = "config/fix.burp";
const DEFAULT_SCAN_TEMPLATE: &str = "config/scan_template.json";
const DEFAULT_ENGINE_CONFIG: &str = "config/burp_config.json";
const DEFAULT_TARGETS_FILE: &str = "input/websites.txt";
const DEFAULT_LOGS_DIR: &str = "logs";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_PROJECTS_DIR: &str = "burp_projects_temp";

/// JVM flags applied to every engine launch: G1 collector, software rendering
/// and the module openings the engine needs on recent JDKs.
const DEFAULT_JVM_FLAGS: &[&str] = &[
    "-XX:+UseG1GC",
    "-Dsun.java2d.opengl=false",
    "-Dsun.java2d.xrender=false",
    "--add-opens=java.base/java.lang=ALL-UNNAMED",
    "--add-opens=java.base/java.util=ALL-UNNAMED",
    "--add-opens=java.desktop/java.awt=ALL-UNNAMED",
    "--enable-native-access=ALL-UNNAMED",
];

const DEFAULT_ENGINE_FLAGS: &[&str] = &["--unpause-spider-and-scanner"];

/// Environment problems detected before any target is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("template project not found: {0}")]
    TemplateProjectMissing(PathBuf),

    #[error("engine jar not found: {0}")]
    EngineJarMissing(PathBuf),

    #[error("targets file not found: {0} (create it with one URL per line)")]
    TargetsFileMissing(PathBuf),

    #[error("java executable not found: {path} ({reason})")]
    JavaNotFound { path: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("could not create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// File and directory locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    pub template_project: PathBuf,
    pub scan_template: PathBuf,
    pub engine_config: PathBuf,
    pub targets_file: PathBuf,
    pub logs_dir: PathBuf,
    pub output_dir: PathBuf,
    pub projects_dir: PathBuf,
}

impl Paths {
    pub fn under(root: &Path) -> Self {
        let output_dir = root.join(DEFAULT_OUTPUT_DIR);
        Self {
            root: root.to_path_buf(),
            template_project: root.join(DEFAULT_TEMPLATE_PROJECT),
            scan_template: root.join(DEFAULT_SCAN_TEMPLATE),
            engine_config: root.join(DEFAULT_ENGINE_CONFIG),
            targets_file: root.join(DEFAULT_TARGETS_FILE),
            logs_dir: root.join(DEFAULT_LOGS_DIR),
            projects_dir: output_dir.join(DEFAULT_PROJECTS_DIR),
            output_dir,
        }
    }
}

/// How the engine process is launched and supervised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub java_path: String,
    pub jar_path: PathBuf,
    pub max_memory: String,
    pub min_memory: String,
    pub jvm_flags: Vec<String>,
    pub engine_flags: Vec<String>,
    /// Wrap the engine with the platform's idle/sleep inhibitor when one is available.
    pub inhibit_idle: bool,
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
    /// Wait after the API first answers, while the project and its scheduled tasks load.
    pub settle_delay: Duration,
    /// Time between the graceful shutdown signal and the forced kill.
    pub terminate_grace: Duration,
}

/// Where the control API lives and how long single requests may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
    pub prefix: String,
    pub request_timeout: Duration,
    pub export_timeout: Duration,
}

impl ApiSettings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Polling cadence and the policy limits of one scan session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub poll_interval: Duration,
    pub pause_timeout: Duration,
    pub max_scan_duration: Duration,
    /// Consecutive failed polls tolerated before the session fails.
    pub max_poll_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub paths: Paths,
    pub engine: EngineSettings,
    pub api: ApiSettings,
    pub scan: ScanSettings,
    pub launch_retry: RetryPolicy,
    pub creation_retry: RetryPolicy,
    /// Whole-target attempts for failures that produced no artifact.
    pub target_attempts: u32,
    pub target_retry_delay: Duration,
    pub target_cooldown: Duration,
    /// Leave provisioned projects on disk after their target concludes.
    pub keep_projects: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_root(Path::new("."))
    }
}

impl Config {
    /// Default configuration with every path resolved under `root`.
    pub fn with_root(root: &Path) -> Self {
        Self {
            paths: Paths::under(root),
            engine: EngineSettings {
                java_path: "java".to_string(),
                jar_path: root.join(DEFAULT_ENGINE_JAR),
                max_memory: "4g".to_string(),
                min_memory: "2g".to_string(),
                jvm_flags: DEFAULT_JVM_FLAGS.iter().map(|f| f.to_string()).collect(),
                engine_flags: DEFAULT_ENGINE_FLAGS.iter().map(|f| f.to_string()).collect(),
                inhibit_idle: true,
                readiness_timeout: Duration::from_secs(180),
                readiness_poll_interval: Duration::from_secs(3),
                settle_delay: Duration::from_secs(30),
                terminate_grace: Duration::from_secs(5),
            },
            api: ApiSettings {
                host: "127.0.0.1".to_string(),
                port: 8090,
                prefix: "/v0.1".to_string(),
                request_timeout: Duration::from_secs(10),
                export_timeout: Duration::from_secs(60),
            },
            scan: ScanSettings {
                poll_interval: Duration::from_secs(15),
                pause_timeout: Duration::from_secs(120),
                max_scan_duration: Duration::from_secs(4 * 60 * 60),
                max_poll_failures: 8,
            },
            launch_retry: RetryPolicy::new(
                3,
                Backoff::Exponential {
                    initial: Duration::from_secs(10),
                    max: Duration::from_secs(60),
                },
            ),
            creation_retry: RetryPolicy::new(3, Backoff::Fixed(Duration::from_secs(5))),
            target_attempts: 2,
            target_retry_delay: Duration::from_secs(10),
            target_cooldown: Duration::from_secs(5),
            keep_projects: true,
        }
    }

    /// Checks numeric settings that would make the run loop meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("scan.poll_interval", self.scan.poll_interval),
            ("scan.pause_timeout", self.scan.pause_timeout),
            ("scan.max_scan_duration", self.scan.max_scan_duration),
            ("engine.readiness_timeout", self.engine.readiness_timeout),
            ("engine.readiness_poll_interval", self.engine.readiness_poll_interval),
            ("api.request_timeout", self.api.request_timeout),
            ("api.export_timeout", self.api.export_timeout),
        ];
        for (field, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.scan.poll_interval > self.scan.pause_timeout {
            return Err(ConfigError::InvalidValue {
                field: "scan.poll_interval",
                reason: "must not exceed the pause timeout".to_string(),
            });
        }
        if self.api.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "api.port",
                reason: "must be a valid TCP port".to_string(),
            });
        }
        if !self.api.prefix.is_empty() && !self.api.prefix.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "api.prefix",
                reason: "must start with '/'".to_string(),
            });
        }
        Ok(())
    }

    /// Validates the environment before any target is processed.
    ///
    /// Creates the logs, output and project directories and reports every problem
    /// found. An empty result means the run may start.
    pub fn check_environment(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        if let Err(e) = self.validate() {
            issues.push(e);
        }
        if !self.paths.template_project.is_file() {
            issues.push(ConfigError::TemplateProjectMissing(self.paths.template_project.clone()));
        }
        if !self.engine.jar_path.is_file() {
            issues.push(ConfigError::EngineJarMissing(self.engine.jar_path.clone()));
        }
        if !self.paths.targets_file.is_file() {
            issues.push(ConfigError::TargetsFileMissing(self.paths.targets_file.clone()));
        }
        if let Err(e) = which::which(&self.engine.java_path) {
            issues.push(ConfigError::JavaNotFound {
                path: self.engine.java_path.clone(),
                reason: e.to_string(),
            });
        }

        for dir in [&self.paths.logs_dir, &self.paths.output_dir, &self.paths.projects_dir] {
            if let Err(source) = std::fs::create_dir_all(dir) {
                issues.push(ConfigError::CreateDir { path: dir.clone(), source });
            }
        }

        issues
    }

    /// The engine config file, when one exists on disk.
    pub fn engine_config_file(&self) -> Option<&Path> {
        let path = self.paths.engine_config.as_path();
        path.is_file().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_under_root() {
        let config = Config::with_root(Path::new("/srv/scans"));
        assert_eq!(config.paths.template_project, PathBuf::from("/srv/scans/config/fix.burp"));
        assert_eq!(
            config.paths.projects_dir,
            PathBuf::from("/srv/scans/output/burp_projects_temp")
        );
        assert_eq!(config.engine.jar_path, PathBuf::from("/srv/scans/burpsuite_pro.jar"));
        assert_eq!(config.api.base_url(), "http://127.0.0.1:8090");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_durations_are_rejected() {
        let mut config = Config::default();
        config.scan.pause_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "scan.pause_timeout", .. })
        ));
    }

    #[test]
    fn poll_interval_longer_than_pause_timeout_is_rejected() {
        let mut config = Config::default();
        config.scan.poll_interval = Duration::from_secs(300);
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_inputs_are_all_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_root(dir.path());
        config.engine.java_path = dir.path().join("no-such-java").display().to_string();

        let issues = config.check_environment();

        assert!(issues.iter().any(|e| matches!(e, ConfigError::TemplateProjectMissing(_))));
        assert!(issues.iter().any(|e| matches!(e, ConfigError::EngineJarMissing(_))));
        assert!(issues.iter().any(|e| matches!(e, ConfigError::TargetsFileMissing(_))));
        assert!(issues.iter().any(|e| matches!(e, ConfigError::JavaNotFound { .. })));
        assert!(config.paths.projects_dir.is_dir());
        assert!(config.paths.logs_dir.is_dir());
    }

    #[test]
    fn engine_config_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        assert!(config.engine_config_file().is_none());

        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(&config.paths.engine_config, "{}").unwrap();
        assert_eq!(config.engine_config_file(), Some(config.paths.engine_config.as_path()));
    }
}
