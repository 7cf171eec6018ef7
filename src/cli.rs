// src/cli.rs

use crate::config::Config;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command line of the orchestrator. Nothing is required: every flag falls back
/// to its `VANGUARD_*` environment variable, then to the built-in default.
#[derive(Debug, Parser)]
#[command(name = "vanguard-orchestrator", version)]
#[command(about = "Unattended multi-target orchestration of a REST-driven web vulnerability scanner.")]
pub struct Cli {
    /// Directory the default config/, input/, logs/ and output/ paths are resolved under
    #[arg(long, env = "VANGUARD_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Newline-delimited target list
    #[arg(long, env = "VANGUARD_TARGETS")]
    pub targets: Option<PathBuf>,

    /// Template project copied once per target
    #[arg(long, env = "VANGUARD_TEMPLATE_PROJECT")]
    pub template_project: Option<PathBuf>,

    /// Optional JSON scan template merged into scan creation
    #[arg(long, env = "VANGUARD_SCAN_TEMPLATE")]
    pub scan_template: Option<PathBuf>,

    /// Optional engine configuration file passed with --config-file
    #[arg(long, env = "VANGUARD_ENGINE_CONFIG")]
    pub engine_config: Option<PathBuf>,

    #[arg(long, env = "VANGUARD_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    #[arg(long, env = "VANGUARD_LOGS_DIR")]
    pub logs_dir: Option<PathBuf>,

    /// Java executable (name on PATH or absolute path)
    #[arg(long, env = "VANGUARD_JAVA")]
    pub java: Option<String>,

    /// Engine jar
    #[arg(long, env = "VANGUARD_ENGINE_JAR")]
    pub engine_jar: Option<PathBuf>,

    /// JVM heap ceiling, e.g. 4g
    #[arg(long, env = "VANGUARD_MAX_MEMORY")]
    pub max_memory: Option<String>,

    #[arg(long, env = "VANGUARD_MIN_MEMORY")]
    pub min_memory: Option<String>,

    #[arg(long, env = "VANGUARD_API_HOST")]
    pub api_host: Option<String>,

    #[arg(long, env = "VANGUARD_API_PORT")]
    pub api_port: Option<u16>,

    /// Path prefix of the control API, e.g. /v0.1
    #[arg(long, env = "VANGUARD_API_PREFIX")]
    pub api_prefix: Option<String>,

    /// Status poll interval, e.g. 15s
    #[arg(long, env = "VANGUARD_POLL_INTERVAL", value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Longest contiguous pause tolerated before a scan is aborted
    #[arg(long, env = "VANGUARD_PAUSE_TIMEOUT", value_parser = humantime::parse_duration)]
    pub pause_timeout: Option<Duration>,

    /// Ceiling on the polling phase of a single scan, e.g. 4h
    #[arg(long, env = "VANGUARD_MAX_SCAN_DURATION", value_parser = humantime::parse_duration)]
    pub max_scan_duration: Option<Duration>,

    #[arg(long, env = "VANGUARD_READINESS_TIMEOUT", value_parser = humantime::parse_duration)]
    pub readiness_timeout: Option<Duration>,

    /// Wait after the control API first answers
    #[arg(long, env = "VANGUARD_SETTLE_DELAY", value_parser = humantime::parse_duration)]
    pub settle_delay: Option<Duration>,

    #[arg(long, env = "VANGUARD_REQUEST_TIMEOUT", value_parser = humantime::parse_duration)]
    pub request_timeout: Option<Duration>,

    #[arg(long, env = "VANGUARD_EXPORT_TIMEOUT", value_parser = humantime::parse_duration)]
    pub export_timeout: Option<Duration>,

    /// Pause between two targets
    #[arg(long, env = "VANGUARD_COOLDOWN", value_parser = humantime::parse_duration)]
    pub cooldown: Option<Duration>,

    #[arg(long, env = "VANGUARD_LAUNCH_ATTEMPTS")]
    pub launch_attempts: Option<u32>,

    #[arg(long, env = "VANGUARD_CREATION_ATTEMPTS")]
    pub creation_attempts: Option<u32>,

    /// Whole-target attempts for failures that produced no artifact
    #[arg(long, env = "VANGUARD_TARGET_ATTEMPTS")]
    pub target_attempts: Option<u32>,

    /// Consecutive failed polls tolerated before a scan fails
    #[arg(long, env = "VANGUARD_MAX_POLL_FAILURES")]
    pub max_poll_failures: Option<u32>,

    /// Do not wrap the engine with the platform idle/sleep inhibitor
    #[arg(long, env = "VANGUARD_NO_IDLE_INHIBIT")]
    pub no_idle_inhibit: bool,

    /// Delete project copies after each target and purge stale ones at startup
    #[arg(long, env = "VANGUARD_DISCARD_PROJECTS")]
    pub discard_projects: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Resolves the defaults under `--root`, then applies every explicit override.
    pub fn into_config(self) -> Config {
        let mut config = Config::with_root(&self.root);

        if let Some(path) = self.targets {
            config.paths.targets_file = path;
        }
        if let Some(path) = self.template_project {
            config.paths.template_project = path;
        }
        if let Some(path) = self.scan_template {
            config.paths.scan_template = path;
        }
        if let Some(path) = self.engine_config {
            config.paths.engine_config = path;
        }
        if let Some(dir) = self.output_dir {
            config.paths.projects_dir = dir.join("burp_projects_temp");
            config.paths.output_dir = dir;
        }
        if let Some(dir) = self.logs_dir {
            config.paths.logs_dir = dir;
        }

        if let Some(java) = self.java {
            config.engine.java_path = java;
        }
        if let Some(jar) = self.engine_jar {
            config.engine.jar_path = jar;
        }
        if let Some(memory) = self.max_memory {
            config.engine.max_memory = memory;
        }
        if let Some(memory) = self.min_memory {
            config.engine.min_memory = memory;
        }
        if let Some(timeout) = self.readiness_timeout {
            config.engine.readiness_timeout = timeout;
        }
        if let Some(delay) = self.settle_delay {
            config.engine.settle_delay = delay;
        }
        config.engine.inhibit_idle = !self.no_idle_inhibit;

        if let Some(host) = self.api_host {
            config.api.host = host;
        }
        if let Some(port) = self.api_port {
            config.api.port = port;
        }
        if let Some(prefix) = self.api_prefix {
            config.api.prefix = prefix;
        }
        if let Some(timeout) = self.request_timeout {
            config.api.request_timeout = timeout;
        }
        if let Some(timeout) = self.export_timeout {
            config.api.export_timeout = timeout;
        }

        if let Some(interval) = self.poll_interval {
            config.scan.poll_interval = interval;
        }
        if let Some(timeout) = self.pause_timeout {
            config.scan.pause_timeout = timeout;
        }
        if let Some(limit) = self.max_scan_duration {
            config.scan.max_scan_duration = limit;
        }
        if let Some(failures) = self.max_poll_failures {
            config.scan.max_poll_failures = failures;
        }

        if let Some(attempts) = self.launch_attempts {
            config.launch_retry.max_attempts = attempts;
        }
        if let Some(attempts) = self.creation_attempts {
            config.creation_retry.max_attempts = attempts;
        }
        if let Some(attempts) = self.target_attempts {
            config.target_attempts = attempts;
        }
        if let Some(cooldown) = self.cooldown {
            config.target_cooldown = cooldown;
        }
        config.keep_projects = !self.discard_projects;

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn no_arguments_gives_defaults() {
        let cli = Cli::try_parse_from(["vanguard-orchestrator", "--root", "/srv/scans"]).unwrap();
        let config = cli.into_config();
        assert_eq!(config, Config::with_root(Path::new("/srv/scans")));
    }

    #[test]
    fn durations_and_overrides_are_applied() {
        let cli = Cli::try_parse_from([
            "vanguard-orchestrator",
            "--root",
            "/srv",
            "--pause-timeout",
            "90s",
            "--max-scan-duration",
            "2h",
            "--api-port",
            "1337",
            "--output-dir",
            "/data/out",
            "--no-idle-inhibit",
            "--discard-projects",
        ])
        .unwrap();
        let config = cli.into_config();

        assert_eq!(config.scan.pause_timeout, Duration::from_secs(90));
        assert_eq!(config.scan.max_scan_duration, Duration::from_secs(7200));
        assert_eq!(config.api.port, 1337);
        assert_eq!(config.paths.output_dir, PathBuf::from("/data/out"));
        assert_eq!(config.paths.projects_dir, PathBuf::from("/data/out/burp_projects_temp"));
        assert!(!config.engine.inhibit_idle);
        assert!(!config.keep_projects);
    }

    #[test]
    fn malformed_duration_is_rejected() {
        let result = Cli::try_parse_from(["vanguard-orchestrator", "--poll-interval", "soon"]);
        assert!(result.is_err());
    }
}
