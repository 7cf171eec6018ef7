// src/main.rs

use color_eyre::eyre::{Result, WrapErr};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use vanguard_orchestrator::cli::Cli;
use vanguard_orchestrator::core::api::RestControlApi;
use vanguard_orchestrator::core::engine::process::JavaSpawner;
use vanguard_orchestrator::core::request::load_scan_template;
use vanguard_orchestrator::core::runner::TargetRunner;
use vanguard_orchestrator::core::targets::load_targets;
use vanguard_orchestrator::logging::initialize_logging;
use vanguard_orchestrator::shutdown::ShutdownSignals;

const EXIT_ENVIRONMENT: u8 = 1;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let config = Cli::parse_args().into_config();

    let log_path = initialize_logging(&config.paths.logs_dir).wrap_err("could not initialize logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), log = %log_path.display(), "Vanguard orchestrator starting.");

    let issues = config.check_environment();
    if !issues.is_empty() {
        for issue in &issues {
            error!(error = %issue, "Environment check failed.");
        }
        return Ok(ExitCode::from(EXIT_ENVIRONMENT));
    }
    info!(root = %config.paths.root.display(), "Environment check passed.");

    let targets = match load_targets(&config.paths.targets_file).await {
        Ok(targets) => targets,
        Err(e) => {
            error!(error = %e, "Could not load targets.");
            return Ok(ExitCode::from(EXIT_ENVIRONMENT));
        }
    };
    if targets.is_empty() {
        error!(path = %config.paths.targets_file.display(), "No valid targets to scan.");
        return Ok(ExitCode::SUCCESS);
    }
    info!(count = targets.len(), "Targets loaded.");

    let template = load_scan_template(&config.paths.scan_template).await;
    let api = Arc::new(RestControlApi::new(&config.api).wrap_err("could not build control API client")?);
    let spawner = Arc::new(JavaSpawner::new(&config));
    let runner = TargetRunner::new(&config, api, spawner, template);

    if !config.keep_projects {
        runner.purge_stale_projects().await;
    }

    let mut signals = ShutdownSignals::install().wrap_err("could not install signal handlers")?;
    let shutdown = tokio::select! {
        summary = runner.run_all(&targets) => {
            info!(
                complete = summary.complete(),
                incomplete = summary.incomplete(),
                failed = summary.failed(),
                "All targets processed."
            );
            None
        }
        signal = signals.recv() => Some(signal),
    };

    if let Some(signal) = shutdown {
        // The run future is gone by now, so any live engine handle has been dropped and killed.
        warn!(signal = %signal, "Interrupted, engine stopped.");
        return Ok(ExitCode::from(signal.exit_code()));
    }
    Ok(ExitCode::SUCCESS)
}
