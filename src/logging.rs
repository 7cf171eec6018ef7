// src/logging.rs

use chrono::Local;
use color_eyre::eyre::Result;
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    self, fmt, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
    Layer,
};

lazy_static! {
    pub static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase().to_string();
    pub static ref LOG_ENV: String = format!("{}_LOGLEVEL", PROJECT_NAME.clone());
    pub static ref LOG_FILE_PREFIX: String = env!("CARGO_CRATE_NAME").to_string();
}

/// Timestamp used in every file name the orchestrator produces.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const LOG_LINE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time formatted for file names.
pub fn file_timestamp() -> String {
    Local::now().format(FILE_TIMESTAMP_FORMAT).to_string()
}

/// Path of this run's log file inside `directory`.
pub fn run_log_path(directory: &Path) -> PathBuf {
    directory.join(format!("{}_{}.log", LOG_FILE_PREFIX.as_str(), file_timestamp()))
}

fn log_filter() -> String {
    std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(LOG_ENV.clone()))
        .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")))
}

/// Initializes logging to a per-run file and to stdout.
///
/// Both outputs share the same filter, taken from `RUST_LOG` or
/// `VANGUARD_ORCHESTRATOR_LOGLEVEL` and defaulting to `info` for this crate.
///
/// # Returns
/// The path of the log file created for this run.
pub fn initialize_logging(directory: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(directory)?;
    let log_path = run_log_path(directory);
    let log_file = std::fs::File::create(&log_path)?;
    let filter = log_filter();

    let file_layer = fmt::layer()
        .with_writer(log_file)
        .with_target(false)
        .with_ansi(false)
        .with_timer(ChronoLocal::new(LOG_LINE_TIME_FORMAT.to_string()))
        .with_filter(EnvFilter::new(&filter));

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_timer(ChronoLocal::new(LOG_LINE_TIME_FORMAT.to_string()))
        .with_filter(EnvFilter::new(&filter));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(ErrorLayer::default())
        .try_init()?;

    Ok(log_path)
}
