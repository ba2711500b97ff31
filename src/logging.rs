//! Tracing setup: human-readable output on stderr plus a JSON-lines file at
//! `<workspace>/logs/studyroom.log`.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "studyroom.log";

/// Stderr stays quiet so it does not interleave with the countdown line.
const STDERR_DEFAULT_FILTER: &str = "warn";
const FILE_DEFAULT_FILTER: &str = "info";

/// Registers the global subscriber. The returned guard must be held until
/// exit so buffered file output is flushed.
///
/// # Errors
///
/// Returns an error if the log directory or file cannot be created.
pub fn init_tracing(logs_dir: &Path) -> Result<WorkerGuard> {
    let (file_writer, guard) = open_log_writer(logs_dir)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter(STDERR_DEFAULT_FILTER)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_filter(env_filter(FILE_DEFAULT_FILTER)),
        )
        .try_init()
        .context("failed to register tracing subscriber")?;

    Ok(guard)
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

pub fn log_file_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join(LOG_FILE_NAME)
}

fn open_log_writer(logs_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create log directory: {}", logs_dir.display()))?;

    let log_path = log_file_path(logs_dir);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file: {}", log_path.display()))?;

    Ok(tracing_appender::non_blocking(log_file))
}
