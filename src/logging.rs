//! Logging bootstrap for embedders
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the embedder's choice. This helper mirrors the usual setup: daily
//! rotating file in the platform data dir, env-filter overridable via
//! `RUST_LOG`, non-blocking writer.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{CoreError, Result};

/// Log directory (`~/.local/share/lathe/logs` on Linux)
pub fn log_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ridgetopai", "lathe")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("/tmp/lathe/logs"))
}

/// Install the global tracing subscriber.
///
/// Returns the appender guard; hold it for the process lifetime or tail
/// log lines are lost. Calling this twice fails (the global subscriber is
/// set once).
pub fn init_logging(log_level: &str) -> Result<WorkerGuard> {
    let log_path = log_dir();
    std::fs::create_dir_all(&log_path)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_path, "lathe.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .map_err(|e| CoreError::Config(format!("Failed to init logging: {}", e)))?;

    Ok(guard)
}
