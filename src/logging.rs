//! Tracing subscriber setup.
//!
//! Terminal output goes to stderr, filtered by `RUST_LOG` (default `info`,
//! `debug` with `--verbose`). Orchestrations also log to a plain text file in
//! their output directory through a non-blocking writer.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Name of the orchestrator log file for a given start time.
pub fn orchestrator_log_name(now: chrono::DateTime<chrono::Local>) -> String {
    format!("MBM_logs_{}.txt", now.format("%Y%m%d_%H%M%S"))
}

/// Keeps the file writer alive. Dropping it flushes pending lines.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
    file_path: Option<PathBuf>,
}

impl LogGuard {
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("buildmachine=debug,info")
            } else {
                EnvFilter::try_new("buildmachine=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber, optionally teeing into `log_file`.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<LogGuard> {
    let mut guard = LogGuard {
        _file: None,
        file_path: None,
    };

    let file_layer = match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let name = path
                .file_name()
                .context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard._file = Some(worker);
            guard.file_path = Some(path.to_path_buf());
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(file_layer)
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_orchestrator_log_name() {
        let now = chrono::Local.with_ymd_and_hms(2026, 3, 14, 9, 5, 7).unwrap();
        assert_eq!(orchestrator_log_name(now), "MBM_logs_20260314_090507.txt");
    }
}
