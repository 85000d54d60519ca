//! File-backed tracing setup.
//!
//! The terminal belongs to the UI, so diagnostics are written to
//! `<log_dir>/tether.log` through a non-blocking appender.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub const LOG_FILE_NAME: &str = "tether.log";

/// Installs the global subscriber. Keep the returned guard alive until exit,
/// dropping it flushes buffered lines.
///
/// `RUST_LOG` overrides the default filter. A subscriber installed earlier
/// (tests, embedding hosts) is left in place.
pub fn init_file_logging(log_dir: &Path, debug: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let mut log_file_opts = OpenOptions::new();
    log_file_opts.create(true).append(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        log_file_opts.mode(0o600);
    }

    let log_path = log_dir.join(LOG_FILE_NAME);
    let log_file = log_file_opts
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let default_filter = if debug {
        "tether_core=debug,tether=debug"
    } else {
        "tether_core=warn,tether=warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_ansi(false)
        .with_filter(env_filter);

    let _ = tracing_subscriber::registry().with(file_layer).try_init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn creates_log_directory_and_file() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");

        let guard = init_file_logging(&log_dir, true).unwrap();
        drop(guard);

        assert!(log_dir.join(LOG_FILE_NAME).exists());
    }
}
