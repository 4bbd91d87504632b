//! File logging for the CLI.
//!
//! Stdout carries command output, so logs go to a daily rolling file under
//! `~/.hydrascope/logs/`. Falls back to stderr when the home directory or the
//! log directory is unavailable.

use hydrascope_core::{debug_log_enabled, StorageConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "hydrascope.log";

fn filter() -> EnvFilter {
    if debug_log_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Keep the returned guard alive for the life of the process; dropping it
/// flushes buffered lines.
pub fn init() -> Option<WorkerGuard> {
    let logs_dir = StorageConfig::from_home()
        .ok()
        .map(|storage| storage.logs_dir())
        .filter(|dir| fs_err::create_dir_all(dir).is_ok());

    let Some(logs_dir) = logs_dir else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .try_init();
        return None;
    };

    let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Some(guard)
}
