//! File logging for the client.
//!
//! The client runs inside shell hooks, so diagnostics go to a file instead of
//! the terminal. `RUST_LOG` overrides the default `warn` level.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "eternal-cli.log";

/// Keep the returned guard alive for the whole run so buffered lines flush.
pub fn init() -> Option<WorkerGuard> {
    let dir = log_dir()?;
    if fs_err::create_dir_all(&dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::never(&dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;
    Some(guard)
}

fn log_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("eternal"))
}
