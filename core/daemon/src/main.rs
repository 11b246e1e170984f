//! Eternal daemon entrypoint.
//!
//! A small single-writer service that records shell command history. Clients
//! talk to it over a Unix socket; one journal thread owns the SQLite store and
//! applies every request in arrival order.

use fs_err as fs;
use std::env;
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod correlation;
mod db;
mod error;
mod journal;
mod server;
mod startup_lock;

use config::DaemonConfig;
use db::Db;
use error::{DaemonError, Result};

const DEBUG_LOG_ENV: &str = "ETERNAL_DEBUG_LOG";
const SOCKET_MODE: u32 = 0o600;

fn main() {
    init_logging();

    if let Err(err) = run() {
        error!(error = %err, "Eternal daemon failed to start");
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let socket_path = eternal_protocol::socket_path();

    prepare_socket_dir(&socket_path)?;
    // Held from the liveness check through bind so a concurrent start cannot
    // unlink a socket that was bound after its own check.
    let startup = startup_lock::acquire(&socket_path)?;

    if UnixStream::connect(&socket_path).is_ok() {
        return Err(DaemonError::AlreadyRunning(socket_path));
    }

    let config = match config::load(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load daemon config; using defaults");
            DaemonConfig::default()
        }
    };

    let db_path = config.db_path()?;
    let db = Db::open(&db_path)?;
    info!(path = %db_path.display(), "History store opened");

    remove_existing_socket(&socket_path)?;
    let listener = UnixListener::bind(&socket_path).map_err(|source| DaemonError::Bind {
        path: socket_path.clone(),
        source,
    })?;
    fs::set_permissions(&socket_path, Permissions::from_mode(SOCKET_MODE))
        .map_err(DaemonError::io("Failed to restrict socket permissions"))?;
    drop(startup);

    ignore_hangup();

    let (journal, _worker) = journal::spawn(db, config.queue_capacity())?;
    info!(
        path = %socket_path.display(),
        queue_capacity = config.queue_capacity(),
        "Eternal daemon started"
    );

    server::serve(listener, journal);
    Ok(())
}

fn init_logging() {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn prepare_socket_dir(socket_path: &Path) -> Result<()> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| DaemonError::PathResolution("Socket path has no parent".to_string()))?;
    fs::create_dir_all(parent).map_err(DaemonError::io("Failed to create socket directory"))
}

fn remove_existing_socket(socket_path: &Path) -> Result<()> {
    if socket_path.exists() {
        fs::remove_file(socket_path).map_err(DaemonError::io("Failed to remove stale socket"))?;
    }
    Ok(())
}

/// Keeps the daemon alive after the terminal that spawned it goes away.
fn ignore_hangup() {
    // SAFETY: installing SIG_IGN has no handler code and touches no Rust state.
    unsafe {
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
    }
}
