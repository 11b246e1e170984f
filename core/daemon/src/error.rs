//! Error types for the daemon.
//!
//! Only startup errors are fatal. Everything else is scoped to a single
//! request (or a single connection) and is logged where it happens.

use eternal_protocol::ProtocolError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    // ─────────────────────────────────────────────────────────────────────
    // Protocol Errors (connection is dropped, store untouched)
    // ─────────────────────────────────────────────────────────────────────
    #[error("Malformed frame: {0}")]
    Protocol(#[from] ProtocolError),

    // ─────────────────────────────────────────────────────────────────────
    // Correlation Errors (request yields an empty response)
    // ─────────────────────────────────────────────────────────────────────
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors (request yields an empty response, journal continues)
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage error: {context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Startup Errors (fatal)
    // ─────────────────────────────────────────────────────────────────────
    #[error("daemon already running at {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("Failed to bind socket {}: {source}", .path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file malformed: {}: {details}", .path.display())]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("{0}")]
    PathResolution(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Journal
    // ─────────────────────────────────────────────────────────────────────
    #[error("Journal is no longer accepting requests")]
    JournalStopped,
}

impl DaemonError {
    pub fn storage(context: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| DaemonError::Storage { context, source }
    }

    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| DaemonError::Io { context, source }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
