use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("no {0} in environment")]
    MissingSession(&'static str),

    #[error("cannot connect to daemon at {}: {source}", .path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create daemon: no answer at {} after {attempts} attempts", .path.display())]
    DaemonUnavailable { path: PathBuf, attempts: u32 },

    #[error("cannot launch {}: {source}", .binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed daemon response: {0}")]
    Response(#[from] serde_json::Error),

    #[error("daemon sent no session token")]
    NoToken,
}

impl ClientError {
    pub fn io(context: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| ClientError::Io { context, source }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
