//! IPC protocol types and validation for the eternal history daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! Frames are self-delimited JSON objects, so a connection may carry any number
//! of them back to back. Requests are tagged by `action`; anything else is a
//! protocol error and the daemon drops the connection without touching the
//! store.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

mod socket;

pub use socket::{resolve_socket_path, socket_path, SESSION_ENV, SOCKET_ENV};

pub const MAX_FRAME_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    Init(SessionDescriptor),
    Start(StartCommand),
    End(EndCommand),
    History(HistoryQuery),
}

/// Everything the shell knows about itself when it registers a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// `<os>/<arch>`, e.g. `linux/x86_64`.
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub shell: String,
    #[serde(default)]
    pub parent: String,
    /// Remote peer address when the shell runs under SSH, otherwise empty.
    #[serde(default)]
    pub origin: String,
    pub hostname: String,
    pub username: String,
    pub tty: String,
    #[serde(deserialize_with = "integer")]
    pub pid: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCommand {
    pub session: String,
    pub working_dir: String,
    pub command: String,
    /// Client clock reading in microseconds since the epoch.
    #[serde(
        default,
        deserialize_with = "lenient_micros",
        skip_serializing_if = "Option::is_none"
    )]
    pub start: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndCommand {
    pub session: String,
    #[serde(alias = "exit_status", deserialize_with = "integer")]
    pub status: i64,
    #[serde(
        default,
        deserialize_with = "lenient_micros",
        skip_serializing_if = "Option::is_none"
    )]
    pub start: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient_micros",
        skip_serializing_if = "Option::is_none"
    )]
    pub end: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub session: String,
    /// List every recorded command instead of only this session's.
    #[serde(default, skip_serializing_if = "is_false")]
    pub all: bool,
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::Init(_) => "init",
            Request::Start(_) => "start",
            Request::End(_) => "end",
            Request::History(_) => "history",
        }
    }

    /// Session token the request refers to; `init` has none yet.
    pub fn session(&self) -> Option<&str> {
        match self {
            Request::Init(_) => None,
            Request::Start(start) => Some(&start.session),
            Request::End(end) => Some(&end.session),
            Request::History(query) => Some(&query.session),
        }
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Request::Init(descriptor) => {
                require_string(&descriptor.hostname, "hostname")?;
                require_string(&descriptor.username, "username")?;
                require_pid(descriptor.pid)?;
            }
            Request::Start(start) => {
                require_string(&start.session, "session")?;
                require_string(&start.working_dir, "working_dir")?;
            }
            Request::End(end) => require_string(&end.session, "session")?,
            Request::History(query) => require_string(&query.session, "session")?,
        }
        Ok(())
    }
}

/// A frame the daemon writes back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Session(SessionToken),
    Entry(HistoryEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub session: String,
}

/// One command joined with the descriptive fields of its session.
///
/// Commands whose session row is missing still appear, with empty strings and
/// a zero pid. A `-1` exit status or duration means the command is still open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub os: String,
    pub shell: String,
    pub parent: String,
    pub origin: String,
    pub hostname: String,
    pub username: String,
    pub tty: String,
    #[serde(deserialize_with = "integer")]
    pub pid: i64,
    pub working_dir: String,
    pub timestamp: String,
    pub command: String,
    #[serde(deserialize_with = "integer")]
    pub exit_status: i64,
    /// Microseconds.
    #[serde(deserialize_with = "integer")]
    pub duration: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ProtocolError {
    pub code: String,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

fn require_string(value: &str, field: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

fn require_pid(pid: i64) -> Result<(), ProtocolError> {
    if pid <= 0 {
        return Err(ProtocolError::new("invalid_pid", "pid is required"));
    }
    Ok(())
}

fn is_false(value: &bool) -> bool {
    !*value
}

// Shell hooks hand us whatever `$?` or `getppid` printed, so integers may
// arrive as JSON numbers or as numeric strings.
fn integer<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| D::Error::custom(format!("expected an integer, got {}", value)))
}

// Timestamps that cannot be read are treated as absent rather than rejected;
// the correlation layer decides what an absent timestamp means.
fn lenient_micros<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let micros = match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().and_then(round_finite)),
        Some(Value::String(text)) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(round_finite))
        }
        _ => None,
    };
    Ok(micros)
}

fn round_finite(value: f64) -> Option<i64> {
    value.is_finite().then(|| value.round() as i64)
}
