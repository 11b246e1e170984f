//! Client side of the daemon socket.
//!
//! Each invocation opens one connection, writes its request frame, half-closes
//! the write side and then reads reply frames until the daemon closes the
//! connection. `init` is the only command allowed to launch a daemon.

use eternal_protocol::{Frame, Request};
use std::env;
use std::io::{BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::error::{ClientError, Result};

const DAEMON_BINARY: &str = "eternald";
const DAEMON_LOG_FILE: &str = "eternald.log";
pub const SPAWN_ATTEMPTS: u32 = 100;
pub const SPAWN_BACKOFF: Duration = Duration::from_millis(50);

pub fn connect(socket: &Path) -> Result<UnixStream> {
    UnixStream::connect(socket).map_err(|source| ClientError::Connect {
        path: socket.to_path_buf(),
        source,
    })
}

/// Connects to the daemon, launching one first if nothing is listening.
pub fn connect_or_spawn(socket: &Path) -> Result<UnixStream> {
    connect_or_launch(socket, spawn_daemon, SPAWN_ATTEMPTS, SPAWN_BACKOFF)
}

fn connect_or_launch<F>(
    socket: &Path,
    launch: F,
    attempts: u32,
    backoff: Duration,
) -> Result<UnixStream>
where
    F: FnOnce() -> Result<()>,
{
    if let Ok(stream) = UnixStream::connect(socket) {
        return Ok(stream);
    }

    tracing::info!(path = %socket.display(), "No daemon answering; launching one");
    launch()?;

    for attempt in 1..=attempts {
        match UnixStream::connect(socket) {
            Ok(stream) => {
                tracing::debug!(attempt, "Connected to freshly launched daemon");
                return Ok(stream);
            }
            Err(err) => {
                tracing::trace!(attempt, error = %err, "Daemon not answering yet");
                thread::sleep(backoff);
            }
        }
    }

    Err(ClientError::DaemonUnavailable {
        path: socket.to_path_buf(),
        attempts,
    })
}

/// Writes one request and returns every frame the daemon sends back.
pub fn exchange(stream: UnixStream, request: &Request) -> Result<Vec<Frame>> {
    write_request(&stream, request)?;
    let reader = BufReader::new(&stream);
    let frames = serde_json::Deserializer::from_reader(reader)
        .into_iter::<Frame>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    tracing::debug!(action = request.action(), frames = frames.len(), "Daemon exchange complete");
    Ok(frames)
}

/// Writes one request that has no reply and hangs up.
pub fn send(stream: UnixStream, request: &Request) -> Result<()> {
    write_request(&stream, request)
}

fn write_request(mut stream: &UnixStream, request: &Request) -> Result<()> {
    serde_json::to_writer(&mut stream, request)?;
    stream
        .write_all(b"\n")
        .map_err(ClientError::io("Failed to write request"))?;
    stream
        .shutdown(Shutdown::Write)
        .map_err(ClientError::io("Failed to finish request"))
}

fn spawn_daemon() -> Result<()> {
    let binary = daemon_binary();
    let stderr = match daemon_log() {
        Some(file) => Stdio::from(file),
        None => Stdio::null(),
    };

    let child = Command::new(&binary)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(stderr)
        .process_group(0)
        .spawn()
        .map_err(|source| ClientError::Spawn {
            binary: binary.clone(),
            source,
        })?;
    tracing::info!(pid = child.id(), binary = %binary.display(), "Launched daemon");
    Ok(())
}

/// The daemon installed next to this executable, else whatever `$PATH` finds.
fn daemon_binary() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DAEMON_BINARY)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(DAEMON_BINARY))
}

fn daemon_log() -> Option<std::fs::File> {
    let dir = dirs::data_dir()?.join("eternal");
    fs_err::create_dir_all(&dir).ok()?;
    fs_err::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(DAEMON_LOG_FILE))
        .map(fs_err::File::into_file)
        .ok()
}
