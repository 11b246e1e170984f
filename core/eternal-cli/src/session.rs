//! What the client knows about the shell it runs under.
//!
//! `eternal` is always invoked by a shell hook, so the parent process is the
//! interactive shell and its parent is whatever launched that shell.

use eternal_protocol::{SessionDescriptor, SESSION_ENV};
use std::env;
use std::ffi::CStr;
use sysinfo::{Pid, ProcessRefreshKind, System};

use crate::error::{ClientError, Result};

const UNKNOWN: &str = "unknown";

pub fn describe() -> SessionDescriptor {
    let shell_pid = std::os::unix::process::parent_id();
    let (shell, parent) = process_lineage(shell_pid);

    SessionDescriptor {
        os: os_label(),
        shell,
        parent,
        origin: origin_from(env::var("SSH_CLIENT").ok().as_deref()),
        hostname: System::host_name().unwrap_or_else(|| UNKNOWN.to_string()),
        username: username(|key| env::var(key).ok()),
        tty: tty_name(),
        pid: i64::from(shell_pid),
    }
}

/// Token exported by `eval $(eternal init)`.
pub fn session_token() -> Result<String> {
    env::var(SESSION_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ClientError::MissingSession(SESSION_ENV))
}

fn os_label() -> String {
    format!("{}/{}", env::consts::OS, env::consts::ARCH)
}

/// First field of `$SSH_CLIENT` (`<addr> <port> <port>`).
fn origin_from(ssh_client: Option<&str>) -> String {
    ssh_client
        .and_then(|value| value.split_whitespace().next())
        .unwrap_or_default()
        .to_string()
}

fn username(lookup: impl Fn(&str) -> Option<String>) -> String {
    ["USER", "LOGNAME"]
        .iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Executable names of the shell and of the process that started it.
fn process_lineage(shell_pid: u32) -> (String, String) {
    let mut sys = System::new();
    let shell_pid = Pid::from_u32(shell_pid);
    sys.refresh_process_specifics(shell_pid, ProcessRefreshKind::new());
    let Some(shell) = sys.process(shell_pid) else {
        return (String::new(), String::new());
    };
    let shell_name = shell.name().to_string();

    let parent_name = match shell.parent() {
        Some(parent_pid) => {
            sys.refresh_process_specifics(parent_pid, ProcessRefreshKind::new());
            sys.process(parent_pid)
                .map(|process| process.name().to_string())
                .unwrap_or_default()
        }
        None => String::new(),
    };
    (shell_name, parent_name)
}

fn tty_name() -> String {
    if let Ok(target) = fs_err::read_link("/proc/self/fd/0") {
        let target = target.to_string_lossy().into_owned();
        if target.starts_with("/dev/") {
            return target;
        }
    }

    // SAFETY: ttyname returns null or a pointer to a static NUL-terminated
    // buffer that stays valid until the next call on this thread.
    unsafe {
        let name = libc::ttyname(libc::STDIN_FILENO);
        if name.is_null() {
            return String::new();
        }
        CStr::from_ptr(name).to_string_lossy().into_owned()
    }
}
