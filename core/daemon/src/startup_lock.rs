//! Serializes daemon startup.
//!
//! The already-running check, stale socket removal and bind must happen as
//! one step, or two daemons started together can both pass the check and the
//! second unlinks the socket the first just bound. Startup holds an exclusive
//! `flock` on a file next to the socket for that whole window.

use fs_err::File;
use std::ffi::OsString;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{DaemonError, Result};

/// Held for the duration of startup; dropping it closes the file, which
/// releases the lock.
#[derive(Debug)]
pub struct StartupLock {
    _file: File,
}

pub fn lock_path(socket_path: &Path) -> PathBuf {
    let mut name = socket_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("eternal"));
    name.push(".lock");
    socket_path.with_file_name(name)
}

/// Blocks until no other daemon is between its check and its bind.
pub fn acquire(socket_path: &Path) -> Result<StartupLock> {
    let path = lock_path(socket_path);
    let file: File = fs_err::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(DaemonError::io("Failed to open startup lock"))?;

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    let ret = unsafe { libc::flock(file.file().as_raw_fd(), libc::LOCK_EX) };
    if ret != 0 {
        return Err(DaemonError::Io {
            context: format!("flock failed on {}", path.display()),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(StartupLock { _file: file })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lock_file_sits_next_to_socket() {
        assert_eq!(
            lock_path(Path::new("/run/user/1000/eternal")),
            PathBuf::from("/run/user/1000/eternal.lock")
        );
        assert_eq!(
            lock_path(Path::new("/tmp/u-eternal.sock")),
            PathBuf::from("/tmp/u-eternal.sock.lock")
        );
    }

    #[test]
    fn second_starter_waits_until_first_releases() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("eternal");

        let first = acquire(&socket).expect("first lock");
        let (acquired, waiter) = mpsc::channel();
        let contender_socket = socket.clone();
        let contender = thread::spawn(move || {
            let lock = acquire(&contender_socket).expect("second lock");
            acquired.send(()).expect("report acquisition");
            drop(lock);
        });

        assert!(
            waiter.recv_timeout(Duration::from_millis(200)).is_err(),
            "lock must not be granted while held"
        );
        drop(first);
        waiter
            .recv_timeout(Duration::from_secs(5))
            .expect("lock granted after release");
        contender.join().expect("contender thread");
    }
}
