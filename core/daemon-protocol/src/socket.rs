//! Socket location shared by the daemon and its clients.
//!
//! Precedence: `$ETERNAL_SOCKET`, then `$XDG_RUNTIME_DIR/eternal`, then
//! `$TMPDIR/$USER-eternal`, then `/tmp/$USER-eternal`.

use std::env;
use std::path::PathBuf;

pub const SOCKET_ENV: &str = "ETERNAL_SOCKET";
pub const SESSION_ENV: &str = "ETERNAL_SESSION";
const SOCKET_NAME: &str = "eternal";

pub fn socket_path() -> PathBuf {
    resolve_socket_path(|key| env::var(key).ok())
}

pub fn resolve_socket_path(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

    if let Some(path) = var(SOCKET_ENV) {
        return PathBuf::from(path);
    }
    if let Some(dir) = var("XDG_RUNTIME_DIR") {
        return PathBuf::from(dir).join(SOCKET_NAME);
    }

    let filename = match var("USER").or_else(|| var("LOGNAME")) {
        Some(user) => format!("{}-{}", user, SOCKET_NAME),
        None => SOCKET_NAME.to_string(),
    };
    let dir = var("TMPDIR").unwrap_or_else(|| "/tmp".to_string());
    PathBuf::from(dir).join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> PathBuf {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        resolve_socket_path(|key| vars.get(key).cloned())
    }

    #[test]
    fn explicit_override_wins() {
        let path = resolve(&[
            ("ETERNAL_SOCKET", "/custom/sock"),
            ("XDG_RUNTIME_DIR", "/run/user/1000"),
        ]);
        assert_eq!(path, PathBuf::from("/custom/sock"));
    }

    #[test]
    fn prefers_runtime_dir() {
        let path = resolve(&[
            ("XDG_RUNTIME_DIR", "/run/user/1000"),
            ("TMPDIR", "/var/tmp"),
            ("USER", "u"),
        ]);
        assert_eq!(path, PathBuf::from("/run/user/1000/eternal"));
    }

    #[test]
    fn falls_back_to_tmpdir_with_user_prefix() {
        let path = resolve(&[("TMPDIR", "/var/tmp"), ("USER", "u")]);
        assert_eq!(path, PathBuf::from("/var/tmp/u-eternal"));
    }

    #[test]
    fn falls_back_to_tmp() {
        let path = resolve(&[("USER", "u")]);
        assert_eq!(path, PathBuf::from("/tmp/u-eternal"));
    }

    #[test]
    fn empty_values_are_ignored() {
        let path = resolve(&[("XDG_RUNTIME_DIR", ""), ("TMPDIR", ""), ("USER", "")]);
        assert_eq!(path, PathBuf::from("/tmp/eternal"));
    }
}
