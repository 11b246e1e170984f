//! Terminal rendering for `eternal history`.

use eternal_protocol::HistoryEntry;

/// Compact duration for a microsecond count. Open commands (negative) render
/// blank. Anything past an hour is a bare number of minutes.
pub fn show_duration(micros: i64) -> String {
    if micros < 0 {
        return String::new();
    }
    if micros < 1000 {
        return format!("{}µs", micros);
    }
    let millis = micros / 1000;
    if millis < 1000 {
        return format!("{}ms", millis);
    }
    let secs = millis / 1000;
    if secs < 60 {
        return format!("{}s", secs);
    }
    if secs < 600 {
        return format!("{}m{}s", secs / 60, secs % 60);
    }
    let minutes = secs / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }
    minutes.to_string()
}

pub fn history_line(entry: &HistoryEntry) -> String {
    let tty = entry.tty.strip_prefix("/dev/").unwrap_or(&entry.tty);
    format!(
        "{} ({:<6}) {:>5} {}",
        entry.timestamp,
        tty,
        show_duration(entry.duration),
        entry.command
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tty: &str, duration: i64, command: &str) -> HistoryEntry {
        HistoryEntry {
            os: "linux/x86_64".to_string(),
            shell: "zsh".to_string(),
            parent: "sshd".to_string(),
            origin: String::new(),
            hostname: "box".to_string(),
            username: "u".to_string(),
            tty: tty.to_string(),
            pid: 1,
            working_dir: "/".to_string(),
            timestamp: "2024-05-01 10:00:00".to_string(),
            command: command.to_string(),
            exit_status: 0,
            duration,
        }
    }

    #[test]
    fn durations_pick_the_coarsest_fitting_unit() {
        assert_eq!(show_duration(0), "0µs");
        assert_eq!(show_duration(999), "999µs");
        assert_eq!(show_duration(1_000), "1ms");
        assert_eq!(show_duration(250_000), "250ms");
        assert_eq!(show_duration(1_999_999), "1s");
        assert_eq!(show_duration(59_000_000), "59s");
        assert_eq!(show_duration(61_000_000), "1m1s");
        assert_eq!(show_duration(599_000_000), "9m59s");
        assert_eq!(show_duration(600_000_000), "10m");
        assert_eq!(show_duration(3_599_000_000), "59m");
        assert_eq!(show_duration(7_200_000_000), "120");
    }

    #[test]
    fn open_commands_have_blank_duration() {
        assert_eq!(show_duration(-1), "");
        assert_eq!(show_duration(-1_000_000_000), "");
    }

    #[test]
    fn line_strips_dev_and_pads_columns() {
        assert_eq!(
            history_line(&entry("/dev/pts/3", 250_000, "ls -la")),
            "2024-05-01 10:00:00 (pts/3 ) 250ms ls -la"
        );
        assert_eq!(
            history_line(&entry("/dev/pts/3", -1, "vim")),
            "2024-05-01 10:00:00 (pts/3 )       vim"
        );
    }

    #[test]
    fn line_keeps_ttys_outside_dev() {
        assert_eq!(
            history_line(&entry("console-long", 5, "true")),
            "2024-05-01 10:00:00 (console-long)   5µs true"
        );
    }
}
