//! eternal: shell-side client for the eternal history daemon.
//!
//! Called from shell hooks. `init` registers the shell and prints its session
//! token; `start` and `end` bracket every command line; `history` prints what
//! was recorded.
//!
//! ## Subcommands
//!
//! - `init`: Register this shell (launches `eternald` if needed)
//! - `start`: Record a command that is about to run
//! - `end`: Close the most recent open command with its exit status
//! - `history`: Print recorded commands for this session (or all with `--all`)

mod daemon_client;
mod error;
mod logging;
mod render;
mod session;

use chrono::Utc;
use clap::{Parser, Subcommand};
use eternal_protocol::{EndCommand, Frame, HistoryQuery, Request, StartCommand};
use std::io::Write;

use error::{ClientError, Result};

const UNKNOWN_WORKING_DIR: &str = "(error)";

#[derive(Parser)]
#[command(name = "eternal")]
#[command(about = "Records every shell command in a local history daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register this shell and print its session token
    Init,

    /// Record a command line that is about to run
    Start {
        /// The command line as typed
        #[arg(value_name = "COMMAND", allow_hyphen_values = true)]
        command: String,
    },

    /// Close the latest open command
    End {
        /// Exit status of the command
        #[arg(value_name = "STATUS", allow_negative_numbers = true)]
        status: i64,

        /// Start time in seconds since the epoch (e.g. $EPOCHREALTIME)
        #[arg(value_name = "START")]
        start: Option<String>,

        /// End time in seconds since the epoch; defaults to now
        #[arg(value_name = "END")]
        end: Option<String>,
    },

    /// Print recorded commands
    History {
        /// Include commands from every session
        #[arg(long)]
        all: bool,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli.command) {
        tracing::error!(error = %err, "eternal failed");
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    let socket = eternal_protocol::socket_path();

    match command {
        Commands::Init => {
            let stream = daemon_client::connect_or_spawn(&socket)?;
            let frames = daemon_client::exchange(stream, &Request::Init(session::describe()))?;
            let token = frames
                .into_iter()
                .find_map(|frame| match frame {
                    Frame::Session(token) => Some(token.session),
                    Frame::Entry(_) => None,
                })
                .ok_or(ClientError::NoToken)?;
            println!("{}", token);
        }
        Commands::Start { command } => {
            let session = session::session_token()?;
            let working_dir = std::env::current_dir()
                .map(|dir| dir.to_string_lossy().into_owned())
                .unwrap_or_else(|_| UNKNOWN_WORKING_DIR.to_string());
            let request = Request::Start(StartCommand {
                session,
                working_dir,
                command,
                start: Some(Utc::now().timestamp_micros()),
            });
            daemon_client::send(daemon_client::connect(&socket)?, &request)?;
        }
        Commands::End { status, start, end } => {
            let session = session::session_token()?;
            let request = Request::End(end_request(session, status, start, end));
            daemon_client::send(daemon_client::connect(&socket)?, &request)?;
        }
        Commands::History { all } => {
            let session = session::session_token()?;
            let stream = daemon_client::connect(&socket)?;
            let frames =
                daemon_client::exchange(stream, &Request::History(HistoryQuery { session, all }))?;
            print_history(&frames)?;
        }
    }
    Ok(())
}

fn end_request(
    session: String,
    status: i64,
    start: Option<String>,
    end: Option<String>,
) -> EndCommand {
    let start = start.as_deref().and_then(seconds_to_micros);
    let end = end
        .as_deref()
        .and_then(seconds_to_micros)
        .unwrap_or_else(|| Utc::now().timestamp_micros());
    EndCommand {
        session,
        status,
        start,
        end: Some(end),
    }
}

/// Parses fractional epoch seconds (`1715000000.123456`) into microseconds.
fn seconds_to_micros(value: &str) -> Option<i64> {
    let seconds = value.trim().parse::<f64>().ok().filter(|s| s.is_finite())?;
    Some((seconds * 1_000_000.0).round() as i64)
}

fn print_history(frames: &[Frame]) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for frame in frames {
        if let Frame::Entry(entry) = frame {
            writeln!(out, "{}", render::history_line(entry))
                .map_err(ClientError::io("Failed to write history"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_parse_to_micros() {
        assert_eq!(seconds_to_micros("1000.25"), Some(1_000_250_000));
        assert_eq!(seconds_to_micros("1715000000.123456"), Some(1_715_000_000_123_456));
        assert_eq!(seconds_to_micros(" 3 "), Some(3_000_000));
        assert_eq!(seconds_to_micros("soon"), None);
        assert_eq!(seconds_to_micros("NaN"), None);
        assert_eq!(seconds_to_micros(""), None);
    }

    #[test]
    fn end_request_carries_both_timestamps() {
        let request = end_request(
            "tok".to_string(),
            0,
            Some("1000.0".to_string()),
            Some("1000.25".to_string()),
        );
        assert_eq!(request.start, Some(1_000_000_000));
        assert_eq!(request.end, Some(1_000_250_000));
        assert_eq!(request.status, 0);
    }

    #[test]
    fn end_request_falls_back_to_now() {
        let before = Utc::now().timestamp_micros();
        let request = end_request("tok".to_string(), 2, Some("garbage".to_string()), None);
        let after = Utc::now().timestamp_micros();

        assert_eq!(request.start, None);
        let end = request.end.expect("end defaults to now");
        assert!(end >= before && end <= after);
    }

    #[test]
    fn cli_parses_end_with_optional_times() {
        let cli = Cli::try_parse_from(["eternal", "end", "130", "1.5"]).expect("parse");
        match cli.command {
            Commands::End { status, start, end } => {
                assert_eq!(status, 130);
                assert_eq!(start.as_deref(), Some("1.5"));
                assert_eq!(end, None);
            }
            _ => panic!("expected end"),
        }
    }

    #[test]
    fn cli_accepts_commands_starting_with_dash() {
        let cli = Cli::try_parse_from(["eternal", "start", "-rf"]).expect("parse");
        assert!(matches!(cli.command, Commands::Start { command } if command == "-rf"));
    }

    #[test]
    fn cli_rejects_non_numeric_status() {
        assert!(Cli::try_parse_from(["eternal", "end", "ok"]).is_err());
    }

    #[test]
    fn cli_parses_history_all() {
        let cli = Cli::try_parse_from(["eternal", "history", "--all"]).expect("parse");
        assert!(matches!(cli.command, Commands::History { all: true }));
    }
}
