//! Maps decoded requests onto store operations.
//!
//! `plan` is pure: it decides which store operation a request becomes and how
//! the duration column is derived. `execute` runs the operation against the
//! store and turns the result into response frames.
//!
//! `end` never names the row it closes. The target is the newest open command
//! of the session by insertion order, which is only well defined because the
//! journal applies requests one at a time. Two shells sharing a token can
//! still close each other's commands.

use eternal_protocol::{EndCommand, Frame, HistoryEntry, Request, SessionDescriptor, SessionToken};
use std::vec;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{Db, DurationUpdate, HistoryScope};
use crate::error::{DaemonError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    CreateSession {
        token: String,
        descriptor: SessionDescriptor,
    },
    InsertOpen {
        token: String,
        working_dir: String,
        command: String,
        provisional_duration: i64,
    },
    CloseLatest {
        token: String,
        exit_status: i64,
        duration: DurationUpdate,
    },
    ListHistory {
        token: String,
        all: bool,
    },
}

/// What a request produced, consumed as a sequence of response frames.
#[derive(Debug)]
pub enum Outcome {
    Silent,
    Session(String),
    History(Vec<HistoryEntry>),
}

impl IntoIterator for Outcome {
    type Item = Frame;
    type IntoIter = Frames;

    fn into_iter(self) -> Frames {
        match self {
            Outcome::Silent => Frames::Single(None),
            Outcome::Session(session) => {
                Frames::Single(Some(Frame::Session(SessionToken { session })))
            }
            Outcome::History(entries) => Frames::History(entries.into_iter()),
        }
    }
}

pub enum Frames {
    Single(Option<Frame>),
    History(vec::IntoIter<HistoryEntry>),
}

impl Iterator for Frames {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        match self {
            Frames::Single(frame) => frame.take(),
            Frames::History(entries) => entries.next().map(Frame::Entry),
        }
    }
}

pub fn handle(db: &Db, request: Request) -> Result<Outcome> {
    execute(db, plan(request))
}

pub fn plan(request: Request) -> StoreOp {
    match request {
        Request::Init(descriptor) => StoreOp::CreateSession {
            token: mint_token(),
            descriptor,
        },
        Request::Start(start) => StoreOp::InsertOpen {
            token: start.session,
            working_dir: start.working_dir,
            command: start.command,
            provisional_duration: placeholder_duration(start.start),
        },
        Request::End(end) => plan_end(end),
        Request::History(query) => StoreOp::ListHistory {
            token: query.session,
            all: query.all,
        },
    }
}

pub fn execute(db: &Db, op: StoreOp) -> Result<Outcome> {
    match op {
        StoreOp::CreateSession { token, descriptor } => {
            db.create_session(&token, &descriptor)?;
            info!(
                session = %token,
                hostname = %descriptor.hostname,
                tty = %descriptor.tty,
                pid = descriptor.pid,
                "Session created"
            );
            Ok(Outcome::Session(token))
        }
        StoreOp::InsertOpen {
            token,
            working_dir,
            command,
            provisional_duration,
        } => match db.insert_open_command(&token, &working_dir, &command, provisional_duration)? {
            Some(id) => {
                debug!(session = %token, command_id = id, "Command opened");
                Ok(Outcome::Silent)
            }
            None => Err(DaemonError::UnknownSession(token)),
        },
        StoreOp::CloseLatest {
            token,
            exit_status,
            duration,
        } => {
            let changed = db.close_latest_open_command(&token, exit_status, duration)?;
            if changed == 0 {
                debug!(session = %token, "No open command to close");
            } else {
                debug!(session = %token, exit_status, ?duration, "Command closed");
            }
            Ok(Outcome::Silent)
        }
        StoreOp::ListHistory { token, all } => {
            let scope = if all {
                HistoryScope::All
            } else {
                HistoryScope::Session(&token)
            };
            let entries = db.list_history(scope)?;
            debug!(session = %token, all, entries = entries.len(), "History listed");
            Ok(Outcome::History(entries))
        }
    }
}

fn plan_end(end: EndCommand) -> StoreOp {
    let duration = match closing_duration(end.start, end.end) {
        Some(duration) => duration,
        None => {
            warn!(
                session = %end.session,
                start = ?end.start,
                "end request carried no usable end timestamp; recording zero duration"
            );
            DurationUpdate::Set(0)
        }
    };
    StoreOp::CloseLatest {
        token: end.session,
        exit_status: end.status,
        duration,
    }
}

/// Tokens are random 128-bit UUIDs in hyphenated lowercase form.
pub fn mint_token() -> String {
    Uuid::new_v4().hyphenated().to_string()
}

/// Duration stored when a command opens: the negated client start time, so a
/// later end timestamp alone can recover the elapsed time.
pub fn placeholder_duration(start: Option<i64>) -> i64 {
    start.map(i64::saturating_neg).unwrap_or(0)
}

/// Duration written when a command closes, or `None` when there is no end
/// timestamp to work from.
pub fn closing_duration(start: Option<i64>, end: Option<i64>) -> Option<DurationUpdate> {
    match (start, end) {
        (Some(start), Some(end)) => Some(DurationUpdate::Set(end.saturating_sub(start).max(0))),
        (None, Some(end)) => Some(DurationUpdate::AddToPlaceholder(end)),
        (_, None) => None,
    }
}
