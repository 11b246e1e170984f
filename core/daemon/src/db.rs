//! SQLite persistence for the eternal daemon.
//!
//! The journal thread owns the only `Db`, so the connection is held directly
//! instead of being reopened per call. Two tables: sessions (one row per shell
//! lifetime) and commands (one row per recorded invocation, open until its
//! exit status is written).

use chrono::Local;
use eternal_protocol::{HistoryEntry, SessionDescriptor};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;

use crate::error::{DaemonError, Result};

const BUSY_TIMEOUT_MS: u32 = 5000;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const CLOSE_SET_DURATION: &str = "UPDATE eternal_command \
     SET exit = ?1, duration = ?2 \
     WHERE id = (SELECT MAX(c.id) FROM eternal_command c \
                 JOIN eternal_session s ON c.session_id = s.id \
                 WHERE s.session = ?3 AND c.exit IS NULL)";

const CLOSE_ADD_DURATION: &str = "UPDATE eternal_command \
     SET exit = ?1, duration = COALESCE(duration, 0) + ?2 \
     WHERE id = (SELECT MAX(c.id) FROM eternal_command c \
                 JOIN eternal_session s ON c.session_id = s.id \
                 WHERE s.session = ?3 AND c.exit IS NULL)";

const HISTORY_COLUMNS: &str = "SELECT \
        COALESCE(s.os, ''), COALESCE(s.shell, ''), COALESCE(s.parent, ''), \
        COALESCE(s.origin, ''), COALESCE(s.hostname, ''), COALESCE(s.username, ''), \
        COALESCE(s.tty, ''), COALESCE(s.pid, 0), \
        c.working_dir, c.start, c.command, \
        COALESCE(c.exit, -1), COALESCE(c.duration, -1) \
     FROM eternal_command c \
     LEFT JOIN eternal_session s ON c.session_id = s.id";

/// How `end` writes the duration column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUpdate {
    /// Overwrite with an elapsed time in microseconds.
    Set(i64),
    /// Add to the placeholder stored by `start`.
    AddToPlaceholder(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryScope<'a> {
    Session(&'a str),
    All,
}

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(DaemonError::io("Failed to create history data dir"))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(path, flags)
            .map_err(DaemonError::storage("Failed to open sqlite db"))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(DaemonError::storage("Failed to enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(DaemonError::storage("Failed to set synchronous"))?;
        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
            .map_err(DaemonError::storage("Failed to set busy_timeout"))?;

        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn create_session(&self, token: &str, descriptor: &SessionDescriptor) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO eternal_session \
                    (created, session, os, shell, parent, origin, hostname, username, tty, pid) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    now_local(),
                    token,
                    descriptor.os,
                    descriptor.shell,
                    descriptor.parent,
                    descriptor.origin,
                    descriptor.hostname,
                    descriptor.username,
                    descriptor.tty,
                    descriptor.pid
                ],
            )
            .map_err(DaemonError::storage("Failed to insert session"))?;
        Ok(())
    }

    /// Inserts an open command for `token`. Returns `None` when no session
    /// carries that token.
    pub fn insert_open_command(
        &self,
        token: &str,
        working_dir: &str,
        command: &str,
        provisional_duration: i64,
    ) -> Result<Option<i64>> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO eternal_command (session_id, working_dir, start, duration, command) \
                 SELECT id, ?1, ?2, ?3, ?4 FROM eternal_session WHERE session = ?5",
                params![working_dir, now_local(), provisional_duration, command, token],
            )
            .map_err(DaemonError::storage("Failed to insert command"))?;

        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// Closes the newest open command of `token`. Returns the number of rows
    /// changed, which is 0 when the session has nothing open or does not exist.
    pub fn close_latest_open_command(
        &self,
        token: &str,
        exit_status: i64,
        duration: DurationUpdate,
    ) -> Result<usize> {
        let (sql, value) = match duration {
            DurationUpdate::Set(value) => (CLOSE_SET_DURATION, value),
            DurationUpdate::AddToPlaceholder(value) => (CLOSE_ADD_DURATION, value),
        };
        self.conn
            .execute(sql, params![exit_status, value, token])
            .map_err(DaemonError::storage("Failed to close command"))
    }

    pub fn list_history(&self, scope: HistoryScope<'_>) -> Result<Vec<HistoryEntry>> {
        let sql = match scope {
            HistoryScope::Session(_) => format!(
                "{} WHERE c.session_id = (SELECT id FROM eternal_session WHERE session = ?1) \
                 ORDER BY c.id ASC",
                HISTORY_COLUMNS
            ),
            HistoryScope::All => format!("{} ORDER BY c.id ASC", HISTORY_COLUMNS),
        };

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(DaemonError::storage("Failed to prepare history query"))?;

        let rows = match scope {
            HistoryScope::Session(token) => stmt.query_map(params![token], history_row),
            HistoryScope::All => stmt.query_map([], history_row),
        }
        .map_err(DaemonError::storage("Failed to query history"))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(DaemonError::storage("Failed to decode history row"))?);
        }
        Ok(entries)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS eternal_session (
                    id INTEGER PRIMARY KEY,
                    created TEXT NOT NULL,
                    session TEXT UNIQUE NOT NULL,
                    os TEXT NOT NULL DEFAULT '',
                    shell TEXT NOT NULL DEFAULT '',
                    parent TEXT NOT NULL DEFAULT '',
                    origin TEXT NOT NULL DEFAULT '',
                    hostname TEXT NOT NULL,
                    username TEXT NOT NULL,
                    tty TEXT NOT NULL,
                    pid INTEGER NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS eternal_command (
                    id INTEGER PRIMARY KEY,
                    session_id INTEGER NOT NULL REFERENCES eternal_session(id),
                    working_dir TEXT NOT NULL,
                    start TEXT NOT NULL,
                    exit INTEGER,
                    duration INTEGER,
                    command TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_command_session_open
                    ON eternal_command(session_id, id) WHERE exit IS NULL;
                 COMMIT;",
            )
            .map_err(DaemonError::storage("Failed to initialize schema"))
    }
}

fn history_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        os: row.get(0)?,
        shell: row.get(1)?,
        parent: row.get(2)?,
        origin: row.get(3)?,
        hostname: row.get(4)?,
        username: row.get(5)?,
        tty: row.get(6)?,
        pid: row.get(7)?,
        working_dir: row.get(8)?,
        timestamp: row.get(9)?,
        command: row.get(10)?,
        exit_status: row.get(11)?,
        duration: row.get(12)?,
    })
}

fn now_local() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}
