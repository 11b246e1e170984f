//! The command journal: one thread that owns the store and applies requests
//! strictly one after another.
//!
//! Producers (connection threads) reach it only through a bounded queue. A
//! full queue blocks the producer; nothing is dropped. Each job carries its
//! own response route, which the journal closes when the request is done, so
//! a connection only ever sees frames for the requests it submitted.

use eternal_protocol::{Frame, Request};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::correlation;
use crate::db::Db;
use crate::error::{DaemonError, Result};

pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Frames produced for one request. Iteration ends once the journal has
/// finished with it.
pub type ResponseRoute = Receiver<Frame>;

struct Job {
    request: Request,
    route: Sender<Frame>,
}

#[derive(Clone)]
pub struct JournalHandle {
    queue: SyncSender<Job>,
}

impl JournalHandle {
    /// Enqueues a request, blocking while the queue is full.
    pub fn submit(&self, request: Request) -> Result<ResponseRoute> {
        let (route, responses) = mpsc::channel();
        self.queue
            .send(Job { request, route })
            .map_err(|_| DaemonError::JournalStopped)?;
        Ok(responses)
    }
}

/// Starts the journal thread. It runs until every `JournalHandle` is dropped.
pub fn spawn(db: Db, capacity: usize) -> Result<(JournalHandle, JoinHandle<()>)> {
    let (queue, jobs) = mpsc::sync_channel(capacity.max(1));
    let worker = thread::Builder::new()
        .name("eternal-journal".to_string())
        .spawn(move || run(db, jobs))
        .map_err(DaemonError::io("Failed to spawn journal thread"))?;
    Ok((JournalHandle { queue }, worker))
}

fn run(db: Db, jobs: Receiver<Job>) {
    for job in jobs {
        process(&db, job);
    }
    info!("Journal stopped; no producers left");
}

fn process(db: &Db, job: Job) {
    let Job { request, route } = job;
    let action = request.action();

    match correlation::handle(db, request) {
        Ok(outcome) => {
            for frame in outcome {
                if route.send(frame).is_err() {
                    debug!(action, "Response route dropped by connection");
                    break;
                }
            }
        }
        Err(DaemonError::UnknownSession(token)) => {
            warn!(action, session = %token, "Request references unknown session");
        }
        Err(err) => {
            error!(action, error = %err, "Request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eternal_protocol::{EndCommand, HistoryQuery, SessionDescriptor, StartCommand};

    fn spawn_journal(dir: &tempfile::TempDir) -> (JournalHandle, JoinHandle<()>) {
        let db = Db::open(&dir.path().join("history.db")).expect("db init");
        spawn(db, DEFAULT_QUEUE_CAPACITY).expect("spawn journal")
    }

    fn init(journal: &JournalHandle, tty: &str) -> String {
        let request = Request::Init(SessionDescriptor {
            os: "linux/x86_64".to_string(),
            shell: "zsh".to_string(),
            parent: "login".to_string(),
            origin: String::new(),
            hostname: "box".to_string(),
            username: "u".to_string(),
            tty: tty.to_string(),
            pid: 100,
        });
        let frames: Vec<Frame> = journal.submit(request).expect("submit").iter().collect();
        match frames.as_slice() {
            [Frame::Session(token)] => token.session.clone(),
            other => panic!("unexpected frames: {:?}", other),
        }
    }

    fn start(journal: &JournalHandle, session: &str, command: &str) -> Vec<Frame> {
        journal
            .submit(Request::Start(StartCommand {
                session: session.to_string(),
                working_dir: "/".to_string(),
                command: command.to_string(),
                start: None,
            }))
            .expect("submit")
            .iter()
            .collect()
    }

    fn end(journal: &JournalHandle, session: &str, status: i64, elapsed: i64) -> Vec<Frame> {
        journal
            .submit(Request::End(EndCommand {
                session: session.to_string(),
                status,
                start: Some(0),
                end: Some(elapsed),
            }))
            .expect("submit")
            .iter()
            .collect()
    }

    fn history(journal: &JournalHandle, session: &str) -> Vec<eternal_protocol::HistoryEntry> {
        journal
            .submit(Request::History(HistoryQuery {
                session: session.to_string(),
                all: false,
            }))
            .expect("submit")
            .iter()
            .map(|frame| match frame {
                Frame::Entry(entry) => entry,
                other => panic!("unexpected frame: {:?}", other),
            })
            .collect()
    }

    #[test]
    fn failed_request_closes_route_empty_and_journal_continues() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let (journal, _worker) = spawn_journal(&temp_dir);

        assert!(start(&journal, "unknown-session", "ls").is_empty());

        let token = init(&journal, "/dev/pts/1");
        assert!(start(&journal, &token, "ls").is_empty());
        assert_eq!(history(&journal, &token).len(), 1);
    }

    #[test]
    fn concurrent_sessions_close_their_own_commands() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let (journal, _worker) = spawn_journal(&temp_dir);

        let workers: Vec<_> = (0..8)
            .map(|index| {
                let journal = journal.clone();
                thread::spawn(move || {
                    let token = init(&journal, &format!("/dev/pts/{}", index));
                    for round in 0..10 {
                        start(&journal, &token, &format!("cmd-{}-{}", index, round));
                        end(&journal, &token, index, index * 1000 + round);
                    }
                    (index, token)
                })
            })
            .collect();

        for worker in workers {
            let (index, token) = worker.join().expect("worker thread");
            let records = history(&journal, &token);
            assert_eq!(records.len(), 10);
            for (round, record) in records.iter().enumerate() {
                assert_eq!(record.command, format!("cmd-{}-{}", index, round));
                assert_eq!(record.exit_status, index);
                assert_eq!(record.duration, index * 1000 + round as i64);
            }
        }
    }

    #[test]
    fn journal_stops_when_all_handles_drop() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let (journal, worker) = spawn_journal(&temp_dir);
        let token = init(&journal, "/dev/pts/1");
        assert!(!token.is_empty());

        drop(journal);
        worker.join().expect("journal thread exits cleanly");
    }

    #[test]
    fn dropped_route_does_not_stall_journal() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let (journal, _worker) = spawn_journal(&temp_dir);
        let token = init(&journal, "/dev/pts/1");
        for command in ["a", "b", "c"] {
            start(&journal, &token, command);
        }

        let abandoned = journal
            .submit(Request::History(HistoryQuery {
                session: token.clone(),
                all: false,
            }))
            .expect("submit");
        drop(abandoned);

        assert_eq!(history(&journal, &token).len(), 3);
    }

    #[test]
    fn full_queue_blocks_producers_without_dropping() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = Db::open(&temp_dir.path().join("history.db")).expect("db init");
        let (journal, _worker) = spawn(db, 1).expect("spawn journal");

        let producers: Vec<_> = (0..16)
            .map(|index| {
                let journal = journal.clone();
                thread::spawn(move || {
                    let token = init(&journal, &format!("/dev/pts/{}", index));
                    let routes: Vec<ResponseRoute> = (0..50)
                        .map(|round| {
                            journal
                                .submit(Request::Start(StartCommand {
                                    session: token.clone(),
                                    working_dir: "/".to_string(),
                                    command: format!("{}-{}", index, round),
                                    start: None,
                                }))
                                .expect("submit")
                        })
                        .collect();
                    for route in routes {
                        assert_eq!(route.iter().count(), 0);
                    }
                    token
                })
            })
            .collect();

        let tokens: Vec<String> = producers
            .into_iter()
            .map(|producer| producer.join().expect("producer thread"))
            .collect();

        let everything: Vec<Frame> = journal
            .submit(Request::History(HistoryQuery {
                session: tokens[0].clone(),
                all: true,
            }))
            .expect("submit")
            .iter()
            .collect();
        assert_eq!(everything.len(), 16 * 50);

        for (index, token) in tokens.iter().enumerate() {
            let commands: Vec<String> = history(&journal, token)
                .into_iter()
                .map(|entry| entry.command)
                .collect();
            let expected: Vec<String> = (0..50).map(|round| format!("{}-{}", index, round)).collect();
            assert_eq!(commands, expected);
        }
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = Db::open(&temp_dir.path().join("history.db")).expect("db init");
        let (journal, _worker) = spawn(db, 0).expect("spawn journal");
        assert!(!init(&journal, "/dev/pts/1").is_empty());
    }
}
