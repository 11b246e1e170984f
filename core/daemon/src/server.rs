//! Connection multiplexer.
//!
//! Every accepted connection gets its own thread that decodes a stream of
//! self-delimited JSON request frames, hands each one to the journal, and
//! writes the frames from that request's response route back before reading
//! the next request. The connection closes on end-of-stream, on the first
//! frame that fails to decode or validate, or when a write fails.

use eternal_protocol::{Frame, ProtocolError, Request, MAX_FRAME_BYTES};
use std::cell::Cell;
use std::io::{self, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::rc::Rc;
use std::thread;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::journal::JournalHandle;

pub fn serve(listener: UnixListener, journal: JournalHandle) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let journal = journal.clone();
                thread::spawn(move || handle_connection(stream, journal));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

pub fn handle_connection(stream: UnixStream, journal: JournalHandle) {
    let budget = Rc::new(Cell::new(MAX_FRAME_BYTES));
    let reader = FrameBudget {
        inner: BufReader::new(&stream),
        remaining: Rc::clone(&budget),
    };
    let mut writer = &stream;
    let mut served = 0usize;

    for decoded in serde_json::Deserializer::from_reader(reader).into_iter::<Request>() {
        let request = match accept_frame(decoded, budget.get() == 0) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, served, "Dropping connection");
                return;
            }
        };
        budget.set(MAX_FRAME_BYTES);

        debug!(action = request.action(), session = ?request.session(), "Daemon request received");
        let route = match journal.submit(request) {
            Ok(route) => route,
            Err(err) => {
                error!(error = %err, "Failed to enqueue request");
                return;
            }
        };

        for frame in route {
            if let Err(err) = write_frame(&mut writer, &frame) {
                debug!(error = %err, "Client went away before response was written");
                return;
            }
        }
        served += 1;
    }

    debug!(served, "Connection closed by peer");
}

/// Turns one decoded frame into a request the journal may run.
fn accept_frame(
    decoded: serde_json::Result<Request>,
    budget_exhausted: bool,
) -> Result<Request> {
    let request = decoded.map_err(|err| classify_decode_error(&err, budget_exhausted))?;
    request.validate()?;
    Ok(request)
}

fn write_frame(writer: &mut impl Write, frame: &Frame) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, frame)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn classify_decode_error(err: &serde_json::Error, budget_exhausted: bool) -> ProtocolError {
    if err.is_io() {
        if budget_exhausted {
            return ProtocolError::new("frame_too_large", "request exceeded maximum size");
        }
        return ProtocolError::new("read_error", format!("failed to read request: {}", err));
    }
    if err.is_eof() {
        return ProtocolError::new("incomplete_frame", "connection closed mid-frame");
    }
    if err.is_data() {
        return ProtocolError::new("invalid_request", format!("request was rejected: {}", err));
    }
    ProtocolError::new("invalid_json", format!("request was not valid JSON: {}", err))
}

/// Caps how many bytes a single frame may consume. The connection loop
/// refills the budget after each decoded frame.
struct FrameBudget<R> {
    inner: R,
    remaining: Rc<Cell<usize>>,
}

impl<R: Read> Read for FrameBudget<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining.get();
        if remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame exceeded maximum size",
            ));
        }
        let limit = buf.len().min(remaining);
        let read = self.inner.read(&mut buf[..limit])?;
        self.remaining.set(remaining - read);
        Ok(read)
    }
}
