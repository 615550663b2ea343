//! Two-stage ingestion pipeline.
//!
//! A reader thread splits the input into lines and whitespace-delimited
//! token spans, filling fixed-capacity [`LineBatch`]es. A parser thread runs
//! the grammar over every line of a filled batch and appends the resulting
//! events to the [`EventStore`]. Batches circulate between the two over a
//! pair of bounded channels:
//!
//! ```text
//!            free batches
//!   reader <-------------- parser
//!          --------------->
//!            filled batches
//! ```
//!
//! The reader blocks until a batch has been handed back as consumed, the
//! parser blocks until a batch has been delivered as produced. A batch with
//! zero lines marks the end of the input. With more batches in flight the two
//! stages overlap more, but the result is the same: events are stored in
//! source line order.

use std::io::{self, BufRead, BufReader, Read};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::grammar::{parse_line, Reject};
use crate::store::EventStore;

/// Read buffer in front of the input stream.
const READ_BUFFER_BYTES: usize = 256 * 1024;

/// Token spans are 32-bit offsets into the batch data.
const MAX_BATCH_DATA: usize = u32::MAX as usize;

/// Rejected lines remembered in the report.
const MAX_REJECT_SAMPLES: usize = 16;

/// A block of raw lines with their token spans.
#[derive(Debug, Default)]
pub struct LineBatch {
    data: Vec<u8>,
    /// `(start, end)` byte offsets of every token in `data`.
    tokens: Vec<(u32, u32)>,
    /// End offset into `tokens` of every line.
    line_ends: Vec<u32>,
    /// 1-based source line number of the first line.
    first_line: u64,
}

impl LineBatch {
    pub fn with_capacity(bytes: usize, lines: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            tokens: Vec::with_capacity(lines * 8),
            line_ends: Vec::with_capacity(lines),
            first_line: 1,
        }
    }

    fn clear(&mut self, first_line: u64) {
        self.data.clear();
        self.tokens.clear();
        self.line_ends.clear();
        self.first_line = first_line;
    }

    pub fn line_count(&self) -> usize {
        self.line_ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line_ends.is_empty()
    }

    /// Record the line appended at `data[start..]`, splitting it into tokens.
    fn push_line(&mut self, start: usize) {
        let bytes = &self.data[start..];
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i].is_ascii_whitespace() {
                i += 1;
                continue;
            }
            let token_start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            self.tokens
                .push(((start + token_start) as u32, (start + i) as u32));
        }
        self.line_ends.push(self.tokens.len() as u32);
    }

    /// Token slices of line `i`, collected into `out`.
    pub fn line_tokens<'b>(&'b self, i: usize, out: &mut Vec<&'b [u8]>) {
        let begin = if i == 0 { 0 } else { self.line_ends[i - 1] as usize };
        let end = self.line_ends[i] as usize;
        out.clear();
        out.extend(
            self.tokens[begin..end]
                .iter()
                .map(|&(s, e)| &self.data[s as usize..e as usize]),
        );
    }
}

/// A line the grammar did not accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RejectedLine {
    pub line: u64,
    pub reason: Reject,
}

/// Outcome of one ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Lines read from the input.
    pub lines: u64,
    /// Events committed to the store.
    pub events: usize,
    /// Lines rejected by the grammar.
    pub rejected: u64,
    /// Blank lines and `#` header lines.
    pub skipped: u64,
    /// The first few rejected lines.
    pub rejects: Vec<RejectedLine>,
    /// Read error that ended ingestion early. Events stored before it are
    /// complete and usable.
    pub io_error: Option<io::Error>,
}

impl IngestReport {
    /// True when the whole input was read.
    pub fn is_complete(&self) -> bool {
        self.io_error.is_none()
    }
}

#[derive(Default)]
struct ReaderOutcome {
    lines: u64,
    error: Option<io::Error>,
}

#[derive(Default)]
struct ParserOutcome {
    rejected: u64,
    skipped: u64,
    rejects: Vec<RejectedLine>,
}

/// Read lines into `batch` until it is full or the input ends.
///
/// Returns `Ok(true)` at end of input. A partially read line is dropped on
/// error, and so is a line that would push the batch past what its token
/// offsets can address.
fn fill<R: BufRead>(
    reader: &mut R,
    batch: &mut LineBatch,
    max_bytes: usize,
    max_lines: usize,
) -> io::Result<bool> {
    while batch.data.len() < max_bytes && batch.line_count() < max_lines {
        let start = batch.data.len();
        match reader.read_until(b'\n', &mut batch.data) {
            Ok(0) => return Ok(true),
            Ok(_) if batch.data.len() > MAX_BATCH_DATA => {
                batch.data.truncate(start);
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "trace line does not fit in a line batch",
                ));
            }
            Ok(_) => batch.push_line(start),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                batch.data.truncate(start);
            }
            Err(e) => {
                batch.data.truncate(start);
                return Err(e);
            }
        }
    }
    Ok(false)
}

fn read_loop<R: BufRead>(
    mut reader: R,
    free_rx: Receiver<LineBatch>,
    filled_tx: Sender<LineBatch>,
    max_bytes: usize,
    max_lines: usize,
) -> ReaderOutcome {
    let mut outcome = ReaderOutcome::default();
    loop {
        // The parser went away; nothing left to feed.
        let Ok(mut batch) = free_rx.recv() else {
            return outcome;
        };
        batch.clear(outcome.lines + 1);
        let done = match fill(&mut reader, &mut batch, max_bytes, max_lines) {
            Ok(eof) => eof,
            Err(e) => {
                warn!(
                    "read error after {} lines, stopping ingestion: {e}",
                    outcome.lines + batch.line_count() as u64
                );
                outcome.error = Some(e);
                true
            }
        };
        outcome.lines += batch.line_count() as u64;

        if batch.is_empty() {
            // Already the end-of-input marker.
            let _ = filled_tx.send(batch);
            return outcome;
        }
        if filled_tx.send(batch).is_err() {
            return outcome;
        }
        if done {
            if let Ok(mut marker) = free_rx.recv() {
                marker.clear(outcome.lines + 1);
                let _ = filled_tx.send(marker);
            }
            return outcome;
        }
    }
}

fn parse_loop(
    filled_rx: Receiver<LineBatch>,
    free_tx: Sender<LineBatch>,
    store: &mut EventStore,
) -> Result<ParserOutcome, Error> {
    let mut outcome = ParserOutcome::default();
    while let Ok(batch) = filled_rx.recv() {
        if batch.is_empty() {
            break;
        }
        {
            let mut tokens = Vec::with_capacity(32);
            for i in 0..batch.line_count() {
                batch.line_tokens(i, &mut tokens);
                if tokens.is_empty() || tokens[0].starts_with(b"#") {
                    outcome.skipped += 1;
                    continue;
                }
                match parse_line(&tokens) {
                    Ok(line) => {
                        store.push(&line)?;
                    }
                    Err(reason) => {
                        let line = batch.first_line + i as u64;
                        outcome.rejected += 1;
                        if outcome.rejects.len() < MAX_REJECT_SAMPLES {
                            debug!("line {line} rejected: {reason}");
                            outcome.rejects.push(RejectedLine { line, reason });
                        }
                    }
                }
            }
        }
        if free_tx.send(batch).is_err() {
            break;
        }
    }
    Ok(outcome)
}

/// Read a whole trace from `reader` into a new event store.
///
/// Malformed lines are counted and skipped. A read error stops ingestion and
/// is reported in [`IngestReport::io_error`]; the events read so far are
/// kept. Only allocation failures and thread failures are returned as
/// errors.
pub fn ingest<R: Read + Send>(
    reader: R,
    config: &Config,
) -> Result<(EventStore, IngestReport), Error> {
    let buffers = config.buffer_count();
    let max_bytes = config.batch_capacity();
    let max_lines = config.batch_lines.max(1);
    let mut store = EventStore::new(config.chunk_size);

    let (reader_outcome, parser_outcome) = thread::scope(|s| {
        let (free_tx, free_rx) = crossbeam_channel::bounded::<LineBatch>(buffers);
        let (filled_tx, filled_rx) = crossbeam_channel::bounded::<LineBatch>(buffers);
        for _ in 0..buffers {
            let _ = free_tx.send(LineBatch::with_capacity(max_bytes, max_lines));
        }

        let reader = BufReader::with_capacity(READ_BUFFER_BYTES, reader);
        let reader_thread = thread::Builder::new()
            .name("trace-reader".to_string())
            .spawn_scoped(s, move || {
                read_loop(reader, free_rx, filled_tx, max_bytes, max_lines)
            })
            .map_err(|source| Error::Spawn {
                name: "trace-reader",
                source,
            })?;

        let store = &mut store;
        let parser_thread = thread::Builder::new()
            .name("trace-parser".to_string())
            .spawn_scoped(s, move || parse_loop(filled_rx, free_tx, store))
            .map_err(|source| Error::Spawn {
                name: "trace-parser",
                source,
            })?;

        let parsed = parser_thread
            .join()
            .map_err(|_| Error::Panicked("trace-parser"))?;
        let read = reader_thread
            .join()
            .map_err(|_| Error::Panicked("trace-reader"))?;
        Ok::<_, Error>((read, parsed?))
    })?;

    let report = IngestReport {
        lines: reader_outcome.lines,
        events: store.len(),
        rejected: parser_outcome.rejected,
        skipped: parser_outcome.skipped,
        rejects: parser_outcome.rejects,
        io_error: reader_outcome.error,
    };
    let (chunks, bytes) = store.arena_usage();
    info!(
        "ingested {} events from {} lines ({} rejected, {} skipped), arena {} chunks / {} bytes",
        report.events, report.lines, report.rejected, report.skipped, chunks, bytes
    );
    Ok((store, report))
}
