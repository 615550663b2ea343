//! A loaded trace: events, ingest outcome and extracted scheduling state.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;
use serde::Serialize;

use crate::analysis::{analyze, Analysis};
use crate::config::Config;
use crate::error::Error;
use crate::pipeline::{ingest, IngestReport};
use crate::sched::ExtractStats;
use crate::store::EventStore;
use crate::time::TraceTime;

pub struct Trace {
    pub store: EventStore,
    pub report: IngestReport,
    pub analysis: Analysis,
}

/// Headline numbers of a loaded trace.
#[derive(Debug, Serialize)]
pub struct TraceSummary {
    pub lines: u64,
    pub events: usize,
    pub rejected: u64,
    pub skipped: u64,
    pub complete: bool,
    pub tasks: usize,
    pub cpus: usize,
    pub start: Option<TraceTime>,
    pub end: Option<TraceTime>,
    pub duration_ns: i64,
    pub migrations: usize,
    pub sched: ExtractStats,
    pub arena_chunks: usize,
    pub arena_bytes: usize,
}

impl Trace {
    /// Load a trace file, or standard input when `path` is `-`.
    pub fn load(path: &Path, config: &Config) -> Result<Self> {
        let trace = if path == Path::new("-") {
            Self::from_reader(io::stdin(), config).context("failed to read trace from stdin")?
        } else {
            let file = File::open(path)
                .with_context(|| format!("failed to open trace {}", path.display()))?;
            Self::from_reader(file, config)
                .with_context(|| format!("failed to load trace {}", path.display()))?
        };
        if let Some(err) = &trace.report.io_error {
            warn!(
                "{}: read stopped early ({err}), results cover the first {} lines",
                path.display(),
                trace.report.lines
            );
        }
        if trace.report.rejected > 0 {
            warn!(
                "{}: {} malformed lines skipped",
                path.display(),
                trace.report.rejected
            );
            for reject in &trace.report.rejects {
                warn!("  line {}: {}", reject.line, reject.reason);
            }
        }
        Ok(trace)
    }

    pub fn from_reader<R: Read + Send>(reader: R, config: &Config) -> Result<Self, Error> {
        let (store, report) = ingest(reader, config)?;
        let analysis = analyze(&store, config)?;
        Ok(Self {
            store,
            report,
            analysis,
        })
    }

    pub fn summary(&self) -> TraceSummary {
        let range = self.store.time_range();
        let (arena_chunks, arena_bytes) = self.store.arena_usage();
        TraceSummary {
            lines: self.report.lines,
            events: self.report.events,
            rejected: self.report.rejected,
            skipped: self.report.skipped,
            complete: self.report.is_complete(),
            tasks: self.analysis.sched.tasks.len(),
            cpus: self.store.cpu_count(),
            start: range.map(|w| w.start),
            end: range.map(|w| w.end),
            duration_ns: range.map_or(0, |w| w.duration()),
            migrations: self.analysis.migrations.len(),
            sched: self.analysis.sched.stats.clone(),
            arena_chunks,
            arena_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# tracer: nop").unwrap();
        writeln!(file, "a-1 [000] 1.0: sched_switch: prev_comm=a prev_pid=1 prev_prio=120 prev_state=S ==> next_comm=b next_pid=2 next_prio=120").unwrap();
        writeln!(file, "b-2 [000] 3.5: sched_switch: prev_comm=b prev_pid=2 prev_prio=120 prev_state=R ==> next_comm=a next_pid=1 next_prio=120").unwrap();
        file.flush().unwrap();

        let trace = Trace::load(file.path(), &Config::default()).unwrap();
        let summary = trace.summary();
        assert_eq!(summary.lines, 3);
        assert_eq!(summary.events, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.tasks, 2);
        assert_eq!(summary.cpus, 1);
        assert_eq!(summary.duration_ns, 2_500_000_000);
        assert_eq!(summary.sched.switches, 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Trace::load(Path::new("/nonexistent/trace.txt"), &Config::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("failed to open trace"));
    }
}
