use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use regex::Regex;

use schedlens::config::Config;
use schedlens::filter::EventFilter;
use schedlens::report::{self, OutputFormat};
use schedlens::stats::{self, QueryContext};
use schedlens::{TraceTime, Trace};

const MAX_BATCH_KIB: u64 = (schedlens::config::MAX_BATCH_BYTES >> 10) as u64;
const MAX_CHUNK_MIB: u64 = 4096;

/// `value << shift` in bytes, saturating at the address space.
fn scaled(value: u64, shift: u32) -> usize {
    usize::try_from(value)
        .unwrap_or(usize::MAX)
        .saturating_mul(1 << shift)
}

#[derive(Debug, Parser)]
#[command(name = "schedlens")]
#[command(about = "Scheduler analysis of ftrace text traces")]
#[command(version)]
struct Command {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    ingest: IngestArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct IngestArgs {
    /// Line batches in flight between the reader and parser threads
    #[arg(long, default_value_t = schedlens::config::DEFAULT_BUFFERS, global = true)]
    buffers: usize,
    /// Capacity of one line batch in KiB
    #[arg(
        long,
        default_value_t = 1024,
        global = true,
        value_parser = clap::value_parser!(u64).range(1..=MAX_BATCH_KIB)
    )]
    batch_kib: u64,
    /// Size of one string arena chunk in MiB
    #[arg(
        long,
        default_value_t = 16,
        global = true,
        value_parser = clap::value_parser!(u64).range(1..=MAX_CHUNK_MIB)
    )]
    chunk_mib: u64,
}

#[derive(Debug, Args)]
struct WindowArgs {
    /// Window start in trace seconds
    #[arg(long)]
    start: Option<TraceTime>,
    /// Window end in trace seconds
    #[arg(long)]
    end: Option<TraceTime>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List tasks sorted by name
    Tasks {
        /// Trace file, or - for stdin
        trace: PathBuf,
        /// Only tasks whose name matches this regex
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Per-task running time, occupancy and wakeup latency
    Stats {
        trace: PathBuf,
        #[arg(short, long)]
        pid: Option<i32>,
        #[command(flatten)]
        window: WindowArgs,
        /// Number of busiest tasks to show
        #[arg(long, default_value = "20")]
        top: usize,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Per-CPU busy and idle time
    Cpus {
        trace: PathBuf,
        #[command(flatten)]
        window: WindowArgs,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Task movements between CPUs
    Migrations {
        trace: PathBuf,
        #[arg(short, long)]
        pid: Option<i32>,
        #[command(flatten)]
        window: WindowArgs,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Print matching events in trace line form
    Events {
        trace: PathBuf,
        #[arg(short, long)]
        pid: Vec<i32>,
        #[arg(short, long)]
        cpu: Vec<u32>,
        /// Event name, e.g. sched_switch
        #[arg(short, long)]
        event: Vec<String>,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Ingestion and extraction summary
    Summary {
        trace: PathBuf,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

impl Command {
    fn config(&self) -> Config {
        Config {
            verbosity: self.verbose,
            buffers: self.ingest.buffers,
            batch_bytes: scaled(self.ingest.batch_kib, 10),
            chunk_size: scaled(self.ingest.chunk_mib, 20),
            ..Config::default()
        }
    }
}

fn query_context(trace: &Trace, window: &WindowArgs) -> QueryContext {
    QueryContext::bounded(&trace.store, window.start, window.end)
}

fn run(opts: Command, config: &Config) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match opts.command {
        Commands::Tasks {
            trace,
            name,
            format,
        } => {
            let re = name
                .as_deref()
                .map(Regex::new)
                .transpose()
                .context("invalid --name regex")?;
            let trace = Trace::load(&trace, config)?;
            let tasks = trace.analysis.sched.tasks.listing(re.as_ref());
            report::write_tasks(&mut out, &tasks, format)?;
        }
        Commands::Stats {
            trace,
            pid,
            window,
            top,
            format,
        } => {
            let trace = Trace::load(&trace, config)?;
            let ctx = query_context(&trace, &window);
            let tasks = &trace.analysis.sched.tasks;
            let stats = match pid {
                Some(pid) => {
                    let Some(task) = tasks.get(pid) else {
                        bail!("no task with pid {pid} in trace");
                    };
                    vec![stats::task_stats(task, &ctx)]
                }
                None => stats::top_tasks(tasks, &ctx, top),
            };
            report::write_task_stats(&mut out, &stats, format)?;
        }
        Commands::Cpus {
            trace,
            window,
            format,
        } => {
            let trace = Trace::load(&trace, config)?;
            let ctx = query_context(&trace, &window);
            let stats = stats::cpu_stats(&trace.analysis, &ctx);
            report::write_cpu_stats(&mut out, &stats, format)?;
        }
        Commands::Migrations {
            trace,
            pid,
            window,
            format,
        } => {
            let trace = Trace::load(&trace, config)?;
            let ctx = query_context(&trace, &window);
            let migrations: Vec<_> = trace
                .analysis
                .migrations
                .in_window(ctx.window(), pid)
                .collect();
            report::write_migrations(&mut out, &migrations, format)?;
        }
        Commands::Events {
            trace,
            pid,
            cpu,
            event,
            window,
        } => {
            let trace = Trace::load(&trace, config)?;
            let mut filter = EventFilter {
                pids: pid,
                cpus: cpu,
                events: event,
                ..EventFilter::default()
            };
            if window.start.is_some() || window.end.is_some() {
                filter = filter.window(query_context(&trace, &window).window());
            }
            for idx in filter.apply(&trace.store) {
                writeln!(out, "{}", trace.store.view(idx))?;
            }
        }
        Commands::Summary { trace, format } => {
            let trace = Trace::load(&trace, config)?;
            report::write_summary(&mut out, &trace.summary(), format)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let opts = Command::parse();
    let config = opts.config();
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();

    run(opts, &config)
}
