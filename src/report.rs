//! Table and JSON rendering of query results.

use std::io::{self, Write};

use clap::ValueEnum;
use serde::Serialize;

use crate::migration::Migration;
use crate::stats::{format_occupancy, CpuStats, TaskStats};
use crate::task::Task;
use crate::trace::TraceSummary;

/// Maximum column width before truncation.
const MAX_COLUMN_WIDTH: usize = 50;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Nanoseconds as seconds with microsecond precision.
pub fn format_ns(ns: i64) -> String {
    let sign = if ns < 0 { "-" } else { "" };
    let ns = ns.unsigned_abs();
    format!("{sign}{}.{:06}", ns / 1_000_000_000, (ns % 1_000_000_000) / 1_000)
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width || width <= 3 {
        return value.to_string();
    }
    let kept: String = value.chars().take(width - 3).collect();
    format!("{kept}...")
}

/// Print rows as a `|`-separated table with a header line.
pub fn write_table<W: Write>(out: &mut W, headers: &[&str], rows: &[Vec<String>]) -> io::Result<()> {
    if rows.is_empty() {
        writeln!(out, "(no results)")?;
        return Ok(());
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, val) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(val.chars().count());
            }
        }
    }
    for w in &mut widths {
        *w = (*w).min(MAX_COLUMN_WIDTH);
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, &width)| format!("{h:width$}"))
        .collect();
    writeln!(out, "{}", header_line.join(" | ").trim_end())?;

    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(out, "{}", sep.join("-+-"))?;

    for row in rows {
        let row_line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(v, &width)| format!("{:width$}", truncate(v, width)))
            .collect();
        writeln!(out, "{}", row_line.join(" | ").trim_end())?;
    }
    Ok(())
}

pub fn write_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)
}

/// Row of the task listing.
#[derive(Debug, Serialize)]
pub struct TaskRow<'a> {
    pub pid: i32,
    pub name: &'a str,
    pub previous_names: Vec<&'a str>,
    pub alive: bool,
    pub parent: Option<i32>,
    pub cpus: Vec<u32>,
    pub points: usize,
}

impl<'a> From<&'a Task> for TaskRow<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            pid: task.pid,
            name: task.name(),
            previous_names: task.previous_names().collect(),
            alive: task.is_alive(),
            parent: task.parent,
            cpus: task.cpus().keys().copied().collect(),
            points: task.point_count(),
        }
    }
}

pub fn write_tasks<W: Write>(out: &mut W, tasks: &[&Task], format: OutputFormat) -> io::Result<()> {
    let rows: Vec<TaskRow<'_>> = tasks.iter().map(|&t| TaskRow::from(t)).collect();
    if format == OutputFormat::Json {
        return write_json(out, &rows);
    }
    let table: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.pid.to_string(),
                r.name.to_string(),
                r.previous_names.join(", "),
                if r.alive { "yes" } else { "no" }.to_string(),
                r.cpus.len().to_string(),
                r.points.to_string(),
            ]
        })
        .collect();
    write_table(
        out,
        &["PID", "NAME", "PREVIOUS NAMES", "ALIVE", "CPUS", "POINTS"],
        &table,
    )
}

pub fn write_task_stats<W: Write>(out: &mut W, stats: &[TaskStats], format: OutputFormat) -> io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, stats);
    }
    let table: Vec<Vec<String>> = stats
        .iter()
        .map(|s| {
            vec![
                s.pid.to_string(),
                s.name.clone(),
                format_ns(s.running_ns),
                format_occupancy(s.running_pct),
                format_ns(s.preempted_ns),
                format_ns(s.uninterruptible_ns),
                format_ns(s.waiting_ns),
                s.switch_ins.to_string(),
                s.wakeup_latency.count.to_string(),
                format_ns(s.wakeup_latency.mean_ns),
                format_ns(s.wakeup_latency.max_ns),
            ]
        })
        .collect();
    write_table(
        out,
        &[
            "PID", "NAME", "RUNNING", "BUSY", "PREEMPTED", "D-STATE", "WAITING", "SWITCHES",
            "WAKEUPS", "AVG LAT", "MAX LAT",
        ],
        &table,
    )
}

pub fn write_cpu_stats<W: Write>(out: &mut W, stats: &[CpuStats], format: OutputFormat) -> io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, stats);
    }
    let table: Vec<Vec<String>> = stats
        .iter()
        .map(|s| {
            vec![
                s.cpu.to_string(),
                format_ns(s.busy_ns),
                format_occupancy(s.busy_pct),
                format_ns(s.idle_ns),
                format_occupancy(s.idle_pct),
                s.tasks.to_string(),
                s.mean_freq_khz.map_or_else(|| "-".to_string(), |f| f.to_string()),
            ]
        })
        .collect();
    write_table(
        out,
        &["CPU", "BUSY", "BUSY %", "IDLE", "IDLE %", "TASKS", "AVG KHZ"],
        &table,
    )
}

pub fn write_migrations<W: Write>(out: &mut W, migrations: &[&Migration], format: OutputFormat) -> io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, migrations);
    }
    let cpu = |c: Option<u32>| c.map_or_else(|| "-".to_string(), |c| c.to_string());
    let table: Vec<Vec<String>> = migrations
        .iter()
        .map(|m| vec![m.time.to_string(), m.pid.to_string(), cpu(m.from), cpu(m.to)])
        .collect();
    write_table(out, &["TIME", "PID", "FROM", "TO"], &table)
}

pub fn write_summary<W: Write>(out: &mut W, summary: &TraceSummary, format: OutputFormat) -> io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, summary);
    }
    let time = |t: Option<crate::time::TraceTime>| t.map_or_else(|| "-".to_string(), |t| t.to_string());
    writeln!(
        out,
        "{} events from {} lines ({} rejected, {} skipped{})",
        summary.events,
        summary.lines,
        summary.rejected,
        summary.skipped,
        if summary.complete { "" } else { ", incomplete" }
    )?;
    writeln!(
        out,
        "{} tasks on {} cpus, {} .. {} ({} s)",
        summary.tasks,
        summary.cpus,
        time(summary.start),
        time(summary.end),
        format_ns(summary.duration_ns)
    )?;
    writeln!(
        out,
        "{} switches, {} wakeups, {} migrations",
        summary.sched.switches, summary.sched.wakeups, summary.migrations
    )
}
