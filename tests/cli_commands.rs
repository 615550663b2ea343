//! Integration tests for the schedlens CLI subcommands.

mod common;

use std::process::{Command, Output};

use common::{secs, TraceBuilder};
use tempfile::NamedTempFile;

/// Run schedlens with the given arguments, returning the full Output.
fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_schedlens"))
        .args(args)
        .output()
        .expect("Failed to run schedlens")
}

fn stdout_of(args: &[&str]) -> String {
    let output = run(args);
    assert!(
        output.status.success(),
        "schedlens {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("utf-8 output")
}

fn sample_trace() -> NamedTempFile {
    let mut b = TraceBuilder::new();
    b.raw("# tracer: nop")
        .wakeup(secs(0), 0, ("<idle>", 0), ("worker", 42))
        .switch(secs(1), 0, ("<idle>", 0), "R", ("worker", 42))
        .line(
            ("worker", 42),
            0,
            secs(2),
            "sched_migrate_task",
            "comm=helper pid=43 prio=120 orig_cpu=1 dest_cpu=0",
        )
        .switch(secs(3), 0, ("worker", 42), "S", ("<idle>", 0))
        .line(("<idle>", 0), 0, secs(4), "cpu_frequency", "state=1200000 cpu_id=0");
    b.write_temp()
}

#[test]
fn test_tasks_table() {
    let trace = sample_trace();
    let out = stdout_of(&["tasks", trace.path().to_str().unwrap()]);
    let mut lines = out.lines();
    assert!(lines.next().unwrap().starts_with("PID"));
    assert!(out.contains("worker"));
}

#[test]
fn test_tasks_name_filter() {
    let trace = sample_trace();
    let out = stdout_of(&[
        "tasks",
        trace.path().to_str().unwrap(),
        "--name",
        "^work",
        "--format",
        "json",
    ]);
    let rows: serde_json::Value = serde_json::from_str(&out).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["pid"], 42);
}

#[test]
fn test_stats_for_pid() {
    let trace = sample_trace();
    let out = stdout_of(&[
        "stats",
        trace.path().to_str().unwrap(),
        "--pid",
        "42",
        "--start",
        "0",
        "--end",
        "4",
        "--format",
        "json",
    ]);
    let stats: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(stats[0]["running_ns"], 2_000_000_000i64);
    assert_eq!(stats[0]["running_pct"], 5000);
    assert_eq!(stats[0]["wakeup_latency"]["count"], 1);
}

#[test]
fn test_stats_unknown_pid_fails() {
    let trace = sample_trace();
    let output = run(&["stats", trace.path().to_str().unwrap(), "--pid", "999"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no task with pid 999"));
}

#[test]
fn test_cpus_table() {
    let trace = sample_trace();
    let out = stdout_of(&["cpus", trace.path().to_str().unwrap()]);
    assert!(out.contains("50.00%"), "{out}");
}

#[test]
fn test_migrations_json() {
    let trace = sample_trace();
    let out = stdout_of(&[
        "migrations",
        trace.path().to_str().unwrap(),
        "--format",
        "json",
    ]);
    let rows: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["pid"], 43);
    assert_eq!(rows[0]["from"], 1);
    assert_eq!(rows[0]["to"], 0);
}

#[test]
fn test_events_filter_round_trips_lines() {
    let trace = sample_trace();
    let out = stdout_of(&[
        "events",
        trace.path().to_str().unwrap(),
        "--event",
        "sched_switch",
        "--start",
        "2",
    ]);
    assert_eq!(
        out.trim_end(),
        "worker-42 [000] 3.000000: sched_switch: prev_comm=worker prev_pid=42 prev_prio=120 prev_state=S ==> next_comm=<idle> next_pid=0 next_prio=120"
    );
}

#[test]
fn test_summary() {
    let trace = sample_trace();
    let out = stdout_of(&["summary", trace.path().to_str().unwrap(), "-f", "json"]);
    let summary: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(summary["events"], 5);
    assert_eq!(summary["skipped"], 1);
    assert_eq!(summary["complete"], true);
}

#[test]
fn test_oversized_ingest_flags_rejected() {
    let trace = sample_trace();
    let path = trace.path().to_str().unwrap();
    for flag in ["--batch-kib", "--chunk-mib"] {
        let output = run(&["summary", path, flag, "18446744073709551615"]);
        assert!(!output.status.success(), "{flag}");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("invalid value"), "{flag}: {stderr}");
        assert!(!stderr.contains("panicked"), "{flag}: {stderr}");
    }
}

#[test]
fn test_missing_trace_fails() {
    let output = run(&["tasks", "/nonexistent/trace.txt"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to open trace"));
}
