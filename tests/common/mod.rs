//! Common test utilities for schedlens integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use schedlens::TraceTime;
use tempfile::NamedTempFile;

/// Builds ftrace text in the canonical form the store renders back.
#[derive(Default)]
pub struct TraceBuilder {
    lines: Vec<String>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(
        &mut self,
        task: (&str, i32),
        cpu: u32,
        time: TraceTime,
        event: &str,
        args: &str,
    ) -> &mut Self {
        let mut line = format!("{}-{} [{:03}] {}: {}:", task.0, task.1, cpu, time, event);
        if !args.is_empty() {
            line.push(' ');
            line.push_str(args);
        }
        self.lines.push(line);
        self
    }

    pub fn switch(
        &mut self,
        time: TraceTime,
        cpu: u32,
        prev: (&str, i32),
        prev_state: &str,
        next: (&str, i32),
    ) -> &mut Self {
        let args = format!(
            "prev_comm={} prev_pid={} prev_prio=120 prev_state={} ==> next_comm={} next_pid={} next_prio=120",
            prev.0, prev.1, prev_state, next.0, next.1
        );
        self.line(prev, cpu, time, "sched_switch", &args)
    }

    pub fn wakeup(&mut self, time: TraceTime, cpu: u32, waker: (&str, i32), woken: (&str, i32)) -> &mut Self {
        let args = format!(
            "comm={} pid={} prio=120 target_cpu={:03}",
            woken.0, woken.1, cpu
        );
        self.line(waker, cpu, time, "sched_wakeup", &args)
    }

    pub fn raw(&mut self, line: &str) -> &mut Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }

    pub fn write_temp(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp trace");
        file.write_all(self.text().as_bytes())
            .expect("write temp trace");
        file.flush().expect("flush temp trace");
        file
    }
}

pub fn secs(s: i64) -> TraceTime {
    TraceTime::from_secs(s)
}

fn task_name(pid: i32) -> String {
    if pid == 0 {
        "<idle>".to_string()
    } else {
        format!("task{pid}")
    }
}

/// A consistent random schedule: every switch-out names the task that is
/// actually running on that CPU, timestamps increase, and woken tasks are
/// woken before they are switched in.
pub fn random_schedule(seed: u64, cpus: u32, tasks: i32, steps: usize) -> TraceBuilder {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut builder = TraceBuilder::new();
    let mut current: HashMap<u32, i32> = (0..cpus).map(|c| (c, 0)).collect();
    let mut now = TraceTime::from_secs(100).as_nanos();

    for _ in 0..steps {
        now += rng.random_range(1_000..500_000);
        let cpu = rng.random_range(0..cpus);
        let prev = current[&cpu];
        let busy: Vec<i32> = current.values().copied().collect();
        let next = if rng.random_bool(0.2) {
            0
        } else {
            let pick = rng.random_range(1..=tasks);
            if busy.contains(&pick) {
                0
            } else {
                pick
            }
        };
        if next == prev {
            continue;
        }
        let prev_name = task_name(prev);
        let next_name = task_name(next);
        if next != 0 && rng.random_bool(0.5) {
            builder.wakeup(
                TraceTime::from_nanos(now),
                cpu,
                (prev_name.as_str(), prev),
                (next_name.as_str(), next),
            );
            now += rng.random_range(1_000..50_000);
        }
        let state = ["S", "R", "D", "R+"][rng.random_range(0..4)];
        builder.switch(
            TraceTime::from_nanos(now),
            cpu,
            (prev_name.as_str(), prev),
            state,
            (next_name.as_str(), next),
        );
        current.insert(cpu, next);
    }
    builder
}
