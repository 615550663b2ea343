//! On-demand statistics over a query window.
//!
//! Percentages are expressed in hundredths of a percent (`5000` is 50.00%)
//! and rounded half up, computed exactly in integers.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::analysis::Analysis;
use crate::sched::IDLE_PID;
use crate::store::EventStore;
use crate::task::{Latency, Task, TaskIndex, TaskState};
use crate::time::{TraceTime, Window};

/// Occupancy of a fully busy window.
pub const FULL_OCCUPANCY: u32 = 10_000;

/// `floor(10000 * part / whole + 0.5)`, zero for an empty `whole`.
pub fn occupancy(part: i64, whole: i64) -> u32 {
    if whole <= 0 || part <= 0 {
        return 0;
    }
    let (part, whole) = (i128::from(part), i128::from(whole));
    let scaled = (part * 20_000 + whole) / (2 * whole);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// `5000` -> `50.00%`
pub fn format_occupancy(hundredths: u32) -> String {
    format!("{}.{:02}%", hundredths / 100, hundredths % 100)
}

/// The interval a query covers, plus the pair of cursors it was set from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryContext {
    window: Window,
    cursors: Option<(TraceTime, TraceTime)>,
}

impl QueryContext {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            cursors: None,
        }
    }

    /// The whole trace, or an empty window for an empty store.
    pub fn whole(store: &EventStore) -> Self {
        Self::new(
            store
                .time_range()
                .unwrap_or(Window::new(TraceTime::ZERO, TraceTime::ZERO)),
        )
    }

    /// The trace range narrowed by optional bounds.
    pub fn bounded(store: &EventStore, start: Option<TraceTime>, end: Option<TraceTime>) -> Self {
        let whole = Self::whole(store).window;
        Self::new(Window::new(
            start.unwrap_or(whole.start),
            end.unwrap_or(whole.end),
        ))
    }

    /// Window between two cursors placed in either order.
    pub fn from_cursors(a: TraceTime, b: TraceTime) -> Self {
        Self {
            window: Window::between(a, b),
            cursors: Some((a, b)),
        }
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn cursors(&self) -> Option<(TraceTime, TraceTime)> {
        self.cursors
    }

    pub fn duration(&self) -> i64 {
        self.window.duration()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub min_ns: i64,
    pub max_ns: i64,
    pub mean_ns: i64,
}

impl LatencySummary {
    pub fn from_latencies<'a>(latencies: impl IntoIterator<Item = &'a Latency>) -> Self {
        let mut summary = LatencySummary::default();
        let mut total: i128 = 0;
        for latency in latencies {
            let delay = latency.delay();
            if summary.count == 0 {
                summary.min_ns = delay;
                summary.max_ns = delay;
            } else {
                summary.min_ns = summary.min_ns.min(delay);
                summary.max_ns = summary.max_ns.max(delay);
            }
            summary.count += 1;
            total += i128::from(delay);
        }
        if summary.count > 0 {
            summary.mean_ns = (total / summary.count as i128) as i64;
        }
        summary
    }
}

/// Running time of a task on one CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CpuShare {
    pub cpu: u32,
    pub running_ns: i64,
    pub running_pct: u32,
}

/// Statistics snapshot of one task.
#[derive(Clone, Debug, Serialize)]
pub struct TaskStats {
    pub pid: i32,
    pub name: String,
    pub alive: bool,
    pub window: Window,
    pub running_ns: i64,
    pub running_pct: u32,
    pub preempted_ns: i64,
    pub uninterruptible_ns: i64,
    pub waiting_ns: i64,
    pub switch_ins: usize,
    pub wakeup_latency: LatencySummary,
    pub cpus: Vec<CpuShare>,
}

pub fn task_stats(task: &Task, ctx: &QueryContext) -> TaskStats {
    let window = ctx.window();
    let duration = ctx.duration();
    let cpus: Vec<CpuShare> = task
        .cpus()
        .iter()
        .map(|(&cpu, ct)| {
            let running_ns = ct.running_time(window);
            CpuShare {
                cpu,
                running_ns,
                running_pct: occupancy(running_ns, duration),
            }
        })
        .filter(|share| share.running_ns > 0)
        .collect();
    let running_ns = task.running_time(window);
    let timeline = task.timeline();

    TaskStats {
        pid: task.pid,
        name: task.name().to_string(),
        alive: task.is_alive(),
        window,
        running_ns,
        running_pct: occupancy(running_ns, duration),
        preempted_ns: timeline.time_in(TaskState::Preempted, window),
        uninterruptible_ns: timeline.time_in(TaskState::Uninterruptible, window),
        waiting_ns: timeline.time_in(TaskState::Waiting, window),
        switch_ins: task.cpus().values().map(|ct| ct.switch_ins(window)).sum(),
        wakeup_latency: LatencySummary::from_latencies(
            task.latencies()
                .iter()
                .filter(|l| !window.is_empty() && window.contains(l.woken)),
        ),
        cpus,
    }
}

/// The `n` tasks that ran longest in the window, idle excluded.
pub fn top_tasks(tasks: &TaskIndex, ctx: &QueryContext, n: usize) -> Vec<TaskStats> {
    let mut stats: Vec<TaskStats> = tasks
        .iter()
        .filter(|t| t.pid != IDLE_PID && t.point_count() > 0)
        .map(|t| task_stats(t, ctx))
        .filter(|s| s.running_ns > 0)
        .collect();
    stats.sort_by(|a, b| b.running_ns.cmp(&a.running_ns).then(a.pid.cmp(&b.pid)));
    stats.truncate(n);
    stats
}

/// Statistics snapshot of one CPU.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CpuStats {
    pub cpu: u32,
    pub busy_ns: i64,
    pub busy_pct: u32,
    pub idle_ns: i64,
    pub idle_pct: u32,
    /// Tasks other than idle that ran in the window.
    pub tasks: usize,
    pub mean_freq_khz: Option<u64>,
}

pub fn cpu_stats(analysis: &Analysis, ctx: &QueryContext) -> Vec<CpuStats> {
    let window = ctx.window();
    let duration = ctx.duration();
    let mut cpus: BTreeMap<u32, CpuStats> = BTreeMap::new();

    for task in analysis.sched.tasks.iter() {
        for (&cpu, ct) in task.cpus() {
            let entry = cpus.entry(cpu).or_insert_with(|| CpuStats {
                cpu,
                ..CpuStats::default()
            });
            let running = ct.running_time(window);
            if task.pid == IDLE_PID {
                entry.idle_ns += running;
            } else if running > 0 {
                entry.busy_ns += running;
                entry.tasks += 1;
            }
        }
    }
    for &cpu in analysis.cpu_series.frequency.keys() {
        cpus.entry(cpu).or_insert_with(|| CpuStats {
            cpu,
            ..CpuStats::default()
        });
    }

    cpus.into_values()
        .map(|mut stats| {
            stats.busy_pct = occupancy(stats.busy_ns, duration);
            stats.idle_pct = occupancy(stats.idle_ns, duration);
            stats.mean_freq_khz = analysis
                .cpu_series
                .frequency
                .get(&stats.cpu)
                .and_then(|series| series.mean(window));
            stats
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::config::Config;
    use crate::pipeline::ingest;

    fn secs(s: i64) -> TraceTime {
        TraceTime::from_secs(s)
    }

    fn analysis_of(text: &str) -> (EventStore, Analysis) {
        let config = Config::default();
        let (store, _) = ingest(text.as_bytes(), &config).unwrap();
        let analysis = analyze(&store, &config).unwrap();
        (store, analysis)
    }

    const TRACE: &str = "\
<idle>-0 [000] 0.000000: sched_wakeup: comm=worker pid=42 prio=120 target_cpu=000
<idle>-0 [000] 1.000000: sched_switch: prev_comm=swapper/0 prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=worker next_pid=42 next_prio=120
worker-42 [000] 3.000000: sched_switch: prev_comm=worker prev_pid=42 prev_prio=120 prev_state=S ==> next_comm=swapper/0 next_pid=0 next_prio=120
<idle>-0 [000] 4.000000: cpu_frequency: state=1000000 cpu_id=0
";

    #[test]
    fn test_occupancy_rounding() {
        assert_eq!(occupancy(1, 2), 5000);
        assert_eq!(occupancy(1, 3), 3333);
        assert_eq!(occupancy(2, 3), 6667);
        assert_eq!(occupancy(1, 20_000), 1);
        assert_eq!(occupancy(1, 20_001), 0);
        assert_eq!(occupancy(5, 5), FULL_OCCUPANCY);
        assert_eq!(occupancy(5, 0), 0);
        assert_eq!(occupancy(5, -1), 0);
        assert_eq!(format_occupancy(5000), "50.00%");
        assert_eq!(format_occupancy(7), "0.07%");
    }

    #[test]
    fn test_task_running_half_the_window() {
        let (_, analysis) = analysis_of(TRACE);
        let task = analysis.sched.tasks.get(42).unwrap();
        let ctx = QueryContext::new(Window::new(secs(0), secs(4)));
        let stats = task_stats(task, &ctx);
        assert_eq!(stats.running_ns, secs(2).as_nanos());
        assert_eq!(stats.running_pct, 5000);
        assert_eq!(stats.switch_ins, 1);
        assert_eq!(stats.waiting_ns, secs(1).as_nanos());
        assert_eq!(stats.wakeup_latency.count, 1);
        assert_eq!(stats.wakeup_latency.mean_ns, secs(1).as_nanos());
        assert_eq!(stats.cpus.len(), 1);
    }

    #[test]
    fn test_degenerate_windows_are_zero() {
        let (_, analysis) = analysis_of(TRACE);
        let task = analysis.sched.tasks.get(42).unwrap();
        for window in [
            Window::new(secs(3), secs(1)),
            Window::new(secs(2), secs(2)),
            Window::new(secs(5), secs(9)),
            Window::new(secs(-3), secs(0)),
        ] {
            let stats = task_stats(task, &QueryContext::new(window));
            assert_eq!(stats.running_ns, 0, "{window:?}");
            assert_eq!(stats.running_pct, 0, "{window:?}");
        }
    }

    #[test]
    fn test_cursors_in_either_order() {
        let (_, analysis) = analysis_of(TRACE);
        let task = analysis.sched.tasks.get(42).unwrap();
        let a = task_stats(task, &QueryContext::from_cursors(secs(4), secs(2)));
        assert_eq!(a.running_ns, secs(1).as_nanos());
        assert_eq!(a.running_pct, 5000);
    }

    #[test]
    fn test_top_tasks_excludes_idle() {
        let (store, analysis) = analysis_of(TRACE);
        let top = top_tasks(&analysis.sched.tasks, &QueryContext::whole(&store), 10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].pid, 42);
    }

    #[test]
    fn test_cpu_stats() {
        let (store, analysis) = analysis_of(TRACE);
        let stats = cpu_stats(&analysis, &QueryContext::whole(&store));
        assert_eq!(stats.len(), 1);
        let cpu0 = &stats[0];
        assert_eq!(cpu0.busy_ns, secs(2).as_nanos());
        assert_eq!(cpu0.busy_pct, 5000);
        // Idle seeded at 0.0, out at 1.0, back in at 3.0 until the last event.
        assert_eq!(cpu0.idle_ns, secs(2).as_nanos());
        assert_eq!(cpu0.tasks, 1);
        assert_eq!(cpu0.mean_freq_khz, None);
    }

    #[test]
    fn test_cpu_stats_quiet_cpu_stays_busy() {
        let text = "\
<idle>-0 [000] 0.0: sched_switch: prev_comm=swapper/0 prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=a next_pid=5 next_prio=120
<idle>-0 [001] 0.0: sched_switch: prev_comm=swapper/1 prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=hog next_pid=7 next_prio=120
a-5 [000] 4.0: sched_switch: prev_comm=a prev_pid=5 prev_prio=120 prev_state=S ==> next_comm=swapper/0 next_pid=0 next_prio=120
<idle>-0 [000] 8.0: cpu_idle: state=1 cpu_id=0
";
        let (store, analysis) = analysis_of(text);
        let ctx = QueryContext::whole(&store);
        let stats = cpu_stats(&analysis, &ctx);
        assert_eq!(stats.len(), 2);
        for cpu in &stats {
            assert_eq!(cpu.busy_ns + cpu.idle_ns, ctx.duration(), "cpu {}", cpu.cpu);
        }
        assert_eq!(stats[1].busy_ns, secs(8).as_nanos());
        assert_eq!(stats[1].busy_pct, FULL_OCCUPANCY);
    }

    #[test]
    fn test_latency_summary() {
        let lat = |w: i64, s: i64| Latency {
            woken: secs(w),
            scheduled: secs(s),
            cpu: 0,
        };
        let all = [lat(0, 1), lat(1, 4), lat(2, 4)];
        let summary = LatencySummary::from_latencies(&all);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min_ns, secs(1).as_nanos());
        assert_eq!(summary.max_ns, secs(3).as_nanos());
        assert_eq!(summary.mean_ns, secs(2).as_nanos());
        assert_eq!(LatencySummary::from_latencies(&Vec::<Latency>::new()), LatencySummary::default());
    }
}
