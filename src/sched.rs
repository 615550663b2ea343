//! Schedule-state extraction.
//!
//! One pass over the event store turns scheduler events into per-task,
//! per-CPU running sequences, task state timelines and wakeup latencies.
//!
//! `sched_switch` is understood in both the key=value form
//!
//! ```text
//! prev_comm=bash prev_pid=1234 prev_prio=120 prev_state=S ==> next_comm=cat next_pid=88 next_prio=120
//! ```
//!
//! and the older positional form
//!
//! ```text
//! bash:1234 [120] S ==> cat:88 [120]
//! ```

use std::borrow::Cow;
use std::collections::HashMap;

use log::{debug, warn};
use serde::Serialize;

use crate::config::Config;
use crate::event::{parse_int, ArgList, Event, EventIdx, EventKind, ABSURD_INT, SWITCH_ARROW};
use crate::store::EventStore;
use crate::task::{Latency, TaskIndex, TaskState};
use crate::time::TraceTime;

/// Pid of the per-CPU idle task.
pub const IDLE_PID: i32 = 0;

/// Counters gathered while extracting.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ExtractStats {
    pub switches: u64,
    pub wakeups: u64,
    pub forks: u64,
    pub exits: u64,
    pub renames: u64,
    /// Scheduling points older than the last point of their CPU-Task.
    pub out_of_order: u64,
    /// Scheduler events whose arguments could not be read.
    pub malformed: u64,
}

/// Reconstructed scheduling state of a whole trace.
#[derive(Clone, Debug, Default)]
pub struct SchedModel {
    pub tasks: TaskIndex,
    pub stats: ExtractStats,
}

#[derive(Clone, Copy)]
struct CpuBounds {
    first: (EventIdx, TraceTime),
    last: (EventIdx, TraceTime),
}

struct Switch<'s> {
    prev_comm: Cow<'s, str>,
    prev_pid: i32,
    prev_state: &'s str,
    next_comm: Cow<'s, str>,
    next_pid: i32,
}

/// `comm:pid [prio] ...` as found on either side of a positional switch.
fn positional_task<'s>(side: ArgList<'_, 's>) -> Option<(Cow<'s, str>, i32, Option<&'s str>)> {
    let prio = side.iter().position(|tok| tok.starts_with('['));
    let name_end = prio.unwrap_or(1).min(side.len());
    if name_end == 0 {
        return None;
    }
    let (comm, pid) = if name_end == 1 {
        let (comm, pid) = side.get(0)?.rsplit_once(':')?;
        (Cow::Borrowed(comm), parse_int(pid))
    } else {
        // Names with spaces span several tokens.
        let joined = side.iter().take(name_end).collect::<Vec<_>>().join(" ");
        let (comm, pid) = joined.rsplit_once(':')?;
        (Cow::Owned(comm.to_string()), parse_int(pid))
    };
    let state = side
        .iter()
        .skip(name_end)
        .filter(|tok| !tok.starts_with('['))
        .last();
    Some((comm, pid, state))
}

fn parse_switch<'s>(args: ArgList<'_, 's>) -> Option<Switch<'s>> {
    if args.value("prev_pid").is_some() {
        return Some(Switch {
            prev_comm: args.text("prev_comm").unwrap_or_default(),
            prev_pid: args.int("prev_pid"),
            prev_state: args.value("prev_state").unwrap_or(""),
            next_comm: args.text("next_comm").unwrap_or_default(),
            next_pid: args.int("next_pid"),
        });
    }
    let (prev, next) = args.split_around(args.position(SWITCH_ARROW)?);
    let (prev_comm, prev_pid, prev_state) = positional_task(prev)?;
    let (next_comm, next_pid, _) = positional_task(next)?;
    Some(Switch {
        prev_comm,
        prev_pid,
        prev_state: prev_state.unwrap_or(""),
        next_comm,
        next_pid,
    })
}

/// `comm` and `pid` of the task an event is about, falling back to the
/// positional form and then to the event's own task.
fn subject<'s>(args: ArgList<'_, 's>, ev: &Event, header: &'s str) -> (Cow<'s, str>, i32) {
    if args.value("pid").is_some() {
        return (args.text("comm").unwrap_or_default(), args.int("pid"));
    }
    match positional_task(args) {
        Some((comm, pid, _)) => (comm, pid),
        None => (Cow::Borrowed(header), ev.pid),
    }
}

struct Extractor {
    tasks: TaskIndex,
    stats: ExtractStats,
    cpus: HashMap<u32, CpuBounds>,
}

impl Extractor {
    fn note_cpu(&mut self, idx: EventIdx, ev: &Event) {
        let point = (idx, ev.time);
        self.cpus
            .entry(ev.cpu)
            .and_modify(|b| {
                if ev.time >= b.last.1 {
                    b.last = point;
                }
            })
            .or_insert(CpuBounds {
                first: point,
                last: point,
            });
    }

    /// Make sure `pid` is indexed, starting a new name generation when its
    /// name changed. The idle task shows a different name on every CPU and
    /// is never renamed.
    fn note_task(&mut self, pid: i32, name: &str) {
        let task = self.tasks.entry(pid, name);
        if pid != IDLE_PID && task.rename(name) {
            self.stats.renames += 1;
        }
    }

    fn switch(&mut self, idx: EventIdx, ev: &Event, args: ArgList<'_, '_>) {
        let Some(sw) = parse_switch(args) else {
            self.stats.malformed += 1;
            return;
        };
        if sw.prev_pid == ABSURD_INT || sw.next_pid == ABSURD_INT {
            self.stats.malformed += 1;
            return;
        }
        self.stats.switches += 1;
        let seed = self.cpus.get(&ev.cpu).map(|b| b.first);

        self.note_task(sw.prev_pid, &sw.prev_comm);
        let state = TaskState::from_prev_state(sw.prev_state);
        let task = self.tasks.entry(sw.prev_pid, &sw.prev_comm);
        let cpu_task = task.cpu_mut(ev.cpu);
        let mut seeded_at = None;
        if cpu_task.is_empty() {
            // Running since before the CPU's first event.
            if let Some((first, at)) = seed.filter(|&(_, at)| at <= ev.time) {
                cpu_task.push(first, at, true);
                seeded_at = Some(at);
            }
        }
        if cpu_task.push(idx, ev.time, false) {
            if let Some(at) = seeded_at {
                task.timeline_mut().push(at, TaskState::Running);
            }
            task.timeline_mut().push(ev.time, state);
            if state == TaskState::Exited {
                task.set_alive(false);
                task.exit_time.get_or_insert(ev.time);
            }
        } else {
            self.stats.out_of_order += 1;
        }

        self.note_task(sw.next_pid, &sw.next_comm);
        let task = self.tasks.entry(sw.next_pid, &sw.next_comm);
        if task.cpu_mut(ev.cpu).push(idx, ev.time, true) {
            if let Some(woken) = task.pending_wakeup.take() {
                if ev.time >= woken {
                    task.push_latency(Latency {
                        woken,
                        scheduled: ev.time,
                        cpu: ev.cpu,
                    });
                }
            }
            task.timeline_mut().push(ev.time, TaskState::Running);
        } else {
            self.stats.out_of_order += 1;
        }
    }

    fn wakeup(&mut self, ev: &Event, args: ArgList<'_, '_>, header: &str) {
        let (comm, pid) = subject(args, ev, header);
        if pid == ABSURD_INT {
            self.stats.malformed += 1;
            return;
        }
        self.stats.wakeups += 1;
        self.note_task(pid, &comm);
        let task = self.tasks.entry(pid, &comm);
        if ev.kind == EventKind::SchedWakeupNew {
            task.set_alive(true);
        }
        match task.timeline().current() {
            Some(TaskState::Running | TaskState::Preempted | TaskState::Waiting) => {}
            _ => {
                task.timeline_mut().push(ev.time, TaskState::Waiting);
                task.pending_wakeup.get_or_insert(ev.time);
            }
        }
    }

    fn exit(&mut self, ev: &Event, args: ArgList<'_, '_>, header: &str) {
        let (comm, pid) = subject(args, ev, header);
        if pid == ABSURD_INT {
            self.stats.malformed += 1;
            return;
        }
        self.stats.exits += 1;
        let task = self.tasks.entry(pid, &comm);
        task.set_alive(false);
        task.exit_time = Some(ev.time);
        task.pending_wakeup = None;
        task.timeline_mut().push(ev.time, TaskState::Exited);
    }

    fn fork(&mut self, ev: &Event, args: ArgList<'_, '_>, header: &str) {
        let (parent_comm, parent) = subject(args, ev, header);
        let child = args.int("child_pid");
        if parent == ABSURD_INT || child == ABSURD_INT {
            self.stats.malformed += 1;
            return;
        }
        self.stats.forks += 1;
        let child_comm = args.text("child_comm").unwrap_or(parent_comm);
        self.note_task(child, &child_comm);
        let task = self.tasks.entry(child, &child_comm);
        if !task.is_alive() {
            // Pid reuse.
            task.set_alive(true);
            task.exit_time = None;
        }
        task.parent = Some(parent);
    }

    /// Close every sequence at the end of the trace. A task still running
    /// on a CPU that went quiet keeps running until the last event of the
    /// whole trace, like its timeline.
    fn finish(mut self) -> SchedModel {
        let trace_end = self.cpus.values().map(|b| b.last).max_by_key(|&(idx, at)| (at, idx));
        if let Some((idx, end)) = trace_end {
            for task in self.tasks.tasks_mut() {
                for (_, cpu_task) in task.cpus_mut() {
                    if cpu_task.is_running() {
                        cpu_task.push(idx, end, false);
                    }
                }
                task.timeline_mut().close(end);
            }
        }
        SchedModel {
            tasks: self.tasks,
            stats: self.stats,
        }
    }
}

/// Build the scheduling model of everything in `store`.
pub fn extract(store: &EventStore, config: &Config) -> SchedModel {
    let mut ex = Extractor {
        tasks: TaskIndex::new(config.name_history),
        stats: ExtractStats::default(),
        cpus: HashMap::new(),
    };
    let mut buf = Vec::with_capacity(16);
    for (idx, ev) in store.iter() {
        ex.note_cpu(idx, ev);
        let header = store.task_name(ev);
        ex.note_task(ev.pid, header);

        let args = store.arg_list(ev, &mut buf);
        match ev.kind {
            EventKind::SchedSwitch => ex.switch(idx, ev, args),
            kind if kind.is_wakeup() => ex.wakeup(ev, args, header),
            EventKind::SchedProcessExit => ex.exit(ev, args, header),
            EventKind::SchedProcessFork => ex.fork(ev, args, header),
            _ => {}
        }
    }

    let model = ex.finish();
    let stats = &model.stats;
    debug!(
        "extracted {} tasks: {} switches, {} wakeups, {} forks, {} exits, {} renames",
        model.tasks.len(),
        stats.switches,
        stats.wakeups,
        stats.forks,
        stats.exits,
        stats.renames
    );
    if stats.out_of_order > 0 {
        warn!(
            "dropped {} out-of-order scheduling points",
            stats.out_of_order
        );
    }
    if stats.malformed > 0 {
        warn!(
            "skipped {} scheduler events with unreadable arguments",
            stats.malformed
        );
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingest;
    use crate::time::Window;

    fn model_of(text: &str) -> (EventStore, SchedModel) {
        let (store, report) = ingest(text.as_bytes(), &Config::default()).unwrap();
        assert_eq!(report.rejected, 0, "{:?}", report.rejects);
        let model = extract(&store, &Config::default());
        (store, model)
    }

    fn secs(s: i64) -> TraceTime {
        TraceTime::from_secs(s)
    }

    const SWITCHES: &str = "\
<idle>-0 [000] 0.000000: sched_wakeup: comm=worker pid=42 prio=120 target_cpu=000
<idle>-0 [000] 1.000000: sched_switch: prev_comm=swapper/0 prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=worker next_pid=42 next_prio=120
worker-42 [000] 3.000000: sched_switch: prev_comm=worker prev_pid=42 prev_prio=120 prev_state=S ==> next_comm=swapper/0 next_pid=0 next_prio=120
<idle>-0 [000] 4.000000: cpu_idle: state=1 cpu_id=0
";

    #[test]
    fn test_switch_in_and_out() {
        let (_, model) = model_of(SWITCHES);
        let task = model.tasks.get(42).unwrap();
        let ct = task.cpu(0).unwrap();
        assert_eq!(ct.times(), &[secs(1), secs(3)]);
        assert_eq!(ct.running(), &[true, false]);
        assert_eq!(ct.running_time(Window::new(secs(0), secs(4))), secs(2).as_nanos());
        assert_eq!(task.timeline().current(), Some(TaskState::Sleeping));
        assert_eq!(model.stats.switches, 2);
    }

    #[test]
    fn test_wakeup_latency() {
        let (_, model) = model_of(SWITCHES);
        let task = model.tasks.get(42).unwrap();
        assert_eq!(
            task.latencies(),
            &[Latency {
                woken: secs(0),
                scheduled: secs(1),
                cpu: 0
            }]
        );
        let waiting = task
            .timeline()
            .time_in(TaskState::Waiting, Window::new(secs(0), secs(4)));
        assert_eq!(waiting, secs(1).as_nanos());
    }

    #[test]
    fn test_seed_and_close() {
        // Task 7 is running when the trace starts and task 9 when it ends.
        let text = "\
a-7 [001] 10.0: irq_handler_entry: irq=3
a-7 [001] 12.0: sched_switch: prev_comm=a prev_pid=7 prev_prio=120 prev_state=R+ ==> next_comm=b next_pid=9 next_prio=120
b-9 [001] 15.0: irq_handler_entry: irq=3
";
        let (_, model) = model_of(text);
        let a = model.tasks.get(7).unwrap().cpu(1).unwrap();
        assert_eq!(a.times(), &[secs(10), secs(12)]);
        assert_eq!(a.running(), &[true, false]);
        assert_eq!(
            model.tasks.get(7).unwrap().timeline().current(),
            Some(TaskState::Preempted)
        );

        let b = model.tasks.get(9).unwrap().cpu(1).unwrap();
        assert_eq!(b.times(), &[secs(12), secs(15)]);
        assert_eq!(b.running(), &[true, false]);
    }

    #[test]
    fn test_positional_switch_format() {
        let text = "\
kworker/0:1 H-75 [002] 1.0: sched_switch: kworker/0:1 H:75 [120] D ==> cat:88 [120]
cat-88 [002] 2.0: sched_switch: cat:88 [120] x ==> swapper/2:0 [120]
";
        let (_, model) = model_of(text);
        let kworker = model.tasks.get(75).unwrap();
        assert_eq!(kworker.name(), "kworker/0:1 H");
        assert_eq!(kworker.timeline().current(), Some(TaskState::Uninterruptible));
        let cat = model.tasks.get(88).unwrap();
        assert_eq!(cat.cpu(2).unwrap().running(), &[true, false]);
        assert!(!cat.is_alive());
        assert_eq!(cat.exit_time, Some(secs(2)));
    }

    #[test]
    fn test_out_of_order_dropped() {
        let text = "\
a-1 [000] 5.0: sched_switch: prev_comm=a prev_pid=1 prev_prio=120 prev_state=S ==> next_comm=b next_pid=2 next_prio=120
b-2 [000] 4.0: sched_switch: prev_comm=b prev_pid=2 prev_prio=120 prev_state=S ==> next_comm=a next_pid=1 next_prio=120
";
        let (_, model) = model_of(text);
        assert_eq!(model.stats.out_of_order, 2);
        for task in model.tasks.iter() {
            for ct in task.cpus().values() {
                assert!(ct.times().windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }

    #[test]
    fn test_absurd_pid_skipped() {
        let text = "\
a-1 [000] 1.0: sched_switch: prev_comm=a prev_pid=zz prev_prio=120 prev_state=S ==> next_comm=b next_pid=2 next_prio=120
a-1 [000] 2.0: sched_wakeup: comm=b pid=2147483648 prio=120
";
        let (_, model) = model_of(text);
        assert_eq!(model.stats.malformed, 2);
        assert_eq!(model.stats.switches, 0);
        assert!(model.tasks.get(2).is_none());
    }

    #[test]
    fn test_fork_exit_and_renames() {
        let text = "\
bash-100 [000] 1.0: sched_process_fork: comm=bash pid=100 child_comm=bash child_pid=101
bash-101 [001] 2.0: sched_process_exec: filename=/bin/ls pid=101 old_pid=101
ls-101 [001] 3.0: sched_process_exit: comm=ls pid=101 prio=120
";
        let (_, model) = model_of(text);
        let child = model.tasks.get(101).unwrap();
        assert_eq!(child.parent, Some(100));
        assert_eq!(child.name(), "ls");
        assert_eq!(child.previous_names().collect::<Vec<_>>(), vec!["bash"]);
        assert!(!child.is_alive());
        assert_eq!(child.exit_time, Some(secs(3)));
        assert_eq!(model.stats.renames, 1);
    }

    #[test]
    fn test_quiet_cpu_keeps_task_running() {
        // Nothing more is logged on CPU 1 after task 7 gets it.
        let text = "\
<idle>-0 [001] 10.0: sched_switch: prev_comm=swapper/1 prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=hog next_pid=7 next_prio=120
<idle>-0 [000] 50.0: cpu_idle: state=1 cpu_id=0
<idle>-0 [000] 100.0: cpu_idle: state=1 cpu_id=0
";
        let (_, model) = model_of(text);
        let hog = model.tasks.get(7).unwrap();
        let ct = hog.cpu(1).unwrap();
        assert_eq!(ct.times(), &[secs(10), secs(100)]);
        assert_eq!(ct.running(), &[true, false]);

        let window = Window::new(secs(20), secs(90));
        assert_eq!(ct.running_time(window), secs(70).as_nanos());
        assert_eq!(
            hog.timeline().time_in(TaskState::Running, window),
            ct.running_time(window)
        );
    }

    #[test]
    fn test_unknown_comm_headers_do_not_rename() {
        let text = "\
<...>-42 [000] 1.0: irq_handler_entry: irq=3
<idle>-0 [000] 2.0: sched_switch: prev_comm=swapper/0 prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=worker next_pid=42 next_prio=120
<...>-42 [000] 3.0: irq_handler_entry: irq=3
worker-42 [000] 4.0: sched_switch: prev_comm=worker prev_pid=42 prev_prio=120 prev_state=S ==> next_comm=swapper/0 next_pid=0 next_prio=120
<...>-42 [000] 5.0: sched_process_exit: comm=worker pid=42 prio=120
";
        let (_, model) = model_of(text);
        let worker = model.tasks.get(42).unwrap();
        assert_eq!(worker.name(), "worker");
        assert_eq!(worker.previous_names().count(), 0);
        assert_eq!(model.stats.renames, 0);
    }

    #[test]
    fn test_idle_task_not_renamed() {
        let text = "\
<idle>-0 [000] 1.0: cpu_idle: state=1 cpu_id=0
<idle>-0 [001] 1.0: sched_switch: prev_comm=swapper/1 prev_pid=0 prev_prio=120 prev_state=R ==> next_comm=a next_pid=5 next_prio=120
";
        let (_, model) = model_of(text);
        assert_eq!(model.tasks.get(0).unwrap().name(), "<idle>");
        assert_eq!(model.stats.renames, 0);
    }
}
