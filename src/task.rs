//! Per-task scheduling history and the task index.
//!
//! A [`Task`] keeps one [`CpuTask`] per CPU it ran on. A CPU-Task is a pair
//! of aligned sequences (event index, running flag) sorted by time, with the
//! timestamps cached alongside for searching. Between two points the flag of
//! the earlier one holds, which makes the sequence a step function that can
//! be integrated over any window.

use std::collections::{BTreeMap, VecDeque};

use regex::Regex;
use serde::Serialize;

use crate::event::EventIdx;
use crate::search;
use crate::time::{TraceTime, Window};

/// Scheduling state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    /// Switched out while still runnable.
    Preempted,
    /// Blocked in `D` state.
    Uninterruptible,
    Sleeping,
    /// Woken, not yet switched in.
    Waiting,
    Exited,
}

impl TaskState {
    /// State of a task switched out with the given `prev_state`.
    pub fn from_prev_state(prev_state: &str) -> Self {
        match prev_state {
            "R" | "R+" => TaskState::Preempted,
            s if s.starts_with('D') => TaskState::Uninterruptible,
            s if s.starts_with(['X', 'x', 'Z']) => TaskState::Exited,
            _ => TaskState::Sleeping,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskState::Running => "running",
            TaskState::Preempted => "preempted",
            TaskState::Uninterruptible => "uninterruptible",
            TaskState::Sleeping => "sleeping",
            TaskState::Waiting => "waiting",
            TaskState::Exited => "exited",
        }
    }
}

/// Scheduling history of one task on one CPU.
#[derive(Clone, Debug, Default)]
pub struct CpuTask {
    events: Vec<EventIdx>,
    times: Vec<TraceTime>,
    running: Vec<bool>,
}

impl CpuTask {
    /// Append a point. Returns false, leaving the sequence untouched, when
    /// `time` is older than the last point.
    pub(crate) fn push(&mut self, event: EventIdx, time: TraceTime, running: bool) -> bool {
        if self.times.last().is_some_and(|&last| time < last) {
            return false;
        }
        self.events.push(event);
        self.times.push(time);
        self.running.push(running);
        true
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[EventIdx] {
        &self.events
    }

    pub fn times(&self) -> &[TraceTime] {
        &self.times
    }

    pub fn running(&self) -> &[bool] {
        &self.running
    }

    /// State after the last point.
    pub fn is_running(&self) -> bool {
        self.running.last().copied().unwrap_or(false)
    }

    pub fn last_time(&self) -> Option<TraceTime> {
        self.times.last().copied()
    }

    /// Nanoseconds spent running inside `window`.
    pub fn running_time(&self, window: Window) -> i64 {
        search::integrate(&self.times, &self.running, window, |&running| running)
    }

    /// Number of switch-ins inside `window`.
    pub fn switch_ins(&self, window: Window) -> usize {
        let range = search::range_within(&self.times, window);
        let mut count = 0;
        for i in range {
            if self.running[i] && (i == 0 || !self.running[i - 1]) {
                count += 1;
            }
        }
        count
    }
}

/// Task-level state changes across all CPUs.
#[derive(Clone, Debug, Default)]
pub struct StateTimeline {
    times: Vec<TraceTime>,
    states: Vec<TaskState>,
}

impl StateTimeline {
    /// Record a change to `state` at `time`. Repeats of the current state
    /// and points older than the last one are ignored.
    pub(crate) fn push(&mut self, time: TraceTime, state: TaskState) {
        match (self.times.last(), self.states.last()) {
            (Some(&last), _) if time < last => {}
            (_, Some(&current)) if current == state => {}
            _ => {
                self.times.push(time);
                self.states.push(state);
            }
        }
    }

    /// Extend the current state up to `time`.
    pub(crate) fn close(&mut self, time: TraceTime) {
        if let (Some(&last), Some(&state)) = (self.times.last(), self.states.last()) {
            if time > last {
                self.times.push(time);
                self.states.push(state);
            }
        }
    }

    pub fn current(&self) -> Option<TaskState> {
        self.states.last().copied()
    }

    /// State in effect at `time`.
    pub fn at(&self, time: TraceTime) -> Option<TaskState> {
        search::last_at_or_before(&self.times, time).map(|i| self.states[i])
    }

    pub fn changes(&self) -> impl Iterator<Item = (TraceTime, TaskState)> + '_ {
        self.times.iter().copied().zip(self.states.iter().copied())
    }

    /// Nanoseconds spent in `state` inside `window`.
    pub fn time_in(&self, state: TaskState, window: Window) -> i64 {
        search::integrate(&self.times, &self.states, window, |&s| s == state)
    }
}

/// Delay between a wakeup and the following switch-in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Latency {
    pub woken: TraceTime,
    pub scheduled: TraceTime,
    pub cpu: u32,
}

impl Latency {
    pub fn delay(&self) -> i64 {
        self.scheduled.since(self.woken)
    }
}

/// Name ftrace prints for a task whose comm it has not recorded.
pub const UNKNOWN_COMM: &str = "<...>";

fn is_unknown_comm(name: &str) -> bool {
    name.is_empty() || name == UNKNOWN_COMM
}

#[derive(Clone, Debug)]
pub struct Task {
    pub pid: i32,
    name: String,
    /// Earlier names, oldest first.
    previous_names: VecDeque<String>,
    name_history: usize,
    alive: bool,
    pub parent: Option<i32>,
    pub exit_time: Option<TraceTime>,
    cpus: BTreeMap<u32, CpuTask>,
    timeline: StateTimeline,
    latencies: Vec<Latency>,
    pub(crate) pending_wakeup: Option<TraceTime>,
}

impl Task {
    pub fn new(pid: i32, name: &str, name_history: usize) -> Self {
        let name = if name.is_empty() { UNKNOWN_COMM } else { name };
        Self {
            pid,
            name: name.to_string(),
            previous_names: VecDeque::new(),
            name_history,
            alive: true,
            parent: None,
            exit_time: None,
            cpus: BTreeMap::new(),
            timeline: StateTimeline::default(),
            latencies: Vec::new(),
            pending_wakeup: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names the task carried before the current one, oldest first.
    pub fn previous_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.previous_names.iter().map(String::as_str)
    }

    /// Current name followed by earlier ones, e.g. `ls (was bash)`.
    pub fn display_name(&self) -> String {
        if self.previous_names.is_empty() {
            return self.name.clone();
        }
        let earlier: Vec<&str> = self.previous_names.iter().rev().map(String::as_str).collect();
        format!("{} (was {})", self.name, earlier.join(", "))
    }

    /// Start a new name generation. Returns false when the name is unchanged
    /// or unknown. A task known only as `<...>` takes its first real name
    /// without starting a generation.
    pub(crate) fn rename(&mut self, name: &str) -> bool {
        if is_unknown_comm(name) || self.name == name {
            return false;
        }
        if is_unknown_comm(&self.name) {
            self.name = name.to_string();
            return false;
        }
        let old = std::mem::replace(&mut self.name, name.to_string());
        if self.name_history > 0 {
            if self.previous_names.len() == self.name_history {
                self.previous_names.pop_front();
            }
            self.previous_names.push_back(old);
        }
        true
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub(crate) fn set_alive(&mut self, alive: bool) {
        self.alive = alive;
    }

    pub fn cpus(&self) -> &BTreeMap<u32, CpuTask> {
        &self.cpus
    }

    pub fn cpu(&self, cpu: u32) -> Option<&CpuTask> {
        self.cpus.get(&cpu)
    }

    pub(crate) fn cpu_mut(&mut self, cpu: u32) -> &mut CpuTask {
        self.cpus.entry(cpu).or_default()
    }

    pub(crate) fn cpus_mut(&mut self) -> impl Iterator<Item = (&u32, &mut CpuTask)> {
        self.cpus.iter_mut()
    }

    pub fn timeline(&self) -> &StateTimeline {
        &self.timeline
    }

    pub(crate) fn timeline_mut(&mut self) -> &mut StateTimeline {
        &mut self.timeline
    }

    pub fn latencies(&self) -> &[Latency] {
        &self.latencies
    }

    pub(crate) fn push_latency(&mut self, latency: Latency) {
        self.latencies.push(latency);
    }

    /// Running time inside `window` summed over all CPUs.
    pub fn running_time(&self, window: Window) -> i64 {
        self.cpus.values().map(|ct| ct.running_time(window)).sum()
    }

    /// Number of scheduling points recorded across all CPUs.
    pub fn point_count(&self) -> usize {
        self.cpus.values().map(CpuTask::len).sum()
    }
}

/// Tasks keyed by pid.
#[derive(Clone, Debug, Default)]
pub struct TaskIndex {
    tasks: BTreeMap<i32, Task>,
    name_history: usize,
}

impl TaskIndex {
    pub fn new(name_history: usize) -> Self {
        Self {
            tasks: BTreeMap::new(),
            name_history,
        }
    }

    /// Task for `pid`, created under `name` on first sight.
    pub(crate) fn entry(&mut self, pid: i32, name: &str) -> &mut Task {
        let history = self.name_history;
        self.tasks
            .entry(pid)
            .or_insert_with(|| Task::new(pid, name, history))
    }

    pub(crate) fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.values_mut()
    }

    pub fn get(&self, pid: i32) -> Option<&Task> {
        self.tasks.get(&pid)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in pid order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> + '_ {
        self.tasks.values()
    }

    /// Tasks sorted by (name, pid), optionally keeping only names that
    /// match `filter`.
    pub fn listing(&self, filter: Option<&Regex>) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| filter.map_or(true, |re| re.is_match(t.name())))
            .collect();
        tasks.sort_by(|a, b| a.name().cmp(b.name()).then(a.pid.cmp(&b.pid)));
        tasks
    }
}
