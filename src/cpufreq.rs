//! Per-CPU frequency and idle-state series.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::event::{parse_u32, EventKind};
use crate::search;
use crate::store::EventStore;
use crate::time::{TraceTime, Window};

/// `cpu_idle` state value reported when a CPU leaves idle.
pub const IDLE_EXIT: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    Running,
    Idle(u32),
}

impl IdleState {
    pub fn from_raw(state: u32) -> Self {
        if state == IDLE_EXIT {
            IdleState::Running
        } else {
            IdleState::Idle(state)
        }
    }
}

/// Time-ordered samples of a value that holds until the next sample.
#[derive(Clone, Debug)]
pub struct Series<T> {
    times: Vec<TraceTime>,
    values: Vec<T>,
}

impl<T> Default for Series<T> {
    fn default() -> Self {
        Self {
            times: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<T: Copy> Series<T> {
    /// Append a sample; samples older than the last one are dropped.
    pub(crate) fn push(&mut self, time: TraceTime, value: T) -> bool {
        if self.times.last().is_some_and(|&last| time < last) {
            return false;
        }
        self.times.push(time);
        self.values.push(value);
        true
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Value in effect at `time`.
    pub fn at(&self, time: TraceTime) -> Option<T> {
        search::last_at_or_before(&self.times, time).map(|i| self.values[i])
    }

    pub fn samples(&self) -> impl Iterator<Item = (TraceTime, T)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }
}

impl Series<u32> {
    /// Time-weighted mean over `window`. The last sample holds until the
    /// window end; time before the first sample is not counted.
    pub fn mean(&self, window: Window) -> Option<u64> {
        if window.is_empty() || self.is_empty() {
            return None;
        }
        let lo = search::last_at_or_before(&self.times, window.start).unwrap_or(0);
        let mut weighted: u128 = 0;
        let mut covered: i64 = 0;
        for i in lo..self.times.len() {
            let from = self.times[i].max(window.start);
            if from >= window.end {
                break;
            }
            let to = self
                .times
                .get(i + 1)
                .map_or(window.end, |&next| next.min(window.end));
            if to > from {
                let span = to.since(from);
                weighted += u128::from(self.values[i]) * span as u128;
                covered += span;
            }
        }
        (covered > 0).then(|| (weighted / covered as u128) as u64)
    }
}

/// Frequency and idle samples of every CPU.
#[derive(Clone, Debug, Default)]
pub struct CpuSeries {
    pub frequency: BTreeMap<u32, Series<u32>>,
    pub idle: BTreeMap<u32, Series<IdleState>>,
    /// Events whose `state` or `cpu_id` could not be read.
    pub malformed: u64,
}

impl CpuSeries {
    /// Frequency of `cpu` in kHz at `time`.
    pub fn frequency_at(&self, cpu: u32, time: TraceTime) -> Option<u32> {
        self.frequency.get(&cpu)?.at(time)
    }

    pub fn idle_at(&self, cpu: u32, time: TraceTime) -> Option<IdleState> {
        self.idle.get(&cpu)?.at(time)
    }
}

/// Collect `cpu_frequency` and `cpu_idle` samples.
pub fn extract(store: &EventStore) -> CpuSeries {
    let mut series = CpuSeries::default();
    let mut buf = Vec::with_capacity(4);
    for (_, ev) in store.iter() {
        if !matches!(ev.kind, EventKind::CpuFrequency | EventKind::CpuIdle) {
            continue;
        }
        let args = store.arg_list(ev, &mut buf);
        let state = args.value("state").and_then(parse_u32);
        let cpu = args.value("cpu_id").and_then(parse_u32);
        let (Some(state), Some(cpu)) = (state, cpu) else {
            series.malformed += 1;
            continue;
        };
        if ev.kind == EventKind::CpuFrequency {
            series.frequency.entry(cpu).or_default().push(ev.time, state);
        } else {
            series
                .idle
                .entry(cpu)
                .or_default()
                .push(ev.time, IdleState::from_raw(state));
        }
    }
    debug!(
        "frequency samples on {} cpus, idle samples on {} cpus",
        series.frequency.len(),
        series.idle.len()
    );
    series
}
