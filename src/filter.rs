//! Selection of raw events for export.

use std::collections::HashSet;

use regex::Regex;

use crate::event::{Event, EventIdx};
use crate::intern::Sym;
use crate::search;
use crate::store::EventStore;
use crate::time::{TraceTime, Window};

/// Criteria an event must meet. Empty lists match everything.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub pids: Vec<i32>,
    pub cpus: Vec<u32>,
    pub events: Vec<String>,
    pub window: Option<Window>,
    pub task_name: Option<Regex>,
}

impl EventFilter {
    pub fn pid(mut self, pid: i32) -> Self {
        self.pids.push(pid);
        self
    }

    pub fn cpu(mut self, cpu: u32) -> Self {
        self.cpus.push(cpu);
        self
    }

    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.events.push(name.into());
        self
    }

    pub fn window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }

    pub fn task_name(mut self, re: Regex) -> Self {
        self.task_name = Some(re);
        self
    }

    /// Matching events in store order.
    pub fn apply<'s>(&'s self, store: &'s EventStore) -> impl Iterator<Item = EventIdx> + 's {
        // Names never seen in the trace resolve to nothing and so match nothing.
        let names: Option<HashSet<Sym>> = (!self.events.is_empty())
            .then(|| self.events.iter().filter_map(|n| store.symbol(n)).collect());
        let range = self.index_range(store);
        store
            .iter()
            .skip(range.start)
            .take(range.len())
            .filter(move |(_, ev)| self.matches(store, ev, names.as_ref()))
            .map(|(idx, _)| idx)
    }

    /// Narrow the scan when the store is time-ordered.
    fn index_range(&self, store: &EventStore) -> std::ops::Range<usize> {
        let all = 0..store.len();
        let Some(window) = self.window else {
            return all;
        };
        let events = store.events();
        if !events.windows(2).all(|w| w[0].time <= w[1].time) {
            return all;
        }
        let times: Vec<TraceTime> = events.iter().map(|ev| ev.time).collect();
        search::range_within(&times, window)
    }

    fn matches(&self, store: &EventStore, ev: &Event, names: Option<&HashSet<Sym>>) -> bool {
        if !self.pids.is_empty() && !self.pids.contains(&ev.pid) {
            return false;
        }
        if !self.cpus.is_empty() && !self.cpus.contains(&ev.cpu) {
            return false;
        }
        if let Some(names) = names {
            if !names.contains(&ev.name) {
                return false;
            }
        }
        if let Some(window) = self.window {
            if !window.contains(ev.time) {
                return false;
            }
        }
        if let Some(re) = &self.task_name {
            if !re.is_match(store.task_name(ev)) {
                return false;
            }
        }
        true
    }
}
