//! Task movements between CPUs.

use log::debug;
use serde::Serialize;

use crate::event::{parse_u32, EventIdx, EventKind, ABSURD_INT};
use crate::search;
use crate::store::EventStore;
use crate::time::{TraceTime, Window};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub time: TraceTime,
    pub pid: i32,
    /// Absent for a newly created task.
    pub from: Option<u32>,
    /// Absent for an exiting task.
    pub to: Option<u32>,
    pub event: EventIdx,
}

/// Migrations sorted by time.
#[derive(Clone, Debug, Default)]
pub struct Migrations {
    list: Vec<Migration>,
    times: Vec<TraceTime>,
}

impl Migrations {
    fn from_list(mut list: Vec<Migration>) -> Self {
        list.sort_by_key(|m| m.time);
        let times = list.iter().map(|m| m.time).collect();
        Self { list, times }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> + '_ {
        self.list.iter()
    }

    /// Migrations inside `window`, optionally of one task.
    pub fn in_window(&self, window: Window, pid: Option<i32>) -> impl Iterator<Item = &Migration> + '_ {
        let range = search::range_within(&self.times, window);
        self.list[range]
            .iter()
            .filter(move |m| pid.map_or(true, |p| m.pid == p))
    }
}

/// Collect migrations from `sched_migrate_task`, `sched_wakeup_new` and
/// `sched_process_exit` events.
pub fn extract(store: &EventStore) -> Migrations {
    let mut list = Vec::new();
    let mut buf = Vec::with_capacity(8);
    for (idx, ev) in store.iter() {
        if !matches!(
            ev.kind,
            EventKind::SchedMigrateTask | EventKind::SchedWakeupNew | EventKind::SchedProcessExit
        ) {
            continue;
        }
        let args = store.arg_list(ev, &mut buf);
        let (from, to) = match ev.kind {
            EventKind::SchedMigrateTask => (
                args.value("orig_cpu").and_then(parse_u32),
                args.value("dest_cpu").and_then(parse_u32),
            ),
            EventKind::SchedWakeupNew => (
                None,
                args.value("target_cpu").and_then(parse_u32).or(Some(ev.cpu)),
            ),
            _ => (Some(ev.cpu), None),
        };
        let pid = match args.value("pid") {
            Some(_) => args.int("pid"),
            None => ev.pid,
        };
        if pid == ABSURD_INT || (from.is_none() && to.is_none()) {
            continue;
        }
        list.push(Migration {
            time: ev.time,
            pid,
            from,
            to,
            event: idx,
        });
    }
    debug!("found {} migrations", list.len());
    Migrations::from_list(list)
}
