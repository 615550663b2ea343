//! Append-only event store.
//!
//! The store owns the arena and every [`Event`]. Other structures (task
//! index, CPU-task sequences, migration lists) refer to events by
//! [`EventIdx`] only. Indices stay valid for the life of the store: events
//! are appended, never removed or reordered.

use std::collections::HashMap;
use std::fmt;

use crate::arena::{Arena, ArenaError, StrRef};
use crate::error::Error;
use crate::event::{ArgList, Event, EventIdx, EventKind};
use crate::grammar::ParsedLine;
use crate::intern::{Interner, Sym};
use crate::time::{TraceTime, Window};

/// Initial capacity of the event vector.
const INITIAL_EVENT_CAPACITY: usize = 64 * 1024;

#[derive(Debug)]
pub struct EventStore {
    arena: Arena,
    names: Interner,
    /// Event kind per interned name, indexed by `Sym::index()`.
    kinds: Vec<EventKind>,
    events: Vec<Event>,
    args: Vec<StrRef>,
    /// Last task name stored per pid, reused while the name does not change.
    task_names: HashMap<i32, StrRef>,
    first_time: Option<TraceTime>,
    last_time: Option<TraceTime>,
    max_cpu: Option<u32>,
}

impl EventStore {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            arena: Arena::new(chunk_size),
            names: Interner::new(),
            kinds: Vec::new(),
            events: Vec::with_capacity(INITIAL_EVENT_CAPACITY),
            args: Vec::with_capacity(INITIAL_EVENT_CAPACITY * 4),
            task_names: HashMap::new(),
            first_time: None,
            last_time: None,
            max_cpu: None,
        }
    }

    /// Commit a parsed line as a new event.
    ///
    /// Either every string of the event is stored and the event is appended,
    /// or nothing is appended and the error is returned.
    pub fn push(&mut self, line: &ParsedLine<'_>) -> Result<EventIdx, Error> {
        let idx = next_index(self.events.len())?;

        let arg_start = self.args.len();
        let result = self.store_strings(line);
        let (task_name, name, flags) = match result {
            Ok(parts) => parts,
            Err(e) => {
                self.args.truncate(arg_start);
                return Err(e.into());
            }
        };

        let kind = self.kinds[name.index()];
        self.events.push(Event {
            task_name,
            pid: line.pid,
            cpu: line.cpu,
            time: line.time,
            name,
            kind,
            flags,
            arg_start: arg_start as u32,
            arg_count: (self.args.len() - arg_start) as u32,
        });

        self.first_time = Some(self.first_time.map_or(line.time, |t| t.min(line.time)));
        self.last_time = Some(self.last_time.map_or(line.time, |t| t.max(line.time)));
        self.max_cpu = Some(self.max_cpu.map_or(line.cpu, |c| c.max(line.cpu)));
        Ok(idx)
    }

    fn store_strings(&mut self, line: &ParsedLine<'_>) -> Result<(StrRef, Sym, StrRef), ArenaError> {
        let task_name = self.task_name_ref(line)?;

        let name = match std::str::from_utf8(line.event) {
            Ok(event) => self.names.intern(&mut self.arena, event)?,
            Err(_) => {
                let event = String::from_utf8_lossy(line.event);
                self.names.intern(&mut self.arena, &event)?
            }
        };
        if name.index() == self.kinds.len() {
            self.kinds
                .push(EventKind::from_name(self.arena.str(self.names.resolve(name))));
        }

        let flags = match line.flags {
            Some(flags) => self.arena.alloc_text(flags)?,
            None => StrRef::default(),
        };

        for arg in line.args {
            let arg = self.arena.alloc_text(arg)?;
            self.args.push(arg);
        }
        Ok((task_name, name, flags))
    }

    fn task_name_ref(&mut self, line: &ParsedLine<'_>) -> Result<StrRef, ArenaError> {
        let parts = line.task_name_parts();
        if let Some(cached) = self.task_names.get(&line.pid) {
            if joined_eq(self.arena.bytes(cached.span()), parts) {
                return Ok(*cached);
            }
        }
        let name = self.arena.alloc_joined(parts)?;
        self.task_names.insert(line.pid, name);
        Ok(name)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, idx: EventIdx) -> &Event {
        &self.events[idx.index()]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventIdx, &Event)> + '_ {
        self.events
            .iter()
            .enumerate()
            .map(|(i, ev)| (EventIdx(i as u32), ev))
    }

    pub fn time(&self, idx: EventIdx) -> TraceTime {
        self.events[idx.index()].time
    }

    pub fn str(&self, text: StrRef) -> &str {
        self.arena.str(text)
    }

    pub fn task_name(&self, event: &Event) -> &str {
        self.arena.str(event.task_name)
    }

    pub fn event_name(&self, event: &Event) -> &str {
        self.arena.str(self.names.resolve(event.name))
    }

    pub fn flags(&self, event: &Event) -> Option<&str> {
        (!event.flags.is_empty()).then(|| self.arena.str(event.flags))
    }

    /// Argument tokens of an event.
    pub fn args(&self, event: &Event) -> impl Iterator<Item = &str> + '_ {
        let start = event.arg_start as usize;
        let end = start + event.arg_count as usize;
        self.args[start..end].iter().map(|arg| self.arena.str(*arg))
    }

    /// Resolve an event's arguments into `buf` for keyed lookups.
    pub fn arg_list<'a, 's>(&'s self, event: &Event, buf: &'a mut Vec<&'s str>) -> ArgList<'a, 's> {
        buf.clear();
        buf.extend(self.args(event));
        ArgList::new(buf)
    }

    /// Symbol of an event name, if any event carried it.
    pub fn symbol(&self, name: &str) -> Option<Sym> {
        self.names.get(name)
    }

    /// Distinct event names in first-seen order.
    pub fn event_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.names
            .symbols()
            .map(|sym| self.arena.str(self.names.resolve(sym)))
    }

    /// Earliest to latest timestamp seen, `None` for an empty store.
    pub fn time_range(&self) -> Option<Window> {
        Some(Window::new(self.first_time?, self.last_time?))
    }

    /// Number of CPUs referenced (highest cpu id + 1).
    pub fn cpu_count(&self) -> usize {
        self.max_cpu.map_or(0, |c| c as usize + 1)
    }

    /// Mapped chunks and committed bytes of the string arena.
    pub fn arena_usage(&self) -> (usize, usize) {
        (self.arena.chunk_count(), self.arena.committed_bytes())
    }

    /// Display adapter rendering an event back into trace line form.
    pub fn view(&self, idx: EventIdx) -> EventView<'_> {
        EventView {
            store: self,
            event: self.get(idx),
        }
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(crate::arena::DEFAULT_CHUNK_SIZE)
    }
}

/// Index the next event will get, if one is still addressable.
fn next_index(len: usize) -> Result<EventIdx, Error> {
    u32::try_from(len)
        .map(EventIdx)
        .map_err(|_| Error::StoreFull(len))
}

/// Compare stored bytes against name parts joined by single spaces.
fn joined_eq(stored: &[u8], parts: &[&[u8]]) -> bool {
    let mut rest = stored;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            match rest.split_first() {
                Some((b' ', tail)) => rest = tail,
                _ => return false,
            }
        }
        match rest.strip_prefix(*part) {
            Some(tail) => rest = tail,
            None => return false,
        }
    }
    rest.is_empty()
}

/// An event rendered as a trace line.
pub struct EventView<'s> {
    store: &'s EventStore,
    event: &'s Event,
}

impl fmt::Display for EventView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ev = self.event;
        write!(
            f,
            "{}-{} [{:03}] ",
            self.store.task_name(ev),
            ev.pid,
            ev.cpu
        )?;
        if let Some(flags) = self.store.flags(ev) {
            write!(f, "{flags} ")?;
        }
        write!(f, "{}: {}:", ev.time, self.store.event_name(ev))?;
        for arg in self.store.args(ev) {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ABSURD_INT;
    use crate::grammar::parse_line;

    fn push_line(store: &mut EventStore, text: &str) -> EventIdx {
        let toks: Vec<&[u8]> = text.split_ascii_whitespace().map(str::as_bytes).collect();
        let line = parse_line(&toks).unwrap();
        store.push(&line).unwrap()
    }

    #[test]
    fn test_push_and_read_back() {
        let mut store = EventStore::new(4096);
        let idx = push_line(
            &mut store,
            "bash-1234 [002] 10.000100: sched_switch: prev_comm=bash prev_pid=1234 ==> next_comm=cat next_pid=88",
        );
        let ev = *store.get(idx);
        assert_eq!(store.task_name(&ev), "bash");
        assert_eq!(ev.pid, 1234);
        assert_eq!(ev.cpu, 2);
        assert_eq!(ev.kind, EventKind::SchedSwitch);
        assert_eq!(store.event_name(&ev), "sched_switch");
        assert_eq!(store.args(&ev).count(), 5);

        let mut buf = Vec::new();
        let args = store.arg_list(&ev, &mut buf);
        assert_eq!(args.int("next_pid"), 88);
        assert_eq!(args.int("bogus"), ABSURD_INT);
    }

    #[test]
    fn test_task_name_reused() {
        let mut store = EventStore::new(4096);
        let a = push_line(&mut store, "kworker/0:1 H-7 [0] 1.0: foo:");
        let b = push_line(&mut store, "kworker/0:1 H-7 [0] 2.0: foo:");
        assert_eq!(store.get(a).task_name, store.get(b).task_name);
        assert_eq!(store.task_name(store.get(a)), "kworker/0:1 H");

        let c = push_line(&mut store, "renamed-7 [0] 3.0: foo:");
        assert_ne!(store.get(c).task_name, store.get(a).task_name);
        assert_eq!(store.task_name(store.get(c)), "renamed");
    }

    #[test]
    fn test_event_names_interned() {
        let mut store = EventStore::new(4096);
        for i in 0..100 {
            push_line(&mut store, &format!("t-1 [0] {i}.0: sched_wakeup: pid=2"));
        }
        assert_eq!(store.event_names().collect::<Vec<_>>(), vec!["sched_wakeup"]);
        let sym = store.symbol("sched_wakeup").unwrap();
        assert!(store.events().iter().all(|ev| ev.name == sym));
    }

    #[test]
    fn test_time_range_and_cpus() {
        let mut store = EventStore::new(4096);
        assert!(store.time_range().is_none());
        push_line(&mut store, "a-1 [3] 5.0: x:");
        push_line(&mut store, "a-1 [1] 2.0: x:");
        let range = store.time_range().unwrap();
        assert_eq!(range.start, TraceTime::from_secs(2));
        assert_eq!(range.end, TraceTime::from_secs(5));
        assert_eq!(store.cpu_count(), 4);
    }

    #[test]
    fn test_view_round_trip() {
        let mut store = EventStore::new(4096);
        let idx = push_line(
            &mut store,
            "<idle>-0   [001] d..2.  7.250000: cpu_idle: state=1 cpu_id=1",
        );
        assert_eq!(
            store.view(idx).to_string(),
            "<idle>-0 [001] d..2. 7.250000: cpu_idle: state=1 cpu_id=1"
        );
    }

    #[test]
    fn test_next_index_limit() {
        assert_eq!(next_index(7).unwrap(), EventIdx(7));
        assert_eq!(next_index(u32::MAX as usize).unwrap(), EventIdx(u32::MAX));
        let overflow = u32::MAX as usize + 1;
        assert!(matches!(next_index(overflow), Err(Error::StoreFull(n)) if n == overflow));
    }

    #[test]
    fn test_joined_eq() {
        assert!(joined_eq(b"a b", &[b"a".as_slice(), b"b".as_slice()]));
        assert!(!joined_eq(b"a b", &[b"a".as_slice()]));
        assert!(!joined_eq(b"ab", &[b"a".as_slice(), b"b".as_slice()]));
    }
}
