//! Trace event records.
//!
//! An [`Event`] is a small fixed-size record whose strings live in the
//! [`EventStore`](crate::store::EventStore) arena. Events are created once by
//! the ingestion consumer and never modified afterwards.

use std::borrow::Cow;

use serde::Serialize;

use crate::arena::StrRef;
use crate::intern::Sym;
use crate::time::TraceTime;

/// Value reported when an inline numeric argument fails to parse.
///
/// Kept at `i32::MAX` for output compatibility with existing tooling.
pub const ABSURD_INT: i32 = 2_147_483_647;

/// Separator between the previous and next task in `sched_switch` arguments.
pub const SWITCH_ARROW: &str = "==>";

/// Index of an event in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EventIdx(pub(crate) u32);

impl EventIdx {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Events the schedule reconstruction understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SchedSwitch,
    SchedWakeup,
    SchedWaking,
    SchedWakeupNew,
    SchedMigrateTask,
    SchedProcessFork,
    SchedProcessExit,
    SchedProcessExec,
    CpuFrequency,
    CpuIdle,
    Other,
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "sched_switch" => EventKind::SchedSwitch,
            "sched_wakeup" => EventKind::SchedWakeup,
            "sched_waking" => EventKind::SchedWaking,
            "sched_wakeup_new" => EventKind::SchedWakeupNew,
            "sched_migrate_task" => EventKind::SchedMigrateTask,
            "sched_process_fork" => EventKind::SchedProcessFork,
            "sched_process_exit" => EventKind::SchedProcessExit,
            "sched_process_exec" => EventKind::SchedProcessExec,
            "cpu_frequency" => EventKind::CpuFrequency,
            "cpu_idle" => EventKind::CpuIdle,
            _ => EventKind::Other,
        }
    }

    /// Wakeup flavours that make a sleeping task runnable.
    pub fn is_wakeup(self) -> bool {
        matches!(
            self,
            EventKind::SchedWakeup | EventKind::SchedWaking | EventKind::SchedWakeupNew
        )
    }
}

/// One parsed trace line.
#[derive(Clone, Copy, Debug)]
pub struct Event {
    pub task_name: StrRef,
    pub pid: i32,
    pub cpu: u32,
    pub time: TraceTime,
    pub name: Sym,
    pub kind: EventKind,
    /// ftrace irq/preempt flags column, empty when the trace has none.
    pub flags: StrRef,
    pub(crate) arg_start: u32,
    pub(crate) arg_count: u32,
}

impl Event {
    pub fn arg_count(&self) -> usize {
        self.arg_count as usize
    }
}

/// Parse a decimal integer, returning [`ABSURD_INT`] on failure.
pub fn parse_int(text: &str) -> i32 {
    text.parse().unwrap_or(ABSURD_INT)
}

/// Parse a decimal unsigned integer, returning `None` on failure.
pub fn parse_u32(text: &str) -> Option<u32> {
    text.parse().ok()
}

/// Resolved view of an event's argument tokens.
///
/// The token slice is borrowed for `'a` while the strings themselves live as
/// long as the store (`'s`), so values pulled out of the list outlive it.
#[derive(Clone, Copy)]
pub struct ArgList<'a, 's> {
    tokens: &'a [&'s str],
}

impl<'a, 's> ArgList<'a, 's> {
    pub fn new(tokens: &'a [&'s str]) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&'s str> {
        self.tokens.get(i).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'s str> + 'a {
        self.tokens.iter().copied()
    }

    /// Position of the first token equal to `token`.
    pub fn position(&self, token: &str) -> Option<usize> {
        self.tokens.iter().position(|t| *t == token)
    }

    /// Split around the token at `at`, dropping it.
    pub fn split_around(&self, at: usize) -> (ArgList<'a, 's>, ArgList<'a, 's>) {
        let at = at.min(self.tokens.len());
        let rest = self.tokens.get(at + 1..).unwrap_or(&[]);
        (ArgList::new(&self.tokens[..at]), ArgList::new(rest))
    }

    fn find_key(&self, key: &str) -> Option<(usize, &'s str)> {
        self.tokens.iter().enumerate().find_map(|(i, tok)| {
            tok.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|value| (i, value))
        })
    }

    /// Value of the first `key=value` token.
    pub fn value(&self, key: &str) -> Option<&'s str> {
        self.find_key(key).map(|(_, value)| value)
    }

    /// Integer value of `key`, [`ABSURD_INT`] when missing or malformed.
    pub fn int(&self, key: &str) -> i32 {
        self.value(key).map_or(ABSURD_INT, parse_int)
    }

    /// Value of `key` that may contain spaces: the tokens following the
    /// `key=` token are appended until the next token that holds a `=`.
    pub fn text(&self, key: &str) -> Option<Cow<'s, str>> {
        let (i, first) = self.find_key(key)?;
        let tail = self.tokens[i + 1..]
            .iter()
            .take_while(|tok| !tok.contains('=') && **tok != SWITCH_ARROW)
            .copied();
        let mut tail = tail.peekable();
        if tail.peek().is_none() {
            return Some(Cow::Borrowed(first));
        }
        let mut joined = first.to_string();
        for part in tail {
            joined.push(' ');
            joined.push_str(part);
        }
        Some(Cow::Owned(joined))
    }
}
