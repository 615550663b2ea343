//! Token grammar for ftrace text lines.
//!
//! A line is a sequence of whitespace separated tokens:
//!
//! ```text
//! <name>-<pid> [<cpu>] [<flags>] <timestamp>: <event-name>: <arg>*
//! ```
//!
//! Tokens are fed left to right through a fixed graph of [`Matcher`] nodes.
//! Each node either accepts its token and names the node for the next one, or
//! rejects the whole line. There is no backtracking: every field has a shape
//! no other field can take (the cpu is bracketed, the timestamp is a decimal
//! number, the flags column is never a number).
//!
//! The event-name and argument nodes are leaves. The argument node is an
//! explicit repeat state that accepts every remaining token. A line is valid
//! only when its last token was accepted by a leaf.

use std::fmt;

use thiserror::Error;

use crate::time::TraceTime;

/// Task names may contain spaces (`kworker/0:1 H-123`); at most this many
/// tokens are merged into one name.
pub const MAX_NAME_PARTS: usize = 4;

/// Field a matcher is responsible for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Task,
    Cpu,
    Timestamp,
    EventName,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Task => "task name-pid",
            Field::Cpu => "cpu",
            Field::Timestamp => "timestamp",
            Field::EventName => "event name",
        };
        f.write_str(name)
    }
}

/// Why a line was not accepted.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Reject {
    #[error("empty line")]
    Empty,
    #[error("line ends before the {0} field")]
    Truncated(Field),
    #[error("malformed {0} field")]
    Invalid(Field),
}

/// Fields of a successfully parsed line, borrowing the raw tokens.
#[derive(Clone, Debug)]
pub struct ParsedLine<'a> {
    name: [&'a [u8]; MAX_NAME_PARTS],
    name_parts: usize,
    pub pid: i32,
    pub cpu: u32,
    pub flags: Option<&'a [u8]>,
    pub time: TraceTime,
    /// Event name without its trailing `:`.
    pub event: &'a [u8],
    pub args: &'a [&'a [u8]],
}

impl<'a> ParsedLine<'a> {
    fn new() -> Self {
        Self {
            name: [&[]; MAX_NAME_PARTS],
            name_parts: 0,
            pid: 0,
            cpu: 0,
            flags: None,
            time: TraceTime::ZERO,
            event: &[],
            args: &[],
        }
    }

    /// Task name tokens; more than one when the name contains spaces.
    pub fn task_name_parts(&self) -> &[&'a [u8]] {
        &self.name[..self.name_parts]
    }
}

/// Grammar node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Matcher {
    /// `name-pid`, absorbing up to `MAX_NAME_PARTS - 1` leading name tokens.
    Task { parts: usize },
    /// `[cpu]`
    Cpu,
    /// Either the optional flags column or the timestamp.
    FlagsOrTime,
    /// Timestamp after a flags column.
    Time,
    /// Leaf: the event name.
    EventName,
    /// Leaf, repeating: one argument per token.
    Args,
}

impl Matcher {
    pub const START: Matcher = Matcher::Task { parts: 0 };

    pub fn is_leaf(self) -> bool {
        matches!(self, Matcher::EventName | Matcher::Args)
    }

    fn field(self) -> Field {
        match self {
            Matcher::Task { .. } => Field::Task,
            Matcher::Cpu => Field::Cpu,
            Matcher::FlagsOrTime | Matcher::Time => Field::Timestamp,
            Matcher::EventName | Matcher::Args => Field::EventName,
        }
    }

    /// Feed the token at `pos` to this node.
    fn accept<'a>(
        self,
        tokens: &'a [&'a [u8]],
        pos: usize,
        line: &mut ParsedLine<'a>,
    ) -> Result<Matcher, Reject> {
        let token = tokens[pos];
        match self {
            Matcher::Task { parts } => {
                if let Some((name, pid)) = split_name_pid(token) {
                    line.name[parts] = name;
                    line.name_parts = parts + 1;
                    line.pid = pid;
                    return Ok(Matcher::Cpu);
                }
                if parts + 1 < MAX_NAME_PARTS && !token.starts_with(b"[") {
                    line.name[parts] = token;
                    return Ok(Matcher::Task { parts: parts + 1 });
                }
                Err(Reject::Invalid(Field::Task))
            }
            Matcher::Cpu => {
                line.cpu = parse_cpu(token).ok_or(Reject::Invalid(Field::Cpu))?;
                Ok(Matcher::FlagsOrTime)
            }
            Matcher::FlagsOrTime => {
                if let Some(time) = TraceTime::parse_token(token) {
                    line.time = time;
                    return Ok(Matcher::EventName);
                }
                if is_flags(token) {
                    line.flags = Some(token);
                    return Ok(Matcher::Time);
                }
                Err(Reject::Invalid(Field::Timestamp))
            }
            Matcher::Time => {
                line.time =
                    TraceTime::parse_token(token).ok_or(Reject::Invalid(Field::Timestamp))?;
                Ok(Matcher::EventName)
            }
            Matcher::EventName => {
                let name = token.strip_suffix(b":").unwrap_or(token);
                if name.is_empty() {
                    return Err(Reject::Invalid(Field::EventName));
                }
                line.event = name;
                line.args = &tokens[pos + 1..];
                Ok(Matcher::Args)
            }
            Matcher::Args => Ok(Matcher::Args),
        }
    }
}

/// Run the grammar over one line's tokens.
pub fn parse_line<'a>(tokens: &'a [&'a [u8]]) -> Result<ParsedLine<'a>, Reject> {
    if tokens.is_empty() {
        return Err(Reject::Empty);
    }
    let mut line = ParsedLine::new();
    let mut node = Matcher::START;
    let mut last = node;
    for pos in 0..tokens.len() {
        let next = node.accept(tokens, pos, &mut line)?;
        last = node;
        node = next;
    }
    if !last.is_leaf() {
        return Err(Reject::Truncated(node.field()));
    }
    Ok(line)
}

/// Split `name-pid` on the last `-`; the pid must be all digits.
fn split_name_pid(token: &[u8]) -> Option<(&[u8], i32)> {
    let dash = token.iter().rposition(|&b| b == b'-')?;
    let digits = &token[dash + 1..];
    Some((&token[..dash], parse_decimal(digits)?))
}

/// `[003]` -> 3
fn parse_cpu(token: &[u8]) -> Option<u32> {
    let inner = token.strip_prefix(b"[")?.strip_suffix(b"]")?;
    parse_decimal(inner).map(|cpu| cpu as u32)
}

fn parse_decimal(digits: &[u8]) -> Option<i32> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let mut value: i32 = 0;
    for &b in digits {
        value = value.checked_mul(10)?.checked_add(i32::from(b - b'0'))?;
    }
    Some(value)
}

/// ftrace latency flags column such as `d..2.` or `dNh1.`.
fn is_flags(token: &[u8]) -> bool {
    (4..=6).contains(&token.len())
        && !token.iter().all(u8::is_ascii_digit)
        && token
            .iter()
            .all(|b| b.is_ascii_digit() || b".dXNnpPHhsSbBzZ".contains(b))
}
