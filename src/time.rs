//! Fixed-precision trace timestamps.
//!
//! Trace timestamps are decimal seconds (`1234.567890`). They are kept as
//! integer nanoseconds so that comparisons and differences are exact no
//! matter how many of them are made.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Maximum number of fractional digits kept (nanosecond precision).
const MAX_FRACTION_DIGITS: usize = 9;

/// A point in trace time, in nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TraceTime(i64);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid trace timestamp {0:?}, expected decimal seconds such as 12.345678")]
pub struct ParseTimeError(String);

impl TraceTime {
    pub const ZERO: TraceTime = TraceTime(0);
    pub const MAX: TraceTime = TraceTime(i64::MAX);

    pub const fn from_nanos(nanos: i64) -> Self {
        TraceTime(nanos)
    }

    pub const fn from_micros(micros: i64) -> Self {
        TraceTime(micros * 1_000)
    }

    pub const fn from_secs(secs: i64) -> Self {
        TraceTime(secs * NANOS_PER_SEC)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Seconds as a float, for display only.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// Nanoseconds elapsed from `earlier` to `self`.
    pub const fn since(self, earlier: TraceTime) -> i64 {
        self.0 - earlier.0
    }

    /// Parse a trace timestamp token: digits, optionally a `.` and up to nine
    /// fractional digits, optionally a trailing `:`. Extra fractional digits
    /// beyond nanoseconds are truncated.
    pub fn parse_token(token: &[u8]) -> Option<Self> {
        let token = token.strip_suffix(b":").unwrap_or(token);
        let (int_part, frac_part) = match token.iter().position(|&b| b == b'.') {
            Some(dot) => (&token[..dot], &token[dot + 1..]),
            None => (token, &[][..]),
        };
        if int_part.is_empty() || !int_part.iter().all(u8::is_ascii_digit) {
            return None;
        }
        if !frac_part.iter().all(u8::is_ascii_digit) {
            return None;
        }

        let mut secs: i64 = 0;
        for &b in int_part {
            secs = secs.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
        }
        let mut frac: i64 = 0;
        for i in 0..MAX_FRACTION_DIGITS {
            let digit = frac_part.get(i).map_or(0, |&b| i64::from(b - b'0'));
            frac = frac * 10 + digit;
        }
        secs.checked_mul(NANOS_PER_SEC)?
            .checked_add(frac)
            .map(TraceTime)
    }
}

impl fmt::Display for TraceTime {
    /// Microsecond precision like ftrace unless the value needs nanoseconds.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let secs = abs / NANOS_PER_SEC as u64;
        let nanos = abs % NANOS_PER_SEC as u64;
        if nanos % 1_000 == 0 {
            write!(f, "{sign}{secs}.{:06}", nanos / 1_000)
        } else {
            write!(f, "{sign}{secs}.{nanos:09}")
        }
    }
}

impl FromStr for TraceTime {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TraceTime::parse_token(s.trim().as_bytes()).ok_or_else(|| ParseTimeError(s.to_string()))
    }
}

/// A closed time interval `[start, end]`.
///
/// An inverted window (`end < start`) is representable on purpose: every
/// query over it returns an empty result rather than failing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: TraceTime,
    pub end: TraceTime,
}

impl Window {
    pub const fn new(start: TraceTime, end: TraceTime) -> Self {
        Self { start, end }
    }

    /// Window spanning two points given in either order.
    pub fn between(a: TraceTime, b: TraceTime) -> Self {
        Self::new(a.min(b), a.max(b))
    }

    /// Length in nanoseconds, zero for empty or inverted windows.
    pub fn duration(&self) -> i64 {
        self.end.since(self.start).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, time: TraceTime) -> bool {
        self.start <= time && time <= self.end
    }
}
