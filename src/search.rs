//! Searches and integration over sorted timestamp sequences.
//!
//! Sequences are sorted but may hold runs of equal timestamps. A binary
//! search lands somewhere inside such a run; a linear walk then moves to the
//! run's edge so no duplicate is ever skipped.

use std::cmp::Ordering;

use crate::time::{TraceTime, Window};

/// Binary search that stops at any element equal to `t`, or at the
/// insertion point when there is none.
fn bisect(times: &[TraceTime], t: TraceTime) -> usize {
    let (mut lo, mut hi) = (0, times.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match times[mid].cmp(&t) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return mid,
        }
    }
    lo
}

/// Index of the first element `>= t`.
pub fn first_at_or_after(times: &[TraceTime], t: TraceTime) -> Option<usize> {
    let mut i = bisect(times, t);
    while i > 0 && times[i - 1] >= t {
        i -= 1;
    }
    while i < times.len() && times[i] < t {
        i += 1;
    }
    (i < times.len()).then_some(i)
}

/// Index of the last element `<= t`.
pub fn last_at_or_before(times: &[TraceTime], t: TraceTime) -> Option<usize> {
    let mut i = bisect(times, t);
    while i < times.len() && times[i] <= t {
        i += 1;
    }
    while i > 0 && times[i - 1] > t {
        i -= 1;
    }
    i.checked_sub(1)
}

/// Index range of the elements inside `window`.
pub fn range_within(times: &[TraceTime], window: Window) -> std::ops::Range<usize> {
    if window.end < window.start {
        return 0..0;
    }
    let Some(first) = first_at_or_after(times, window.start) else {
        return 0..0;
    };
    match last_at_or_before(times, window.end) {
        Some(last) if last >= first => first..last + 1,
        _ => 0..0,
    }
}

/// Time inside `window` during which `holds` is true of a step function.
///
/// `states[i]` holds from `times[i]` until `times[i + 1]`. Nothing is known
/// before the first point or after the last one, so those stretches count
/// as false.
pub fn integrate<T>(
    times: &[TraceTime],
    states: &[T],
    window: Window,
    holds: impl Fn(&T) -> bool,
) -> i64 {
    debug_assert_eq!(times.len(), states.len());
    if window.is_empty() || times.len() < 2 {
        return 0;
    }
    // Segment containing the window start, or the first segment.
    let lo = last_at_or_before(times, window.start).unwrap_or(0);
    // Point closing the segment that contains the window end.
    let hi = match first_at_or_after(times, window.end) {
        Some(i) => i,
        None => times.len() - 1,
    };

    let mut total = 0;
    for i in lo..hi {
        if !holds(&states[i]) {
            continue;
        }
        let from = times[i].max(window.start);
        let to = times[i + 1].min(window.end);
        if to > from {
            total += to.since(from);
        }
    }
    total
}
