//! Interval math over UTC instants. Intervals are half-open: touching
//! endpoints do not overlap.

use chrono::Duration;

use crate::model::{Span, Timestamp};

pub fn overlaps(s1: Timestamp, e1: Timestamp, s2: Timestamp, e2: Timestamp) -> bool {
    s1 < e2 && e1 > s2
}

/// Expand an interval by `minutes` on both sides.
pub fn add_buffer(span: &Span, minutes: u32) -> Span {
    let pad = Duration::minutes(i64::from(minutes));
    Span::new(span.start - pad, span.end + pad)
}

/// True iff any event, padded by `buffer_minutes`, overlaps `proposed`.
pub fn has_conflict_with_events(proposed: &Span, events: &[Span], buffer_minutes: u32) -> bool {
    events.iter().any(|event| {
        let padded = add_buffer(event, buffer_minutes);
        overlaps(proposed.start, proposed.end, padded.start, padded.end)
    })
}

/// `t` is no later than `now + max_days` (inclusive). A window reaching past
/// the representable range is unbounded.
pub fn within_booking_window(t: Timestamp, now: Timestamp, max_days: u32) -> bool {
    match Duration::try_days(i64::from(max_days)).and_then(|d| now.checked_add_signed(d)) {
        Some(limit) => t <= limit,
        None => true,
    }
}

/// `t` is at least `minimum_minutes` after `now` (inclusive). Notice reaching
/// past the representable range can never be met.
pub fn meets_minimum_notice(t: Timestamp, now: Timestamp, minimum_minutes: u32) -> bool {
    Duration::try_minutes(i64::from(minimum_minutes))
        .and_then(|d| now.checked_add_signed(d))
        .is_some_and(|earliest| t >= earliest)
}
