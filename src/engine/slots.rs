use crate::limits::MAX_SERVICE_DURATION_MINUTES;
use crate::model::*;

use super::EngineError;

/// Reject non-positive or longer-than-a-day service durations.
pub fn validate_duration(duration: i64) -> Result<Minutes, EngineError> {
    if duration <= 0 || duration > MAX_SERVICE_DURATION_MINUTES as i64 {
        return Err(EngineError::InvalidDuration(duration));
    }
    Ok(duration as Minutes)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Walk `window` in fixed steps of `duration`, keeping each candidate
/// `[t, t + duration)` that overlaps neither a booking nor a block.
///
/// Candidates are aligned to `window.start`; a trailing slot that would run
/// past `window.end` is never offered. Output is strictly ascending and does
/// not depend on the order of `bookings` or `blocks`.
pub fn generate_slots(
    window: Span,
    duration: i64,
    bookings: &[Span],
    blocks: &[Span],
) -> Result<Vec<Minutes>, EngineError> {
    let duration = validate_duration(duration)?;

    let mut occupied: Vec<Span> = bookings.iter().chain(blocks).copied().collect();
    occupied.sort_by_key(|s| s.start);
    let occupied = merge_overlapping(&occupied);

    let mut free = Vec::new();
    let mut oi = 0;
    let mut t = window.start;
    while t + duration <= window.end {
        let candidate = Span::new(t, t + duration);
        while oi < occupied.len() && occupied[oi].end <= candidate.start {
            oi += 1;
        }
        // occupied is disjoint and sorted, so only the first survivor can overlap
        let taken = occupied
            .get(oi)
            .is_some_and(|o| o.start < candidate.end);
        if !taken {
            free.push(t);
        }
        t = candidate.end;
    }
    Ok(free)
}
