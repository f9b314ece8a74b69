use chrono::FixedOffset;

use crate::limits::*;
use crate::model::*;
use crate::timegrid;

use super::availability::{free_slots, DayContext, DaySchedule};
use super::EngineError;

pub(crate) fn validate_period(period: &Period) -> Result<(), EngineError> {
    if period.start < MIN_VALID_TIMESTAMP_MS || period.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_external_id(value: &Option<String>, what: &'static str) -> Result<(), EngineError> {
    if let Some(v) = value
        && v.len() > MAX_EXTERNAL_ID_LEN
    {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

/// Any live appointment overlapping `period` is a conflict.
pub(crate) fn check_no_conflict(ps: &ProfessionalState, period: &Period) -> Result<(), EngineError> {
    if let Some(existing) = ps.live_overlapping(period).next() {
        metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::Conflict(existing.id));
    }
    Ok(())
}

/// A client booking must start on a slot the day's availability offers for
/// its duration. Runs the same pipeline as a slot query, against the state
/// the caller already holds locked. The day view only sees appointments that
/// start on that day, so callers pair this with `check_no_conflict`.
pub(crate) fn check_offered_slot(
    ps: &ProfessionalState,
    period: &Period,
    duration: Minutes,
    tz: FixedOffset,
) -> Result<(), EngineError> {
    let (date, minute) = timegrid::local_date_and_minute(period.start, tz)?;
    let day = DayContext::new(date, tz)?;
    let on_grid = (period.start - day.range.start) % MS_PER_MINUTE == 0;
    let offered = on_grid
        && free_slots(&DaySchedule::from_state(ps, &day), &day, duration as i64)?
            .binary_search(&minute)
            .is_ok();
    if offered {
        return Ok(());
    }
    Err(EngineError::SlotUnavailable {
        start: period.start,
    })
}
