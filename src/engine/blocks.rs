use chrono::NaiveDate;

use crate::model::*;

use super::EngineError;

/// Occupied intervals from manual blocks: recurring blocks keyed to
/// `day_of_week` plus single blocks on `date`. Overlapping blocks are kept
/// as-is; the slot generator treats the set disjunctively.
pub fn occupied_intervals(
    blocks: &[BlockedPeriod],
    day_of_week: DayOfWeek,
    date: NaiveDate,
) -> Vec<Span> {
    blocks
        .iter()
        .filter(|b| b.recurrence.applies_to(day_of_week, date))
        .map(|b| b.span)
        .collect()
}

/// Build the recurrence from the two mutually exclusive columns.
pub(crate) fn recurrence_from(
    day_of_week: Option<DayOfWeek>,
    date: Option<NaiveDate>,
) -> Result<BlockRecurrence, EngineError> {
    match (day_of_week, date) {
        (Some(day_of_week), None) => Ok(BlockRecurrence::Recurring { day_of_week }),
        (None, Some(date)) => Ok(BlockRecurrence::Single { date }),
        _ => Err(EngineError::InvalidArgument(
            "blocked period needs exactly one of day_of_week or date".into(),
        )),
    }
}

pub(crate) fn validate_block_span(span: &Span) -> Result<(), EngineError> {
    if span.start < 0 || span.end > MINUTES_PER_DAY || span.start >= span.end {
        return Err(EngineError::InvalidArgument(format!(
            "blocked period [{}, {}) is empty or outside the day",
            span.start, span.end
        )));
    }
    Ok(())
}
