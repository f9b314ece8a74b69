use crate::model::*;

use super::EngineError;

/// A professional's bookable window for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingWindow {
    Closed,
    Open(Span),
}

/// Absent record, `is_working = false`, or an inverted window → `Closed`.
pub fn resolve_window(hours: Option<WorkingHours>) -> WorkingWindow {
    match hours {
        Some(h) if h.is_working && h.start < h.end => WorkingWindow::Open(Span::new(h.start, h.end)),
        _ => WorkingWindow::Closed,
    }
}

pub(crate) fn validate_day_of_week(day_of_week: i64) -> Result<DayOfWeek, EngineError> {
    if (0..DAYS_PER_WEEK as i64).contains(&day_of_week) {
        Ok(day_of_week as DayOfWeek)
    } else {
        Err(EngineError::InvalidArgument(format!(
            "day_of_week {day_of_week} out of range 0..=6"
        )))
    }
}

pub(crate) fn validate_hours(hours: &WorkingHours) -> Result<(), EngineError> {
    let in_day = |m: Minutes| (0..MINUTES_PER_DAY).contains(&m);
    if !in_day(hours.start) || !in_day(hours.end) {
        return Err(EngineError::InvalidArgument(
            "working hours must fall within the day".into(),
        ));
    }
    if hours.is_working && hours.start >= hours.end {
        return Err(EngineError::InvalidArgument(
            "working hours must open before they close".into(),
        ));
    }
    Ok(())
}
