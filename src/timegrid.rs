//! Wall-clock ⇄ minute-offset conversion and the interval overlap rule.
//!
//! Every interval in the crate is half-open (`[start, end)`): back-to-back
//! intervals do not overlap, so a slot may start exactly when a booking ends.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike};

use crate::engine::EngineError;
use crate::model::{DayOfWeek, Minutes, Ms, Period, MINUTES_PER_DAY, MS_PER_DAY};

/// `"HH:MM"` → minutes since midnight (0..=1439).
pub fn to_minutes(wall_clock: &str) -> Result<Minutes, EngineError> {
    let bad = || EngineError::InvalidTimeFormat(wall_clock.to_string());

    let (h, m) = wall_clock.trim().split_once(':').ok_or_else(bad)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(bad());
    }
    if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let hour: Minutes = h.parse().map_err(|_| bad())?;
    let minute: Minutes = m.parse().map_err(|_| bad())?;
    if hour > 23 || minute > 59 {
        return Err(bad());
    }
    Ok(hour * 60 + minute)
}

/// Minutes since midnight → `"HH:MM"`. Values past midnight wrap.
pub fn format_minutes(minutes: Minutes) -> String {
    let m = minutes.rem_euclid(MINUTES_PER_DAY);
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// True iff `[start_a, end_a)` and `[start_b, end_b)` intersect.
pub fn overlaps<T: PartialOrd>(start_a: T, end_a: T, start_b: T, end_b: T) -> bool {
    start_a < end_b && end_a > start_b
}

/// `"YYYY-MM-DD"` → calendar date.
pub fn parse_date(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| EngineError::InvalidArgument(format!("bad date {s:?}: {e}")))
}

/// 0 = Sunday .. 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> DayOfWeek {
    date.weekday().num_days_from_sunday() as DayOfWeek
}

/// The calendar day `date` in the reference timezone, as absolute
/// milliseconds `[00:00:00.000, 24:00:00.000)`.
pub fn day_range(date: NaiveDate, tz: FixedOffset) -> Result<Period, EngineError> {
    let midnight = tz
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .single()
        .ok_or_else(|| EngineError::InvalidArgument(format!("date out of range: {date}")))?;
    let start = midnight.timestamp_millis();
    Ok(Period::new(start, start + MS_PER_DAY))
}

/// An absolute instant → (local date, minutes since local midnight).
pub fn local_date_and_minute(t: Ms, tz: FixedOffset) -> Result<(NaiveDate, Minutes), EngineError> {
    let utc = DateTime::from_timestamp_millis(t)
        .ok_or_else(|| EngineError::InvalidArgument(format!("timestamp out of range: {t}")))?;
    let local = utc.with_timezone(&tz);
    let minute = (local.hour() * 60 + local.minute()) as Minutes;
    Ok((local.date_naive(), minute))
}
