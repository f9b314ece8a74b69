use std::future::Future;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate};
use ulid::Ulid;

use crate::model::*;
use crate::timegrid;

use super::reader::ScheduleReader;
use super::slots::{generate_slots, validate_duration};
use super::working_hours::{resolve_window, WorkingWindow};
use super::{blocks, bookings, EngineError};

/// "Which start times can this professional take on `date` for a service of
/// `duration_minutes`?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQuery {
    pub professional_id: Ulid,
    pub date: NaiveDate,
    pub duration_minutes: i64,
    /// Carried for tenant routing; never used to filter.
    pub barbershop_id: Option<String>,
}

/// A calendar date pinned to the reference timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayContext {
    pub date: NaiveDate,
    pub day_of_week: DayOfWeek,
    /// Local midnight to local midnight, absolute ms.
    pub range: Period,
}

impl DayContext {
    pub fn new(date: NaiveDate, tz: FixedOffset) -> Result<Self, EngineError> {
        Ok(Self {
            date,
            day_of_week: timegrid::day_of_week(date),
            range: timegrid::day_range(date, tz)?,
        })
    }
}

/// Everything the slot pipeline needs for one professional on one day.
#[derive(Debug, Clone, Default)]
pub struct DaySchedule {
    pub hours: Option<WorkingHours>,
    pub appointments: Vec<Appointment>,
    pub blocks: Vec<BlockedPeriod>,
}

impl DaySchedule {
    /// Snapshot from in-memory state; caller holds the lock.
    pub fn from_state(ps: &ProfessionalState, day: &DayContext) -> Self {
        Self {
            hours: ps.hours_for(day.day_of_week),
            appointments: ps.appointments_starting_in(&day.range).to_vec(),
            blocks: ps.blocks_on(day.day_of_week, day.date).cloned().collect(),
        }
    }
}

/// Free slot starts, as minutes since local midnight.
pub fn free_slots(
    schedule: &DaySchedule,
    day: &DayContext,
    duration: i64,
) -> Result<Vec<Minutes>, EngineError> {
    validate_duration(duration)?;
    let window = match resolve_window(schedule.hours) {
        WorkingWindow::Closed => return Ok(Vec::new()),
        WorkingWindow::Open(window) => window,
    };
    let booked = bookings::occupied_intervals(&schedule.appointments, &day.range);
    let blocked = blocks::occupied_intervals(&schedule.blocks, day.day_of_week, day.date);
    generate_slots(window, duration, &booked, &blocked)
}

/// Resolve the three inputs concurrently, then compute `"HH:MM"` slots.
///
/// A read that fails or outlives `read_timeout` fails the whole query; no
/// partial result is ever returned.
pub async fn available_slots<R: ScheduleReader + ?Sized>(
    reader: &R,
    query: &SlotQuery,
    tz: FixedOffset,
    read_timeout: Duration,
) -> Result<Vec<String>, EngineError> {
    validate_duration(query.duration_minutes)?;
    let day = DayContext::new(query.date, tz)?;
    let pid = query.professional_id;

    let (hours, appointments, blocks) = tokio::try_join!(
        bounded_read(read_timeout, "working hours", reader.working_hours(pid, day.day_of_week)),
        bounded_read(
            read_timeout,
            "appointments",
            reader.appointments_starting_in(pid, day.range)
        ),
        bounded_read(
            read_timeout,
            "blocked periods",
            reader.blocked_periods(pid, day.day_of_week, day.date)
        ),
    )?;

    let schedule = DaySchedule {
        hours,
        appointments,
        blocks,
    };
    let slots = free_slots(&schedule, &day, query.duration_minutes)?;
    Ok(slots.into_iter().map(timegrid::format_minutes).collect())
}

async fn bounded_read<T>(
    limit: Duration,
    what: &'static str,
    read: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    match tokio::time::timeout(limit, read).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(EngineError::ReadFailure(e))) => Err(EngineError::ReadFailure(e)),
        Ok(Err(other)) => Err(EngineError::ReadFailure(format!("{what}: {other}"))),
        Err(_) => Err(EngineError::ReadFailure(format!(
            "{what}: timed out after {limit:?}"
        ))),
    }
}
