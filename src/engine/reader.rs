use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Read side of the availability pipeline. Each read is independent so the
/// three can run concurrently; a failure in any of them aborts the query.
#[async_trait]
pub trait ScheduleReader: Send + Sync {
    /// `None` when no record exists for that weekday.
    async fn working_hours(
        &self,
        professional_id: Ulid,
        day_of_week: DayOfWeek,
    ) -> Result<Option<WorkingHours>, EngineError>;

    /// Appointments of any status starting inside `range`.
    async fn appointments_starting_in(
        &self,
        professional_id: Ulid,
        range: Period,
    ) -> Result<Vec<Appointment>, EngineError>;

    /// Recurring blocks for `day_of_week` and single blocks on `date`.
    async fn blocked_periods(
        &self,
        professional_id: Ulid,
        day_of_week: DayOfWeek,
        date: NaiveDate,
    ) -> Result<Vec<BlockedPeriod>, EngineError>;
}

/// An unknown professional reads as having no schedule at all.
#[async_trait]
impl ScheduleReader for Engine {
    async fn working_hours(
        &self,
        professional_id: Ulid,
        day_of_week: DayOfWeek,
    ) -> Result<Option<WorkingHours>, EngineError> {
        let Some(ps) = self.get_professional(&professional_id) else {
            return Ok(None);
        };
        let guard = ps.read().await;
        Ok(guard.hours_for(day_of_week))
    }

    async fn appointments_starting_in(
        &self,
        professional_id: Ulid,
        range: Period,
    ) -> Result<Vec<Appointment>, EngineError> {
        let Some(ps) = self.get_professional(&professional_id) else {
            return Ok(Vec::new());
        };
        let guard = ps.read().await;
        Ok(guard.appointments_starting_in(&range).to_vec())
    }

    async fn blocked_periods(
        &self,
        professional_id: Ulid,
        day_of_week: DayOfWeek,
        date: NaiveDate,
    ) -> Result<Vec<BlockedPeriod>, EngineError> {
        let Some(ps) = self.get_professional(&professional_id) else {
            return Ok(Vec::new());
        };
        let guard = ps.read().await;
        Ok(guard.blocks_on(day_of_week, date).cloned().collect())
    }
}
