use std::time::Instant;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{SLOTS_RETURNED, SLOT_QUERY_DURATION_SECONDS};

use super::availability::{available_slots, SlotQuery};
use super::{Engine, EngineError};

impl Engine {
    /// Free `"HH:MM"` start times for the query's date, ascending.
    pub async fn available_slots(&self, query: &SlotQuery) -> Result<Vec<String>, EngineError> {
        let started = Instant::now();
        let slots = available_slots(
            self,
            query,
            self.settings.tz,
            self.settings.read_timeout,
        )
        .await?;
        metrics::histogram!(SLOT_QUERY_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        metrics::histogram!(SLOTS_RETURNED).record(slots.len() as f64);
        Ok(slots)
    }

    /// The stored week, Sunday first. Empty for an unknown professional.
    pub async fn working_week(
        &self,
        professional_id: Ulid,
    ) -> Vec<(DayOfWeek, WorkingHours)> {
        let Some(ps) = self.get_professional(&professional_id) else {
            return Vec::new();
        };
        let guard = ps.read().await;
        guard
            .week
            .iter()
            .enumerate()
            .map(|(day, hours)| (day as DayOfWeek, *hours))
            .collect()
    }

    /// Appointments (any status) starting inside `range`, or all of them.
    pub async fn list_appointments(
        &self,
        professional_id: Ulid,
        range: Option<Period>,
    ) -> Result<Vec<Appointment>, EngineError> {
        if let Some(r) = range
            && r.duration_ms() > MAX_LIST_WINDOW_MS
        {
            return Err(EngineError::LimitExceeded("listing window too wide"));
        }
        let Some(ps) = self.get_professional(&professional_id) else {
            return Ok(Vec::new());
        };
        let guard = ps.read().await;
        Ok(match range {
            Some(r) => guard.appointments_starting_in(&r).to_vec(),
            None => guard.appointments.clone(),
        })
    }

    pub async fn list_blocked_periods(&self, professional_id: Ulid) -> Vec<BlockedPeriod> {
        let Some(ps) = self.get_professional(&professional_id) else {
            return Vec::new();
        };
        let guard = ps.read().await;
        guard.blocks.clone()
    }

    pub async fn list_professionals(&self) -> Vec<ProfessionalInfo> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for ps in shared {
            let guard = ps.read().await;
            out.push(ProfessionalInfo {
                id: guard.id,
                name: guard.name.clone(),
            });
        }
        out.sort_by_key(|p| p.id);
        out
    }
}
