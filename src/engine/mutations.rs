use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::blocks::validate_block_span;
use super::conflict::{check_no_conflict, check_offered_slot, validate_external_id, validate_period};
use super::slots::validate_duration;
use super::working_hours::validate_hours;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// New professionals start with the canonical week: 09:00–18:00, closed
    /// on `rest_day`.
    pub async fn register_professional(
        &self,
        id: Ulid,
        name: Option<String>,
        rest_day: DayOfWeek,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("professional name too long"));
        }
        if rest_day as usize >= DAYS_PER_WEEK {
            return Err(EngineError::InvalidArgument(format!(
                "rest_day {rest_day} out of range 0..=6"
            )));
        }

        // Held until the insert, so compaction never snapshots between the
        // WAL append and the map insert.
        let _registering = self.registration.lock().await;
        if self.state.len() >= MAX_PROFESSIONALS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many professionals"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ProfessionalRegistered {
            id,
            name: name.clone(),
            rest_day,
        };
        self.wal_append(&event).await?;
        let ps = ProfessionalState::new(id, name, rest_day);
        self.state.insert(id, Arc::new(RwLock::new(ps)));
        info!("registered professional {id}");
        Ok(())
    }

    pub async fn set_working_hours(
        &self,
        professional_id: Ulid,
        day_of_week: DayOfWeek,
        hours: WorkingHours,
    ) -> Result<(), EngineError> {
        if day_of_week as usize >= DAYS_PER_WEEK {
            return Err(EngineError::InvalidArgument(format!(
                "day_of_week {day_of_week} out of range 0..=6"
            )));
        }
        validate_hours(&hours)?;
        let ps = self
            .get_professional(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let mut guard = ps.write().await;

        let event = Event::WorkingHoursSet {
            professional_id,
            day_of_week,
            hours,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_blocked_period(&self, block: BlockedPeriod) -> Result<(), EngineError> {
        validate_block_span(&block.span)?;
        if let BlockRecurrence::Recurring { day_of_week } = block.recurrence
            && day_of_week as usize >= DAYS_PER_WEEK
        {
            return Err(EngineError::InvalidArgument(format!(
                "day_of_week {day_of_week} out of range 0..=6"
            )));
        }
        if let Some(ref l) = block.label
            && l.len() > MAX_LABEL_LEN
        {
            return Err(EngineError::LimitExceeded("label too long"));
        }
        if self.entity_to_professional.contains_key(&block.id) {
            return Err(EngineError::AlreadyExists(block.id));
        }
        let ps = self
            .get_professional(&block.professional_id)
            .ok_or(EngineError::NotFound(block.professional_id))?;
        let mut guard = ps.write().await;
        if guard.blocks.len() >= MAX_BLOCKS_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many blocked periods"));
        }

        let event = Event::BlockAdded { block };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_blocked_period(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (professional_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.blocks.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BlockRemoved { id, professional_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(professional_id)
    }

    /// Book `period` for the professional. The availability check and the
    /// write happen under one write lock, so two requests for the same slot
    /// cannot both succeed.
    ///
    /// No booking may overlap a live appointment, including one that started
    /// the previous day. Client bookings must also land on an offered slot;
    /// professional bookings skip working hours and blocks.
    pub async fn reserve(
        &self,
        id: Ulid,
        professional_id: Ulid,
        period: Period,
        request: BookingRequest,
    ) -> Result<Appointment, EngineError> {
        validate_period(&period)?;
        if period.duration_ms() % MS_PER_MINUTE != 0 {
            return Err(EngineError::InvalidArgument(
                "appointment must last a whole number of minutes".into(),
            ));
        }
        let minutes = validate_duration(period.duration_ms() / MS_PER_MINUTE)?;
        validate_external_id(&request.client_id, "client_id too long")?;
        validate_external_id(&request.service_id, "service_id too long")?;
        if request.origin == BookingOrigin::Import {
            return Err(EngineError::InvalidArgument(
                "imported appointments go through import_appointment".into(),
            ));
        }
        if self.entity_to_professional.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let ps = self
            .get_professional(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let mut guard = ps.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }

        check_no_conflict(&guard, &period)?;
        if request.origin == BookingOrigin::Client {
            check_offered_slot(&guard, &period, minutes, self.settings.tz)?;
        }

        let appointment = Appointment {
            id,
            professional_id,
            start: period.start,
            duration: AppointmentDuration::WithDuration { minutes },
            status: AppointmentStatus::Pending,
            origin: request.origin,
            client_id: request.client_id,
            service_id: request.service_id,
            rating: None,
        };
        let event = Event::AppointmentReserved {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(
            "reserved {id} for professional {professional_id} ({} min, {})",
            minutes,
            appointment.origin.as_str()
        );
        Ok(appointment)
    }

    /// Load a record from the legacy store as-is: no slot or overlap check.
    /// `duration: None` marks a legacy point-in-time record.
    #[allow(clippy::too_many_arguments)]
    pub async fn import_appointment(
        &self,
        id: Ulid,
        professional_id: Ulid,
        start: Ms,
        duration: Option<i64>,
        status: AppointmentStatus,
        client_id: Option<String>,
        service_id: Option<String>,
    ) -> Result<Appointment, EngineError> {
        validate_period(&Period::new(start, start + 1))?;
        let duration = match duration {
            Some(d) => AppointmentDuration::WithDuration {
                minutes: validate_duration(d)?,
            },
            None => AppointmentDuration::LegacyPointInTime,
        };
        validate_external_id(&client_id, "client_id too long")?;
        validate_external_id(&service_id, "service_id too long")?;
        if self.entity_to_professional.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let ps = self
            .get_professional(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let mut guard = ps.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }

        let appointment = Appointment {
            id,
            professional_id,
            start,
            duration,
            status,
            origin: BookingOrigin::Import,
            client_id,
            service_id,
            rating: None,
        };
        let event = Event::AppointmentImported {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(appointment)
    }

    /// Advance an appointment through its lifecycle. A rating (1..=5) may
    /// only accompany completion.
    pub async fn update_appointment_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
        rating: Option<u8>,
    ) -> Result<Appointment, EngineError> {
        if let Some(r) = rating {
            if status != AppointmentStatus::Completed {
                return Err(EngineError::InvalidArgument(
                    "rating is only accepted on completion".into(),
                ));
            }
            if !(1..=5).contains(&r) {
                return Err(EngineError::InvalidArgument(format!(
                    "rating {r} out of range 1..=5"
                )));
            }
        }

        let (professional_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .appointments
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.status)
            .ok_or(EngineError::NotFound(id))?;
        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current,
                to: status,
            });
        }

        let event = Event::AppointmentStatusChanged {
            id,
            professional_id,
            status,
            rating,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("appointment {id}: {current} -> {status}");
        guard
            .appointments
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        // Held until the swap completes so no write lands between snapshot and swap.
        let registering = self.registration.lock().await;
        let mut guards = Vec::new();

        let mut professionals: Vec<_> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        professionals.sort_by_key(|(id, _)| *id);
        for (_, ps) in professionals {
            let guard = ps.read_owned().await;
            events.push(Event::ProfessionalRegistered {
                id: guard.id,
                name: guard.name.clone(),
                // the week below overrides the default rest day
                rest_day: DEFAULT_REST_DAY,
            });
            for (day, hours) in guard.week.iter().enumerate() {
                events.push(Event::WorkingHoursSet {
                    professional_id: guard.id,
                    day_of_week: day as DayOfWeek,
                    hours: *hours,
                });
            }
            for block in &guard.blocks {
                events.push(Event::BlockAdded {
                    block: block.clone(),
                });
            }
            for appointment in &guard.appointments {
                // status and rating travel inside the snapshot
                events.push(Event::AppointmentImported {
                    appointment: appointment.clone(),
                });
            }
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        drop(registering);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
