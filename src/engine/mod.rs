mod availability;
mod blocks;
mod bookings;
mod conflict;
mod error;
mod mutations;
mod queries;
mod reader;
mod slots;
mod working_hours;
#[cfg(test)]
mod tests;

pub use availability::{available_slots, free_slots, DayContext, DaySchedule, SlotQuery};
pub use error::{EngineError, ErrorClass};
pub use reader::ScheduleReader;
pub use slots::{generate_slots, merge_overlapping, validate_duration};
pub use working_hours::{resolve_window, WorkingWindow};
pub(crate) use blocks::recurrence_from;
pub(crate) use working_hours::validate_day_of_week;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{FixedOffset, Offset, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedProfessionalState = Arc<RwLock<ProfessionalState>>;

/// Per-engine knobs that do not live in the WAL.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Reference timezone for turning a calendar date into absolute instants.
    pub tz: FixedOffset,
    /// Upper bound on each schedule read during a slot query.
    pub read_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tz: Utc.fix(),
            read_timeout: Duration::from_secs(2),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // flush what we have before compaction or stats
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                flush_and_respond(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        // the writer loop never routes appends here
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed to control path")));
        }
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedProfessionalState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: entity (appointment/block) id → professional id
    pub(super) entity_to_professional: DashMap<Ulid, Ulid>,
    /// Serializes registrations against each other and against compaction.
    pub(super) registration: Mutex<()>,
    pub(super) settings: EngineSettings,
}

/// Apply an event directly to a ProfessionalState (no locking, caller holds the lock).
fn apply_to_professional(
    ps: &mut ProfessionalState,
    event: &Event,
    entity_map: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::WorkingHoursSet {
            day_of_week, hours, ..
        } => {
            if let Some(day) = ps.week.get_mut(*day_of_week as usize) {
                *day = *hours;
            }
        }
        Event::BlockAdded { block } => {
            entity_map.insert(block.id, block.professional_id);
            ps.insert_block(block.clone());
        }
        Event::BlockRemoved { id, .. } => {
            ps.remove_block(*id);
            entity_map.remove(id);
        }
        Event::AppointmentReserved { appointment } | Event::AppointmentImported { appointment } => {
            entity_map.insert(appointment.id, appointment.professional_id);
            ps.insert_appointment(appointment.clone());
        }
        Event::AppointmentStatusChanged {
            id, status, rating, ..
        } => {
            if let Some(a) = ps.appointment_mut(*id) {
                a.status = *status;
                if rating.is_some() {
                    a.rating = *rating;
                }
            }
        }
        // Registration is handled at the DashMap level, not here
        Event::ProfessionalRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, settings: EngineSettings) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            entity_to_professional: DashMap::new(),
            registration: Mutex::new(()),
            settings,
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never use blocking_write here: this may run inside an async context
        // (lazy tenant creation).
        for event in &events {
            match event {
                Event::ProfessionalRegistered { id, name, rest_day } => {
                    let ps = ProfessionalState::new(*id, name.clone(), *rest_day);
                    engine.state.insert(*id, Arc::new(RwLock::new(ps)));
                }
                other => {
                    let pid = other.professional_id();
                    let Some(shared) = engine.get_professional(&pid) else {
                        warn!("replay: event for unknown professional {pid} skipped");
                        continue;
                    };
                    match shared.try_write() {
                        Ok(mut guard) => {
                            apply_to_professional(&mut guard, other, &engine.entity_to_professional)
                        }
                        Err(_) => warn!("replay: professional {pid} unexpectedly locked"),
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_professional(&self, id: &Ulid) -> Option<SharedProfessionalState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_professional_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_professional.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut ProfessionalState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_professional(ps, event, &self.entity_to_professional);
        Ok(())
    }

    /// Lookup entity → professional, get professional, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ProfessionalState>), EngineError> {
        let professional_id = self
            .get_professional_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let ps = self
            .get_professional(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let guard = ps.write_owned().await;
        Ok((professional_id, guard))
    }
}
