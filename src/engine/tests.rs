use super::*;
use crate::limits::*;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("chairslot_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), EngineSettings::default()).unwrap()
}

/// Monday 2026-10-19.
fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

/// Local midnight of `date` in UTC.
fn midnight(date: NaiveDate) -> Ms {
    date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis()
}

fn at(date: NaiveDate, hh: Ms, mm: Ms, minutes: Ms) -> Period {
    let start = midnight(date) + hh * H + mm * M;
    Period::new(start, start + minutes * M)
}

fn query(pid: Ulid, date: NaiveDate, duration: i64) -> SlotQuery {
    SlotQuery {
        professional_id: pid,
        date,
        duration_minutes: duration,
        barbershop_id: None,
    }
}

fn client() -> BookingRequest {
    BookingRequest {
        origin: BookingOrigin::Client,
        client_id: Some("client-1".into()),
        service_id: Some("haircut".into()),
    }
}

fn pro() -> BookingRequest {
    BookingRequest {
        origin: BookingOrigin::Professional,
        client_id: None,
        service_id: None,
    }
}

async fn registered(engine: &Engine) -> Ulid {
    let pid = Ulid::new();
    engine
        .register_professional(pid, Some("Ana".into()), 0)
        .await
        .unwrap();
    pid
}

// ── Registration & working hours ─────────────────────────

#[tokio::test]
async fn registration_materializes_default_week() {
    let engine = new_engine("register_defaults.wal");
    let pid = registered(&engine).await;

    let week = engine.working_week(pid).await;
    assert_eq!(week.len(), 7);
    assert_eq!(week[0], (0, WorkingHours::closed()));
    for (day, hours) in &week[1..] {
        assert!(*day > 0);
        assert_eq!(*hours, WorkingHours::open(540, 1080));
    }

    let slots = engine.available_slots(&query(pid, monday(), 60)).await.unwrap();
    assert_eq!(slots.len(), 9);
    assert_eq!(slots.first().map(String::as_str), Some("09:00"));
    assert_eq!(slots.last().map(String::as_str), Some("17:00"));
}

#[tokio::test]
async fn duplicate_registration_rejected() {
    let engine = new_engine("register_dup.wal");
    let pid = registered(&engine).await;
    let result = engine.register_professional(pid, None, 0).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(id)) if id == pid));
}

#[tokio::test]
async fn registration_limits() {
    let engine = new_engine("register_limits.wal");
    let long = "x".repeat(MAX_NAME_LEN + 1);
    assert!(matches!(
        engine.register_professional(Ulid::new(), Some(long), 0).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.register_professional(Ulid::new(), None, 7).await,
        Err(EngineError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn rest_day_has_no_slots() {
    let engine = new_engine("rest_day.wal");
    let pid = registered(&engine).await;
    let sunday = monday().pred_opt().unwrap();
    let slots = engine.available_slots(&query(pid, sunday, 30)).await.unwrap();
    assert!(slots.is_empty());
}

#[tokio::test]
async fn day_off_via_working_hours() {
    let engine = new_engine("day_off.wal");
    let pid = registered(&engine).await;
    engine
        .set_working_hours(pid, 1, WorkingHours::closed())
        .await
        .unwrap();
    let slots = engine.available_slots(&query(pid, monday(), 30)).await.unwrap();
    assert!(slots.is_empty());
}

#[tokio::test]
async fn custom_hours_shape_the_window() {
    let engine = new_engine("custom_hours.wal");
    let pid = registered(&engine).await;
    engine
        .set_working_hours(pid, 1, WorkingHours::open(9 * 60, 12 * 60))
        .await
        .unwrap();
    let slots = engine.available_slots(&query(pid, monday(), 60)).await.unwrap();
    assert_eq!(slots, vec!["09:00", "10:00", "11:00"]);
}

#[tokio::test]
async fn working_hours_validation() {
    let engine = new_engine("hours_validation.wal");
    let pid = registered(&engine).await;
    assert!(matches!(
        engine.set_working_hours(pid, 1, WorkingHours::open(600, 540)).await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.set_working_hours(pid, 7, WorkingHours::open(540, 600)).await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine
            .set_working_hours(Ulid::new(), 1, WorkingHours::open(540, 600))
            .await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Slot queries ─────────────────────────────────────────

#[tokio::test]
async fn unknown_professional_has_no_slots() {
    let engine = new_engine("unknown_pro.wal");
    let slots = engine
        .available_slots(&query(Ulid::new(), monday(), 30))
        .await
        .unwrap();
    assert!(slots.is_empty());
}

#[tokio::test]
async fn invalid_duration_rejected() {
    let engine = new_engine("invalid_duration.wal");
    let pid = registered(&engine).await;
    for bad in [0, -30, 1441] {
        let r = engine.available_slots(&query(pid, monday(), bad)).await;
        assert!(matches!(r, Err(EngineError::InvalidDuration(d)) if d == bad));
    }
}

#[tokio::test]
async fn booking_and_lunch_block() {
    let engine = new_engine("booking_and_lunch.wal");
    let pid = registered(&engine).await;
    engine
        .add_blocked_period(BlockedPeriod {
            id: Ulid::new(),
            professional_id: pid,
            recurrence: BlockRecurrence::Recurring { day_of_week: 1 },
            span: Span::new(12 * 60, 13 * 60),
            label: Some("Lunch".into()),
        })
        .await
        .unwrap();
    engine
        .reserve(Ulid::new(), pid, at(monday(), 10, 0, 60), pro())
        .await
        .unwrap();

    let slots = engine.available_slots(&query(pid, monday(), 30)).await.unwrap();
    for taken in ["10:00", "10:30", "12:00", "12:30"] {
        assert!(!slots.contains(&taken.to_string()), "{taken} should be taken");
    }
    for free in ["09:00", "09:30", "11:00", "11:30", "13:00", "17:30"] {
        assert!(slots.contains(&free.to_string()), "{free} should be free");
    }
    assert_eq!(slots.len(), 18 - 4);

    // the recurring block applies to the following Monday too
    let next_monday = monday() + chrono::Duration::days(7);
    let slots = engine.available_slots(&query(pid, next_monday, 30)).await.unwrap();
    assert_eq!(slots.len(), 16);
}

#[tokio::test]
async fn single_date_block_only_that_day() {
    let engine = new_engine("single_block.wal");
    let pid = registered(&engine).await;
    engine
        .add_blocked_period(BlockedPeriod {
            id: Ulid::new(),
            professional_id: pid,
            recurrence: BlockRecurrence::Single { date: monday() },
            span: Span::new(9 * 60, 18 * 60),
            label: Some("Dentist".into()),
        })
        .await
        .unwrap();
    assert!(engine.available_slots(&query(pid, monday(), 30)).await.unwrap().is_empty());
    let tuesday = monday().succ_opt().unwrap();
    assert_eq!(
        engine.available_slots(&query(pid, tuesday, 30)).await.unwrap().len(),
        18
    );
}

#[tokio::test]
async fn removing_block_restores_slots() {
    let engine = new_engine("remove_block.wal");
    let pid = registered(&engine).await;
    let block_id = Ulid::new();
    engine
        .add_blocked_period(BlockedPeriod {
            id: block_id,
            professional_id: pid,
            recurrence: BlockRecurrence::Recurring { day_of_week: 1 },
            span: Span::new(9 * 60, 10 * 60),
            label: None,
        })
        .await
        .unwrap();
    assert_eq!(engine.list_blocked_periods(pid).await.len(), 1);
    assert_eq!(engine.available_slots(&query(pid, monday(), 60)).await.unwrap().len(), 8);

    assert_eq!(engine.remove_blocked_period(block_id).await.unwrap(), pid);
    assert!(engine.list_blocked_periods(pid).await.is_empty());
    assert_eq!(engine.available_slots(&query(pid, monday(), 60)).await.unwrap().len(), 9);

    assert!(matches!(
        engine.remove_blocked_period(block_id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn blocked_period_validation() {
    let engine = new_engine("block_validation.wal");
    let pid = registered(&engine).await;
    let mk = |span: Span, recurrence| BlockedPeriod {
        id: Ulid::new(),
        professional_id: pid,
        recurrence,
        span,
        label: None,
    };
    let weekly = BlockRecurrence::Recurring { day_of_week: 1 };
    assert!(engine.add_blocked_period(mk(Span::new(600, 600), weekly)).await.is_err());
    assert!(
        engine
            .add_blocked_period(mk(Span::new(600, 660), BlockRecurrence::Recurring { day_of_week: 9 }))
            .await
            .is_err()
    );
    let mut orphan = mk(Span::new(600, 660), weekly);
    orphan.professional_id = Ulid::new();
    assert!(matches!(
        engine.add_blocked_period(orphan).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn booking_from_previous_day_is_not_counted() {
    // Appointments belong to the day they start on.
    let engine = new_engine("prev_day.wal");
    let pid = registered(&engine).await;
    engine
        .set_working_hours(pid, 0, WorkingHours::open(0, 24 * 60 - 1))
        .await
        .unwrap();
    let sunday = monday().pred_opt().unwrap();
    engine
        .reserve(Ulid::new(), pid, at(sunday, 23, 30, 60), pro())
        .await
        .unwrap();

    let slots = engine.available_slots(&query(pid, monday(), 60)).await.unwrap();
    assert_eq!(slots.first().map(String::as_str), Some("09:00"));
}

#[tokio::test]
async fn client_cannot_book_over_previous_day_spill() {
    let engine = new_engine("prev_day_spill.wal");
    let pid = registered(&engine).await;
    engine
        .set_working_hours(pid, 1, WorkingHours::open(0, 6 * 60))
        .await
        .unwrap();
    let sunday = monday().pred_opt().unwrap();
    let late = Ulid::new();
    engine
        .reserve(late, pid, at(sunday, 23, 30, 60), pro())
        .await
        .unwrap();

    // Still offered, since the Sunday booking belongs to Sunday...
    let slots = engine.available_slots(&query(pid, monday(), 30)).await.unwrap();
    assert_eq!(slots.first().map(String::as_str), Some("00:00"));

    // ...but the booking itself is refused.
    let result = engine
        .reserve(Ulid::new(), pid, at(monday(), 0, 0, 30), client())
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == late));
    engine
        .reserve(Ulid::new(), pid, at(monday(), 0, 30, 30), client())
        .await
        .unwrap();
}

#[tokio::test]
async fn reference_offset_shifts_the_day() {
    let settings = EngineSettings {
        tz: FixedOffset::west_opt(3 * 3600).unwrap(),
        ..EngineSettings::default()
    };
    let engine = Engine::new(test_wal_path("offset_day.wal"), settings).unwrap();
    let pid = registered(&engine).await;

    // 12:00 UTC is 09:00 at UTC-3
    let start = midnight(monday()) + 12 * H;
    engine
        .reserve(Ulid::new(), pid, Period::new(start, start + H), client())
        .await
        .unwrap();

    let slots = engine.available_slots(&query(pid, monday(), 60)).await.unwrap();
    assert_eq!(slots.first().map(String::as_str), Some("10:00"));
    assert_eq!(slots.len(), 8);
}

// ── Reservations ─────────────────────────────────────────

#[tokio::test]
async fn reserve_removes_slot() {
    let engine = new_engine("reserve_removes.wal");
    let pid = registered(&engine).await;
    let appt = engine
        .reserve(Ulid::new(), pid, at(monday(), 10, 0, 60), client())
        .await
        .unwrap();
    assert_eq!(appt.status, AppointmentStatus::Pending);
    assert_eq!(appt.origin, BookingOrigin::Client);
    assert_eq!(appt.duration, AppointmentDuration::WithDuration { minutes: 60 });

    let slots = engine.available_slots(&query(pid, monday(), 60)).await.unwrap();
    assert!(!slots.contains(&"10:00".to_string()));
    assert_eq!(slots.len(), 8);
}

#[tokio::test]
async fn overlapping_reserve_conflicts() {
    let engine = new_engine("reserve_conflict.wal");
    let pid = registered(&engine).await;
    let first = Ulid::new();
    engine
        .reserve(first, pid, at(monday(), 10, 0, 60), pro())
        .await
        .unwrap();

    let result = engine
        .reserve(Ulid::new(), pid, at(monday(), 10, 30, 60), pro())
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == first));

    // back-to-back is fine
    engine
        .reserve(Ulid::new(), pid, at(monday(), 11, 0, 30), pro())
        .await
        .unwrap();
}

#[tokio::test]
async fn client_must_land_on_offered_slot() {
    let engine = new_engine("client_offered.wal");
    let pid = registered(&engine).await;
    let sunday = monday().pred_opt().unwrap();

    // closed day
    let r = engine
        .reserve(Ulid::new(), pid, at(sunday, 10, 0, 30), client())
        .await;
    assert!(matches!(r, Err(EngineError::SlotUnavailable { .. })));

    // off the grid
    let r = engine
        .reserve(Ulid::new(), pid, at(monday(), 10, 10, 30), client())
        .await;
    assert!(matches!(r, Err(EngineError::SlotUnavailable { .. })));

    // runs past closing
    let r = engine
        .reserve(Ulid::new(), pid, at(monday(), 17, 30, 60), client())
        .await;
    assert!(matches!(r, Err(EngineError::SlotUnavailable { .. })));

    // the professional may book outside the offered grid
    engine
        .reserve(Ulid::new(), pid, at(sunday, 10, 0, 30), pro())
        .await
        .unwrap();
    engine
        .reserve(Ulid::new(), pid, at(monday(), 10, 10, 30), pro())
        .await
        .unwrap();
}

#[tokio::test]
async fn reserve_rejects_bad_input() {
    let engine = new_engine("reserve_bad_input.wal");
    let pid = registered(&engine).await;

    let start = midnight(monday()) + 10 * H;
    let r = engine
        .reserve(Ulid::new(), pid, Period::new(start, start + 90_000), pro())
        .await;
    assert!(matches!(r, Err(EngineError::InvalidArgument(_))));

    let r = engine
        .reserve(Ulid::new(), pid, Period::new(start, start + 25 * H), pro())
        .await;
    assert!(matches!(r, Err(EngineError::InvalidDuration(_))));

    let r = engine
        .reserve(Ulid::new(), Ulid::new(), at(monday(), 10, 0, 30), pro())
        .await;
    assert!(matches!(r, Err(EngineError::NotFound(_))));

    let mut import = pro();
    import.origin = BookingOrigin::Import;
    let r = engine
        .reserve(Ulid::new(), pid, at(monday(), 10, 0, 30), import)
        .await;
    assert!(matches!(r, Err(EngineError::InvalidArgument(_))));

    let r = engine
        .reserve(Ulid::new(), pid, Period::new(1_000, 1_000 + H), pro())
        .await;
    assert!(matches!(r, Err(EngineError::LimitExceeded(_))));

    let id = Ulid::new();
    engine
        .reserve(id, pid, at(monday(), 9, 0, 30), pro())
        .await
        .unwrap();
    let r = engine.reserve(id, pid, at(monday(), 15, 0, 30), pro()).await;
    assert!(matches!(r, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn concurrent_reserve_same_slot_one_wins() {
    let engine = Arc::new(new_engine("reserve_race.wal"));
    let pid = registered(&engine).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.reserve(Ulid::new(), pid, at(monday(), 14, 0, 30), client())
                .await
        }));
    }

    let mut won = 0;
    let mut lost = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => {
                assert_eq!(e.class(), ErrorClass::Conflict);
                lost += 1;
            }
        }
    }
    assert_eq!(won, 1);
    assert_eq!(lost, 15);
    let list = engine.list_appointments(pid, None).await.unwrap();
    assert_eq!(list.len(), 1);
}

#[tokio::test]
async fn cancellation_frees_the_slot() {
    let engine = new_engine("cancel_frees.wal");
    let pid = registered(&engine).await;
    let id = Ulid::new();
    engine
        .reserve(id, pid, at(monday(), 10, 0, 60), client())
        .await
        .unwrap();
    engine
        .update_appointment_status(id, AppointmentStatus::CancelledByClient, None)
        .await
        .unwrap();

    let slots = engine.available_slots(&query(pid, monday(), 60)).await.unwrap();
    assert!(slots.contains(&"10:00".to_string()));

    // and can be booked again
    engine
        .reserve(Ulid::new(), pid, at(monday(), 10, 0, 60), client())
        .await
        .unwrap();
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn status_lifecycle_with_rating() {
    let engine = new_engine("lifecycle.wal");
    let pid = registered(&engine).await;
    let id = Ulid::new();
    engine
        .reserve(id, pid, at(monday(), 9, 0, 30), client())
        .await
        .unwrap();

    for status in [AppointmentStatus::Confirmed, AppointmentStatus::CheckedIn] {
        let a = engine.update_appointment_status(id, status, None).await.unwrap();
        assert_eq!(a.status, status);
    }

    let r = engine
        .update_appointment_status(id, AppointmentStatus::Completed, Some(6))
        .await;
    assert!(matches!(r, Err(EngineError::InvalidArgument(_))));

    let done = engine
        .update_appointment_status(id, AppointmentStatus::Completed, Some(5))
        .await
        .unwrap();
    assert_eq!(done.rating, Some(5));

    // completed appointments still hold their time
    let slots = engine.available_slots(&query(pid, monday(), 30)).await.unwrap();
    assert!(!slots.contains(&"09:00".to_string()));

    let r = engine
        .update_appointment_status(id, AppointmentStatus::CancelledByPro, None)
        .await;
    assert!(matches!(
        r,
        Err(EngineError::InvalidTransition {
            from: AppointmentStatus::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn invalid_transitions_rejected() {
    let engine = new_engine("bad_transitions.wal");
    let pid = registered(&engine).await;
    let id = Ulid::new();
    engine
        .reserve(id, pid, at(monday(), 9, 0, 30), pro())
        .await
        .unwrap();

    let r = engine
        .update_appointment_status(id, AppointmentStatus::Completed, None)
        .await;
    assert!(matches!(r, Err(EngineError::InvalidTransition { .. })));

    let r = engine
        .update_appointment_status(id, AppointmentStatus::Confirmed, Some(4))
        .await;
    assert!(matches!(r, Err(EngineError::InvalidArgument(_))));

    let r = engine
        .update_appointment_status(Ulid::new(), AppointmentStatus::Confirmed, None)
        .await;
    assert!(matches!(r, Err(EngineError::NotFound(_))));
}

// ── Imports ──────────────────────────────────────────────

#[tokio::test]
async fn legacy_import_blocks_start_minute_only() {
    let engine = new_engine("legacy_import.wal");
    let pid = registered(&engine).await;
    let start = at(monday(), 10, 30, 1).start;
    let appt = engine
        .import_appointment(
            Ulid::new(),
            pid,
            start,
            None,
            AppointmentStatus::Confirmed,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(appt.duration, AppointmentDuration::LegacyPointInTime);
    assert_eq!(appt.end(), None);

    let slots = engine.available_slots(&query(pid, monday(), 30)).await.unwrap();
    assert!(!slots.contains(&"10:30".to_string()));
    assert!(slots.contains(&"10:00".to_string()));
    assert!(slots.contains(&"11:00".to_string()));
}

#[tokio::test]
async fn import_skips_overlap_checks() {
    let engine = new_engine("import_overlap.wal");
    let pid = registered(&engine).await;
    let start = at(monday(), 10, 0, 60).start;
    for _ in 0..2 {
        engine
            .import_appointment(
                Ulid::new(),
                pid,
                start,
                Some(60),
                AppointmentStatus::Completed,
                Some("c".into()),
                None,
            )
            .await
            .unwrap();
    }
    assert_eq!(engine.list_appointments(pid, None).await.unwrap().len(), 2);

    let r = engine
        .import_appointment(
            Ulid::new(),
            pid,
            start,
            Some(0),
            AppointmentStatus::Pending,
            None,
            None,
        )
        .await;
    assert!(matches!(r, Err(EngineError::InvalidDuration(0))));
}

// ── Listings ─────────────────────────────────────────────

#[tokio::test]
async fn list_appointments_by_range() {
    let engine = new_engine("list_range.wal");
    let pid = registered(&engine).await;
    let tuesday = monday().succ_opt().unwrap();
    engine.reserve(Ulid::new(), pid, at(monday(), 9, 0, 30), pro()).await.unwrap();
    engine.reserve(Ulid::new(), pid, at(tuesday, 9, 0, 30), pro()).await.unwrap();
    engine.reserve(Ulid::new(), pid, at(monday(), 8, 0, 30), pro()).await.unwrap();

    let all = engine.list_appointments(pid, None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].start <= w[1].start));

    let day = Period::new(midnight(monday()), midnight(tuesday));
    assert_eq!(engine.list_appointments(pid, Some(day)).await.unwrap().len(), 2);

    let too_wide = Period::new(midnight(monday()), midnight(monday()) + MAX_LIST_WINDOW_MS + 1);
    assert!(matches!(
        engine.list_appointments(pid, Some(too_wide)).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn list_professionals_sorted() {
    let engine = new_engine("list_pros.wal");
    let mut ids = Vec::new();
    for name in ["Ana", "Bruno", "Caio"] {
        let id = Ulid::new();
        engine
            .register_professional(id, Some(name.into()), 0)
            .await
            .unwrap();
        ids.push(id);
    }
    ids.sort();
    let listed: Vec<Ulid> = engine.list_professionals().await.iter().map(|p| p.id).collect();
    assert_eq!(listed, ids);
}

// ── Schedule readers ─────────────────────────────────────

struct FixedReader {
    hours: Option<WorkingHours>,
    appointments: Vec<Appointment>,
    fail_blocks: bool,
    delay: Duration,
}

#[async_trait]
impl ScheduleReader for FixedReader {
    async fn working_hours(&self, _: Ulid, _: DayOfWeek) -> Result<Option<WorkingHours>, EngineError> {
        Ok(self.hours)
    }

    async fn appointments_starting_in(
        &self,
        _: Ulid,
        _: Period,
    ) -> Result<Vec<Appointment>, EngineError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.appointments.clone())
    }

    async fn blocked_periods(
        &self,
        _: Ulid,
        _: DayOfWeek,
        _: NaiveDate,
    ) -> Result<Vec<BlockedPeriod>, EngineError> {
        if self.fail_blocks {
            return Err(EngineError::InvalidArgument("store unreachable".into()));
        }
        Ok(Vec::new())
    }
}

fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

#[tokio::test]
async fn custom_reader_drives_slots() {
    let reader = FixedReader {
        hours: Some(WorkingHours::open(9 * 60, 12 * 60)),
        appointments: Vec::new(),
        fail_blocks: false,
        delay: Duration::ZERO,
    };
    let slots = available_slots(&reader, &query(Ulid::new(), monday(), 60), utc(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(slots, vec!["09:00", "10:00", "11:00"]);
}

#[tokio::test]
async fn failing_read_fails_the_query() {
    let reader = FixedReader {
        hours: Some(WorkingHours::open(9 * 60, 12 * 60)),
        appointments: Vec::new(),
        fail_blocks: true,
        delay: Duration::ZERO,
    };
    let r = available_slots(&reader, &query(Ulid::new(), monday(), 60), utc(), Duration::from_secs(1)).await;
    match r {
        Err(e @ EngineError::ReadFailure(_)) => assert_eq!(e.class(), ErrorClass::Internal),
        other => panic!("expected read failure, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_read_times_out() {
    let reader = FixedReader {
        hours: Some(WorkingHours::open(9 * 60, 12 * 60)),
        appointments: Vec::new(),
        fail_blocks: false,
        delay: Duration::from_secs(30),
    };
    let r = available_slots(&reader, &query(Ulid::new(), monday(), 60), utc(), Duration::from_millis(50)).await;
    assert!(matches!(r, Err(EngineError::ReadFailure(_))));
}

#[tokio::test]
async fn invalid_duration_checked_before_reads() {
    let reader = FixedReader {
        hours: None,
        appointments: Vec::new(),
        fail_blocks: true,
        delay: Duration::ZERO,
    };
    let r = available_slots(&reader, &query(Ulid::new(), monday(), 0), utc(), Duration::from_secs(1)).await;
    assert!(matches!(r, Err(EngineError::InvalidDuration(0))));
}

// ── WAL replay & compaction ──────────────────────────────

#[tokio::test]
async fn wal_replay_restores_schedule() {
    let path = test_wal_path("replay_schedule.wal");
    let pid = Ulid::new();
    let appt_id = Ulid::new();
    let block_id = Ulid::new();
    {
        let engine = Engine::new(path.clone(), EngineSettings::default()).unwrap();
        engine.register_professional(pid, Some("Ana".into()), 0).await.unwrap();
        engine
            .set_working_hours(pid, 1, WorkingHours::open(8 * 60, 12 * 60))
            .await
            .unwrap();
        engine
            .add_blocked_period(BlockedPeriod {
                id: block_id,
                professional_id: pid,
                recurrence: BlockRecurrence::Recurring { day_of_week: 1 },
                span: Span::new(11 * 60, 12 * 60),
                label: Some("Break".into()),
            })
            .await
            .unwrap();
        engine
            .reserve(appt_id, pid, at(monday(), 9, 0, 60), client())
            .await
            .unwrap();
        engine
            .update_appointment_status(appt_id, AppointmentStatus::Confirmed, None)
            .await
            .unwrap();
    }

    let engine = Engine::new(path, EngineSettings::default()).unwrap();
    let slots = engine.available_slots(&query(pid, monday(), 60)).await.unwrap();
    assert_eq!(slots, vec!["08:00", "10:00"]);

    let list = engine.list_appointments(pid, None).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].status, AppointmentStatus::Confirmed);
    assert_eq!(list[0].client_id.as_deref(), Some("client-1"));
    assert_eq!(engine.get_professional_for_entity(&appt_id), Some(pid));
    assert_eq!(engine.get_professional_for_entity(&block_id), Some(pid));
}

#[tokio::test]
async fn group_commit_batches_appends() {
    let path = test_wal_path("group_commit_batch.wal");
    let engine = Arc::new(Engine::new(path.clone(), EngineSettings::default()).unwrap());

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.register_professional(Ulid::new(), Some(format!("P{i}")), 0)
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.list_professionals().await.len(), n);

    let engine2 = Engine::new(path, EngineSettings::default()).unwrap();
    assert_eq!(engine2.list_professionals().await.len(), n);
}

#[tokio::test]
async fn registrations_racing_compaction_survive_restart() {
    let path = test_wal_path("register_vs_compact.wal");
    let engine = Arc::new(Engine::new(path.clone(), EngineSettings::default()).unwrap());

    let n = 40;
    let ids: Vec<Ulid> = (0..n).map(|_| Ulid::new()).collect();
    let mut handles = Vec::new();
    for id in ids.clone() {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.register_professional(id, None, 0).await.unwrap();
            eng.set_working_hours(id, 1, WorkingHours::open(8 * 60, 10 * 60))
                .await
                .unwrap();
        }));
    }
    let compactor = {
        let eng = engine.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                eng.compact_wal().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    for h in handles {
        h.await.unwrap();
    }
    compactor.await.unwrap();

    let engine2 = Engine::new(path, EngineSettings::default()).unwrap();
    assert_eq!(engine2.list_professionals().await.len(), n);
    for id in ids {
        let slots = engine2.available_slots(&query(id, monday(), 60)).await.unwrap();
        assert_eq!(slots, vec!["08:00", "09:00"]);
    }
}

#[tokio::test]
async fn concurrent_duplicate_registration_has_one_winner() {
    let engine = Arc::new(new_engine("register_dup_race.wal"));
    let pid = Ulid::new();
    let mut handles = Vec::new();
    for i in 0..8 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.register_professional(pid, Some(format!("P{i}")), 0).await
        }));
    }
    let mut won = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => won += 1,
            Err(e) => assert!(matches!(e, EngineError::AlreadyExists(id) if id == pid)),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(engine.list_professionals().await.len(), 1);
}

#[tokio::test]
async fn compact_wal_survives_restart() {
    let path = test_wal_path("compact_restart.wal");
    let pid = Ulid::new();
    let kept = Ulid::new();
    let before;
    {
        let engine = Engine::new(path.clone(), EngineSettings::default()).unwrap();
        engine.register_professional(pid, Some("Ana".into()), 3).await.unwrap();
        engine
            .set_working_hours(pid, 1, WorkingHours::open(10 * 60, 16 * 60))
            .await
            .unwrap();
        engine
            .reserve(kept, pid, at(monday(), 11, 30, 45), client())
            .await
            .unwrap();
        engine
            .update_appointment_status(kept, AppointmentStatus::Confirmed, None)
            .await
            .unwrap();

        // churn
        for _ in 0..10 {
            let tmp = Ulid::new();
            engine
                .add_blocked_period(BlockedPeriod {
                    id: tmp,
                    professional_id: pid,
                    recurrence: BlockRecurrence::Single { date: monday() },
                    span: Span::new(0, 30),
                    label: None,
                })
                .await
                .unwrap();
            engine.remove_blocked_period(tmp).await.unwrap();
        }

        let size_before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        let size_after = std::fs::metadata(&path).unwrap().len();
        assert!(size_after < size_before);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        before = engine.available_slots(&query(pid, monday(), 15)).await.unwrap();

        // appended after compaction
        engine
            .reserve(Ulid::new(), pid, at(monday(), 14, 0, 30), pro())
            .await
            .unwrap();
    }

    let engine = Engine::new(path, EngineSettings::default()).unwrap();
    let week = engine.working_week(pid).await;
    assert!(!week[3].1.is_working);
    assert!(week[0].1.is_working);
    assert_eq!(week[1].1, WorkingHours::open(10 * 60, 16 * 60));

    let list = engine.list_appointments(pid, None).await.unwrap();
    assert_eq!(list.len(), 2);
    let original = list.iter().find(|a| a.id == kept).unwrap();
    assert_eq!(original.status, AppointmentStatus::Confirmed);
    assert_eq!(original.origin, BookingOrigin::Client);
    assert!(engine.list_blocked_periods(pid).await.is_empty());

    let after = engine.available_slots(&query(pid, monday(), 15)).await.unwrap();
    assert_eq!(after.len(), before.len() - 2);
}

#[tokio::test]
async fn wal_appends_since_compact_through_channel() {
    let engine = new_engine("appends_counter.wal");
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    let pid = registered(&engine).await;
    let id = Ulid::new();
    engine.reserve(id, pid, at(monday(), 9, 0, 30), pro()).await.unwrap();
    engine
        .update_appointment_status(id, AppointmentStatus::CancelledByPro, None)
        .await
        .unwrap();

    assert_eq!(engine.wal_appends_since_compact().await, 3);
}
