use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::timegrid;

/// Unix milliseconds: absolute instants (appointment start/end).
pub type Ms = i64;

/// Minutes since local midnight. A span may run past `MINUTES_PER_DAY`
/// when a booking crosses midnight.
pub type Minutes = i32;

/// Weekday key: 0 = Sunday .. 6 = Saturday.
pub type DayOfWeek = u8;

pub const MINUTES_PER_DAY: Minutes = 1440;
pub const MS_PER_MINUTE: Ms = 60_000;
pub const MS_PER_DAY: Ms = 86_400_000;
pub const DAYS_PER_WEEK: usize = 7;

/// Half-open interval `[start, end)` in minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        timegrid::overlaps(self.start, self.end, other.start, other.end)
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Half-open interval `[start, end)` in unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: Ms,
    pub end: Ms,
}

impl Period {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Period start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Period) -> bool {
        timegrid::overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Working hours ────────────────────────────────────────────────

pub const DEFAULT_OPEN: Minutes = 9 * 60;
pub const DEFAULT_CLOSE: Minutes = 18 * 60;
/// Sunday.
pub const DEFAULT_REST_DAY: DayOfWeek = 0;

/// Declared open/close window for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub is_working: bool,
    pub start: Minutes,
    pub end: Minutes,
}

impl WorkingHours {
    pub fn open(start: Minutes, end: Minutes) -> Self {
        Self { is_working: true, start, end }
    }

    pub fn closed() -> Self {
        Self {
            is_working: false,
            start: DEFAULT_OPEN,
            end: DEFAULT_CLOSE,
        }
    }

    /// The canonical week materialized for a newly registered professional:
    /// 09:00–18:00 every day except `rest_day`.
    pub fn default_week(rest_day: DayOfWeek) -> [WorkingHours; DAYS_PER_WEEK] {
        let mut week = [WorkingHours::open(DEFAULT_OPEN, DEFAULT_CLOSE); DAYS_PER_WEEK];
        if let Some(day) = week.get_mut(rest_day as usize) {
            *day = WorkingHours::closed();
        }
        week
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Completed,
    CancelledByClient,
    CancelledByPro,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::CheckedIn => "checked_in",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::CancelledByClient => "cancelled_by_client",
            AppointmentStatus::CancelledByPro => "cancelled_by_pro",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "checked_in" => Some(AppointmentStatus::CheckedIn),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled_by_client" => Some(AppointmentStatus::CancelledByClient),
            "cancelled_by_pro" => Some(AppointmentStatus::CancelledByPro),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::CancelledByClient | AppointmentStatus::CancelledByPro
        )
    }

    /// Only non-cancelled appointments hold time on the calendar.
    pub fn occupies_time(&self) -> bool {
        !self.is_cancelled()
    }

    pub fn is_terminal(&self) -> bool {
        self.is_cancelled() || *self == AppointmentStatus::Completed
    }

    /// `pending → confirmed → checked_in → completed`, or either
    /// cancellation from any state before completion.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        if self.is_terminal() {
            return false;
        }
        if next.is_cancelled() {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, CheckedIn) | (CheckedIn, Completed)
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long an appointment holds the chair. Records migrated from the old
/// document store may lack a duration; those only block their start minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentDuration {
    WithDuration { minutes: Minutes },
    LegacyPointInTime,
}

impl AppointmentDuration {
    pub fn occupied_minutes(&self) -> Minutes {
        match self {
            AppointmentDuration::WithDuration { minutes } => *minutes,
            AppointmentDuration::LegacyPointInTime => 1,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, AppointmentDuration::LegacyPointInTime)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingOrigin {
    /// Self-service booking; must land on an offered slot.
    Client,
    /// Manual entry by the professional; only checked against other appointments.
    Professional,
    /// Migrated from the legacy store.
    Import,
}

impl BookingOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingOrigin::Client => "client",
            BookingOrigin::Professional => "professional",
            BookingOrigin::Import => "import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "client" => Some(BookingOrigin::Client),
            "professional" | "pro" => Some(BookingOrigin::Professional),
            "import" => Some(BookingOrigin::Import),
            _ => None,
        }
    }
}

/// Who is booking, and for what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub origin: BookingOrigin,
    pub client_id: Option<String>,
    pub service_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub start: Ms,
    pub duration: AppointmentDuration,
    pub status: AppointmentStatus,
    pub origin: BookingOrigin,
    pub client_id: Option<String>,
    pub service_id: Option<String>,
    /// Set on completion.
    pub rating: Option<u8>,
}

impl Appointment {
    /// Stored end time; `None` for legacy point-in-time records.
    pub fn end(&self) -> Option<Ms> {
        match self.duration {
            AppointmentDuration::WithDuration { minutes } => {
                Some(self.start + minutes as Ms * MS_PER_MINUTE)
            }
            AppointmentDuration::LegacyPointInTime => None,
        }
    }

    /// The absolute range this appointment blocks, whatever its status.
    pub fn occupied_period(&self) -> Period {
        Period::new(
            self.start,
            self.start + self.duration.occupied_minutes() as Ms * MS_PER_MINUTE,
        )
    }

    pub fn occupies_time(&self) -> bool {
        self.status.occupies_time()
    }
}

// ── Blocked periods ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockRecurrence {
    /// Repeats every week on the given weekday.
    Recurring { day_of_week: DayOfWeek },
    /// A single calendar date.
    Single { date: NaiveDate },
}

impl BlockRecurrence {
    pub fn applies_to(&self, day_of_week: DayOfWeek, date: NaiveDate) -> bool {
        match self {
            BlockRecurrence::Recurring { day_of_week: d } => *d == day_of_week,
            BlockRecurrence::Single { date: d } => *d == date,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BlockRecurrence::Recurring { .. } => "recurring",
            BlockRecurrence::Single { .. } => "single",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedPeriod {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub recurrence: BlockRecurrence,
    pub span: Span,
    pub label: Option<String>,
}

// ── Per-professional state ───────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProfessionalState {
    pub id: Ulid,
    pub name: Option<String>,
    pub week: [WorkingHours; DAYS_PER_WEEK],
    /// Sorted by `start`.
    pub appointments: Vec<Appointment>,
    pub blocks: Vec<BlockedPeriod>,
}

impl ProfessionalState {
    pub fn new(id: Ulid, name: Option<String>, rest_day: DayOfWeek) -> Self {
        Self {
            id,
            name,
            week: WorkingHours::default_week(rest_day),
            appointments: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn hours_for(&self, day_of_week: DayOfWeek) -> Option<WorkingHours> {
        self.week.get(day_of_week as usize).copied()
    }

    /// Insert appointment maintaining sort order by start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.start <= appointment.start);
        self.appointments.insert(pos, appointment);
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments (any status) whose start lies in `range`.
    pub fn appointments_starting_in(&self, range: &Period) -> &[Appointment] {
        let lo = self.appointments.partition_point(|a| a.start < range.start);
        let hi = self.appointments.partition_point(|a| a.start < range.end);
        &self.appointments[lo..hi]
    }

    /// Live appointments whose occupied range overlaps `period`.
    /// No appointment occupies more than a day, so anything starting a full
    /// day before `period.start` is skipped by binary search.
    pub fn live_overlapping(&self, period: &Period) -> impl Iterator<Item = &Appointment> {
        let lo = self
            .appointments
            .partition_point(|a| a.start <= period.start - MS_PER_DAY);
        let hi = self.appointments.partition_point(|a| a.start < period.end);
        self.appointments[lo..hi]
            .iter()
            .filter(move |a| a.occupies_time() && a.occupied_period().overlaps(period))
    }

    pub fn insert_block(&mut self, block: BlockedPeriod) {
        self.blocks.push(block);
    }

    pub fn remove_block(&mut self, id: Ulid) -> Option<BlockedPeriod> {
        let pos = self.blocks.iter().position(|b| b.id == id)?;
        Some(self.blocks.remove(pos))
    }

    pub fn blocks_on(
        &self,
        day_of_week: DayOfWeek,
        date: NaiveDate,
    ) -> impl Iterator<Item = &BlockedPeriod> {
        self.blocks
            .iter()
            .filter(move |b| b.recurrence.applies_to(day_of_week, date))
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProfessionalRegistered {
        id: Ulid,
        name: Option<String>,
        rest_day: DayOfWeek,
    },
    WorkingHoursSet {
        professional_id: Ulid,
        day_of_week: DayOfWeek,
        hours: WorkingHours,
    },
    BlockAdded {
        block: BlockedPeriod,
    },
    BlockRemoved {
        id: Ulid,
        professional_id: Ulid,
    },
    AppointmentReserved {
        appointment: Appointment,
    },
    AppointmentImported {
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        id: Ulid,
        professional_id: Ulid,
        status: AppointmentStatus,
        rating: Option<u8>,
    },
}

impl Event {
    pub fn professional_id(&self) -> Ulid {
        match self {
            Event::ProfessionalRegistered { id, .. } => *id,
            Event::WorkingHoursSet { professional_id, .. }
            | Event::BlockRemoved { professional_id, .. }
            | Event::AppointmentStatusChanged { professional_id, .. } => *professional_id,
            Event::BlockAdded { block } => block.professional_id,
            Event::AppointmentReserved { appointment }
            | Event::AppointmentImported { appointment } => appointment.professional_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfessionalInfo {
    pub id: Ulid,
    pub name: Option<String>,
}
