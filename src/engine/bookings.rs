use tracing::warn;

use crate::model::*;

/// Reduce a day's appointments to occupied minute intervals relative to the
/// day's local midnight (`day.start`).
///
/// Cancelled appointments and appointments starting outside `day` are
/// skipped. Records without a stored duration occupy only their start minute.
pub fn occupied_intervals(appointments: &[Appointment], day: &Period) -> Vec<Span> {
    let mut occupied = Vec::with_capacity(appointments.len());
    for appointment in appointments {
        if !appointment.occupies_time() || !day.contains_instant(appointment.start) {
            continue;
        }
        if appointment.duration.is_legacy() {
            warn!(
                "appointment {} has no stored duration; blocking its start minute only",
                appointment.id
            );
            metrics::counter!(crate::observability::LEGACY_APPOINTMENTS_TOTAL).increment(1);
        }
        let start = ((appointment.start - day.start) / MS_PER_MINUTE) as Minutes;
        occupied.push(Span::new(
            start,
            start + appointment.duration.occupied_minutes(),
        ));
    }
    occupied
}
