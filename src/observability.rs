use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "chairslot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "chairslot_query_duration_seconds";

// ── Scheduling ──────────────────────────────────────────────────

/// Histogram: end-to-end slot computation latency in seconds.
pub const SLOT_QUERY_DURATION_SECONDS: &str = "chairslot_slot_query_duration_seconds";

/// Histogram: number of slots returned per availability query.
pub const SLOTS_RETURNED: &str = "chairslot_slots_returned";

/// Counter: reservations rejected because another appointment holds the time.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "chairslot_reservation_conflicts_total";

/// Counter: appointments without a stored duration seen during slot computation.
pub const LEGACY_APPOINTMENTS_TOTAL: &str = "chairslot_legacy_appointments_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "chairslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "chairslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "chairslot_connections_rejected_total";

/// Gauge: number of open barbershops (loaded engines).
pub const TENANTS_ACTIVE: &str = "chairslot_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "chairslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "chairslot_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertProfessional { .. } => "insert_professional",
        Command::UpsertWorkingHours { .. } => "upsert_working_hours",
        Command::InsertBlockedPeriod { .. } => "insert_blocked_period",
        Command::DeleteBlockedPeriod { .. } => "delete_blocked_period",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::ImportAppointment { .. } => "import_appointment",
        Command::UpdateAppointmentStatus { .. } => "update_appointment_status",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectBlockedPeriods { .. } => "select_blocked_periods",
        Command::SelectWorkingHours { .. } => "select_working_hours",
        Command::SelectProfessionals => "select_professionals",
    }
}
