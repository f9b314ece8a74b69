use crate::model::{Minutes, Ms, MINUTES_PER_DAY};

// ── Tenants ──────────────────────────────────────────────────────

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

// ── Per-tenant / per-professional ────────────────────────────────

pub const MAX_PROFESSIONALS_PER_TENANT: usize = 10_000;
pub const MAX_APPOINTMENTS_PER_PROFESSIONAL: usize = 100_000;
pub const MAX_BLOCKS_PER_PROFESSIONAL: usize = 1_000;

// ── Field sizes ──────────────────────────────────────────────────

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 256;
/// Client / service identifiers from the catalog store.
pub const MAX_EXTERNAL_ID_LEN: usize = 128;

// ── Time ─────────────────────────────────────────────────────────

/// A single service never runs longer than a day.
pub const MAX_SERVICE_DURATION_MINUTES: Minutes = MINUTES_PER_DAY;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Widest range accepted by appointment listings (one year).
pub const MAX_LIST_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
