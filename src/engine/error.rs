use ulid::Ulid;

use crate::model::{AppointmentStatus, Ms};

#[derive(Debug)]
pub enum EngineError {
    InvalidArgument(String),
    InvalidTimeFormat(String),
    InvalidDuration(i64),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Overlaps a live appointment (its id).
    Conflict(Ulid),
    /// Not an offered slot: closed, blocked, or off the slot grid.
    SlotUnavailable { start: Ms },
    InvalidTransition {
        id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    LimitExceeded(&'static str),
    ReadFailure(String),
    WalError(String),
}

/// How a failure is surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    InvalidArgument,
    NotFound,
    /// Expected, user-facing: re-query availability.
    Conflict,
    Internal,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvalidArgument(_)
            | EngineError::InvalidTimeFormat(_)
            | EngineError::InvalidDuration(_)
            | EngineError::AlreadyExists(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::LimitExceeded(_) => ErrorClass::InvalidArgument,
            EngineError::NotFound(_) => ErrorClass::NotFound,
            EngineError::Conflict(_) | EngineError::SlotUnavailable { .. } => ErrorClass::Conflict,
            EngineError::ReadFailure(_) | EngineError::WalError(_) => ErrorClass::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::InvalidTimeFormat(s) => {
                write!(f, "invalid wall-clock time {s:?}: expected HH:MM")
            }
            EngineError::InvalidDuration(d) => {
                write!(f, "invalid duration {d}: must be a positive number of minutes")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with appointment: {id}"),
            EngineError::SlotUnavailable { start } => {
                write!(f, "slot starting at {start} is not available")
            }
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "appointment {id}: cannot move from {from} to {to}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::ReadFailure(e) => write!(f, "schedule read failed: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
