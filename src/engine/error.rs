use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::InvalidRange;

/// Errors surfaced by the reservation service.
#[derive(Debug)]
pub enum ReservationError {
    /// Arrival does not strictly precede departure.
    InvalidRange {
        arrival: NaiveDate,
        departure: NaiveDate,
    },
    /// The requested stay overlaps another reservation.
    DatesUnavailable {
        conflicting: Option<Ulid>,
    },
    NotFound(Ulid),
    /// Retry budget exhausted or the storage layer failed.
    Saving(String),
    /// Input rejected before it reached the core, one message per violation.
    Validation(Vec<String>),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for ReservationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationError::InvalidRange { arrival, departure } => {
                write!(
                    f,
                    "arrival date {arrival} must be before departure date {departure}"
                )
            }
            ReservationError::DatesUnavailable { conflicting: Some(id) } => {
                write!(f, "booking dates not available: overlaps reservation {id}")
            }
            ReservationError::DatesUnavailable { conflicting: None } => {
                write!(f, "booking dates not available")
            }
            ReservationError::NotFound(id) => write!(f, "reservation not found: {id}"),
            ReservationError::Saving(msg) => {
                write!(f, "unable to complete booking transaction: {msg}")
            }
            ReservationError::Validation(errors) => {
                write!(f, "invalid reservation: {}", errors.join("; "))
            }
            ReservationError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for ReservationError {}

impl From<InvalidRange> for ReservationError {
    fn from(e: InvalidRange) -> Self {
        ReservationError::InvalidRange {
            arrival: e.start,
            departure: e.end,
        }
    }
}

/// Errors raised by a [`ReservationStore`](super::ReservationStore).
#[derive(Debug)]
pub enum StoreError {
    NotFound(Ulid),
    /// The stored version moved on since the caller read it. Never leaves the
    /// service's retry loop.
    StaleVersion {
        id: Ulid,
        expected: u64,
        actual: u64,
    },
    /// A night in the requested stay is held by another reservation.
    Conflict(Ulid),
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::StaleVersion {
                id,
                expected,
                actual,
            } => write!(
                f,
                "stale version for {id}: expected {expected}, stored {actual}"
            ),
            StoreError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for ReservationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ReservationError::NotFound(id),
            other => ReservationError::Saving(other.to_string()),
        }
    }
}
