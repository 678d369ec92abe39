use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::DateRange;
use crate::engine::ReservationError;

/// Monotonic per-reservation write counter. Starts at 0, +1 per mutation.
pub type Version = u64;

/// A committed reservation of the campsite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub guest_email: String,
    pub first_name: String,
    pub last_name: String,
    pub arrival_date: NaiveDate,
    pub departure_date: NaiveDate,
    pub version: Version,
}

impl Reservation {
    pub fn stay(&self) -> DateRange {
        DateRange::new(self.arrival_date, self.departure_date)
    }

    /// Apply new fields on top of this reservation, bumping the version.
    pub fn revised(&self, fields: &NewReservation) -> Reservation {
        Reservation {
            id: self.id,
            guest_email: fields.guest_email.clone(),
            first_name: fields.first_name.clone(),
            last_name: fields.last_name.clone(),
            arrival_date: fields.arrival_date,
            departure_date: fields.departure_date,
            version: self.version + 1,
        }
    }
}

/// Fields for a create or update, already past input validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub guest_email: String,
    pub first_name: String,
    pub last_name: String,
    pub arrival_date: NaiveDate,
    pub departure_date: NaiveDate,
}

impl NewReservation {
    /// The requested stay. Zero-night and reversed stays are rejected.
    pub fn stay(&self) -> Result<DateRange, ReservationError> {
        if self.arrival_date >= self.departure_date {
            return Err(ReservationError::InvalidRange {
                arrival: self.arrival_date,
                departure: self.departure_date,
            });
        }
        Ok(DateRange::new(self.arrival_date, self.departure_date))
    }

    pub fn into_reservation(self, id: Ulid) -> Reservation {
        Reservation {
            id,
            guest_email: self.guest_email,
            first_name: self.first_name,
            last_name: self.last_name,
            arrival_date: self.arrival_date,
            departure_date: self.departure_date,
            version: 0,
        }
    }
}

/// Raw caller input as it arrives off the wire. Any field may be missing;
/// the validator reports each gap by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationInput {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub arrival_date: Option<NaiveDate>,
    pub departure_date: Option<NaiveDate>,
}

impl ReservationInput {
    /// Convert validated input into core fields. Missing fields become a
    /// validation error rather than a panic.
    pub fn into_new(self) -> Result<NewReservation, ReservationError> {
        let missing = |field: &str| ReservationError::Validation(vec![format!("{field} cannot be blank")]);
        Ok(NewReservation {
            guest_email: self.email.ok_or_else(|| missing("Email"))?,
            first_name: self.first_name.ok_or_else(|| missing("First name"))?,
            last_name: self.last_name.ok_or_else(|| missing("Last name"))?,
            arrival_date: self.arrival_date.ok_or_else(|| missing("Arrival date"))?,
            departure_date: self.departure_date.ok_or_else(|| missing("Departure date"))?,
        })
    }
}

/// WAL record format. Flat, no nesting.
///
/// Created and updated events carry the full post-state so replay restores
/// versions exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated { reservation: Reservation },
    ReservationUpdated { reservation: Reservation },
    ReservationDeleted { id: Ulid },
}
