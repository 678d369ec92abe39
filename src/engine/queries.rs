use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::DateRange;
use crate::limits::*;
use crate::model::*;
use crate::validation;

use super::availability::free_dates;
use super::{ReservationError, ReservationService, ReservationStore};

/// Today in the server's local time zone.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

impl<S: ReservationStore> ReservationService<S> {
    pub async fn get(&self, id: Ulid) -> Result<Reservation, ReservationError> {
        Ok(self.store.get(id).await?)
    }

    /// Every reservation, ordered by arrival date.
    pub async fn list(&self) -> Result<Vec<Reservation>, ReservationError> {
        Ok(self.store.list_all().await?)
    }

    /// Free dates in `[window_start, window_end)`. Read-only.
    pub async fn free_dates(
        &self,
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>, ReservationError> {
        let window = DateRange::try_new(window_start, window_end)?;
        if window.nights() > MAX_QUERY_WINDOW_DAYS {
            return Err(ReservationError::LimitExceeded("availability window too wide"));
        }
        let existing = self.store.find_overlapping(window).await?;
        free_dates(window_start, window_end, &existing)
    }

    /// Check guest input against today's date and the configured policy.
    pub fn validate_input(&self, input: &ReservationInput) -> Result<(), ReservationError> {
        validation::validate_input(input, today(), &self.policy)
    }

    pub fn validate_window(&self, start: NaiveDate, end: NaiveDate) -> Result<(), ReservationError> {
        validation::validate_window(start, end, today())
    }
}
