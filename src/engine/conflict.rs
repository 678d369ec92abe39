use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::{DateRange, dates_between};
use crate::model::Reservation;

use super::ReservationError;
use super::availability::free_dates;

/// True iff every night of `[candidate_start, candidate_end)` is in `free`.
pub fn is_range_free(
    candidate_start: NaiveDate,
    candidate_end: NaiveDate,
    free: &BTreeSet<NaiveDate>,
) -> Result<bool, ReservationError> {
    Ok(dates_between(candidate_start, candidate_end)?.all(|date| free.contains(&date)))
}

/// Check `candidate` against `existing`, ignoring the reservation `exclude`
/// (a reservation never conflicts with its own current stay during an update).
pub(crate) fn ensure_range_free(
    candidate: &DateRange,
    existing: &[Reservation],
    exclude: Option<Ulid>,
) -> Result<(), ReservationError> {
    let others: Vec<Reservation> = existing
        .iter()
        .filter(|r| Some(r.id) != exclude)
        .cloned()
        .collect();
    let free = free_dates(candidate.start, candidate.end, &others)?;
    if is_range_free(candidate.start, candidate.end, &free)? {
        return Ok(());
    }
    let conflicting = others
        .iter()
        .find(|r| r.stay().overlaps(candidate))
        .map(|r| r.id);
    Err(ReservationError::DatesUnavailable { conflicting })
}
