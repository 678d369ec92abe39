use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::calendar::{DateRange, dates_between};
use crate::model::Reservation;

use super::ReservationError;

// ── Availability Algorithm ────────────────────────────────────────

/// Dates in `[window_start, window_end)` not covered by any reservation.
///
/// Materializes the window, materializes the union of occupied nights from
/// reservations that intersect it, and subtracts. A reservation's departure
/// date is never occupied. A zero-length window yields an empty set.
pub fn free_dates(
    window_start: NaiveDate,
    window_end: NaiveDate,
    existing: &[Reservation],
) -> Result<BTreeSet<NaiveDate>, ReservationError> {
    let mut free: BTreeSet<NaiveDate> = dates_between(window_start, window_end)?.collect();
    if free.is_empty() {
        return Ok(free);
    }
    let window = DateRange::new(window_start, window_end);
    for date in occupied_dates(&window, existing) {
        free.remove(&date);
    }
    Ok(free)
}

/// Union of nights held by `existing`, clamped to `window`.
pub fn occupied_dates(window: &DateRange, existing: &[Reservation]) -> BTreeSet<NaiveDate> {
    existing
        .iter()
        .filter_map(|r| r.stay().intersect(window))
        .flat_map(|clamped| clamped.dates())
        .collect()
}
