use std::sync::LazyLock;

use chrono::{Days, Months, NaiveDate};
use regex::Regex;

use crate::config::BookingPolicy;
use crate::engine::ReservationError;
use crate::limits::*;
use crate::model::ReservationInput;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email pattern compiles")
});

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn check_name(label: &str, value: Option<&str>, errors: &mut Vec<String>) {
    if is_blank(value) {
        errors.push(format!("{label} cannot be blank"));
    } else if value.is_some_and(|v| v.len() > MAX_NAME_LEN) {
        errors.push(format!("{label} must be at most {MAX_NAME_LEN} characters"));
    }
}

fn check_email(value: Option<&str>, errors: &mut Vec<String>) {
    let Some(email) = value.filter(|v| !v.trim().is_empty()) else {
        errors.push("Email cannot be blank".into());
        return;
    };
    if email.len() > MAX_EMAIL_LEN || !EMAIL.is_match(email) {
        errors.push("Email is not valid".into());
    }
}

/// First business-window rule the stay breaks, if any.
fn check_stay(
    arrival: NaiveDate,
    departure: NaiveDate,
    today: NaiveDate,
    policy: &BookingPolicy,
) -> Option<String> {
    // A lead time past the calendar's end leaves no bookable arrival.
    let earliest = today.checked_add_days(Days::new(policy.min_days_ahead.into()));
    if earliest.is_none_or(|earliest| arrival < earliest) {
        return Some(format!(
            "Arrival date must be reserved minimum {} day(s) ahead of arrival",
            policy.min_days_ahead
        ));
    }
    // A horizon past the calendar's end is no horizon at all.
    let latest = today.checked_add_months(Months::new(policy.max_months_ahead));
    if latest.is_some_and(|latest| departure > latest) {
        return Some(format!(
            "Departure date can be reserved up to {} month(s) in advance",
            policy.max_months_ahead
        ));
    }
    if arrival >= departure {
        return Some("Arrival date must be before departure date".into());
    }
    if (departure - arrival).num_days() > i64::from(policy.max_stay_nights) {
        return Some(format!(
            "Booking can be reserved for max {} days",
            policy.max_stay_nights
        ));
    }
    None
}

/// Check guest input against field rules and the booking policy.
///
/// Every field violation is reported. Business-window rules run only when the
/// fields are clean, and only the first broken one is reported.
pub fn validate_input(
    input: &ReservationInput,
    today: NaiveDate,
    policy: &BookingPolicy,
) -> Result<(), ReservationError> {
    let mut errors = Vec::new();

    check_name("First name", input.first_name.as_deref(), &mut errors);
    check_name("Last name", input.last_name.as_deref(), &mut errors);
    check_email(input.email.as_deref(), &mut errors);
    if input.arrival_date.is_none() {
        errors.push("Arrival date cannot be blank".into());
    }
    if input.departure_date.is_none() {
        errors.push("Departure date cannot be blank".into());
    }

    if errors.is_empty()
        && let (Some(arrival), Some(departure)) = (input.arrival_date, input.departure_date)
        && let Some(violation) = check_stay(arrival, departure, today, policy)
    {
        errors.push(violation);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ReservationError::Validation(errors))
    }
}

/// Check an availability window: neither bound in the past, start not after end.
pub fn validate_window(
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> Result<(), ReservationError> {
    let mut errors = Vec::new();
    if start < today {
        errors.push("Start date must not be in the past".to_string());
    }
    if end < today {
        errors.push("End date must not be in the past".to_string());
    }
    if start > end {
        errors.push("Start date cannot be after end date".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ReservationError::Validation(errors))
    }
}
