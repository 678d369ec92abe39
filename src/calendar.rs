use std::iter::FusedIterator;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Half-open date range `[start, end)`. The end date is never part of the range:
/// a stay `[10th, 12th)` occupies the nights of the 10th and 11th, and the 12th
/// is free for the next arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid date range: {} is after {}", self.start, self.end)
    }
}

impl std::error::Error for InvalidRange {}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    pub fn try_new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidRange> {
        if start > end {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn nights(&self) -> u64 {
        (self.end - self.start).num_days().max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Clamp to `other`. `None` when the two ranges share no date.
    pub fn intersect(&self, other: &DateRange) -> Option<DateRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(DateRange { start, end })
    }

    pub fn dates(&self) -> Dates {
        Dates {
            next: self.start,
            end: self.end,
        }
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Every date from `start` inclusive to `end` exclusive.
///
/// The sequence is lazy and can be restarted by cloning it before iterating.
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> Result<Dates, InvalidRange> {
    DateRange::try_new(start, end).map(|range| range.dates())
}

/// Lazy iterator over the dates of a [`DateRange`].
#[derive(Debug, Clone)]
pub struct Dates {
    next: NaiveDate,
    end: NaiveDate,
}

impl Iterator for Dates {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        if self.next >= self.end {
            return None;
        }
        let current = self.next;
        // checked_add only fails at NaiveDate::MAX, which can never be below `end`.
        self.next = current.checked_add_days(Days::new(1)).unwrap_or(self.end);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next).num_days().max(0) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Dates {}

impl FusedIterator for Dates {}
