//! Inclusive date ranges and focus-month observation windows.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// An inclusive range of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First day.
    pub start: NaiveDate,
    /// Last day (inclusive).
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range. `start` after `end` yields an empty range.
    pub const fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Whether the range contains no days.
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Number of days in the range.
    pub fn len_days(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            ((self.end - self.start).num_days() + 1) as u32
        }
    }

    /// Whether a date lies inside the range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Iterate over every day of the range.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// A date range restricted to a set of calendar months.
///
/// Days outside the focus months are not expected to carry observations, so
/// they are never counted as missing. A run of readings does not continue
/// across them either: see [`ObservationWindow::is_contiguous`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationWindow {
    /// Overall range.
    pub range: DateRange,
    /// Focus months (1-12). Empty means every month.
    pub months: Vec<u32>,
}

impl ObservationWindow {
    /// A window over every month of the range.
    pub fn all_months(range: DateRange) -> Self {
        Self {
            range,
            months: Vec::new(),
        }
    }

    /// A window restricted to the given months.
    pub fn with_months(range: DateRange, months: Vec<u32>) -> Self {
        Self { range, months }
    }

    /// Whether a date is expected to carry an observation.
    pub fn is_expected(&self, date: NaiveDate) -> bool {
        self.range.contains(date) && (self.months.is_empty() || self.months.contains(&date.month()))
    }

    /// Number of expected days in the window.
    pub fn expected_days(&self) -> u32 {
        self.range.days().filter(|d| self.is_expected(*d)).count() as u32
    }

    /// Expected days strictly between `after` and `before`.
    pub fn expected_days_between(&self, after: NaiveDate, before: NaiveDate) -> u32 {
        let Some(first) = after.checked_add_days(Days::new(1)) else {
            return 0;
        };
        if first >= before {
            return 0;
        }
        let Some(last) = before.pred_opt() else {
            return 0;
        };
        DateRange::new(first, last)
            .days()
            .filter(|d| self.is_expected(*d))
            .count() as u32
    }

    /// Whether every day strictly between `after` and `before` is expected.
    ///
    /// False as soon as an off-season day or a day outside the range lies in
    /// between, so two readings in different focus seasons are never
    /// contiguous.
    pub fn is_contiguous(&self, after: NaiveDate, before: NaiveDate) -> bool {
        let Some(first) = after.checked_add_days(Days::new(1)) else {
            return true;
        };
        let Some(last) = before.pred_opt() else {
            return true;
        };
        DateRange::new(first, last).days().all(|d| self.is_expected(d))
    }
}
