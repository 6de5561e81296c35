use crate::error::{BookingError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open range of calendar dates, `[start, end)`.
///
/// A stay from the 10th to the 15th occupies the nights of the 10th through
/// the 14th, so a second stay may start on the 15th.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(BookingError::InvalidRange(format!(
                "end date {} must be after start date {}",
                end, start
            )))
        }
    }

    /// A single-day range, as used by tours.
    pub fn single_day(day: NaiveDate) -> Result<Self> {
        let end = day
            .succ_opt()
            .ok_or_else(|| BookingError::InvalidRange(format!("{} has no following day", day)))?;
        Self::new(day, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of whole days covered, never less than one.
    pub fn days(&self) -> u32 {
        let days = (self.end - self.start).num_days().max(1);
        u32::try_from(days).unwrap_or(u32::MAX)
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Collects the ranges in `booked` that collide with `range`, sorted by start.
pub fn blocking_ranges<'a, I>(booked: I, range: &DateRange) -> Vec<DateRange>
where
    I: IntoIterator<Item = &'a DateRange>,
{
    let mut blocking: Vec<DateRange> = booked
        .into_iter()
        .filter(|other| other.overlaps(range))
        .copied()
        .collect();
    blocking.sort();
    blocking.dedup();
    blocking
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn range(sm: u32, sd: u32, em: u32, ed: u32) -> DateRange {
        DateRange::new(date(sm, sd), date(em, ed)).unwrap()
    }

    #[test]
    fn test_range_requires_start_before_end() {
        assert!(matches!(
            DateRange::new(date(7, 15), date(7, 10)),
            Err(BookingError::InvalidRange(_))
        ));
        assert!(matches!(
            DateRange::new(date(7, 10), date(7, 10)),
            Err(BookingError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_days() {
        assert_eq!(range(8, 1, 8, 4).days(), 3);
        assert_eq!(DateRange::single_day(date(9, 1)).unwrap().days(), 1);
    }

    #[test]
    fn test_half_open_overlap() {
        let booked = range(7, 10, 7, 15);
        assert!(booked.overlaps(&range(7, 12, 7, 20)));
        assert!(booked.overlaps(&range(7, 1, 7, 11)));
        assert!(booked.overlaps(&range(7, 11, 7, 12)));
        // Back-to-back stays share a boundary date but do not overlap.
        assert!(!booked.overlaps(&range(7, 15, 7, 20)));
        assert!(!booked.overlaps(&range(7, 5, 7, 10)));
    }

    #[test]
    fn test_blocking_ranges_sorted_and_filtered() {
        let booked = [range(7, 20, 7, 25), range(7, 1, 7, 3), range(7, 10, 7, 15)];
        let blocking = blocking_ranges(booked.iter(), &range(7, 12, 7, 22));
        assert_eq!(blocking, vec![range(7, 10, 7, 15), range(7, 20, 7, 25)]);
    }
}
