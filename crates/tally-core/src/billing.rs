//! Billing cycle calculator
//!
//! Maps a transaction's occurrence date to the statement-aligned
//! `processed_date` for a cycle that starts on day D of each month.
//! A charge on or after day D belongs to the statement closing on day D-1
//! of the following month; earlier charges keep their own date.

use chrono::{Datelike, Duration, NaiveDate};

use crate::error::{Error, Result};

/// Default statement cycle start day
pub const DEFAULT_CYCLE_START_DAY: u32 = 10;

/// A validated billing cycle start day (1-31)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingCycle {
    start_day: u32,
}

impl BillingCycle {
    pub fn new(start_day: u32) -> Result<Self> {
        if !(1..=31).contains(&start_day) {
            return Err(Error::Validation(format!(
                "Billing cycle start day must be between 1 and 31, got {}",
                start_day
            )));
        }
        Ok(Self { start_day })
    }

    pub fn start_day(&self) -> u32 {
        self.start_day
    }

    /// Compute the processed date for a raw transaction date
    pub fn processed_date(&self, date: NaiveDate) -> NaiveDate {
        if date.day() < self.start_day {
            return date;
        }

        // Day D-1 of a cycle starting on the 1st is day 0 of next month,
        // i.e. the last day of this one.
        if self.start_day == 1 {
            return last_day_of_month(date.year(), date.month());
        }

        let (year, month) = next_month(date.year(), date.month());
        let last = last_day_of_month(year, month);
        let day = (self.start_day - 1).min(last.day());
        NaiveDate::from_ymd_opt(year, month, day).unwrap_or(last)
    }
}

impl Default for BillingCycle {
    fn default() -> Self {
        Self {
            start_day: DEFAULT_CYCLE_START_DAY,
        }
    }
}

/// Convenience wrapper validating the start day on each call
pub fn processed_date(date: NaiveDate, start_day: u32) -> Result<NaiveDate> {
    Ok(BillingCycle::new(start_day)?.processed_date(date))
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (ny, nm) = next_month(year, month);
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .map(|first| first - Duration::days(1))
        .unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_after_start_day_rolls_forward() {
        assert_eq!(processed_date(d(2023, 1, 11), 10).unwrap(), d(2023, 2, 9));
    }

    #[test]
    fn test_before_start_day_unchanged() {
        assert_eq!(processed_date(d(2023, 1, 9), 10).unwrap(), d(2023, 1, 9));
    }

    #[test]
    fn test_on_start_day_rolls_forward() {
        assert_eq!(processed_date(d(2023, 1, 10), 10).unwrap(), d(2023, 2, 9));
    }

    #[test]
    fn test_december_rolls_into_next_year() {
        assert_eq!(processed_date(d(2023, 12, 15), 10).unwrap(), d(2024, 1, 9));
    }

    #[test]
    fn test_clipped_to_short_month() {
        // Cycle starting on the 31st closes on the 30th, which February lacks
        assert_eq!(processed_date(d(2023, 1, 31), 31).unwrap(), d(2023, 2, 28));
        assert_eq!(processed_date(d(2024, 1, 31), 31).unwrap(), d(2024, 2, 29));
        assert_eq!(processed_date(d(2023, 1, 30), 31).unwrap(), d(2023, 1, 30));
    }

    #[test]
    fn test_first_of_month_cycle_is_calendar_month() {
        assert_eq!(processed_date(d(2023, 2, 1), 1).unwrap(), d(2023, 2, 28));
        assert_eq!(processed_date(d(2023, 12, 31), 1).unwrap(), d(2023, 12, 31));
    }

    #[test]
    fn test_invalid_start_day() {
        assert!(matches!(BillingCycle::new(0), Err(Error::Validation(_))));
        assert!(matches!(BillingCycle::new(32), Err(Error::Validation(_))));
    }
}
