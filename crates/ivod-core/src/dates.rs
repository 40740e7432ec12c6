//! Calendar-date helpers

use chrono::NaiveDate;

/// Iterates every date from `start` to `end` inclusive
///
/// Empty when `start > end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn inclusive_on_both_ends() {
        let dates: Vec<_> = date_range(d(2024, 2, 28), d(2024, 3, 1)).collect();
        assert_eq!(dates, vec![d(2024, 2, 28), d(2024, 2, 29), d(2024, 3, 1)]);
    }

    #[test]
    fn single_day_range() {
        let dates: Vec<_> = date_range(d(2024, 3, 6), d(2024, 3, 6)).collect();
        assert_eq!(dates, vec![d(2024, 3, 6)]);
    }

    #[test]
    fn empty_when_reversed() {
        assert_eq!(date_range(d(2024, 3, 6), d(2024, 3, 5)).count(), 0);
    }
}
