//! ISO-week periods, the unit in which FXCM publishes tick files.
//!
//! A period runs from Monday 00:00 UTC to the following Monday (exclusive).
//! Period enumeration is a pure function of the date window so the planner
//! can be tested without any network access.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use serde::{Serialize, Serializer};
use std::fmt;

/// One ISO week, identified internally by its Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    monday: NaiveDate,
}

impl Period {
    /// Build a period from an ISO year and week number. `None` if the week
    /// does not exist in that ISO year.
    pub fn new(iso_year: i32, iso_week: u32) -> Option<Self> {
        NaiveDate::from_isoywd_opt(iso_year, iso_week, Weekday::Mon).map(|monday| Self { monday })
    }

    /// The period containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        let offset = u64::from(date.weekday().num_days_from_monday());
        // Stepping back at most six days only fails at NaiveDate::MIN.
        let monday = date.checked_sub_days(Days::new(offset)).unwrap_or(date);
        Self { monday }
    }

    /// The period containing a UTC instant.
    pub fn containing_timestamp(ts: DateTime<Utc>) -> Self {
        Self::containing(ts.date_naive())
    }

    pub fn iso_year(&self) -> i32 {
        self.monday.iso_week().year()
    }

    pub fn iso_week(&self) -> u32 {
        self.monday.iso_week().week()
    }

    /// Monday of this week.
    pub fn first_day(&self) -> NaiveDate {
        self.monday
    }

    /// Sunday of this week.
    pub fn last_day(&self) -> NaiveDate {
        self.monday.checked_add_days(Days::new(6)).unwrap_or(NaiveDate::MAX)
    }

    /// The following week, if representable.
    pub fn succ(&self) -> Option<Self> {
        self.monday
            .checked_add_days(Days::new(7))
            .map(|monday| Self { monday })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.monday <= date && date <= self.last_day()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.iso_year(), self.iso_week())
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Ordered, oldest-first sequence of every period overlapping
/// `[start, end]` (both inclusive). Empty when `start > end`.
#[derive(Debug, Clone)]
pub struct PeriodRange {
    next: Option<Period>,
    end: NaiveDate,
}

impl PeriodRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        let next = (start <= end).then(|| Period::containing(start));
        Self { next, end }
    }
}

impl Iterator for PeriodRange {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        let current = self.next?;
        if current.first_day() > self.end {
            self.next = None;
            return None;
        }
        self.next = current.succ();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn containing_uses_iso_weeks() {
        // 2019-01-01 is a Tuesday in ISO week 2019-W01, which starts 2018-12-31.
        let p = Period::containing(d(2019, 1, 1));
        assert_eq!(p.iso_year(), 2019);
        assert_eq!(p.iso_week(), 1);
        assert_eq!(p.first_day(), d(2018, 12, 31));
        assert_eq!(p.last_day(), d(2019, 1, 6));
        assert_eq!(p.to_string(), "2019-W01");
    }

    #[test]
    fn week_53_exists_in_2020() {
        let p = Period::new(2020, 53).unwrap();
        assert_eq!(p.first_day(), d(2020, 12, 28));
        assert_eq!(p.succ().unwrap(), Period::new(2021, 1).unwrap());
        assert!(Period::new(2019, 53).is_none());
    }

    #[test]
    fn same_day_is_one_period() {
        let periods: Vec<_> = PeriodRange::new(d(2023, 5, 1), d(2023, 5, 1)).collect();
        assert_eq!(periods, vec![Period::new(2023, 18).unwrap()]);
    }

    #[test]
    fn within_one_week() {
        assert_eq!(PeriodRange::new(d(2023, 5, 1), d(2023, 5, 6)).count(), 1);
    }

    #[test]
    fn across_week_boundary() {
        assert_eq!(PeriodRange::new(d(2023, 5, 1), d(2023, 5, 14)).count(), 2);
    }

    #[test]
    fn full_month() {
        let periods: Vec<_> = PeriodRange::new(d(2023, 5, 1), d(2023, 5, 31)).collect();
        let weeks: Vec<u32> = periods.iter().map(|p| p.iso_week()).collect();
        assert_eq!(weeks, vec![18, 19, 20, 21, 22]);
    }

    #[test]
    fn reversed_range_is_empty() {
        assert_eq!(PeriodRange::new(d(2023, 6, 1), d(2023, 5, 1)).count(), 0);
    }

    #[test]
    fn across_leap_day() {
        let periods: Vec<_> = PeriodRange::new(d(2020, 2, 25), d(2020, 3, 10)).collect();
        assert_eq!(periods.len(), 3);
        assert_eq!(periods[0].first_day(), d(2020, 2, 24));
        assert!(periods[0].contains(d(2020, 2, 29)));
        assert_eq!(periods[1].first_day(), d(2020, 3, 2));
    }

    #[test]
    fn january_2019() {
        let periods: Vec<String> = PeriodRange::new(d(2019, 1, 1), d(2019, 1, 31))
            .map(|p| p.to_string())
            .collect();
        assert_eq!(
            periods,
            vec!["2019-W01", "2019-W02", "2019-W03", "2019-W04", "2019-W05"]
        );
    }

    #[test]
    fn serializes_as_label() {
        let p = Period::new(2021, 7).unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"2021-W07\"");
    }
}
