//! ISO-8601 week arithmetic used by the season calendar.
//!
//! Weeks start on Monday and week 1 is the week holding the year's first
//! Thursday, so the ISO year of a date can differ from its calendar year
//! around New Year.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An ISO calendar week, serialized as a `[year, week]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalendarWeek(pub i32, pub u32);

impl CalendarWeek {
    pub fn new(year: i32, week: u32) -> Self {
        Self(year, week)
    }

    pub fn year(&self) -> i32 {
        self.0
    }

    pub fn week(&self) -> u32 {
        self.1
    }

    /// Whether this pair names a week that exists in its ISO year (1..=52 or 53).
    pub fn is_valid(&self) -> bool {
        self.1 >= 1 && NaiveDate::from_isoywd_opt(self.0, self.1, Weekday::Mon).is_some()
    }

    /// Monday of the week, or `None` for a week that does not exist.
    pub fn monday(&self) -> Option<NaiveDate> {
        NaiveDate::from_isoywd_opt(self.0, self.1, Weekday::Mon)
    }

}

impl fmt::Display for CalendarWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.0, self.1)
    }
}

impl From<(i32, u32)> for CalendarWeek {
    fn from((year, week): (i32, u32)) -> Self {
        Self(year, week)
    }
}

/// Day of the ISO week, 0 = Monday through 6 = Sunday.
pub fn iso_day(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_monday()
}

pub fn iso_week(date: NaiveDate) -> CalendarWeek {
    let week = date.iso_week();
    CalendarWeek(week.year(), week.week())
}

/// Monday of the given ISO week.
pub fn from_iso_week(week: CalendarWeek) -> Option<NaiveDate> {
    week.monday()
}

/// Moves `date` to ISO day `day` (0 = Monday) within its own ISO week.
/// `None` when that day lies outside the representable date range.
pub fn set_iso_day(date: NaiveDate, day: u32) -> Option<NaiveDate> {
    add_days(date, i64::from(day) - i64::from(iso_day(date)))
}

pub fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_signed(Duration::days(days))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn iso_week_spans_year_boundaries() {
        assert_eq!(iso_week(d(2018, 12, 31)), CalendarWeek(2019, 1));
        assert_eq!(iso_week(d(2021, 1, 3)), CalendarWeek(2020, 53));
        assert_eq!(iso_week(d(2016, 1, 1)), CalendarWeek(2015, 53));
    }

    #[test]
    fn set_iso_day_stays_inside_week() {
        let sunday = d(2018, 10, 7);
        assert_eq!(iso_day(sunday), 6);
        assert_eq!(set_iso_day(sunday, 1), Some(d(2018, 10, 2)));
        assert_eq!(set_iso_day(d(2018, 10, 1), 6), Some(sunday));
    }

    #[test]
    fn arithmetic_past_the_date_range_is_none() {
        assert_eq!(add_days(NaiveDate::MAX, 1), None);
        assert_eq!(add_days(NaiveDate::MIN, -1), None);
        let last_week = iso_week(NaiveDate::MAX);
        assert!(last_week.is_valid());
        let monday = from_iso_week(last_week).unwrap();
        assert_eq!(add_days(monday, 7), None);
    }

    #[test]
    fn week_validity_follows_long_years() {
        assert!(CalendarWeek(2020, 53).is_valid());
        assert!(!CalendarWeek(2019, 53).is_valid());
        assert!(!CalendarWeek(2019, 0).is_valid());
        assert_eq!(from_iso_week(CalendarWeek(2019, 1)), Some(d(2018, 12, 31)));
    }
}
