use crate::iso::{self, CalendarWeek};
use crate::persistence::Document;
use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Document `type` tag used for seasons in the database.
pub const SEASON_DOCUMENT_TYPE: &str = "season";

#[derive(Debug, Error)]
pub enum SeasonError {
    #[error("malformed season '{season}': {reason}")]
    Malformed { season: String, reason: String },
    #[error("season '{season}' references invalid ISO week {week}")]
    InvalidWeek { season: String, week: CalendarWeek },
    #[error("unknown distribution day '{0}'")]
    UnknownDistributionDay(String),
    #[error("season document could not be decoded: {0}")]
    Document(#[from] serde_json::Error),
}

impl SeasonError {
    fn malformed(season: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            season: season.to_string(),
            reason: reason.into(),
        }
    }
}

/// Weekday on which baskets are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum DistributionDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DistributionDay {
    const ALL: [DistributionDay; 7] = [
        DistributionDay::Monday,
        DistributionDay::Tuesday,
        DistributionDay::Wednesday,
        DistributionDay::Thursday,
        DistributionDay::Friday,
        DistributionDay::Saturday,
        DistributionDay::Sunday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionDay::Monday => "monday",
            DistributionDay::Tuesday => "tuesday",
            DistributionDay::Wednesday => "wednesday",
            DistributionDay::Thursday => "thursday",
            DistributionDay::Friday => "friday",
            DistributionDay::Saturday => "saturday",
            DistributionDay::Sunday => "sunday",
        }
    }

    /// ISO day index, 0 = Monday.
    pub fn iso_day(&self) -> u32 {
        self.weekday().num_days_from_monday()
    }

    pub fn weekday(&self) -> Weekday {
        match self {
            DistributionDay::Monday => Weekday::Mon,
            DistributionDay::Tuesday => Weekday::Tue,
            DistributionDay::Wednesday => Weekday::Wed,
            DistributionDay::Thursday => Weekday::Thu,
            DistributionDay::Friday => Weekday::Fri,
            DistributionDay::Saturday => Weekday::Sat,
            DistributionDay::Sunday => Weekday::Sun,
        }
    }
}

impl fmt::Display for DistributionDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionDay {
    type Err = SeasonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|day| day.as_str() == needle)
            .ok_or_else(|| SeasonError::UnknownDistributionDay(s.to_string()))
    }
}

impl TryFrom<String> for DistributionDay {
    type Error = SeasonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Persisted shape of a season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonDocument {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type", default = "season_type")]
    pub doc_type: String,
    pub name: String,
    pub distribution_day: DistributionDay,
    pub week_count: u32,
    pub start_week: CalendarWeek,
    pub end_week: CalendarWeek,
    #[serde(default)]
    pub ignored_weeks: Vec<CalendarWeek>,
    #[serde(default)]
    pub double_weeks: Vec<CalendarWeek>,
}

fn season_type() -> String {
    SEASON_DOCUMENT_TYPE.to_string()
}

impl SeasonDocument {
    pub fn from_document(document: &Document) -> Result<Self, SeasonError> {
        let value = serde_json::to_value(document)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_document(&self) -> Result<Document, SeasonError> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// One distribution occurrence within a season.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonWeek {
    pub season_id: String,
    pub calendar_week: CalendarWeek,
    /// 1-based position within the season.
    pub number: u32,
    pub distribution_date: NaiveDate,
    pub double_distribution: bool,
    pub other_week: bool,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl SeasonWeek {
    /// First day served by this distribution (the day after the previous one).
    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Exclusive upper bound: the day after the distribution.
    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }
}

/// A season with its distribution weeks resolved.
///
/// Built once from a [`SeasonDocument`]; every [`SeasonWeek`] is computed at
/// construction and the value never changes afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Season {
    id: String,
    name: String,
    distribution_day: DistributionDay,
    start_week: CalendarWeek,
    end_week: CalendarWeek,
    ignored_weeks: BTreeSet<CalendarWeek>,
    double_weeks: BTreeSet<CalendarWeek>,
    weeks: Vec<SeasonWeek>,
    by_calendar_week: HashMap<CalendarWeek, usize>,
}

impl Season {
    pub fn from_document(document: &SeasonDocument) -> Result<Self, SeasonError> {
        let label = if document.id.is_empty() {
            document.name.as_str()
        } else {
            document.id.as_str()
        };
        let invalid = |week: CalendarWeek| SeasonError::InvalidWeek {
            season: label.to_string(),
            week,
        };

        if document.week_count == 0 {
            return Err(SeasonError::malformed(label, "weekCount must be positive"));
        }
        for week in [document.start_week, document.end_week]
            .iter()
            .chain(&document.ignored_weeks)
            .chain(&document.double_weeks)
        {
            if !week.is_valid() {
                return Err(invalid(*week));
            }
        }
        if document.end_week < document.start_week {
            return Err(SeasonError::malformed(
                label,
                format!(
                    "end week {} precedes start week {}",
                    document.end_week, document.start_week
                ),
            ));
        }

        let ignored_weeks: BTreeSet<CalendarWeek> = document.ignored_weeks.iter().copied().collect();
        let double_weeks: BTreeSet<CalendarWeek> = document.double_weeks.iter().copied().collect();
        let week_count = document.week_count as usize;

        let out_of_range = || {
            SeasonError::malformed(label, "distribution dates run past the supported date range")
        };
        let monday = iso::from_iso_week(document.start_week).ok_or_else(|| invalid(document.start_week))?;
        let mut date = iso::set_iso_day(monday, document.distribution_day.iso_day())
            .ok_or_else(|| invalid(document.start_week))?;
        let mut other_week = false;
        let mut weeks = Vec::with_capacity(week_count);
        let mut by_calendar_week = HashMap::with_capacity(week_count);

        while weeks.len() < week_count {
            let calendar_week = iso::iso_week(date);
            if calendar_week > document.end_week {
                return Err(SeasonError::malformed(
                    label,
                    format!(
                        "only {} of {} weeks fit before end week {}",
                        weeks.len(),
                        week_count,
                        document.end_week
                    ),
                ));
            }
            if !ignored_weeks.contains(&calendar_week) {
                let double_distribution = double_weeks.contains(&calendar_week);
                by_calendar_week.insert(calendar_week, weeks.len());
                weeks.push(SeasonWeek {
                    season_id: document.id.clone(),
                    calendar_week,
                    number: weeks.len() as u32 + 1,
                    distribution_date: date,
                    double_distribution,
                    other_week,
                    start_date: iso::add_days(date, -6).ok_or_else(out_of_range)?,
                    end_date: iso::add_days(date, 1).ok_or_else(out_of_range)?,
                });
                // a doubled week keeps the parity of the following week
                if !double_distribution {
                    other_week = !other_week;
                }
            }
            if weeks.len() < week_count {
                date = iso::add_days(date, 7).ok_or_else(out_of_range)?;
            }
        }

        // Whatever remains up to the end week must be ignored.
        while let Some(next) = iso::add_days(date, 7) {
            date = next;
            let calendar_week = iso::iso_week(date);
            if calendar_week > document.end_week {
                break;
            }
            if !ignored_weeks.contains(&calendar_week) {
                return Err(SeasonError::malformed(
                    label,
                    format!(
                        "{} weeks end at {} but the season runs until {}",
                        week_count,
                        weeks.last().map(|w| w.calendar_week).unwrap_or(document.start_week),
                        document.end_week
                    ),
                ));
            }
        }

        Ok(Self {
            id: document.id.clone(),
            name: document.name.clone(),
            distribution_day: document.distribution_day,
            start_week: document.start_week,
            end_week: document.end_week,
            ignored_weeks,
            double_weeks,
            weeks,
            by_calendar_week,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn distribution_day(&self) -> DistributionDay {
        self.distribution_day
    }

    pub fn week_count(&self) -> u32 {
        self.weeks.len() as u32
    }

    pub fn start_week(&self) -> CalendarWeek {
        self.start_week
    }

    pub fn end_week(&self) -> CalendarWeek {
        self.end_week
    }

    pub fn ignored_weeks(&self) -> impl Iterator<Item = CalendarWeek> + '_ {
        self.ignored_weeks.iter().copied()
    }

    pub fn double_weeks(&self) -> impl Iterator<Item = CalendarWeek> + '_ {
        self.double_weeks.iter().copied()
    }

    /// Weeks `1..=week_count` in order. Every call starts from the beginning.
    pub fn season_weeks(&self) -> std::slice::Iter<'_, SeasonWeek> {
        self.weeks.iter()
    }

    pub fn season_week_by_number(&self, number: u32) -> Option<&SeasonWeek> {
        let index = usize::try_from(number).ok()?.checked_sub(1)?;
        self.weeks.get(index)
    }

    pub fn calendar_to_season_week(&self, week: CalendarWeek) -> Option<&SeasonWeek> {
        self.by_calendar_week
            .get(&week)
            .and_then(|index| self.weeks.get(*index))
    }

    pub fn previous_week(&self, week: &SeasonWeek) -> Option<&SeasonWeek> {
        self.season_week_by_number(week.number.checked_sub(1)?)
    }

    pub fn next_week(&self, week: &SeasonWeek) -> Option<&SeasonWeek> {
        self.season_week_by_number(week.number + 1)
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.weeks.first().map(SeasonWeek::start_date)
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.weeks.last().map(SeasonWeek::end_date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        match (self.start_date(), self.end_date()) {
            (Some(start), Some(end)) => start <= date && date < end,
            _ => false,
        }
    }

    /// The week whose distribution is the first one on or after `date`.
    pub fn season_week(&self, date: NaiveDate) -> Option<&SeasonWeek> {
        let distribution = self.distribution_day.iso_day();
        let on_distribution_day = iso::set_iso_day(date, distribution)?;
        let mut date = if iso::iso_day(date) > distribution {
            iso::add_days(on_distribution_day, 7)?
        } else {
            on_distribution_day
        };

        let max_steps = self.weeks.len() + self.ignored_weeks.len() + 1;
        for _ in 0..max_steps {
            if !self.contains(date) {
                return None;
            }
            if let Some(week) = self.calendar_to_season_week(iso::iso_week(date)) {
                return Some(week);
            }
            date = iso::add_days(date, 7)?;
        }
        None
    }
}

impl TryFrom<&SeasonDocument> for Season {
    type Error = SeasonError;

    fn try_from(document: &SeasonDocument) -> Result<Self, Self::Error> {
        Season::from_document(document)
    }
}

impl TryFrom<&Document> for Season {
    type Error = SeasonError;

    fn try_from(document: &Document) -> Result<Self, Self::Error> {
        Season::from_document(&SeasonDocument::from_document(document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(week_count: u32, start: (i32, u32), end: (i32, u32)) -> SeasonDocument {
        SeasonDocument {
            id: "season:test".into(),
            rev: None,
            doc_type: season_type(),
            name: "Test".into(),
            distribution_day: DistributionDay::Thursday,
            week_count,
            start_week: start.into(),
            end_week: end.into(),
            ignored_weeks: Vec::new(),
            double_weeks: Vec::new(),
        }
    }

    #[test]
    fn distribution_day_parses_case_insensitively() {
        assert_eq!("Tuesday".parse::<DistributionDay>().unwrap(), DistributionDay::Tuesday);
        assert_eq!(" SUNDAY ".parse::<DistributionDay>().unwrap().iso_day(), 6);
        assert!("funday".parse::<DistributionDay>().is_err());
    }

    #[test]
    fn doubled_week_does_not_flip_parity() {
        let mut document = doc(4, (2021, 10), (2021, 13));
        document.double_weeks = vec![CalendarWeek(2021, 11)];
        let season = Season::from_document(&document).unwrap();
        let parity: Vec<bool> = season.season_weeks().map(|w| w.other_week).collect();
        assert_eq!(parity, vec![false, true, true, false]);
        assert!(season.season_week_by_number(2).unwrap().double_distribution);
    }

    #[test]
    fn zero_weeks_is_rejected() {
        let err = Season::from_document(&doc(0, (2021, 10), (2021, 13))).unwrap_err();
        assert!(matches!(err, SeasonError::Malformed { .. }));
    }
}
