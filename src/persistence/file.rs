use crate::calendar::{Season, SeasonDocument, SeasonError};
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Season(#[from] SeasonError),
}

pub type FileResult<T> = Result<T, FileError>;

/// Reads a season document and resolves its weeks.
pub fn load_season_from_json<P: AsRef<Path>>(path: P) -> FileResult<Season> {
    let file = File::open(path)?;
    let document: SeasonDocument = serde_json::from_reader(file)?;
    Ok(Season::from_document(&document)?)
}

#[derive(Serialize)]
struct WeekCsvRecord {
    season: String,
    number: u32,
    iso_year: i32,
    iso_week: u32,
    distribution_date: String,
    double_distribution: bool,
    other_week: bool,
}

/// Writes the distribution calendar of `season`, one row per week.
pub fn save_weeks_to_csv<P: AsRef<Path>>(season: &Season, path: P) -> FileResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for week in season.season_weeks() {
        writer.serialize(WeekCsvRecord {
            season: season.name().to_string(),
            number: week.number,
            iso_year: week.calendar_week.year(),
            iso_week: week.calendar_week.week(),
            distribution_date: week.distribution_date.format("%Y-%m-%d").to_string(),
            double_distribution: week.double_distribution,
            other_week: week.other_week,
        })?;
    }
    writer.flush()?;
    Ok(())
}
