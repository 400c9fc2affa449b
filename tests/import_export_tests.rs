use csa_tool::persistence::file::FileError;
use csa_tool::{SeasonError, load_season_from_json, save_weeks_to_csv};
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_json(value: serde_json::Value) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(value.to_string().as_bytes()).unwrap();
    file
}

fn spring_json() -> serde_json::Value {
    json!({
        "_id": "season:spring-2019",
        "name": "Spring 2019",
        "distributionDay": "friday",
        "weekCount": 4,
        "startWeek": [2019, 14],
        "endWeek": [2019, 18],
        "ignoredWeeks": [[2019, 16]],
        "doubleWeeks": [[2019, 17]]
    })
}

#[test]
fn season_loads_from_json_file() {
    let file = write_json(spring_json());
    let season = load_season_from_json(file.path()).expect("load season");
    assert_eq!(season.id(), "season:spring-2019");
    assert_eq!(season.name(), "Spring 2019");
    assert_eq!(season.week_count(), 4);
    assert_eq!(
        season.season_week_by_number(3).unwrap().calendar_week.week(),
        17
    );
}

#[test]
fn malformed_season_file_reports_season_error() {
    let mut value = spring_json();
    value["weekCount"] = json!(9);
    let file = write_json(value);
    let err = load_season_from_json(file.path()).unwrap_err();
    assert!(matches!(err, FileError::Season(SeasonError::Malformed { .. })));
}

#[test]
fn invalid_json_is_reported() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"{ not json").unwrap();
    let err = load_season_from_json(file.path()).unwrap_err();
    assert!(matches!(err, FileError::Json(_)));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_season_from_json(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, FileError::Io(_)));
}

#[test]
fn weeks_export_to_csv() {
    let file = write_json(spring_json());
    let season = load_season_from_json(file.path()).unwrap();

    let out = NamedTempFile::new().unwrap();
    save_weeks_to_csv(&season, out.path()).expect("export csv");

    let mut reader = csv::Reader::from_path(out.path()).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec![
            "season",
            "number",
            "iso_year",
            "iso_week",
            "distribution_date",
            "double_distribution",
            "other_week"
        ]
    );

    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 4);
    assert_eq!(&rows[0][4], "2019-04-05");
    assert_eq!(&rows[1][3], "15");
    assert_eq!(&rows[2][3], "17");
    assert_eq!(&rows[2][5], "true");
    assert_eq!(&rows[3][4], "2019-05-03");
}
