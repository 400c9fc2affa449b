use assert_cmd::Command;
use predicates::str::contains as str_contains;
use std::io::Write;
use tempfile::NamedTempFile;

#[allow(deprecated)]
fn run_cli(script: &str) -> assert_cmd::assert::Assert {
    let mut cmd = Command::cargo_bin("cli").expect("cli binary");
    cmd.write_stdin(script.to_string()).assert()
}

fn season_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    let json = serde_json::json!({
        "_id": "season:winter-2018",
        "name": "Winter 2018/19",
        "distributionDay": "tuesday",
        "weekCount": 24,
        "startWeek": [2018, 40],
        "endWeek": [2019, 13],
        "ignoredWeeks": [[2018, 52], [2019, 1]]
    });
    file.write_all(json.to_string().as_bytes()).unwrap();
    file
}

#[test]
fn cli_requires_a_loaded_season() {
    run_cli("show\nquit\n")
        .success()
        .stdout(str_contains("No season loaded. Use: load <json_path>"));
}

#[test]
fn cli_loads_and_queries_a_season() {
    let file = season_file();
    let script = format!(
        "load {}\nweek 1\ncalweek 2018 52\ndate 2019-04-01\ncontains 2018-09-26\nquit\n",
        file.path().display()
    );
    let assert = run_cli(&script).success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(output.contains("Season loaded from"));
    assert!(output.contains("Winter 2018/19"));
    assert!(output.contains("2018-10-02 Tue"));
    assert!(output.contains("No distribution in 2018-W52."));
    assert!(output.contains("2019-04-01 is outside the season."));
    assert!(output.contains("2018-09-26 in season: true"));
}

#[test]
fn cli_reports_malformed_seasons() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        br#"{"name":"Short","distributionDay":"monday","weekCount":5,"startWeek":[2019,1],"endWeek":[2019,2]}"#,
    )
    .unwrap();
    run_cli(&format!("load {}\nquit\n", file.path().display()))
        .success()
        .stdout(str_contains("Error loading season"));
}

#[test]
fn cli_exports_calendar_csv() {
    let file = season_file();
    let out = NamedTempFile::new().unwrap();
    run_cli(&format!(
        "load {}\nexport {}\nquit\n",
        file.path().display(),
        out.path().display()
    ))
    .success()
    .stdout(str_contains("Calendar written to"));

    let csv = std::fs::read_to_string(out.path()).unwrap();
    assert_eq!(csv.lines().count(), 25);
    assert!(csv.starts_with("season,number,iso_year,iso_week"));
}
