use chrono::NaiveDate;
use csa_tool::{CalendarWeek, Season, SeasonWeek, load_season_from_json, save_weeks_to_csv};
use std::io::{self, Write};

const COLUMNS: [&str; 6] = ["week", "iso_week", "distribution", "double", "other_week", "serves"];

fn week_row(week: &SeasonWeek) -> [String; 6] {
    [
        week.number.to_string(),
        week.calendar_week.to_string(),
        week.distribution_date.format("%Y-%m-%d %a").to_string(),
        if week.double_distribution { "yes" } else { "" }.to_string(),
        if week.other_week { "yes" } else { "" }.to_string(),
        format!("{} .. {}", week.start_date(), week.end_date()),
    ]
}

fn render_weeks_as_text_table<'a>(weeks: impl IntoIterator<Item = &'a SeasonWeek>) -> String {
    let rows: Vec<[String; 6]> = weeks.into_iter().map(week_row).collect();

    let mut widths: Vec<usize> = COLUMNS.iter().map(|n| n.len()).collect();
    for row in &rows {
        for (ci, cell) in row.iter().enumerate() {
            widths[ci] = widths[ci].max(cell.len());
        }
    }

    let mut sep = String::from("+");
    for w in &widths {
        sep.push_str(&"-".repeat(*w + 2));
        sep.push('+');
    }

    let render_line = |cells: &[&str]| {
        let mut line = String::from("|");
        for (ci, cell) in cells.iter().enumerate() {
            line.push(' ');
            line.push_str(cell);
            line.push_str(&" ".repeat(widths[ci].saturating_sub(cell.len())));
            line.push_str(" |");
        }
        line
    };

    let mut out = String::new();
    out.push_str(&sep);
    out.push('\n');
    out.push_str(&render_line(&COLUMNS));
    out.push('\n');
    out.push_str(&sep);
    out.push('\n');
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push_str(&render_line(&cells));
        out.push('\n');
    }
    out.push_str(&sep);
    out.push('\n');
    out
}

fn print_help() {
    println!(
        "Commands:\n  help                               Show this help\n  load <json_path>                   Load a season document\n  show                               Show season summary and all weeks\n  week <n>                           Show season week n\n  calweek <year> <iso_week>          Show the season week of an ISO week\n  date <YYYY-MM-DD>                  Show the distribution serving a date\n  contains <YYYY-MM-DD>              Check whether a date is inside the season\n  export <csv_path>                  Write the distribution calendar as CSV\n  quit|exit                          Exit"
    );
}

fn print_summary(season: &Season) {
    let join = |weeks: Vec<CalendarWeek>| {
        weeks
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!("Season             : {}", season.name());
    println!("Distribution day   : {}", season.distribution_day());
    println!("Weeks              : {}", season.week_count());
    println!("Calendar weeks     : {} .. {}", season.start_week(), season.end_week());
    if let (Some(start), Some(end)) = (season.start_date(), season.end_date()) {
        println!("Serves             : {start} .. {end}");
    }
    println!("Ignored weeks      : {}", join(season.ignored_weeks().collect()));
    println!("Double weeks       : {}", join(season.double_weeks().collect()));
}

fn parse_date(s: Option<&str>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s?, "%Y-%m-%d").ok()
}

fn main() {
    let mut season: Option<Season> = None;

    println!("CSA Season Tool (CLI) - type 'help' for commands\n");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or("");

        match cmd {
            "help" => {
                print_help();
                continue;
            }
            "quit" | "exit" => break,
            "load" => {
                match parts.next() {
                    Some(path) => match load_season_from_json(path) {
                        Ok(loaded) => {
                            println!("Season loaded from {path}.");
                            print_summary(&loaded);
                            season = Some(loaded);
                        }
                        Err(e) => println!("Error loading season: {e}"),
                    },
                    None => println!("Usage: load <json_path>"),
                }
                continue;
            }
            _ => {}
        }

        let Some(season) = season.as_ref() else {
            println!("No season loaded. Use: load <json_path>");
            continue;
        };

        match cmd {
            "show" => {
                print_summary(season);
                println!("{}", render_weeks_as_text_table(season.season_weeks()));
            }
            "week" => match parts.next().and_then(|s| s.parse::<u32>().ok()) {
                Some(n) => match season.season_week_by_number(n) {
                    Some(week) => println!("{}", render_weeks_as_text_table([week])),
                    None => println!("Season has no week {n}."),
                },
                None => println!("Usage: week <n>"),
            },
            "calweek" => {
                let year = parts.next().and_then(|s| s.parse::<i32>().ok());
                let week = parts.next().and_then(|s| s.parse::<u32>().ok());
                match (year, week) {
                    (Some(year), Some(week)) => {
                        let calendar_week = CalendarWeek::new(year, week);
                        match season.calendar_to_season_week(calendar_week) {
                            Some(week) => println!("{}", render_weeks_as_text_table([week])),
                            None => println!("No distribution in {calendar_week}."),
                        }
                    }
                    _ => println!("Usage: calweek <year> <iso_week>"),
                }
            }
            "date" => match parse_date(parts.next()) {
                Some(date) => match season.season_week(date) {
                    Some(week) => println!("{}", render_weeks_as_text_table([week])),
                    None => println!("{date} is outside the season."),
                },
                None => println!("Usage: date <YYYY-MM-DD>"),
            },
            "contains" => match parse_date(parts.next()) {
                Some(date) => println!("{date} in season: {}", season.contains(date)),
                None => println!("Usage: contains <YYYY-MM-DD>"),
            },
            "export" => match parts.next() {
                Some(path) => match save_weeks_to_csv(season, path) {
                    Ok(()) => println!("Calendar written to {path}."),
                    Err(e) => println!("Error exporting calendar: {e}"),
                },
                None => println!("Usage: export <csv_path>"),
            },
            _ => println!("Unknown command. Type 'help'."),
        }
    }
}
