//! Total parsers for the date and amount text found in upstream tables.
//!
//! Nothing in here fails: unrecognized input degrades to `None` / `0.0`.

use chrono::{Datelike, Local, NaiveDate};

/// Single-date layouts, tried in order; the first that parses wins.
const SINGLE_DATE_FORMATS: &[&str] = &[
    "%d %b %Y",
    "%d %b, %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d-%b-%Y",
    "%Y-%m-%d",
];

/// Layouts for the trailing half of a `"D1-D2 Month [Year]"` range.
const RANGE_END_FORMATS: &[&str] = &["%d %b %Y", "%b %d %Y"];

/// Parsed `(open, close)` pair. A single date yields the same value twice.
pub type DateRange = (Option<NaiveDate>, Option<NaiveDate>);

/// Parse an offering date cell, defaulting missing years to the current year.
pub fn parse_date_range(raw: &str) -> DateRange {
    parse_date_range_in_year(raw, Local::now().year())
}

/// Parse an offering date cell, treating `year` as the current calendar year.
///
/// Accepts `"9-11 Feb"`, `"9-11 Feb 2026"`, `"Feb 9, 2026"`, `"20-Feb-2026"`,
/// `"2026-02-20"` and similar. Empty input and the `--` placeholder are unknown.
pub fn parse_date_range_in_year(raw: &str, year: i32) -> DateRange {
    let text = raw.trim();
    if text.is_empty() || text == "--" {
        return (None, None);
    }

    if let Some(range) = parse_day_range(text, year) {
        return range;
    }

    if let Some(date) = parse_with(text, SINGLE_DATE_FORMATS) {
        return (Some(date), Some(date));
    }

    if !has_year(text) {
        if let Some(date) = parse_with(&format!("{text} {year}"), SINGLE_DATE_FORMATS) {
            return (Some(date), Some(date));
        }
    }

    (None, None)
}

/// Strip everything but digits, `.` and `-`, then parse. Unparseable is `0.0`.
pub fn parse_amount(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().unwrap_or(0.0)
}

/// `"D1-D2 Month [Year]"`: the trailing half carries month and year for both.
fn parse_day_range(text: &str, year: i32) -> Option<DateRange> {
    let (lead, trail) = text.split_once('-')?;
    if trail.contains('-') {
        return None;
    }
    let (lead, trail) = (lead.trim(), trail.trim());
    if lead.is_empty() || !lead.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let trail = if has_year(trail) {
        trail.to_string()
    } else {
        format!("{trail} {year}")
    };
    let end = parse_with(&trail, RANGE_END_FORMATS)?;
    let start = NaiveDate::from_ymd_opt(end.year(), end.month(), lead.parse().ok()?)?;
    Some((Some(start), Some(end)))
}

fn parse_with(text: &str, formats: &[&str]) -> Option<NaiveDate> {
    if !has_day_and_full_year(text) {
        return None;
    }
    formats
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

fn digit_runs(text: &str) -> impl Iterator<Item = usize> + '_ {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .map(str::len)
}

fn has_year(text: &str) -> bool {
    digit_runs(text).any(|len| len == 4)
}

// `%Y` accepts one to four digits, so "20 Feb 26" would otherwise land in year 26.
fn has_day_and_full_year(text: &str) -> bool {
    let runs: Vec<usize> = digit_runs(text).collect();
    runs.len() >= 2
        && runs.iter().filter(|len| **len == 4).count() == 1
        && runs.iter().all(|len| *len <= 2 || *len == 4)
}
