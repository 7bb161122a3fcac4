//! Field-level normalization rules for raw track and artist columns.
//!
//! Every function here is total: malformed input maps to a null/default
//! value, never to an error.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::table::is_null_marker;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static YEAR_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})$").unwrap());

static YEAR_MONTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-(\d{1,2})$").unwrap());

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%SZ",
];

/// Characters stripped around list literals like `['a', "b"]`.
const LIST_QUOTES: &[char] = &['\'', '"'];
const LIST_BRACKETS: &[char] = &['[', ']'];

/// Trim and collapse internal whitespace runs to a single space.
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RUN.replace_all(s.trim(), " ").into_owned()
}

/// Parse a release date at day, month or year precision.
///
/// Month- and year-only values resolve to the first day of the period.
/// Anything unparsable is `None`.
pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(caps) = YEAR_ONLY.captures(s) {
        let year: i32 = caps[1].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }

    if let Some(caps) = YEAR_MONTH.captures(s) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, 1);
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    None
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Coerce a raw explicit flag to boolean.
///
/// Numeric values are true when non-zero; textual true/false/yes/no are
/// recognized case-insensitively. Null and unrecognized text are false.
pub fn parse_explicit(raw: Option<&str>) -> bool {
    let Some(s) = raw.map(str::trim) else {
        return false;
    };
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => true,
        "false" | "f" | "no" | "n" | "" => false,
        other => other.parse::<f64>().map(|v| v != 0.0 && !v.is_nan()).unwrap_or(false),
    }
}

/// Parse a finite float, treating null markers as missing.
pub fn parse_number(raw: Option<&str>) -> Option<f64> {
    let s = raw?.trim();
    if is_null_marker(s) {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a non-negative integer count; fractional values truncate toward zero.
pub fn parse_count(raw: Option<&str>) -> Option<u64> {
    parse_number(raw).filter(|v| *v >= 0.0).map(|v| v.trunc() as u64)
}

/// Extract the first id from a stringified id list.
///
/// `"['abc123', 'def456']"` yields `abc123`. Empty, null or bracket-only
/// input yields `None`.
pub fn extract_primary_artist_id(raw: Option<&str>) -> Option<String> {
    let s = raw?;
    let mut x = s.trim().trim_matches(LIST_BRACKETS);
    x = x.trim().trim_matches(LIST_QUOTES);

    if let Some((first, _)) = x.split_once(',') {
        x = first.trim().trim_matches(LIST_QUOTES);
    }

    let x = x.trim().trim_matches(LIST_QUOTES);
    if x.is_empty() {
        None
    } else {
        Some(x.to_string())
    }
}

/// Render a genre list literal as a display string: `['pop', 'rock']` → `pop, rock`.
pub fn clean_genres(raw: Option<&str>) -> String {
    let s = raw.unwrap_or("[]");
    s.trim_matches(LIST_BRACKETS)
        .chars()
        .filter(|c| !LIST_QUOTES.contains(c))
        .collect()
}

/// Median of the values; the mean of the two middle values for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Truncate to at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}
