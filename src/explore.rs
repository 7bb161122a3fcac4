//! Read-only profiling of the raw CSVs.
//!
//! Computes a generic table profile (shape, inferred types, nulls, duplicates,
//! numeric summaries, small categorical listings) plus track- and
//! artist-specific analyses, and prints them as a console report.

use chrono::Datelike;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::{PipelineConfig, RAW_ARTISTS_FILE, RAW_TRACKS_FILE};
use crate::error::{PipelineError, Result};
use crate::normalize::{clean_genres, median, parse_explicit, parse_number, parse_release_date};
use crate::table::Table;

const HEAD_ROWS: usize = 3;
const CATEGORICAL_COLUMNS: usize = 5;
const CATEGORICAL_LISTING_MAX: usize = 10;
const TOP_YEARS: usize = 5;
const TOP_ARTISTS: usize = 10;
const CELL_WIDTH: usize = 24;

/// Features whose means are reported for the track table.
const REPORTED_FEATURES: &[&str] = &[
    "danceability",
    "energy",
    "valence",
    "acousticness",
    "instrumentalness",
    "speechiness",
    "liveness",
];

// ============================================================================
// Table Profile
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Text,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "int64",
            ColumnKind::Float => "float64",
            ColumnKind::Boolean => "bool",
            ColumnKind::Text => "object",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Float)
    }
}

/// Infer a column type from its non-null values. All-null columns are floats.
pub fn infer_kind<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ColumnKind {
    let mut kind = None;
    for v in values.flatten() {
        let v = v.trim();
        let this = if v.parse::<i64>().is_ok() {
            ColumnKind::Integer
        } else if v.parse::<f64>().is_ok() {
            ColumnKind::Float
        } else if matches!(v, "True" | "False" | "true" | "false") {
            ColumnKind::Boolean
        } else {
            return ColumnKind::Text;
        };
        kind = Some(match (kind, this) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Integer), ColumnKind::Float) | (Some(ColumnKind::Float), ColumnKind::Integer) => {
                ColumnKind::Float
            }
            _ => return ColumnKind::Text,
        });
    }
    kind.unwrap_or(ColumnKind::Float)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    pub nulls: usize,
}

/// `describe()`-style summary of one numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericSummary {
    pub column: String,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; `None` with fewer than two values.
    pub std: Option<f64>,
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalSummary {
    pub column: String,
    pub unique: usize,
    /// Distinct values in first-seen order, present when `unique` is small.
    pub values: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableProfile {
    pub rows: usize,
    pub columns: Vec<ColumnProfile>,
    pub memory_bytes: usize,
    pub head: Vec<Vec<String>>,
    pub duplicates: usize,
    pub numeric: Vec<NumericSummary>,
    pub categorical: Vec<CategoricalSummary>,
}

/// Linear-interpolated quantile of sorted values.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

pub fn summarize(column: &str, values: &[f64]) -> Option<NumericSummary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let std = (n > 1).then(|| {
        let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        var.sqrt()
    });

    Some(NumericSummary {
        column: column.to_string(),
        count: n,
        mean,
        std,
        min: sorted[0],
        p25: quantile(&sorted, 0.25),
        p50: quantile(&sorted, 0.5),
        p75: quantile(&sorted, 0.75),
        max: sorted[n - 1],
    })
}

fn numbers<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<f64> {
    values.filter_map(parse_number).collect()
}

pub fn profile_table(table: &Table) -> TableProfile {
    let mut columns = Vec::with_capacity(table.width());
    let mut numeric = Vec::new();
    let mut categorical = Vec::new();

    for name in table.headers() {
        let kind = infer_kind(table.column(name));
        let nulls = table.column(name).filter(|v| v.is_none()).count();
        columns.push(ColumnProfile {
            name: name.clone(),
            kind,
            nulls,
        });

        if kind.is_numeric() {
            if let Some(summary) = summarize(name, &numbers(table.column(name))) {
                numeric.push(summary);
            }
        } else if kind == ColumnKind::Text && categorical.len() < CATEGORICAL_COLUMNS {
            let mut seen = FxHashSet::default();
            let distinct: Vec<&str> = table.column(name).flatten().filter(|v| seen.insert(*v)).collect();
            categorical.push(CategoricalSummary {
                column: name.clone(),
                unique: distinct.len(),
                values: (distinct.len() <= CATEGORICAL_LISTING_MAX)
                    .then(|| distinct.iter().map(|s| s.to_string()).collect()),
            });
        }
    }

    let head = table
        .rows()
        .take(HEAD_ROWS)
        .map(|row| row.cells().iter().map(|c| c.clone().unwrap_or_default()).collect())
        .collect();

    TableProfile {
        rows: table.len(),
        columns,
        memory_bytes: table.approx_memory_bytes(),
        head,
        duplicates: table.duplicate_row_count(),
        numeric,
        categorical,
    }
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

fn clip(s: &str) -> String {
    if s.chars().count() <= CELL_WIDTH {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(CELL_WIDTH - 3).collect();
        out.push_str("...");
        out
    }
}

fn fmt_stat(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else {
        format!("{:.3}", v)
    }
}

pub fn print_profile(filename: &str, profile: &TableProfile, headers: &[String]) {
    println!("{:=<80}", "");
    println!("ANALYZING: {}", filename);
    println!("{:=<80}", "");

    println!("\nShape: {} rows x {} columns", profile.rows, profile.columns.len());
    println!("Memory: {:.2} MB", profile.memory_bytes as f64 / (1024.0 * 1024.0));

    println!("\nColumns ({}):", profile.columns.len());
    for (i, col) in profile.columns.iter().enumerate() {
        println!("  {}. {} ({})", i + 1, col.name, col.kind.as_str());
    }

    println!("\nFirst {} rows:", HEAD_ROWS);
    println!("  {}", headers.iter().map(|h| clip(h)).collect::<Vec<_>>().join(" | "));
    for row in &profile.head {
        println!("  {}", row.iter().map(|c| clip(c)).collect::<Vec<_>>().join(" | "));
    }

    println!("\nNull values:");
    let mut with_nulls: Vec<&ColumnProfile> = profile.columns.iter().filter(|c| c.nulls > 0).collect();
    if with_nulls.is_empty() {
        println!("  No null values found");
    } else {
        with_nulls.sort_by(|a, b| b.nulls.cmp(&a.nulls));
        for col in with_nulls {
            println!("  {:<24} {:>10} ({:.2}%)", col.name, col.nulls, pct(col.nulls, profile.rows));
        }
    }

    println!(
        "\nDuplicates: {} rows ({:.2}%)",
        profile.duplicates,
        pct(profile.duplicates, profile.rows)
    );

    if !profile.numeric.is_empty() {
        println!("\nNumeric columns:");
        println!(
            "  {:<20} {:>10} {:>14} {:>14} {:>12} {:>12} {:>12} {:>12} {:>14}",
            "column", "count", "mean", "std", "min", "25%", "50%", "75%", "max"
        );
        for s in &profile.numeric {
            println!(
                "  {:<20} {:>10} {:>14} {:>14} {:>12} {:>12} {:>12} {:>12} {:>14}",
                clip(&s.column),
                s.count,
                fmt_stat(s.mean),
                s.std.map(fmt_stat).unwrap_or_else(|| "NaN".to_string()),
                fmt_stat(s.min),
                fmt_stat(s.p25),
                fmt_stat(s.p50),
                fmt_stat(s.p75),
                fmt_stat(s.max),
            );
        }
    }

    if !profile.categorical.is_empty() {
        println!("\nUnique values (text columns):");
        for c in &profile.categorical {
            println!("  {}: {} unique values", c.column, c.unique);
            if let Some(values) = &c.values {
                println!("    Values: {:?}", values);
            }
        }
    }
    println!("\n{:=<80}", "");
}

/// Read and profile one CSV. A read failure is reported and yields `None`.
pub fn analyze_csv(path: &Path, filename: &str) -> Option<Table> {
    let table = match Table::read_csv(path) {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    let profile = profile_table(&table);
    print_profile(filename, &profile, table.headers());
    Some(table)
}

// ============================================================================
// Track Analysis
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PopularityStats {
    pub mean: f64,
    pub median: f64,
    pub zero: usize,
    pub above_80: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DurationStats {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackAnalysis {
    pub year_range: Option<(i32, i32)>,
    /// Most frequent release years, count descending then year ascending.
    pub top_years: Vec<(i32, usize)>,
    pub popularity: Option<PopularityStats>,
    pub feature_means: Vec<(&'static str, f64)>,
    pub explicit: Option<usize>,
    pub duration_minutes: Option<DurationStats>,
    pub total: usize,
}

fn mean_of(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

pub fn analyze_tracks(table: &Table) -> TrackAnalysis {
    let mut analysis = TrackAnalysis {
        total: table.len(),
        ..Default::default()
    };

    if table.has_column("release_date") {
        let mut counts: FxHashMap<i32, usize> = FxHashMap::default();
        for year in table
            .column("release_date")
            .flatten()
            .filter_map(parse_release_date)
            .map(|d| d.year())
        {
            *counts.entry(year).or_default() += 1;
        }
        analysis.year_range = counts
            .keys()
            .min()
            .copied()
            .zip(counts.keys().max().copied());
        let mut years: Vec<(i32, usize)> = counts.into_iter().collect();
        years.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        years.truncate(TOP_YEARS);
        analysis.top_years = years;
    }

    if table.has_column("popularity") {
        let values = numbers(table.column("popularity"));
        if let (Some(mean), Some(median)) = (mean_of(&values), median(&values)) {
            analysis.popularity = Some(PopularityStats {
                mean,
                median,
                zero: values.iter().filter(|v| **v == 0.0).count(),
                above_80: values.iter().filter(|v| **v > 80.0).count(),
            });
        }
    }

    for &feature in REPORTED_FEATURES {
        if let Some(mean) = mean_of(&numbers(table.column(feature))) {
            analysis.feature_means.push((feature, mean));
        }
    }

    if table.has_column("explicit") {
        analysis.explicit = Some(table.column("explicit").filter(|v| parse_explicit(*v)).count());
    }

    if table.has_column("duration_ms") {
        let minutes: Vec<f64> = numbers(table.column("duration_ms"))
            .into_iter()
            .map(|ms| ms / 60000.0)
            .collect();
        if let (Some(mean), Some(median)) = (mean_of(&minutes), median(&minutes)) {
            analysis.duration_minutes = Some(DurationStats {
                mean,
                median,
                min: minutes.iter().copied().fold(f64::INFINITY, f64::min),
                max: minutes.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            });
        }
    }

    analysis
}

pub fn print_track_analysis(a: &TrackAnalysis) {
    println!("\n{:=<80}", "");
    println!("TRACK ANALYSIS");
    println!("{:=<80}", "");

    if let Some((lo, hi)) = a.year_range {
        println!("\nRelease years:");
        println!("  Earliest: {}", lo);
        println!("  Latest: {}", hi);
        println!("  Years with most tracks:");
        for (year, count) in &a.top_years {
            println!("    {}  {}", year, count);
        }
    }

    if let Some(p) = &a.popularity {
        println!("\nPopularity:");
        println!("  Mean: {:.2}", p.mean);
        println!("  Median: {:.2}", p.median);
        println!("  Tracks with popularity 0: {}", p.zero);
        println!("  Tracks with popularity > 80: {}", p.above_80);
    }

    if !a.feature_means.is_empty() {
        println!("\nAudio feature means:");
        for (feature, mean) in &a.feature_means {
            println!("  {}: {:.3}", feature, mean);
        }
    }

    if let Some(explicit) = a.explicit {
        println!("\nExplicit content:");
        println!("  Explicit tracks: {} ({:.2}%)", explicit, pct(explicit, a.total));
    }

    if let Some(d) = &a.duration_minutes {
        println!("\nDuration:");
        println!("  Mean: {:.2} minutes", d.mean);
        println!("  Median: {:.2} minutes", d.median);
        println!("  Shortest: {:.2} minutes", d.min);
        println!("  Longest: {:.2} minutes", d.max);
    }
}

// ============================================================================
// Artist Analysis
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TopArtist {
    pub name: String,
    pub popularity: f64,
    pub followers: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FollowerStats {
    pub mean: f64,
    pub median: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArtistAnalysis {
    pub top: Vec<TopArtist>,
    pub followers: Option<FollowerStats>,
    /// Artists with a null or empty genre list.
    pub without_genres: Option<usize>,
    pub total: usize,
}

pub fn analyze_artists(table: &Table) -> ArtistAnalysis {
    let mut analysis = ArtistAnalysis {
        total: table.len(),
        ..Default::default()
    };

    if table.has_column("popularity") {
        let mut ranked: Vec<TopArtist> = table
            .rows()
            .filter_map(|row| {
                let popularity = parse_number(row.get("popularity"))?;
                Some(TopArtist {
                    name: row.get("name").unwrap_or_default().to_string(),
                    popularity,
                    followers: parse_number(row.get("followers")),
                })
            })
            .collect();
        // Stable: ties keep file order.
        ranked.sort_by(|a, b| b.popularity.total_cmp(&a.popularity));
        ranked.truncate(TOP_ARTISTS);
        analysis.top = ranked;
    }

    if table.has_column("followers") {
        let values = numbers(table.column("followers"));
        if let (Some(mean), Some(median)) = (mean_of(&values), median(&values)) {
            analysis.followers = Some(FollowerStats {
                mean,
                median,
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            });
        }
    }

    if table.has_column("genres") {
        analysis.without_genres = Some(
            table
                .column("genres")
                .filter(|g| g.is_none() || clean_genres(*g).trim().is_empty())
                .count(),
        );
    }

    analysis
}

pub fn print_artist_analysis(a: &ArtistAnalysis) {
    println!("\n{:=<80}", "");
    println!("ARTIST ANALYSIS");
    println!("{:=<80}", "");

    if !a.top.is_empty() {
        println!("\nTop {} artists by popularity:", TOP_ARTISTS);
        println!("  {:<32} {:>10} {:>14}", "name", "popularity", "followers");
        for artist in &a.top {
            let followers = artist.followers.map(|f| format!("{:.0}", f)).unwrap_or_default();
            println!("  {:<32} {:>10} {:>14}", clip(&artist.name), artist.popularity, followers);
        }
    }

    if let Some(f) = &a.followers {
        println!("\nFollowers:");
        println!("  Mean: {:.0}", f.mean);
        println!("  Median: {:.0}", f.median);
        println!("  Most followed: {:.0}", f.max);
    }

    if let Some(n) = a.without_genres {
        println!("\nGenres:");
        println!("  Artists without genres: {} ({:.2}%)", n, pct(n, a.total));
    }
}

// ============================================================================
// Stage Entry Point
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ExploreReport {
    pub tracks: Option<TrackAnalysis>,
    pub artists: Option<ArtistAnalysis>,
}

pub fn run_explore(config: &PipelineConfig) -> Result<ExploreReport> {
    if !config.raw_dir.is_dir() {
        return Err(PipelineError::missing_input(
            config.raw_dir.as_path(),
            "create the raw directory or point --raw-dir at the Kaggle export",
        ));
    }
    info!("Exploring raw data in {}", config.raw_dir.display());

    let mut report = ExploreReport::default();

    let tracks_path = config.raw_tracks_path();
    if tracks_path.exists() {
        if let Some(table) = analyze_csv(&tracks_path, RAW_TRACKS_FILE) {
            let analysis = analyze_tracks(&table);
            print_track_analysis(&analysis);
            report.tracks = Some(analysis);
        }
    } else {
        warn!("File not found: {}", tracks_path.display());
    }

    let artists_path = config.raw_artists_path();
    if artists_path.exists() {
        if let Some(table) = analyze_csv(&artists_path, RAW_ARTISTS_FILE) {
            let analysis = analyze_artists(&table);
            print_artist_analysis(&analysis);
            report.artists = Some(analysis);
        }
    } else {
        warn!("File not found: {}", artists_path.display());
    }

    Ok(report)
}
