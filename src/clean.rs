//! Cleaning and transformation stage.
//!
//! Reads the raw Kaggle `tracks.csv` / `artists.csv`, applies the column
//! rules, splits audio descriptors into their own table and writes the
//! processed CSVs under the load schema's column names.

use chrono::Datelike;
use rustc_hash::FxHashSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{
    ArtistColumns, AudioFeatureRow, AudioFeatureTable, CleanArtist, CleanArtists, CleanStats,
    CleanTrack, CleanTracks, TrackColumns, AUDIO_FEATURE_COLUMNS, UNKNOWN_ARTIST, UNKNOWN_TRACK,
};
use crate::normalize::{
    clean_genres, collapse_whitespace, extract_primary_artist_id, format_date, median,
    parse_count, parse_explicit, parse_number, parse_release_date, round2,
};
use crate::safety::validate_output_path;
use crate::table::{self, is_null_marker, Row, Table};

const TRACK_REQUIRED: &[&str] = &["id", "name", "release_date", "explicit", "popularity"];
const ARTIST_REQUIRED: &[&str] = &["id", "name", "popularity"];

/// Number of id-extraction before/after pairs logged at debug level.
const ID_EXAMPLES: usize = 5;

fn require_columns(table: &Table, source: &Path, columns: &[&'static str]) -> Result<()> {
    for &column in columns {
        if !table.has_column(column) {
            return Err(PipelineError::MissingColumn {
                path: source.to_path_buf(),
                column,
            });
        }
    }
    Ok(())
}

/// Collapsed name, or `None` when nothing usable remains.
///
/// A name that collapses to blank or to a null marker would be read back as
/// null from the processed CSV, so it is treated as missing here.
fn clean_name(raw: Option<&str>) -> Option<String> {
    let name = collapse_whitespace(raw?);
    if name.is_empty() || is_null_marker(&name) {
        None
    } else {
        Some(name)
    }
}

/// Rows with a non-null id, first occurrence per id, in file order.
struct UniqueRows<'a> {
    rows: Vec<(&'a str, Row<'a>)>,
    duplicates: usize,
    null_ids: usize,
}

fn unique_by_id<'a>(table: &'a Table) -> UniqueRows<'a> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut out = UniqueRows {
        rows: Vec::with_capacity(table.len()),
        duplicates: 0,
        null_ids: 0,
    };
    for row in table.rows() {
        match row.get("id") {
            None => out.null_ids += 1,
            Some(id) if !seen.insert(id) => out.duplicates += 1,
            Some(id) => out.rows.push((id, row)),
        }
    }
    out
}

pub fn clean_tracks(table: &Table, source: &Path, stats: &mut CleanStats) -> Result<CleanTracks> {
    require_columns(table, source, TRACK_REQUIRED)?;

    let columns = TrackColumns {
        duration_ms: table.has_column("duration_ms"),
        artists: table.has_column("artists"),
        id_artists: table.has_column("id_artists"),
    };

    let unique = unique_by_id(table);
    stats.tracks_read = table.len();
    stats.duplicate_tracks = unique.duplicates;
    stats.null_id_tracks = unique.null_ids;
    if unique.duplicates > 0 {
        info!("Removed {} duplicate tracks", unique.duplicates);
    }
    if unique.null_ids > 0 {
        warn!("Dropped {} tracks without id", unique.null_ids);
    }

    let mut tracks = Vec::with_capacity(unique.rows.len());
    for (id, row) in unique.rows {
        let track_name = clean_name(row.get("name")).unwrap_or_else(|| {
            stats.null_name_tracks += 1;
            UNKNOWN_TRACK.to_string()
        });

        let raw_date = row.get("release_date");
        let release_date = raw_date.and_then(parse_release_date);
        if raw_date.is_some() && release_date.is_none() {
            stats.unparsed_release_dates += 1;
        }

        let popularity = parse_count(row.get("popularity")).unwrap_or_else(|| {
            stats.null_popularity_tracks += 1;
            0
        });

        let duration_ms = if columns.duration_ms {
            parse_count(row.get("duration_ms"))
        } else {
            None
        };

        let artist_name = columns.artists.then(|| {
            row.get("artists")
                .map(|a| a.trim().to_string())
                .unwrap_or_else(|| UNKNOWN_ARTIST.to_string())
        });

        let primary_artist_id = if columns.id_artists {
            let raw = row.get("id_artists");
            let extracted = extract_primary_artist_id(raw);
            if tracks.len() < ID_EXAMPLES {
                debug!("id_artists {:?} -> {:?}", raw.unwrap_or(""), extracted);
            }
            if extracted.is_none() {
                stats.tracks_without_artist += 1;
            }
            extracted
        } else {
            None
        };

        tracks.push(CleanTrack {
            track_id: id.to_string(),
            track_name,
            popularity,
            duration_ms,
            duration_min: duration_ms.map(|ms| round2(ms as f64 / 60_000.0)),
            explicit: parse_explicit(row.get("explicit")),
            artist_name,
            primary_artist_id,
            release_date,
            release_year: release_date.map(|d| d.year()),
        });
    }

    impute_release_years(&mut tracks, stats);

    if stats.null_name_tracks > 0 {
        warn!("Filled {} empty track names with '{}'", stats.null_name_tracks, UNKNOWN_TRACK);
    }
    if stats.null_popularity_tracks > 0 {
        info!("Filled {} null track popularity values with 0", stats.null_popularity_tracks);
    }
    if columns.id_artists {
        info!("{} tracks without a valid artist id", stats.tracks_without_artist);
    }
    info!("Track cleaning kept {} rows", tracks.len());

    Ok(CleanTracks { columns, tracks })
}

/// Fill missing years with the median of the known ones, rounded to a whole year.
fn impute_release_years(tracks: &mut [CleanTrack], stats: &mut CleanStats) {
    let known: Vec<f64> = tracks
        .iter()
        .filter_map(|t| t.release_year.map(f64::from))
        .collect();
    let Some(median_year) = median(&known).map(|m| m.round() as i32) else {
        return;
    };
    stats.median_release_year = Some(median_year);

    for t in tracks.iter_mut().filter(|t| t.release_year.is_none()) {
        t.release_year = Some(median_year);
        stats.imputed_release_years += 1;
    }
    if stats.imputed_release_years > 0 {
        info!(
            "Imputed {} missing release years with median {}",
            stats.imputed_release_years, median_year
        );
    }
}

pub fn clean_artists(table: &Table, source: &Path, stats: &mut CleanStats) -> Result<CleanArtists> {
    require_columns(table, source, ARTIST_REQUIRED)?;

    let columns = ArtistColumns {
        followers: table.has_column("followers"),
        genres: table.has_column("genres"),
    };

    let unique = unique_by_id(table);
    stats.artists_read = table.len();
    stats.duplicate_artists = unique.duplicates;
    stats.null_id_artists = unique.null_ids;
    if unique.duplicates > 0 {
        info!("Removed {} duplicate artists", unique.duplicates);
    }
    if unique.null_ids > 0 {
        warn!("Dropped {} artists without id", unique.null_ids);
    }

    let artists: Vec<CleanArtist> = unique
        .rows
        .into_iter()
        .map(|(id, row)| {
            let artist_name = clean_name(row.get("name")).unwrap_or_else(|| {
                stats.null_name_artists += 1;
                UNKNOWN_ARTIST.to_string()
            });
            let popularity = parse_count(row.get("popularity")).unwrap_or_else(|| {
                stats.null_popularity_artists += 1;
                0
            });
            let followers = columns.followers.then(|| {
                parse_count(row.get("followers")).unwrap_or_else(|| {
                    stats.null_followers += 1;
                    0
                })
            });
            let genres = columns.genres.then(|| clean_genres(row.get("genres")));

            CleanArtist {
                artist_id: id.to_string(),
                artist_name,
                popularity,
                followers,
                genres,
            }
        })
        .collect();

    if stats.null_followers > 0 {
        info!("Filled {} null follower counts with 0", stats.null_followers);
    }
    info!("Artist cleaning kept {} rows", artists.len());

    Ok(CleanArtists { columns, artists })
}

/// Split the whitelisted audio descriptors out of the track table.
///
/// Uses the same dedupe/null-id policy as `clean_tracks`, so rows line up
/// with the cleaned tracks. Returns `None` when the table carries no
/// descriptor columns.
pub fn extract_audio_features(table: &Table, stats: &mut CleanStats) -> Option<AudioFeatureTable> {
    let columns: Vec<&'static str> = AUDIO_FEATURE_COLUMNS
        .iter()
        .copied()
        .filter(|c| table.has_column(c))
        .collect();

    if columns.is_empty() || !table.has_column("id") {
        warn!("No audio features found in track table");
        return None;
    }

    let mut rows: Vec<AudioFeatureRow> = unique_by_id(table)
        .rows
        .into_iter()
        .map(|(id, row)| AudioFeatureRow {
            track_id: id.to_string(),
            values: columns.iter().map(|c| parse_number(row.get(c))).collect(),
        })
        .collect();

    for col in 0..columns.len() {
        let known: Vec<f64> = rows.iter().filter_map(|r| r.values[col]).collect();
        if known.len() == rows.len() {
            continue;
        }
        let Some(fill) = median(&known) else {
            continue;
        };
        for r in rows.iter_mut().filter(|r| r.values[col].is_none()) {
            r.values[col] = Some(fill);
            stats.imputed_feature_cells += 1;
        }
    }

    stats.audio_feature_rows = Some(rows.len());
    info!("Extracted audio features for {} tracks", rows.len());
    Some(AudioFeatureTable { columns, rows })
}

// ============================================================================
// Output Layout
// ============================================================================

fn opt<T: ToString>(v: &Option<T>) -> String {
    v.as_ref().map(|x| x.to_string()).unwrap_or_default()
}

fn py_bool(b: bool) -> String {
    let s = if b { "True" } else { "False" };
    s.to_string()
}

pub fn track_headers(columns: &TrackColumns) -> Vec<&'static str> {
    let mut headers = vec!["track_id", "track_name", "track_popularity"];
    if columns.duration_ms {
        headers.extend(["duration_ms", "duration_min"]);
    }
    headers.push("explicit");
    if columns.artists {
        headers.push("artist_name");
    }
    if columns.id_artists {
        headers.push("primary_artist_id");
    }
    headers.extend(["release_date", "release_year"]);
    headers
}

fn track_row(t: &CleanTrack, columns: &TrackColumns) -> Vec<String> {
    let mut row = vec![t.track_id.clone(), t.track_name.clone(), t.popularity.to_string()];
    if columns.duration_ms {
        row.push(opt(&t.duration_ms));
        row.push(opt(&t.duration_min));
    }
    row.push(py_bool(t.explicit));
    if columns.artists {
        row.push(opt(&t.artist_name));
    }
    if columns.id_artists {
        row.push(opt(&t.primary_artist_id));
    }
    row.push(t.release_date.map(format_date).unwrap_or_default());
    row.push(opt(&t.release_year));
    row
}

pub fn artist_headers(columns: &ArtistColumns) -> Vec<&'static str> {
    let mut headers = vec!["artist_id", "artist_name", "artist_popularity"];
    if columns.followers {
        headers.push("artist_followers");
    }
    if columns.genres {
        headers.push("artist_genres");
    }
    headers
}

fn artist_row(a: &CleanArtist, columns: &ArtistColumns) -> Vec<String> {
    let mut row = vec![a.artist_id.clone(), a.artist_name.clone(), a.popularity.to_string()];
    if columns.followers {
        row.push(opt(&a.followers));
    }
    if columns.genres {
        row.push(opt(&a.genres));
    }
    row
}

fn feature_headers(features: &AudioFeatureTable) -> Vec<&'static str> {
    std::iter::once("track_id")
        .chain(features.columns.iter().copied())
        .collect()
}

fn feature_row(r: &AudioFeatureRow) -> Vec<String> {
    std::iter::once(r.track_id.clone())
        .chain(r.values.iter().map(opt))
        .collect()
}

pub fn write_tracks(path: &Path, tracks: &CleanTracks) -> Result<()> {
    let rows: Vec<Vec<String>> = tracks.tracks.iter().map(|t| track_row(t, &tracks.columns)).collect();
    table::write_rows(path, &track_headers(&tracks.columns), &rows)
}

pub fn write_artists(path: &Path, artists: &CleanArtists) -> Result<()> {
    let rows: Vec<Vec<String>> = artists.artists.iter().map(|a| artist_row(a, &artists.columns)).collect();
    table::write_rows(path, &artist_headers(&artists.columns), &rows)
}

pub fn write_audio_features(path: &Path, features: &AudioFeatureTable) -> Result<()> {
    let rows: Vec<Vec<String>> = features.rows.iter().map(feature_row).collect();
    table::write_rows(path, &feature_headers(features), &rows)
}

// ============================================================================
// Quality Report
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub total_tracks: usize,
    pub year_range: Option<(i32, i32)>,
    pub mean_track_popularity: f64,
    pub explicit_tracks: usize,
    pub total_artists: usize,
    pub mean_artist_popularity: f64,
    pub mean_followers: Option<f64>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

pub fn quality_report(tracks: &CleanTracks, artists: &CleanArtists) -> QualityReport {
    let years = tracks.tracks.iter().filter_map(|t| t.release_year);
    let year_range = years.fold(None, |acc: Option<(i32, i32)>, y| match acc {
        None => Some((y, y)),
        Some((lo, hi)) => Some((lo.min(y), hi.max(y))),
    });

    QualityReport {
        total_tracks: tracks.tracks.len(),
        year_range,
        mean_track_popularity: mean(tracks.tracks.iter().map(|t| t.popularity as f64)),
        explicit_tracks: tracks.tracks.iter().filter(|t| t.explicit).count(),
        total_artists: artists.artists.len(),
        mean_artist_popularity: mean(artists.artists.iter().map(|a| a.popularity as f64)),
        mean_followers: artists
            .columns
            .followers
            .then(|| mean(artists.artists.iter().filter_map(|a| a.followers.map(|f| f as f64)))),
    }
}

pub fn print_quality_report(report: &QualityReport) {
    println!("\n{:=<80}", "");
    println!("DATA QUALITY REPORT");
    println!("{:=<80}", "");

    println!("\nTracks:");
    println!("  Total tracks: {}", report.total_tracks);
    if let Some((lo, hi)) = report.year_range {
        println!("  Period: {} - {}", lo, hi);
    }
    println!("  Mean popularity: {:.2}", report.mean_track_popularity);
    let explicit_pct = if report.total_tracks == 0 {
        0.0
    } else {
        100.0 * report.explicit_tracks as f64 / report.total_tracks as f64
    };
    println!("  Explicit tracks: {} ({:.2}%)", report.explicit_tracks, explicit_pct);

    println!("\nArtists:");
    println!("  Total artists: {}", report.total_artists);
    println!("  Mean popularity: {:.2}", report.mean_artist_popularity);
    if let Some(followers) = report.mean_followers {
        println!("  Mean followers: {:.0}", followers);
    }
    println!("\n{:=<80}", "");
}

// ============================================================================
// Stage Entry Point
// ============================================================================

pub fn run_clean(config: &PipelineConfig) -> Result<CleanStats> {
    let start = Instant::now();
    let mut stats = CleanStats::default();

    let tracks_path = config.raw_tracks_path();
    let artists_path = config.raw_artists_path();
    for path in [&tracks_path, &artists_path] {
        if !path.exists() {
            return Err(PipelineError::missing_input(
                path.as_path(),
                "place the Kaggle export in the raw directory or run `extract` first",
            ));
        }
    }

    info!("Loading raw data from {}", config.raw_dir.display());
    let raw_tracks = Table::read_csv(&tracks_path)?;
    let raw_artists = Table::read_csv(&artists_path)?;
    info!("Tracks loaded: {} rows", raw_tracks.len());
    info!("Artists loaded: {} rows", raw_artists.len());

    let tracks = clean_tracks(&raw_tracks, &tracks_path, &mut stats)?;
    let artists = clean_artists(&raw_artists, &artists_path, &mut stats)?;
    let features = extract_audio_features(&raw_tracks, &mut stats);

    let sources = [tracks_path.as_path(), artists_path.as_path()];
    let out_tracks = config.clean_tracks_path();
    let out_artists = config.clean_artists_path();
    let out_features = config.clean_audio_features_path();
    for out in [&out_tracks, &out_artists, &out_features] {
        validate_output_path(out, &sources)?;
    }

    write_tracks(&out_tracks, &tracks)?;
    info!("Saved {} ({} rows)", out_tracks.display(), tracks.tracks.len());
    write_artists(&out_artists, &artists)?;
    info!("Saved {} ({} rows)", out_artists.display(), artists.artists.len());
    if let Some(features) = &features {
        write_audio_features(&out_features, features)?;
        info!("Saved {} ({} rows)", out_features.display(), features.rows.len());
    }

    stats.tracks_written = tracks.tracks.len();
    stats.artists_written = artists.artists.len();

    print_quality_report(&quality_report(&tracks, &artists));

    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    Ok(stats)
}
