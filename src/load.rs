//! Load stage: processed CSVs into the SQLite dimension tables.
//!
//! Order is fixed: artists, then tracks, then audio features. Each later table
//! is filtered against the keys already present in its parent table, so a
//! track whose artist never made it into `dim_artists` is counted and skipped
//! instead of failing the batch on the foreign key.

use rusqlite::Connection;
use rustc_hash::FxHashSet;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, RowError};
use crate::models::{
    ArtistRecord, AudioFeatureRecord, LoadStats, TableLoadStats, TrackRecord, MAX_TRACK_NAME_CHARS,
};
use crate::normalize::{parse_explicit, parse_number, parse_release_date, truncate_chars};
use crate::progress::{create_spinner, StageProgress};
use crate::store::{self, Upsert, DIM_ARTISTS, DIM_AUDIO_FEATURES, DIM_TRACKS};
use crate::table::{Row, Table};

/// Row-construction errors logged per table before going quiet.
const MAX_LOGGED_ROW_ERRORS: usize = 5;

/// Ids listed per side in the id check.
const ID_SAMPLE: usize = 5;

/// Non-matching ids listed in the id check.
const MISMATCH_SAMPLE: usize = 10;

// ============================================================================
// Row -> Record
// ============================================================================

fn required<'a>(row: &Row<'a>, column: &'static str) -> std::result::Result<&'a str, RowError> {
    row.get(column).ok_or(RowError::MissingField {
        line: row.line,
        column,
    })
}

fn number_or(row: &Row<'_>, column: &'static str, default: f64) -> std::result::Result<f64, RowError> {
    match row.get(column) {
        None => Ok(default),
        Some(raw) => parse_number(Some(raw)).ok_or_else(|| RowError::InvalidValue {
            line: row.line,
            column,
            value: raw.to_string(),
        }),
    }
}

fn integer_or(row: &Row<'_>, column: &'static str, default: i64) -> std::result::Result<i64, RowError> {
    number_or(row, column, default as f64).map(|v| v.trunc() as i64)
}

pub fn artist_record(row: &Row<'_>) -> std::result::Result<ArtistRecord, RowError> {
    Ok(ArtistRecord {
        artist_id: required(row, "artist_id")?.to_string(),
        artist_name: required(row, "artist_name")?.to_string(),
        genres: row.get("artist_genres").unwrap_or_default().to_string(),
        followers: integer_or(row, "artist_followers", 0)?,
        popularity: integer_or(row, "artist_popularity", 0)?,
    })
}

pub fn track_record(row: &Row<'_>) -> std::result::Result<TrackRecord, RowError> {
    Ok(TrackRecord {
        track_id: required(row, "track_id")?.to_string(),
        track_name: truncate_chars(required(row, "track_name")?, MAX_TRACK_NAME_CHARS),
        artist_id: row.get("primary_artist_id").map(str::to_string),
        album_id: None,
        duration_ms: integer_or(row, "duration_ms", 0)?,
        explicit: parse_explicit(row.get("explicit")),
        popularity: integer_or(row, "track_popularity", 0)?,
        release_date: row.get("release_date").and_then(parse_release_date),
    })
}

pub fn audio_feature_record(row: &Row<'_>) -> std::result::Result<AudioFeatureRecord, RowError> {
    Ok(AudioFeatureRecord {
        track_id: required(row, "track_id")?.to_string(),
        danceability: number_or(row, "danceability", 0.0)?,
        energy: number_or(row, "energy", 0.0)?,
        key_value: integer_or(row, "key", 0)?,
        loudness: number_or(row, "loudness", 0.0)?,
        mode_value: integer_or(row, "mode", 0)?,
        speechiness: number_or(row, "speechiness", 0.0)?,
        acousticness: number_or(row, "acousticness", 0.0)?,
        instrumentalness: number_or(row, "instrumentalness", 0.0)?,
        liveness: number_or(row, "liveness", 0.0)?,
        valence: number_or(row, "valence", 0.0)?,
        tempo: number_or(row, "tempo", 0.0)?,
        time_signature: integer_or(row, "time_signature", 4)?,
    })
}

/// Build records for every row, dropping (and counting) the ones that fail.
fn build_records<T>(
    table: &Table,
    name: &str,
    build: impl Fn(&Row<'_>) -> std::result::Result<T, RowError>,
    stats: &mut TableLoadStats,
) -> Vec<T> {
    let mut records = Vec::with_capacity(table.len());
    for row in table.rows() {
        match build(&row) {
            Ok(record) => records.push(record),
            Err(e) => {
                stats.row_errors += 1;
                if stats.row_errors <= MAX_LOGGED_ROW_ERRORS {
                    warn!("{}: skipping {}", name, e);
                }
            }
        }
    }
    if stats.row_errors > MAX_LOGGED_ROW_ERRORS {
        warn!(
            "{}: {} more row errors not shown",
            name,
            stats.row_errors - MAX_LOGGED_ROW_ERRORS
        );
    }
    records
}

fn upsert_table<R: Upsert>(
    conn: &mut Connection,
    records: &[R],
    batch_size: usize,
    log_only: bool,
    stats: &mut TableLoadStats,
) -> Result<()> {
    let progress = StageProgress::new(R::TABLE, records.len() as u64, log_only);
    stats.batches_committed = store::upsert_in_batches(conn, records, batch_size, &progress)?;
    stats.upserted = records.len();
    progress.finish(format!("{}: {} rows upserted", R::TABLE, stats.upserted));
    Ok(())
}

// ============================================================================
// Per-table Loaders
// ============================================================================

pub fn load_artists(
    conn: &mut Connection,
    table: &Table,
    batch_size: usize,
    log_only: bool,
) -> Result<TableLoadStats> {
    let mut stats = TableLoadStats::new(DIM_ARTISTS);
    stats.rows_read = table.len();
    let records = build_records(table, DIM_ARTISTS, artist_record, &mut stats);
    info!("Loading {} artists...", records.len());
    upsert_table(conn, &records, batch_size, log_only, &mut stats)?;
    Ok(stats)
}

pub fn load_tracks(
    conn: &mut Connection,
    table: &Table,
    batch_size: usize,
    log_only: bool,
) -> Result<TableLoadStats> {
    let mut stats = TableLoadStats::new(DIM_TRACKS);
    stats.rows_read = table.len();

    let valid_artists = store::existing_ids(conn, DIM_ARTISTS)?;
    let records: Vec<TrackRecord> = build_records(table, DIM_TRACKS, track_record, &mut stats)
        .into_iter()
        .filter(|t| match &t.artist_id {
            Some(id) if !valid_artists.contains(id) => {
                stats.skipped_missing_fk += 1;
                false
            }
            _ => true,
        })
        .collect();

    info!(
        "Loading {} tracks ({} skipped: artist not in {})...",
        records.len(),
        stats.skipped_missing_fk,
        DIM_ARTISTS
    );
    upsert_table(conn, &records, batch_size, log_only, &mut stats)?;
    Ok(stats)
}

pub fn load_audio_features(
    conn: &mut Connection,
    table: &Table,
    batch_size: usize,
    log_only: bool,
) -> Result<TableLoadStats> {
    let mut stats = TableLoadStats::new(DIM_AUDIO_FEATURES);
    stats.rows_read = table.len();

    let valid_tracks = store::existing_ids(conn, DIM_TRACKS)?;
    let records: Vec<AudioFeatureRecord> =
        build_records(table, DIM_AUDIO_FEATURES, audio_feature_record, &mut stats)
            .into_iter()
            .filter(|f| {
                let keep = valid_tracks.contains(&f.track_id);
                if !keep {
                    stats.skipped_missing_fk += 1;
                }
                keep
            })
            .collect();

    info!(
        "Loading {} audio feature rows ({} skipped: track not in {})...",
        records.len(),
        stats.skipped_missing_fk,
        DIM_TRACKS
    );
    upsert_table(conn, &records, batch_size, log_only, &mut stats)?;
    Ok(stats)
}

// ============================================================================
// Artist Id Check
// ============================================================================

/// How the tracks' primary artist ids line up with the artist table's ids.
#[derive(Debug, Clone, PartialEq)]
pub struct IdMatchReport {
    pub artist_id_sample: Vec<String>,
    pub primary_artist_id_sample: Vec<String>,
    pub null_artist_ids: usize,
    pub null_primary_artist_ids: usize,
    pub unique_artist_ids: usize,
    pub unique_primary_artist_ids: usize,
    pub matching: usize,
    pub non_matching: usize,
    /// First non-matching ids in sorted order.
    pub non_matching_sample: Vec<String>,
}

fn first_ids(ids: &[Option<&str>]) -> Vec<String> {
    ids.iter()
        .take(ID_SAMPLE)
        .map(|id| id.unwrap_or_default().to_string())
        .collect()
}

/// Compare `tracks.primary_artist_id` against `artists.artist_id`.
///
/// Matching counts are over distinct primary artist ids.
pub fn check_artist_ids(tracks: &Table, artists: &Table) -> IdMatchReport {
    let artist_ids: Vec<Option<&str>> = artists.column("artist_id").collect();
    let primary_ids: Vec<Option<&str>> = tracks.column("primary_artist_id").collect();

    let artist_set: FxHashSet<&str> = artist_ids.iter().flatten().copied().collect();
    let primary_set: FxHashSet<&str> = primary_ids.iter().flatten().copied().collect();

    let mut missing: Vec<&str> = primary_set
        .iter()
        .filter(|id| !artist_set.contains(*id))
        .copied()
        .collect();
    missing.sort_unstable();

    IdMatchReport {
        artist_id_sample: first_ids(&artist_ids),
        primary_artist_id_sample: first_ids(&primary_ids),
        null_artist_ids: artist_ids.iter().filter(|id| id.is_none()).count(),
        null_primary_artist_ids: primary_ids.iter().filter(|id| id.is_none()).count(),
        unique_artist_ids: artist_set.len(),
        unique_primary_artist_ids: primary_set.len(),
        matching: primary_set.len() - missing.len(),
        non_matching: missing.len(),
        non_matching_sample: missing.iter().take(MISMATCH_SAMPLE).map(|s| s.to_string()).collect(),
    }
}

pub fn print_id_report(report: &IdMatchReport) {
    println!("\n{:=<60}", "");
    println!("ARTIST ID CHECK");
    println!("{:=<60}", "");
    println!("First artist ids:          {:?}", report.artist_id_sample);
    println!("First primary artist ids:  {:?}", report.primary_artist_id_sample);
    println!(
        "Null ids:                  {} (artists), {} (tracks)",
        report.null_artist_ids, report.null_primary_artist_ids
    );
    println!(
        "Unique ids:                {} (artists), {} (tracks)",
        report.unique_artist_ids, report.unique_primary_artist_ids
    );
    println!("Matching primary ids:      {}", report.matching);
    println!("Non-matching primary ids:  {}", report.non_matching);
    if !report.non_matching_sample.is_empty() {
        println!("Examples without an artist row:");
        for id in &report.non_matching_sample {
            println!("  - {}", id);
        }
    }
}

fn read_processed(config: &PipelineConfig) -> Result<(Table, Table)> {
    let tracks_path = config.clean_tracks_path();
    let artists_path = config.clean_artists_path();
    for path in [&tracks_path, &artists_path] {
        if !path.exists() {
            return Err(PipelineError::missing_input(path.as_path(), "run `clean` first"));
        }
    }
    Ok((Table::read_csv(&tracks_path)?, Table::read_csv(&artists_path)?))
}

/// Read the processed CSVs and report how their artist ids line up.
pub fn run_check(config: &PipelineConfig) -> Result<IdMatchReport> {
    let (tracks, artists) = read_processed(config)?;
    let report = check_artist_ids(&tracks, &artists);
    print_id_report(&report);
    Ok(report)
}

// ============================================================================
// Stage Entry Point
// ============================================================================

/// Print the row count of each dimension table.
pub fn verify_load(conn: &Connection, log_only: bool) -> Result<Vec<(&'static str, i64)>> {
    let spinner = create_spinner("Verifying load", log_only);
    let counts = store::table_counts(conn)?;
    spinner.finish_and_clear();

    println!("\nRows per table:");
    for (table, count) in &counts {
        println!("  {:<20} {:>10}", table, count);
    }
    Ok(counts)
}

pub fn run_load(config: &PipelineConfig) -> Result<LoadStats> {
    let start = Instant::now();
    let mut stats = LoadStats::default();

    let (tracks, artists) = read_processed(config)?;
    let features_path = config.clean_audio_features_path();
    let features = if features_path.exists() {
        Some(Table::read_csv(&features_path)?)
    } else {
        warn!("{} not found, skipping audio features", features_path.display());
        None
    };

    info!("Opening database {}", config.database.display());
    let mut conn = store::open(&config.database)?;

    let batch = config.batch_size;
    let log_only = config.log_only;

    stats.artists = Some(
        load_artists(&mut conn, &artists, batch, log_only).map_err(|e| PipelineError::in_stage("artists", e))?,
    );

    let ids = check_artist_ids(&tracks, &artists);
    info!(
        "Primary artist ids: {} match an artist, {} do not",
        ids.matching, ids.non_matching
    );

    stats.tracks = Some(
        load_tracks(&mut conn, &tracks, batch, log_only).map_err(|e| PipelineError::in_stage("tracks", e))?,
    );

    if let Some(features) = &features {
        stats.audio_features = Some(
            load_audio_features(&mut conn, features, batch, log_only)
                .map_err(|e| PipelineError::in_stage("audio_features", e))?,
        );
    }

    verify_load(&conn, log_only)?;
    stats.log_summary();
    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn artists_table(ids: &[&str]) -> Table {
        let rows: Vec<Vec<Option<String>>> = ids
            .iter()
            .map(|id| {
                vec![
                    Some(id.to_string()),
                    Some(format!("Artist {}", id)),
                    Some("50".to_string()),
                    Some("1000.0".to_string()),
                    Some("pop, rock".to_string()),
                ]
            })
            .collect();
        Table::new(
            ["artist_id", "artist_name", "artist_popularity", "artist_followers", "artist_genres"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows,
        )
    }

    const TRACK_HEADERS: &[&str] = &[
        "track_id",
        "track_name",
        "track_popularity",
        "duration_ms",
        "duration_min",
        "explicit",
        "artist_name",
        "primary_artist_id",
        "release_date",
        "release_year",
    ];

    fn tracks_table() -> Table {
        Table::from_strs(
            TRACK_HEADERS,
            &[
                &["t1", "Song One", "60", "180000", "3", "True", "['A']", "a1", "2015-10-23", "2015"],
                &["t2", "Song Two", "10", "200000", "3.33", "False", "['B']", "a2", "2001-01-01", "2001"],
                &["t3", "Orphan", "5", "100000", "1.67", "False", "['Z']", "zz", "1999-01-01", "1999"],
                &["t4", "No Artist", "0", "", "", "False", "", "", "", ""],
            ],
        )
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    fn count_commits(conn: &Connection) -> Arc<AtomicUsize> {
        let commits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&commits);
        conn.commit_hook(Some(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        }));
        commits
    }

    #[test]
    fn test_track_record_defaults_and_truncation() {
        let long = "x".repeat(300);
        let table = Table::from_strs(&["track_id", "track_name"], &[&["t1", long.as_str()]]);
        let row = table.rows().next().unwrap();
        let record = track_record(&row).unwrap();
        assert_eq!(record.track_name.chars().count(), 255);
        assert_eq!(record.duration_ms, 0);
        assert_eq!(record.popularity, 0);
        assert!(!record.explicit);
        assert_eq!(record.artist_id, None);
        assert_eq!(record.album_id, None);
    }

    #[test]
    fn test_audio_feature_defaults() {
        let table = Table::from_strs(&["track_id", "energy"], &[&["t1", "0.8"]]);
        let record = audio_feature_record(&table.rows().next().unwrap()).unwrap();
        assert_eq!(record.energy, 0.8);
        assert_eq!(record.danceability, 0.0);
        assert_eq!(record.key_value, 0);
        assert_eq!(record.mode_value, 0);
        assert_eq!(record.time_signature, 4);
    }

    #[test]
    fn test_row_errors_are_counted_not_fatal() {
        let table = Table::from_strs(
            &["artist_id", "artist_name", "artist_popularity"],
            &[&["a1", "Good", "10"], &["", "No Id", "5"], &["a3", "Bad Pop", "lots"]],
        );
        let mut conn = store::open_in_memory().unwrap();
        let stats = load_artists(&mut conn, &table, 500, true).unwrap();
        assert_eq!(stats.rows_read, 3);
        assert_eq!(stats.row_errors, 2);
        assert_eq!(stats.upserted, 1);
        assert_eq!(count(&conn, DIM_ARTISTS), 1);
    }

    #[test]
    fn test_tracks_with_unknown_artist_are_skipped() {
        let mut conn = store::open_in_memory().unwrap();
        load_artists(&mut conn, &artists_table(&["a1", "a2"]), 500, true).unwrap();
        let stats = load_tracks(&mut conn, &tracks_table(), 500, true).unwrap();

        assert_eq!(stats.skipped_missing_fk, 1);
        assert_eq!(stats.upserted, 3);
        let ids = store::existing_ids(&conn, DIM_TRACKS).unwrap();
        assert!(!ids.contains("t3"));
        assert!(ids.contains("t4"));

        let artist: Option<String> = conn
            .query_row("SELECT artist_id FROM dim_tracks WHERE track_id = 't4'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(artist, None);
    }

    #[test]
    fn test_features_require_loaded_track() {
        let mut conn = store::open_in_memory().unwrap();
        load_artists(&mut conn, &artists_table(&["a1", "a2"]), 500, true).unwrap();
        load_tracks(&mut conn, &tracks_table(), 500, true).unwrap();

        let features = Table::from_strs(
            &["track_id", "danceability", "key"],
            &[&["t1", "0.5", "5"], &["t3", "0.7", "2"]],
        );
        let stats = load_audio_features(&mut conn, &features, 500, true).unwrap();
        assert_eq!(stats.upserted, 1);
        assert_eq!(stats.skipped_missing_fk, 1);
    }

    #[test]
    fn test_artist_batches() {
        let ids: Vec<String> = (0..1200).map(|i| format!("a{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let mut conn = store::open_in_memory().unwrap();
        let commits = count_commits(&conn);
        let stats = load_artists(&mut conn, &artists_table(&refs[..500]), 500, true).unwrap();
        assert_eq!(stats.batches_committed, 1);
        assert_eq!(commits.load(Ordering::SeqCst), 1);

        let mut conn = store::open_in_memory().unwrap();
        let commits = count_commits(&conn);
        let stats = load_artists(&mut conn, &artists_table(&refs), 500, true).unwrap();
        assert_eq!(stats.batches_committed, 3);
        assert_eq!(commits.load(Ordering::SeqCst), 3);
        assert_eq!(count(&conn, DIM_ARTISTS), 1200);
    }

    #[test]
    fn test_reload_is_idempotent() {
        let mut conn = store::open_in_memory().unwrap();
        for _ in 0..2 {
            load_artists(&mut conn, &artists_table(&["a1", "a2"]), 500, true).unwrap();
            load_tracks(&mut conn, &tracks_table(), 500, true).unwrap();
        }
        assert_eq!(count(&conn, DIM_ARTISTS), 2);
        assert_eq!(count(&conn, DIM_TRACKS), 3);
    }

    #[test]
    fn test_check_artist_ids() {
        let report = check_artist_ids(&tracks_table(), &artists_table(&["a1", "a2", "a9"]));
        assert_eq!(report.artist_id_sample, vec!["a1", "a2", "a9"]);
        assert_eq!(report.null_primary_artist_ids, 1);
        assert_eq!(report.unique_primary_artist_ids, 3);
        assert_eq!(report.matching, 2);
        assert_eq!(report.non_matching, 1);
        assert_eq!(report.non_matching_sample, vec!["zz"]);
    }

    #[test]
    fn test_run_load_requires_clean_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_base_dir(dir.path());
        let err = run_load(&config).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
        assert!(err.to_string().contains("run `clean` first"));
    }

    #[test]
    fn test_failed_stage_stops_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_base_dir(dir.path());
        std::fs::create_dir_all(&config.processed_dir).unwrap();
        std::fs::write(
            config.clean_artists_path(),
            "artist_id,artist_name,artist_popularity,artist_followers,artist_genres\na1,Artist,50,1000.0,pop\n",
        )
        .unwrap();
        std::fs::write(
            config.clean_tracks_path(),
            format!("{}\nt1,Song,60,180000,3,True,['A'],a1,2015-10-23,2015\n", TRACK_HEADERS.join(",")),
        )
        .unwrap();

        // No primary key, so the artist upsert cannot resolve its conflict target.
        let conn = Connection::open(&config.database).unwrap();
        conn.execute_batch(
            "CREATE TABLE dim_artists (artist_id TEXT, artist_name TEXT, genres TEXT,
                 followers INTEGER, popularity INTEGER, updated_at TEXT)",
        )
        .unwrap();
        drop(conn);

        let err = run_load(&config).unwrap_err();
        assert!(matches!(err, PipelineError::Stage { stage: "artists", .. }), "{}", err);

        let conn = Connection::open(&config.database).unwrap();
        assert_eq!(count(&conn, DIM_TRACKS), 0);
        assert_eq!(count(&conn, DIM_AUDIO_FEATURES), 0);
    }
}
