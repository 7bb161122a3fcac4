//! Core data models for the MusicMetrics pipeline.
//!
//! Cleaned entities, the records bound to upsert statements, and the
//! per-stage statistics.

use chrono::NaiveDate;
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::error::Result;

// ============================================================================
// Column Vocabulary
// ============================================================================

/// Audio descriptors carried from the track table, in output order.
pub const AUDIO_FEATURE_COLUMNS: [&str; 12] = [
    "danceability",
    "energy",
    "key",
    "loudness",
    "mode",
    "speechiness",
    "acousticness",
    "instrumentalness",
    "liveness",
    "valence",
    "tempo",
    "time_signature",
];

pub const UNKNOWN_TRACK: &str = "Unknown Track";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// `dim_tracks.track_name` is VARCHAR(255).
pub const MAX_TRACK_NAME_CHARS: usize = 255;

// ============================================================================
// Cleaned Entities
// ============================================================================

/// Track after the cleaning rules, before the column rename.
#[derive(Clone, Debug, PartialEq)]
pub struct CleanTrack {
    pub track_id: String,
    pub track_name: String,
    pub popularity: u64,
    pub duration_ms: Option<u64>,
    pub duration_min: Option<f64>,
    pub explicit: bool,
    pub artist_name: Option<String>,
    pub primary_artist_id: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub release_year: Option<i32>,
}

/// Which optional raw columns the track table carried.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrackColumns {
    pub duration_ms: bool,
    pub artists: bool,
    pub id_artists: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CleanTracks {
    pub columns: TrackColumns,
    pub tracks: Vec<CleanTrack>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CleanArtist {
    pub artist_id: String,
    pub artist_name: String,
    pub popularity: u64,
    pub followers: Option<u64>,
    pub genres: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ArtistColumns {
    pub followers: bool,
    pub genres: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CleanArtists {
    pub columns: ArtistColumns,
    pub artists: Vec<CleanArtist>,
}

/// One track's audio descriptors; `values` aligns with the owning table's `columns`.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFeatureRow {
    pub track_id: String,
    pub values: Vec<Option<f64>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AudioFeatureTable {
    /// Whitelisted descriptor columns present in the source, in whitelist order.
    pub columns: Vec<&'static str>,
    pub rows: Vec<AudioFeatureRow>,
}

// ============================================================================
// Load Records
// ============================================================================

/// Row bound to the `dim_artists` upsert.
#[derive(Clone, Debug, PartialEq)]
pub struct ArtistRecord {
    pub artist_id: String,
    pub artist_name: String,
    pub genres: String,
    pub followers: i64,
    pub popularity: i64,
}

/// Row bound to the `dim_tracks` upsert.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackRecord {
    pub track_id: String,
    pub track_name: String,
    pub artist_id: Option<String>, // NULL when the track has no resolvable artist
    pub album_id: Option<String>,  // not present in the Kaggle export
    pub duration_ms: i64,
    pub explicit: bool,
    pub popularity: i64,
    pub release_date: Option<NaiveDate>,
}

/// Row bound to the `dim_audio_features` upsert.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFeatureRecord {
    pub track_id: String,
    pub danceability: f64,
    pub energy: f64,
    pub key_value: i64,
    pub loudness: f64,
    pub mode_value: i64,
    pub speechiness: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub valence: f64,
    pub tempo: f64,
    pub time_signature: i64,
}

// ============================================================================
// Statistics
// ============================================================================

/// Counts gathered by the cleaning stage.
#[derive(Default, Debug, Clone, Serialize)]
pub struct CleanStats {
    // Tracks
    pub tracks_read: usize,
    pub duplicate_tracks: usize,
    pub null_id_tracks: usize,
    pub null_name_tracks: usize,
    pub unparsed_release_dates: usize,
    pub imputed_release_years: usize,
    pub median_release_year: Option<i32>,
    pub null_popularity_tracks: usize,
    pub tracks_without_artist: usize,
    pub tracks_written: usize,

    // Artists
    pub artists_read: usize,
    pub duplicate_artists: usize,
    pub null_id_artists: usize,
    pub null_name_artists: usize,
    pub null_popularity_artists: usize,
    pub null_followers: usize,
    pub artists_written: usize,

    // Audio features (None when the track table carried no descriptors)
    pub audio_feature_rows: Option<usize>,
    pub imputed_feature_cells: usize,

    pub elapsed_seconds: f64,
}

/// Outcome of upserting one table.
#[derive(Default, Debug, Clone, Serialize, PartialEq)]
pub struct TableLoadStats {
    pub table: String,
    pub rows_read: usize,
    pub upserted: usize,
    pub skipped_missing_fk: usize,
    pub row_errors: usize,
    pub batches_committed: usize,
}

impl TableLoadStats {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Default, Debug, Clone, Serialize)]
pub struct LoadStats {
    pub artists: Option<TableLoadStats>,
    pub tracks: Option<TableLoadStats>,
    pub audio_features: Option<TableLoadStats>,
    pub elapsed_seconds: f64,
}

impl LoadStats {
    pub fn tables(&self) -> impl Iterator<Item = &TableLoadStats> {
        [&self.artists, &self.tracks, &self.audio_features]
            .into_iter()
            .flatten()
    }

    pub fn log_summary(&self) {
        for t in self.tables() {
            info!(
                "{}: {} upserted in {} batches, {} skipped (missing FK), {} row errors",
                t.table, t.upserted, t.batches_committed, t.skipped_missing_fk, t.row_errors
            );
        }
    }
}

#[derive(Default, Debug, Clone, Serialize)]
pub struct ExtractStats {
    pub top_artists: usize,
    pub top_tracks: usize,
    pub audio_features: usize,
    pub recently_played: usize,
    pub failed_requests: usize,
    pub files_written: Vec<String>,
    pub elapsed_seconds: f64,
}

/// Write any stage's stats to a JSON file
pub fn write_stats_json<T: Serialize>(stats: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(stats).map_err(std::io::Error::from)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_stats_tables_skips_unrun_stages() {
        let stats = LoadStats {
            artists: Some(TableLoadStats::new("dim_artists")),
            tracks: None,
            audio_features: Some(TableLoadStats::new("dim_audio_features")),
            elapsed_seconds: 0.0,
        };
        let names: Vec<_> = stats.tables().map(|t| t.table.as_str()).collect();
        assert_eq!(names, vec!["dim_artists", "dim_audio_features"]);
    }

    #[test]
    fn test_write_stats_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = CleanStats {
            tracks_read: 3,
            median_release_year: Some(1990),
            ..Default::default()
        };
        write_stats_json(&stats, &path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["tracks_read"], 3);
        assert_eq!(value["median_release_year"], 1990);
        assert!(value["audio_feature_rows"].is_null());
    }
}
