//! Extract stage: personal listening data from the Spotify Web API.
//!
//! Pulls top artists and tracks for each time range, audio features for the
//! top tracks, and the recently played history, then writes one timestamped
//! CSV per dataset into the raw directory. A failed request is logged and its
//! rows are missing from the output; the stage carries on.

use chrono::Local;
use rustc_hash::FxHashSet;
use serde::{Serialize, Serializer};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::ExtractStats;
use crate::progress::create_spinner;
use crate::spotify::{
    Artist, AudioFeatures, PlayHistory, SpotifyApi, SpotifyClient, Track, AUDIO_FEATURES_BATCH,
    RECENTLY_PLAYED_LIMIT, TIME_RANGES, TOP_LIMIT,
};
use crate::table::write_records;

fn python_bool<S: Serializer>(value: &bool, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(if *value { "True" } else { "False" })
}

// ============================================================================
// Output Rows
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopArtistRow {
    pub rank: usize,
    pub time_range: String,
    pub artist_id: String,
    pub artist_name: String,
    pub popularity: Option<u32>,
    pub followers: Option<u64>,
    pub genres: Option<String>,
    pub extracted_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopTrackRow {
    pub rank: usize,
    pub time_range: String,
    pub track_id: Option<String>,
    pub track_name: String,
    pub artist_name: String,
    pub artist_id: Option<String>,
    pub album_name: Option<String>,
    pub album_id: Option<String>,
    pub release_date: Option<String>,
    pub popularity: Option<u32>,
    pub duration_ms: Option<u64>,
    #[serde(serialize_with = "python_bool")]
    pub explicit: bool,
    pub extracted_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentlyPlayedRow {
    pub played_at: String,
    pub track_id: Option<String>,
    pub track_name: String,
    pub artist_name: String,
    pub artist_id: Option<String>,
    pub album_name: Option<String>,
    pub duration_ms: Option<u64>,
    pub popularity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioFeaturesRow {
    pub track_id: String,
    pub danceability: f64,
    pub energy: f64,
    pub key: i64,
    pub loudness: f64,
    pub mode: i64,
    pub speechiness: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub valence: f64,
    pub tempo: f64,
    pub time_signature: i64,
}

impl From<AudioFeatures> for AudioFeaturesRow {
    fn from(f: AudioFeatures) -> Self {
        Self {
            track_id: f.id,
            danceability: f.danceability,
            energy: f.energy,
            key: f.key,
            loudness: f.loudness,
            mode: f.mode,
            speechiness: f.speechiness,
            acousticness: f.acousticness,
            instrumentalness: f.instrumentalness,
            liveness: f.liveness,
            valence: f.valence,
            tempo: f.tempo,
            time_signature: f.time_signature,
        }
    }
}

pub fn top_artist_rows(artists: Vec<Artist>, time_range: &str, extracted_at: &str) -> Vec<TopArtistRow> {
    artists
        .into_iter()
        .enumerate()
        .map(|(i, a)| TopArtistRow {
            rank: i + 1,
            time_range: time_range.to_string(),
            artist_id: a.id,
            artist_name: a.name,
            popularity: a.popularity,
            followers: a.followers.and_then(|f| f.total),
            genres: (!a.genres.is_empty()).then(|| a.genres.join(", ")),
            extracted_at: extracted_at.to_string(),
        })
        .collect()
}

pub fn top_track_rows(tracks: Vec<Track>, time_range: &str, extracted_at: &str) -> Vec<TopTrackRow> {
    tracks
        .into_iter()
        .enumerate()
        .map(|(i, t)| {
            let artist_name = t.artist_names();
            let artist_id = t.primary_artist_id();
            let (album_name, album_id, release_date) = match t.album {
                Some(album) => (Some(album.name), album.id, album.release_date),
                None => (None, None, None),
            };
            TopTrackRow {
                rank: i + 1,
                time_range: time_range.to_string(),
                track_id: t.id,
                track_name: t.name,
                artist_name,
                artist_id,
                album_name,
                album_id,
                release_date,
                popularity: t.popularity,
                duration_ms: t.duration_ms,
                explicit: t.explicit,
                extracted_at: extracted_at.to_string(),
            }
        })
        .collect()
}

pub fn recently_played_rows(history: Vec<PlayHistory>) -> Vec<RecentlyPlayedRow> {
    history
        .into_iter()
        .map(|item| {
            let t = item.track;
            RecentlyPlayedRow {
                played_at: item.played_at,
                artist_name: t.artist_names(),
                artist_id: t.primary_artist_id(),
                track_id: t.id,
                track_name: t.name,
                album_name: t.album.map(|a| a.name),
                duration_ms: t.duration_ms,
                popularity: t.popularity,
            }
        })
        .collect()
}

/// Distinct track ids in first-seen order.
pub fn unique_track_ids(rows: &[TopTrackRow]) -> Vec<String> {
    let mut seen = FxHashSet::default();
    rows.iter()
        .filter_map(|r| r.track_id.as_deref())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Extraction
// ============================================================================

/// Output of one extraction run, before writing.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub top_artists: Vec<TopArtistRow>,
    pub top_tracks: Vec<TopTrackRow>,
    pub audio_features: Vec<AudioFeaturesRow>,
    pub recently_played: Vec<RecentlyPlayedRow>,
    pub failed_requests: usize,
}

fn record_failure(what: &str, e: &PipelineError, failed: &mut usize) {
    error!("Failed to fetch {}: {}", what, e);
    *failed += 1;
}

pub fn extract_with<A: SpotifyApi>(api: &A, log_only: bool) -> Extraction {
    let mut out = Extraction::default();
    let extracted_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let spinner = create_spinner("Extracting from Spotify", log_only);

    for range in TIME_RANGES {
        spinner.set_message(format!("Top artists ({})", range));
        match api.top_artists(range, TOP_LIMIT) {
            Ok(items) => out.top_artists.extend(top_artist_rows(items, range, &extracted_at)),
            Err(e) => record_failure(&format!("top artists ({})", range), &e, &mut out.failed_requests),
        }
    }

    for range in TIME_RANGES {
        spinner.set_message(format!("Top tracks ({})", range));
        match api.top_tracks(range, TOP_LIMIT) {
            Ok(items) => out.top_tracks.extend(top_track_rows(items, range, &extracted_at)),
            Err(e) => record_failure(&format!("top tracks ({})", range), &e, &mut out.failed_requests),
        }
    }

    let ids = unique_track_ids(&out.top_tracks);
    if !ids.is_empty() {
        info!("Fetching audio features for {} tracks", ids.len());
    }
    for batch in ids.chunks(AUDIO_FEATURES_BATCH) {
        spinner.set_message(format!("Audio features ({} ids)", batch.len()));
        match api.audio_features(batch) {
            Ok(features) => out
                .audio_features
                .extend(features.into_iter().flatten().map(AudioFeaturesRow::from)),
            Err(e) => record_failure("audio features", &e, &mut out.failed_requests),
        }
    }

    spinner.set_message("Recently played".to_string());
    match api.recently_played(RECENTLY_PLAYED_LIMIT) {
        Ok(items) => out.recently_played = recently_played_rows(items),
        Err(e) => record_failure("recently played", &e, &mut out.failed_requests),
    }

    spinner.finish_and_clear();
    out
}

fn write_dataset<T: Serialize>(
    dir: &Path,
    name: &str,
    timestamp: &str,
    rows: &[T],
    written: &mut Vec<String>,
) -> Result<()> {
    if rows.is_empty() {
        warn!("No {} extracted, nothing written", name);
        return Ok(());
    }
    let path = dir.join(format!("{}_{}.csv", name, timestamp));
    write_records(&path, rows)?;
    info!("Saved {} ({} rows)", path.display(), rows.len());
    written.push(path.display().to_string());
    Ok(())
}

/// Write each non-empty dataset as `<name>_<timestamp>.csv`; returns the paths.
pub fn write_extraction(extraction: &Extraction, dir: &Path, timestamp: &str) -> Result<Vec<String>> {
    let mut written = Vec::new();
    write_dataset(dir, "top_artists", timestamp, &extraction.top_artists, &mut written)?;
    write_dataset(dir, "top_tracks", timestamp, &extraction.top_tracks, &mut written)?;
    write_dataset(dir, "audio_features", timestamp, &extraction.audio_features, &mut written)?;
    write_dataset(dir, "recently_played", timestamp, &extraction.recently_played, &mut written)?;
    Ok(written)
}

pub fn run_extract(config: &PipelineConfig) -> Result<ExtractStats> {
    let start = Instant::now();
    let credentials = config.spotify.as_ref().ok_or_else(|| {
        PipelineError::Config(
            "no Spotify credentials: set SPOTIFY_ACCESS_TOKEN, or SPOTIFY_CLIENT_ID, \
             SPOTIFY_CLIENT_SECRET and SPOTIFY_REFRESH_TOKEN"
                .to_string(),
        )
    })?;

    let client = SpotifyClient::connect(credentials)?;
    let user = client.current_user().map_err(|e| PipelineError::Connection {
        target: "Spotify Web API".to_string(),
        reason: e.to_string(),
    })?;
    info!(
        "Connected as {} (product: {})",
        user.display_name.as_deref().unwrap_or("unknown"),
        user.product.as_deref().unwrap_or("n/a")
    );

    let extraction = extract_with(&client, config.log_only);
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let files_written = write_extraction(&extraction, &config.raw_dir, &timestamp)?;

    Ok(ExtractStats {
        top_artists: extraction.top_artists.len(),
        top_tracks: extraction.top_tracks.len(),
        audio_features: extraction.audio_features.len(),
        recently_played: extraction.recently_played.len(),
        failed_requests: extraction.failed_requests,
        files_written,
        elapsed_seconds: start.elapsed().as_secs_f64(),
    })
}
