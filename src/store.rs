//! SQLite storage for the dimension tables.
//!
//! ## Schema
//!
//! ```sql
//! dim_artists(artist_id PK, artist_name, genres, followers, popularity, updated_at)
//! dim_tracks(track_id PK, track_name, artist_id FK, album_id, duration_ms,
//!            explicit, popularity, release_date, updated_at)
//! dim_audio_features(track_id PK/FK, danceability, energy, key_value, loudness,
//!                    mode_value, speechiness, acousticness, instrumentalness,
//!                    liveness, valence, tempo, time_signature, updated_at)
//! ```
//!
//! Writes are upserts executed in fixed-size chunks, one transaction and one
//! commit per chunk. A failing chunk is rolled back; earlier chunks stay
//! committed.

use rusqlite::{params, CachedStatement, Connection};
use rustc_hash::FxHashSet;
use std::path::Path;
use tracing::{debug, error};

use crate::error::{PipelineError, Result};
use crate::models::{ArtistRecord, AudioFeatureRecord, TrackRecord};
use crate::normalize::format_date;
use crate::progress::StageProgress;

pub const DIM_ARTISTS: &str = "dim_artists";
pub const DIM_TRACKS: &str = "dim_tracks";
pub const DIM_AUDIO_FEATURES: &str = "dim_audio_features";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS dim_artists (
        artist_id   TEXT PRIMARY KEY,
        artist_name TEXT NOT NULL,
        genres      TEXT,
        followers   INTEGER NOT NULL DEFAULT 0,
        popularity  INTEGER NOT NULL DEFAULT 0,
        updated_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS dim_tracks (
        track_id     TEXT PRIMARY KEY,
        track_name   VARCHAR(255) NOT NULL,
        artist_id    TEXT REFERENCES dim_artists(artist_id),
        album_id     TEXT,
        duration_ms  INTEGER,
        explicit     INTEGER NOT NULL DEFAULT 0,
        popularity   INTEGER,
        release_date TEXT,
        updated_at   TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_dim_tracks_artist ON dim_tracks(artist_id);

    CREATE TABLE IF NOT EXISTS dim_audio_features (
        track_id         TEXT PRIMARY KEY REFERENCES dim_tracks(track_id),
        danceability     REAL,
        energy           REAL,
        key_value        INTEGER,
        loudness         REAL,
        mode_value       INTEGER,
        speechiness      REAL,
        acousticness     REAL,
        instrumentalness REAL,
        liveness         REAL,
        valence          REAL,
        tempo            REAL,
        time_signature   INTEGER,
        updated_at       TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );";

/// Open (creating if needed) the database file and ensure the schema.
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path).map_err(|e| PipelineError::Connection {
        target: path.display().to_string(),
        reason: e.to_string(),
    })?;
    prepare(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    prepare(Connection::open_in_memory()?)
}

fn prepare(conn: Connection) -> Result<Connection> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// A record that can be bound to its table's upsert statement.
pub trait Upsert {
    const TABLE: &'static str;
    const SQL: &'static str;

    fn execute(&self, stmt: &mut CachedStatement<'_>) -> rusqlite::Result<usize>;
}

impl Upsert for ArtistRecord {
    const TABLE: &'static str = DIM_ARTISTS;
    const SQL: &'static str = "
        INSERT INTO dim_artists (artist_id, artist_name, genres, followers, popularity)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(artist_id) DO UPDATE SET
            artist_name = excluded.artist_name,
            genres      = excluded.genres,
            followers   = excluded.followers,
            popularity  = excluded.popularity,
            updated_at  = CURRENT_TIMESTAMP";

    fn execute(&self, stmt: &mut CachedStatement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.artist_id,
            self.artist_name,
            self.genres,
            self.followers,
            self.popularity,
        ])
    }
}

impl Upsert for TrackRecord {
    const TABLE: &'static str = DIM_TRACKS;
    const SQL: &'static str = "
        INSERT INTO dim_tracks (
            track_id, track_name, artist_id, album_id,
            duration_ms, explicit, popularity, release_date
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(track_id) DO UPDATE SET
            track_name   = excluded.track_name,
            artist_id    = excluded.artist_id,
            album_id     = excluded.album_id,
            duration_ms  = excluded.duration_ms,
            explicit     = excluded.explicit,
            popularity   = excluded.popularity,
            release_date = excluded.release_date,
            updated_at   = CURRENT_TIMESTAMP";

    fn execute(&self, stmt: &mut CachedStatement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.track_id,
            self.track_name,
            self.artist_id,
            self.album_id,
            self.duration_ms,
            self.explicit,
            self.popularity,
            self.release_date.map(format_date),
        ])
    }
}

impl Upsert for AudioFeatureRecord {
    const TABLE: &'static str = DIM_AUDIO_FEATURES;
    const SQL: &'static str = "
        INSERT INTO dim_audio_features (
            track_id, danceability, energy, key_value, loudness, mode_value,
            speechiness, acousticness, instrumentalness, liveness, valence,
            tempo, time_signature
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(track_id) DO UPDATE SET
            danceability     = excluded.danceability,
            energy           = excluded.energy,
            key_value        = excluded.key_value,
            loudness         = excluded.loudness,
            mode_value       = excluded.mode_value,
            speechiness      = excluded.speechiness,
            acousticness     = excluded.acousticness,
            instrumentalness = excluded.instrumentalness,
            liveness         = excluded.liveness,
            valence          = excluded.valence,
            tempo            = excluded.tempo,
            time_signature   = excluded.time_signature,
            updated_at       = CURRENT_TIMESTAMP";

    fn execute(&self, stmt: &mut CachedStatement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.track_id,
            self.danceability,
            self.energy,
            self.key_value,
            self.loudness,
            self.mode_value,
            self.speechiness,
            self.acousticness,
            self.instrumentalness,
            self.liveness,
            self.valence,
            self.tempo,
            self.time_signature,
        ])
    }
}

/// Upsert `records` in chunks of `batch_size`, committing once per chunk.
///
/// Returns the number of committed batches. On failure the in-flight chunk is
/// rolled back and the error returned; prior chunks remain committed.
pub fn upsert_in_batches<R: Upsert>(
    conn: &mut Connection,
    records: &[R],
    batch_size: usize,
    progress: &StageProgress,
) -> Result<usize> {
    let mut committed = 0;

    for chunk in records.chunks(batch_size.max(1)) {
        let result = (|| -> rusqlite::Result<()> {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(R::SQL)?;
                for record in chunk {
                    record.execute(&mut stmt)?;
                }
            }
            tx.commit()
        })();

        if let Err(e) = result {
            error!(
                "{}: batch {} rolled back ({} earlier batches committed): {}",
                R::TABLE,
                committed + 1,
                committed,
                e
            );
            return Err(e.into());
        }

        committed += 1;
        debug!("{}: committed batch {} ({} rows)", R::TABLE, committed, chunk.len());
        progress.advance(chunk.len() as u64);
    }

    Ok(committed)
}

/// All primary keys currently in `table` (artist or track ids).
pub fn existing_ids(conn: &Connection, table: &str) -> Result<FxHashSet<String>> {
    let key = match table {
        DIM_ARTISTS => "artist_id",
        DIM_TRACKS | DIM_AUDIO_FEATURES => "track_id",
        other => return Err(PipelineError::Config(format!("unknown table '{}'", other))),
    };
    let mut stmt = conn.prepare(&format!("SELECT {} FROM {}", key, table))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<FxHashSet<String>>>()?;
    Ok(ids)
}

/// Row counts of the three dimension tables.
pub fn table_counts(conn: &Connection) -> Result<Vec<(&'static str, i64)>> {
    [DIM_ARTISTS, DIM_TRACKS, DIM_AUDIO_FEATURES]
        .into_iter()
        .map(|table| -> Result<(&'static str, i64)> {
            let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok((table, count))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn artist(id: &str, followers: i64) -> ArtistRecord {
        ArtistRecord {
            artist_id: id.to_string(),
            artist_name: format!("Artist {}", id),
            genres: String::new(),
            followers,
            popularity: 10,
        }
    }

    fn progress(total: usize) -> StageProgress {
        StageProgress::new("test", total as u64, true)
    }

    /// Counts transactions SQLite actually commits on `conn`.
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
    fn test_schema_is_idempotent() {
        let conn = open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        let counts = table_counts(&conn).unwrap();
        assert_eq!(counts, vec![(DIM_ARTISTS, 0), (DIM_TRACKS, 0), (DIM_AUDIO_FEATURES, 0)]);
    }

    #[test]
    fn test_500_records_one_batch() {
        let mut conn = open_in_memory().unwrap();
        let commits = count_commits(&conn);
        let records: Vec<_> = (0..500).map(|i| artist(&format!("a{}", i), i)).collect();
        let batches = upsert_in_batches(&mut conn, &records, 500, &progress(500)).unwrap();
        assert_eq!(batches, 1);
        assert_eq!(commits.load(Ordering::SeqCst), 1);
        assert_eq!(table_counts(&conn).unwrap()[0].1, 500);
    }

    #[test]
    fn test_1200_records_three_batches() {
        let mut conn = open_in_memory().unwrap();
        let commits = count_commits(&conn);
        let records: Vec<_> = (0..1200).map(|i| artist(&format!("a{}", i), i)).collect();
        let batches = upsert_in_batches(&mut conn, &records, 500, &progress(1200)).unwrap();
        assert_eq!(batches, 3);
        assert_eq!(commits.load(Ordering::SeqCst), 3);
        assert_eq!(table_counts(&conn).unwrap()[0].1, 1200);
    }

    #[test]
    fn test_upsert_overwrites_non_key_columns() {
        let mut conn = open_in_memory().unwrap();
        upsert_in_batches(&mut conn, &[artist("a1", 1)], 500, &progress(1)).unwrap();
        upsert_in_batches(&mut conn, &[artist("a1", 99)], 500, &progress(1)).unwrap();

        let followers: i64 = conn
            .query_row("SELECT followers FROM dim_artists WHERE artist_id = 'a1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(followers, 99);
        assert_eq!(table_counts(&conn).unwrap()[0].1, 1);
    }

    #[test]
    fn test_failed_batch_keeps_earlier_commits() {
        let mut conn = open_in_memory().unwrap();
        upsert_in_batches(&mut conn, &[artist("a1", 1)], 500, &progress(1)).unwrap();

        let track = |id: &str, artist_id: &str| TrackRecord {
            track_id: id.to_string(),
            track_name: "x".to_string(),
            artist_id: Some(artist_id.to_string()),
            album_id: None,
            duration_ms: 1,
            explicit: false,
            popularity: 0,
            release_date: None,
        };
        // Second batch violates the FK and must roll back on its own.
        let records = vec![track("t1", "a1"), track("t2", "a1"), track("t3", "missing")];
        let result = upsert_in_batches(&mut conn, &records, 2, &progress(3));
        assert!(result.is_err());

        let ids = existing_ids(&conn, DIM_TRACKS).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("t1") && ids.contains("t2"));
    }

    #[test]
    fn test_existing_ids() {
        let mut conn = open_in_memory().unwrap();
        upsert_in_batches(&mut conn, &[artist("a1", 1), artist("a2", 2)], 500, &progress(2)).unwrap();
        let ids = existing_ids(&conn, DIM_ARTISTS).unwrap();
        assert!(ids.contains("a1") && ids.contains("a2"));
        assert!(existing_ids(&conn, "bogus").is_err());
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("mm.sqlite3");
        let conn = open(&path).unwrap();
        drop(conn);
        assert!(path.exists());
    }
}
