use musicmetrics::clean::run_clean;
use musicmetrics::config::PipelineConfig;
use musicmetrics::load::{run_check, run_load};
use musicmetrics::store;
use rusqlite::Connection;

const TRACKS_CSV: &str = "\
id,name,popularity,duration_ms,explicit,artists,id_artists,release_date,danceability,energy,key,loudness,mode,speechiness,acousticness,instrumentalness,liveness,valence,tempo,time_signature
t1,  Hello   World ,70,180000,1,['Adele'],['a1'],2015-10-23,0.5,0.6,5,-6.0,1,0.04,0.2,0.0,0.1,0.3,120.0,4
t2,Second,40,200000,0,['Bob'],\"['a2', 'a1']\",1999,0.7,,2,-8.0,0,0.05,0.3,0.1,0.2,0.4,98.5,3
t1,Hello World,70,180000,1,['Adele'],['a1'],2015-10-23,0.5,0.6,5,-6.0,1,0.04,0.2,0.0,0.1,0.3,120.0,4
t3,Orphan,10,150000,0,['Ghost'],['zz'],not a date,0.1,0.2,1,-10.0,1,0.03,0.9,0.5,0.1,0.1,80.0,4
,No Id,5,100000,0,['X'],['a1'],2001,0.1,0.1,1,-1.0,1,0.1,0.1,0.1,0.1,0.1,100.0,4
t4,,0,,False,['Nobody'],[],2003-05,0.3,0.3,3,-3.0,1,0.03,0.3,0.3,0.3,0.3,110.0,4
";

const ARTISTS_CSV: &str = "\
id,followers,genres,name,popularity
a1,1000.0,\"['pop', 'soul']\",Adele,90
a2,,[],Bob,30
a1,1000.0,\"['pop', 'soul']\",Adele,90
";

fn setup() -> (tempfile::TempDir, PipelineConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::with_base_dir(dir.path());
    std::fs::create_dir_all(&config.raw_dir).unwrap();
    std::fs::write(config.raw_tracks_path(), TRACKS_CSV).unwrap();
    std::fs::write(config.raw_artists_path(), ARTISTS_CSV).unwrap();
    (dir, config)
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |r| r.get(0)).unwrap()
}

#[test]
fn test_clean_then_load_twice_is_idempotent() {
    let (_dir, config) = setup();

    let clean = run_clean(&config).unwrap();
    assert_eq!(clean.tracks_written, 4);
    assert_eq!(clean.artists_written, 2);
    assert_eq!(clean.duplicate_tracks, 1);
    assert_eq!(clean.null_id_tracks, 1);
    assert!(config.clean_audio_features_path().exists());

    let first = run_load(&config).unwrap();
    let tracks = first.tracks.as_ref().unwrap();
    assert_eq!(tracks.upserted, 3);
    assert_eq!(tracks.skipped_missing_fk, 1);

    let conn = store::open(&config.database).unwrap();
    let before = store::table_counts(&conn).unwrap();
    assert_eq!(before, vec![("dim_artists", 2), ("dim_tracks", 3), ("dim_audio_features", 3)]);
    drop(conn);

    run_load(&config).unwrap();

    let conn = store::open(&config.database).unwrap();
    assert_eq!(store::table_counts(&conn).unwrap(), before);
}

#[test]
fn test_referential_integrity_after_load() {
    let (_dir, config) = setup();
    run_clean(&config).unwrap();
    run_load(&config).unwrap();

    let conn = store::open(&config.database).unwrap();
    let orphan_tracks = count(
        &conn,
        "SELECT COUNT(*) FROM dim_tracks t
         LEFT JOIN dim_artists a ON a.artist_id = t.artist_id
         WHERE t.artist_id IS NOT NULL AND a.artist_id IS NULL",
    );
    assert_eq!(orphan_tracks, 0);

    let orphan_features = count(
        &conn,
        "SELECT COUNT(*) FROM dim_audio_features f
         LEFT JOIN dim_tracks t ON t.track_id = f.track_id
         WHERE t.track_id IS NULL",
    );
    assert_eq!(orphan_features, 0);

    let null_artist = count(&conn, "SELECT COUNT(*) FROM dim_tracks WHERE artist_id IS NULL");
    assert_eq!(null_artist, 1);
}

#[test]
fn test_cleaned_values_reach_the_database() {
    let (_dir, config) = setup();
    run_clean(&config).unwrap();
    run_load(&config).unwrap();

    let conn = store::open(&config.database).unwrap();
    let (name, explicit, date): (String, bool, Option<String>) = conn
        .query_row(
            "SELECT track_name, explicit, release_date FROM dim_tracks WHERE track_id = 't1'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(name, "Hello World");
    assert!(explicit);
    assert_eq!(date.as_deref(), Some("2015-10-23"));

    let (t4_name, t4_artist): (String, Option<String>) = conn
        .query_row(
            "SELECT track_name, artist_id FROM dim_tracks WHERE track_id = 't4'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(t4_name, "Unknown Track");
    assert_eq!(t4_artist, None);

    let (followers, genres): (i64, String) = conn
        .query_row(
            "SELECT followers, genres FROM dim_artists WHERE artist_id = 'a2'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(followers, 0);
    assert_eq!(genres, "");

    let energy: f64 = conn
        .query_row("SELECT energy FROM dim_audio_features WHERE track_id = 't2'", [], |r| r.get(0))
        .unwrap();
    // Median of the non-null energies 0.6, 0.2, 0.3.
    assert!((energy - 0.3).abs() < 1e-9);
}

#[test]
fn test_check_reports_unmatched_primary_ids() {
    let (_dir, config) = setup();
    run_clean(&config).unwrap();
    let report = run_check(&config).unwrap();
    assert_eq!(report.matching, 2);
    assert_eq!(report.non_matching, 1);
    assert_eq!(report.non_matching_sample, vec!["zz".to_string()]);
}

#[test]
fn test_blank_names_survive_clean_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::with_base_dir(dir.path());
    std::fs::create_dir_all(&config.raw_dir).unwrap();
    std::fs::write(
        config.raw_tracks_path(),
        "id,name,popularity,explicit,id_artists,release_date,danceability,energy\n\
         t1,\"   \",10,0,['a1'],2001,0.5,0.5\n\
         t2,Fine,20,0,['a2'],2002,0.6,0.6\n",
    )
    .unwrap();
    std::fs::write(
        config.raw_artists_path(),
        "id,name,popularity\na1,Real,10\na2,\"  \",20\n",
    )
    .unwrap();

    run_clean(&config).unwrap();
    let stats = run_load(&config).unwrap();
    assert!(stats.tables().all(|t| t.row_errors == 0 && t.skipped_missing_fk == 0));

    let conn = store::open(&config.database).unwrap();
    assert_eq!(
        store::table_counts(&conn).unwrap(),
        vec![("dim_artists", 2), ("dim_tracks", 2), ("dim_audio_features", 2)]
    );
    let name: String = conn
        .query_row("SELECT artist_name FROM dim_artists WHERE artist_id = 'a2'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(name, "Unknown Artist");
}
