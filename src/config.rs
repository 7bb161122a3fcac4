//! Run configuration.
//!
//! Every stage takes a `PipelineConfig` built once per invocation from CLI
//! flags and environment variables. Nothing is read from the environment
//! after construction.

use clap::Args;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::safety::validate_processed_dir;

pub const RAW_TRACKS_FILE: &str = "tracks.csv";
pub const RAW_ARTISTS_FILE: &str = "artists.csv";
pub const CLEAN_TRACKS_FILE: &str = "tracks_limpo.csv";
pub const CLEAN_ARTISTS_FILE: &str = "artists_limpo.csv";
pub const CLEAN_AUDIO_FEATURES_FILE: &str = "audios_limpos.csv";

/// Rows per upsert transaction.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Global options shared by all subcommands.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory holding raw Kaggle/API CSV files
    #[arg(long, global = true, env = "MUSICMETRICS_RAW_DIR", default_value = "data/raw")]
    pub raw_dir: PathBuf,

    /// Directory for cleaned CSV files
    #[arg(long, global = true, env = "MUSICMETRICS_PROCESSED_DIR", default_value = "data/processed")]
    pub processed_dir: PathBuf,

    /// SQLite database file holding the dim_* tables
    #[arg(long, global = true, env = "MUSICMETRICS_DB", default_value = "data/musicmetrics.sqlite3")]
    pub database: PathBuf,

    /// Rows per upsert batch (one commit per batch)
    #[arg(long, global = true, env = "MUSICMETRICS_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Hide progress bars and log progress lines instead
    #[arg(long, global = true)]
    pub log_only: bool,

    /// Write stage statistics as JSON to this path
    #[arg(long, global = true)]
    pub stats_json: Option<PathBuf>,

    #[arg(long, global = true, env = "SPOTIFY_CLIENT_ID", hide_env_values = true)]
    pub spotify_client_id: Option<String>,

    #[arg(long, global = true, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    pub spotify_client_secret: Option<String>,

    #[arg(long, global = true, env = "SPOTIFY_REFRESH_TOKEN", hide_env_values = true)]
    pub spotify_refresh_token: Option<String>,

    /// Pre-issued bearer token; skips the refresh-token exchange
    #[arg(long, global = true, env = "SPOTIFY_ACCESS_TOKEN", hide_env_values = true)]
    pub spotify_access_token: Option<String>,
}

/// How the extraction stage obtains a bearer token.
#[derive(Debug, Clone, PartialEq)]
pub enum SpotifyCredentials {
    AccessToken(String),
    RefreshToken {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub database: PathBuf,
    pub batch_size: usize,
    pub log_only: bool,
    pub stats_json: Option<PathBuf>,
    pub spotify: Option<SpotifyCredentials>,
}

impl PipelineConfig {
    pub fn from_args(args: &GlobalArgs) -> Result<Self> {
        if args.batch_size == 0 {
            return Err(PipelineError::Config("batch size must be at least 1".to_string()));
        }
        validate_processed_dir(&args.raw_dir, &args.processed_dir)?;

        let spotify = match (
            &args.spotify_access_token,
            &args.spotify_client_id,
            &args.spotify_client_secret,
            &args.spotify_refresh_token,
        ) {
            (Some(token), _, _, _) => Some(SpotifyCredentials::AccessToken(token.clone())),
            (None, Some(id), Some(secret), Some(refresh)) => Some(SpotifyCredentials::RefreshToken {
                client_id: id.clone(),
                client_secret: secret.clone(),
                refresh_token: refresh.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            raw_dir: args.raw_dir.clone(),
            processed_dir: args.processed_dir.clone(),
            database: args.database.clone(),
            batch_size: args.batch_size,
            log_only: args.log_only,
            stats_json: args.stats_json.clone(),
            spotify,
        })
    }

    /// Config rooted at `base` with `raw/`, `processed/` and a database file.
    pub fn with_base_dir(base: &Path) -> Self {
        Self {
            raw_dir: base.join("raw"),
            processed_dir: base.join("processed"),
            database: base.join("musicmetrics.sqlite3"),
            batch_size: DEFAULT_BATCH_SIZE,
            log_only: true,
            stats_json: None,
            spotify: None,
        }
    }

    pub fn raw_tracks_path(&self) -> PathBuf {
        self.raw_dir.join(RAW_TRACKS_FILE)
    }

    pub fn raw_artists_path(&self) -> PathBuf {
        self.raw_dir.join(RAW_ARTISTS_FILE)
    }

    pub fn clean_tracks_path(&self) -> PathBuf {
        self.processed_dir.join(CLEAN_TRACKS_FILE)
    }

    pub fn clean_artists_path(&self) -> PathBuf {
        self.processed_dir.join(CLEAN_ARTISTS_FILE)
    }

    pub fn clean_audio_features_path(&self) -> PathBuf {
        self.processed_dir.join(CLEAN_AUDIO_FEATURES_FILE)
    }
}
