use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use musicmetrics::config::{GlobalArgs, PipelineConfig};
use musicmetrics::models::{write_stats_json, CleanStats, LoadStats};
use musicmetrics::progress::format_duration;
use musicmetrics::{clean, explore, extract, load};

#[derive(Parser)]
#[command(name = "musicmetrics")]
#[command(about = "Explore, clean and load a music catalog into SQLite; extract Spotify listening data")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Profile the raw tracks.csv / artists.csv
    Explore,
    /// Clean the raw CSVs into the processed directory
    Clean,
    /// Upsert the processed CSVs into the database
    Load,
    /// Fetch top artists/tracks, audio features and recent plays from Spotify
    Extract,
    /// Compare track primary artist ids against artist ids
    Check,
    /// Clean, then load
    Run,
}

#[derive(Serialize)]
struct RunStats {
    clean: CleanStats,
    load: LoadStats,
}

fn write_stats<T: Serialize>(stats: &T, path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        write_stats_json(stats, path).with_context(|| format!("Failed to write stats to {:?}", path))?;
        info!("Stats written to {:?}", path);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_args(&cli.global).context("Invalid configuration")?;
    let stats_path = config.stats_json.as_deref();
    let start = Instant::now();

    let summary = match cli.command {
        Command::Explore => {
            let report = explore::run_explore(&config).context("Exploration failed")?;
            format!(
                "Exploration complete\n  Tracks profiled: {}\n  Artists profiled: {}",
                report.tracks.as_ref().map_or(0, |t| t.total),
                report.artists.as_ref().map_or(0, |a| a.total)
            )
        }
        Command::Clean => {
            let stats = clean::run_clean(&config).context("Cleaning failed")?;
            write_stats(&stats, stats_path)?;
            format!(
                "Cleaning complete\n  Tracks: {}\n  Artists: {}\n  Output: {:?}",
                stats.tracks_written,
                stats.artists_written,
                config.processed_dir
            )
        }
        Command::Load => {
            let stats = load::run_load(&config).context("Load failed")?;
            write_stats(&stats, stats_path)?;
            load_summary(&stats, &config)
        }
        Command::Extract => {
            let stats = extract::run_extract(&config).context("Extraction failed")?;
            write_stats(&stats, stats_path)?;
            format!(
                "Extraction complete\n  Top artists: {}\n  Top tracks: {}\n  Audio features: {}\n  \
                 Recently played: {}\n  Failed requests: {}",
                stats.top_artists,
                stats.top_tracks,
                stats.audio_features,
                stats.recently_played,
                stats.failed_requests
            )
        }
        Command::Check => {
            let report = load::run_check(&config).context("Id check failed")?;
            format!(
                "Id check complete\n  Matching: {}\n  Non-matching: {}",
                report.matching, report.non_matching
            )
        }
        Command::Run => {
            let clean_stats = clean::run_clean(&config).context("Cleaning failed")?;
            let load_stats = load::run_load(&config).context("Load failed")?;
            let summary = load_summary(&load_stats, &config);
            write_stats(
                &RunStats {
                    clean: clean_stats,
                    load: load_stats,
                },
                stats_path,
            )?;
            summary
        }
    };

    println!("\n{:=<60}", "");
    println!("{}", summary);
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(())
}

fn load_summary(stats: &LoadStats, config: &PipelineConfig) -> String {
    let mut lines = vec![format!("Load complete: {:?}", config.database)];
    for t in stats.tables() {
        lines.push(format!(
            "  {}: {} upserted, {} skipped, {} row errors",
            t.table, t.upserted, t.skipped_missing_fk, t.row_errors
        ));
    }
    lines.join("\n")
}
