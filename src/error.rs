//! Error types shared by every pipeline stage.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage input is missing; `hint` tells the user which stage produces it.
    #[error("input not found: {} ({hint})", path.display())]
    MissingInput { path: PathBuf, hint: String },

    #[error("{} has no '{column}' column", path.display())]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("could not connect to {target}: {reason}")]
    Connection { target: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Spotify API returned {status} for {endpoint}")]
    Api { endpoint: String, status: u16 },

    #[error("configuration error: {0}")]
    Config(String),

    /// A load stage failed; later stages were not attempted.
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn missing_input(path: impl Into<PathBuf>, hint: impl Into<String>) -> Self {
        PipelineError::MissingInput {
            path: path.into(),
            hint: hint.into(),
        }
    }

    pub fn in_stage(stage: &'static str, source: PipelineError) -> Self {
        PipelineError::Stage {
            stage,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure to build one output row. Counted and logged, never propagated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("row {line}: missing required column '{column}'")]
    MissingField { line: usize, column: &'static str },

    #[error("row {line}: invalid value '{value}' for '{column}'")]
    InvalidValue {
        line: usize,
        column: &'static str,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_message_has_hint() {
        let err = PipelineError::missing_input("data/processed/tracks_limpo.csv", "run `clean` first");
        let msg = err.to_string();
        assert!(msg.contains("tracks_limpo.csv"));
        assert!(msg.contains("run `clean` first"));
    }

    #[test]
    fn test_stage_wraps_source() {
        let inner = PipelineError::Config("bad".to_string());
        let err = PipelineError::in_stage("artists", inner);
        assert_eq!(err.to_string(), "stage 'artists' failed: configuration error: bad");
    }
}
