use std::path::PathBuf;

use uuid::Uuid;

use crate::models::Season;

#[derive(Debug, thiserror::Error)]
pub enum AssessmentError {
    #[error("{dimension} for player {player_id} in season {season} is {value}, outside [0, 1]")]
    ScoreOutOfRange {
        dimension: &'static str,
        player_id: Uuid,
        season: Season,
        value: f64,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("record {row}: {message}")]
    InvalidRecord { row: usize, message: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl IngestError {
    pub fn invalid(row: usize, message: impl Into<String>) -> Self {
        IngestError::InvalidRecord {
            row,
            message: message.into(),
        }
    }
}
