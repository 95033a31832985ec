//! Organizational athletic coherence: scores training, recovery and injury
//! history per player-season, finds patterns that span players, and rolls
//! them up into a Physical Coherence Score with a season-over-season trend.

pub mod assess;
pub mod baseline;
pub mod coherence;
pub mod config;
pub mod db;
pub mod dimensions;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod patterns;
pub mod report;
pub mod seed;

pub use assess::{assess, AssessmentResult, AssessmentStatus};
pub use baseline::{BaselineProvider, LeagueBaselines};
pub use config::AssessmentConfig;
pub use error::{AssessmentError, ConfigError, IngestError};
pub use models::RecordSet;
