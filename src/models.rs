use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Season = i32;

/// Maps a calendar date onto the season it belongs to. Dates before
/// `season_start_month` count toward the previous season.
pub fn season_for_date(date: NaiveDate, season_start_month: u32) -> Season {
    if date.month() >= season_start_month {
        date.year()
    } else {
        date.year() - 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub player_id: Uuid,
    pub organization_id: String,
    pub name: String,
    pub position_group: String,
    pub first_season: Season,
    pub last_season: Season,
}

impl PlayerRecord {
    pub fn active_in(&self, season: Season) -> bool {
        (self.first_season..=self.last_season).contains(&season)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjuryType {
    SoftTissue,
    Structural,
    Chronic,
}

impl InjuryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InjuryType::SoftTissue => "soft_tissue",
            InjuryType::Structural => "structural",
            InjuryType::Chronic => "chronic",
        }
    }
}

impl fmt::Display for InjuryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InjuryType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "soft_tissue" => Ok(InjuryType::SoftTissue),
            "structural" => Ok(InjuryType::Structural),
            "chronic" => Ok(InjuryType::Chronic),
            other => Err(format!("unknown injury type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryEvent {
    pub player_id: Uuid,
    pub season: Season,
    pub injury_type: InjuryType,
    #[serde(default)]
    pub body_part: String,
    #[serde(default)]
    pub season_ending: bool,
    pub date: NaiveDate,
    /// Days between the injury and return to play.
    pub days_missed: u32,
}

impl InjuryEvent {
    /// `None` when the return would fall outside the representable calendar.
    pub fn return_date(&self) -> Option<NaiveDate> {
        self.date
            .checked_add_signed(Duration::days(i64::from(self.days_missed)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    pub player_id: Uuid,
    pub date: NaiveDate,
    /// Session-RPE multiplied by duration in minutes.
    pub load: f64,
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReading {
    pub player_id: Uuid,
    pub date: NaiveDate,
    pub self_readiness: f64,
    #[serde(default)]
    pub objective_readiness: Option<f64>,
    /// Concern raised by teammates or staff, 0 (none) to 10 (severe).
    #[serde(default)]
    pub peer_concern: Option<f64>,
}

impl RecoveryReading {
    /// Objective readiness when measured, the self-report otherwise.
    pub fn effective_readiness(&self) -> f64 {
        self.objective_readiness.unwrap_or(self.self_readiness)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionLog {
    pub player_id: Uuid,
    pub date: NaiveDate,
    pub collagen_g: f64,
    pub omega_ratio: f64,
    pub protein_timing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolChange {
    pub position_group: String,
    pub season: Season,
    pub date: NaiveDate,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    #[serde(default)]
    pub players: Vec<PlayerRecord>,
    #[serde(default)]
    pub injuries: Vec<InjuryEvent>,
    #[serde(default)]
    pub training: Vec<TrainingSession>,
    #[serde(default)]
    pub recovery: Vec<RecoveryReading>,
    #[serde(default)]
    pub nutrition: Vec<NutritionLog>,
    #[serde(default)]
    pub protocol_changes: Vec<ProtocolChange>,
}

impl RecordSet {
    pub fn is_empty(&self) -> bool {
        self.injuries.is_empty()
            && self.training.is_empty()
            && self.recovery.is_empty()
            && self.nutrition.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSources {
    pub players: usize,
    pub injuries: usize,
    pub training_sessions: usize,
    pub recovery_readings: usize,
    pub nutrition_logs: usize,
    pub protocol_changes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Psi,
    Rho,
    Q,
    F,
    Tau,
    Lambda,
}

impl Dimension {
    pub fn symbol(&self) -> &'static str {
        match self {
            Dimension::Psi => "Ψ",
            Dimension::Rho => "ρ",
            Dimension::Q => "q",
            Dimension::F => "f",
            Dimension::Tau => "τ",
            Dimension::Lambda => "λ",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dimension::Psi => "Load Coherence",
            Dimension::Rho => "History Integration",
            Dimension::Q => "Strain Accumulation",
            Dimension::F => "Team Protection",
            Dimension::Tau => "Recovery Depth",
            Dimension::Lambda => "Position Factor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum DimensionValue {
    Measured(f64),
    /// Neutral stand-in used when the signal is unavailable but the
    /// dimension still takes part in aggregation.
    Defaulted(f64),
    InsufficientData,
}

impl DimensionValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            DimensionValue::Measured(v) | DimensionValue::Defaulted(v) => Some(*v),
            DimensionValue::InsufficientData => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.value().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScoreSet {
    pub player_id: Uuid,
    pub player_name: String,
    pub position_group: String,
    pub season: Season,
    pub psi: DimensionValue,
    pub rho: DimensionValue,
    pub q: DimensionValue,
    pub f: DimensionValue,
    pub tau: DimensionValue,
    pub lambda: f64,
    pub load_recovery_ratio: Option<f64>,
    pub readiness_divergence: Option<f64>,
}

impl DimensionScoreSet {
    pub fn get(&self, dimension: Dimension) -> DimensionValue {
        match dimension {
            Dimension::Psi => self.psi,
            Dimension::Rho => self.rho,
            Dimension::Q => self.q,
            Dimension::F => self.f,
            Dimension::Tau => self.tau,
            Dimension::Lambda => DimensionValue::Measured(self.lambda),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    InjuryRate,
    LoadRecovery,
    ReadinessDivergence,
    SoftTissueCluster,
    NutritionDeficit,
}

impl FlagKind {
    pub fn code(&self) -> &'static str {
        match self {
            FlagKind::InjuryRate => "RATE",
            FlagKind::LoadRecovery => "LOAD",
            FlagKind::ReadinessDivergence => "DISCLOSURE",
            FlagKind::SoftTissueCluster => "SOFT",
            FlagKind::NutritionDeficit => "NUTRITION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagCategory {
    Systemic,
    Individual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    Watch,
    Elevated,
    Critical,
}

impl fmt::Display for FlagSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FlagSeverity::Watch => "watch",
            FlagSeverity::Elevated => "elevated",
            FlagSeverity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemicFlag {
    pub id: String,
    pub kinds: BTreeSet<FlagKind>,
    pub category: FlagCategory,
    pub severity: FlagSeverity,
    pub position_groups: BTreeSet<String>,
    pub seasons: BTreeSet<Season>,
    pub description: String,
    pub players: BTreeSet<Uuid>,
    pub support_count: usize,
    pub group_size: usize,
    pub data_points: usize,
    pub confidence: f64,
    pub hypothesis: String,
    pub investigation_areas: Vec<String>,
}

impl SystemicFlag {
    pub fn is_systemic(&self) -> bool {
        self.category == FlagCategory::Systemic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn season_rolls_over_at_start_month() {
        let july = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let march = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert_eq!(season_for_date(july, 7), 2024);
        assert_eq!(season_for_date(march, 7), 2024);
        assert_eq!(season_for_date(march, 1), 2025);
    }

    #[test]
    fn return_date_adds_days_missed() {
        let injury = InjuryEvent {
            player_id: Uuid::nil(),
            season: 2024,
            injury_type: InjuryType::SoftTissue,
            body_part: "hamstring".to_string(),
            season_ending: false,
            date: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
            days_missed: 14,
        };
        assert_eq!(
            injury.return_date(),
            NaiveDate::from_ymd_opt(2024, 9, 15)
        );
    }

    #[test]
    fn return_date_past_calendar_end_is_none() {
        let injury = InjuryEvent {
            player_id: Uuid::nil(),
            season: 2024,
            injury_type: InjuryType::Chronic,
            body_part: "knee".to_string(),
            season_ending: false,
            date: NaiveDate::MAX - Duration::days(3),
            days_missed: 10,
        };
        assert_eq!(injury.return_date(), None);
    }

    #[test]
    fn injury_type_parses_snake_case() {
        assert_eq!("soft_tissue".parse::<InjuryType>(), Ok(InjuryType::SoftTissue));
        assert!("acute".parse::<InjuryType>().is_err());
    }

    #[test]
    fn insufficient_data_has_no_value() {
        assert_eq!(DimensionValue::InsufficientData.value(), None);
        assert_eq!(DimensionValue::Defaulted(0.5).value(), Some(0.5));
    }
}
