use std::io::Read;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::IngestError;
use crate::models::{
    season_for_date, InjuryEvent, InjuryType, NutritionLog, PlayerRecord, ProtocolChange, RecordSet,
    RecoveryReading, Season, TrainingSession,
};

/// Three seasons out is the longest absence still treated as recoverable.
pub const MAX_DAYS_MISSED: u32 = 3 * 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RecordKind {
    Players,
    Injuries,
    Training,
    Recovery,
    Nutrition,
    Protocols,
    Baselines,
}

/// A row accepted at the ingestion boundary, with the key that makes
/// re-imports idempotent.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyed<T> {
    pub source_key: String,
    pub record: T,
}

/// Protocol changes are recorded per organization; the analysis itself only
/// sees the change.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedProtocolChange {
    pub organization_id: String,
    pub change: ProtocolChange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaselineRate {
    pub position_group: String,
    pub season: Season,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Players(Vec<PlayerRecord>),
    Injuries(Vec<Keyed<InjuryEvent>>),
    Training(Vec<Keyed<TrainingSession>>),
    Recovery(Vec<Keyed<RecoveryReading>>),
    Nutrition(Vec<Keyed<NutritionLog>>),
    Protocols(Vec<Keyed<ScopedProtocolChange>>),
    Baselines(Vec<BaselineRate>),
}

impl Batch {
    pub fn len(&self) -> usize {
        match self {
            Batch::Players(rows) => rows.len(),
            Batch::Injuries(rows) => rows.len(),
            Batch::Training(rows) => rows.len(),
            Batch::Recovery(rows) => rows.len(),
            Batch::Nutrition(rows) => rows.len(),
            Batch::Protocols(rows) => rows.len(),
            Batch::Baselines(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Deserialize)]
struct PlayerRow {
    player_id: Uuid,
    organization_id: String,
    name: String,
    position_group: String,
    first_season: Season,
    last_season: Season,
}

#[derive(Debug, Deserialize)]
struct InjuryRow {
    player_id: Uuid,
    season: Season,
    injury_type: String,
    #[serde(default)]
    body_part: String,
    #[serde(default)]
    season_ending: bool,
    date: NaiveDate,
    days_missed: u32,
    source_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrainingRow {
    player_id: Uuid,
    date: NaiveDate,
    load: f64,
    intensity: f64,
    source_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecoveryRow {
    player_id: Uuid,
    date: NaiveDate,
    self_readiness: f64,
    objective_readiness: Option<f64>,
    peer_concern: Option<f64>,
    source_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NutritionRow {
    player_id: Uuid,
    date: NaiveDate,
    collagen_g: f64,
    omega_ratio: f64,
    protein_timing: f64,
    source_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProtocolRow {
    organization_id: String,
    position_group: String,
    season: Season,
    date: NaiveDate,
    description: String,
    source_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BaselineRow {
    position_group: String,
    season: Season,
    rate: f64,
}

/// Parses and validates a CSV export of one record kind. Dated injury rows
/// are checked against `season_start_month`.
pub fn read_csv<R: Read>(
    kind: RecordKind,
    reader: R,
    season_start_month: u32,
) -> Result<Batch, IngestError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let batch = match kind {
        RecordKind::Players => Batch::Players(parse_rows(&mut reader, |row, n: PlayerRow| {
            let player = PlayerRecord {
                player_id: n.player_id,
                organization_id: n.organization_id,
                name: n.name,
                position_group: n.position_group,
                first_season: n.first_season,
                last_season: n.last_season,
            };
            validate_player(row, &player)?;
            Ok(player)
        })?),
        RecordKind::Injuries => Batch::Injuries(parse_rows(&mut reader, |row, r: InjuryRow| {
            let injury_type =
                InjuryType::from_str(&r.injury_type).map_err(|e| IngestError::invalid(row, e))?;
            let injury = InjuryEvent {
                player_id: r.player_id,
                season: r.season,
                injury_type,
                body_part: r.body_part,
                season_ending: r.season_ending,
                date: r.date,
                days_missed: r.days_missed,
            };
            validate_injury(row, &injury, season_start_month)?;
            let source_key = r.source_key.unwrap_or_else(|| {
                format!("injury-{}-{}-{}", injury.player_id, injury.date, injury.injury_type)
            });
            Ok(Keyed { source_key, record: injury })
        })?),
        RecordKind::Training => Batch::Training(parse_rows(&mut reader, |row, r: TrainingRow| {
            let session = TrainingSession {
                player_id: r.player_id,
                date: r.date,
                load: r.load,
                intensity: r.intensity,
            };
            validate_training(row, &session)?;
            let source_key = r.source_key.unwrap_or_else(|| {
                format!("training-{}-{}-{}", session.player_id, session.date, session.load)
            });
            Ok(Keyed { source_key, record: session })
        })?),
        RecordKind::Recovery => Batch::Recovery(parse_rows(&mut reader, |row, r: RecoveryRow| {
            let reading = RecoveryReading {
                player_id: r.player_id,
                date: r.date,
                self_readiness: r.self_readiness,
                objective_readiness: r.objective_readiness,
                peer_concern: r.peer_concern,
            };
            validate_recovery(row, &reading)?;
            let source_key = r
                .source_key
                .unwrap_or_else(|| format!("recovery-{}-{}", reading.player_id, reading.date));
            Ok(Keyed { source_key, record: reading })
        })?),
        RecordKind::Nutrition => Batch::Nutrition(parse_rows(&mut reader, |row, r: NutritionRow| {
            let log = NutritionLog {
                player_id: r.player_id,
                date: r.date,
                collagen_g: r.collagen_g,
                omega_ratio: r.omega_ratio,
                protein_timing: r.protein_timing,
            };
            validate_nutrition(row, &log)?;
            let source_key = r
                .source_key
                .unwrap_or_else(|| format!("nutrition-{}-{}", log.player_id, log.date));
            Ok(Keyed { source_key, record: log })
        })?),
        RecordKind::Protocols => Batch::Protocols(parse_rows(&mut reader, |row, r: ProtocolRow| {
            if r.position_group.is_empty() || r.description.is_empty() {
                return Err(IngestError::invalid(row, "protocol change needs a group and description"));
            }
            let source_key = r.source_key.unwrap_or_else(|| {
                format!(
                    "protocol-{}-{}-{}-{}",
                    r.organization_id, r.position_group, r.season, r.date
                )
            });
            let change = ProtocolChange {
                position_group: r.position_group,
                season: r.season,
                date: r.date,
                description: r.description,
            };
            Ok(Keyed {
                source_key,
                record: ScopedProtocolChange {
                    organization_id: r.organization_id,
                    change,
                },
            })
        })?),
        RecordKind::Baselines => Batch::Baselines(parse_rows(&mut reader, |row, r: BaselineRow| {
            if !(r.rate.is_finite() && r.rate > 0.0) {
                return Err(IngestError::invalid(row, format!("baseline rate {} must be positive", r.rate)));
            }
            Ok(BaselineRate {
                position_group: r.position_group,
                season: r.season,
                rate: r.rate,
            })
        })?),
    };

    Ok(batch)
}

fn parse_rows<R, T, U, F>(reader: &mut csv::Reader<R>, mut convert: F) -> Result<Vec<U>, IngestError>
where
    R: Read,
    T: DeserializeOwned,
    F: FnMut(usize, T) -> Result<U, IngestError>,
{
    let mut rows = Vec::new();
    for (offset, result) in reader.deserialize::<T>().enumerate() {
        // Header is line 1.
        let line = offset + 2;
        let row = result?;
        rows.push(convert(line, row)?);
    }
    Ok(rows)
}

fn check_readiness(row: usize, field: &str, value: f64) -> Result<(), IngestError> {
    if (0.0..=10.0).contains(&value) {
        Ok(())
    } else {
        Err(IngestError::invalid(
            row,
            format!("{field} {value} is outside 0-10"),
        ))
    }
}

fn check_non_negative(row: usize, field: &str, value: f64) -> Result<(), IngestError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(IngestError::invalid(row, format!("{field} {value} must be non-negative")))
    }
}

pub fn validate_player(row: usize, player: &PlayerRecord) -> Result<(), IngestError> {
    if player.position_group.trim().is_empty() {
        return Err(IngestError::invalid(row, "position group is empty"));
    }
    if player.first_season > player.last_season {
        return Err(IngestError::invalid(
            row,
            format!(
                "season span {}-{} is reversed",
                player.first_season, player.last_season
            ),
        ));
    }
    Ok(())
}

pub fn validate_injury(
    row: usize,
    injury: &InjuryEvent,
    season_start_month: u32,
) -> Result<(), IngestError> {
    if injury.days_missed > MAX_DAYS_MISSED {
        return Err(IngestError::invalid(
            row,
            format!(
                "days_missed {} exceeds {MAX_DAYS_MISSED}",
                injury.days_missed
            ),
        ));
    }
    let dated_season = season_for_date(injury.date, season_start_month);
    if dated_season != injury.season {
        return Err(IngestError::invalid(
            row,
            format!(
                "injury dated {} belongs to season {dated_season}, not {}",
                injury.date, injury.season
            ),
        ));
    }
    Ok(())
}

pub fn validate_training(row: usize, session: &TrainingSession) -> Result<(), IngestError> {
    check_non_negative(row, "load", session.load)?;
    if !(0.0..=1.0).contains(&session.intensity) {
        return Err(IngestError::invalid(
            row,
            format!("intensity {} is outside 0-1", session.intensity),
        ));
    }
    Ok(())
}

pub fn validate_recovery(row: usize, reading: &RecoveryReading) -> Result<(), IngestError> {
    check_readiness(row, "self_readiness", reading.self_readiness)?;
    if let Some(objective) = reading.objective_readiness {
        check_readiness(row, "objective_readiness", objective)?;
    }
    if let Some(concern) = reading.peer_concern {
        check_readiness(row, "peer_concern", concern)?;
    }
    Ok(())
}

pub fn validate_nutrition(row: usize, log: &NutritionLog) -> Result<(), IngestError> {
    check_non_negative(row, "collagen_g", log.collagen_g)?;
    check_non_negative(row, "omega_ratio", log.omega_ratio)?;
    check_readiness(row, "protein_timing", log.protein_timing)
}

/// Validates a record set handed over in one piece (e.g. a JSON export).
/// Rows are numbered from 1 within each collection.
pub fn validate_record_set(records: &RecordSet, season_start_month: u32) -> Result<(), IngestError> {
    for (n, player) in records.players.iter().enumerate() {
        validate_player(n + 1, player)?;
    }
    for (n, injury) in records.injuries.iter().enumerate() {
        validate_injury(n + 1, injury, season_start_month)?;
    }
    for (n, session) in records.training.iter().enumerate() {
        validate_training(n + 1, session)?;
    }
    for (n, reading) in records.recovery.iter().enumerate() {
        validate_recovery(n + 1, reading)?;
    }
    for (n, log) in records.nutrition.iter().enumerate() {
        validate_nutrition(n + 1, log)?;
    }
    Ok(())
}
