use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::baseline::BaselineProvider;
use crate::coherence::{self, PhysicalCoherenceScore};
use crate::config::AssessmentConfig;
use crate::dimensions::{self, GroupContext, PlayerSeason, DIMENSIONS};
use crate::error::AssessmentError;
use crate::index::{PlayerSeasonRecords, RecordIndex};
use crate::models::{DataSources, DimensionScoreSet, RecordSet, Season, SystemicFlag};
use crate::patterns::{self, PatternInput, PositionGroupSummary, ProtocolOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Complete,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub organization_id: String,
    pub seasons: Vec<Season>,
    pub status: AssessmentStatus,
    pub dimension_scores: Vec<DimensionScoreSet>,
    pub flags: Vec<SystemicFlag>,
    pub coherence: PhysicalCoherenceScore,
    pub position_groups: Vec<PositionGroupSummary>,
    pub protocol_outcomes: Vec<ProtocolOutcome>,
    pub data_sources: DataSources,
}

impl AssessmentResult {
    fn insufficient(organization_id: &str, seasons: Vec<Season>, data_sources: DataSources) -> Self {
        AssessmentResult {
            organization_id: organization_id.to_string(),
            seasons,
            status: AssessmentStatus::InsufficientData,
            dimension_scores: Vec::new(),
            flags: Vec::new(),
            coherence: PhysicalCoherenceScore::empty(),
            position_groups: Vec::new(),
            protocol_outcomes: Vec::new(),
            data_sources,
        }
    }

    pub fn systemic_flags(&self) -> impl Iterator<Item = &SystemicFlag> {
        self.flags.iter().filter(|flag| flag.is_systemic())
    }
}

/// Scores every player-season, detects organizational patterns and
/// aggregates the Physical Coherence Score for `organization_id`.
///
/// Deterministic: the same records, seasons, baseline and config always
/// produce the same result. Fails only when a derived score breaks its
/// invariants, which rejects the whole batch.
pub fn assess(
    organization_id: &str,
    seasons: &[Season],
    records: &RecordSet,
    baseline: &dyn BaselineProvider,
    config: &AssessmentConfig,
) -> Result<AssessmentResult, AssessmentError> {
    let season_set: BTreeSet<Season> = seasons.iter().copied().collect();
    let index = RecordIndex::build(organization_id, records, config.season_start_month);
    if index.dropped_records() > 0 {
        tracing::warn!(
            organization_id,
            dropped = index.dropped_records(),
            "ignoring records for players outside the organization roster"
        );
    }

    let season_list: Vec<Season> = season_set.iter().copied().collect();
    let Some(&current) = season_set.last() else {
        tracing::info!(organization_id, "no seasons requested");
        return Ok(AssessmentResult::insufficient(
            organization_id,
            season_list,
            index.data_sources().clone(),
        ));
    };

    let pairs = index.scorable(&season_set);
    if pairs.is_empty() {
        tracing::info!(organization_id, ?season_list, "no records in the requested seasons");
        return Ok(AssessmentResult::insufficient(
            organization_id,
            season_list,
            index.data_sources().clone(),
        ));
    }

    check_injuries(&index, config)?;

    tracing::info!(
        organization_id,
        player_seasons = pairs.len(),
        "scoring player-seasons"
    );
    let empty = PlayerSeasonRecords::default();
    let dimension_scores: Vec<DimensionScoreSet> = pairs
        .par_iter()
        .map(|&(player, season)| {
            let records = index
                .season_records(player.player_id, season)
                .unwrap_or(&empty);
            let prior_injuries = index
                .season_records(player.player_id, season - 1)
                .map(|prior| prior.injuries.clone())
                .unwrap_or_default();
            let input = PlayerSeason {
                player,
                season,
                records,
                prior_injuries,
                group: GroupContext {
                    prior_season_recorded: season_set.contains(&(season - 1))
                        || index.has_season(season - 1),
                    prior_group_injuries: index
                        .group_injuries(&player.position_group, season - 1)
                        .len(),
                    protocol_changed: index.protocol_changed(&player.position_group, season),
                },
            };
            dimensions::score_player_season(&input, config)
        })
        .collect();

    for set in &dimension_scores {
        check_score_set(set)?;
    }

    let pattern_input = PatternInput {
        index: &index,
        scores: &dimension_scores,
        seasons: &season_set,
        current,
        baseline,
        config,
    };
    let flags = patterns::detect_patterns(&pattern_input);
    let position_groups = patterns::summarize_groups(&pattern_input);
    let protocol_outcomes = patterns::protocol_outcomes(&pattern_input);
    for flag in &flags {
        check_flag(flag, config)?;
    }

    let injury_rates: BTreeMap<Season, f64> = season_set
        .iter()
        .filter_map(|season| {
            let active = index.active_players(*season);
            (active > 0).then(|| (*season, index.season_injuries(*season) as f64 / active as f64))
        })
        .collect();
    let coherence = coherence::aggregate(&dimension_scores, &season_set, &injury_rates, config);
    if let Some(score) = coherence.current {
        check_unit("physical coherence score", score)?;
    }

    tracing::info!(
        organization_id,
        flags = flags.len(),
        systemic = flags.iter().filter(|flag| flag.is_systemic()).count(),
        score = ?coherence.current,
        trend = ?coherence.trend,
        "assessment complete"
    );

    Ok(AssessmentResult {
        organization_id: organization_id.to_string(),
        seasons: season_list,
        status: AssessmentStatus::Complete,
        dimension_scores,
        flags,
        coherence,
        position_groups,
        protocol_outcomes,
        data_sources: index.data_sources().clone(),
    })
}

fn check_score_set(set: &DimensionScoreSet) -> Result<(), AssessmentError> {
    for spec in &DIMENSIONS {
        if let Some(value) = set.get(spec.dimension).value() {
            if !(0.0..=1.0).contains(&value) {
                return Err(AssessmentError::ScoreOutOfRange {
                    dimension: spec.name,
                    player_id: set.player_id,
                    season: set.season,
                    value,
                });
            }
        }
    }
    if let Some(ratio) = set.load_recovery_ratio {
        if !ratio.is_finite() || ratio < 0.0 {
            return Err(AssessmentError::InvariantViolation(format!(
                "load/recovery ratio {ratio} for player {} in {}",
                set.player_id, set.season
            )));
        }
    }
    Ok(())
}

/// Re-injury lookups need each return date plus the window to stay on the
/// calendar.
fn check_injuries(index: &RecordIndex<'_>, config: &AssessmentConfig) -> Result<(), AssessmentError> {
    let window = Duration::days(config.patterns.reinjury_window_days);
    for injury in index.injuries() {
        let limit = injury
            .return_date()
            .and_then(|returned| returned.checked_add_signed(window));
        if limit.is_none() {
            return Err(AssessmentError::InvariantViolation(format!(
                "injury on {} for player {} misses {} days, past the end of the calendar",
                injury.date, injury.player_id, injury.days_missed
            )));
        }
    }
    Ok(())
}

fn check_flag(flag: &SystemicFlag, config: &AssessmentConfig) -> Result<(), AssessmentError> {
    if flag.is_systemic() && flag.support_count < config.min_occurrences {
        return Err(AssessmentError::InvariantViolation(format!(
            "flag {} is systemic with only {} players",
            flag.id, flag.support_count
        )));
    }
    check_unit("flag confidence", flag.confidence)
}

fn check_unit(what: &str, value: f64) -> Result<(), AssessmentError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AssessmentError::InvariantViolation(format!(
            "{what} is {value}, outside [0, 1]"
        )))
    }
}
