use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::config::{AssessmentConfig, ScoringConfig};
use crate::index::PlayerSeasonRecords;
use crate::models::{
    Dimension, DimensionScoreSet, DimensionValue, InjuryEvent, InjuryType, PlayerRecord, Season,
};

/// Share of ρ lost when every current-season injury repeats a prior one.
const REPEAT_PENALTY: f64 = 0.6;

const READINESS_SCALE: f64 = 10.0;

/// Position-group facts a single player's ρ depends on.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupContext {
    /// The organization has records for the previous season, whether or not
    /// that season was requested.
    pub prior_season_recorded: bool,
    pub prior_group_injuries: usize,
    pub protocol_changed: bool,
}

pub struct PlayerSeason<'r, 'a> {
    pub player: &'a PlayerRecord,
    pub season: Season,
    pub records: &'r PlayerSeasonRecords<'a>,
    /// The player's own injuries from the previous season.
    pub prior_injuries: Vec<&'a InjuryEvent>,
    pub group: GroupContext,
}

pub struct ScoringContext<'c> {
    pub scoring: &'c ScoringConfig,
    pub lambda: f64,
    pub multiplier: f64,
    config: &'c AssessmentConfig,
}

impl<'c> ScoringContext<'c> {
    pub fn new(config: &'c AssessmentConfig, position_group: &str) -> Self {
        ScoringContext {
            scoring: &config.scoring,
            lambda: config.position_factor(position_group),
            multiplier: config.threshold_multiplier(position_group),
            config,
        }
    }
}

type Computation = fn(&PlayerSeason<'_, '_>, &ScoringContext<'_>) -> DimensionValue;

pub struct DimensionSpec {
    pub dimension: Dimension,
    pub name: &'static str,
    compute: Computation,
}

pub const DIMENSIONS: [DimensionSpec; 6] = [
    DimensionSpec {
        dimension: Dimension::Psi,
        name: "load_coherence",
        compute: load_coherence,
    },
    DimensionSpec {
        dimension: Dimension::Rho,
        name: "history_integration",
        compute: history_integration,
    },
    DimensionSpec {
        dimension: Dimension::Q,
        name: "strain_accumulation",
        compute: strain_accumulation,
    },
    DimensionSpec {
        dimension: Dimension::F,
        name: "team_protection",
        compute: team_protection,
    },
    DimensionSpec {
        dimension: Dimension::Tau,
        name: "recovery_depth",
        compute: recovery_depth,
    },
    DimensionSpec {
        dimension: Dimension::Lambda,
        name: "position_factor",
        compute: position_factor,
    },
];

pub fn score_player_season(
    input: &PlayerSeason<'_, '_>,
    config: &AssessmentConfig,
) -> DimensionScoreSet {
    let ctx = ScoringContext::new(config, &input.player.position_group);

    let mut set = DimensionScoreSet {
        player_id: input.player.player_id,
        player_name: input.player.name.clone(),
        position_group: input.player.position_group.clone(),
        season: input.season,
        psi: DimensionValue::InsufficientData,
        rho: DimensionValue::InsufficientData,
        q: DimensionValue::InsufficientData,
        f: DimensionValue::InsufficientData,
        tau: DimensionValue::InsufficientData,
        lambda: ctx.lambda,
        load_recovery_ratio: None,
        readiness_divergence: None,
    };

    for spec in &DIMENSIONS {
        let value = (spec.compute)(input, &ctx);
        match spec.dimension {
            Dimension::Psi => set.psi = value,
            Dimension::Rho => set.rho = value,
            Dimension::Q => set.q = value,
            Dimension::F => set.f = value,
            Dimension::Tau => set.tau = value,
            Dimension::Lambda => set.lambda = value.value().unwrap_or(ctx.lambda),
        }
    }

    set.load_recovery_ratio = load_recovery_ratio(input, &ctx, set.psi);
    set.readiness_divergence = readiness_divergence(input.records);
    set
}

fn load_coherence(input: &PlayerSeason<'_, '_>, ctx: &ScoringContext<'_>) -> DimensionValue {
    let training = &input.records.training;
    if training.is_empty() || input.records.recovery.is_empty() {
        return DimensionValue::InsufficientData;
    }

    let mean_load = training.iter().map(|s| s.load).sum::<f64>() / training.len() as f64;
    let peak_cutoff = mean_load * ctx.scoring.peak_load_factor;
    let peaks: Vec<NaiveDate> = training
        .iter()
        .filter(|s| s.load > 0.0 && s.load >= peak_cutoff)
        .map(|s| s.date)
        .collect();
    if peaks.is_empty() {
        return DimensionValue::Measured(1.0);
    }

    let mut windows: Vec<NaiveDate> = input
        .records
        .recovery
        .iter()
        .map(|r| r.date)
        .chain(
            training
                .iter()
                .filter(|s| s.intensity <= ctx.scoring.recovery_intensity)
                .map(|s| s.date),
        )
        .collect();
    windows.sort();
    windows.dedup();

    let max_days = ctx.scoring.max_misalignment_days as f64;
    let squared: f64 = peaks
        .iter()
        .map(|peak| {
            let next = windows.partition_point(|w| w <= peak);
            let misalignment = match windows.get(next) {
                Some(window) => {
                    ((*window - *peak).num_days() - ctx.scoring.ideal_recovery_gap_days).max(0)
                        as f64
                }
                None => max_days,
            };
            (misalignment.min(max_days) / max_days).powi(2)
        })
        .sum();

    DimensionValue::Measured(1.0 - squared / peaks.len() as f64)
}

fn history_integration(input: &PlayerSeason<'_, '_>, ctx: &ScoringContext<'_>) -> DimensionValue {
    if !input.group.prior_season_recorded {
        return DimensionValue::InsufficientData;
    }
    if input.group.prior_group_injuries == 0 {
        return DimensionValue::Measured(1.0);
    }

    let base = if input.group.protocol_changed {
        1.0
    } else {
        ctx.scoring.unchanged_protocol_rho
    };

    let prior_types: BTreeSet<InjuryType> =
        input.prior_injuries.iter().map(|i| i.injury_type).collect();
    let current = &input.records.injuries;
    let repeat_share = if current.is_empty() {
        0.0
    } else {
        current
            .iter()
            .filter(|i| prior_types.contains(&i.injury_type))
            .count() as f64
            / current.len() as f64
    };

    DimensionValue::Measured(base * (1.0 - REPEAT_PENALTY * repeat_share))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrainPoint {
    pub date: NaiveDate,
    pub strain: f64,
    pub normalized: f64,
    pub recovery_event: bool,
}

/// Running strain ledger for one player-season. Sessions add their load and
/// recovery readings release capacity; on a shared date loads land first.
/// The ledger starts empty each season and never goes below zero.
pub fn strain_trajectory(input: &PlayerSeason<'_, '_>, ctx: &ScoringContext<'_>) -> Vec<StrainPoint> {
    let mut events: Vec<(NaiveDate, u8, f64)> = input
        .records
        .training
        .iter()
        .map(|s| (s.date, 0, s.load))
        .chain(input.records.recovery.iter().map(|r| {
            (
                r.date,
                1,
                -ctx.scoring.recovery_credit_per_point * r.effective_readiness(),
            )
        }))
        .collect();
    events.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let capacity = ctx.scoring.strain_capacity / ctx.multiplier;
    let mut strain = 0.0_f64;
    events
        .into_iter()
        .map(|(date, order, delta)| {
            strain = (strain + delta).max(0.0);
            StrainPoint {
                date,
                strain,
                normalized: (strain / capacity).min(1.0),
                recovery_event: order == 1,
            }
        })
        .collect()
}

fn strain_accumulation(input: &PlayerSeason<'_, '_>, ctx: &ScoringContext<'_>) -> DimensionValue {
    if input.records.training.is_empty() {
        return DimensionValue::InsufficientData;
    }
    let trajectory = strain_trajectory(input, ctx);
    match trajectory.last() {
        Some(point) => DimensionValue::Measured(point.normalized),
        None => DimensionValue::InsufficientData,
    }
}

fn team_protection(input: &PlayerSeason<'_, '_>, _ctx: &ScoringContext<'_>) -> DimensionValue {
    let gaps: Vec<f64> = input
        .records
        .recovery
        .iter()
        .filter_map(|r| {
            r.peer_concern
                .map(|concern| (r.self_readiness - (READINESS_SCALE - concern)).abs())
        })
        .collect();

    if gaps.is_empty() {
        return DimensionValue::Defaulted(0.5);
    }
    let mean_gap = gaps.iter().sum::<f64>() / gaps.len() as f64;
    DimensionValue::Measured(1.0 - mean_gap / READINESS_SCALE)
}

fn recovery_depth(input: &PlayerSeason<'_, '_>, ctx: &ScoringContext<'_>) -> DimensionValue {
    let injuries = &input.records.injuries;
    if injuries.is_empty() {
        return DimensionValue::InsufficientData;
    }

    let total: f64 = injuries
        .iter()
        .map(|injury| {
            let prescribed =
                f64::from(ctx.config.prescribed_min_days(injury.injury_type)) * ctx.multiplier;
            (f64::from(injury.days_missed) / prescribed).min(1.0)
        })
        .sum();
    DimensionValue::Measured(total / injuries.len() as f64)
}

fn position_factor(_input: &PlayerSeason<'_, '_>, ctx: &ScoringContext<'_>) -> DimensionValue {
    DimensionValue::Measured(ctx.lambda)
}

/// Training stress over recovery capacity. Poorly timed recovery (low Ψ)
/// counts for less.
fn load_recovery_ratio(
    input: &PlayerSeason<'_, '_>,
    ctx: &ScoringContext<'_>,
    psi: DimensionValue,
) -> Option<f64> {
    if input.records.training.is_empty() {
        return None;
    }
    let total_load: f64 = input.records.training.iter().map(|s| s.load).sum();
    let total_credit: f64 = input
        .records
        .recovery
        .iter()
        .map(|r| ctx.scoring.recovery_credit_per_point * r.effective_readiness())
        .sum();
    let timing = psi.value().map(|v| 0.5 + 0.5 * v).unwrap_or(1.0);
    let capacity = total_credit * timing;

    let ratio = if capacity > 0.0 {
        total_load / capacity
    } else {
        ctx.scoring.ratio_cap
    };
    Some(ratio.min(ctx.scoring.ratio_cap))
}

fn readiness_divergence(records: &PlayerSeasonRecords<'_>) -> Option<f64> {
    let paired: Vec<(f64, f64)> = records
        .recovery
        .iter()
        .filter_map(|r| r.objective_readiness.map(|o| (r.self_readiness, o)))
        .collect();
    if paired.is_empty() {
        return None;
    }
    let n = paired.len() as f64;
    let self_mean = paired.iter().map(|(s, _)| s).sum::<f64>() / n;
    let objective_mean = paired.iter().map(|(_, o)| o).sum::<f64>() / n;
    Some(self_mean - objective_mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecoveryReading, TrainingSession};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn config() -> AssessmentConfig {
        AssessmentConfig::builtin().unwrap()
    }

    fn player(group: &str) -> PlayerRecord {
        PlayerRecord {
            player_id: Uuid::from_u128(7),
            organization_id: "lions".to_string(),
            name: "Avery Lee".to_string(),
            position_group: group.to_string(),
            first_season: 2022,
            last_season: 2024,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 1).unwrap() + chrono::Duration::days(i64::from(d))
    }

    fn session(d: u32, load: f64, intensity: f64) -> TrainingSession {
        TrainingSession {
            player_id: Uuid::from_u128(7),
            date: day(d),
            load,
            intensity,
        }
    }

    fn reading(d: u32, self_readiness: f64, objective: Option<f64>) -> RecoveryReading {
        RecoveryReading {
            player_id: Uuid::from_u128(7),
            date: day(d),
            self_readiness,
            objective_readiness: objective,
            peer_concern: None,
        }
    }

    fn injury(injury_type: InjuryType, days_missed: u32) -> InjuryEvent {
        InjuryEvent {
            player_id: Uuid::from_u128(7),
            season: 2024,
            injury_type,
            body_part: "hamstring".to_string(),
            season_ending: false,
            date: day(3),
            days_missed,
        }
    }

    fn score(records: &PlayerSeasonRecords<'_>, group: GroupContext) -> DimensionScoreSet {
        let player = player("secondary");
        let input = PlayerSeason {
            player: &player,
            season: 2024,
            records,
            prior_injuries: Vec::new(),
            group,
        };
        score_player_season(&input, &config())
    }

    #[test]
    fn missing_records_mark_dimensions_insufficient() {
        let records = PlayerSeasonRecords::default();
        let set = score(&records, GroupContext::default());
        assert_eq!(set.psi, DimensionValue::InsufficientData);
        assert_eq!(set.rho, DimensionValue::InsufficientData);
        assert_eq!(set.q, DimensionValue::InsufficientData);
        assert_eq!(set.tau, DimensionValue::InsufficientData);
        assert_eq!(set.f, DimensionValue::Defaulted(0.5));
        assert_eq!(set.load_recovery_ratio, None);
    }

    #[test]
    fn peaks_followed_by_recovery_score_full_coherence() {
        let training = [session(0, 300.0, 0.5), session(1, 600.0, 0.9), session(4, 300.0, 0.5)];
        let recovery = [reading(2, 8.0, Some(7.5))];
        let records = PlayerSeasonRecords {
            training: training.iter().collect(),
            recovery: recovery.iter().collect(),
            ..PlayerSeasonRecords::default()
        };
        let set = score(&records, GroupContext::default());
        assert_eq!(set.psi, DimensionValue::Measured(1.0));
    }

    #[test]
    fn unrecovered_peak_lowers_load_coherence() {
        let training = [session(0, 300.0, 0.5), session(5, 900.0, 0.9), session(6, 300.0, 0.5)];
        let recovery = [reading(1, 8.0, None)];
        let records = PlayerSeasonRecords {
            training: training.iter().collect(),
            recovery: recovery.iter().collect(),
            ..PlayerSeasonRecords::default()
        };
        let set = score(&records, GroupContext::default());
        assert_eq!(set.psi, DimensionValue::Measured(0.0));
    }

    #[test]
    fn repeat_injury_without_protocol_change_scores_low_rho() {
        let prior = injury(InjuryType::SoftTissue, 21);
        let current = [injury(InjuryType::SoftTissue, 21)];
        let records = PlayerSeasonRecords {
            injuries: current.iter().collect(),
            ..PlayerSeasonRecords::default()
        };
        let player = player("secondary");
        let unchanged = GroupContext {
            prior_season_recorded: true,
            prior_group_injuries: 4,
            protocol_changed: false,
        };
        let input = PlayerSeason {
            player: &player,
            season: 2024,
            records: &records,
            prior_injuries: vec![&prior],
            group: unchanged,
        };
        let low = score_player_season(&input, &config());

        let changed = PlayerSeason {
            group: GroupContext {
                protocol_changed: true,
                ..unchanged
            },
            prior_injuries: vec![&prior],
            ..input
        };
        let high = score_player_season(&changed, &config());

        assert!((low.rho.value().unwrap() - 0.2).abs() < 1e-9);
        assert!(high.rho.value().unwrap() > low.rho.value().unwrap());
    }

    #[test]
    fn rushed_return_reduces_recovery_depth() {
        let injuries = [injury(InjuryType::Structural, 21)];
        let records = PlayerSeasonRecords {
            injuries: injuries.iter().collect(),
            ..PlayerSeasonRecords::default()
        };
        let set = score(&records, GroupContext::default());
        let expected = 21.0 / (42.0 * 1.05);
        assert!((set.tau.value().unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn peer_concern_drives_team_protection() {
        let recovery = [RecoveryReading {
            peer_concern: Some(4.0),
            ..reading(1, 9.0, None)
        }];
        let records = PlayerSeasonRecords {
            recovery: recovery.iter().collect(),
            ..PlayerSeasonRecords::default()
        };
        let set = score(&records, GroupContext::default());
        assert!((set.f.value().unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn divergence_uses_paired_readings() {
        let recovery = [reading(1, 8.0, Some(6.0)), reading(2, 9.0, None), reading(3, 8.4, Some(6.2))];
        let records = PlayerSeasonRecords {
            recovery: recovery.iter().collect(),
            ..PlayerSeasonRecords::default()
        };
        let set = score(&records, GroupContext::default());
        assert!((set.readiness_divergence.unwrap() - 2.1).abs() < 1e-9);
    }

    fn arb_training() -> impl Strategy<Value = Vec<(u32, f64, f64)>> {
        prop::collection::vec((0u32..120, 0.0f64..1500.0, 0.0f64..1.0), 0..40)
    }

    fn arb_recovery() -> impl Strategy<Value = Vec<(u32, f64, Option<f64>, Option<f64>)>> {
        prop::collection::vec(
            (
                0u32..120,
                0.0f64..=10.0,
                prop::option::of(0.0f64..=10.0),
                prop::option::of(0.0f64..=10.0),
            ),
            0..40,
        )
    }

    proptest! {
        #[test]
        fn all_dimensions_stay_in_unit_interval(
            training in arb_training(),
            recovery in arb_recovery(),
            days_missed in prop::collection::vec(0u32..200, 0..4),
        ) {
            let training: Vec<TrainingSession> = training
                .into_iter()
                .map(|(d, load, intensity)| session(d, load, intensity))
                .collect();
            let recovery: Vec<RecoveryReading> = recovery
                .into_iter()
                .map(|(d, s, o, p)| RecoveryReading { peer_concern: p, ..reading(d, s, o) })
                .collect();
            let injuries: Vec<InjuryEvent> = days_missed
                .into_iter()
                .map(|days| injury(InjuryType::Chronic, days))
                .collect();
            let mut records = PlayerSeasonRecords {
                injuries: injuries.iter().collect(),
                training: training.iter().collect(),
                recovery: recovery.iter().collect(),
                ..PlayerSeasonRecords::default()
            };
            records.training.sort_by_key(|s| s.date);
            records.recovery.sort_by_key(|r| r.date);

            let group = GroupContext { prior_season_recorded: true, prior_group_injuries: 2, protocol_changed: false };
            let set = score(&records, group);
            for dimension in [Dimension::Psi, Dimension::Rho, Dimension::Q, Dimension::F, Dimension::Tau, Dimension::Lambda] {
                if let Some(value) = set.get(dimension).value() {
                    prop_assert!((0.0..=1.0).contains(&value), "{:?} = {}", dimension, value);
                }
            }
        }

        #[test]
        fn strain_never_drops_between_recovery_events(
            training in arb_training(),
            recovery in arb_recovery(),
        ) {
            let training: Vec<TrainingSession> = training
                .into_iter()
                .map(|(d, load, intensity)| session(d, load, intensity))
                .collect();
            let recovery: Vec<RecoveryReading> = recovery
                .into_iter()
                .map(|(d, s, o, _)| reading(d, s, o))
                .collect();
            let records = PlayerSeasonRecords {
                training: training.iter().collect(),
                recovery: recovery.iter().collect(),
                ..PlayerSeasonRecords::default()
            };
            let player = player("defensive_line");
            let input = PlayerSeason {
                player: &player,
                season: 2024,
                records: &records,
                prior_injuries: Vec::new(),
                group: GroupContext::default(),
            };
            let config = config();
            let ctx = ScoringContext::new(&config, "defensive_line");
            let trajectory = strain_trajectory(&input, &ctx);
            for pair in trajectory.windows(2) {
                if !pair[1].recovery_event {
                    prop_assert!(pair[1].normalized >= pair[0].normalized);
                }
            }
        }
    }
}
