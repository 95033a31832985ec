use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::baseline::BaselineProvider;
use crate::config::AssessmentConfig;
use crate::index::RecordIndex;
use crate::models::{
    DimensionScoreSet, FlagCategory, FlagKind, FlagSeverity, InjuryType, NutritionLog, Season,
    SystemicFlag,
};

pub struct PatternInput<'r, 'a> {
    pub index: &'r RecordIndex<'a>,
    pub scores: &'r [DimensionScoreSet],
    pub seasons: &'r BTreeSet<Season>,
    pub current: Season,
    pub baseline: &'r dyn BaselineProvider,
    pub config: &'r AssessmentConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionGroupSummary {
    pub position_group: String,
    pub season: Season,
    pub roster_size: usize,
    pub injuries: usize,
    pub injury_rate: f64,
    pub injury_rate_vs_league: Option<f64>,
    pub load_recovery_ratio: Option<f64>,
    pub soft_tissue_rate: f64,
    pub reinjury_rate: f64,
    pub readiness_divergence: Option<f64>,
    /// 1 minus the coefficient of variation of session loads, floored at 0.
    pub periodization_coherence: Option<f64>,
    pub load_injury_link: Option<LoadInjuryLink>,
}

/// How strongly a group's load/recovery ratio lines up with its injuries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadInjuryLink {
    Weak,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVerdict {
    Effective,
    Ineffective,
    NoClearEffect,
}

/// A protocol change judged by the group's injury rate in the season before
/// it against the season it took effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolOutcome {
    pub position_group: String,
    pub season: Season,
    pub date: NaiveDate,
    pub description: String,
    pub rate_before: f64,
    pub rate_after: f64,
    /// Relative drop in injury rate. Negative when injuries rose.
    pub improvement: f64,
    pub verdict: ProtocolVerdict,
}

#[derive(Debug, Clone)]
struct FlagDraft {
    kind: FlagKind,
    id_suffix: Option<&'static str>,
    position_group: String,
    seasons: BTreeSet<Season>,
    players: BTreeSet<Uuid>,
    group_size: usize,
    data_points: usize,
    observed: f64,
    threshold: f64,
    description: String,
}

impl FlagDraft {
    fn into_flag(self, config: &AssessmentConfig) -> SystemicFlag {
        let group_code = self.position_group.to_uppercase();
        let id = match self.id_suffix {
            Some(suffix) => format!("{}-{}-{}", self.kind.code(), group_code, suffix),
            None => format!("{}-{}", self.kind.code(), group_code),
        };

        SystemicFlag {
            id,
            kinds: BTreeSet::from([self.kind]),
            category: classify(self.players.len(), self.group_size, config),
            severity: severity(self.observed, self.threshold),
            position_groups: BTreeSet::from([self.position_group]),
            seasons: self.seasons,
            description: self.description,
            support_count: self.players.len(),
            players: self.players,
            group_size: self.group_size,
            data_points: self.data_points,
            confidence: confidence(self.data_points, config.patterns.confidence_prior),
            hypothesis: hypothesis(self.kind).to_string(),
            investigation_areas: investigation_areas(self.kind)
                .iter()
                .map(|area| area.to_string())
                .collect(),
        }
    }
}

/// Runs every detector, merges flags that share players and returns them
/// systemic first, then by severity and confidence.
pub fn detect_patterns(input: &PatternInput<'_, '_>) -> Vec<SystemicFlag> {
    let mut drafts = Vec::new();
    drafts.extend(injury_rate_drafts(input));
    drafts.extend(load_recovery_drafts(input));
    drafts.extend(divergence_drafts(input));
    drafts.extend(soft_tissue_drafts(input));
    drafts.extend(nutrition_drafts(input));
    tracing::debug!(candidates = drafts.len(), "pattern candidates detected");

    let flags: Vec<SystemicFlag> = drafts
        .into_iter()
        .filter(|draft| !draft.players.is_empty())
        .map(|draft| draft.into_flag(input.config))
        .collect();

    let mut merged = merge_overlapping(flags, input.config);
    merged.sort_by(flag_order);
    merged
}

pub fn classify(support: usize, group_size: usize, config: &AssessmentConfig) -> FlagCategory {
    if group_size == 0 || support < config.min_occurrences {
        return FlagCategory::Individual;
    }
    if support as f64 / group_size as f64 >= config.threshold_fraction {
        FlagCategory::Systemic
    } else {
        FlagCategory::Individual
    }
}

pub fn severity(observed: f64, threshold: f64) -> FlagSeverity {
    let excess = observed / threshold;
    if excess >= 2.0 {
        FlagSeverity::Critical
    } else if excess >= 1.25 {
        FlagSeverity::Elevated
    } else {
        FlagSeverity::Watch
    }
}

pub fn confidence(data_points: usize, prior: f64) -> f64 {
    let points = data_points as f64;
    points / (points + prior)
}

fn hypothesis(kind: FlagKind) -> &'static str {
    match kind {
        FlagKind::InjuryRate => {
            "Training, recovery or nutrition protocol does not match the physical demands of this position group"
        }
        FlagKind::LoadRecovery => "Training load exceeds the recovery allocated to this position group",
        FlagKind::ReadinessDivergence => {
            "Disclosure environment may not feel safe: reporting pain may affect playing time"
        }
        FlagKind::SoftTissueCluster => {
            "Training load or nutrition protocol may not match metabolic demands for this position group"
        }
        FlagKind::NutritionDeficit => {
            "Nutrient intake below recommendation may be slowing tissue repair"
        }
    }
}

fn investigation_areas(kind: FlagKind) -> &'static [&'static str] {
    match kind {
        FlagKind::InjuryRate => &[
            "Position-specific training load audit",
            "Return-to-play protocol review",
        ],
        FlagKind::LoadRecovery => &[
            "Position-specific training load audit",
            "Recovery allocation in the weekly plan",
        ],
        FlagKind::ReadinessDivergence => &[
            "Medical staff independence review",
            "Playing time correlation with injury reports",
            "Anonymous athlete survey on disclosure safety",
        ],
        FlagKind::SoftTissueCluster => &[
            "Position-specific training load audit",
            "Nutrition assessment (collagen, anti-inflammatory)",
            "Recovery protocol review",
        ],
        FlagKind::NutritionDeficit => &[
            "Nutrition assessment (collagen, anti-inflammatory)",
            "Protein timing around training sessions",
        ],
    }
}

fn injury_rate_drafts(input: &PatternInput<'_, '_>) -> Vec<FlagDraft> {
    let threshold = input.config.patterns.injury_rate_ratio;
    let mut drafts = Vec::new();

    for group in input.index.groups() {
        let mut run: Vec<(Season, f64)> = Vec::new();
        let mut best: Vec<(Season, f64)> = Vec::new();

        for &season in input.seasons {
            match injury_rate_ratio(input, group, season) {
                Some(ratio) if ratio > threshold => {
                    if run.last().is_some_and(|(last, _)| last + 1 != season) {
                        run.clear();
                    }
                    run.push((season, ratio));
                    if run.len() >= best.len() {
                        best = run.clone();
                    }
                }
                _ => run.clear(),
            }
        }

        if best.len() < input.config.patterns.consecutive_seasons {
            continue;
        }

        let seasons: BTreeSet<Season> = best.iter().map(|(season, _)| *season).collect();
        let mut players = BTreeSet::new();
        let mut data_points = 0;
        let mut group_size = 0;
        for season in &seasons {
            let injuries = input.index.group_injuries(group, *season);
            data_points += injuries.len();
            players.extend(injuries.iter().map(|injury| injury.player_id));
            group_size = group_size.max(input.index.roster(group, *season).len());
        }
        let mean_ratio = best.iter().map(|(_, ratio)| ratio).sum::<f64>() / best.len() as f64;
        let first = best.first().map(|(season, _)| *season).unwrap_or_default();
        let last = best.last().map(|(season, _)| *season).unwrap_or_default();

        drafts.push(FlagDraft {
            kind: FlagKind::InjuryRate,
            id_suffix: None,
            position_group: group.to_string(),
            seasons,
            players,
            group_size,
            data_points,
            observed: mean_ratio,
            threshold,
            description: format!(
                "{group} injury rate at {:.0}% of league baseline for {} consecutive seasons ({first}-{last})",
                mean_ratio * 100.0,
                best.len()
            ),
        });
    }

    drafts
}

fn injury_rate(input: &PatternInput<'_, '_>, group: &str, season: Season) -> Option<f64> {
    let roster = input.index.roster(group, season).len();
    if roster == 0 {
        return None;
    }
    Some(input.index.group_injuries(group, season).len() as f64 / roster as f64)
}

fn injury_rate_ratio(input: &PatternInput<'_, '_>, group: &str, season: Season) -> Option<f64> {
    let rate = injury_rate(input, group, season)?;
    let baseline = input.baseline.injury_rate(group, season)?;
    Some(rate / baseline)
}

fn current_ratios<'s>(input: &'s PatternInput<'_, '_>) -> BTreeMap<&'s str, Vec<(Uuid, f64)>> {
    let mut ratios: BTreeMap<&str, Vec<(Uuid, f64)>> = BTreeMap::new();
    for set in input.scores.iter().filter(|set| set.season == input.current) {
        if let Some(ratio) = set.load_recovery_ratio {
            ratios
                .entry(set.position_group.as_str())
                .or_default()
                .push((set.player_id, ratio));
        }
    }
    ratios
}

fn load_recovery_drafts(input: &PatternInput<'_, '_>) -> Vec<FlagDraft> {
    let threshold = input.config.patterns.sustainable_ratio;
    let mut drafts = Vec::new();

    for (group, ratios) in current_ratios(input) {
        let mean = ratios.iter().map(|(_, ratio)| ratio).sum::<f64>() / ratios.len() as f64;
        if mean <= threshold {
            continue;
        }
        let players: BTreeSet<Uuid> = ratios
            .iter()
            .filter(|(_, ratio)| *ratio > threshold)
            .map(|(player_id, _)| *player_id)
            .collect();

        drafts.push(FlagDraft {
            kind: FlagKind::LoadRecovery,
            id_suffix: None,
            position_group: group.to_string(),
            seasons: BTreeSet::from([input.current]),
            players,
            group_size: input.index.roster(group, input.current).len().max(ratios.len()),
            data_points: ratios.len(),
            observed: mean,
            threshold,
            description: format!(
                "{group} load/recovery ratio {mean:.2} exceeds sustainable {threshold:.2}"
            ),
        });
    }

    drafts
}

/// Mean self-report minus mean objective readiness over readings carrying
/// both, with the number of such readings.
fn group_divergence(input: &PatternInput<'_, '_>, group: &str, season: Season) -> Option<(f64, usize)> {
    let paired: Vec<(f64, f64)> = input
        .index
        .group_buckets(group, season)
        .flat_map(|bucket| bucket.recovery.iter())
        .filter_map(|r| r.objective_readiness.map(|o| (r.self_readiness, o)))
        .collect();
    if paired.is_empty() {
        return None;
    }
    let n = paired.len() as f64;
    let self_mean = paired.iter().map(|(s, _)| s).sum::<f64>() / n;
    let objective_mean = paired.iter().map(|(_, o)| o).sum::<f64>() / n;
    Some((self_mean - objective_mean, paired.len()))
}

/// Share of the group's non season-ending injuries followed by another
/// injury to the same player within the re-injury window after return.
fn reinjury_rate(input: &PatternInput<'_, '_>, group: &str, season: Season) -> f64 {
    let window = Duration::days(input.config.patterns.reinjury_window_days);
    let eligible: Vec<_> = input
        .index
        .group_injuries(group, season)
        .into_iter()
        .filter(|injury| !injury.season_ending)
        .collect();
    if eligible.is_empty() {
        return 0.0;
    }

    let reinjured = eligible
        .iter()
        .filter(|injury| {
            let Some(limit) = injury
                .return_date()
                .and_then(|returned| returned.checked_add_signed(window))
            else {
                return false;
            };
            input
                .index
                .player_injuries(injury.player_id)
                .iter()
                .any(|other| other.date > injury.date && other.date <= limit)
        })
        .count();
    reinjured as f64 / eligible.len() as f64
}

fn divergence_drafts(input: &PatternInput<'_, '_>) -> Vec<FlagDraft> {
    let threshold = input.config.patterns.divergence_threshold;
    let reinjury_threshold = input.config.patterns.reinjury_rate;
    let mut drafts = Vec::new();

    for group in input.index.groups() {
        let Some((divergence, readings)) = group_divergence(input, group, input.current) else {
            continue;
        };
        if divergence <= threshold {
            continue;
        }
        let reinjury = reinjury_rate(input, group, input.current);
        if reinjury <= reinjury_threshold {
            tracing::debug!(group, divergence, reinjury, "divergence without re-injury co-occurrence");
            continue;
        }

        let players: BTreeSet<Uuid> = input
            .scores
            .iter()
            .filter(|set| set.season == input.current && set.position_group == group)
            .filter(|set| set.readiness_divergence.is_some_and(|d| d > threshold))
            .map(|set| set.player_id)
            .collect();

        drafts.push(FlagDraft {
            kind: FlagKind::ReadinessDivergence,
            id_suffix: None,
            position_group: group.to_string(),
            seasons: BTreeSet::from([input.current]),
            players,
            group_size: input.index.roster(group, input.current).len(),
            data_points: readings,
            observed: divergence,
            threshold,
            description: format!(
                "{group} self-reported readiness exceeds objective readiness by {divergence:.1} points with {:.0}% re-injury within {} days of return",
                reinjury * 100.0,
                input.config.patterns.reinjury_window_days
            ),
        });
    }

    drafts
}

fn soft_tissue_drafts(input: &PatternInput<'_, '_>) -> Vec<FlagDraft> {
    let share_threshold = input.config.patterns.soft_tissue_share;
    let mut drafts = Vec::new();

    for group in input.index.groups() {
        let injuries = input.index.group_injuries(group, input.current);
        let soft: Vec<_> = injuries
            .iter()
            .filter(|injury| injury.injury_type == InjuryType::SoftTissue)
            .collect();
        if soft.len() < input.config.min_occurrences {
            continue;
        }
        let share = soft.len() as f64 / injuries.len() as f64;
        if share <= share_threshold {
            continue;
        }

        drafts.push(FlagDraft {
            kind: FlagKind::SoftTissueCluster,
            id_suffix: None,
            position_group: group.to_string(),
            seasons: BTreeSet::from([input.current]),
            players: soft.iter().map(|injury| injury.player_id).collect(),
            group_size: input.index.roster(group, input.current).len(),
            data_points: soft.len(),
            observed: share,
            threshold: share_threshold,
            description: format!(
                "{group} soft tissue injuries make up {:.0}% of {} injuries",
                share * 100.0,
                injuries.len()
            ),
        });
    }

    drafts
}

type NutrientAccessor = fn(&NutritionLog) -> f64;

fn nutrition_drafts(input: &PatternInput<'_, '_>) -> Vec<FlagDraft> {
    let targets = &input.config.nutrition_targets;
    let nutrients: [(&'static str, &'static str, NutrientAccessor, f64); 3] = [
        ("COLLAGEN", "collagen intake", |log: &NutritionLog| log.collagen_g, targets.collagen_g),
        ("OMEGA", "omega-3/omega-6 ratio", |log: &NutritionLog| log.omega_ratio, targets.omega_ratio),
        ("PROTEIN", "protein timing", |log: &NutritionLog| log.protein_timing, targets.protein_timing),
    ];
    let shortfall_threshold = input.config.patterns.nutrition_shortfall;
    let mut drafts = Vec::new();

    for group in input.index.groups() {
        let has_soft_tissue = input
            .index
            .group_injuries(group, input.current)
            .iter()
            .any(|injury| injury.injury_type == InjuryType::SoftTissue);
        if !has_soft_tissue {
            continue;
        }

        let logs: Vec<&NutritionLog> = input
            .index
            .group_buckets(group, input.current)
            .flat_map(|bucket| bucket.nutrition.iter().copied())
            .collect();
        if logs.is_empty() {
            continue;
        }

        for (code, label, accessor, target) in nutrients {
            let group_mean = logs.iter().map(|log| accessor(log)).sum::<f64>() / logs.len() as f64;
            let shortfall = 1.0 - group_mean / target;
            if shortfall <= shortfall_threshold {
                continue;
            }

            let mut per_player: BTreeMap<Uuid, (f64, usize)> = BTreeMap::new();
            for log in &logs {
                let entry = per_player.entry(log.player_id).or_insert((0.0, 0));
                entry.0 += accessor(log);
                entry.1 += 1;
            }
            let players: BTreeSet<Uuid> = per_player
                .into_iter()
                .filter(|(_, (total, count))| total / (*count as f64) < target)
                .map(|(player_id, _)| player_id)
                .collect();

            drafts.push(FlagDraft {
                kind: FlagKind::NutritionDeficit,
                id_suffix: Some(code),
                position_group: group.to_string(),
                seasons: BTreeSet::from([input.current]),
                players,
                group_size: input.index.roster(group, input.current).len(),
                data_points: logs.len(),
                observed: shortfall,
                threshold: shortfall_threshold,
                description: format!(
                    "{group} {label} {:.0}% below recommendation alongside soft tissue injuries",
                    shortfall * 100.0
                ),
            });
        }
    }

    drafts
}

fn merge_overlapping(flags: Vec<SystemicFlag>, config: &AssessmentConfig) -> Vec<SystemicFlag> {
    let mut merged: Vec<SystemicFlag> = Vec::new();
    for flag in flags {
        let mut current = flag;
        while let Some(position) = merged
            .iter()
            .position(|existing| !existing.players.is_disjoint(&current.players))
        {
            let existing = merged.remove(position);
            current = combine(existing, current, config);
        }
        merged.push(current);
    }
    merged
}

/// Systemic only when one of the parts already was. A union of individual
/// observations stays individual however many players it gathers.
fn combine(first: SystemicFlag, second: SystemicFlag, config: &AssessmentConfig) -> SystemicFlag {
    let category = if first.is_systemic() || second.is_systemic() {
        FlagCategory::Systemic
    } else {
        FlagCategory::Individual
    };
    let mut players = first.players;
    players.extend(second.players);
    let group_size = first.group_size.max(second.group_size);
    let data_points = first.data_points + second.data_points;

    let mut hypothesis = first.hypothesis;
    if !hypothesis.contains(&second.hypothesis) {
        hypothesis.push_str("; ");
        hypothesis.push_str(&second.hypothesis);
    }
    let mut investigation_areas = first.investigation_areas;
    for area in second.investigation_areas {
        if !investigation_areas.contains(&area) {
            investigation_areas.push(area);
        }
    }

    let mut kinds = first.kinds;
    kinds.extend(second.kinds);
    let mut position_groups = first.position_groups;
    position_groups.extend(second.position_groups);
    let mut seasons = first.seasons;
    seasons.extend(second.seasons);

    SystemicFlag {
        id: format!("{}+{}", first.id, second.id),
        kinds,
        category,
        severity: first.severity.max(second.severity),
        position_groups,
        seasons,
        description: format!("{}; {}", first.description, second.description),
        support_count: players.len(),
        players,
        group_size,
        data_points,
        confidence: confidence(data_points, config.patterns.confidence_prior),
        hypothesis,
        investigation_areas,
    }
}

fn flag_order(a: &SystemicFlag, b: &SystemicFlag) -> Ordering {
    a.category
        .cmp(&b.category)
        .then_with(|| b.severity.cmp(&a.severity))
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn protocol_outcomes(input: &PatternInput<'_, '_>) -> Vec<ProtocolOutcome> {
    let threshold = input.config.patterns.protocol_effect_threshold;
    let floor = input.config.patterns.protocol_rate_floor;

    input
        .index
        .protocol_changes()
        .iter()
        .filter(|change| input.seasons.contains(&change.season))
        .filter_map(|change| {
            let group = change.position_group.as_str();
            let Some(rate_before) = injury_rate(input, group, change.season - 1) else {
                tracing::debug!(group, season = change.season, "no roster before protocol change");
                return None;
            };
            let rate_after = injury_rate(input, group, change.season)?;
            let improvement = (rate_before - rate_after) / rate_before.max(floor);
            let verdict = if improvement > threshold {
                ProtocolVerdict::Effective
            } else if improvement < -threshold {
                ProtocolVerdict::Ineffective
            } else {
                ProtocolVerdict::NoClearEffect
            };

            Some(ProtocolOutcome {
                position_group: change.position_group.clone(),
                season: change.season,
                date: change.date,
                description: change.description.clone(),
                rate_before,
                rate_after,
                improvement,
                verdict,
            })
        })
        .collect()
}

pub fn protocol_recommendations(outcomes: &[ProtocolOutcome]) -> Vec<&'static str> {
    let mut recommendations = Vec::new();
    if outcomes.iter().any(|o| o.verdict == ProtocolVerdict::Effective) {
        recommendations.push("Continue and expand protocols that showed improvement");
    }
    if outcomes.iter().any(|o| o.verdict == ProtocolVerdict::Ineffective) {
        recommendations.push("Review and revise protocols that showed decline");
        recommendations.push("Consider reverting ineffective changes");
    }
    recommendations
}

fn periodization_coherence(input: &PatternInput<'_, '_>, group: &str, season: Season) -> Option<f64> {
    let loads: Vec<f64> = input
        .index
        .group_buckets(group, season)
        .flat_map(|bucket| bucket.training.iter().map(|session| session.load))
        .collect();
    if loads.is_empty() {
        return None;
    }
    if loads.len() == 1 {
        return Some(1.0);
    }

    let n = loads.len() as f64;
    let mean = loads.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return Some(1.0);
    }
    let variance = loads.iter().map(|load| (load - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(1.0 - (variance.sqrt() / mean).min(1.0))
}

fn load_injury_link(ratio: f64, injuries: usize, config: &AssessmentConfig) -> LoadInjuryLink {
    if ratio <= config.patterns.sustainable_ratio {
        LoadInjuryLink::Weak
    } else if injuries >= config.min_occurrences {
        LoadInjuryLink::Strong
    } else {
        LoadInjuryLink::Moderate
    }
}

pub fn summarize_groups(input: &PatternInput<'_, '_>) -> Vec<PositionGroupSummary> {
    let ratios = current_ratios(input);
    let mut summaries: Vec<PositionGroupSummary> = input
        .index
        .groups()
        .into_iter()
        .map(|group| {
            let injuries = input.index.group_injuries(group, input.current);
            let soft = injuries
                .iter()
                .filter(|injury| injury.injury_type == InjuryType::SoftTissue)
                .count();
            let load_recovery_ratio = ratios.get(group).map(|values| {
                values.iter().map(|(_, ratio)| ratio).sum::<f64>() / values.len() as f64
            });

            PositionGroupSummary {
                position_group: group.to_string(),
                season: input.current,
                roster_size: input.index.roster(group, input.current).len(),
                injuries: injuries.len(),
                injury_rate: injury_rate(input, group, input.current).unwrap_or(0.0),
                injury_rate_vs_league: injury_rate_ratio(input, group, input.current),
                load_recovery_ratio,
                soft_tissue_rate: if injuries.is_empty() {
                    0.0
                } else {
                    soft as f64 / injuries.len() as f64
                },
                reinjury_rate: reinjury_rate(input, group, input.current),
                readiness_divergence: group_divergence(input, group, input.current)
                    .map(|(divergence, _)| divergence),
                periodization_coherence: periodization_coherence(input, group, input.current),
                load_injury_link: load_recovery_ratio
                    .map(|ratio| load_injury_link(ratio, injuries.len(), input.config)),
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        let a_ratio = a.injury_rate_vs_league.unwrap_or(0.0);
        let b_ratio = b.injury_rate_vs_league.unwrap_or(0.0);
        b_ratio
            .total_cmp(&a_ratio)
            .then_with(|| a.position_group.cmp(&b.position_group))
    });
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InjuryEvent, PlayerRecord, RecordSet};
    use chrono::NaiveDate;

    fn config() -> AssessmentConfig {
        AssessmentConfig::builtin().unwrap()
    }

    fn roster(group: &str, start: u128, count: u128) -> Vec<PlayerRecord> {
        (start..start + count)
            .map(|n| PlayerRecord {
                player_id: Uuid::from_u128(n),
                organization_id: "lions".to_string(),
                name: format!("Player {n}"),
                position_group: group.to_string(),
                first_season: 2022,
                last_season: 2024,
            })
            .collect()
    }

    fn injury(player: u128, season: Season, injury_type: InjuryType, month: u32, day: u32) -> InjuryEvent {
        InjuryEvent {
            player_id: Uuid::from_u128(player),
            season,
            injury_type,
            body_part: "hamstring".to_string(),
            season_ending: false,
            date: NaiveDate::from_ymd_opt(season, month, day).unwrap(),
            days_missed: 10,
        }
    }

    fn flag(id: &str, players: &[u128], severity: FlagSeverity) -> SystemicFlag {
        SystemicFlag {
            id: id.to_string(),
            kinds: BTreeSet::from([FlagKind::SoftTissueCluster]),
            category: FlagCategory::Individual,
            severity,
            position_groups: BTreeSet::from(["secondary".to_string()]),
            seasons: BTreeSet::from([2024]),
            description: id.to_string(),
            players: players.iter().map(|n| Uuid::from_u128(*n)).collect(),
            support_count: players.len(),
            group_size: 10,
            data_points: players.len(),
            confidence: 0.5,
            hypothesis: format!("{id} hypothesis"),
            investigation_areas: vec!["Recovery protocol review".to_string()],
        }
    }

    fn detect(records: &RecordSet, scores: &[DimensionScoreSet], baseline: &BTreeMap<String, f64>) -> Vec<SystemicFlag> {
        let config = config();
        let index = RecordIndex::build("lions", records, config.season_start_month);
        let seasons: BTreeSet<Season> = [2022, 2023, 2024].into();
        let input = PatternInput {
            index: &index,
            scores,
            seasons: &seasons,
            current: 2024,
            baseline,
            config: &config,
        };
        detect_patterns(&input)
    }

    #[test]
    fn classification_requires_players_and_fraction() {
        let config = config();
        assert_eq!(classify(2, 4, &config), FlagCategory::Individual);
        assert_eq!(classify(3, 20, &config), FlagCategory::Individual);
        assert_eq!(classify(3, 10, &config), FlagCategory::Systemic);
        assert_eq!(classify(5, 0, &config), FlagCategory::Individual);
    }

    #[test]
    fn severity_scales_with_threshold_excess() {
        assert_eq!(severity(8.47, 3.0), FlagSeverity::Critical);
        assert_eq!(severity(4.0, 3.0), FlagSeverity::Elevated);
        assert_eq!(severity(1.5, 1.4), FlagSeverity::Watch);
    }

    #[test]
    fn overlapping_flags_merge_transitively() {
        let flags = vec![
            flag("A", &[1, 2], FlagSeverity::Watch),
            flag("B", &[5, 6], FlagSeverity::Watch),
            flag("C", &[2, 5], FlagSeverity::Critical),
        ];
        let merged = merge_overlapping(flags, &config());
        assert_eq!(merged.len(), 1);
        let only = &merged[0];
        assert_eq!(only.support_count, 4);
        assert_eq!(only.severity, FlagSeverity::Critical);
        assert_eq!(only.category, FlagCategory::Individual);
        assert_eq!(only.investigation_areas.len(), 1);
        assert!(only.hypothesis.contains("A hypothesis"));
        assert!(only.hypothesis.contains("C hypothesis"));
    }

    #[test]
    fn merge_keeps_systemic_when_one_part_is_systemic() {
        let mut systemic = flag("A", &[1, 2, 3], FlagSeverity::Watch);
        systemic.category = FlagCategory::Systemic;
        let merged = merge_overlapping(
            vec![flag("B", &[3, 4], FlagSeverity::Elevated), systemic],
            &config(),
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "B+A");
        assert_eq!(merged[0].category, FlagCategory::Systemic);
    }

    #[test]
    fn disjoint_flags_stay_separate() {
        let flags = vec![
            flag("A", &[1, 2], FlagSeverity::Watch),
            flag("B", &[3, 4], FlagSeverity::Watch),
        ];
        assert_eq!(merge_overlapping(flags, &config()).len(), 2);
    }

    #[test]
    fn rate_flag_needs_consecutive_seasons() {
        let mut records = RecordSet {
            players: roster("secondary", 1, 5),
            ..RecordSet::default()
        };
        // 2022 and 2024 exceed the baseline, 2023 does not.
        for player in 1..=4 {
            records.injuries.push(injury(player, 2022, InjuryType::Structural, 9, 1));
            records.injuries.push(injury(player, 2024, InjuryType::Structural, 9, 1));
        }
        let baseline = BTreeMap::from([("secondary".to_string(), 0.2)]);
        let flags = detect(&records, &[], &baseline);
        assert!(flags.iter().all(|f| !f.kinds.contains(&FlagKind::InjuryRate)));

        for player in 1..=4 {
            records.injuries.push(injury(player, 2023, InjuryType::Structural, 9, 1));
        }
        let flags = detect(&records, &[], &baseline);
        let rate = flags
            .iter()
            .find(|f| f.kinds.contains(&FlagKind::InjuryRate))
            .expect("rate flag");
        assert_eq!(rate.seasons, BTreeSet::from([2022, 2023, 2024]));
        assert!(rate.description.contains("400%"));
        assert_eq!(rate.category, FlagCategory::Systemic);
    }

    #[test]
    fn load_flag_supports_only_players_over_threshold() {
        let records = RecordSet {
            players: roster("defensive_line", 1, 5),
            ..RecordSet::default()
        };
        let scores: Vec<DimensionScoreSet> = [2.0, 1.8, 1.6, 0.9, 1.0]
            .iter()
            .enumerate()
            .map(|(n, ratio)| DimensionScoreSet {
                player_id: Uuid::from_u128(n as u128 + 1),
                player_name: format!("Player {}", n + 1),
                position_group: "defensive_line".to_string(),
                season: 2024,
                psi: crate::models::DimensionValue::Measured(0.5),
                rho: crate::models::DimensionValue::InsufficientData,
                q: crate::models::DimensionValue::Measured(0.6),
                f: crate::models::DimensionValue::Defaulted(0.5),
                tau: crate::models::DimensionValue::InsufficientData,
                lambda: 0.8,
                load_recovery_ratio: Some(*ratio),
                readiness_divergence: None,
            })
            .collect();

        let flags = detect(&records, &scores, &BTreeMap::new());
        assert_eq!(flags.len(), 1);
        let load = &flags[0];
        assert!(load.kinds.contains(&FlagKind::LoadRecovery));
        assert_eq!(load.support_count, 3);
        assert!(load.is_systemic());
    }

    #[test]
    fn soft_tissue_cluster_and_nutrition_deficit_merge() {
        let mut records = RecordSet {
            players: roster("secondary", 1, 6),
            ..RecordSet::default()
        };
        for player in 1..=4 {
            records.injuries.push(injury(player, 2024, InjuryType::SoftTissue, 10, player as u32));
            records.nutrition.push(crate::models::NutritionLog {
                player_id: Uuid::from_u128(player),
                date: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
                collagen_g: 6.0,
                omega_ratio: 0.3,
                protein_timing: 8.0,
            });
        }

        let flags = detect(&records, &[], &BTreeMap::new());
        assert_eq!(flags.len(), 1);
        let merged = &flags[0];
        assert!(merged.kinds.contains(&FlagKind::SoftTissueCluster));
        assert!(merged.kinds.contains(&FlagKind::NutritionDeficit));
        assert_eq!(merged.support_count, 4);
        assert!(merged.id.contains("SOFT-SECONDARY"));
        assert!(merged.id.contains("NUTRITION-SECONDARY-COLLAGEN"));
    }

    fn change(group: &str, season: Season) -> crate::models::ProtocolChange {
        crate::models::ProtocolChange {
            position_group: group.to_string(),
            season,
            date: NaiveDate::from_ymd_opt(season, 7, 15).unwrap(),
            description: format!("{group} eccentric strength block"),
        }
    }

    #[test]
    fn protocol_change_judged_by_rate_before_and_after() {
        let mut records = RecordSet {
            players: roster("secondary", 1, 5),
            ..RecordSet::default()
        };
        records.players.extend(roster("receivers", 10, 4));
        // Secondary drops from 0.8 to 0.2 injuries per player.
        for player in 1..=4 {
            records.injuries.push(injury(player, 2023, InjuryType::Structural, 9, 1));
        }
        records.injuries.push(injury(1, 2024, InjuryType::Structural, 9, 1));
        // Receivers climb from 0.25 to 0.75.
        records.injuries.push(injury(10, 2023, InjuryType::Structural, 9, 1));
        for player in 10..=12 {
            records.injuries.push(injury(player, 2024, InjuryType::Structural, 9, 1));
        }
        records.protocol_changes = vec![
            change("secondary", 2024),
            change("receivers", 2024),
            // Nobody was rostered in 2021 to compare against.
            change("secondary", 2022),
            change("secondary", 2020),
        ];

        let config = config();
        let index = RecordIndex::build("lions", &records, config.season_start_month);
        let seasons: BTreeSet<Season> = [2022, 2023, 2024].into();
        let baseline = BTreeMap::new();
        let input = PatternInput {
            index: &index,
            scores: &[],
            seasons: &seasons,
            current: 2024,
            baseline: &baseline,
            config: &config,
        };

        let outcomes = protocol_outcomes(&input);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].position_group, "receivers");
        assert_eq!(outcomes[0].verdict, ProtocolVerdict::Ineffective);
        assert!((outcomes[0].improvement + 2.0).abs() < 1e-9);
        assert_eq!(outcomes[1].position_group, "secondary");
        assert_eq!(outcomes[1].verdict, ProtocolVerdict::Effective);
        assert!((outcomes[1].improvement - 0.75).abs() < 1e-9);
        assert_eq!(protocol_recommendations(&outcomes).len(), 3);
    }

    #[test]
    fn unchanged_rate_has_no_clear_effect() {
        let mut records = RecordSet {
            players: roster("linebackers", 1, 4),
            ..RecordSet::default()
        };
        for season in [2023, 2024] {
            records.injuries.push(injury(1, season, InjuryType::Chronic, 10, 3));
        }
        records.protocol_changes.push(change("linebackers", 2024));

        let config = config();
        let index = RecordIndex::build("lions", &records, config.season_start_month);
        let seasons: BTreeSet<Season> = [2024].into();
        let baseline = BTreeMap::new();
        let input = PatternInput {
            index: &index,
            scores: &[],
            seasons: &seasons,
            current: 2024,
            baseline: &baseline,
            config: &config,
        };

        let outcomes = protocol_outcomes(&input);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].verdict, ProtocolVerdict::NoClearEffect);
        assert!(protocol_recommendations(&outcomes).is_empty());
    }

    #[test]
    fn periodization_drops_with_load_variance() {
        let mut records = RecordSet {
            players: roster("quarterbacks", 1, 2),
            ..RecordSet::default()
        };
        records.players.extend(roster("defensive_line", 10, 2));
        for (player, loads) in [(1, [400.0, 400.0]), (2, [400.0, 400.0]), (10, [100.0, 900.0]), (11, [100.0, 900.0])] {
            for (day, load) in loads.into_iter().enumerate() {
                records.training.push(crate::models::TrainingSession {
                    player_id: Uuid::from_u128(player),
                    date: NaiveDate::from_ymd_opt(2024, 8, 1 + day as u32).unwrap(),
                    load,
                    intensity: 0.6,
                });
            }
        }

        let config = config();
        let index = RecordIndex::build("lions", &records, config.season_start_month);
        let seasons: BTreeSet<Season> = [2024].into();
        let baseline = BTreeMap::new();
        let input = PatternInput {
            index: &index,
            scores: &[],
            seasons: &seasons,
            current: 2024,
            baseline: &baseline,
            config: &config,
        };

        let summaries = summarize_groups(&input);
        let by_group = |group: &str| {
            summaries
                .iter()
                .find(|summary| summary.position_group == group)
                .and_then(|summary| summary.periodization_coherence)
                .unwrap()
        };
        assert!((by_group("quarterbacks") - 1.0).abs() < 1e-9);
        // Sample deviation 462 on a mean of 500.
        assert!((by_group("defensive_line") - (1.0 - 800.0 / 3f64.sqrt() / 500.0)).abs() < 1e-9);
    }

    #[test]
    fn load_injury_link_needs_unsustainable_ratio() {
        let config = config();
        assert_eq!(load_injury_link(1.2, 9, &config), LoadInjuryLink::Weak);
        assert_eq!(load_injury_link(2.0, 1, &config), LoadInjuryLink::Moderate);
        assert_eq!(load_injury_link(2.0, 3, &config), LoadInjuryLink::Strong);
    }

    #[test]
    fn reinjury_counts_only_injuries_within_window_after_return() {
        let mut records = RecordSet {
            players: roster("receivers", 1, 2),
            ..RecordSet::default()
        };
        // Player 1 returns on Sep 11 and is hurt again on Sep 20.
        records.injuries.push(injury(1, 2024, InjuryType::SoftTissue, 9, 1));
        records.injuries.push(injury(1, 2024, InjuryType::SoftTissue, 9, 20));
        // Player 2 stays healthy for months after returning.
        records.injuries.push(injury(2, 2024, InjuryType::Structural, 9, 1));

        let config = config();
        let index = RecordIndex::build("lions", &records, config.season_start_month);
        let seasons: BTreeSet<Season> = [2024].into();
        let baseline = BTreeMap::new();
        let input = PatternInput {
            index: &index,
            scores: &[],
            seasons: &seasons,
            current: 2024,
            baseline: &baseline,
            config: &config,
        };
        assert!((reinjury_rate(&input, "receivers", 2024) - 1.0 / 3.0).abs() < 1e-9);
    }
}
