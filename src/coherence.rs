use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::{AssessmentConfig, DimensionWeights};
use crate::models::{Dimension, DimensionScoreSet, Season};

const AGGREGATED: [Dimension; 5] = [
    Dimension::Psi,
    Dimension::Rho,
    Dimension::Q,
    Dimension::F,
    Dimension::Tau,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
    /// Repeated season-over-season decline while injuries rise.
    SystemicDegradation,
    InsufficientHistory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoherenceStatus {
    Critical,
    Watch,
    Nominal,
}

impl CoherenceStatus {
    pub fn from_score(score: f64) -> Self {
        if score < 0.4 {
            CoherenceStatus::Critical
        } else if score < 0.6 {
            CoherenceStatus::Watch
        } else {
            CoherenceStatus::Nominal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonCoherence {
    pub season: Season,
    pub score: Option<f64>,
    pub dimension_means: BTreeMap<Dimension, f64>,
    pub players_scored: usize,
    pub injury_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalCoherenceScore {
    /// Latest requested season. `current` is its score, never an older one.
    pub current_season: Option<Season>,
    pub current: Option<f64>,
    pub status: Option<CoherenceStatus>,
    pub seasons: Vec<SeasonCoherence>,
    pub deltas: Vec<f64>,
    pub trend: Trend,
}

impl PhysicalCoherenceScore {
    pub fn empty() -> Self {
        PhysicalCoherenceScore {
            current_season: None,
            current: None,
            status: None,
            seasons: Vec::new(),
            deltas: Vec::new(),
            trend: Trend::InsufficientHistory,
        }
    }
}

/// Mean of each dimension over the score sets that have it.
pub fn dimension_means<'a>(
    scores: impl IntoIterator<Item = &'a DimensionScoreSet>,
) -> BTreeMap<Dimension, f64> {
    let mut totals: BTreeMap<Dimension, (f64, usize)> = BTreeMap::new();
    for set in scores {
        for dimension in AGGREGATED {
            if let Some(value) = set.get(dimension).value() {
                let entry = totals.entry(dimension).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
    }
    totals
        .into_iter()
        .map(|(dimension, (total, count))| (dimension, total / count as f64))
        .collect()
}

/// Weighted mean over available dimensions with weights renormalized to the
/// ones present. Strain is inverted: more strain, less coherence.
pub fn weighted_score(means: &BTreeMap<Dimension, f64>, weights: &DimensionWeights) -> Option<f64> {
    let mut weighted = 0.0;
    let mut weight_total = 0.0;
    for (dimension, mean) in means {
        let weight = weights.weight(*dimension);
        if weight <= 0.0 {
            continue;
        }
        let contribution = if *dimension == Dimension::Q { 1.0 - mean } else { *mean };
        weighted += weight * contribution;
        weight_total += weight;
    }
    (weight_total > 0.0).then(|| weighted / weight_total)
}

pub fn aggregate(
    scores: &[DimensionScoreSet],
    seasons: &BTreeSet<Season>,
    injury_rates: &BTreeMap<Season, f64>,
    config: &AssessmentConfig,
) -> PhysicalCoherenceScore {
    let season_scores: Vec<SeasonCoherence> = seasons
        .iter()
        .map(|season| {
            let in_season: Vec<&DimensionScoreSet> =
                scores.iter().filter(|set| set.season == *season).collect();
            let means = dimension_means(in_season.iter().copied());
            SeasonCoherence {
                season: *season,
                score: weighted_score(&means, &config.weights),
                dimension_means: means,
                players_scored: in_season.len(),
                injury_rate: injury_rates.get(season).copied().unwrap_or(0.0),
            }
        })
        .collect();

    let scored: Vec<&SeasonCoherence> = season_scores
        .iter()
        .filter(|season| season.score.is_some())
        .collect();
    let deltas: Vec<f64> = scored
        .windows(2)
        .filter_map(|pair| Some(pair[1].score? - pair[0].score?))
        .collect();

    let trend = classify_trend(&scored, &deltas, config.trend_epsilon);
    let latest = season_scores.last();
    let current_season = latest.map(|season| season.season);
    let current = latest.and_then(|season| season.score);

    PhysicalCoherenceScore {
        current_season,
        current,
        status: current.map(CoherenceStatus::from_score),
        seasons: season_scores,
        deltas,
        trend,
    }
}

fn classify_trend(scored: &[&SeasonCoherence], deltas: &[f64], epsilon: f64) -> Trend {
    let Some(last) = deltas.last() else {
        return Trend::InsufficientHistory;
    };

    let declines = deltas.iter().rev().take_while(|delta| **delta < 0.0).count();
    if declines >= 2 {
        let start = &scored[scored.len() - 1 - declines];
        let end = &scored[scored.len() - 1];
        if end.injury_rate > start.injury_rate {
            return Trend::SystemicDegradation;
        }
    }

    if *last < -epsilon {
        Trend::Declining
    } else if *last > epsilon {
        Trend::Improving
    } else {
        Trend::Stable
    }
}
