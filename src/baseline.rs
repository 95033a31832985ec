use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::Season;

/// Source of league-average injury rates (injuries per player-season).
pub trait BaselineProvider: Sync {
    fn injury_rate(&self, position_group: &str, season: Season) -> Option<f64>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeagueBaselines {
    #[serde(default)]
    pub defaults: BTreeMap<String, f64>,
    #[serde(default)]
    pub seasons: BTreeMap<Season, BTreeMap<String, f64>>,
}

impl LeagueBaselines {
    /// Season-specific rates from `other` replace ours; group defaults too.
    pub fn overlay(&mut self, other: LeagueBaselines) {
        self.defaults.extend(other.defaults);
        for (season, rates) in other.seasons {
            self.seasons.entry(season).or_default().extend(rates);
        }
    }
}

impl BaselineProvider for LeagueBaselines {
    fn injury_rate(&self, position_group: &str, season: Season) -> Option<f64> {
        self.seasons
            .get(&season)
            .and_then(|rates| rates.get(position_group))
            .or_else(|| self.defaults.get(position_group))
            .copied()
            .filter(|rate| *rate > 0.0)
    }
}

impl BaselineProvider for BTreeMap<String, f64> {
    fn injury_rate(&self, position_group: &str, _season: Season) -> Option<f64> {
        self.get(position_group).copied().filter(|rate| *rate > 0.0)
    }
}
