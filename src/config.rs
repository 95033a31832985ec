use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::baseline::LeagueBaselines;
use crate::error::ConfigError;
use crate::models::{Dimension, InjuryType};

const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");

/// Position factor assumed for groups missing from `position_factors`.
pub const NEUTRAL_POSITION_FACTOR: f64 = 0.5;

const MAX_WINDOW_DAYS: i64 = 366;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub peak_load_factor: f64,
    pub recovery_intensity: f64,
    pub ideal_recovery_gap_days: i64,
    pub max_misalignment_days: i64,
    pub unchanged_protocol_rho: f64,
    pub strain_capacity: f64,
    pub recovery_credit_per_point: f64,
    pub ratio_cap: f64,
    pub prescribed_min_days: BTreeMap<InjuryType, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub injury_rate_ratio: f64,
    pub consecutive_seasons: usize,
    pub sustainable_ratio: f64,
    pub divergence_threshold: f64,
    pub reinjury_window_days: i64,
    pub reinjury_rate: f64,
    pub soft_tissue_share: f64,
    pub nutrition_shortfall: f64,
    pub confidence_prior: f64,
    /// Relative change in injury rate a protocol change must produce before
    /// it is called effective or ineffective.
    pub protocol_effect_threshold: f64,
    /// Smallest prior-season injury rate used as the denominator of that
    /// relative change.
    pub protocol_rate_floor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionTargets {
    pub collagen_g: f64,
    pub omega_ratio: f64,
    pub protein_timing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionWeights {
    pub psi: f64,
    pub rho: f64,
    pub q: f64,
    pub f: f64,
    pub tau: f64,
}

impl DimensionWeights {
    /// λ is a normalization factor, not a coherence measure, so it carries no weight.
    pub fn weight(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Psi => self.psi,
            Dimension::Rho => self.rho,
            Dimension::Q => self.q,
            Dimension::F => self.f,
            Dimension::Tau => self.tau,
            Dimension::Lambda => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentConfig {
    pub season_start_month: u32,
    pub min_occurrences: usize,
    pub threshold_fraction: f64,
    pub trend_epsilon: f64,
    pub scoring: ScoringConfig,
    pub patterns: PatternConfig,
    pub nutrition_targets: NutritionTargets,
    pub weights: DimensionWeights,
    pub position_factors: BTreeMap<String, f64>,
    pub league_baselines: LeagueBaselines,
}

impl AssessmentConfig {
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml_str("")
    }

    /// Parses `overrides` and merges it over the built-in defaults.
    pub fn from_yaml_str(overrides: &str) -> Result<Self, ConfigError> {
        let mut merged: Value = serde_yaml::from_str(DEFAULT_CONFIG_YAML)?;
        if !overrides.trim().is_empty() {
            let overlay: Value = serde_yaml::from_str(overrides)?;
            merge_yaml(&mut merged, overlay);
        }
        let config: AssessmentConfig = serde_yaml::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Self::from_yaml_str(&contents)
            }
            None => Self::builtin(),
        }
    }

    pub fn position_factor(&self, position_group: &str) -> f64 {
        self.position_factors
            .get(position_group)
            .copied()
            .unwrap_or(NEUTRAL_POSITION_FACTOR)
    }

    /// Scales q capacity and τ prescriptions: 1.0 at the neutral factor,
    /// higher for physically more demanding groups.
    pub fn threshold_multiplier(&self, position_group: &str) -> f64 {
        1.0 + (self.position_factor(position_group) - NEUTRAL_POSITION_FACTOR)
    }

    pub fn prescribed_min_days(&self, injury_type: InjuryType) -> u32 {
        self.scoring
            .prescribed_min_days
            .get(&injury_type)
            .copied()
            .unwrap_or(1)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if !(1..=12).contains(&self.season_start_month) {
            return invalid(format!(
                "season_start_month must be 1-12, got {}",
                self.season_start_month
            ));
        }
        if self.min_occurrences == 0 {
            return invalid("min_occurrences must be at least 1".to_string());
        }
        for (name, value) in [
            ("threshold_fraction", self.threshold_fraction),
            ("scoring.recovery_intensity", self.scoring.recovery_intensity),
            ("scoring.unchanged_protocol_rho", self.scoring.unchanged_protocol_rho),
            ("patterns.reinjury_rate", self.patterns.reinjury_rate),
            ("patterns.soft_tissue_share", self.patterns.soft_tissue_share),
            ("patterns.nutrition_shortfall", self.patterns.nutrition_shortfall),
            ("patterns.protocol_effect_threshold", self.patterns.protocol_effect_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        for (name, value) in [
            ("scoring.peak_load_factor", self.scoring.peak_load_factor),
            ("scoring.strain_capacity", self.scoring.strain_capacity),
            ("scoring.recovery_credit_per_point", self.scoring.recovery_credit_per_point),
            ("scoring.ratio_cap", self.scoring.ratio_cap),
            ("patterns.injury_rate_ratio", self.patterns.injury_rate_ratio),
            ("patterns.sustainable_ratio", self.patterns.sustainable_ratio),
            ("patterns.divergence_threshold", self.patterns.divergence_threshold),
            ("patterns.confidence_prior", self.patterns.confidence_prior),
            ("patterns.protocol_rate_floor", self.patterns.protocol_rate_floor),
            ("nutrition_targets.collagen_g", self.nutrition_targets.collagen_g),
            ("nutrition_targets.omega_ratio", self.nutrition_targets.omega_ratio),
            ("nutrition_targets.protein_timing", self.nutrition_targets.protein_timing),
        ] {
            if !(value > 0.0) {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }
        if self.scoring.max_misalignment_days <= 0 {
            return invalid("scoring.max_misalignment_days must be positive".to_string());
        }
        if self.scoring.ideal_recovery_gap_days < 0 || self.patterns.reinjury_window_days < 0 {
            return invalid("day windows must not be negative".to_string());
        }
        if self.patterns.reinjury_window_days > MAX_WINDOW_DAYS
            || self.scoring.max_misalignment_days > MAX_WINDOW_DAYS
        {
            return invalid(format!("day windows must not exceed {MAX_WINDOW_DAYS} days"));
        }
        if self.patterns.consecutive_seasons == 0 {
            return invalid("patterns.consecutive_seasons must be at least 1".to_string());
        }
        for injury_type in [
            InjuryType::SoftTissue,
            InjuryType::Structural,
            InjuryType::Chronic,
        ] {
            match self.scoring.prescribed_min_days.get(&injury_type) {
                Some(days) if *days > 0 => {}
                _ => {
                    return invalid(format!(
                        "scoring.prescribed_min_days.{injury_type} must be positive"
                    ))
                }
            }
        }
        for (group, factor) in &self.position_factors {
            if !(0.0..=1.0).contains(factor) {
                return invalid(format!(
                    "position factor for {group} must be within [0, 1], got {factor}"
                ));
            }
        }

        let weights = [
            self.weights.psi,
            self.weights.rho,
            self.weights.q,
            self.weights.f,
            self.weights.tau,
        ];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return invalid("dimension weights must be non-negative".to_string());
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return invalid("at least one dimension weight must be positive".to_string());
        }

        Ok(())
    }
}

fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::BaselineProvider;

    #[test]
    fn builtin_config_matches_documented_defaults() {
        let config = AssessmentConfig::builtin().unwrap();
        assert_eq!(config.min_occurrences, 3);
        assert_eq!(config.threshold_fraction, 0.3);
        assert_eq!(config.patterns.injury_rate_ratio, 3.0);
        assert_eq!(config.patterns.consecutive_seasons, 2);
        assert_eq!(config.patterns.sustainable_ratio, 1.4);
        assert_eq!(config.patterns.divergence_threshold, 1.5);
        assert_eq!(config.patterns.reinjury_rate, 0.5);
        assert_eq!(config.patterns.protocol_effect_threshold, 0.1);
        assert_eq!(config.prescribed_min_days(InjuryType::Structural), 42);
        assert_eq!(
            config.league_baselines.injury_rate("defensive_line", 2024),
            Some(0.8)
        );
    }

    #[test]
    fn overrides_merge_over_defaults() {
        let config = AssessmentConfig::from_yaml_str(
            "min_occurrences: 5\npatterns:\n  sustainable_ratio: 1.2\n",
        )
        .unwrap();
        assert_eq!(config.min_occurrences, 5);
        assert_eq!(config.patterns.sustainable_ratio, 1.2);
        assert_eq!(config.patterns.divergence_threshold, 1.5);
    }

    #[test]
    fn rejects_fraction_outside_unit_interval() {
        let err = AssessmentConfig::from_yaml_str("threshold_fraction: 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_all_zero_weights() {
        let err = AssessmentConfig::from_yaml_str(
            "weights:\n  psi: 0\n  rho: 0\n  q: 0\n  f: 0\n  tau: 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_reinjury_window_longer_than_a_season() {
        let err = AssessmentConfig::from_yaml_str("patterns:\n  reinjury_window_days: 100000000000000\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_protocol_rate_floor() {
        let err = AssessmentConfig::from_yaml_str("patterns:\n  protocol_rate_floor: 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_group_uses_neutral_multiplier() {
        let config = AssessmentConfig::builtin().unwrap();
        assert_eq!(config.threshold_multiplier("mascots"), 1.0);
        assert!((config.threshold_multiplier("defensive_line") - 1.3).abs() < 1e-9);
    }
}
