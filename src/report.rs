use std::fmt::Write;

use crate::assess::{AssessmentResult, AssessmentStatus};
use crate::coherence::{CoherenceStatus, SeasonCoherence, Trend};
use crate::models::{Dimension, SystemicFlag};
use crate::patterns::{self, LoadInjuryLink, ProtocolVerdict};

const REPORTED: [Dimension; 5] = [
    Dimension::Psi,
    Dimension::Rho,
    Dimension::Q,
    Dimension::F,
    Dimension::Tau,
];

/// Status label for a dimension mean. Strain reads the other way round and
/// recovery depth has its own scale.
pub fn dimension_status(dimension: Dimension, value: f64) -> &'static str {
    match dimension {
        Dimension::Q => {
            if value > 0.8 {
                "CRITICAL"
            } else if value > 0.6 {
                "ELEVATED"
            } else if value > 0.4 {
                "WATCH"
            } else {
                "NOMINAL"
            }
        }
        Dimension::Tau => {
            if value < 0.3 {
                "CRITICAL"
            } else if value < 0.5 {
                "SHALLOW"
            } else if value < 0.7 {
                "WATCH"
            } else {
                "ADEQUATE"
            }
        }
        _ => {
            if value < 0.4 {
                "CRITICAL"
            } else if value < 0.6 {
                "WATCH"
            } else if value > 0.8 {
                "STRONG"
            } else {
                "NOMINAL"
            }
        }
    }
}

fn trend_label(trend: Trend) -> &'static str {
    match trend {
        Trend::Improving => "improving",
        Trend::Stable => "stable",
        Trend::Declining => "declining",
        Trend::SystemicDegradation => "systemic degradation",
        Trend::InsufficientHistory => "insufficient history",
    }
}

fn status_label(status: CoherenceStatus) -> &'static str {
    match status {
        CoherenceStatus::Critical => "CRITICAL",
        CoherenceStatus::Watch => "WATCH",
        CoherenceStatus::Nominal => "NOMINAL",
    }
}

fn link_label(link: LoadInjuryLink) -> &'static str {
    match link {
        LoadInjuryLink::Weak => "weak",
        LoadInjuryLink::Moderate => "moderate",
        LoadInjuryLink::Strong => "strong",
    }
}

fn verdict_label(verdict: ProtocolVerdict) -> &'static str {
    match verdict {
        ProtocolVerdict::Effective => "EFFECTIVE",
        ProtocolVerdict::Ineffective => "INEFFECTIVE",
        ProtocolVerdict::NoClearEffect => "NO CLEAR EFFECT",
    }
}

fn latest_season(result: &AssessmentResult) -> Option<&SeasonCoherence> {
    result.coherence.seasons.last()
}

fn write_flag(output: &mut String, flag: &SystemicFlag) {
    let _ = writeln!(output, "- **{}** [{}] {}", flag.id, flag.severity, flag.description);
    let groups: Vec<&str> = flag.position_groups.iter().map(String::as_str).collect();
    let _ = writeln!(
        output,
        "  - Affected: {} ({} of {} players, confidence {:.0}%)",
        groups.join(", "),
        flag.support_count,
        flag.group_size,
        flag.confidence * 100.0
    );
    let _ = writeln!(output, "  - Hypothesis: {}", flag.hypothesis);
    if !flag.investigation_areas.is_empty() {
        let _ = writeln!(
            output,
            "  - Investigate: {}",
            flag.investigation_areas.join("; ")
        );
    }
}

pub fn build_report(result: &AssessmentResult) -> String {
    let mut output = String::new();
    let seasons: Vec<String> = result.seasons.iter().map(|season| season.to_string()).collect();
    let sources = &result.data_sources;

    let _ = writeln!(output, "# Athletic Coherence Report");
    let _ = writeln!(
        output,
        "Generated for {} (seasons {})",
        result.organization_id,
        if seasons.is_empty() { "none".to_string() } else { seasons.join(", ") }
    );
    let _ = writeln!(
        output,
        "Data sources: {} players, {} injuries, {} training sessions, {} recovery readings, {} nutrition logs, {} protocol changes",
        sources.players,
        sources.injuries,
        sources.training_sessions,
        sources.recovery_readings,
        sources.nutrition_logs,
        sources.protocol_changes
    );
    let _ = writeln!(output);

    if result.status == AssessmentStatus::InsufficientData {
        let _ = writeln!(output, "## Insufficient Data");
        let _ = writeln!(
            output,
            "No injury, training, recovery or nutrition records were found for these seasons. No score or flags were produced."
        );
        return output;
    }

    let _ = writeln!(output, "## Physical Coherence");
    match (result.coherence.current, result.coherence.status) {
        (Some(score), Some(status)) => {
            let _ = writeln!(
                output,
                "Score {:.2} / 1.0 [{}], trend {}",
                score,
                status_label(status),
                trend_label(result.coherence.trend)
            );
        }
        _ => {
            let season = result
                .coherence
                .current_season
                .map(|season| season.to_string())
                .unwrap_or_else(|| "the latest season".to_string());
            let _ = writeln!(output, "No dimension had enough data to score {season}.");
        }
    }
    for season in &result.coherence.seasons {
        match season.score {
            Some(score) => {
                let _ = writeln!(
                    output,
                    "- {}: {:.2} across {} players (injury rate {:.2})",
                    season.season, score, season.players_scored, season.injury_rate
                );
            }
            None => {
                let _ = writeln!(output, "- {}: insufficient data", season.season);
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Dimension Breakdown");
    if let Some(latest) = latest_season(result) {
        let _ = writeln!(output, "Season {}", latest.season);
        for dimension in REPORTED {
            match latest.dimension_means.get(&dimension) {
                Some(mean) => {
                    let _ = writeln!(
                        output,
                        "- {} ({}): {:.2} [{}]",
                        dimension.symbol(),
                        dimension.label(),
                        mean,
                        dimension_status(dimension, *mean)
                    );
                }
                None => {
                    let _ = writeln!(
                        output,
                        "- {} ({}): insufficient data",
                        dimension.symbol(),
                        dimension.label()
                    );
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Position Groups");
    if result.position_groups.is_empty() {
        let _ = writeln!(output, "No position groups with rostered players.");
    } else {
        for summary in &result.position_groups {
            let versus = summary
                .injury_rate_vs_league
                .map(|ratio| format!(" ({:.0}% of league)", ratio * 100.0))
                .unwrap_or_default();
            let load = summary
                .load_recovery_ratio
                .map(|ratio| format!("{ratio:.2}"))
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                output,
                "- {}: {} players, injury rate {:.2}{}, load/recovery {}, soft tissue {:.0}%, re-injury {:.0}%",
                summary.position_group,
                summary.roster_size,
                summary.injury_rate,
                versus,
                load,
                summary.soft_tissue_rate * 100.0,
                summary.reinjury_rate * 100.0
            );
            if let Some(coherence) = summary.periodization_coherence {
                let link = summary
                    .load_injury_link
                    .map(|link| format!(", load/injury link {}", link_label(link)))
                    .unwrap_or_default();
                let _ = writeln!(output, "  - Periodization {coherence:.2}{link}");
            }
        }
    }

    let systemic: Vec<&SystemicFlag> = result.systemic_flags().collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Systemic Flags");
    if systemic.is_empty() {
        let _ = writeln!(output, "No organizational patterns met the systemic threshold.");
    } else {
        for flag in systemic {
            write_flag(&mut output, flag);
        }
    }

    let individual: Vec<&SystemicFlag> =
        result.flags.iter().filter(|flag| !flag.is_systemic()).collect();
    if !individual.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Individual Observations");
        for flag in individual {
            let _ = writeln!(
                output,
                "- {} ({} players): {}",
                flag.id, flag.support_count, flag.description
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Protocol Changes");
    if result.protocol_outcomes.is_empty() {
        let _ = writeln!(output, "No protocol changes with a prior season to compare against.");
    } else {
        for outcome in &result.protocol_outcomes {
            let _ = writeln!(
                output,
                "- {} {} ({}): {} [{}], injury rate {:.2} -> {:.2}",
                outcome.position_group,
                outcome.season,
                outcome.date,
                outcome.description,
                verdict_label(outcome.verdict),
                outcome.rate_before,
                outcome.rate_after
            );
        }
        for recommendation in patterns::protocol_recommendations(&result.protocol_outcomes) {
            let _ = writeln!(output, "- Recommendation: {recommendation}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## What This Assessment Does Not Determine");
    let _ = writeln!(output, "- Individual player medical decisions");
    let _ = writeln!(output, "- Contract implications");
    let _ = writeln!(output, "- Playing time allocation");
    let _ = writeln!(output, "- Personnel changes");

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assess::assess;
    use crate::config::AssessmentConfig;
    use crate::models::RecordSet;
    use crate::seed;

    #[test]
    fn strain_and_recovery_use_their_own_scales() {
        assert_eq!(dimension_status(Dimension::Q, 0.85), "CRITICAL");
        assert_eq!(dimension_status(Dimension::Q, 0.2), "NOMINAL");
        assert_eq!(dimension_status(Dimension::Tau, 0.45), "SHALLOW");
        assert_eq!(dimension_status(Dimension::Tau, 0.9), "ADEQUATE");
        assert_eq!(dimension_status(Dimension::Psi, 0.9), "STRONG");
        assert_eq!(dimension_status(Dimension::Rho, 0.5), "WATCH");
    }

    #[test]
    fn empty_assessment_renders_notice() {
        let config = AssessmentConfig::builtin().unwrap();
        let result = assess(
            "lions",
            &[2024],
            &RecordSet::default(),
            &seed::demo_baselines(),
            &config,
        )
        .unwrap();
        let report = build_report(&result);
        assert!(report.contains("## Insufficient Data"));
        assert!(!report.contains("## Systemic Flags"));
    }

    #[test]
    fn breakdown_follows_latest_requested_season() {
        let config = AssessmentConfig::builtin().unwrap();
        let mut records = seed::demo_records();
        records.injuries.retain(|injury| injury.season != 2024);
        records.training.clear();
        records.recovery.clear();
        records.nutrition.clear();
        let result = assess(
            seed::DEMO_ORGANIZATION,
            &seed::DEMO_SEASONS,
            &records,
            &seed::demo_baselines(),
            &config,
        )
        .unwrap();
        assert_eq!(result.coherence.current, None);

        let report = build_report(&result);
        assert!(report.contains("No dimension had enough data to score 2024."));
        assert!(report.contains("Season 2024"));
        assert!(report.contains("- 2024: insufficient data"));
    }

    #[test]
    fn demo_report_lists_systemic_flags() {
        let config = AssessmentConfig::builtin().unwrap();
        let result = assess(
            seed::DEMO_ORGANIZATION,
            &seed::DEMO_SEASONS,
            &seed::demo_records(),
            &seed::demo_baselines(),
            &config,
        )
        .unwrap();
        let report = build_report(&result);
        assert!(report.starts_with("# Athletic Coherence Report"));
        assert!(report.contains("## Dimension Breakdown"));
        assert!(report.contains("- defensive_line:"));
        assert!(report.contains("**RATE-DEFENSIVE_LINE"));
        assert!(report.contains("## Protocol Changes"));
        assert!(report.contains("Added return-to-play objective testing [INEFFECTIVE]"));
        assert!(report.contains("Review and revise protocols that showed decline"));
        assert!(report.contains("  - Periodization "));
        assert!(report.contains("What This Assessment Does Not Determine"));
    }
}
