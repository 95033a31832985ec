use chrono::{Duration, NaiveDate};
use uuid::Uuid;

use crate::baseline::LeagueBaselines;
use crate::models::{
    InjuryEvent, InjuryType, NutritionLog, PlayerRecord, ProtocolChange, RecordSet,
    RecoveryReading, Season, TrainingSession,
};

pub const DEMO_ORGANIZATION: &str = "lions";
pub const DEMO_SEASONS: [Season; 3] = [2022, 2023, 2024];

const FIRST_NAMES: [&str; 8] = [
    "Avery", "Jules", "Kiara", "Marcus", "Dion", "Tevita", "Rashad", "Eli",
];
const LAST_NAMES: [&str; 6] = ["Lee", "Moreno", "Patel", "Okafor", "Reyes", "Fonoti"];

/// Position groups with (id offset, roster size).
const GROUPS: [(&str, u128, u128); 4] = [
    ("defensive_line", 0x100, 10),
    ("secondary", 0x200, 8),
    ("linebackers", 0x300, 6),
    ("quarterbacks", 0x400, 3),
];

fn player_id(offset: u128, n: u128) -> Uuid {
    Uuid::from_u128(0x5eed_0000_0000_0000_0000_0000_0000_0000 | (offset + n))
}

fn season_day(season: Season, offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(season, 8, 1).unwrap_or_default() + Duration::days(offset)
}

/// A three-season organization whose defensive line runs far above the
/// league injury rate, with secondary players self-reporting readiness well
/// above what testing shows.
pub fn demo_records() -> RecordSet {
    let mut records = RecordSet::default();

    for (group, offset, size) in GROUPS {
        for n in 0..size {
            let name = format!(
                "{} {}",
                FIRST_NAMES[(offset as usize + n as usize) % FIRST_NAMES.len()],
                LAST_NAMES[(n as usize * 5 + offset as usize / 0x100) % LAST_NAMES.len()]
            );
            records.players.push(PlayerRecord {
                player_id: player_id(offset, n),
                organization_id: DEMO_ORGANIZATION.to_string(),
                name,
                position_group: group.to_string(),
                first_season: 2022,
                last_season: 2024,
            });
        }
    }

    for season in DEMO_SEASONS {
        // Eight of ten linemen lose time to soft-tissue injuries every season.
        for n in 0..8 {
            records.injuries.push(InjuryEvent {
                player_id: player_id(0x100, n),
                season,
                injury_type: InjuryType::SoftTissue,
                body_part: if n % 2 == 0 { "hamstring" } else { "groin" }.to_string(),
                season_ending: false,
                date: season_day(season, 14 + n as i64 * 9),
                days_missed: 12 + n as u32,
            });
        }
        records.injuries.push(InjuryEvent {
            player_id: player_id(0x300, season as u128 % 6),
            season,
            injury_type: InjuryType::Structural,
            body_part: "shoulder".to_string(),
            season_ending: false,
            date: season_day(season, 60),
            days_missed: 45,
        });
    }

    // Secondary: returns after two weeks, hurt again inside the window.
    for n in 0..4 {
        for (offset, days_missed) in [(20, 14), (41, 14), (62, 16)] {
            records.injuries.push(InjuryEvent {
                player_id: player_id(0x200, n),
                season: 2024,
                injury_type: InjuryType::Structural,
                body_part: "ankle".to_string(),
                season_ending: false,
                date: season_day(2024, offset + n as i64),
                days_missed,
            });
        }
    }

    for (group, offset, size) in GROUPS {
        for n in 0..size {
            let id = player_id(offset, n);
            for season in DEMO_SEASONS {
                for week in 0..12i64 {
                    let heavy = group == "defensive_line" && week % 3 == 2;
                    records.training.push(TrainingSession {
                        player_id: id,
                        date: season_day(season, week * 7),
                        load: if heavy { 1400.0 } else { 450.0 + (week % 3) as f64 * 120.0 },
                        intensity: if heavy { 0.9 } else { 0.55 },
                    });
                    if !heavy {
                        records.training.push(TrainingSession {
                            player_id: id,
                            date: season_day(season, week * 7 + 2),
                            load: 180.0,
                            intensity: 0.2,
                        });
                    }
                }
            }

            // The defensive line only checks in once a week.
            let days: &[i64] = if group == "defensive_line" { &[1] } else { &[1, 4] };
            let (self_readiness, objective) = if group == "secondary" {
                (8.2, 6.1)
            } else {
                (7.0, 6.8)
            };
            for week in 0..12i64 {
                for day in days {
                    records.recovery.push(RecoveryReading {
                        player_id: id,
                        date: season_day(2024, week * 7 + day),
                        self_readiness,
                        objective_readiness: Some(objective),
                        peer_concern: (group == "defensive_line").then_some(4.0),
                    });
                }
            }

            let collagen_g = if group == "defensive_line" { 9.0 } else { 16.0 };
            for week in 0..6i64 {
                records.nutrition.push(NutritionLog {
                    player_id: id,
                    date: season_day(2024, week * 7 + 3),
                    collagen_g,
                    omega_ratio: 0.3,
                    protein_timing: 7.5,
                });
            }
        }
    }

    records.protocol_changes.push(ProtocolChange {
        position_group: "secondary".to_string(),
        season: 2024,
        date: season_day(2024, 0),
        description: "Added return-to-play objective testing".to_string(),
    });

    records
}

/// League injury rates the demo organization is compared against.
pub fn demo_baselines() -> LeagueBaselines {
    let mut baselines = LeagueBaselines::default();
    for season in DEMO_SEASONS {
        let rates = baselines.seasons.entry(season).or_default();
        rates.insert("defensive_line".to_string(), 0.25);
        rates.insert("secondary".to_string(), 0.3);
        rates.insert("linebackers".to_string(), 0.3);
        rates.insert("quarterbacks".to_string(), 0.2);
    }
    baselines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assess::{assess, AssessmentStatus};
    use crate::config::AssessmentConfig;
    use crate::ingest::validate_record_set;

    #[test]
    fn demo_records_are_valid_and_stable() {
        let records = demo_records();
        validate_record_set(&records, 7).unwrap();
        assert_eq!(records, demo_records());
        assert_eq!(records.players.len(), 27);
    }

    #[test]
    fn demo_organization_flags_the_defensive_line() {
        let config = AssessmentConfig::builtin().unwrap();
        let result = assess(
            DEMO_ORGANIZATION,
            &DEMO_SEASONS,
            &demo_records(),
            &demo_baselines(),
            &config,
        )
        .unwrap();

        assert_eq!(result.status, AssessmentStatus::Complete);
        assert!(result
            .systemic_flags()
            .any(|flag| flag.position_groups.contains("defensive_line")));
        assert!(result
            .systemic_flags()
            .all(|flag| !flag.position_groups.contains("quarterbacks")));
        assert!(result.coherence.current.is_some());
    }
}
