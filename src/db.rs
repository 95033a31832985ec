use std::str::FromStr;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::baseline::LeagueBaselines;
use crate::ingest::{self, Batch, BaselineRate, Keyed, RecordKind, ScopedProtocolChange};
use crate::models::{
    InjuryEvent, InjuryType, NutritionLog, PlayerRecord, ProtocolChange, RecordSet,
    RecoveryReading, Season, TrainingSession,
};
use crate::seed;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Loads the demo organization and its league baselines. Safe to rerun.
pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let records = seed::demo_records();
    let mut inserted = 0usize;

    for player in &records.players {
        upsert_player(pool, player).await?;
    }
    for injury in records.injuries {
        let source_key = format!(
            "seed-injury-{}-{}-{}",
            injury.player_id, injury.date, injury.injury_type
        );
        inserted += insert_injury(pool, &Keyed { source_key, record: injury }).await?;
    }
    for session in records.training {
        let source_key = format!("seed-training-{}-{}", session.player_id, session.date);
        inserted += insert_training(pool, &Keyed { source_key, record: session }).await?;
    }
    for reading in records.recovery {
        let source_key = format!("seed-recovery-{}-{}", reading.player_id, reading.date);
        inserted += insert_recovery(pool, &Keyed { source_key, record: reading }).await?;
    }
    for log in records.nutrition {
        let source_key = format!("seed-nutrition-{}-{}", log.player_id, log.date);
        inserted += insert_nutrition(pool, &Keyed { source_key, record: log }).await?;
    }
    for change in records.protocol_changes {
        let source_key = format!(
            "seed-protocol-{}-{}-{}",
            change.position_group, change.season, change.date
        );
        let record = ScopedProtocolChange {
            organization_id: seed::DEMO_ORGANIZATION.to_string(),
            change,
        };
        inserted += insert_protocol_change(pool, &Keyed { source_key, record }).await?;
    }

    let baselines = seed::demo_baselines();
    for (season, rates) in baselines.seasons {
        for (position_group, rate) in rates {
            upsert_baseline(
                pool,
                &BaselineRate {
                    position_group,
                    season,
                    rate,
                },
            )
            .await?;
        }
    }

    tracing::info!(inserted, "seed records written");
    Ok(inserted)
}

pub async fn import_csv(
    pool: &PgPool,
    kind: RecordKind,
    csv_path: &std::path::Path,
    season_start_month: u32,
) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let batch = ingest::read_csv(kind, file, season_start_month)
        .with_context(|| format!("rejected {}", csv_path.display()))?;
    tracing::info!(?kind, rows = batch.len(), "importing csv");

    let mut inserted = 0usize;
    match batch {
        Batch::Players(players) => {
            for player in &players {
                inserted += upsert_player(pool, player).await?;
            }
        }
        Batch::Injuries(rows) => {
            for row in &rows {
                inserted += insert_injury(pool, row).await?;
            }
        }
        Batch::Training(rows) => {
            for row in &rows {
                inserted += insert_training(pool, row).await?;
            }
        }
        Batch::Recovery(rows) => {
            for row in &rows {
                inserted += insert_recovery(pool, row).await?;
            }
        }
        Batch::Nutrition(rows) => {
            for row in &rows {
                inserted += insert_nutrition(pool, row).await?;
            }
        }
        Batch::Protocols(rows) => {
            for row in &rows {
                inserted += insert_protocol_change(pool, row).await?;
            }
        }
        Batch::Baselines(rows) => {
            for row in &rows {
                inserted += upsert_baseline(pool, row).await?;
            }
        }
    }

    Ok(inserted)
}

async fn upsert_player(pool: &PgPool, player: &PlayerRecord) -> anyhow::Result<usize> {
    let result = sqlx::query(
        r#"
        INSERT INTO athletic_coherence.players
        (id, organization_id, full_name, position_group, first_season, last_season)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO UPDATE
        SET organization_id = EXCLUDED.organization_id,
            full_name = EXCLUDED.full_name,
            position_group = EXCLUDED.position_group,
            first_season = EXCLUDED.first_season,
            last_season = EXCLUDED.last_season
        "#,
    )
    .bind(player.player_id)
    .bind(&player.organization_id)
    .bind(&player.name)
    .bind(&player.position_group)
    .bind(player.first_season)
    .bind(player.last_season)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn insert_injury(pool: &PgPool, row: &Keyed<InjuryEvent>) -> anyhow::Result<usize> {
    let injury = &row.record;
    let days_missed = i32::try_from(injury.days_missed).context("days_missed out of range")?;
    let result = sqlx::query(
        r#"
        INSERT INTO athletic_coherence.injury_events
        (id, player_id, season, injury_type, body_part, season_ending, occurred_on, days_missed, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(injury.player_id)
    .bind(injury.season)
    .bind(injury.injury_type.as_str())
    .bind(&injury.body_part)
    .bind(injury.season_ending)
    .bind(injury.date)
    .bind(days_missed)
    .bind(&row.source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn insert_training(pool: &PgPool, row: &Keyed<TrainingSession>) -> anyhow::Result<usize> {
    let session = &row.record;
    let result = sqlx::query(
        r#"
        INSERT INTO athletic_coherence.training_sessions
        (id, player_id, session_date, load, intensity, source_key)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(session.player_id)
    .bind(session.date)
    .bind(session.load)
    .bind(session.intensity)
    .bind(&row.source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn insert_recovery(pool: &PgPool, row: &Keyed<RecoveryReading>) -> anyhow::Result<usize> {
    let reading = &row.record;
    let result = sqlx::query(
        r#"
        INSERT INTO athletic_coherence.recovery_readings
        (id, player_id, reading_date, self_readiness, objective_readiness, peer_concern, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(reading.player_id)
    .bind(reading.date)
    .bind(reading.self_readiness)
    .bind(reading.objective_readiness)
    .bind(reading.peer_concern)
    .bind(&row.source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn insert_nutrition(pool: &PgPool, row: &Keyed<NutritionLog>) -> anyhow::Result<usize> {
    let log = &row.record;
    let result = sqlx::query(
        r#"
        INSERT INTO athletic_coherence.nutrition_logs
        (id, player_id, log_date, collagen_g, omega_ratio, protein_timing, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(log.player_id)
    .bind(log.date)
    .bind(log.collagen_g)
    .bind(log.omega_ratio)
    .bind(log.protein_timing)
    .bind(&row.source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn insert_protocol_change(
    pool: &PgPool,
    row: &Keyed<ScopedProtocolChange>,
) -> anyhow::Result<usize> {
    let change = &row.record.change;
    let result = sqlx::query(
        r#"
        INSERT INTO athletic_coherence.protocol_changes
        (id, organization_id, position_group, season, changed_on, description, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&row.record.organization_id)
    .bind(&change.position_group)
    .bind(change.season)
    .bind(change.date)
    .bind(&change.description)
    .bind(&row.source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

async fn upsert_baseline(pool: &PgPool, rate: &BaselineRate) -> anyhow::Result<usize> {
    let result = sqlx::query(
        r#"
        INSERT INTO athletic_coherence.league_baselines (position_group, season, injury_rate)
        VALUES ($1, $2, $3)
        ON CONFLICT (position_group, season) DO UPDATE
        SET injury_rate = EXCLUDED.injury_rate
        "#,
    )
    .bind(&rate.position_group)
    .bind(rate.season)
    .bind(rate.rate)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

/// First and last calendar day of the seasons `from..=to`, widened by one
/// season at the front. ρ and protocol comparisons for `from` read that
/// prior season.
fn date_window(from: Season, to: Season, season_start_month: u32) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(from - 1, season_start_month, 1)
        .context("invalid season window start")?;
    let end = NaiveDate::from_ymd_opt(to + 1, season_start_month, 1)
        .and_then(|date| date.pred_opt())
        .context("invalid season window end")?;
    Ok((start, end))
}

/// Every record for `organization_id` relevant to the seasons `from..=to`.
pub async fn fetch_records(
    pool: &PgPool,
    organization_id: &str,
    from: Season,
    to: Season,
    season_start_month: u32,
) -> anyhow::Result<RecordSet> {
    let (start, end) = date_window(from, to, season_start_month)?;
    let mut records = RecordSet::default();

    let rows = sqlx::query(
        "SELECT id, organization_id, full_name, position_group, first_season, last_season \
         FROM athletic_coherence.players \
         WHERE organization_id = $1 AND first_season <= $3 AND last_season >= $2 \
         ORDER BY id",
    )
    .bind(organization_id)
    .bind(from - 1)
    .bind(to)
    .fetch_all(pool)
    .await?;
    for row in rows {
        records.players.push(PlayerRecord {
            player_id: row.get("id"),
            organization_id: row.get("organization_id"),
            name: row.get("full_name"),
            position_group: row.get("position_group"),
            first_season: row.get("first_season"),
            last_season: row.get("last_season"),
        });
    }

    let rows = sqlx::query(
        "SELECT i.player_id, i.season, i.injury_type, i.body_part, i.season_ending, \
         i.occurred_on, i.days_missed \
         FROM athletic_coherence.injury_events i \
         JOIN athletic_coherence.players p ON p.id = i.player_id \
         WHERE p.organization_id = $1 AND i.season BETWEEN $2 AND $3 \
         ORDER BY i.occurred_on, i.source_key",
    )
    .bind(organization_id)
    .bind(from - 1)
    .bind(to)
    .fetch_all(pool)
    .await?;
    for row in rows {
        let injury_type: String = row.get("injury_type");
        let days_missed: i32 = row.get("days_missed");
        records.injuries.push(InjuryEvent {
            player_id: row.get("player_id"),
            season: row.get("season"),
            injury_type: InjuryType::from_str(&injury_type).map_err(anyhow::Error::msg)?,
            body_part: row.get("body_part"),
            season_ending: row.get("season_ending"),
            date: row.get("occurred_on"),
            days_missed: u32::try_from(days_missed).context("negative days_missed")?,
        });
    }

    let rows = sqlx::query(
        "SELECT t.player_id, t.session_date, t.load, t.intensity \
         FROM athletic_coherence.training_sessions t \
         JOIN athletic_coherence.players p ON p.id = t.player_id \
         WHERE p.organization_id = $1 AND t.session_date BETWEEN $2 AND $3 \
         ORDER BY t.session_date, t.source_key",
    )
    .bind(organization_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    for row in rows {
        records.training.push(TrainingSession {
            player_id: row.get("player_id"),
            date: row.get("session_date"),
            load: row.get("load"),
            intensity: row.get("intensity"),
        });
    }

    let rows = sqlx::query(
        "SELECT r.player_id, r.reading_date, r.self_readiness, r.objective_readiness, r.peer_concern \
         FROM athletic_coherence.recovery_readings r \
         JOIN athletic_coherence.players p ON p.id = r.player_id \
         WHERE p.organization_id = $1 AND r.reading_date BETWEEN $2 AND $3 \
         ORDER BY r.reading_date, r.source_key",
    )
    .bind(organization_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    for row in rows {
        records.recovery.push(RecoveryReading {
            player_id: row.get("player_id"),
            date: row.get("reading_date"),
            self_readiness: row.get("self_readiness"),
            objective_readiness: row.get("objective_readiness"),
            peer_concern: row.get("peer_concern"),
        });
    }

    let rows = sqlx::query(
        "SELECT n.player_id, n.log_date, n.collagen_g, n.omega_ratio, n.protein_timing \
         FROM athletic_coherence.nutrition_logs n \
         JOIN athletic_coherence.players p ON p.id = n.player_id \
         WHERE p.organization_id = $1 AND n.log_date BETWEEN $2 AND $3 \
         ORDER BY n.log_date, n.source_key",
    )
    .bind(organization_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    for row in rows {
        records.nutrition.push(NutritionLog {
            player_id: row.get("player_id"),
            date: row.get("log_date"),
            collagen_g: row.get("collagen_g"),
            omega_ratio: row.get("omega_ratio"),
            protein_timing: row.get("protein_timing"),
        });
    }

    let rows = sqlx::query(
        "SELECT position_group, season, changed_on, description \
         FROM athletic_coherence.protocol_changes \
         WHERE organization_id = $1 AND season BETWEEN $2 AND $3 \
         ORDER BY changed_on, source_key",
    )
    .bind(organization_id)
    .bind(from - 1)
    .bind(to)
    .fetch_all(pool)
    .await?;
    for row in rows {
        records.protocol_changes.push(ProtocolChange {
            position_group: row.get("position_group"),
            season: row.get("season"),
            date: row.get("changed_on"),
            description: row.get("description"),
        });
    }

    tracing::debug!(
        organization_id,
        players = records.players.len(),
        injuries = records.injuries.len(),
        "fetched records"
    );
    Ok(records)
}

pub async fn fetch_baselines(pool: &PgPool) -> anyhow::Result<LeagueBaselines> {
    let rows = sqlx::query(
        "SELECT position_group, season, injury_rate FROM athletic_coherence.league_baselines",
    )
    .fetch_all(pool)
    .await?;

    let mut baselines = LeagueBaselines::default();
    for row in rows {
        let season: Season = row.get("season");
        baselines
            .seasons
            .entry(season)
            .or_default()
            .insert(row.get("position_group"), row.get("injury_rate"));
    }
    Ok(baselines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_window_covers_prior_season() {
        let (start, end) = date_window(2023, 2024, 7).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2022, 7, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
    }
}
