use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::models::{
    season_for_date, DataSources, InjuryEvent, NutritionLog, PlayerRecord, ProtocolChange,
    RecordSet, RecoveryReading, Season, TrainingSession,
};

#[derive(Debug, Default)]
pub struct PlayerSeasonRecords<'a> {
    pub injuries: Vec<&'a InjuryEvent>,
    pub training: Vec<&'a TrainingSession>,
    pub recovery: Vec<&'a RecoveryReading>,
    pub nutrition: Vec<&'a NutritionLog>,
}

impl PlayerSeasonRecords<'_> {
    pub fn is_empty(&self) -> bool {
        self.injuries.is_empty()
            && self.training.is_empty()
            && self.recovery.is_empty()
            && self.nutrition.is_empty()
    }
}

/// Read-only lookup over one organization's records, bucketed by player and
/// season. Buckets are sorted by date.
#[derive(Debug)]
pub struct RecordIndex<'a> {
    players: BTreeMap<Uuid, &'a PlayerRecord>,
    buckets: BTreeMap<(Uuid, Season), PlayerSeasonRecords<'a>>,
    injuries_by_player: BTreeMap<Uuid, Vec<&'a InjuryEvent>>,
    protocol_changes: Vec<&'a ProtocolChange>,
    data_sources: DataSources,
    dropped: usize,
}

impl<'a> RecordIndex<'a> {
    pub fn build(organization_id: &str, records: &'a RecordSet, season_start_month: u32) -> Self {
        let players: BTreeMap<Uuid, &PlayerRecord> = records
            .players
            .iter()
            .filter(|player| player.organization_id == organization_id)
            .map(|player| (player.player_id, player))
            .collect();

        let mut index = RecordIndex {
            players,
            buckets: BTreeMap::new(),
            injuries_by_player: BTreeMap::new(),
            protocol_changes: Vec::new(),
            data_sources: DataSources::default(),
            dropped: 0,
        };
        index.data_sources.players = index.players.len();

        for injury in &records.injuries {
            if index.accepts(injury.player_id) {
                index.bucket(injury.player_id, injury.season).injuries.push(injury);
                index
                    .injuries_by_player
                    .entry(injury.player_id)
                    .or_default()
                    .push(injury);
                index.data_sources.injuries += 1;
            }
        }
        for session in &records.training {
            if index.accepts(session.player_id) {
                let season = season_for_date(session.date, season_start_month);
                index.bucket(session.player_id, season).training.push(session);
                index.data_sources.training_sessions += 1;
            }
        }
        for reading in &records.recovery {
            if index.accepts(reading.player_id) {
                let season = season_for_date(reading.date, season_start_month);
                index.bucket(reading.player_id, season).recovery.push(reading);
                index.data_sources.recovery_readings += 1;
            }
        }
        for log in &records.nutrition {
            if index.accepts(log.player_id) {
                let season = season_for_date(log.date, season_start_month);
                index.bucket(log.player_id, season).nutrition.push(log);
                index.data_sources.nutrition_logs += 1;
            }
        }
        index.protocol_changes = records.protocol_changes.iter().collect();
        index.protocol_changes.sort_by(|a, b| {
            (a.season, &a.position_group, a.date).cmp(&(b.season, &b.position_group, b.date))
        });
        index.data_sources.protocol_changes = records.protocol_changes.len();

        for bucket in index.buckets.values_mut() {
            bucket.injuries.sort_by_key(|injury| injury.date);
            bucket.training.sort_by_key(|session| session.date);
            bucket.recovery.sort_by_key(|reading| reading.date);
            bucket.nutrition.sort_by_key(|log| log.date);
        }
        for injuries in index.injuries_by_player.values_mut() {
            injuries.sort_by_key(|injury| injury.date);
        }

        index
    }

    fn accepts(&mut self, player_id: Uuid) -> bool {
        let known = self.players.contains_key(&player_id);
        if !known {
            self.dropped += 1;
        }
        known
    }

    fn bucket(&mut self, player_id: Uuid, season: Season) -> &mut PlayerSeasonRecords<'a> {
        self.buckets.entry((player_id, season)).or_default()
    }

    /// Records referencing players outside the organization roster.
    pub fn dropped_records(&self) -> usize {
        self.dropped
    }

    pub fn data_sources(&self) -> &DataSources {
        &self.data_sources
    }

    pub fn player(&self, player_id: Uuid) -> Option<&'a PlayerRecord> {
        self.players.get(&player_id).copied()
    }

    pub fn season_records(&self, player_id: Uuid, season: Season) -> Option<&PlayerSeasonRecords<'a>> {
        self.buckets.get(&(player_id, season))
    }

    pub fn groups(&self) -> BTreeSet<&'a str> {
        self.players
            .values()
            .map(|player| player.position_group.as_str())
            .collect()
    }

    pub fn roster(&self, position_group: &str, season: Season) -> Vec<&'a PlayerRecord> {
        self.players
            .values()
            .filter(|player| player.position_group == position_group && player.active_in(season))
            .copied()
            .collect()
    }

    pub fn active_players(&self, season: Season) -> usize {
        self.players
            .values()
            .filter(|player| player.active_in(season))
            .count()
    }

    pub fn group_injuries(&self, position_group: &str, season: Season) -> Vec<&'a InjuryEvent> {
        self.group_buckets(position_group, season)
            .flat_map(|bucket| bucket.injuries.iter().copied())
            .collect()
    }

    pub fn season_injuries(&self, season: Season) -> usize {
        self.buckets
            .iter()
            .filter(|((_, bucket_season), _)| *bucket_season == season)
            .map(|(_, bucket)| bucket.injuries.len())
            .sum()
    }

    /// Season buckets of every player in `position_group`, in player order.
    pub fn group_buckets<'s>(
        &'s self,
        position_group: &'s str,
        season: Season,
    ) -> impl Iterator<Item = &'s PlayerSeasonRecords<'a>> + 's {
        self.players
            .values()
            .filter(move |player| player.position_group == position_group)
            .filter_map(move |player| self.buckets.get(&(player.player_id, season)))
    }

    pub fn player_injuries(&self, player_id: Uuid) -> &[&'a InjuryEvent] {
        self.injuries_by_player
            .get(&player_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every accepted injury, grouped by player.
    pub fn injuries(&self) -> impl Iterator<Item = &'a InjuryEvent> + '_ {
        self.injuries_by_player.values().flatten().copied()
    }

    pub fn protocol_changed(&self, position_group: &str, season: Season) -> bool {
        self.protocol_changes
            .iter()
            .any(|change| change.season == season && change.position_group == position_group)
    }

    /// Protocol changes ordered by season, group and date.
    pub fn protocol_changes(&self) -> &[&'a ProtocolChange] {
        &self.protocol_changes
    }

    /// Whether any player holds a record dated in `season`.
    pub fn has_season(&self, season: Season) -> bool {
        self.buckets
            .iter()
            .any(|((_, bucket_season), bucket)| *bucket_season == season && !bucket.is_empty())
    }

    /// Player-seasons within `seasons` that hold at least one raw record.
    pub fn scorable(&self, seasons: &BTreeSet<Season>) -> Vec<(&'a PlayerRecord, Season)> {
        self.buckets
            .iter()
            .filter(|((_, season), bucket)| seasons.contains(season) && !bucket.is_empty())
            .filter_map(|((player_id, season), _)| {
                self.player(*player_id).map(|player| (player, *season))
            })
            .collect()
    }
}
