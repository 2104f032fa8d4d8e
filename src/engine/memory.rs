//! In-process [`EngagementStore`] backing the engine and route tests.
//!
//! A single mutex around all state gives the same atomicity the Postgres store gets from unique
//! indexes and transactions.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use crate::db::models::checkin::{CheckinInsert, CheckinRecord};
use crate::db::models::ledger::{ActionType, LedgerEntry, NewLedgerEntry, Recorded};
use crate::db::models::leaderboard::{LeaderboardRow, RankSummary};
use crate::db::models::progress::{
    CompletionCounts, CompletionInsert, CompletionKind, UnitDefinition, UnitProgress,
};
use crate::db::models::{UnitId, UserId};
use crate::engine::{EngagementStore, EngineError, EngineResult};

/// Orders per-user totals by points descending then user id ascending, and assigns dense
/// ranks: equal totals share a rank and the next distinct total takes the next integer.
fn dense_rank(mut totals: Vec<(UserId, i64)>) -> Vec<RankSummary> {
    totals.sort_by(|(a_id, a_total), (b_id, b_total)| {
        b_total.cmp(a_total).then_with(|| a_id.cmp(b_id))
    });

    let mut rank = 0;
    let mut last_total = None;

    totals
        .into_iter()
        .map(|(user_id, total_points)| {
            if last_total != Some(total_points) {
                rank += 1;
                last_total = Some(total_points);
            }

            RankSummary {
                user_id,
                total_points,
                rank,
            }
        })
        .collect()
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<LedgerEntry>,
    checkins: BTreeMap<(UserId, NaiveDate), CheckinRecord>,
    units: HashMap<UnitId, UnitDefinition>,
    completions: HashSet<(UserId, UnitId, CompletionKind, String)>,
    progress: HashMap<(UserId, UnitId), UnitProgress>,
    profiles: HashMap<UserId, (Option<String>, Option<String>)>,
}

impl State {
    fn find_entry(&self, entry: &NewLedgerEntry) -> Option<&LedgerEntry> {
        let key = entry.action_key.as_ref()?;
        self.entries.iter().find(|e| {
            e.user_id == entry.user_id
                && e.action_type == entry.action_type
                && e.action_key.as_ref() == Some(key)
        })
    }

    fn insert_entry(&mut self, entry: NewLedgerEntry) -> Recorded {
        if let Some(existing) = self.find_entry(&entry) {
            return Recorded {
                entry: existing.clone(),
                created: false,
            };
        }

        let entry = LedgerEntry {
            id: entry.id,
            user_id: entry.user_id,
            points: entry.points,
            action_type: entry.action_type,
            action_key: entry.action_key,
            metadata: entry.metadata,
            created_at: entry.created_at,
        };
        self.entries.push(entry.clone());
        Recorded {
            entry,
            created: true,
        }
    }

    fn totals(&self) -> Vec<(UserId, i64)> {
        let mut totals: HashMap<&UserId, i64> = HashMap::new();
        for entry in &self.entries {
            *totals.entry(&entry.user_id).or_default() += entry.points;
        }

        totals
            .into_iter()
            .map(|(user, total)| (user.clone(), total))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub async fn put_unit(&self, unit: UnitDefinition) {
        self.state.lock().await.units.insert(unit.id.clone(), unit);
    }

    pub async fn put_profile(&self, user: &UserId, name: Option<&str>, avatar: Option<&str>) {
        self.state.lock().await.profiles.insert(
            user.clone(),
            (name.map(str::to_string), avatar.map(str::to_string)),
        );
    }

    pub async fn entries_of(&self, user: &UserId, action: ActionType) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| &e.user_id == user && e.action_type == action)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EngagementStore for MemoryStore {
    async fn insert_entry(&self, entry: NewLedgerEntry) -> EngineResult<Recorded> {
        Ok(self.state.lock().await.insert_entry(entry))
    }

    async fn recent_entries(&self, user: &UserId, limit: i64) -> EngineResult<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state
            .entries
            .iter()
            .filter(|e| &e.user_id == user)
            .cloned()
            .collect();

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn total_points(&self, user: &UserId) -> EngineResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| &e.user_id == user)
            .map(|e| e.points)
            .sum())
    }

    async fn checkin_on(&self, user: &UserId, day: NaiveDate) -> EngineResult<Option<CheckinRecord>> {
        let state = self.state.lock().await;
        Ok(state.checkins.get(&(user.clone(), day)).cloned())
    }

    async fn checkins_between(
        &self,
        user: &UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<CheckinRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .checkins
            .range((user.clone(), from)..=(user.clone(), to))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn insert_checkin(
        &self,
        record: CheckinRecord,
        entry: NewLedgerEntry,
    ) -> EngineResult<CheckinInsert> {
        let mut state = self.state.lock().await;
        let key = (record.user_id.clone(), record.day);

        if let Some(existing) = state.checkins.get(&key) {
            return Ok(CheckinInsert::Existing(existing.clone()));
        }

        if state.find_entry(&entry).is_some() {
            return Err(EngineError::ConcurrentConflict);
        }

        state.checkins.insert(key, record.clone());
        state.insert_entry(entry);
        Ok(CheckinInsert::Inserted(record))
    }

    async fn unit(&self, unit: &UnitId) -> EngineResult<Option<UnitDefinition>> {
        Ok(self.state.lock().await.units.get(unit).cloned())
    }

    async fn insert_completion(
        &self,
        user: &UserId,
        unit: &UnitId,
        kind: CompletionKind,
        item_id: &str,
        limit: i32,
        _at: DateTime<Utc>,
    ) -> EngineResult<CompletionInsert> {
        let mut state = self.state.lock().await;
        let key = (user.clone(), unit.clone(), kind, item_id.to_string());

        if state.completions.contains(&key) {
            return Ok(CompletionInsert::Existing);
        }

        let done = state
            .completions
            .iter()
            .filter(|(u, un, k, _)| u == user && un == unit && *k == kind)
            .count();
        if done >= limit.max(0) as usize {
            return Ok(CompletionInsert::Full);
        }

        state.completions.insert(key);
        Ok(CompletionInsert::Inserted)
    }

    async fn completed_counts(&self, user: &UserId, unit: &UnitId) -> EngineResult<CompletionCounts> {
        let state = self.state.lock().await;
        let mut counts = CompletionCounts::default();

        for (_, _, kind, _) in state
            .completions
            .iter()
            .filter(|(u, un, _, _)| u == user && un == unit)
        {
            *counts.get_mut(*kind) += 1;
        }

        Ok(counts)
    }

    async fn progress(&self, user: &UserId, unit: &UnitId) -> EngineResult<Option<UnitProgress>> {
        let state = self.state.lock().await;
        Ok(state.progress.get(&(user.clone(), unit.clone())).cloned())
    }

    async fn progress_many(&self, user: &UserId, units: &[UnitId]) -> EngineResult<Vec<UnitProgress>> {
        let state = self.state.lock().await;
        Ok(units
            .iter()
            .filter_map(|unit| state.progress.get(&(user.clone(), unit.clone())).cloned())
            .collect())
    }

    async fn save_progress(&self, progress: &UnitProgress) -> EngineResult<UnitProgress> {
        let mut state = self.state.lock().await;
        let key = (progress.user_id.clone(), progress.unit_id.clone());

        let mut row = progress.clone();
        if let Some(existing) = state.progress.get(&key) {
            row.started_at = existing.started_at;
            row.completed_at = existing.completed_at.or(progress.completed_at);
        }

        state.progress.insert(key, row.clone());
        Ok(row)
    }

    async fn leaderboard(&self, limit: i64) -> EngineResult<Vec<LeaderboardRow>> {
        let state = self.state.lock().await;

        Ok(dense_rank(state.totals())
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|r| {
                let (display_name, avatar_ref) =
                    state.profiles.get(&r.user_id).cloned().unwrap_or_default();

                LeaderboardRow {
                    user_id: r.user_id,
                    total_points: r.total_points,
                    display_name,
                    avatar_ref,
                    rank: r.rank,
                }
            })
            .collect())
    }

    async fn rank_of(&self, user: &UserId) -> EngineResult<Option<RankSummary>> {
        let state = self.state.lock().await;
        Ok(dense_rank(state.totals())
            .into_iter()
            .find(|r| &r.user_id == user))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::test_support::user;

    #[test]
    fn test_dense_rank_ties() {
        let ranked = dense_rank(vec![
            (user("carol"), 50),
            (user("bob"), 80),
            (user("alice"), 80),
            (user("dave"), 10),
        ]);

        let view: Vec<_> = ranked
            .iter()
            .map(|r| (r.user_id.0.as_str(), r.total_points, r.rank))
            .collect();
        assert_eq!(
            view,
            vec![
                ("alice", 80, 1),
                ("bob", 80, 1),
                ("carol", 50, 2),
                ("dave", 10, 3)
            ]
        );
    }
}
