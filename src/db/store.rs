//! Postgres-backed [`EngagementStore`].
//!
//! Uniqueness is enforced by the schema (`checkin` primary key, the partial unique index on
//! `ledger_entry`, the `unit_completion` primary key); every write here is an
//! `INSERT .. ON CONFLICT DO NOTHING` so a lost race surfaces as "already exists" rather than as
//! an error.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Pool, Postgres};
use tracing::instrument;

use crate::db::models::checkin::{CheckinInsert, CheckinRecord};
use crate::db::models::ledger::{LedgerEntry, NewLedgerEntry, Recorded};
use crate::db::models::leaderboard::{LeaderboardRow, RankSummary};
use crate::db::models::progress::{
    CompletionCounts, CompletionInsert, CompletionKind, UnitDefinition, UnitProgress,
};
use crate::db::prelude::*;
use crate::db::repositories::Repository;
use crate::db::repositories::unit::UnitRepository;
use crate::engine::{EngagementStore, EngineError, EngineResult};

#[derive(Debug, Clone, Copy)]
pub struct PgStore {
    pool: &'static Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Looks up the entry that beat us to `(user, action type, action key)`
    async fn existing_entry(&self, entry: &NewLedgerEntry) -> EngineResult<LedgerEntry> {
        let key = entry
            .action_key
            .as_deref()
            .ok_or(EngineError::ConcurrentConflict)?;

        LedgerRepository::new(self.pool)
            .get_by_key(&entry.user_id, entry.action_type, key)
            .await?
            .ok_or(EngineError::ConcurrentConflict)
    }
}

#[async_trait]
impl EngagementStore for PgStore {
    async fn insert_entry(&self, entry: NewLedgerEntry) -> EngineResult<Recorded> {
        match LedgerRepository::new(self.pool).insert(&entry).await? {
            Some(entry) => Ok(Recorded {
                entry,
                created: true,
            }),
            None => Ok(Recorded {
                entry: self.existing_entry(&entry).await?,
                created: false,
            }),
        }
    }

    async fn recent_entries(&self, user: &UserId, limit: i64) -> EngineResult<Vec<LedgerEntry>> {
        Ok(LedgerRepository::new(self.pool)
            .get_recent(user, limit)
            .await?)
    }

    async fn total_points(&self, user: &UserId) -> EngineResult<i64> {
        Ok(LedgerRepository::new(self.pool).total_points(user).await?)
    }

    async fn checkin_on(&self, user: &UserId, day: NaiveDate) -> EngineResult<Option<CheckinRecord>> {
        Ok(CheckinRepository::new(self.pool)
            .get_on_day(user, day)
            .await?)
    }

    async fn checkins_between(
        &self,
        user: &UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<CheckinRecord>> {
        Ok(CheckinRepository::new(self.pool)
            .get_between(user, from, to)
            .await?)
    }

    #[instrument(skip(self, record, entry), fields(user = %record.user_id, day = %record.day))]
    async fn insert_checkin(
        &self,
        record: CheckinRecord,
        entry: NewLedgerEntry,
    ) -> EngineResult<CheckinInsert> {
        let (user, day) = (record.user_id.clone(), record.day);

        let inserted = Tx::with_tx(self.pool, |mut tx| async move {
            let result: EngineResult<Option<CheckinRecord>> = async {
                let Some(record) = tx.insert_checkin(&record).await? else {
                    return Ok(None);
                };

                // the day's check-in award is keyed by date; if it is already taken the record
                // must not be written without it
                match tx.insert_entry(&entry).await? {
                    Some(_) => Ok(Some(record)),
                    None => Err(EngineError::ConcurrentConflict),
                }
            }
            .await;

            (tx, result)
        })
        .await?;

        match inserted {
            Some(record) => Ok(CheckinInsert::Inserted(record)),
            None => CheckinRepository::new(self.pool)
                .get_on_day(&user, day)
                .await?
                .map(CheckinInsert::Existing)
                .ok_or(EngineError::ConcurrentConflict),
        }
    }

    async fn unit(&self, unit: &UnitId) -> EngineResult<Option<UnitDefinition>> {
        Ok(UnitRepository::new(self.pool).get_definition(unit).await?)
    }

    async fn insert_completion(
        &self,
        user: &UserId,
        unit: &UnitId,
        kind: CompletionKind,
        item_id: &str,
        limit: i32,
        at: DateTime<Utc>,
    ) -> EngineResult<CompletionInsert> {
        Ok(Tx::with_tx(self.pool, |mut tx| async move {
            let result = async {
                tx.lock_unit(user, unit).await?;
                tx.insert_completion(user, unit, kind, item_id, limit, at).await
            }
            .await;

            (tx, result)
        })
        .await?)
    }

    async fn completed_counts(&self, user: &UserId, unit: &UnitId) -> EngineResult<CompletionCounts> {
        Ok(ProgressRepository::new(self.pool)
            .get_completed_counts(user, unit)
            .await?)
    }

    async fn progress(&self, user: &UserId, unit: &UnitId) -> EngineResult<Option<UnitProgress>> {
        Ok(ProgressRepository::new(self.pool).get(user, unit).await?)
    }

    async fn progress_many(&self, user: &UserId, units: &[UnitId]) -> EngineResult<Vec<UnitProgress>> {
        Ok(ProgressRepository::new(self.pool)
            .get_many(user, units)
            .await?)
    }

    async fn save_progress(&self, progress: &UnitProgress) -> EngineResult<UnitProgress> {
        Ok(ProgressRepository::new(self.pool).upsert(progress).await?)
    }

    async fn leaderboard(&self, limit: i64) -> EngineResult<Vec<LeaderboardRow>> {
        Ok(LeaderboardRepository::new(self.pool).get_top(limit).await?)
    }

    async fn rank_of(&self, user: &UserId) -> EngineResult<Option<RankSummary>> {
        Ok(LeaderboardRepository::new(self.pool).get_rank(user).await?)
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use serde_json::Map;
    use sqlx::PgPool;
    use uuid::Uuid;

    use super::*;
    use crate::db::models::ledger::ActionType;

    fn store(pool: PgPool) -> PgStore {
        PgStore::new(Box::leak(Box::new(pool)))
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn entry(user: &str, action_type: ActionType, points: i64, key: Option<&str>) -> NewLedgerEntry {
        NewLedgerEntry {
            id: Uuid::new_v4(),
            user_id: UserId::from(user),
            points,
            action_type,
            action_key: key.map(str::to_string),
            metadata: Map::new(),
            created_at: at(1, 9),
        }
    }

    fn checkin_for(user: &str, day: NaiveDate) -> (CheckinRecord, NewLedgerEntry) {
        let record = CheckinRecord {
            user_id: UserId::from(user),
            day,
            streak_day: 1,
            points_awarded: 5,
            created_at: at(1, 9),
        };
        let key = day.format("%Y-%m-%d").to_string();

        (record, entry(user, ActionType::Checkin, 5, Some(&key)))
    }

    async fn seed_unit(pool: &PgPool, id: &str, modules: i32) {
        sqlx::query("INSERT INTO curriculum_unit (id, title, total_modules) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(format!("Week {id}"))
            .bind(modules)
            .execute(pool)
            .await
            .unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_keyed_insert_deduplicates(pool: PgPool) {
        let store = store(pool);

        let first = store
            .insert_entry(entry("alice", ActionType::Post, 3, Some("post-1")))
            .await
            .unwrap();
        let second = store
            .insert_entry(entry("alice", ActionType::Post, 3, Some("post-1")))
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.entry.id, second.entry.id);

        for _ in 0..2 {
            let keyless = store
                .insert_entry(entry("alice", ActionType::Comment, 1, None))
                .await
                .unwrap();
            assert!(keyless.created);
        }

        assert_eq!(store.total_points(&UserId::from("alice")).await.unwrap(), 5);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_concurrent_checkins_insert_once(pool: PgPool) {
        let store = store(pool);
        let day = at(1, 0).date_naive();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (record, entry) = checkin_for("alice", day);
                tokio::spawn(async move { store.insert_checkin(record, entry).await })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                CheckinInsert::Inserted(_) => inserted += 1,
                CheckinInsert::Existing(record) => assert_eq!(record.day, day),
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(store.total_points(&UserId::from("alice")).await.unwrap(), 5);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_checkin_rolled_back_when_award_key_taken(pool: PgPool) {
        let store = store(pool);
        let alice = UserId::from("alice");
        let day = at(1, 0).date_naive();

        store
            .insert_entry(entry("alice", ActionType::Checkin, 1000, Some("2026-03-01")))
            .await
            .unwrap();

        let (record, entry) = checkin_for("alice", day);
        let res = store.insert_checkin(record, entry).await;

        assert!(matches!(res, Err(EngineError::ConcurrentConflict)));
        assert!(store.checkin_on(&alice, day).await.unwrap().is_none());
        assert_eq!(store.total_points(&alice).await.unwrap(), 1000);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_leaderboard_dense_ranks_in_byte_order(pool: PgPool) {
        let store = store(pool);

        for (user, points) in [("alice", 80), ("Zed", 80), ("bob", 50), ("carol", 10)] {
            store
                .insert_entry(entry(user, ActionType::Post, points, None))
                .await
                .unwrap();
        }

        let rows = store.leaderboard(10).await.unwrap();
        let view: Vec<_> = rows
            .iter()
            .map(|r| (r.user_id.0.as_str(), r.total_points, r.rank))
            .collect();
        assert_eq!(
            view,
            vec![("Zed", 80, 1), ("alice", 80, 1), ("bob", 50, 2), ("carol", 10, 3)]
        );

        let bob = store.rank_of(&UserId::from("bob")).await.unwrap().unwrap();
        assert_eq!(bob.rank, 2);
        assert!(store.rank_of(&UserId::from("dave")).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_completed_at_never_moves(pool: PgPool) {
        seed_unit(&pool, "week-1", 1).await;
        let store = store(pool);

        let mut progress = UnitProgress {
            user_id: UserId::from("alice"),
            unit_id: UnitId::from("week-1"),
            modules_completed: 1,
            tasks_completed: 0,
            assignments_completed: 0,
            review_steps_completed: 0,
            progress_percentage: 100,
            started_at: at(1, 9),
            completed_at: Some(at(1, 10)),
            last_activity_at: at(1, 10),
        };
        store.save_progress(&progress).await.unwrap();

        progress.started_at = at(2, 9);
        progress.completed_at = Some(at(2, 10));
        progress.last_activity_at = at(2, 10);
        let saved = store.save_progress(&progress).await.unwrap();

        assert_eq!(saved.started_at, at(1, 9));
        assert_eq!(saved.completed_at, Some(at(1, 10)));
        assert_eq!(saved.last_activity_at, at(2, 10));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_completions_stop_at_limit(pool: PgPool) {
        seed_unit(&pool, "week-1", 2).await;
        let store = store(pool);
        let (alice, week) = (UserId::from("alice"), UnitId::from("week-1"));
        let module = CompletionKind::Module;

        let outcomes = [
            store.insert_completion(&alice, &week, module, "m1", 2, at(1, 9)).await.unwrap(),
            store.insert_completion(&alice, &week, module, "m2", 2, at(1, 9)).await.unwrap(),
            store.insert_completion(&alice, &week, module, "m3", 2, at(1, 9)).await.unwrap(),
            store.insert_completion(&alice, &week, module, "m1", 2, at(1, 9)).await.unwrap(),
        ];
        assert_eq!(
            outcomes,
            [
                CompletionInsert::Inserted,
                CompletionInsert::Inserted,
                CompletionInsert::Full,
                CompletionInsert::Existing
            ]
        );

        let counts = store.completed_counts(&alice, &week).await.unwrap();
        assert_eq!(counts.modules, 2);
    }
}
