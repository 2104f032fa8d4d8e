//! Engagement ledger & tier engine.
//!
//! Every operation takes the acting user explicitly and talks to durable state only through
//! [`EngagementStore`]; uniqueness guarantees (one check-in per user per day, one ledger entry
//! per `(user, action type, action key)`) live in the store, not in this module.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::db::PgError;
use crate::db::models::checkin::{CheckinInsert, CheckinRecord};
use crate::db::models::ledger::{LedgerEntry, NewLedgerEntry, Recorded};
use crate::db::models::leaderboard::{LeaderboardRow, RankSummary};
use crate::db::models::progress::{
    CompletionCounts, CompletionInsert, CompletionKind, UnitDefinition, UnitProgress,
};
use crate::db::models::{UnitId, UserId};

pub mod config;
pub mod leaderboard;
pub mod ledger;
pub mod progress;
pub mod streak;
pub mod tier;

#[cfg(test)]
pub mod memory;

pub use config::EngineConfig;

pub type EngineResult<T> = core::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no authenticated user attached to the request")]
    Unauthenticated,

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("lost a race on a uniqueness constraint")]
    ConcurrentConflict,

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] PgError),
}

impl EngineError {
    /// Whether retrying the same call could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::StorageUnavailable(PgError::SqlxError(e)) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

impl From<PgError> for EngineError {
    fn from(value: PgError) -> Self {
        match value {
            PgError::SqlxError(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                EngineError::ConcurrentConflict
            }
            other => EngineError::StorageUnavailable(other),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(value: sqlx::Error) -> Self {
        EngineError::from(PgError::from(value))
    }
}

/// Durable state behind the engine.
///
/// Implementations must make [`insert_entry`](Self::insert_entry) and
/// [`insert_checkin`](Self::insert_checkin) atomic with respect to their uniqueness keys; the
/// engine never performs a check-then-insert of its own.
#[async_trait]
pub trait EngagementStore: Send + Sync {
    /// Inserts `entry` unless one with the same `(user, action type, action key)` exists, in
    /// which case the existing entry is returned with `created = false`
    async fn insert_entry(&self, entry: NewLedgerEntry) -> EngineResult<Recorded>;

    /// Newest first, ties broken by id descending
    async fn recent_entries(&self, user: &UserId, limit: i64) -> EngineResult<Vec<LedgerEntry>>;

    async fn total_points(&self, user: &UserId) -> EngineResult<i64>;

    async fn checkin_on(&self, user: &UserId, day: NaiveDate) -> EngineResult<Option<CheckinRecord>>;

    /// Check-ins with `from <= day <= to`, oldest first
    async fn checkins_between(
        &self,
        user: &UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<CheckinRecord>>;

    /// Writes the check-in record and its ledger entry together, or neither
    async fn insert_checkin(
        &self,
        record: CheckinRecord,
        entry: NewLedgerEntry,
    ) -> EngineResult<CheckinInsert>;

    async fn unit(&self, unit: &UnitId) -> EngineResult<Option<UnitDefinition>>;

    /// Records the item unless it already is, or unless `limit` items of `kind` are already
    /// recorded for the unit. The count check and the insert are atomic.
    async fn insert_completion(
        &self,
        user: &UserId,
        unit: &UnitId,
        kind: CompletionKind,
        item_id: &str,
        limit: i32,
        at: DateTime<Utc>,
    ) -> EngineResult<CompletionInsert>;

    async fn completed_counts(&self, user: &UserId, unit: &UnitId) -> EngineResult<CompletionCounts>;

    async fn progress(&self, user: &UserId, unit: &UnitId) -> EngineResult<Option<UnitProgress>>;

    async fn progress_many(&self, user: &UserId, units: &[UnitId]) -> EngineResult<Vec<UnitProgress>>;

    /// Upserts derived progress. An already-set `completed_at` and the original `started_at`
    /// are kept; the stored row is returned.
    async fn save_progress(&self, progress: &UnitProgress) -> EngineResult<UnitProgress>;

    /// Dense-ranked totals, `total_points` descending then `user_id` ascending
    async fn leaderboard(&self, limit: i64) -> EngineResult<Vec<LeaderboardRow>>;

    async fn rank_of(&self, user: &UserId) -> EngineResult<Option<RankSummary>>;
}

/// Source of "now"; the calendar day used for streaks is always the UTC date of this instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn EngagementStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn EngagementStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }
}
