use core::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Result as SqlxResult, Transaction};
use tracing::instrument;

use crate::db::models::checkin::CheckinRecord;
use crate::db::models::ledger::{LedgerEntry, LedgerEntryRow, NewLedgerEntry};
use crate::db::models::progress::{CompletionInsert, CompletionKind};
use crate::db::models::{UnitId, UserId};

pub mod checkin;
pub mod leaderboard;
pub mod ledger;
pub mod progress;
pub mod unit;

pub struct Tx<'a> {
    inner: Option<Transaction<'a, Postgres>>,
}

impl<'a> Tx<'a> {
    /// "Automatic" transaction handler
    ///
    /// # Usage
    ///
    /// `f` receives the open transaction and must hand it back alongside its result; an `Ok`
    /// commits, an `Err` rolls it back.
    #[instrument(skip(pool, f))]
    pub async fn with_tx<F, Fut, T, E>(pool: &'static Pool<Postgres>, f: F) -> Result<T, E>
    where
        F: FnOnce(Tx<'a>) -> Fut,
        Fut: Future<Output = (Tx<'a>, Result<T, E>)>,
        E: From<sqlx::Error> + fmt::Debug,
    {
        let tx = Self::begin(pool).await?;
        let (mut tx, result) = f(tx).await;

        match result {
            Ok(val) => {
                tx.commit().await?;
                Ok(val)
            }
            Err(e) => {
                tracing::trace!(error = ?e, "transacted query failure");
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    #[instrument(skip(pool))]
    pub async fn begin(pool: &'static Pool<Postgres>) -> SqlxResult<Self> {
        let inner = pool.begin().await?;
        Ok(Self { inner: Some(inner) })
    }

    #[instrument(skip(self))]
    pub async fn commit(&mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.commit().await
        } else {
            Err(sqlx::Error::Protocol(
                "Transaction already completed".into(),
            ))
        }
    }

    fn inner_mut(&mut self) -> SqlxResult<&mut Transaction<'a, Postgres>> {
        self.inner
            .as_mut()
            .ok_or_else(|| sqlx::Error::Protocol("Transaction already completed".into()))
    }

    #[instrument(skip(self))]
    pub async fn rollback(&mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.rollback().await
        } else {
            Err(sqlx::Error::Protocol(
                "Transaction already completed".into(),
            ))
        }
    }

    /// Inserts the check-in for `(user, day)`, or returns `None` if one already exists
    #[instrument(skip(self, record), fields(user = %record.user_id, day = %record.day))]
    pub async fn insert_checkin(
        &mut self,
        record: &CheckinRecord,
    ) -> SqlxResult<Option<CheckinRecord>> {
        sqlx::query_as::<_, CheckinRecord>(&format!(
            r#"
            INSERT INTO checkin (
                user_id,
                day,
                streak_day,
                points_awarded,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, day)
            DO NOTHING
            RETURNING {}
            "#,
            sql_fragment::CHECKIN_FIELDS
        ))
        .bind(&record.user_id)
        .bind(record.day)
        .bind(record.streak_day)
        .bind(record.points_awarded)
        .bind(record.created_at)
        .fetch_optional(&mut **self.inner_mut()?)
        .await
    }

    /// Inserts a ledger entry inside the transaction, or returns `None` if its
    /// `(user, action type, action key)` is already taken
    #[instrument(skip(self, entry), fields(user = %entry.user_id, action = %entry.action_type))]
    pub async fn insert_entry(&mut self, entry: &NewLedgerEntry) -> SqlxResult<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(sql_fragment::INSERT_ENTRY)
            .bind(entry.id)
            .bind(&entry.user_id)
            .bind(entry.points)
            .bind(entry.action_type.as_str())
            .bind(&entry.action_key)
            .bind(sqlx::types::Json(&entry.metadata))
            .bind(entry.created_at)
            .fetch_optional(&mut **self.inner_mut()?)
            .await?;

        row.map(LedgerEntry::try_from).transpose()
    }

    /// Serialises completion writes for one `(user, unit)` until the transaction ends
    #[instrument(skip(self))]
    pub async fn lock_unit(&mut self, user_id: &UserId, unit_id: &UnitId) -> SqlxResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
            .bind(user_id)
            .bind(unit_id)
            .execute(&mut **self.inner_mut()?)
            .await?;

        Ok(())
    }

    /// Records a completed item while fewer than `limit` items of `kind` are recorded for the
    /// unit. Hold [`lock_unit`](Self::lock_unit) first so the count can't go stale.
    #[instrument(skip(self))]
    pub async fn insert_completion(
        &mut self,
        user_id: &UserId,
        unit_id: &UnitId,
        kind: CompletionKind,
        item_id: &str,
        limit: i32,
        at: DateTime<Utc>,
    ) -> SqlxResult<CompletionInsert> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM unit_completion
                WHERE user_id = $1
                AND unit_id = $2
                AND kind = $3
                AND item_id = $4
            )
            "#,
        )
        .bind(user_id)
        .bind(unit_id)
        .bind(kind.as_str())
        .bind(item_id)
        .fetch_one(&mut **self.inner_mut()?)
        .await?;

        if exists {
            return Ok(CompletionInsert::Existing);
        }

        let res = sqlx::query(
            r#"
            INSERT INTO unit_completion (
                user_id,
                unit_id,
                kind,
                item_id,
                completed_at
            )
            SELECT $1, $2, $3, $4, $5
            WHERE (
                SELECT COUNT(*)
                FROM unit_completion
                WHERE user_id = $1
                AND unit_id = $2
                AND kind = $3
            ) < $6
            ON CONFLICT (user_id, unit_id, kind, item_id)
            DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(unit_id)
        .bind(kind.as_str())
        .bind(item_id)
        .bind(at)
        .bind(i64::from(limit))
        .execute(&mut **self.inner_mut()?)
        .await?;

        Ok(match res.rows_affected() {
            1 => CompletionInsert::Inserted,
            _ => CompletionInsert::Full,
        })
    }
}

pub mod sql_fragment {
    pub const LEDGER_FIELDS: &str = r#"
        id,
        user_id,
        points,
        action_type,
        action_key,
        metadata,
        created_at
    "#;

    pub const CHECKIN_FIELDS: &str = r#"
        user_id,
        day,
        streak_day,
        points_awarded,
        created_at
    "#;

    pub const UNIT_FIELDS: &str = r#"
        id,
        title,
        total_modules,
        total_tasks,
        total_assignments,
        total_review_steps
    "#;

    pub const PROGRESS_FIELDS: &str = r#"
        user_id,
        unit_id,
        modules_completed,
        tasks_completed,
        assignments_completed,
        review_steps_completed,
        progress_percentage,
        started_at,
        completed_at,
        last_activity_at
    "#;

    /// Keyed entries conflict on the partial unique index; keyless entries always insert
    pub const INSERT_ENTRY: &str = r#"
        INSERT INTO ledger_entry (
            id,
            user_id,
            points,
            action_type,
            action_key,
            metadata,
            created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id, action_type, action_key) WHERE action_key IS NOT NULL
        DO NOTHING
        RETURNING
            id,
            user_id,
            points,
            action_type,
            action_key,
            metadata,
            created_at
    "#;
}

#[async_trait]
pub trait Repository {
    type Ident: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + Sync + fmt::Debug;
    type Output: for<'r> sqlx::FromRow<'r, <Postgres as sqlx::Database>::Row>
        + Sized
        + Unpin
        + Send
        + fmt::Debug;

    const BASE_FIELDS: &'static str;
    const TABLE_NAME: &'static str;

    fn new(pool: &'static Pool<Postgres>) -> Self
    where
        Self: Sized;

    fn pool(&self) -> &'static Pool<Postgres>;

    #[instrument(skip(self, id))]
    async fn get_by_id(&self, id: &Self::Ident) -> SqlxResult<Option<Self::Output>> {
        sqlx::query_as::<_, Self::Output>(&format!(
            "SELECT {} FROM {} WHERE id = $1",
            Self::BASE_FIELDS,
            Self::TABLE_NAME
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
    }
}
