use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::UserId;
use crate::db::models::ledger::{ActionType, LedgerEntry, LedgerEntryRow, NewLedgerEntry};

#[derive(Debug)]
pub struct LedgerRepository {
    pool: &'static Pool<Postgres>,
}

impl LedgerRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Inserts `entry`, returning `None` when its `(user, action type, action key)` already exists
    #[instrument(skip(self, entry), fields(user = %entry.user_id, action = %entry.action_type))]
    pub async fn insert(&self, entry: &NewLedgerEntry) -> SqlxResult<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(sql_fragment::INSERT_ENTRY)
            .bind(entry.id)
            .bind(&entry.user_id)
            .bind(entry.points)
            .bind(entry.action_type.as_str())
            .bind(&entry.action_key)
            .bind(sqlx::types::Json(&entry.metadata))
            .bind(entry.created_at)
            .fetch_optional(self.pool)
            .await?;

        row.map(LedgerEntry::try_from).transpose()
    }

    #[instrument(skip(self))]
    pub async fn get_by_key(
        &self,
        user_id: &UserId,
        action_type: ActionType,
        action_key: &str,
    ) -> SqlxResult<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            r#"
            SELECT {}
            FROM ledger_entry
            WHERE user_id = $1
            AND action_type = $2
            AND action_key = $3
            "#,
            sql_fragment::LEDGER_FIELDS
        ))
        .bind(user_id)
        .bind(action_type.as_str())
        .bind(action_key)
        .fetch_optional(self.pool)
        .await?;

        row.map(LedgerEntry::try_from).transpose()
    }

    #[instrument(skip(self))]
    pub async fn get_recent(&self, user_id: &UserId, limit: i64) -> SqlxResult<Vec<LedgerEntry>> {
        sqlx::query_as::<_, LedgerEntryRow>(&format!(
            r#"
            SELECT {}
            FROM ledger_entry
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            sql_fragment::LEDGER_FIELDS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect()
    }

    /// Sum of every entry for the user; zero if there are none
    #[instrument(skip(self))]
    pub async fn total_points(&self, user_id: &UserId) -> SqlxResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(points), 0)::BIGINT
            FROM ledger_entry
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool)
        .await
    }
}
