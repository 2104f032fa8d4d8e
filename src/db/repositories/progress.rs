use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::progress::{CompletionCounts, CompletionKind, UnitProgress};
use crate::db::models::{UnitId, UserId};

#[derive(Debug)]
pub struct ProgressRepository {
    pool: &'static Pool<Postgres>,
}

impl ProgressRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn get_completed_counts(
        &self,
        user_id: &UserId,
        unit_id: &UnitId,
    ) -> SqlxResult<CompletionCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT kind, COUNT(*)
            FROM unit_completion
            WHERE user_id = $1
            AND unit_id = $2
            GROUP BY kind
            "#,
        )
        .bind(user_id)
        .bind(unit_id)
        .fetch_all(self.pool)
        .await?;

        let mut counts = CompletionCounts::default();
        for (kind, n) in rows {
            match kind.parse::<CompletionKind>() {
                Ok(kind) => *counts.get_mut(kind) = i32::try_from(n).unwrap_or(i32::MAX),
                Err(e) => tracing::warn!(error = %e, "skipping completions of unknown kind"),
            }
        }

        Ok(counts)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, user_id: &UserId, unit_id: &UnitId) -> SqlxResult<Option<UnitProgress>> {
        sqlx::query_as::<_, UnitProgress>(&format!(
            "SELECT {} FROM unit_progress WHERE user_id = $1 AND unit_id = $2",
            sql_fragment::PROGRESS_FIELDS
        ))
        .bind(user_id)
        .bind(unit_id)
        .fetch_optional(self.pool)
        .await
    }

    #[instrument(skip(self, unit_ids))]
    pub async fn get_many(
        &self,
        user_id: &UserId,
        unit_ids: &[UnitId],
    ) -> SqlxResult<Vec<UnitProgress>> {
        let ids: Vec<&str> = unit_ids.iter().map(|id| id.0.as_str()).collect();

        sqlx::query_as::<_, UnitProgress>(&format!(
            "SELECT {} FROM unit_progress WHERE user_id = $1 AND unit_id = ANY($2)",
            sql_fragment::PROGRESS_FIELDS
        ))
        .bind(user_id)
        .bind(ids)
        .fetch_all(self.pool)
        .await
    }

    /// Upserts the derived counters. `started_at` is only written on insert and an existing
    /// `completed_at` is never overwritten.
    #[instrument(skip(self, progress), fields(user = %progress.user_id, unit = %progress.unit_id))]
    pub async fn upsert(&self, progress: &UnitProgress) -> SqlxResult<UnitProgress> {
        sqlx::query_as::<_, UnitProgress>(&format!(
            r#"
            INSERT INTO unit_progress (
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
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (user_id, unit_id)
            DO UPDATE SET
                modules_completed = EXCLUDED.modules_completed,
                tasks_completed = EXCLUDED.tasks_completed,
                assignments_completed = EXCLUDED.assignments_completed,
                review_steps_completed = EXCLUDED.review_steps_completed,
                progress_percentage = EXCLUDED.progress_percentage,
                completed_at = COALESCE(unit_progress.completed_at, EXCLUDED.completed_at),
                last_activity_at = EXCLUDED.last_activity_at
            RETURNING {}
            "#,
            sql_fragment::PROGRESS_FIELDS
        ))
        .bind(&progress.user_id)
        .bind(&progress.unit_id)
        .bind(progress.modules_completed)
        .bind(progress.tasks_completed)
        .bind(progress.assignments_completed)
        .bind(progress.review_steps_completed)
        .bind(progress.progress_percentage)
        .bind(progress.started_at)
        .bind(progress.completed_at)
        .bind(progress.last_activity_at)
        .fetch_one(self.pool)
        .await
    }
}
