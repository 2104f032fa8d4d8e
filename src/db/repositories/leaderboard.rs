use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use crate::db::models::UserId;
use crate::db::models::leaderboard::{LeaderboardRow, RankSummary};

/// Per-user totals with dense ranks. Ties on points share a rank; row order within a tie is by
/// `user_id` in byte order so the projection is stable across calls.
const RANKED_TOTALS: &str = r#"
    WITH totals AS (
        SELECT
            user_id,
            SUM(points)::BIGINT AS total_points
        FROM ledger_entry
        GROUP BY user_id
    ),
    ranked AS (
        SELECT
            user_id,
            total_points,
            DENSE_RANK() OVER (ORDER BY total_points DESC) AS rank
        FROM totals
    )
"#;

#[derive(Debug)]
pub struct LeaderboardRepository {
    pool: &'static Pool<Postgres>,
}

impl LeaderboardRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn get_top(&self, limit: i64) -> SqlxResult<Vec<LeaderboardRow>> {
        sqlx::query_as::<_, LeaderboardRow>(&format!(
            r#"
            {RANKED_TOTALS}
            SELECT
                r.user_id,
                r.total_points,
                p.display_name,
                p.avatar_ref,
                r.rank
            FROM ranked r
            LEFT JOIN profile p ON p.user_id = r.user_id
            ORDER BY r.total_points DESC, r.user_id COLLATE "C" ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(self.pool)
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_rank(&self, user_id: &UserId) -> SqlxResult<Option<RankSummary>> {
        sqlx::query_as::<_, RankSummary>(&format!(
            r#"
            {RANKED_TOTALS}
            SELECT user_id, total_points, rank
            FROM ranked
            WHERE user_id = $1
            "#
        ))
        .bind(user_id)
        .fetch_optional(self.pool)
        .await
    }
}
