use tracing::instrument;

use crate::db::models::UserId;
use crate::db::models::leaderboard::{LeaderboardRow, RankSummary};
use crate::engine::{Engine, EngineResult};

pub const DEFAULT_LEADERBOARD_LIMIT: i64 = 10;
pub const MAX_LEADERBOARD_LIMIT: i64 = 25;

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT)
}

impl Engine {
    /// Top users by cumulative points. `limit` defaults to 10 and is clamped to `[1, 25]`.
    #[instrument(skip(self))]
    pub async fn project(&self, limit: Option<i64>) -> EngineResult<Vec<LeaderboardRow>> {
        let limit = clamp_limit(limit);
        let rows = self.store.leaderboard(limit).await?;

        tracing::debug!(limit, rows = rows.len(), "leaderboard projected");
        Ok(rows)
    }

    /// The user's standing, or `None` if they have never earned anything
    #[instrument(skip(self))]
    pub async fn rank_of(&self, user: &UserId) -> EngineResult<Option<RankSummary>> {
        self.store.rank_of(user).await
    }
}
