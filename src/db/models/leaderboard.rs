use serde::{Deserialize, Serialize};

use super::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub user_id: UserId,
    pub total_points: i64,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
    pub rank: i64,
}

/// A single user's standing, for `GET /leaderboard/me`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RankSummary {
    pub user_id: UserId,
    pub total_points: i64,
    pub rank: i64,
}

