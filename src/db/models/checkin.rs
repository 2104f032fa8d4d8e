use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Base checkin table model; one row per user per UTC calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CheckinRecord {
    pub user_id: UserId,
    pub day: NaiveDate,
    pub streak_day: i32,
    pub points_awarded: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinOutcome {
    pub streak_day: i32,
    pub points_awarded: i64,
    pub is_new_checkin: bool,
}

impl CheckinOutcome {
    pub fn from_record(record: &CheckinRecord, is_new_checkin: bool) -> Self {
        Self {
            streak_day: record.streak_day,
            points_awarded: record.points_awarded,
            is_new_checkin,
        }
    }
}

/// Result of the atomic check-in write. `Existing` carries the record that won the race for
/// the same `(user, day)`.
#[derive(Debug, Clone)]
pub enum CheckinInsert {
    Inserted(CheckinRecord),
    Existing(CheckinRecord),
}

/// One slot of the rolling 7-day streak window
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakDay {
    pub date: NaiveDate,
    pub checked_in: bool,
    pub streak_day: Option<i32>,
    pub points_awarded: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakStatus {
    pub today: NaiveDate,
    pub current_streak: i32,
    pub checked_in_today: bool,
    pub next_reward: i64,
    pub window: Vec<StreakDay>,
}
