use core::fmt;

use serde::{Deserialize, Serialize};

pub mod checkin;
pub mod ledger;
pub mod leaderboard;
pub mod progress;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct UnitId(pub String);

impl From<String> for UserId {
    fn from(value: String) -> Self {
        UserId(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

impl From<String> for UnitId {
    fn from(value: String) -> Self {
        UnitId(value)
    }
}

impl From<&str> for UnitId {
    fn from(value: &str) -> Self {
        UnitId(value.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `?limit=` query parameter; defaults and bounds are applied by whichever operation consumes it
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// `?points=` query parameter for resolving a tier without a user
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointsQuery {
    pub points: i64,
}
