//! Point total → tier resolution.
//!
//! Pure functions over a [`TierTable`]; the only I/O is in [`Engine::tier_status`], which sums
//! the user's ledger before resolving.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::db::models::UserId;
use crate::engine::{Engine, EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub min_points: i64,
    pub title: String,
}

impl Tier {
    pub fn new(min_points: i64, title: &str) -> Self {
        Self {
            min_points,
            title: title.to_string(),
        }
    }
}

/// Tiers ordered by strictly increasing `min_points`, the first starting at 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    tiers: Vec<Tier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierResolution {
    pub total_points: i64,
    pub current_tier: Tier,
    pub next_tier: Option<Tier>,
    pub progress_percent: i64,
    pub points_to_next: i64,
}

impl TierTable {
    pub fn new(tiers: Vec<Tier>) -> EngineResult<Self> {
        match tiers.first() {
            None => {
                return Err(EngineError::InvalidAction(
                    "tier table must not be empty".into(),
                ));
            }
            Some(first) if first.min_points != 0 => {
                return Err(EngineError::InvalidAction(
                    "first tier must start at 0 points".into(),
                ));
            }
            Some(_) => (),
        }

        if tiers.windows(2).any(|w| w[1].min_points <= w[0].min_points) {
            return Err(EngineError::InvalidAction(
                "tier thresholds must be strictly increasing".into(),
            ));
        }

        Ok(Self { tiers })
    }

    /// Builds a table from compiled-in thresholds that are known to be ordered
    pub(crate) fn from_sorted(tiers: Vec<Tier>) -> Self {
        debug_assert!(tiers.windows(2).all(|w| w[0].min_points < w[1].min_points));
        Self { tiers }
    }

    /// Resolves the current tier, the next one (if any) and progress towards it
    pub fn resolve(&self, total_points: i64) -> EngineResult<TierResolution> {
        if total_points < 0 {
            return Err(EngineError::InvalidAction(
                "total points must not be negative".into(),
            ));
        }

        // the first threshold is 0 so a non-negative total always lands somewhere
        let idx = self
            .tiers
            .iter()
            .rposition(|tier| tier.min_points <= total_points)
            .unwrap_or(0);

        let current = &self.tiers[idx];
        let next = self.tiers.get(idx + 1);

        let (progress_percent, points_to_next) = match next {
            Some(next) => {
                let span = next.min_points - current.min_points;
                let earned = total_points - current.min_points;
                (
                    rounded_percent(earned, span).clamp(0, 100),
                    (next.min_points - total_points).max(0),
                )
            }
            None => (0, 0),
        };

        Ok(TierResolution {
            total_points,
            current_tier: current.clone(),
            next_tier: next.cloned(),
            progress_percent,
            points_to_next,
        })
    }
}

/// `round(100 * num / den)` with halves rounded up, in integer arithmetic
pub fn rounded_percent(num: i64, den: i64) -> i64 {
    if den <= 0 {
        return 0;
    }

    (200 * num + den) / (2 * den)
}

impl Engine {
    #[instrument(skip(self))]
    pub async fn tier_status(&self, user: &UserId) -> EngineResult<TierResolution> {
        let total = self.store.total_points(user).await?;
        tracing::debug!(user = %user, total, "resolving tier");

        self.config.tiers.resolve(total)
    }

    pub fn resolve_tier(&self, total_points: i64) -> EngineResult<TierResolution> {
        self.config.tiers.resolve(total_points)
    }
}
