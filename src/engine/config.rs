use serde::Deserialize;

use crate::db::models::ledger::ActionType;
use crate::engine::tier::{Tier, TierTable};
use crate::engine::{EngineError, EngineResult};
use crate::util::env::{self, EnvErr};

/// Streak rewards for days 1..=7; day 8 pays day 1's reward again
pub const DEFAULT_CHECKIN_REWARDS: [i64; 7] = [5, 10, 15, 20, 25, 30, 50];

pub const DEFAULT_TIERS: [(i64, &str); 6] = [
    (0, "Initiate"),
    (100, "Novice"),
    (300, "Devotee"),
    (750, "Adept"),
    (1500, "Disciple"),
    (3000, "Ascendant"),
];

/// Points paid for completing curriculum items, read from `REWARD_*` variables
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompletionRewards {
    pub lesson_read: i64,
    pub task_complete: i64,
    pub assignment_complete: i64,
}

impl Default for CompletionRewards {
    fn default() -> Self {
        Self {
            lesson_read: 10,
            task_complete: 5,
            assignment_complete: 15,
        }
    }
}

impl CompletionRewards {
    pub fn points_for(&self, action: ActionType) -> i64 {
        match action {
            ActionType::LessonRead => self.lesson_read,
            ActionType::TaskComplete => self.task_complete,
            ActionType::AssignmentComplete => self.assignment_complete,
            _ => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RewardVars {
    #[serde(default = "default_checkin_rewards")]
    checkin_rewards: Vec<i64>,
}

fn default_checkin_rewards() -> Vec<i64> {
    DEFAULT_CHECKIN_REWARDS.to_vec()
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub checkin_rewards: Vec<i64>,
    pub completion_rewards: CompletionRewards,
    pub tiers: TierTable,
}

impl EngineConfig {
    pub fn new(
        checkin_rewards: Vec<i64>,
        completion_rewards: CompletionRewards,
        tiers: TierTable,
    ) -> EngineResult<Self> {
        if checkin_rewards.is_empty() {
            return Err(EngineError::InvalidAction(
                "checkin reward table must not be empty".into(),
            ));
        }

        let negative = checkin_rewards.iter().any(|r| *r < 0)
            || [
                completion_rewards.lesson_read,
                completion_rewards.task_complete,
                completion_rewards.assignment_complete,
            ]
            .iter()
            .any(|r| *r < 0);

        if negative {
            return Err(EngineError::InvalidAction(
                "reward values must not be negative".into(),
            ));
        }

        Ok(Self {
            checkin_rewards,
            completion_rewards,
            tiers,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: RewardVars = env::from_env()?;
        let completion: CompletionRewards = env::prefixed_from_env("REWARD_")?;

        let tiers = TierTable::new(default_tiers())?;

        Ok(Self::new(vars.checkin_rewards, completion, tiers)?)
    }

    /// Reward paid on the given streak day, cycling through the table
    pub fn reward_for_day(&self, streak_day: i32) -> i64 {
        let len = self.checkin_rewards.len();
        let idx = (streak_day.max(1) as usize - 1) % len;
        self.checkin_rewards[idx]
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkin_rewards: default_checkin_rewards(),
            completion_rewards: CompletionRewards::default(),
            tiers: TierTable::default_table(),
        }
    }
}

fn default_tiers() -> Vec<Tier> {
    DEFAULT_TIERS
        .iter()
        .map(|(min_points, title)| Tier::new(*min_points, title))
        .collect()
}

impl TierTable {
    pub fn default_table() -> Self {
        TierTable::from_sorted(default_tiers())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error("invalid engine configuration: {0}")]
    Invalid(#[from] EngineError),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reward_table_cycles() {
        let config = EngineConfig::default();

        assert_eq!(config.reward_for_day(1), 5);
        assert_eq!(config.reward_for_day(7), 50);
        assert_eq!(config.reward_for_day(8), 5);
        assert_eq!(config.reward_for_day(15), 5);
        assert_eq!(config.reward_for_day(16), 10);
    }

    #[test]
    fn test_rejects_bad_tables() {
        let empty = EngineConfig::new(
            Vec::new(),
            CompletionRewards::default(),
            TierTable::default_table(),
        );
        assert!(matches!(empty, Err(EngineError::InvalidAction(_))));

        let negative = EngineConfig::new(
            vec![5, -1],
            CompletionRewards::default(),
            TierTable::default_table(),
        );
        assert!(matches!(negative, Err(EngineError::InvalidAction(_))));
    }

    #[test]
    fn test_completion_rewards_from_prefixed_vars() {
        let rewards: CompletionRewards = env::prefixed_from_iter(
            "REWARD_",
            vec![("REWARD_TASK_COMPLETE".to_string(), "7".to_string())],
        )
        .unwrap();

        assert_eq!(rewards.task_complete, 7);
        assert_eq!(rewards.lesson_read, 10);
        assert_eq!(rewards.points_for(ActionType::AssignmentComplete), 15);
        assert_eq!(rewards.points_for(ActionType::Post), 0);
    }
}
