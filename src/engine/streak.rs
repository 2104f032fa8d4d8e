use chrono::{Days, NaiveDate};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::db::models::UserId;
use crate::db::models::checkin::{
    CheckinInsert, CheckinOutcome, CheckinRecord, StreakDay, StreakStatus,
};
use crate::db::models::ledger::ActionType;
use crate::engine::{Engine, EngineError, EngineResult};

/// Length of the streak visualization window, ending today
pub const STREAK_WINDOW_DAYS: u64 = 7;

impl Engine {
    /// Daily check-in. Awards the streak reward on the first call of a UTC day; every later call
    /// that day returns the same record with `is_new_checkin = false`.
    #[instrument(skip(self))]
    pub async fn checkin(&self, user: &UserId) -> EngineResult<CheckinOutcome> {
        if user.0.trim().is_empty() {
            return Err(EngineError::Unauthenticated);
        }

        let now = self.clock.now();
        let today = now.date_naive();

        if let Some(existing) = self.store.checkin_on(user, today).await? {
            tracing::debug!(user = %user, day = %today, "already checked in today");
            return Ok(CheckinOutcome::from_record(&existing, false));
        }

        let streak_day = match self.store.checkin_on(user, previous_day(today)).await? {
            Some(yesterday) => yesterday.streak_day + 1,
            None => 1,
        };
        let points_awarded = self.config.reward_for_day(streak_day);

        let record = CheckinRecord {
            user_id: user.clone(),
            day: today,
            streak_day,
            points_awarded,
            created_at: now,
        };

        let mut metadata = Map::new();
        metadata.insert("streakDay".into(), Value::from(streak_day));

        let entry = self.new_entry(
            user,
            ActionType::Checkin,
            points_awarded,
            Some(day_key(today)),
            Some(metadata),
        )?;

        match self.store.insert_checkin(record, entry).await {
            Ok(CheckinInsert::Inserted(record)) => {
                tracing::info!(
                    user = %user,
                    day = %today,
                    streak_day = record.streak_day,
                    points = record.points_awarded,
                    "checked in"
                );
                Ok(CheckinOutcome::from_record(&record, true))
            }
            Ok(CheckinInsert::Existing(record)) => {
                tracing::debug!(user = %user, day = %today, "lost check-in race, returning winner");
                Ok(CheckinOutcome::from_record(&record, false))
            }
            Err(EngineError::ConcurrentConflict) => self
                .store
                .checkin_on(user, today)
                .await?
                .map(|record| CheckinOutcome::from_record(&record, false))
                .ok_or(EngineError::ConcurrentConflict),
            Err(e) => Err(e),
        }
    }

    /// Rolling 7-day window for the streak strip, plus what the next check-in would pay
    #[instrument(skip(self))]
    pub async fn streak_status(&self, user: &UserId) -> EngineResult<StreakStatus> {
        let today = self.clock.today();
        let from = today
            .checked_sub_days(Days::new(STREAK_WINDOW_DAYS - 1))
            .unwrap_or(today);

        let records = self.store.checkins_between(user, from, today).await?;
        let find = |day: NaiveDate| records.iter().find(|r| r.day == day);

        let window = from
            .iter_days()
            .take(STREAK_WINDOW_DAYS as usize)
            .map(|date| match find(date) {
                Some(r) => StreakDay {
                    date,
                    checked_in: true,
                    streak_day: Some(r.streak_day),
                    points_awarded: Some(r.points_awarded),
                },
                None => StreakDay {
                    date,
                    checked_in: false,
                    streak_day: None,
                    points_awarded: None,
                },
            })
            .collect();

        let todays = find(today);
        let yesterdays = find(previous_day(today));

        let current_streak = todays
            .or(yesterdays)
            .map(|r| r.streak_day)
            .unwrap_or(0);

        let next_streak_day = match (todays, yesterdays) {
            (Some(t), _) => t.streak_day + 1,
            (None, Some(y)) => y.streak_day + 1,
            (None, None) => 1,
        };

        Ok(StreakStatus {
            today,
            current_streak,
            checked_in_today: todays.is_some(),
            next_reward: self.config.reward_for_day(next_streak_day),
            window,
        })
    }
}

fn previous_day(day: NaiveDate) -> NaiveDate {
    day.pred_opt().unwrap_or(NaiveDate::MIN)
}

/// Ledger action key for a check-in: the UTC date as `YYYY-MM-DD`
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}
