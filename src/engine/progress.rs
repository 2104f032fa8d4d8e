use serde_json::{Map, Value};
use tracing::instrument;

use crate::db::models::progress::{
    CompletionCounts, CompletionInsert, CompletionKind, UnitDefinition, UnitProgress,
};
use crate::db::models::{UnitId, UserId};
use crate::engine::tier::rounded_percent;
use crate::engine::{Engine, EngineError, EngineResult};

/// `round(100 * Σcompleted / Σtotal)` over the four categories. Categories without items add
/// nothing to either side; a unit with no items at all is 0%.
pub fn progress_percentage(totals: &CompletionCounts, completed: &CompletionCounts) -> i32 {
    let (done, total) = CompletionKind::ALL
        .into_iter()
        .filter(|kind| totals.get(*kind) > 0)
        .fold((0i64, 0i64), |(done, total), kind| {
            (
                done + completed.get(kind).clamp(0, totals.get(kind)) as i64,
                total + totals.get(kind) as i64,
            )
        });

    rounded_percent(done, total).clamp(0, 100) as i32
}

impl Engine {
    /// Recomputes the user's derived progress for `unit` from durable completion state.
    ///
    /// Safe to call any number of times; the first call reaching 100% stamps `completed_at`,
    /// which is never moved afterwards.
    #[instrument(skip(self))]
    pub async fn recompute(&self, user: &UserId, unit: &UnitId) -> EngineResult<UnitProgress> {
        let definition = self.require_unit(unit).await?;

        let completed = self
            .store
            .completed_counts(user, unit)
            .await?
            .clamped_to(&definition.totals);
        let percentage = progress_percentage(&definition.totals, &completed);

        let now = self.clock.now();
        let existing = self.store.progress(user, unit).await?;

        let started_at = existing.as_ref().map(|p| p.started_at).unwrap_or(now);
        let completed_at = existing
            .as_ref()
            .and_then(|p| p.completed_at)
            .or((percentage == 100).then_some(now));

        let progress = UnitProgress {
            user_id: user.clone(),
            unit_id: unit.clone(),
            modules_completed: completed.modules,
            tasks_completed: completed.tasks,
            assignments_completed: completed.assignments,
            review_steps_completed: completed.review_steps,
            progress_percentage: percentage,
            started_at,
            completed_at,
            last_activity_at: now,
        };

        let saved = self.store.save_progress(&progress).await?;
        tracing::debug!(
            user = %user,
            unit = %unit,
            percentage = saved.progress_percentage,
            completed = saved.completed_at.is_some(),
            "unit progress recomputed"
        );

        Ok(saved)
    }

    /// True iff every prerequisite of `unit` is at 100% for `user`
    #[instrument(skip(self))]
    pub async fn check_prerequisites(&self, user: &UserId, unit: &UnitId) -> EngineResult<bool> {
        let definition = self.require_unit(unit).await?;
        self.prerequisites_met(user, &definition).await
    }

    /// Marks one item of a unit complete, awards its points once, and recomputes the unit
    #[instrument(skip(self))]
    pub async fn complete_item(
        &self,
        user: &UserId,
        unit: &UnitId,
        kind: CompletionKind,
        item_id: &str,
    ) -> EngineResult<UnitProgress> {
        if user.0.trim().is_empty() {
            return Err(EngineError::Unauthenticated);
        }

        let item_id = item_id.trim();
        if item_id.is_empty() {
            return Err(EngineError::InvalidAction("item id must not be empty".into()));
        }

        let definition = self.require_unit(unit).await?;
        if definition.totals.get(kind) == 0 {
            return Err(EngineError::InvalidAction(format!(
                "unit '{unit}' has no {kind} items"
            )));
        }

        if !self.prerequisites_met(user, &definition).await? {
            return Err(EngineError::InvalidAction(format!(
                "unit '{unit}' is locked until its prerequisites are complete"
            )));
        }

        let now = self.clock.now();
        let outcome = self
            .store
            .insert_completion(user, unit, kind, item_id, definition.totals.get(kind), now)
            .await?;

        if outcome == CompletionInsert::Full {
            return Err(EngineError::InvalidAction(format!(
                "every {kind} item of unit '{unit}' is already complete"
            )));
        }
        let newly_completed = outcome == CompletionInsert::Inserted;

        if let Some(action) = kind.action_type() {
            let mut metadata = Map::new();
            metadata.insert("unitId".into(), Value::from(unit.0.clone()));
            metadata.insert("itemId".into(), Value::from(item_id));

            self.record(
                user,
                action,
                self.config.completion_rewards.points_for(action),
                Some(format!("{unit}:{item_id}")),
                Some(metadata),
            )
            .await?;
        }

        tracing::debug!(user = %user, unit = %unit, %kind, item_id, newly_completed, "item completion");
        self.recompute(user, unit).await
    }

    /// Stored progress row; `NotFound` if the user never touched the unit
    #[instrument(skip(self))]
    pub async fn progress(&self, user: &UserId, unit: &UnitId) -> EngineResult<UnitProgress> {
        self.store
            .progress(user, unit)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("progress for unit '{unit}'")))
    }

    async fn require_unit(&self, unit: &UnitId) -> EngineResult<UnitDefinition> {
        self.store
            .unit(unit)
            .await?
            .ok_or_else(|| EngineError::InvalidAction(format!("unknown unit '{unit}'")))
    }

    async fn prerequisites_met(
        &self,
        user: &UserId,
        definition: &UnitDefinition,
    ) -> EngineResult<bool> {
        if definition.prerequisites.is_empty() {
            return Ok(true);
        }

        let rows = self
            .store
            .progress_many(user, &definition.prerequisites)
            .await?;

        Ok(definition.prerequisites.iter().all(|prereq| {
            rows.iter()
                .any(|row| &row.unit_id == prereq && row.is_complete())
        }))
    }
}
