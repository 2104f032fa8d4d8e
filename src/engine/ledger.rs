use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::db::models::UserId;
use crate::db::models::ledger::{ActionType, LedgerEntry, Metadata, NewLedgerEntry, Recorded};
use crate::engine::{Engine, EngineError, EngineResult};

pub const MAX_ACTION_KEY_LEN: usize = 256;

pub const DEFAULT_RECENT_LIMIT: i64 = 20;
pub const MAX_RECENT_LIMIT: i64 = 100;

impl Engine {
    /// Appends a point-earning action to the ledger, at most once per
    /// `(user, action type, action key)`.
    #[instrument(skip(self, metadata))]
    pub async fn record(
        &self,
        user: &UserId,
        action_type: ActionType,
        points: i64,
        action_key: Option<String>,
        metadata: Option<Metadata>,
    ) -> EngineResult<Recorded> {
        if action_type == ActionType::Checkin {
            return Err(EngineError::InvalidAction(
                "check-in points are only awarded by the daily check-in".into(),
            ));
        }

        let entry = self.new_entry(user, action_type, points, action_key, metadata)?;
        let recorded = self.store.insert_entry(entry).await?;

        if recorded.created {
            tracing::info!(
                user = %user,
                action = %action_type,
                points = recorded.entry.points,
                "ledger entry recorded"
            );
        } else {
            tracing::debug!(user = %user, action = %action_type, "duplicate award ignored");
        }

        Ok(recorded)
    }

    /// Newest entries first, bounded by `limit` (default 20, clamped to `[1, 100]`)
    #[instrument(skip(self))]
    pub async fn list_recent(
        &self,
        user: &UserId,
        limit: Option<i64>,
    ) -> EngineResult<Vec<LedgerEntry>> {
        let limit = limit
            .unwrap_or(DEFAULT_RECENT_LIMIT)
            .clamp(1, MAX_RECENT_LIMIT);

        self.store.recent_entries(user, limit).await
    }

    /// Validates an action and builds the entry that would be written for it
    pub(crate) fn new_entry(
        &self,
        user: &UserId,
        action_type: ActionType,
        points: i64,
        action_key: Option<String>,
        metadata: Option<Metadata>,
    ) -> EngineResult<NewLedgerEntry> {
        if user.0.trim().is_empty() {
            return Err(EngineError::Unauthenticated);
        }

        if points < 0 {
            return Err(EngineError::InvalidAction(format!(
                "points must not be negative (got {points})"
            )));
        }

        let action_key = match action_key {
            Some(key) => Some(validate_action_key(key)?),
            None => None,
        };

        let metadata = metadata.unwrap_or_default();
        validate_metadata(&metadata)?;

        Ok(NewLedgerEntry {
            id: Uuid::new_v4(),
            user_id: user.clone(),
            points,
            action_type,
            action_key,
            metadata,
            created_at: self.clock.now(),
        })
    }
}

fn validate_action_key(key: String) -> EngineResult<String> {
    let trimmed = key.trim();

    if trimmed.is_empty() {
        return Err(EngineError::InvalidAction("action key must not be empty".into()));
    }

    if trimmed.len() > MAX_ACTION_KEY_LEN {
        return Err(EngineError::InvalidAction(format!(
            "action key exceeds {MAX_ACTION_KEY_LEN} bytes"
        )));
    }

    Ok(trimmed.to_string())
}

/// Metadata is informational only, so anything beyond flat primitive values is rejected
fn validate_metadata(metadata: &Metadata) -> EngineResult<()> {
    match metadata
        .iter()
        .find(|(_, v)| matches!(v, Value::Array(_) | Value::Object(_)))
    {
        Some((key, _)) => Err(EngineError::InvalidAction(format!(
            "metadata value for '{key}' must be a string, number, boolean or null"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::engine::test_support::{engine, user};

    #[tokio::test]
    async fn test_record_is_idempotent_per_key() {
        let (engine, _, _) = engine();
        let alice = user("alice");

        let first = engine
            .record(&alice, ActionType::LessonRead, 10, Some("lesson-1".into()), None)
            .await
            .unwrap();
        let second = engine
            .record(&alice, ActionType::LessonRead, 10, Some(" lesson-1 ".into()), None)
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.entry.id, second.entry.id);

        let entries = engine.list_recent(&alice, None).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_same_key_different_action_or_user_is_distinct() {
        let (engine, _, _) = engine();
        let (alice, bob) = (user("alice"), user("bob"));

        let key = Some("item-9".to_string());
        assert!(engine.record(&alice, ActionType::Post, 2, key.clone(), None).await.unwrap().created);
        assert!(engine.record(&alice, ActionType::Comment, 1, key.clone(), None).await.unwrap().created);
        assert!(engine.record(&bob, ActionType::Post, 2, key, None).await.unwrap().created);
    }

    #[tokio::test]
    async fn test_keyless_entries_are_never_deduplicated() {
        let (engine, _, _) = engine();
        let alice = user("alice");

        for _ in 0..3 {
            let res = engine.record(&alice, ActionType::Comment, 1, None, None).await.unwrap();
            assert!(res.created);
        }

        assert_eq!(engine.list_recent(&alice, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_record_validation() {
        let (engine, _, _) = engine();
        let alice = user("alice");

        let negative = engine.record(&alice, ActionType::Post, -5, None, None).await;
        assert!(matches!(negative, Err(EngineError::InvalidAction(_))));

        let blank_key = engine
            .record(&alice, ActionType::Post, 1, Some("   ".into()), None)
            .await;
        assert!(matches!(blank_key, Err(EngineError::InvalidAction(_))));

        let long_key = engine
            .record(&alice, ActionType::Post, 1, Some("k".repeat(300)), None)
            .await;
        assert!(matches!(long_key, Err(EngineError::InvalidAction(_))));

        let nested = json!({ "tags": ["a", "b"] }).as_object().cloned();
        let nested = engine.record(&alice, ActionType::Post, 1, None, nested).await;
        assert!(matches!(nested, Err(EngineError::InvalidAction(_))));

        let checkin = engine
            .record(&alice, ActionType::Checkin, 5, Some("2026-03-01".into()), None)
            .await;
        assert!(matches!(checkin, Err(EngineError::InvalidAction(_))));

        let anonymous = engine.record(&user(""), ActionType::Post, 1, None, None).await;
        assert!(matches!(anonymous, Err(EngineError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_zero_points_and_metadata_are_kept() {
        let (engine, _, _) = engine();
        let alice = user("alice");

        let metadata = json!({ "source": "feed", "length": 42, "pinned": false, "note": null })
            .as_object()
            .cloned();
        let res = engine
            .record(&alice, ActionType::MediaUpload, 0, None, metadata.clone())
            .await
            .unwrap();

        assert_eq!(res.entry.points, 0);
        assert_eq!(Some(res.entry.metadata), metadata);
    }

    #[tokio::test]
    async fn test_list_recent_order_and_limit() {
        let (engine, _, clock) = engine();
        let alice = user("alice");

        for i in 0..5 {
            engine
                .record(&alice, ActionType::Post, i, Some(format!("post-{i}")), None)
                .await
                .unwrap();
            clock.advance(chrono::Duration::minutes(1));
        }

        let recent = engine.list_recent(&alice, Some(3)).await.unwrap();
        let keys: Vec<_> = recent.iter().map(|e| e.action_key.clone().unwrap()).collect();
        assert_eq!(keys, vec!["post-4", "post-3", "post-2"]);

        // clamped up to 1
        assert_eq!(engine.list_recent(&alice, Some(0)).await.unwrap().len(), 1);

        // a fresh snapshot each call
        let again = engine.list_recent(&alice, Some(3)).await.unwrap();
        assert_eq!(recent, again);
    }
}
