use core::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::UserId;

/// Informational key/value pairs attached to a ledger entry; values are JSON primitives
pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Checkin,
    Post,
    Comment,
    LessonRead,
    TaskComplete,
    AssignmentComplete,
    MediaUpload,
    TributePaid,
}

impl ActionType {
    pub const ALL: [ActionType; 8] = [
        ActionType::Checkin,
        ActionType::Post,
        ActionType::Comment,
        ActionType::LessonRead,
        ActionType::TaskComplete,
        ActionType::AssignmentComplete,
        ActionType::MediaUpload,
        ActionType::TributePaid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Checkin => "checkin",
            ActionType::Post => "post",
            ActionType::Comment => "comment",
            ActionType::LessonRead => "lessonRead",
            ActionType::TaskComplete => "taskComplete",
            ActionType::AssignmentComplete => "assignmentComplete",
            ActionType::MediaUpload => "mediaUpload",
            ActionType::TributePaid => "tributePaid",
        }
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("unknown action type '{s}'"))
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one point-earning action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub points: i64,
    pub action_type: ActionType,
    pub action_key: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// `ledger_entry` as stored; `action_type` is kept as text in the table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerEntryRow {
    pub id: Uuid,
    pub user_id: UserId,
    pub points: i64,
    pub action_type: String,
    pub action_key: Option<String>,
    pub metadata: sqlx::types::Json<Metadata>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = sqlx::Error;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        let action_type = row
            .action_type
            .parse::<ActionType>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;

        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            points: row.points,
            action_type,
            action_key: row.action_key,
            metadata: row.metadata.0,
            created_at: row.created_at,
        })
    }
}

/// A validated entry that has not been written yet
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub points: i64,
    pub action_type: ActionType,
    pub action_key: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an idempotent ledger insert. `created` is false when an entry for the same
/// `(user, action type, action key)` already existed and was returned instead.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recorded {
    pub entry: LedgerEntry,
    pub created: bool,
}

/// Body of `POST /ledger`. The action type is kept as a string so an unknown kind surfaces as a
/// validation error rather than a body rejection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRequest {
    pub action_type: String,
    pub points: i64,
    #[serde(default)]
    pub action_key: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_action_type_names_match_serde() {
        for action in ActionType::ALL {
            let json = serde_json::to_value(action).unwrap();
            assert_eq!(json, Value::String(action.as_str().to_string()));
            assert_eq!(action.as_str().parse::<ActionType>().unwrap(), action);
        }

        assert!("lesson_read".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_row_with_unknown_action_is_rejected() {
        let row = LedgerEntryRow {
            id: Uuid::new_v4(),
            user_id: UserId::from("alice"),
            points: 3,
            action_type: String::from("post"),
            action_key: None,
            metadata: sqlx::types::Json(Metadata::new()),
            created_at: Utc::now(),
        };

        let entry = LedgerEntry::try_from(row.clone()).unwrap();
        assert_eq!(entry.action_type, ActionType::Post);

        let bad = LedgerEntryRow {
            action_type: String::from("karma"),
            ..row
        };
        assert!(matches!(
            LedgerEntry::try_from(bad),
            Err(sqlx::Error::Decode(_))
        ));
    }
}
