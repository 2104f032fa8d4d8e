use core::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ledger::ActionType;
use super::{UnitId, UserId};

/// Item counts for the four completion categories of a unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionCounts {
    pub modules: i32,
    pub tasks: i32,
    pub assignments: i32,
    pub review_steps: i32,
}

impl CompletionCounts {
    pub fn new(modules: i32, tasks: i32, assignments: i32, review_steps: i32) -> Self {
        Self {
            modules,
            tasks,
            assignments,
            review_steps,
        }
    }

    pub fn get(&self, kind: CompletionKind) -> i32 {
        match kind {
            CompletionKind::Module => self.modules,
            CompletionKind::Task => self.tasks,
            CompletionKind::Assignment => self.assignments,
            CompletionKind::ReviewStep => self.review_steps,
        }
    }

    pub fn get_mut(&mut self, kind: CompletionKind) -> &mut i32 {
        match kind {
            CompletionKind::Module => &mut self.modules,
            CompletionKind::Task => &mut self.tasks,
            CompletionKind::Assignment => &mut self.assignments,
            CompletionKind::ReviewStep => &mut self.review_steps,
        }
    }

    /// Each category clamped into `[0, totals]` so stray completions can't push past 100%
    pub fn clamped_to(&self, totals: &CompletionCounts) -> CompletionCounts {
        let mut out = CompletionCounts::default();
        for kind in CompletionKind::ALL {
            *out.get_mut(kind) = self.get(kind).clamp(0, totals.get(kind).max(0));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionKind {
    Module,
    Task,
    Assignment,
    ReviewStep,
}

impl CompletionKind {
    pub const ALL: [CompletionKind; 4] = [
        CompletionKind::Module,
        CompletionKind::Task,
        CompletionKind::Assignment,
        CompletionKind::ReviewStep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionKind::Module => "module",
            CompletionKind::Task => "task",
            CompletionKind::Assignment => "assignment",
            CompletionKind::ReviewStep => "reviewStep",
        }
    }

    /// Ledger action awarded for completing an item of this kind; review steps earn nothing
    pub fn action_type(&self) -> Option<ActionType> {
        match self {
            CompletionKind::Module => Some(ActionType::LessonRead),
            CompletionKind::Task => Some(ActionType::TaskComplete),
            CompletionKind::Assignment => Some(ActionType::AssignmentComplete),
            CompletionKind::ReviewStep => None,
        }
    }
}

impl FromStr for CompletionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompletionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown completion kind '{s}'"))
    }
}

impl fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of recording one completed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionInsert {
    Inserted,
    /// The item was already recorded
    Existing,
    /// Every item of that kind is already complete; nothing was written
    Full,
}

/// A curriculum unit (e.g. a week) and what it takes to finish it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDefinition {
    pub id: UnitId,
    pub title: String,
    pub totals: CompletionCounts,
    pub prerequisites: Vec<UnitId>,
}

/// `curriculum_unit` as stored; prerequisites live in `unit_prerequisite`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UnitRow {
    pub id: UnitId,
    pub title: String,
    pub total_modules: i32,
    pub total_tasks: i32,
    pub total_assignments: i32,
    pub total_review_steps: i32,
}

impl UnitRow {
    pub fn into_definition(self, prerequisites: Vec<UnitId>) -> UnitDefinition {
        UnitDefinition {
            id: self.id,
            title: self.title,
            totals: CompletionCounts::new(
                self.total_modules,
                self.total_tasks,
                self.total_assignments,
                self.total_review_steps,
            ),
            prerequisites,
        }
    }
}

/// Derived progress for one user in one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UnitProgress {
    pub user_id: UserId,
    pub unit_id: UnitId,
    pub modules_completed: i32,
    pub tasks_completed: i32,
    pub assignments_completed: i32,
    pub review_steps_completed: i32,
    pub progress_percentage: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

impl UnitProgress {
    pub fn is_complete(&self) -> bool {
        self.progress_percentage == 100
    }
}

/// Body of `POST /units/{unit_id}/complete`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteItemRequest {
    pub kind: String,
    pub item_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockStatus {
    pub unlocked: bool,
}
