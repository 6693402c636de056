//! Crew tasks and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Task lifecycle: `Pending -> InProgress -> Complete | Failed`.
///
/// A task can also fail straight from `Pending` when no member can take it.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::InProgress, TaskStatus::Complete)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for a new task.
///
/// ```rust
/// use conductor_orchestration::crew::TaskSpec;
///
/// let spec = TaskSpec::new("Summarise {crew0-task0}")
///     .priority(5)
///     .depends_on(["crew0-task0"])
///     .requires(["writing"]);
/// assert_eq!(spec.dependencies, vec!["crew0-task0"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl TaskSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn requires<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills
            .extend(skills.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A unit of crew work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub priority: i32,
    pub dependencies: Vec<String>,
    pub required_skills: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Insertion index within the crew; breaks priority ties.
    pub slot: usize,
}

impl Task {
    pub(crate) fn from_spec(id: String, slot: usize, spec: TaskSpec) -> Self {
        Self {
            id,
            description: spec.description,
            priority: spec.priority,
            dependencies: spec.dependencies,
            required_skills: spec.required_skills,
            metadata: spec.metadata,
            status: TaskStatus::Pending,
            assigned_to: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            slot,
        }
    }

    pub(crate) fn start(&mut self, member: &str) -> bool {
        if !self.status.can_transition_to(TaskStatus::InProgress) {
            return false;
        }
        self.status = TaskStatus::InProgress;
        self.assigned_to = Some(member.to_string());
        self.started_at = Some(Utc::now());
        true
    }

    pub(crate) fn complete(&mut self, result: String) -> bool {
        if !self.status.can_transition_to(TaskStatus::Complete) {
            return false;
        }
        self.status = TaskStatus::Complete;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        true
    }

    /// The error message doubles as the task result.
    pub(crate) fn fail(&mut self, error: String) -> bool {
        if !self.status.can_transition_to(TaskStatus::Failed) {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.result = Some(error.clone());
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        true
    }

    /// Wall time between start and completion, if both happened.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
