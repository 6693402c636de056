//! Aggregate results of a crew execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{Task, TaskStatus};

/// Crew execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One eligible task at a time, highest priority first.
    Sequential,
    /// Waves of all currently eligible tasks, run concurrently.
    Parallel,
    /// The Manager picks the assignee of each task.
    Hierarchical,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Hierarchical => "hierarchical",
        }
    }
}

/// Final state of one task as seen at the end of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub description: String,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
}

impl From<&Task> for TaskReport {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            description: task.description.clone(),
            status: task.status,
            assigned_to: task.assigned_to.clone(),
            result: task.result.clone(),
            error: task.error.clone(),
            duration_ms: task.duration_ms(),
        }
    }
}

/// Result of [`Crew::execute`](super::Crew::execute).
///
/// `success` is true when no task failed, or when the crew tolerates partial
/// failure. Tasks left pending because a dependency failed are counted as
/// `blocked_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewReport {
    pub crew: String,
    /// Requested strategy.
    pub mode: ExecutionMode,
    /// Strategy actually used; differs when hierarchical falls back.
    pub effective_mode: ExecutionMode,
    pub tasks: Vec<TaskReport>,
    pub completed_count: usize,
    pub failed_count: usize,
    pub blocked_count: usize,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CrewReport {
    pub(crate) fn build(
        crew: &str,
        mode: ExecutionMode,
        effective_mode: ExecutionMode,
        tasks: &[Task],
        tolerate_partial_failure: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        let failed_count = count(TaskStatus::Failed);

        Self {
            crew: crew.to_string(),
            mode,
            effective_mode,
            tasks: tasks.iter().map(TaskReport::from).collect(),
            completed_count: count(TaskStatus::Complete),
            failed_count,
            blocked_count: count(TaskStatus::Pending),
            success: failed_count == 0 || tolerate_partial_failure,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// `"success"` or `"partial_failure"`.
    pub fn status_label(&self) -> &'static str {
        if self.failed_count == 0 {
            "success"
        } else {
            "partial_failure"
        }
    }
}
