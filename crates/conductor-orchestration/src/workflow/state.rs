//! Mutable state of one workflow run.
//!
//! A [`WorkflowState`] is owned by exactly one traversal. It serializes to a
//! flat JSON record so a paused run can be persisted and resumed later,
//! possibly by another process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::OrchestrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Waiting for approval at `paused_at`.
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    Success,
    Failure,
    Paused,
}

/// One node visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub node_id: String,
    pub outcome: NodeOutcome,
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Variables captured by a CHECKPOINT node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    /// Id of the checkpoint node.
    pub checkpoint_id: String,
    pub name: String,
    pub variables: HashMap<String, Value>,
    /// History length when the snapshot was taken.
    pub history_len: usize,
    pub timestamp: DateTime<Utc>,
}

/// A failure recorded on the state, flattened for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node_id: String,
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl NodeFailure {
    pub fn new(node_id: impl Into<String>, error: &OrchestrationError) -> Self {
        Self {
            node_id: node_id.into(),
            code: error.error_code().to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: String,
    pub graph_id: String,
    pub status: RunStatus,
    /// Node being executed, or the last one visited.
    pub current_node: Option<String>,
    pub variables: HashMap<String, Value>,
    pub history: Vec<HistoryEntry>,
    /// Append-only.
    checkpoints: Vec<CheckpointSnapshot>,
    /// Most recent failure not yet handled by an ERROR_HANDLER.
    pub error: Option<NodeFailure>,
    pub paused_at: Option<String>,
    /// When the pause at `paused_at` expires.
    pub pause_deadline: Option<DateTime<Utc>>,
    /// Checkpoint ids approved for resumption.
    pub approvals: Vec<String>,
    /// Error-handler retries spent, keyed `handler/node`.
    #[serde(default)]
    pub handler_attempts: HashMap<String, u32>,
    /// Node visits so far.
    pub steps: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(graph_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            graph_id: graph_id.into(),
            status: RunStatus::Running,
            current_node: None,
            variables: HashMap::new(),
            history: Vec::new(),
            checkpoints: Vec::new(),
            error: None,
            paused_at: None,
            pause_deadline: None,
            approvals: Vec::new(),
            handler_attempts: HashMap::new(),
            steps: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(key.into(), value.into());
        self.touch();
    }

    /// Node ids in visit order.
    pub fn visited_nodes(&self) -> Vec<&str> {
        self.history.iter().map(|h| h.node_id.as_str()).collect()
    }

    pub fn checkpoints(&self) -> &[CheckpointSnapshot] {
        &self.checkpoints
    }

    /// Latest snapshot taken by a checkpoint id or name.
    pub fn checkpoint(&self, id_or_name: &str) -> Option<&CheckpointSnapshot> {
        self.checkpoints
            .iter()
            .rev()
            .find(|c| c.checkpoint_id == id_or_name || c.name == id_or_name)
    }

    pub fn is_approved(&self, checkpoint_id: &str) -> bool {
        self.approvals.iter().any(|a| a == checkpoint_id)
    }

    pub fn is_paused(&self) -> bool {
        self.status == RunStatus::Paused
    }

    /// Restore variables from a snapshot and drop history recorded after it.
    /// Checkpoints themselves are kept. Returns false for unknown names.
    pub fn restore_checkpoint(&mut self, id_or_name: &str) -> bool {
        let Some(snapshot) = self.checkpoint(id_or_name).cloned() else {
            return false;
        };
        self.variables = snapshot.variables;
        self.history.truncate(snapshot.history_len);
        self.touch();
        true
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub(crate) fn push_checkpoint(&mut self, checkpoint_id: &str, name: &str) {
        self.checkpoints.push(CheckpointSnapshot {
            checkpoint_id: checkpoint_id.to_string(),
            name: name.to_string(),
            variables: self.variables.clone(),
            history_len: self.history.len(),
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn record(&mut self, node_id: &str, outcome: NodeOutcome, attempts: u32, error: Option<String>) {
        self.history.push(HistoryEntry {
            node_id: node_id.to_string(),
            outcome,
            attempts,
            error,
            timestamp: Utc::now(),
        });
        self.touch();
    }

    /// Merge the visits, snapshots and step count of a finished branch.
    pub(crate) fn absorb_branch(&mut self, branch: WorkflowState) {
        self.history.extend(branch.history);
        self.checkpoints.extend(branch.checkpoints);
        self.steps += branch.steps;
        self.touch();
    }

    /// A copy for a PARALLEL branch: same variables, empty history.
    pub(crate) fn fork(&self) -> WorkflowState {
        WorkflowState {
            history: Vec::new(),
            checkpoints: Vec::new(),
            error: None,
            steps: 0,
            ..self.clone()
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
