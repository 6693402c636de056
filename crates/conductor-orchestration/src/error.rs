//! Error types for the orchestrators.
//!
//! Agent failures are caught at the smallest enclosing unit (one handoff,
//! one task, one node) and wrapped here together with the id of that unit,
//! so every failure a caller sees names where it happened.

use conductor_core::{AgentError, RegistryError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Orchestration component an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Registry,
    Handoff,
    Crew,
    Workflow,
    Coordinator,
    Bus,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Registry => "registry",
            Component::Handoff => "handoff",
            Component::Crew => "crew",
            Component::Workflow => "workflow",
            Component::Coordinator => "coordinator",
            Component::Bus => "bus",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the Handoff Manager, Crew, Workflow Graph Engine and
/// Coordinator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestrationError {
    /// A referenced agent is not registered.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Registry rejected an operation.
    #[error("Registry error: {0}")]
    Registry(RegistryError),

    /// The target (or returning caller) of a handoff failed.
    #[error("Handoff {handoff_id} from '{from}' to '{to}' failed: {source}")]
    Handoff {
        handoff_id: String,
        from: String,
        to: String,
        source: AgentError,
    },

    /// No registered handoff rule matched.
    #[error("No handoff rule matched input from '{from_agent}'")]
    NoRoute { from_agent: String },

    /// An AGENT node failed after exhausting its retries.
    #[error("Node '{node_id}' failed after {attempts} attempt(s): {source}")]
    NodeExecution {
        node_id: String,
        attempts: u32,
        source: AgentError,
    },

    /// A manual-approval checkpoint was not approved in time.
    #[error("Checkpoint '{checkpoint_id}' was not approved within {timeout:?}")]
    CheckpointTimeout {
        checkpoint_id: String,
        timeout: Duration,
    },

    /// A manual-approval checkpoint was rejected.
    #[error("Checkpoint '{checkpoint_id}' was rejected")]
    ApprovalRejected { checkpoint_id: String },

    /// One or more PARALLEL children failed.
    #[error("Parallel node '{node_id}' had failing branches: {}", .failures.join("; "))]
    ParallelFailure {
        node_id: String,
        failures: Vec<String>,
    },

    /// A traversal visited more nodes than allowed.
    #[error("Maximum steps exceeded ({0})")]
    StepLimitExceeded(usize),

    /// The graph definition is malformed.
    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    /// A crew, rule or coordinator setup is malformed.
    #[error("Invalid {component} configuration: {message}")]
    InvalidConfiguration {
        component: Component,
        message: String,
    },

    /// No snapshot exists for the checkpoint id.
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// The state cannot be resumed at the requested checkpoint.
    #[error("Run '{run_id}' cannot be resumed: {reason}")]
    NotResumable { run_id: String, reason: String },

    /// No orchestrator is registered under the name.
    #[error("Unknown orchestrator: {0}")]
    UnknownOrchestrator(String),

    /// Checkpoint persistence failed.
    #[error("Checkpoint storage error: {0}")]
    Storage(String),
}

impl OrchestrationError {
    /// Shorthand for [`OrchestrationError::InvalidConfiguration`].
    pub fn invalid_config(component: Component, message: impl Into<String>) -> Self {
        OrchestrationError::InvalidConfiguration {
            component,
            message: message.into(),
        }
    }

    /// Component the failure originated in.
    pub fn component(&self) -> Component {
        match self {
            OrchestrationError::AgentNotFound(_) | OrchestrationError::Registry(_) => {
                Component::Registry
            }
            OrchestrationError::Handoff { .. } | OrchestrationError::NoRoute { .. } => {
                Component::Handoff
            }
            OrchestrationError::NodeExecution { .. }
            | OrchestrationError::CheckpointTimeout { .. }
            | OrchestrationError::ApprovalRejected { .. }
            | OrchestrationError::ParallelFailure { .. }
            | OrchestrationError::StepLimitExceeded(_)
            | OrchestrationError::InvalidGraph(_)
            | OrchestrationError::CheckpointNotFound(_)
            | OrchestrationError::NotResumable { .. }
            | OrchestrationError::Storage(_) => Component::Workflow,
            OrchestrationError::InvalidConfiguration { component, .. } => *component,
            OrchestrationError::UnknownOrchestrator(_) => Component::Coordinator,
        }
    }

    /// Id of the handoff, node, checkpoint or agent the failure concerns.
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            OrchestrationError::AgentNotFound(id)
            | OrchestrationError::CheckpointNotFound(id)
            | OrchestrationError::UnknownOrchestrator(id) => Some(id),
            OrchestrationError::Handoff { handoff_id, .. } => Some(handoff_id),
            OrchestrationError::NoRoute { from_agent } => Some(from_agent),
            OrchestrationError::NodeExecution { node_id, .. }
            | OrchestrationError::ParallelFailure { node_id, .. } => Some(node_id),
            OrchestrationError::CheckpointTimeout { checkpoint_id, .. }
            | OrchestrationError::ApprovalRejected { checkpoint_id } => Some(checkpoint_id),
            OrchestrationError::NotResumable { run_id, .. } => Some(run_id),
            OrchestrationError::Registry(_)
            | OrchestrationError::StepLimitExceeded(_)
            | OrchestrationError::InvalidGraph(_)
            | OrchestrationError::InvalidConfiguration { .. }
            | OrchestrationError::Storage(_) => None,
        }
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            OrchestrationError::AgentNotFound(_) => "AGENT_NOT_FOUND",
            OrchestrationError::Registry(e) => e.error_code(),
            OrchestrationError::Handoff { .. } => "HANDOFF_FAILED",
            OrchestrationError::NoRoute { .. } => "NO_ROUTE",
            OrchestrationError::NodeExecution { .. } => "NODE_EXECUTION_FAILED",
            OrchestrationError::CheckpointTimeout { .. } => "CHECKPOINT_TIMEOUT",
            OrchestrationError::ApprovalRejected { .. } => "APPROVAL_REJECTED",
            OrchestrationError::ParallelFailure { .. } => "PARALLEL_FAILURE",
            OrchestrationError::StepLimitExceeded(_) => "STEP_LIMIT_EXCEEDED",
            OrchestrationError::InvalidGraph(_) => "INVALID_GRAPH",
            OrchestrationError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            OrchestrationError::CheckpointNotFound(_) => "CHECKPOINT_NOT_FOUND",
            OrchestrationError::NotResumable { .. } => "NOT_RESUMABLE",
            OrchestrationError::UnknownOrchestrator(_) => "UNKNOWN_ORCHESTRATOR",
            OrchestrationError::Storage(_) => "CHECKPOINT_STORAGE_ERROR",
        }
    }

    /// The wrapped agent failure, if any.
    pub fn agent_error(&self) -> Option<&AgentError> {
        match self {
            OrchestrationError::Handoff { source, .. }
            | OrchestrationError::NodeExecution { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<RegistryError> for OrchestrationError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AgentNotFound(id) => OrchestrationError::AgentNotFound(id),
            other => OrchestrationError::Registry(other),
        }
    }
}

/// Result type for orchestration operations.
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;
