//! Workflow Graph Engine.
//!
//! A [`WorkflowGraph`] is a validated set of typed [`Node`]s joined by
//! conditioned [`Edge`]s. The [`WorkflowEngine`] walks it from the START
//! node, recording each visit in a [`WorkflowState`]:
//!
//! - AGENT nodes invoke a registered agent with a rendered template and
//!   store the output in a variable, retrying per [`RetryPolicy`]
//! - CONDITION nodes store the result of a [`Predicate`]
//! - CHECKPOINT nodes snapshot the variables and may pause for approval
//! - PARALLEL nodes run their children as concurrent branches
//! - ERROR_HANDLER nodes re-run the failed node or redirect to a fallback
//!
//! At each node the first outgoing edge, in declaration order, whose
//! condition holds is taken. Traversal stops at an END node or when no
//! edge matches.

mod approval;
mod engine;
mod graph;
mod predicate;
mod retry;
mod state;
mod store;

pub use approval::{ApprovalGate, GateDecision};
pub use engine::WorkflowEngine;
pub use graph::{
    AgentNodeConfig, CheckpointNodeConfig, ConditionNodeConfig, Edge, EdgeCondition,
    ErrorHandlerConfig, Node, NodeKind, ParallelNodeConfig, WorkflowBuilder, WorkflowDefinition,
    WorkflowGraph,
};
pub use predicate::{CompareOp, CustomPredicate, Predicate, PredicateError, Variables, lookup};
pub use retry::{Backoff, CustomBackoff, RetryPolicy};
pub use state::{
    CheckpointSnapshot, HistoryEntry, NodeFailure, NodeOutcome, RunStatus, WorkflowState,
};
pub use store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
