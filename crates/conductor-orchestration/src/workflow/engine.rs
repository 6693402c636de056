//! Traversal of a [`WorkflowGraph`].
//!
//! The engine is stateless between calls: everything about a run lives in
//! its [`WorkflowState`], which is threaded through the traversal and handed
//! back to the caller when the run completes, fails or pauses. A paused
//! state can be resumed later, in this process or after a restart when a
//! [`CheckpointStore`] is attached.

use chrono::{DateTime, TimeDelta, Utc};
use conductor_core::template::render_with_values;
use conductor_core::{AgentContext, AgentRegistry, WorkflowConfig};
use futures::future::{BoxFuture, join_all};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::approval::{ApprovalGate, GateDecision};
use super::graph::{
    AgentNodeConfig, CheckpointNodeConfig, ErrorHandlerConfig, Node, NodeKind, ParallelNodeConfig,
    WorkflowGraph,
};
use super::state::{NodeFailure, NodeOutcome, RunStatus, WorkflowState};
use super::store::CheckpointStore;
use crate::error::{Component, OrchestrationError, OrchestrationResult};
use crate::events::{
    EventPublisher, WORKFLOW_COMPLETED, WORKFLOW_FAILED, WORKFLOW_NODE_COMPLETED,
    WORKFLOW_NODE_FAILED, WORKFLOW_PAUSED, WORKFLOW_RESUMED, WORKFLOW_STARTED,
};

/// Result of executing one node.
enum NodeResult {
    Success { attempts: u32 },
    /// `error: None` keeps the failure already recorded on the state.
    Failure {
        attempts: u32,
        error: Option<OrchestrationError>,
    },
    /// Continue at a node without evaluating edges.
    Redirect { target: String },
    Paused,
    /// A PARALLEL node's result plus its finished branches, whose visits are
    /// recorded after the node's own.
    Joined {
        result: Box<NodeResult>,
        branches: Vec<WorkflowState>,
    },
}

/// Why a traversal stopped.
enum Halt {
    End,
    /// No outgoing edge matched after a node with this outcome.
    DeadEnd { succeeded: bool },
    /// A PARALLEL branch reached one of its join targets.
    Join,
    Paused,
    Aborted(OrchestrationError),
}

/// Executes runs of one workflow graph.
pub struct WorkflowEngine {
    graph: Arc<WorkflowGraph>,
    registry: Arc<AgentRegistry>,
    events: EventPublisher,
    config: WorkflowConfig,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl WorkflowEngine {
    pub fn new(graph: WorkflowGraph, registry: Arc<AgentRegistry>) -> Self {
        Self {
            graph: Arc::new(graph),
            registry,
            events: EventPublisher::disabled(),
            config: WorkflowConfig::default(),
            store: None,
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist paused and finished states to `store`.
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn name(&self) -> &str {
        self.graph.name()
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Start a fresh run. `input` is available to templates as `{input}`.
    ///
    /// Node failures do not produce an `Err`: the returned state carries
    /// `status` and the last unhandled `error`.
    pub async fn execute(
        &self,
        input: &str,
        variables: HashMap<String, Value>,
    ) -> OrchestrationResult<WorkflowState> {
        let mut state = WorkflowState::new(self.graph.name()).with_variables(variables);
        state.set("input", input);

        info!(workflow = %self.graph.name(), run_id = %state.run_id, "Starting workflow");
        self.events
            .emit(
                WORKFLOW_STARTED,
                json!({ "workflow": self.graph.name(), "run_id": state.run_id }),
            )
            .await;

        let start = self.graph.start_node().to_string();
        let halt = self.drive(&mut state, start, None).await;
        Ok(self.finish(state, halt).await)
    }

    /// Record approval of the checkpoint `state` is paused at.
    pub fn approve(&self, state: &mut WorkflowState, checkpoint_id: &str) -> OrchestrationResult<()> {
        self.check_paused_at(state, checkpoint_id)?;
        if self.pause_expired(state) {
            return Err(self.timeout_error(checkpoint_id));
        }
        if !state.is_approved(checkpoint_id) {
            state.approvals.push(checkpoint_id.to_string());
            state.touch();
        }
        info!(run_id = %state.run_id, checkpoint = %checkpoint_id, "Checkpoint approved");
        Ok(())
    }

    /// Continue a run paused at `checkpoint_id`.
    ///
    /// Variables are reset to the checkpoint's snapshot and traversal
    /// follows the checkpoint's outgoing edges. An approved checkpoint
    /// continues as a success; an unapproved one whose timeout has expired
    /// continues as a failure with [`OrchestrationError::CheckpointTimeout`].
    pub async fn resume(
        &self,
        state: WorkflowState,
        checkpoint_id: &str,
    ) -> OrchestrationResult<WorkflowState> {
        self.check_paused_at(&state, checkpoint_id)?;
        if state.checkpoint(checkpoint_id).is_none() {
            return Err(OrchestrationError::CheckpointNotFound(checkpoint_id.to_string()));
        }

        if state.is_approved(checkpoint_id) {
            Ok(self.continue_after(state, checkpoint_id, None).await)
        } else if self.pause_expired(&state) {
            let error = self.timeout_error(checkpoint_id);
            Ok(self.continue_after(state, checkpoint_id, Some(error)).await)
        } else {
            Err(OrchestrationError::NotResumable {
                run_id: state.run_id.clone(),
                reason: format!("checkpoint '{}' has not been approved", checkpoint_id),
            })
        }
    }

    /// Approve a persisted run's checkpoint and save it back.
    pub async fn approve_stored(&self, run_id: &str, checkpoint_id: &str) -> OrchestrationResult<()> {
        let store = self.require_store(run_id)?;
        let mut state = self.load(store.as_ref(), run_id).await?;
        self.approve(&mut state, checkpoint_id)?;
        store.save(&state).await
    }

    /// Load a persisted run and resume it at `checkpoint_id`.
    pub async fn resume_from_store(
        &self,
        run_id: &str,
        checkpoint_id: &str,
    ) -> OrchestrationResult<WorkflowState> {
        let store = self.require_store(run_id)?;
        let state = self.load(store.as_ref(), run_id).await?;
        self.resume(state, checkpoint_id).await
    }

    /// Run to completion, waiting on `gate` at every manual checkpoint.
    ///
    /// The checkpoint's timeout bounds each wait; rejection and timeout both
    /// continue along the checkpoint's failure path.
    pub async fn run_with_gate(
        &self,
        input: &str,
        variables: HashMap<String, Value>,
        gate: &ApprovalGate,
    ) -> OrchestrationResult<WorkflowState> {
        let mut state = self.execute(input, variables).await?;

        while state.is_paused() {
            let Some(checkpoint_id) = state.paused_at.clone() else {
                break;
            };
            let remaining = state
                .pause_deadline
                .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO));

            state = match gate.wait(&checkpoint_id, remaining).await {
                GateDecision::Approved => {
                    self.approve(&mut state, &checkpoint_id)?;
                    self.resume(state, &checkpoint_id).await?
                }
                GateDecision::Rejected => {
                    let error = OrchestrationError::ApprovalRejected {
                        checkpoint_id: checkpoint_id.clone(),
                    };
                    self.continue_after(state, &checkpoint_id, Some(error)).await
                }
                GateDecision::TimedOut => {
                    let error = self.timeout_error(&checkpoint_id);
                    self.continue_after(state, &checkpoint_id, Some(error)).await
                }
            };
        }
        Ok(state)
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Visit nodes from `entry` until the traversal halts. `joins` is set for
    /// PARALLEL branches and lists the nodes where the branch hands control
    /// back to its parent.
    fn drive<'a>(
        &'a self,
        state: &'a mut WorkflowState,
        entry: String,
        joins: Option<&'a [String]>,
    ) -> BoxFuture<'a, Halt> {
        Box::pin(async move {
            let mut current = entry;
            loop {
                if joins.is_some_and(|j| j.contains(&current)) {
                    return Halt::Join;
                }
                if state.steps >= self.config.max_steps {
                    warn!(run_id = %state.run_id, max_steps = self.config.max_steps, "Step limit reached");
                    return Halt::Aborted(OrchestrationError::StepLimitExceeded(self.config.max_steps));
                }
                let Some(node) = self.graph.node(&current) else {
                    return Halt::Aborted(OrchestrationError::InvalidGraph(format!(
                        "{}: unknown node '{}'",
                        self.graph.name(),
                        current
                    )));
                };

                state.steps += 1;
                state.current_node = Some(node.id.clone());
                debug!(run_id = %state.run_id, node = %node.id, kind = node.kind.type_name(), "Executing node");

                let (result, branches) = match self.run_node(node, state, joins.is_some()).await {
                    NodeResult::Joined { result, branches } => (*result, branches),
                    other => (other, Vec::new()),
                };
                let succeeded = match result {
                    NodeResult::Success { attempts } => {
                        state.record(&node.id, NodeOutcome::Success, attempts, None);
                        self.emit_node(WORKFLOW_NODE_COMPLETED, state, node, attempts, None)
                            .await;
                        true
                    }
                    NodeResult::Failure { attempts, error } => {
                        if let Some(error) = &error {
                            state.error = Some(NodeFailure::new(&node.id, error));
                        }
                        let message = state.error.as_ref().map(|e| e.message.clone());
                        warn!(
                            run_id = %state.run_id,
                            node = %node.id,
                            error = message.as_deref().unwrap_or("unknown"),
                            "Node failed"
                        );
                        state.record(&node.id, NodeOutcome::Failure, attempts, message.clone());
                        self.emit_node(WORKFLOW_NODE_FAILED, state, node, attempts, message)
                            .await;
                        false
                    }
                    NodeResult::Redirect { target } => {
                        state.record(&node.id, NodeOutcome::Success, 1, None);
                        self.emit_node(WORKFLOW_NODE_COMPLETED, state, node, 1, None)
                            .await;
                        current = target;
                        continue;
                    }
                    NodeResult::Paused => {
                        state.record(&node.id, NodeOutcome::Paused, 1, None);
                        return Halt::Paused;
                    }
                    NodeResult::Joined { .. } => false,
                };
                for branch in branches {
                    state.absorb_branch(branch);
                }

                if node.is_end() {
                    return Halt::End;
                }
                match self.graph.next_node(&node.id, succeeded, &state.variables) {
                    Some(next) => current = next.to_string(),
                    None => return Halt::DeadEnd { succeeded },
                }
            }
        })
    }

    async fn run_node(&self, node: &Node, state: &mut WorkflowState, in_branch: bool) -> NodeResult {
        match &node.kind {
            NodeKind::Start | NodeKind::End => NodeResult::Success { attempts: 1 },
            NodeKind::Agent(cfg) => self.run_agent(node, cfg, state).await,
            NodeKind::Condition(cfg) => {
                let result = cfg.predicate.evaluate(&state.variables);
                debug!(node = %node.id, result, "Condition evaluated");
                state.set(cfg.output_key.clone(), result);
                NodeResult::Success { attempts: 1 }
            }
            NodeKind::Checkpoint(cfg) => self.run_checkpoint(node, cfg, state, in_branch),
            NodeKind::Parallel(cfg) => self.run_parallel(node, cfg, state).await,
            NodeKind::ErrorHandler(cfg) => self.run_error_handler(node, cfg, state),
        }
    }

    async fn run_agent(&self, node: &Node, cfg: &AgentNodeConfig, state: &mut WorkflowState) -> NodeResult {
        let handle = match self.registry.resolve(&cfg.agent_id) {
            Ok(handle) => handle,
            Err(e) => {
                return NodeResult::Failure {
                    attempts: 0,
                    error: Some(e.into()),
                };
            }
        };
        let policy = node.retry.clone().unwrap_or_default();
        let input = render_with_values(&cfg.input_template, &state.variables);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let context = AgentContext::new()
                .with("session_id", state.run_id.as_str())
                .with("workflow", self.graph.name())
                .with("node", node.id.as_str())
                .with("attempt", attempt)
                .with("variables", Value::Object(state.variables.clone().into_iter().collect()));

            match handle.invoke(&input, &context).await {
                Ok(output) => {
                    if let Some(key) = &cfg.output_key {
                        state.set(key.clone(), output);
                    }
                    return NodeResult::Success { attempts: attempt };
                }
                Err(e) if attempt < policy.max_attempts() => {
                    let delay = policy.delay_for(attempt, self.config.default_retry_delay());
                    warn!(
                        node = %node.id,
                        agent_id = %cfg.agent_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Agent node failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    return NodeResult::Failure {
                        attempts: attempt,
                        error: Some(OrchestrationError::NodeExecution {
                            node_id: node.id.clone(),
                            attempts: attempt,
                            source,
                        }),
                    };
                }
            }
        }
    }

    fn run_checkpoint(
        &self,
        node: &Node,
        cfg: &CheckpointNodeConfig,
        state: &mut WorkflowState,
        in_branch: bool,
    ) -> NodeResult {
        let name = cfg.name.as_deref().unwrap_or(node.id.as_str());
        state.push_checkpoint(&node.id, name);
        debug!(run_id = %state.run_id, checkpoint = %node.id, name = %name, "Checkpoint saved");

        if !cfg.manual_approval {
            return NodeResult::Success { attempts: 1 };
        }
        if in_branch {
            return NodeResult::Failure {
                attempts: 1,
                error: Some(OrchestrationError::invalid_config(
                    Component::Workflow,
                    format!("checkpoint '{}' cannot wait for approval inside a parallel branch", node.id),
                )),
            };
        }

        state.status = RunStatus::Paused;
        state.paused_at = Some(node.id.clone());
        state.pause_deadline = cfg.timeout_ms.and_then(|ms| {
            let deadline = deadline_after(ms);
            if deadline.is_none() {
                warn!(checkpoint = %node.id, timeout_ms = ms, "Checkpoint timeout out of range, pausing without deadline");
            }
            deadline
        });
        NodeResult::Paused
    }

    async fn run_parallel(
        &self,
        node: &Node,
        cfg: &ParallelNodeConfig,
        state: &mut WorkflowState,
    ) -> NodeResult {
        let joins: Vec<String> = self.graph.outgoing(&node.id).map(|e| e.to.clone()).collect();
        let mut forks: Vec<WorkflowState> = cfg.children.iter().map(|_| state.fork()).collect();

        debug!(node = %node.id, branches = cfg.children.len(), "Starting parallel branches");
        let halts = join_all(
            forks
                .iter_mut()
                .zip(&cfg.children)
                .map(|(fork, child)| self.drive(fork, child.clone(), Some(joins.as_slice()))),
        )
        .await;

        let base = state.variables.clone();
        let mut failures = Vec::new();
        let mut branches = Vec::with_capacity(forks.len());
        for ((child, fork), halt) in cfg.children.iter().zip(forks).zip(halts) {
            match halt {
                Halt::Paused => failures.push(format!("{}: paused", child)),
                Halt::Aborted(e) => failures.push(format!("{}: {}", child, e)),
                // A failure left on the fork counts whichever way the branch ended.
                halt => match &fork.error {
                    Some(error) => failures.push(format!(
                        "{} at '{}': {}",
                        child, error.node_id, error.message
                    )),
                    None if matches!(halt, Halt::DeadEnd { succeeded: false }) => {
                        failures.push(format!("{}: failed", child))
                    }
                    None => {}
                },
            }
            for (key, value) in &fork.variables {
                if base.get(key) != Some(value) {
                    state.variables.insert(key.clone(), value.clone());
                }
            }
            branches.push(fork);
        }

        let result = if failures.is_empty() {
            NodeResult::Success { attempts: 1 }
        } else if cfg.tolerate_partial_failure {
            warn!(node = %node.id, failed = failures.len(), "Parallel branches failed, tolerated");
            NodeResult::Success { attempts: 1 }
        } else {
            NodeResult::Failure {
                attempts: 1,
                error: Some(OrchestrationError::ParallelFailure {
                    node_id: node.id.clone(),
                    failures,
                }),
            }
        };
        NodeResult::Joined {
            result: Box::new(result),
            branches,
        }
    }

    fn run_error_handler(&self, node: &Node, cfg: &ErrorHandlerConfig, state: &mut WorkflowState) -> NodeResult {
        let Some(failure) = state.error.clone() else {
            return NodeResult::Success { attempts: 1 };
        };

        let key = format!("{}/{}", node.id, failure.node_id);
        let used = state.handler_attempts.get(&key).copied().unwrap_or(0);
        if used < cfg.max_attempts {
            state.handler_attempts.insert(key, used + 1);
            state.error = None;
            info!(handler = %node.id, node = %failure.node_id, attempt = used + 1, "Retrying failed node");
            return NodeResult::Redirect {
                target: failure.node_id,
            };
        }
        state.handler_attempts.remove(&key);

        if let Some(fallback) = &cfg.fallback_node {
            state.error = None;
            info!(handler = %node.id, fallback = %fallback, "Redirecting to fallback node");
            return NodeResult::Redirect {
                target: fallback.clone(),
            };
        }
        if cfg.max_attempts == 0 {
            state.error = None;
            return NodeResult::Success { attempts: 1 };
        }
        NodeResult::Failure {
            attempts: 1,
            error: None,
        }
    }

    /// Leave a paused checkpoint, as a success or with `error`.
    async fn continue_after(
        &self,
        mut state: WorkflowState,
        checkpoint_id: &str,
        error: Option<OrchestrationError>,
    ) -> WorkflowState {
        if let Some(snapshot) = state.checkpoint(checkpoint_id) {
            state.variables = snapshot.variables.clone();
        }
        state.status = RunStatus::Running;
        state.paused_at = None;
        state.pause_deadline = None;
        state.approvals.retain(|a| a != checkpoint_id);

        let succeeded = error.is_none();
        let message = error.as_ref().map(ToString::to_string);
        if let Some(entry) = state
            .history
            .iter_mut()
            .rev()
            .find(|h| h.node_id == checkpoint_id && h.outcome == NodeOutcome::Paused)
        {
            entry.outcome = if succeeded {
                NodeOutcome::Success
            } else {
                NodeOutcome::Failure
            };
            entry.error = message.clone();
        }
        if let Some(error) = &error {
            state.error = Some(NodeFailure::new(checkpoint_id, error));
        }
        state.touch();

        info!(run_id = %state.run_id, checkpoint = %checkpoint_id, approved = succeeded, "Resuming workflow");
        self.events
            .emit(
                WORKFLOW_RESUMED,
                json!({
                    "workflow": self.graph.name(),
                    "run_id": state.run_id,
                    "checkpoint": checkpoint_id,
                    "approved": succeeded,
                    "error": message,
                }),
            )
            .await;

        let next = self
            .graph
            .next_node(checkpoint_id, succeeded, &state.variables)
            .map(str::to_string);
        let halt = match next {
            Some(next) => self.drive(&mut state, next, None).await,
            None => Halt::DeadEnd { succeeded },
        };
        self.finish(state, halt).await
    }

    /// Settle the run status after a top-level traversal halts.
    async fn finish(&self, mut state: WorkflowState, halt: Halt) -> WorkflowState {
        state.status = match halt {
            Halt::End | Halt::Join | Halt::DeadEnd { succeeded: true } => RunStatus::Completed,
            Halt::DeadEnd { succeeded: false } => RunStatus::Failed,
            Halt::Paused => RunStatus::Paused,
            Halt::Aborted(error) => {
                let node = state.current_node.clone().unwrap_or_default();
                state.error = Some(NodeFailure::new(node, &error));
                RunStatus::Failed
            }
        };
        state.touch();

        let workflow = self.graph.name();
        match state.status {
            RunStatus::Paused => {
                info!(run_id = %state.run_id, checkpoint = ?state.paused_at, "Workflow paused for approval");
                self.events
                    .emit(
                        WORKFLOW_PAUSED,
                        json!({
                            "workflow": workflow,
                            "run_id": state.run_id,
                            "checkpoint": state.paused_at,
                        }),
                    )
                    .await;
            }
            RunStatus::Failed => {
                let error = state.error.clone();
                warn!(
                    run_id = %state.run_id,
                    node = error.as_ref().map_or("", |e| e.node_id.as_str()),
                    error = error.as_ref().map_or("", |e| e.message.as_str()),
                    "Workflow failed"
                );
                self.events
                    .emit_failure(
                        WORKFLOW_FAILED,
                        json!({
                            "workflow": workflow,
                            "run_id": state.run_id,
                            "node": error.as_ref().map(|e| e.node_id.clone()),
                            "error_code": error.as_ref().map(|e| e.code.clone()),
                            "error": error.as_ref().map(|e| e.message.clone()),
                        }),
                    )
                    .await;
            }
            _ => {
                info!(run_id = %state.run_id, steps = state.steps, "Workflow completed");
                self.events
                    .emit(
                        WORKFLOW_COMPLETED,
                        json!({
                            "workflow": workflow,
                            "run_id": state.run_id,
                            "steps": state.steps,
                        }),
                    )
                    .await;
            }
        }

        if let Some(store) = &self.store
            && let Err(e) = store.save(&state).await
        {
            warn!(run_id = %state.run_id, error = %e, "Failed to persist workflow state");
        }
        state
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn emit_node(
        &self,
        topic: &str,
        state: &WorkflowState,
        node: &Node,
        attempts: u32,
        error: Option<String>,
    ) {
        let payload = json!({
            "workflow": self.graph.name(),
            "run_id": state.run_id,
            "node": node.id,
            "type": node.kind.type_name(),
            "attempts": attempts,
            "error": error,
        });
        if topic == WORKFLOW_NODE_FAILED {
            self.events.emit_failure(topic, payload).await;
        } else {
            self.events.emit(topic, payload).await;
        }
    }

    fn check_paused_at(&self, state: &WorkflowState, checkpoint_id: &str) -> OrchestrationResult<()> {
        if state.graph_id != self.graph.name() {
            return Err(OrchestrationError::NotResumable {
                run_id: state.run_id.clone(),
                reason: format!("run belongs to workflow '{}'", state.graph_id),
            });
        }
        if !state.is_paused() {
            return Err(OrchestrationError::NotResumable {
                run_id: state.run_id.clone(),
                reason: format!("run is {}", state.status),
            });
        }
        if state.paused_at.as_deref() != Some(checkpoint_id) {
            return Err(OrchestrationError::NotResumable {
                run_id: state.run_id.clone(),
                reason: format!(
                    "paused at '{}', not '{}'",
                    state.paused_at.as_deref().unwrap_or(""),
                    checkpoint_id
                ),
            });
        }
        Ok(())
    }

    fn pause_expired(&self, state: &WorkflowState) -> bool {
        state.pause_deadline.is_some_and(|deadline| Utc::now() >= deadline)
    }

    fn timeout_error(&self, checkpoint_id: &str) -> OrchestrationError {
        let timeout = match self.graph.node(checkpoint_id).map(|n| &n.kind) {
            Some(NodeKind::Checkpoint(cfg)) => Duration::from_millis(cfg.timeout_ms.unwrap_or(0)),
            _ => Duration::ZERO,
        };
        OrchestrationError::CheckpointTimeout {
            checkpoint_id: checkpoint_id.to_string(),
            timeout,
        }
    }

    fn require_store(&self, run_id: &str) -> OrchestrationResult<Arc<dyn CheckpointStore>> {
        self.store.clone().ok_or_else(|| OrchestrationError::NotResumable {
            run_id: run_id.to_string(),
            reason: "no checkpoint store attached".to_string(),
        })
    }

    async fn load(&self, store: &dyn CheckpointStore, run_id: &str) -> OrchestrationResult<WorkflowState> {
        store
            .load(run_id)
            .await?
            .ok_or_else(|| OrchestrationError::NotResumable {
                run_id: run_id.to_string(),
                reason: "no saved state".to_string(),
            })
    }
}

/// `None` when `ms` from now is not representable.
fn deadline_after(ms: u64) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::try_milliseconds(i64::try_from(ms).ok()?)?;
    Utc::now().checked_add_signed(delta)
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("workflow", &self.graph.name())
            .field("config", &self.config)
            .field("store", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{
        CheckpointNodeConfig, ErrorHandlerConfig, InMemoryCheckpointStore, Predicate, RetryPolicy,
        WorkflowBuilder,
    };
    use conductor_testing::{FailingAgent, FlakyAgent, MockAgent, registry_with, shared};

    fn fast_config() -> WorkflowConfig {
        WorkflowConfig {
            default_retry_delay_ms: 1,
            ..WorkflowConfig::default()
        }
    }

    fn agent(id: &str, agent_id: &str, output_key: &str) -> Node {
        Node::agent(id, AgentNodeConfig::new(agent_id).output_key(output_key))
    }

    #[tokio::test]
    async fn test_linear_run_stores_outputs() {
        let registry = registry_with(vec![(
            "writer",
            shared(MockAgent::new("writer").with_response("topic", "draft text")),
        )]);
        let graph = WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(agent("write", "writer", "draft"))
            .node(Node::end("end"))
            .always("start", "write")
            .on_success("write", "end")
            .build()
            .unwrap();

        let state = WorkflowEngine::new(graph, registry)
            .execute("topic", HashMap::new())
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.get("draft"), Some(&json!("draft text")));
        assert_eq!(state.visited_nodes(), vec!["start", "write", "end"]);
        assert_eq!(state.steps, 3);
    }

    #[tokio::test]
    async fn test_retry_policy_recovers_flaky_agent() {
        let flaky = FlakyAgent::new(2, "ok");
        let registry = registry_with(vec![("flaky", shared(flaky.clone()))]);
        let graph = WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(agent("call", "flaky", "out").with_retry(RetryPolicy::constant(2, Duration::ZERO)))
            .node(Node::end("end"))
            .always("start", "call")
            .on_success("call", "end")
            .build()
            .unwrap();

        let state = WorkflowEngine::new(graph, registry)
            .execute("x", HashMap::new())
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.history[1].attempts, 3);
        assert_eq!(flaky.call_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_follow_failure_edge() {
        let failing = FailingAgent::new("down");
        let registry = registry_with(vec![
            ("bad", shared(failing.clone())),
            ("backup", shared(MockAgent::new("backup").with_default_response("saved"))),
        ]);
        let graph = WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(agent("call", "bad", "out").with_retry(RetryPolicy::retries(1)))
            .node(agent("recover", "backup", "out"))
            .node(Node::end("end"))
            .always("start", "call")
            .on_success("call", "end")
            .on_failure("call", "recover")
            .always("recover", "end")
            .build()
            .unwrap();

        let state = WorkflowEngine::new(graph, registry)
            .with_config(fast_config())
            .execute("x", HashMap::new())
            .await
            .unwrap();
        assert_eq!(failing.call_count(), 2);
        assert_eq!(state.visited_nodes(), vec!["start", "call", "recover", "end"]);
        assert_eq!(state.history[1].outcome, NodeOutcome::Failure);
        assert_eq!(state.get("out"), Some(&json!("saved")));
        assert_eq!(state.error.as_ref().unwrap().code, "NODE_EXECUTION_FAILED");
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_unhandled_failure_fails_run() {
        let registry = registry_with(vec![("bad", shared(FailingAgent::new("down")))]);
        let graph = WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(agent("call", "bad", "out"))
            .node(Node::end("end"))
            .always("start", "call")
            .on_success("call", "end")
            .build()
            .unwrap();

        let state = WorkflowEngine::new(graph, registry)
            .execute("x", HashMap::new())
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        let error = state.error.unwrap();
        assert_eq!(error.node_id, "call");
        assert!(error.message.contains("down"));
    }

    #[tokio::test]
    async fn test_condition_routes_by_variable() {
        let registry = registry_with(vec![
            ("high", shared(MockAgent::new("high").with_default_response("H"))),
            ("low", shared(MockAgent::new("low").with_default_response("L"))),
        ]);
        let graph = WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(Node::condition("check", Predicate::parse("score >= 5").unwrap(), "is_high"))
            .node(agent("h", "high", "out"))
            .node(agent("l", "low", "out"))
            .node(Node::end("end"))
            .always("start", "check")
            .when("check", "h", Predicate::truthy("is_high"))
            .always("check", "l")
            .always("h", "end")
            .always("l", "end")
            .build()
            .unwrap();
        let engine = WorkflowEngine::new(graph, registry);

        let state = engine
            .execute("x", HashMap::from([("score".to_string(), json!(7))]))
            .await
            .unwrap();
        assert_eq!(state.get("out"), Some(&json!("H")));
        assert_eq!(state.get("is_high"), Some(&json!(true)));

        let state = engine
            .execute("x", HashMap::from([("score".to_string(), json!(2))]))
            .await
            .unwrap();
        assert_eq!(state.get("out"), Some(&json!("L")));
    }

    #[tokio::test]
    async fn test_step_limit_aborts_loop() {
        let registry = registry_with(vec![("bad", shared(FailingAgent::new("down")))]);
        let graph = WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(agent("call", "bad", "out"))
            .node(Node::end("end"))
            .always("start", "call")
            .on_success("call", "end")
            .on_failure("call", "call")
            .build()
            .unwrap();

        let state = WorkflowEngine::new(graph, registry)
            .with_config(WorkflowConfig {
                max_steps: 5,
                ..fast_config()
            })
            .execute("x", HashMap::new())
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.steps, 5);
        assert_eq!(state.error.unwrap().code, "STEP_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn test_manual_checkpoint_requires_approval() {
        let registry = registry_with(vec![(
            "writer",
            shared(MockAgent::new("writer").with_default_response("final")),
        )]);
        let graph = WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(Node::checkpoint("review", CheckpointNodeConfig::default().manual_approval()))
            .node(agent("write", "writer", "draft"))
            .node(Node::end("end"))
            .always("start", "review")
            .always("review", "write")
            .on_success("write", "end")
            .build()
            .unwrap();
        let store = InMemoryCheckpointStore::shared();
        let engine = WorkflowEngine::new(graph, registry).with_store(store.clone());

        let mut state = engine.execute("x", HashMap::new()).await.unwrap();
        assert_eq!(state.status, RunStatus::Paused);
        assert_eq!(state.paused_at.as_deref(), Some("review"));
        assert_eq!(store.len().await, 1);

        let err = engine.resume(state.clone(), "review").await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_RESUMABLE");
        let err = engine.resume(state.clone(), "other").await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_RESUMABLE");

        engine.approve(&mut state, "review").unwrap();
        let state = engine.resume(state, "review").await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.visited_nodes(), vec!["start", "review", "write", "end"]);
        assert_eq!(state.history[1].outcome, NodeOutcome::Success);
        assert!(state.approvals.is_empty());
    }

    #[tokio::test]
    async fn test_expired_checkpoint_takes_failure_path() {
        let registry = registry_with(vec![
            ("writer", shared(MockAgent::new("writer"))),
            ("notify", shared(MockAgent::new("notify").with_default_response("sent"))),
        ]);
        let graph = WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(Node::checkpoint(
                "review",
                CheckpointNodeConfig::default()
                    .manual_approval()
                    .timeout(Duration::from_millis(1)),
            ))
            .node(agent("write", "writer", "draft"))
            .node(agent("escalate", "notify", "notice"))
            .node(Node::end("end"))
            .always("start", "review")
            .on_success("review", "write")
            .on_failure("review", "escalate")
            .always("write", "end")
            .always("escalate", "end")
            .build()
            .unwrap();
        let engine = WorkflowEngine::new(graph, registry);

        let mut state = engine.execute("x", HashMap::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = engine.approve(&mut state, "review").unwrap_err();
        assert_eq!(err.error_code(), "CHECKPOINT_TIMEOUT");

        let state = engine.resume(state, "review").await.unwrap();
        assert_eq!(state.visited_nodes(), vec!["start", "review", "escalate", "end"]);
        assert_eq!(state.get("notice"), Some(&json!("sent")));
        assert_eq!(state.error.unwrap().code, "CHECKPOINT_TIMEOUT");
    }

    #[tokio::test]
    async fn test_gate_rejection_follows_failure_edge() {
        let registry = registry_with(vec![("writer", shared(MockAgent::new("writer")))]);
        let graph = WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(Node::checkpoint("review", CheckpointNodeConfig::default().manual_approval()))
            .node(agent("write", "writer", "draft"))
            .node(Node::end("end"))
            .node(Node::end("rejected"))
            .always("start", "review")
            .on_success("review", "write")
            .on_failure("review", "rejected")
            .always("write", "end")
            .build()
            .unwrap();
        let engine = WorkflowEngine::new(graph, registry);

        let gate = ApprovalGate::new();
        gate.reject("review");
        let state = engine.run_with_gate("x", HashMap::new(), &gate).await.unwrap();
        assert_eq!(state.visited_nodes(), vec!["start", "review", "rejected"]);
        assert_eq!(state.error.unwrap().code, "APPROVAL_REJECTED");

        gate.approve("review");
        let state = engine.run_with_gate("x", HashMap::new(), &gate).await.unwrap();
        assert_eq!(state.visited_nodes(), vec!["start", "review", "write", "end"]);
    }

    #[tokio::test]
    async fn test_parallel_merges_branch_outputs() {
        let registry = registry_with(vec![
            ("a", shared(MockAgent::new("a").with_default_response("A"))),
            ("b", shared(MockAgent::new("b").with_default_response("B"))),
            ("join", shared(MockAgent::new("join"))),
        ]);
        let graph = WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(Node::parallel("fan", ["left", "right"], false))
            .node(agent("left", "a", "left_out"))
            .node(agent("right", "b", "right_out"))
            .node(Node::agent(
                "merge",
                AgentNodeConfig::new("join")
                    .input_template("{left_out}+{right_out}")
                    .output_key("merged"),
            ))
            .node(Node::end("end"))
            .always("start", "fan")
            .on_success("fan", "merge")
            .always("left", "merge")
            .always("right", "merge")
            .always("merge", "end")
            .build()
            .unwrap();

        let state = WorkflowEngine::new(graph, registry)
            .execute("x", HashMap::new())
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.get("merged"), Some(&json!("join response for: A+B")));
        assert_eq!(
            state.visited_nodes(),
            vec!["start", "fan", "left", "right", "merge", "end"]
        );
    }

    #[tokio::test]
    async fn test_parallel_failure_unless_tolerated() {
        let registry = registry_with(vec![
            ("ok", shared(MockAgent::new("ok"))),
            ("bad", shared(FailingAgent::new("down"))),
        ]);
        let build = |tolerate: bool| {
            WorkflowBuilder::new("wf")
                .node(Node::start("start"))
                .node(Node::parallel("fan", ["good", "broken"], tolerate))
                .node(agent("good", "ok", "g"))
                .node(agent("broken", "bad", "b"))
                .node(Node::end("end"))
                .always("start", "fan")
                .on_success("fan", "end")
                .on_success("good", "end")
                .on_success("broken", "end")
                .build()
                .unwrap()
        };

        let state = WorkflowEngine::new(build(false), registry.clone())
            .execute("x", HashMap::new())
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        let error = state.error.unwrap();
        assert_eq!(error.code, "PARALLEL_FAILURE");
        assert!(error.message.contains("broken"));
        assert!(state.variables.contains_key("g"));

        let state = WorkflowEngine::new(build(true), registry)
            .execute("x", HashMap::new())
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_branch_failure_routed_to_join_still_fails_parallel() {
        let registry = registry_with(vec![
            ("ok", shared(MockAgent::new("ok"))),
            ("bad", shared(FailingAgent::new("down"))),
        ]);
        let build = |tolerate: bool| {
            WorkflowBuilder::new("wf")
                .node(Node::start("start"))
                .node(Node::parallel("fan", ["good", "broken"], tolerate))
                .node(agent("good", "ok", "g"))
                .node(agent("broken", "bad", "b"))
                .node(Node::end("end"))
                .always("start", "fan")
                .on_success("fan", "end")
                .always("good", "end")
                .always("broken", "end")
                .build()
                .unwrap()
        };

        let state = WorkflowEngine::new(build(false), registry.clone())
            .execute("x", HashMap::new())
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        let error = state.error.clone().unwrap();
        assert_eq!(error.node_id, "fan");
        assert_eq!(error.code, "PARALLEL_FAILURE");
        assert!(error.message.contains("broken at 'broken'"), "{}", error.message);
        assert!(error.message.contains("down"), "{}", error.message);
        assert_eq!(state.history[1].node_id, "fan");
        assert_eq!(state.history[1].outcome, NodeOutcome::Failure);

        let state = WorkflowEngine::new(build(true), registry)
            .execute("x", HashMap::new())
            .await
            .unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_pauses_without_deadline() {
        for timeout_ms in [10_u64.pow(16), u64::MAX] {
            let registry = registry_with(vec![("writer", shared(MockAgent::new("writer")))]);
            let graph = WorkflowBuilder::new("wf")
                .node(Node::start("start"))
                .node(Node::checkpoint(
                    "review",
                    CheckpointNodeConfig {
                        timeout_ms: Some(timeout_ms),
                        ..CheckpointNodeConfig::default().manual_approval()
                    },
                ))
                .node(agent("write", "writer", "draft"))
                .node(Node::end("end"))
                .always("start", "review")
                .on_success("review", "write")
                .always("write", "end")
                .build()
                .unwrap();
            let engine = WorkflowEngine::new(graph, registry);

            let mut state = engine.execute("x", HashMap::new()).await.unwrap();
            assert_eq!(state.status, RunStatus::Paused);
            assert_eq!(state.pause_deadline, None);

            engine.approve(&mut state, "review").unwrap();
            let state = engine.resume(state, "review").await.unwrap();
            assert_eq!(state.status, RunStatus::Completed);
        }
    }

    #[test]
    fn test_deadline_after_rejects_overflow() {
        assert!(deadline_after(60_000).is_some());
        assert!(deadline_after(10_u64.pow(16)).is_none());
        assert!(deadline_after(u64::MAX).is_none());
    }

    #[tokio::test]
    async fn test_error_handler_retries_then_falls_back() {
        let failing = FailingAgent::new("down");
        let registry = registry_with(vec![
            ("bad", shared(failing.clone())),
            ("safe", shared(MockAgent::new("safe").with_default_response("fallback"))),
        ]);
        let graph = WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(agent("call", "bad", "out"))
            .node(Node::error_handler(
                "handler",
                ErrorHandlerConfig {
                    max_attempts: 2,
                    fallback_node: Some("safe_path".into()),
                },
            ))
            .node(agent("safe_path", "safe", "out"))
            .node(Node::end("end"))
            .always("start", "call")
            .on_success("call", "end")
            .on_failure("call", "handler")
            .always("safe_path", "end")
            .build()
            .unwrap();

        let state = WorkflowEngine::new(graph, registry)
            .execute("x", HashMap::new())
            .await
            .unwrap();
        assert_eq!(failing.call_count(), 3);
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.get("out"), Some(&json!("fallback")));
        assert!(state.error.is_none());
        assert_eq!(
            state.visited_nodes(),
            vec![
                "start", "call", "handler", "call", "handler", "call", "handler", "safe_path",
                "end"
            ]
        );
    }
}
