//! Point-to-point delegation between registered agents.

use conductor_core::{AgentContext, AgentHandle, AgentRegistry, HandoffConfig, RegistryError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::context::HandoffContext;
use super::rules::HandoffRule;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::events::{EventPublisher, HANDOFF_COMPLETED, HANDOFF_FAILED, HANDOFF_STARTED};

/// Outcome of a successful handoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffResult {
    pub handoff_id: String,
    /// Output of the last agent invoked.
    pub output: String,
    /// Agent that produced `output`.
    pub final_agent: String,
    pub returned_to_caller: bool,
    /// The chain context including this handoff's turns.
    pub context: HandoffContext,
    pub duration: Duration,
}

/// Delegates work from one agent to another.
///
/// The manager keeps in-flight contexts (`active_handoffs`) and a bounded
/// history of completed ones. Failures are never retried here.
///
/// Every hop is tracked separately, so several hops of one chain may be in
/// flight at once.
pub struct HandoffManager {
    registry: Arc<AgentRegistry>,
    events: EventPublisher,
    config: HandoffConfig,
    rules: RwLock<Vec<Arc<dyn HandoffRule>>>,
    /// In-flight hops keyed by hop number.
    active: RwLock<HashMap<u64, HandoffContext>>,
    next_hop: AtomicU64,
    history: RwLock<VecDeque<HandoffContext>>,
}

impl HandoffManager {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            events: EventPublisher::disabled(),
            config: HandoffConfig::default(),
            rules: RwLock::new(Vec::new()),
            active: RwLock::new(HashMap::new()),
            next_hop: AtomicU64::new(0),
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Publish lifecycle events through `events`.
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: HandoffConfig) -> Self {
        self.config = config;
        self
    }

    /// Delegate `input` from `from` to `to`.
    ///
    /// Passing a `context` continues an existing chain. With
    /// `return_to_caller`, `from` is invoked again with the target's output
    /// and its answer becomes the result.
    pub async fn handoff(
        &self,
        from: &str,
        to: &str,
        input: &str,
        context: Option<HandoffContext>,
        return_to_caller: bool,
    ) -> OrchestrationResult<HandoffResult> {
        let (caller, target) = match self.resolve_pair(from, to) {
            Ok(pair) => pair,
            Err(e) => return Err(self.fail_unresolved(from, to, context.as_ref(), e).await),
        };

        let mut ctx = match context {
            Some(previous) => previous.continue_with(from, to, input, return_to_caller),
            None => HandoffContext::new(from, to, input, return_to_caller),
        };
        let handoff_id = ctx.handoff_id().to_string();
        let started = Instant::now();
        let hop = self.next_hop.fetch_add(1, Ordering::Relaxed);

        self.active.write().await.insert(hop, ctx.clone());
        info!(handoff_id = %handoff_id, from = %from, to = %to, return_to_caller, "Starting handoff");
        self.events
            .emit(
                HANDOFF_STARTED,
                json!({ "handoff_id": handoff_id, "from": from, "to": to }),
            )
            .await;

        let output = match self.invoke(&target, input, &ctx).await {
            Ok(output) => output,
            Err(source) => {
                return Err(self.fail(hop, &handoff_id, from, to, source).await);
            }
        };
        ctx.push_turn(from, to, input, &output);

        let (output, final_agent) = if return_to_caller {
            match self.invoke(&caller, &output, &ctx).await {
                Ok(answer) => {
                    ctx.push_turn(to, from, &output, &answer);
                    (answer, from.to_string())
                }
                Err(source) => {
                    return Err(self.fail(hop, &handoff_id, to, from, source).await);
                }
            }
        } else {
            (output, to.to_string())
        };

        let duration = started.elapsed();
        if self.active.write().await.remove(&hop).is_none() {
            debug!(handoff_id = %handoff_id, "Handoff completed after cancellation");
        }
        self.remember(ctx.clone()).await;

        info!(
            handoff_id = %handoff_id,
            final_agent = %final_agent,
            duration_ms = duration.as_millis() as u64,
            "Handoff completed"
        );
        self.events
            .emit(
                HANDOFF_COMPLETED,
                json!({
                    "handoff_id": handoff_id,
                    "from": from,
                    "to": to,
                    "final_agent": final_agent,
                    "returned_to_caller": return_to_caller,
                    "duration_ms": duration.as_millis() as u64,
                }),
            )
            .await;

        Ok(HandoffResult {
            handoff_id,
            output,
            final_agent,
            returned_to_caller: return_to_caller,
            context: ctx,
            duration,
        })
    }

    /// Route `input` with the registered rules and hand off to the first
    /// target any rule names.
    pub async fn auto_handoff(
        &self,
        from: &str,
        input: &str,
        context: Option<HandoffContext>,
    ) -> OrchestrationResult<HandoffResult> {
        let draft = match &context {
            Some(previous) => previous.continue_with(from, "", input, false),
            None => HandoffContext::new(from, "", input, false),
        };

        let rules: Vec<Arc<dyn HandoffRule>> = self.rules.read().await.clone();
        let target = rules.iter().find_map(|rule| {
            let target = rule.route(&draft);
            if let Some(t) = &target {
                debug!(rule = %rule.name(), target = %t, "Handoff rule matched");
            }
            target
        });

        match target {
            Some(to) => self.handoff(from, &to, input, context, false).await,
            None => {
                warn!(from = %from, rules = rules.len(), "No handoff rule matched");
                Err(OrchestrationError::NoRoute {
                    from_agent: from.to_string(),
                })
            }
        }
    }

    /// Append a routing rule. Rules are consulted in registration order.
    pub async fn register_handoff_rule(&self, rule: Arc<dyn HandoffRule>) {
        let mut rules = self.rules.write().await;
        rules.push(rule);
        debug!(count = rules.len(), "Registered handoff rule");
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }

    pub async fn clear_rules(&self) {
        self.rules.write().await.clear();
    }

    /// Contexts of handoffs currently in flight
    pub async fn active_handoffs(&self) -> Vec<HandoffContext> {
        self.active.read().await.values().cloned().collect()
    }

    /// Drop the in-flight records of every hop of a chain. The agent calls
    /// themselves are not interrupted.
    pub async fn cancel_handoff(&self, handoff_id: &str) -> bool {
        let mut active = self.active.write().await;
        let before = active.len();
        active.retain(|_, ctx| ctx.handoff_id() != handoff_id);
        let removed = active.len() < before;
        if removed {
            info!(handoff_id = %handoff_id, "Cancelled handoff");
        }
        removed
    }

    /// Latest completed context of a chain.
    pub async fn handoff_history(&self, handoff_id: &str) -> Option<HandoffContext> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .find(|c| c.handoff_id() == handoff_id)
            .cloned()
    }

    /// The most recent `limit` completed contexts, oldest first.
    pub async fn recent_handoffs(&self, limit: usize) -> Vec<HandoffContext> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    async fn invoke(
        &self,
        agent: &AgentHandle,
        input: &str,
        ctx: &HandoffContext,
    ) -> conductor_core::AgentResult<String> {
        let agent_ctx = AgentContext::new()
            .with("session_id", ctx.handoff_id())
            .with("orchestrator", "handoff")
            .with("return_to_caller", ctx.return_to_caller())
            .with(
                "handoff_context",
                serde_json::to_value(ctx).unwrap_or(Value::Null),
            );
        agent.invoke(input, &agent_ctx).await
    }

    fn resolve_pair(&self, from: &str, to: &str) -> Result<(AgentHandle, AgentHandle), RegistryError> {
        Ok((self.registry.resolve(from)?, self.registry.resolve(to)?))
    }

    /// A handoff whose endpoints could not be resolved.
    async fn fail_unresolved(
        &self,
        from: &str,
        to: &str,
        context: Option<&HandoffContext>,
        source: RegistryError,
    ) -> OrchestrationError {
        let error = OrchestrationError::from(source);
        let handoff_id = context.map(|c| c.handoff_id().to_string());
        warn!(from = %from, to = %to, error = %error, "Handoff failed before dispatch");
        self.events
            .emit_failure(
                HANDOFF_FAILED,
                json!({
                    "handoff_id": handoff_id,
                    "from": from,
                    "to": to,
                    "error": error.to_string(),
                    "error_code": error.error_code(),
                }),
            )
            .await;
        error
    }

    async fn fail(
        &self,
        hop: u64,
        handoff_id: &str,
        from: &str,
        to: &str,
        source: conductor_core::AgentError,
    ) -> OrchestrationError {
        self.active.write().await.remove(&hop);
        warn!(handoff_id = %handoff_id, from = %from, to = %to, error = %source, "Handoff failed");
        self.events
            .emit_failure(
                HANDOFF_FAILED,
                json!({
                    "handoff_id": handoff_id,
                    "from": from,
                    "to": to,
                    "error": source.to_string(),
                    "error_code": source.error_code(),
                }),
            )
            .await;
        OrchestrationError::Handoff {
            handoff_id: handoff_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            source,
        }
    }

    async fn remember(&self, ctx: HandoffContext) {
        let mut history = self.history.write().await;
        history.push_back(ctx);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }
}
