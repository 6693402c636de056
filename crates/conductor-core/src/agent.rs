//! The agent capability consumed by every orchestrator.
//!
//! An agent is opaque to the orchestration layer: given input text and an
//! execution context it asynchronously produces output text or fails.
//! How it reasons, which model it calls and which tools it uses are its own
//! business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::AgentResult;
use crate::types::AgentId;

/// Execution context handed to an agent alongside its input.
///
/// A flat string-keyed map of JSON values. Orchestrators use it to pass the
/// session id, the calling orchestrator and any state the agent may need
/// (handoff history, crew shared memory, workflow variables).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    #[serde(flatten)]
    entries: HashMap<String, Value>,
}

impl AgentContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Look up a string entry.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}

impl From<HashMap<String, Value>> for AgentContext {
    fn from(entries: HashMap<String, Value>) -> Self {
        Self { entries }
    }
}

/// An invocable agent.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Process `input` and produce output text.
    async fn invoke(&self, input: &str, context: &AgentContext) -> AgentResult<String>;
}

/// Adapter turning an async closure into an [`Agent`].
///
/// ```rust,ignore
/// let upper = FnAgent::new(|input, _ctx| async move { Ok(input.to_uppercase()) });
/// ```
pub struct FnAgent<F> {
    f: F,
}

impl<F> FnAgent<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(String, AgentContext) -> Fut + Send + Sync,
        Fut: Future<Output = AgentResult<String>> + Send,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Agent for FnAgent<F>
where
    F: Fn(String, AgentContext) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<String>> + Send,
{
    async fn invoke(&self, input: &str, context: &AgentContext) -> AgentResult<String> {
        (self.f)(input.to_string(), context.clone()).await
    }
}

/// A registered agent: its id, capability tags and the agent itself.
///
/// Cheap to clone; all clones point at the same agent.
#[derive(Clone)]
pub struct AgentHandle {
    id: AgentId,
    capabilities: Vec<String>,
    agent: Arc<dyn Agent>,
}

impl AgentHandle {
    pub fn new(id: AgentId, agent: Arc<dyn Agent>) -> Self {
        Self {
            id,
            capabilities: Vec::new(),
            agent,
        }
    }

    /// Attach capability tags.
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Check whether the handle carries a capability tag.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Invoke the underlying agent.
    pub async fn invoke(&self, input: &str, context: &AgentContext) -> AgentResult<String> {
        self.agent.invoke(input, context).await
    }

    /// Check whether two handles point at the same agent instance.
    pub fn same_agent(&self, other: &AgentHandle) -> bool {
        Arc::ptr_eq(&self.agent, &other.agent)
    }
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;

    #[tokio::test]
    async fn test_fn_agent_invoke() {
        let agent = FnAgent::new(|input: String, ctx: AgentContext| async move {
            let suffix = ctx.get_str("suffix").unwrap_or_default().to_string();
            Ok(format!("{}{}", input.to_uppercase(), suffix))
        });

        let ctx = AgentContext::new().with("suffix", "!");
        let out = agent.invoke("hello", &ctx).await.unwrap();
        assert_eq!(out, "HELLO!");
    }

    #[tokio::test]
    async fn test_handle_propagates_failure() {
        let agent = FnAgent::new(|_: String, _: AgentContext| async move {
            Err::<String, _>(AgentError::failed("nope"))
        });
        let handle = AgentHandle::new(AgentId::parse("broken").unwrap(), Arc::new(agent));

        let err = handle.invoke("x", &AgentContext::new()).await.unwrap_err();
        assert_eq!(err, AgentError::failed("nope"));
    }

    #[test]
    fn test_context_builder() {
        let ctx = AgentContext::new()
            .with("session_id", "s-1")
            .with("attempt", 2);

        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.get_str("session_id"), Some("s-1"));
        assert_eq!(ctx.get("attempt"), Some(&Value::from(2)));
        assert!(!ctx.contains_key("missing"));
    }
}
