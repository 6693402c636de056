//! Delegation context carried along a handoff chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// One completed delegation step: who asked whom, with what, and the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffTurn {
    pub from_agent: String,
    pub to_agent: String,
    pub input: String,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

/// Context of one delegation chain.
///
/// Fields are fixed at creation. The only mutation is appending turns to the
/// history; continuing a chain with a new hop yields a successor context via
/// [`HandoffContext::continue_with`] that keeps the id, history and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffContext {
    handoff_id: String,
    from_agent: String,
    to_agent: String,
    input: String,
    history: Vec<HandoffTurn>,
    metadata: HashMap<String, Value>,
    return_to_caller: bool,
    created_at: DateTime<Utc>,
}

impl HandoffContext {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        input: impl Into<String>,
        return_to_caller: bool,
    ) -> Self {
        Self {
            handoff_id: format!("handoff-{}", Uuid::new_v4()),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            input: input.into(),
            history: Vec::new(),
            metadata: HashMap::new(),
            return_to_caller,
            created_at: Utc::now(),
        }
    }

    /// Attach metadata, builder style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Next hop of the same chain.
    pub fn continue_with(
        &self,
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        input: impl Into<String>,
        return_to_caller: bool,
    ) -> Self {
        Self {
            handoff_id: self.handoff_id.clone(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            input: input.into(),
            history: self.history.clone(),
            metadata: self.metadata.clone(),
            return_to_caller,
            created_at: self.created_at,
        }
    }

    pub(crate) fn push_turn(
        &mut self,
        from_agent: &str,
        to_agent: &str,
        input: &str,
        output: &str,
    ) {
        self.history.push(HandoffTurn {
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            input: input.to_string(),
            output: output.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn handoff_id(&self) -> &str {
        &self.handoff_id
    }

    pub fn from_agent(&self) -> &str {
        &self.from_agent
    }

    pub fn to_agent(&self) -> &str {
        &self.to_agent
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn history(&self) -> &[HandoffTurn] {
        &self.history
    }

    pub fn last_turn(&self) -> Option<&HandoffTurn> {
        self.history.last()
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn return_to_caller(&self) -> bool {
        self.return_to_caller
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Serialize to JSON for persistence
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continue_keeps_chain_identity() {
        let mut first = HandoffContext::new("a", "b", "hi", false).with_metadata("topic", "billing");
        first.push_turn("a", "b", "hi", "hello");

        let next = first.continue_with("b", "c", "hello", true);
        assert_eq!(next.handoff_id(), first.handoff_id());
        assert_eq!(next.history().len(), 1);
        assert_eq!(next.from_agent(), "b");
        assert_eq!(next.to_agent(), "c");
        assert!(next.return_to_caller());
        assert_eq!(next.get_metadata("topic"), Some(&Value::from("billing")));
        // the original is untouched
        assert_eq!(first.to_agent(), "b");
    }

    #[test]
    fn test_json_round_trip() {
        let mut ctx = HandoffContext::new("a", "b", "x", true);
        ctx.push_turn("a", "b", "x", "y");

        let restored = HandoffContext::from_json(&ctx.to_json().unwrap()).unwrap();
        assert_eq!(restored, ctx);
        assert_eq!(restored.last_turn().unwrap().output, "y");
    }
}
