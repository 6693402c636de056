//! Routing rules for automatic handoffs.

use serde::{Deserialize, Serialize};

use super::context::HandoffContext;

/// Picks a target agent for a handoff, or declines with `None`.
///
/// Any `Fn(&HandoffContext) -> Option<String>` closure is a rule.
pub trait HandoffRule: Send + Sync {
    fn route(&self, context: &HandoffContext) -> Option<String>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "rule"
    }
}

impl<F> HandoffRule for F
where
    F: Fn(&HandoffContext) -> Option<String> + Send + Sync,
{
    fn route(&self, context: &HandoffContext) -> Option<String> {
        self(context)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

/// Routes to `target` when the input mentions any keyword, ignoring case.
///
/// ```rust
/// use conductor_orchestration::handoff::{HandoffContext, HandoffRule, KeywordRule};
///
/// let rule = KeywordRule::new("billing", ["invoice", "refund"]);
/// let ctx = HandoffContext::new("triage", "", "Where is my Refund?", false);
/// assert_eq!(rule.route(&ctx), Some("billing".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub target: String,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new<I, S>(target: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: target.into(),
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }
}

impl HandoffRule for KeywordRule {
    fn route(&self, context: &HandoffContext) -> Option<String> {
        let input = context.input().to_lowercase();
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && input.contains(&k.to_lowercase()))
            .then(|| self.target.clone())
    }

    fn name(&self) -> &str {
        &self.target
    }
}
