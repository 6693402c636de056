//! Handoff Manager: delegation of a task from one agent to another.
//!
//! A handoff invokes the target agent with the caller's input and, when
//! `return_to_caller` is set, hands the target's answer back to the caller
//! before returning. Chains of handoffs share one [`HandoffContext`] whose
//! history records every turn in order.

mod context;
mod manager;
mod rules;

pub use context::{HandoffContext, HandoffTurn};
pub use manager::{HandoffManager, HandoffResult};
pub use rules::{HandoffRule, KeywordRule};
