//! # Conductor Orchestration
//!
//! Three composable ways of making registered agents work together, plus
//! the [`Coordinator`] that owns them:
//!
//! - **Handoff**: point-to-point delegation with context carry-over,
//!   return-to-caller and rule-based routing ([`handoff`])
//! - **Crew**: a team of role-tagged members working a prioritised task
//!   list with dependencies and shared memory ([`crew`])
//! - **Workflow**: traversal of a typed node graph with conditional edges,
//!   checkpoints, approvals, parallel branches and retries ([`workflow`])
//!
//! Every orchestrator resolves agents through a shared
//! [`AgentRegistry`](conductor_core::AgentRegistry) and, when given a bus,
//! publishes lifecycle events (see [`events`]).
//!
//! ## Example
//!
//! ```rust
//! use conductor_orchestration::coordinator::{Coordinator, OrchestrationRequest, OrchestrationResponse};
//! use conductor_core::{AgentContext, FnAgent};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let coordinator = Coordinator::with_defaults();
//! for id in ["triage", "billing"] {
//!     coordinator
//!         .register_agent(
//!             id,
//!             Arc::new(FnAgent::new(move |input: String, _ctx: AgentContext| async move {
//!                 Ok(format!("{id}: {input}"))
//!             })),
//!             Vec::new(),
//!         )
//!         .unwrap();
//! }
//!
//! let response = coordinator
//!     .run(OrchestrationRequest::Handoff {
//!         from: "triage".into(),
//!         to: "billing".into(),
//!         input: "refund".into(),
//!         context: None,
//!         return_to_caller: true,
//!     })
//!     .await
//!     .unwrap();
//!
//! match response {
//!     OrchestrationResponse::Handoff(result) => {
//!         assert_eq!(result.output, "triage: billing: refund");
//!         assert_eq!(result.context.history().len(), 2);
//!     }
//!     _ => unreachable!(),
//! }
//! # });
//! ```

pub mod coordinator;
pub mod crew;
pub mod error;
pub mod events;
pub mod handoff;
pub mod workflow;

pub use coordinator::{
    Coordinator, OrchestrationRequest, OrchestrationResponse, OrchestrationStrategy,
    OrchestratorInfo,
};
pub use crew::{Crew, CrewMember, CrewReport, CrewRole, ExecutionMode, TaskStatus};
pub use error::{Component, OrchestrationError, OrchestrationResult};
pub use events::EventPublisher;
pub use handoff::{HandoffContext, HandoffManager, HandoffResult, HandoffRule, KeywordRule};
pub use workflow::{WorkflowEngine, WorkflowGraph, WorkflowState};
