//! # Conductor
//!
//! Conductor is a multi-agent orchestration framework. Agents are opaque
//! async text-in/text-out capabilities; Conductor decides who runs, when,
//! with what input, and what happens to the output.
//!
//! ## Core Components
//!
//! - **[AgentRegistry]**: the single source of truth for which agents exist
//! - **[MessageBus]**: topic-based publish/subscribe with wildcard patterns,
//!   priority delivery, history and dead letters
//! - **[HandoffManager]**: point-to-point delegation with context carry-over
//! - **[Crew]**: role-based teams working a prioritised task list
//! - **[WorkflowEngine]**: graph traversal with checkpoints, approvals,
//!   parallel branches and retries
//! - **[Coordinator]**: the composition root owning all of the above
//!
//! ## Quick Start
//!
//! ```rust
//! use conductor::{
//!     AgentContext, AgentNodeConfig, Coordinator, FnAgent, Node, RunStatus, WorkflowBuilder,
//! };
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let coordinator = Coordinator::with_defaults();
//! coordinator
//!     .register_agent(
//!         "summariser",
//!         Arc::new(FnAgent::new(|input: String, _ctx: AgentContext| async move {
//!             Ok(format!("summary of {input}"))
//!         })),
//!         vec!["summarise".into()],
//!     )
//!     .unwrap();
//!
//! let graph = WorkflowBuilder::new("digest")
//!     .node(Node::start("start"))
//!     .node(Node::agent("sum", AgentNodeConfig::new("summariser").output_key("summary")))
//!     .node(Node::end("end"))
//!     .always("start", "sum")
//!     .on_success("sum", "end")
//!     .build()
//!     .unwrap();
//! let engine = coordinator.register_workflow(graph).await.unwrap();
//!
//! let state = engine.execute("the news", HashMap::new()).await.unwrap();
//! assert_eq!(state.status, RunStatus::Completed);
//! assert_eq!(state.get("summary").unwrap(), "summary of the news");
//! # });
//! ```

pub mod telemetry;

// ============================================================================
// Module aliases for namespaced access
// ============================================================================

pub use conductor_bus as bus;
pub use conductor_orchestration as orchestration;
pub use conductor_orchestration::{coordinator, crew, handoff, workflow};

#[cfg(feature = "testing")]
pub use conductor_testing as testing;

// ============================================================================
// Agents and registry
// ============================================================================

pub use conductor_core::{
    Agent, AgentContext, AgentError, AgentHandle, AgentId, AgentRegistry, AgentResult, AgentStatus,
    FnAgent, IdValidationError, RegistryError, RegistryResult, validate_id,
};

// ============================================================================
// Configuration
// ============================================================================

pub use conductor_core::{
    BusConfig, ConductorConfig, ConfigError, CrewConfig, HandoffConfig, LoggingConfig,
    WorkflowConfig,
};

// ============================================================================
// Message bus
// ============================================================================

pub use conductor_bus::{
    BusError, BusMetrics, BusResult, EventSink, Message, MessageBus, MessageHandler,
    MessagePriority, TopicPattern, handler_fn,
};

// ============================================================================
// Orchestration
// ============================================================================

pub use conductor_orchestration::{
    Component, Coordinator, Crew, CrewMember, CrewReport, CrewRole, EventPublisher, ExecutionMode,
    HandoffContext, HandoffManager, HandoffResult, HandoffRule, KeywordRule, OrchestrationError,
    OrchestrationRequest, OrchestrationResponse, OrchestrationResult, OrchestrationStrategy,
    OrchestratorInfo, TaskStatus, WorkflowEngine, WorkflowGraph, WorkflowState,
};

pub use conductor_orchestration::workflow::{
    AgentNodeConfig, ApprovalGate, CheckpointNodeConfig, CheckpointStore, Edge, EdgeCondition,
    FileCheckpointStore, InMemoryCheckpointStore, Node, Predicate, RetryPolicy, RunStatus,
    WorkflowBuilder,
};

pub use telemetry::init_tracing;
