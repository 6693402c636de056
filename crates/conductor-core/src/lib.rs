//! # Conductor Core
//!
//! Core types for the Conductor orchestration framework.
//!
//! Agents are opaque to every orchestrator: given input text and an
//! [`AgentContext`] they asynchronously produce output text or fail with an
//! [`AgentError`]. This crate defines that capability, the [`AgentRegistry`]
//! orchestrators resolve agents through, validated identifiers, `{key}`
//! template rendering and the TOML configuration shared by the workspace.
//!
//! ## Example
//!
//! ```rust
//! use conductor_core::{AgentContext, AgentRegistry, FnAgent};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let registry = AgentRegistry::new();
//! registry
//!     .register(
//!         "shouter",
//!         Arc::new(FnAgent::new(|input: String, _ctx: AgentContext| async move {
//!             Ok(input.to_uppercase())
//!         })),
//!     )
//!     .unwrap();
//!
//! let handle = registry.resolve("shouter").unwrap();
//! let out = handle.invoke("hello", &AgentContext::new()).await.unwrap();
//! assert_eq!(out, "HELLO");
//! # });
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod registry;
pub mod template;
pub mod types;

pub use agent::{Agent, AgentContext, AgentHandle, FnAgent};
pub use config::{
    BusConfig, ConductorConfig, CrewConfig, HandoffConfig, LoggingConfig, WorkflowConfig,
};
pub use error::{AgentError, AgentResult, ConfigError, RegistryError, RegistryResult};
pub use registry::AgentRegistry;
pub use types::{AgentId, AgentStatus, IdValidationError, validate_id};
