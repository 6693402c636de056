//! # Conductor Testing
//!
//! Test doubles for Conductor orchestrations.
//!
//! ## Components
//!
//! - **Mock agents**: [`MockAgent`] (scripted responses), [`EchoAgent`],
//!   [`FailingAgent`] and [`FlakyAgent`] (fails N times, then succeeds)
//! - **Bus recorders**: [`CollectingHandler`] records delivered messages,
//!   [`RecordingSink`] records forwarded events
//!
//! ## Usage
//!
//! ```rust
//! use conductor_core::{AgentContext, AgentRegistry};
//! use conductor_testing::MockAgent;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let researcher = MockAgent::new("researcher").with_default_response("data");
//! let registry = AgentRegistry::new();
//! registry.register("researcher", Arc::new(researcher.clone())).unwrap();
//!
//! let out = registry
//!     .resolve("researcher")
//!     .unwrap()
//!     .invoke("topic", &AgentContext::new())
//!     .await
//!     .unwrap();
//! assert_eq!(out, "data");
//! assert_eq!(researcher.call_history(), vec!["topic"]);
//! # });
//! ```

pub mod bus_recorders;
pub mod mock_agents;

pub use bus_recorders::{CollectingHandler, ForwardedEvent, RecordingSink};
pub use mock_agents::{AgentCall, EchoAgent, FailingAgent, FlakyAgent, MockAgent};

use conductor_core::{Agent, AgentRegistry};
use std::sync::Arc;

/// Erase an agent's type for use with [`registry_with`].
pub fn shared<A: Agent + 'static>(agent: A) -> Arc<dyn Agent> {
    Arc::new(agent)
}

/// Build a registry from `(id, agent)` pairs.
///
/// # Panics
/// Panics if an id is invalid or repeated; intended for test setup only.
pub fn registry_with(agents: Vec<(&str, Arc<dyn Agent>)>) -> Arc<AgentRegistry> {
    let registry = AgentRegistry::new();
    for (id, agent) in agents {
        if let Err(e) = registry.register(id, agent) {
            panic!("test registry setup failed for '{}': {}", id, e);
        }
    }
    Arc::new(registry)
}
