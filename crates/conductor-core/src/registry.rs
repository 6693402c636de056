//! Agent registry: maps agent ids to invocable handles.
//!
//! The registry is the leaf component every orchestrator resolves agents
//! through. It is safe to share behind an `Arc` and supports registration and
//! removal while orchestrations are in flight.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::agent::{Agent, AgentHandle};
use crate::error::{RegistryError, RegistryResult};
use crate::types::{AgentId, AgentStatus};

struct Registration {
    handle: AgentHandle,
    seq: u64,
    status: AgentStatus,
}

/// A registry of agents that can be resolved by id.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<AgentId, Registration>,
    next_seq: AtomicU64,
}

impl AgentRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under `id`.
    ///
    /// Fails with [`RegistryError::DuplicateAgent`] if the id is taken; the
    /// existing handle is left untouched.
    pub fn register(&self, id: &str, agent: Arc<dyn Agent>) -> RegistryResult<AgentHandle> {
        self.register_with_capabilities(id, agent, Vec::new())
    }

    /// Register an agent together with its capability tags.
    pub fn register_with_capabilities(
        &self,
        id: &str,
        agent: Arc<dyn Agent>,
        capabilities: Vec<String>,
    ) -> RegistryResult<AgentHandle> {
        let agent_id = parse_id(id)?;
        let handle = AgentHandle::new(agent_id.clone(), agent).with_capabilities(capabilities);

        match self.agents.entry(agent_id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateAgent(id.to_string())),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(Registration {
                    handle: handle.clone(),
                    seq,
                    status: AgentStatus::Idle,
                });
                info!(agent_id = %id, "Registered agent");
                Ok(handle)
            }
        }
    }

    /// Resolve a registered agent.
    pub fn resolve(&self, id: &str) -> RegistryResult<AgentHandle> {
        let agent_id = parse_id(id)?;
        self.agents
            .get(&agent_id)
            .map(|reg| reg.handle.clone())
            .ok_or_else(|| RegistryError::AgentNotFound(id.to_string()))
    }

    /// Remove an agent. Removing an unknown id is a no-op.
    ///
    /// Returns `true` if an agent was removed.
    pub fn deregister(&self, id: &str) -> bool {
        let Ok(agent_id) = AgentId::parse(id) else {
            return false;
        };
        let removed = self.agents.remove(&agent_id).is_some();
        if removed {
            info!(agent_id = %id, "Deregistered agent");
        } else {
            debug!(agent_id = %id, "Deregister of unknown agent ignored");
        }
        removed
    }

    /// Record the status of a registered agent.
    pub fn set_status(&self, id: &str, status: AgentStatus) -> RegistryResult<()> {
        let agent_id = parse_id(id)?;
        let mut reg = self
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound(id.to_string()))?;
        reg.status = status;
        debug!(agent_id = %id, status = %status, "Agent status updated");
        Ok(())
    }

    /// Last recorded status; new registrations start [`AgentStatus::Idle`].
    pub fn status(&self, id: &str) -> Option<AgentStatus> {
        let agent_id = AgentId::parse(id).ok()?;
        self.agents.get(&agent_id).map(|reg| reg.status)
    }

    /// Check if an agent is registered.
    pub fn contains(&self, id: &str) -> bool {
        AgentId::parse(id)
            .map(|agent_id| self.agents.contains_key(&agent_id))
            .unwrap_or(false)
    }

    /// List registered agents in registration order, optionally filtered by
    /// capability.
    pub fn list(&self, capability: Option<&str>) -> Vec<AgentHandle> {
        let mut entries: Vec<(u64, AgentHandle)> = self
            .agents
            .iter()
            .filter(|reg| capability.is_none_or(|cap| reg.handle.has_capability(cap)))
            .map(|reg| (reg.seq, reg.handle.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, handle)| handle).collect()
    }

    /// Find the first registered agent with a capability.
    pub fn find_by_capability(&self, capability: &str) -> Option<AgentHandle> {
        self.list(Some(capability)).into_iter().next()
    }

    /// Ids of all registered agents in registration order.
    pub fn ids(&self) -> Vec<AgentId> {
        self.list(None)
            .into_iter()
            .map(|handle| handle.id().clone())
            .collect()
    }

    /// Get count of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Remove every agent.
    pub fn clear(&self) {
        self.agents.clear();
    }
}

fn parse_id(id: &str) -> RegistryResult<AgentId> {
    AgentId::parse(id).map_err(|reason| RegistryError::InvalidId {
        id: id.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentContext, FnAgent};

    fn constant(output: &'static str) -> Arc<dyn Agent> {
        Arc::new(FnAgent::new(move |_: String, _: AgentContext| async move {
            Ok(output.to_string())
        }))
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = AgentRegistry::new();
        let registered = registry.register("writer", constant("draft")).unwrap();

        let resolved = registry.resolve("writer").unwrap();
        assert!(resolved.same_agent(&registered));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_does_not_overwrite() {
        let registry = AgentRegistry::new();
        let first = registry.register("writer", constant("one")).unwrap();

        let err = registry.register("writer", constant("two")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateAgent("writer".to_string()));

        let resolved = registry.resolve("writer").unwrap();
        assert!(resolved.same_agent(&first));
    }

    #[test]
    fn test_resolve_missing() {
        let registry = AgentRegistry::new();
        assert_eq!(
            registry.resolve("ghost").unwrap_err(),
            RegistryError::AgentNotFound("ghost".to_string())
        );
    }

    #[test]
    fn test_status_tracking() {
        let registry = AgentRegistry::new();
        registry.register("worker", constant("x")).unwrap();
        assert_eq!(registry.status("worker"), Some(AgentStatus::Idle));

        registry.set_status("worker", AgentStatus::Busy).unwrap();
        assert_eq!(registry.status("worker"), Some(AgentStatus::Busy));

        assert_eq!(
            registry.set_status("ghost", AgentStatus::Offline).unwrap_err(),
            RegistryError::AgentNotFound("ghost".to_string())
        );
        assert_eq!(registry.status("ghost"), None);

        registry.deregister("worker");
        registry.register("worker", constant("y")).unwrap();
        assert_eq!(registry.status("worker"), Some(AgentStatus::Idle));
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let registry = AgentRegistry::new();
        registry.register("temp", constant("x")).unwrap();

        assert!(registry.deregister("temp"));
        assert!(!registry.deregister("temp"));
        assert!(!registry.deregister("never registered"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_id_rejected() {
        let registry = AgentRegistry::new();
        let err = registry.register("bad id", constant("x")).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_AGENT_ID");
    }

    #[test]
    fn test_list_by_capability_in_registration_order() {
        let registry = AgentRegistry::new();
        registry
            .register_with_capabilities("b", constant("b"), vec!["search".to_string()])
            .unwrap();
        registry.register("c", constant("c")).unwrap();
        registry
            .register_with_capabilities("a", constant("a"), vec!["search".to_string()])
            .unwrap();

        let ids: Vec<String> = registry
            .list(Some("search"))
            .iter()
            .map(|h| h.id().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);

        let first = registry.find_by_capability("search").unwrap();
        assert_eq!(first.id().as_str(), "b");
        assert!(registry.find_by_capability("write").is_none());
        assert_eq!(registry.ids().len(), 3);
    }
}
