//! Composition root tying the orchestrators together.
//!
//! The [`Coordinator`] owns the agent registry and the message bus, wires
//! the bus into the handoff manager and every crew and workflow it creates,
//! and routes named [`OrchestrationRequest`]s to the right engine.

use conductor_bus::MessageBus;
use conductor_core::{Agent, AgentHandle, AgentRegistry, AgentStatus, ConductorConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::crew::{Crew, CrewDefinition, CrewReport, ExecutionMode};
use crate::error::{Component, OrchestrationError, OrchestrationResult};
use crate::events::EventPublisher;
use crate::handoff::{HandoffContext, HandoffManager, HandoffResult};
use crate::workflow::{
    CheckpointStore, FileCheckpointStore, WorkflowDefinition, WorkflowEngine, WorkflowGraph,
    WorkflowState,
};

/// Name under which the handoff manager is listed.
pub const HANDOFF_ORCHESTRATOR: &str = "handoff";

/// Orchestration pattern behind a registered name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStrategy {
    /// Point-to-point handoffs between agents.
    Swarm,
    Crew,
    Graph,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorInfo {
    pub name: String,
    pub strategy: OrchestrationStrategy,
}

/// A request routed by [`Coordinator::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestrationRequest {
    Handoff {
        from: String,
        to: String,
        input: String,
        #[serde(default)]
        context: Option<HandoffContext>,
        #[serde(default)]
        return_to_caller: bool,
    },
    AutoHandoff {
        from: String,
        input: String,
        #[serde(default)]
        context: Option<HandoffContext>,
    },
    Crew {
        name: String,
        mode: ExecutionMode,
    },
    Workflow {
        name: String,
        input: String,
        #[serde(default)]
        variables: HashMap<String, Value>,
    },
    ResumeWorkflow {
        name: String,
        state: Box<WorkflowState>,
        checkpoint_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum OrchestrationResponse {
    Handoff(HandoffResult),
    Crew(CrewReport),
    Workflow(Box<WorkflowState>),
}

/// Owns the registry and bus and routes requests to the orchestrators.
pub struct Coordinator {
    config: ConductorConfig,
    registry: Arc<AgentRegistry>,
    bus: MessageBus,
    handoffs: Arc<HandoffManager>,
    crews: RwLock<HashMap<String, Arc<Mutex<Crew>>>>,
    workflows: RwLock<HashMap<String, Arc<WorkflowEngine>>>,
    next_crew_index: AtomicUsize,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl Coordinator {
    /// Create a coordinator from validated configuration. A configured
    /// `workflow.checkpoint_dir` attaches a [`FileCheckpointStore`] to every
    /// workflow.
    pub fn new(config: ConductorConfig) -> OrchestrationResult<Self> {
        config
            .validate()
            .map_err(|e| OrchestrationError::invalid_config(Component::Coordinator, e.to_string()))?;

        let store: Option<Arc<dyn CheckpointStore>> = match &config.workflow.checkpoint_dir {
            Some(dir) => Some(Arc::new(FileCheckpointStore::new(dir.clone())?)),
            None => None,
        };
        Ok(Self::build(config, store))
    }

    pub fn with_defaults() -> Self {
        Self::build(ConductorConfig::default(), None)
    }

    fn build(config: ConductorConfig, store: Option<Arc<dyn CheckpointStore>>) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let bus = MessageBus::new(config.bus.clone());
        let handoffs = HandoffManager::new(registry.clone())
            .with_events(EventPublisher::new(bus.clone(), HANDOFF_ORCHESTRATOR))
            .with_config(config.handoff.clone());

        Self {
            config,
            registry,
            bus,
            handoffs: Arc::new(handoffs),
            crews: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
            next_crew_index: AtomicUsize::new(0),
            store,
        }
    }

    /// Use `store` for workflows registered from now on.
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn handoffs(&self) -> &Arc<HandoffManager> {
        &self.handoffs
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the bus delivery loop.
    pub async fn start(&self) {
        self.bus.start().await;
        info!(bus = %self.bus.name(), "Coordinator started");
    }

    pub async fn shutdown(&self) {
        self.bus.stop().await;
        info!(bus = %self.bus.name(), "Coordinator stopped");
    }

    // ========================================================================
    // Agents
    // ========================================================================

    pub fn register_agent(
        &self,
        id: &str,
        agent: Arc<dyn Agent>,
        capabilities: Vec<String>,
    ) -> OrchestrationResult<AgentHandle> {
        Ok(self
            .registry
            .register_with_capabilities(id, agent, capabilities)?)
    }

    /// Idempotent.
    pub fn unregister_agent(&self, id: &str) -> bool {
        self.registry.deregister(id)
    }

    pub fn get_agent(&self, id: &str) -> OrchestrationResult<AgentHandle> {
        Ok(self.registry.resolve(id)?)
    }

    pub fn list_agents(&self, capability: Option<&str>) -> Vec<AgentHandle> {
        self.registry.list(capability)
    }

    pub fn find_agent_by_capability(&self, capability: &str) -> Option<AgentHandle> {
        self.registry.find_by_capability(capability)
    }

    pub fn update_agent_status(&self, id: &str, status: AgentStatus) -> OrchestrationResult<()> {
        Ok(self.registry.set_status(id, status)?)
    }

    /// `None` for unregistered agents.
    pub fn get_agent_status(&self, id: &str) -> Option<AgentStatus> {
        self.registry.status(id)
    }

    // ========================================================================
    // Orchestrators
    // ========================================================================

    /// Create an empty crew. Crews are numbered in creation order; the
    /// number prefixes their task ids.
    pub async fn create_crew(&self, name: &str) -> OrchestrationResult<Arc<Mutex<Crew>>> {
        let mut crews = self.crews.write().await;
        self.check_name_free(name, crews.contains_key(name)).await?;

        let index = self.next_crew_index.fetch_add(1, Ordering::Relaxed);
        let crew = Crew::new(name, index, self.registry.clone())
            .with_events(EventPublisher::new(self.bus.clone(), name))
            .with_config(self.config.crew.clone());
        Ok(self.insert_crew(&mut crews, crew))
    }

    /// Create a crew from a parsed roster and task list.
    pub async fn register_crew_definition(
        &self,
        definition: CrewDefinition,
    ) -> OrchestrationResult<Arc<Mutex<Crew>>> {
        let mut crews = self.crews.write().await;
        let name = definition.name.clone();
        self.check_name_free(&name, crews.contains_key(&name)).await?;

        let index = self.next_crew_index.fetch_add(1, Ordering::Relaxed);
        let crew = Crew::from_definition(definition, index, self.registry.clone())?
            .with_events(EventPublisher::new(self.bus.clone(), name.as_str()))
            .with_config(self.config.crew.clone());
        Ok(self.insert_crew(&mut crews, crew))
    }

    pub async fn crew(&self, name: &str) -> Option<Arc<Mutex<Crew>>> {
        self.crews.read().await.get(name).cloned()
    }

    /// Register a workflow under its graph name.
    pub async fn register_workflow(&self, graph: WorkflowGraph) -> OrchestrationResult<Arc<WorkflowEngine>> {
        let name = graph.name().to_string();
        let crews_has = self.crews.read().await.contains_key(&name);
        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&name) || crews_has || name == HANDOFF_ORCHESTRATOR {
            return Err(duplicate_name(&name));
        }

        let mut engine = WorkflowEngine::new(graph, self.registry.clone())
            .with_events(EventPublisher::new(self.bus.clone(), name.as_str()))
            .with_config(self.config.workflow.clone());
        if let Some(store) = &self.store {
            engine = engine.with_store(store.clone());
        }

        let engine = Arc::new(engine);
        workflows.insert(name.clone(), engine.clone());
        info!(workflow = %name, "Registered workflow");
        Ok(engine)
    }

    pub async fn register_workflow_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> OrchestrationResult<Arc<WorkflowEngine>> {
        self.register_workflow(definition.build()?).await
    }

    pub async fn workflow(&self, name: &str) -> Option<Arc<WorkflowEngine>> {
        self.workflows.read().await.get(name).cloned()
    }

    /// Registered orchestrators: the handoff manager, then crews and
    /// workflows by name.
    pub async fn list_orchestrators(&self) -> Vec<OrchestratorInfo> {
        let mut crews: Vec<String> = self.crews.read().await.keys().cloned().collect();
        let mut workflows: Vec<String> = self.workflows.read().await.keys().cloned().collect();
        crews.sort();
        workflows.sort();

        std::iter::once(OrchestratorInfo {
            name: HANDOFF_ORCHESTRATOR.to_string(),
            strategy: OrchestrationStrategy::Swarm,
        })
        .chain(crews.into_iter().map(|name| OrchestratorInfo {
            name,
            strategy: OrchestrationStrategy::Crew,
        }))
        .chain(workflows.into_iter().map(|name| OrchestratorInfo {
            name,
            strategy: OrchestrationStrategy::Graph,
        }))
        .collect()
    }

    /// Route a request to its orchestrator.
    pub async fn run(&self, request: OrchestrationRequest) -> OrchestrationResult<OrchestrationResponse> {
        match request {
            OrchestrationRequest::Handoff {
                from,
                to,
                input,
                context,
                return_to_caller,
            } => {
                debug!(from = %from, to = %to, "Routing handoff request");
                self.handoffs
                    .handoff(&from, &to, &input, context, return_to_caller)
                    .await
                    .map(OrchestrationResponse::Handoff)
            }
            OrchestrationRequest::AutoHandoff {
                from,
                input,
                context,
            } => self
                .handoffs
                .auto_handoff(&from, &input, context)
                .await
                .map(OrchestrationResponse::Handoff),
            OrchestrationRequest::Crew { name, mode } => {
                let crew = self
                    .crew(&name)
                    .await
                    .ok_or_else(|| OrchestrationError::UnknownOrchestrator(name.clone()))?;
                debug!(crew = %name, mode = mode.as_str(), "Routing crew request");
                let report = crew.lock().await.execute(mode).await;
                Ok(OrchestrationResponse::Crew(report))
            }
            OrchestrationRequest::Workflow {
                name,
                input,
                variables,
            } => {
                let engine = self.require_workflow(&name).await?;
                debug!(workflow = %name, "Routing workflow request");
                let state = engine.execute(&input, variables).await?;
                Ok(OrchestrationResponse::Workflow(Box::new(state)))
            }
            OrchestrationRequest::ResumeWorkflow {
                name,
                state,
                checkpoint_id,
            } => {
                let engine = self.require_workflow(&name).await?;
                let state = engine.resume(*state, &checkpoint_id).await?;
                Ok(OrchestrationResponse::Workflow(Box::new(state)))
            }
        }
    }

    async fn require_workflow(&self, name: &str) -> OrchestrationResult<Arc<WorkflowEngine>> {
        self.workflow(name)
            .await
            .ok_or_else(|| OrchestrationError::UnknownOrchestrator(name.to_string()))
    }

    /// Crew names share one namespace with workflows and the handoff manager.
    async fn check_name_free(&self, name: &str, crew_exists: bool) -> OrchestrationResult<()> {
        if crew_exists
            || name == HANDOFF_ORCHESTRATOR
            || self.workflows.read().await.contains_key(name)
        {
            return Err(duplicate_name(name));
        }
        Ok(())
    }

    fn insert_crew(&self, crews: &mut HashMap<String, Arc<Mutex<Crew>>>, crew: Crew) -> Arc<Mutex<Crew>> {
        let name = crew.name().to_string();
        info!(crew = %name, index = crew.index(), "Created crew");
        let crew = Arc::new(Mutex::new(crew));
        crews.insert(name, crew.clone());
        crew
    }
}

fn duplicate_name(name: &str) -> OrchestrationError {
    OrchestrationError::invalid_config(
        Component::Coordinator,
        format!("an orchestrator named '{}' already exists", name),
    )
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("bus", &self.bus.name())
            .field("agents", &self.registry.len())
            .finish()
    }
}
