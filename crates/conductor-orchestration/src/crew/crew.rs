//! Team execution over a shared task queue.

use chrono::Utc;
use conductor_core::template::{render, value_to_text};
use conductor_core::{AgentContext, AgentHandle, AgentRegistry, CrewConfig};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::member::{CrewMember, CrewRole};
use super::report::{CrewReport, ExecutionMode};
use super::task::{Task, TaskSpec, TaskStatus};
use crate::error::{Component, OrchestrationError, OrchestrationResult};
use crate::events::{
    CREW_EXECUTION_COMPLETED, CREW_TASK_COMPLETED, CREW_TASK_FAILED, CREW_TASK_STARTED,
    EventPublisher,
};

const NO_AVAILABLE_AGENT: &str = "No available agent";

/// A crew roster and task list as supplied by a configuration loader.
///
/// Tasks are named by `key`; dependencies and `{key}` placeholders refer to
/// those keys and are rewritten to the generated task ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrewDefinition {
    pub name: String,
    #[serde(default)]
    pub members: Vec<CrewMember>,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub key: String,
    #[serde(flatten)]
    pub spec: TaskSpec,
}

/// A task bound to a member, ready to invoke.
struct Assignment {
    task_idx: usize,
    handle: AgentHandle,
    input: String,
    context: AgentContext,
}

/// A team of registered agents working through a task list.
///
/// Task ids are `crew<index>-task<slot>` and stay stable for the crew's
/// lifetime. Completed results are readable by later tasks through `{task id}`
/// placeholders and through shared memory under `task_<id>_result`.
pub struct Crew {
    name: String,
    index: usize,
    registry: Arc<AgentRegistry>,
    events: EventPublisher,
    config: CrewConfig,
    members: Vec<CrewMember>,
    tasks: Vec<Task>,
    shared_memory: HashMap<String, Value>,
    history: Vec<CrewReport>,
}

impl Crew {
    pub fn new(name: impl Into<String>, index: usize, registry: Arc<AgentRegistry>) -> Self {
        Self {
            name: name.into(),
            index,
            registry,
            events: EventPublisher::disabled(),
            config: CrewConfig::default(),
            members: Vec::new(),
            tasks: Vec::new(),
            shared_memory: HashMap::new(),
            history: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: CrewConfig) -> Self {
        self.config = config;
        self
    }

    /// Build a crew from a parsed definition.
    pub fn from_definition(
        definition: CrewDefinition,
        index: usize,
        registry: Arc<AgentRegistry>,
    ) -> OrchestrationResult<Self> {
        let mut crew = Crew::new(definition.name, index, registry);
        for member in definition.members {
            crew.add_member(member)?;
        }

        let mut ids: HashMap<String, String> = HashMap::new();
        for TaskDefinition { key, mut spec } in definition.tasks {
            if ids.contains_key(&key) {
                return Err(OrchestrationError::invalid_config(
                    Component::Crew,
                    format!("duplicate task key '{}'", key),
                ));
            }
            spec.dependencies = spec
                .dependencies
                .iter()
                .map(|dep| {
                    ids.get(dep).cloned().ok_or_else(|| {
                        OrchestrationError::invalid_config(
                            Component::Crew,
                            format!("task '{}' depends on unknown task '{}'", key, dep),
                        )
                    })
                })
                .collect::<OrchestrationResult<_>>()?;
            spec.description = render(&spec.description, |k| {
                ids.get(k).map(|id| format!("{{{}}}", id))
            });

            let id = crew.add_task_spec(spec)?;
            ids.insert(key, id);
        }
        Ok(crew)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn members(&self) -> &[CrewMember] {
        &self.members
    }

    pub fn manager(&self) -> Option<&CrewMember> {
        self.members.iter().find(|m| m.role == CrewRole::Manager)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn set_tolerate_partial_failure(&mut self, tolerate: bool) {
        self.config.tolerate_partial_failure = tolerate;
    }

    /// Reports of every past execution, oldest first.
    pub fn execution_history(&self) -> &[CrewReport] {
        &self.history
    }

    /// Add a registered agent to the crew.
    pub fn add_member(&mut self, member: CrewMember) -> OrchestrationResult<()> {
        if !self.registry.contains(&member.agent_id) {
            return Err(OrchestrationError::AgentNotFound(member.agent_id));
        }
        if self.members.iter().any(|m| m.agent_id == member.agent_id) {
            return Err(OrchestrationError::invalid_config(
                Component::Crew,
                format!("agent '{}' is already a member of '{}'", member.agent_id, self.name),
            ));
        }
        if member.role == CrewRole::Manager && self.manager().is_some() {
            return Err(OrchestrationError::invalid_config(
                Component::Crew,
                format!("crew '{}' already has a manager", self.name),
            ));
        }
        if member.max_concurrent_tasks == Some(0) {
            return Err(OrchestrationError::invalid_config(
                Component::Crew,
                format!("member '{}' must allow at least one task", member.agent_id),
            ));
        }

        info!(crew = %self.name, agent_id = %member.agent_id, role = member.role.as_str(), "Added crew member");
        self.members.push(member);
        Ok(())
    }

    /// Append a task. Returns its id.
    pub fn add_task<I, S>(
        &mut self,
        description: impl Into<String>,
        priority: i32,
        dependencies: I,
    ) -> OrchestrationResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_task_spec(
            TaskSpec::new(description)
                .priority(priority)
                .depends_on(dependencies),
        )
    }

    /// Append a task with full parameters. Dependencies must name tasks
    /// already in the crew.
    pub fn add_task_spec(&mut self, spec: TaskSpec) -> OrchestrationResult<String> {
        if let Some(unknown) = spec
            .dependencies
            .iter()
            .find(|dep| self.task(dep).is_none())
        {
            return Err(OrchestrationError::invalid_config(
                Component::Crew,
                format!("unknown dependency '{}'", unknown),
            ));
        }

        let slot = self.tasks.len();
        let id = format!("crew{}-task{}", self.index, slot);
        debug!(crew = %self.name, task_id = %id, priority = spec.priority, "Added task");
        self.tasks.push(Task::from_spec(id.clone(), slot, spec));
        Ok(id)
    }

    pub fn get_shared_memory(&self, key: &str) -> Option<&Value> {
        self.shared_memory.get(key)
    }

    pub fn update_shared_memory(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.shared_memory.insert(key.into(), value.into());
    }

    pub fn shared_memory(&self) -> &HashMap<String, Value> {
        &self.shared_memory
    }

    /// Run every eligible pending task with the given strategy.
    ///
    /// Task failures are recorded on the task and never abort the run. Tasks
    /// whose dependencies failed stay pending.
    pub async fn execute(&mut self, mode: ExecutionMode) -> CrewReport {
        let started_at = Utc::now();
        info!(
            crew = %self.name,
            mode = mode.as_str(),
            tasks = self.tasks.len(),
            members = self.members.len(),
            "Executing crew"
        );

        let effective_mode = match mode {
            ExecutionMode::Sequential => {
                self.run_sequential().await;
                ExecutionMode::Sequential
            }
            ExecutionMode::Parallel => {
                self.run_parallel().await;
                ExecutionMode::Parallel
            }
            ExecutionMode::Hierarchical => {
                let manager = self.members.iter().position(|m| m.role == CrewRole::Manager);
                match manager {
                    Some(manager) => {
                        self.run_hierarchical(manager).await;
                        ExecutionMode::Hierarchical
                    }
                    None => {
                        warn!(crew = %self.name, "No manager in crew, falling back to sequential execution");
                        self.run_sequential().await;
                        ExecutionMode::Sequential
                    }
                }
            }
        };

        let report = CrewReport::build(
            &self.name,
            mode,
            effective_mode,
            &self.tasks,
            self.config.tolerate_partial_failure,
            started_at,
        );

        if report.blocked_count > 0 {
            debug!(crew = %self.name, blocked = report.blocked_count, "Tasks blocked by failed dependencies");
        }
        info!(
            crew = %self.name,
            completed = report.completed_count,
            failed = report.failed_count,
            success = report.success,
            "Crew execution finished"
        );
        self.events
            .emit(
                CREW_EXECUTION_COMPLETED,
                json!({
                    "crew": self.name,
                    "mode": effective_mode.as_str(),
                    "success": report.success,
                    "completed": report.completed_count,
                    "failed": report.failed_count,
                    "blocked": report.blocked_count,
                }),
            )
            .await;

        self.history.push(report.clone());
        report
    }

    // ========================================================================
    // Strategies
    // ========================================================================

    async fn run_sequential(&mut self) {
        while let Some(task_idx) = self.eligible().first().copied() {
            match self.select_member(task_idx, &self.idle_load()) {
                Some(member_idx) => self.run_one(task_idx, member_idx).await,
                None => self.fail_unassigned(task_idx).await,
            }
        }
    }

    async fn run_parallel(&mut self) {
        loop {
            let eligible = self.eligible();
            if eligible.is_empty() {
                break;
            }

            let mut load = self.idle_load();
            let mut batch = Vec::new();
            let mut settled = 0usize;

            for task_idx in eligible {
                match self.select_member(task_idx, &load) {
                    Some(member_idx) => {
                        load[member_idx] += 1;
                        match self.prepare(task_idx, member_idx) {
                            Ok(assignment) => batch.push(assignment),
                            Err(error) => {
                                self.finish(task_idx, Err(error)).await;
                                settled += 1;
                            }
                        }
                    }
                    None if self.select_member(task_idx, &self.idle_load()).is_none() => {
                        self.fail_unassigned(task_idx).await;
                        settled += 1;
                    }
                    // every member is busy; the task waits for the next wave
                    None => {}
                }
            }

            if batch.is_empty() && settled == 0 {
                break;
            }

            for assignment in &batch {
                self.emit_started(assignment.task_idx).await;
            }
            debug!(crew = %self.name, wave = batch.len(), "Dispatching task wave");

            let outcomes = join_all(
                batch
                    .iter()
                    .map(|a| a.handle.invoke(&a.input, &a.context)),
            )
            .await;

            for (assignment, outcome) in batch.iter().zip(outcomes) {
                self.finish(assignment.task_idx, outcome.map_err(|e| e.to_string()))
                    .await;
            }
        }
    }

    async fn run_hierarchical(&mut self, manager_idx: usize) {
        while let Some(task_idx) = self.eligible().first().copied() {
            match self.delegate(task_idx, manager_idx).await {
                Some(member_idx) => self.run_one(task_idx, member_idx).await,
                None => self.fail_unassigned(task_idx).await,
            }
        }
    }

    // ========================================================================
    // Scheduling helpers
    // ========================================================================

    /// Pending tasks whose dependencies are all complete, highest priority
    /// first, insertion order within a priority.
    fn eligible(&self) -> Vec<usize> {
        let complete: HashSet<&str> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Complete)
            .map(|t| t.id.as_str())
            .collect();

        let mut eligible: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.status == TaskStatus::Pending
                    && t.dependencies.iter().all(|d| complete.contains(d.as_str()))
            })
            .map(|(idx, _)| idx)
            .collect();
        eligible.sort_by_key(|&idx| (std::cmp::Reverse(self.tasks[idx].priority), self.tasks[idx].slot));
        eligible
    }

    fn idle_load(&self) -> Vec<usize> {
        vec![0; self.members.len()]
    }

    fn capacity(&self, member: &CrewMember) -> usize {
        member
            .max_concurrent_tasks
            .unwrap_or(self.config.default_max_concurrent_tasks)
    }

    /// First idle non-manager member with the required skills, then any idle
    /// Worker, then an idle Manager.
    fn select_member(&self, task_idx: usize, load: &[usize]) -> Option<usize> {
        let required = &self.tasks[task_idx].required_skills;
        let idle = |idx: usize| load[idx] < self.capacity(&self.members[idx]);
        let pick = |wanted: &dyn Fn(&CrewMember) -> bool| {
            self.members
                .iter()
                .enumerate()
                .find(|(idx, m)| idle(*idx) && wanted(*m))
                .map(|(idx, _)| idx)
        };

        pick(&|m| m.role != CrewRole::Manager && m.has_skills(required))
            .or_else(|| pick(&|m| m.role == CrewRole::Worker))
            .or_else(|| pick(&|m| m.role == CrewRole::Manager))
    }

    /// Ask the manager who should run a task. Falls back to the default
    /// selection when the manager fails or names nobody.
    async fn delegate(&self, task_idx: usize, manager_idx: usize) -> Option<usize> {
        let fallback = self.select_member(task_idx, &self.idle_load());
        let manager = &self.members[manager_idx];
        let task = &self.tasks[task_idx];

        let handle = match self.registry.resolve(&manager.agent_id) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(crew = %self.name, manager = %manager.agent_id, error = %e, "Manager unavailable, using default assignment");
                return fallback;
            }
        };

        let candidates: Vec<&str> = self.members.iter().map(|m| m.agent_id.as_str()).collect();
        let context = AgentContext::new()
            .with("session_id", task.id.as_str())
            .with("orchestrator", "crew")
            .with("crew", self.name.as_str())
            .with("delegation", true)
            .with("task", task_json(task))
            .with("candidates", json!(candidates));

        match handle.invoke(&self.delegation_prompt(task), &context).await {
            Ok(answer) => match self.member_named_in(&answer) {
                Some(idx) => {
                    debug!(crew = %self.name, task_id = %task.id, assignee = %self.members[idx].agent_id, "Manager delegated task");
                    Some(idx)
                }
                None => {
                    debug!(crew = %self.name, task_id = %task.id, "Manager reply named no member, using default assignment");
                    fallback
                }
            },
            Err(e) => {
                warn!(crew = %self.name, task_id = %task.id, error = %e, "Manager delegation failed, using default assignment");
                fallback
            }
        }
    }

    fn delegation_prompt(&self, task: &Task) -> String {
        let mut prompt = format!(
            "Assign the following task to one crew member. Reply with the member id only.\n\nTask {}: {}\n",
            task.id, task.description
        );
        if !task.required_skills.is_empty() {
            prompt.push_str(&format!("Required skills: {}\n", task.required_skills.join(", ")));
        }
        prompt.push_str("\nMembers:\n");
        for member in &self.members {
            prompt.push_str(&format!(
                "- {} ({}; skills: {})\n",
                member.agent_id,
                member.role.as_str(),
                member.skills.join(", ")
            ));
        }
        prompt
    }

    /// Member whose id is the whole reply, else the longest id it mentions.
    fn member_named_in(&self, answer: &str) -> Option<usize> {
        let answer = answer.trim();
        self.members
            .iter()
            .position(|m| m.agent_id == answer)
            .or_else(|| {
                self.members
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| answer.contains(m.agent_id.as_str()))
                    .max_by_key(|(idx, m)| (m.agent_id.len(), std::cmp::Reverse(*idx)))
                    .map(|(idx, _)| idx)
            })
    }

    // ========================================================================
    // Task execution
    // ========================================================================

    async fn run_one(&mut self, task_idx: usize, member_idx: usize) {
        let assignment = match self.prepare(task_idx, member_idx) {
            Ok(assignment) => assignment,
            Err(error) => {
                self.finish(task_idx, Err(error)).await;
                return;
            }
        };

        self.emit_started(task_idx).await;
        let outcome = assignment
            .handle
            .invoke(&assignment.input, &assignment.context)
            .await;
        self.finish(task_idx, outcome.map_err(|e| e.to_string()))
            .await;
    }

    /// Mark the task in progress and build its input and context.
    fn prepare(&mut self, task_idx: usize, member_idx: usize) -> Result<Assignment, String> {
        let member = &self.members[member_idx];
        let agent_id = member.agent_id.clone();
        let role = member.role;
        self.tasks[task_idx].start(&agent_id);

        let handle = self.registry.resolve(&agent_id).map_err(|e| e.to_string())?;
        let task = &self.tasks[task_idx];
        let input = render(&task.description, |key| self.lookup(key));
        let context = AgentContext::new()
            .with("session_id", task.id.as_str())
            .with("orchestrator", "crew")
            .with("crew", self.name.as_str())
            .with("role", role.as_str())
            .with("task", task_json(task))
            .with(
                "shared_memory",
                Value::Object(self.shared_memory.clone().into_iter().collect()),
            );

        Ok(Assignment {
            task_idx,
            handle,
            input,
            context,
        })
    }

    /// `{task id}` resolves to a completed task's result, anything else to
    /// shared memory.
    fn lookup(&self, key: &str) -> Option<String> {
        match self.task(key) {
            Some(task) if task.status == TaskStatus::Complete => task.result.clone(),
            _ => self.shared_memory.get(key).map(value_to_text),
        }
    }

    async fn finish(&mut self, task_idx: usize, outcome: Result<String, String>) {
        let task = &mut self.tasks[task_idx];
        let task_id = task.id.clone();
        let agent_id = task.assigned_to.clone().unwrap_or_default();

        match outcome {
            Ok(output) => {
                task.complete(output.clone());
                self.shared_memory
                    .insert(format!("task_{}_result", task_id), Value::String(output));
                info!(crew = %self.name, task_id = %task_id, agent_id = %agent_id, "Task completed");
                self.events
                    .emit(
                        CREW_TASK_COMPLETED,
                        json!({ "crew": self.name, "task_id": task_id, "agent_id": agent_id }),
                    )
                    .await;
            }
            Err(error) => {
                task.fail(error.clone());
                warn!(crew = %self.name, task_id = %task_id, agent_id = %agent_id, error = %error, "Task failed");
                self.events
                    .emit_failure(
                        CREW_TASK_FAILED,
                        json!({
                            "crew": self.name,
                            "task_id": task_id,
                            "agent_id": agent_id,
                            "error": error,
                        }),
                    )
                    .await;
            }
        }
    }

    async fn fail_unassigned(&mut self, task_idx: usize) {
        self.finish(task_idx, Err(NO_AVAILABLE_AGENT.to_string()))
            .await;
    }

    async fn emit_started(&self, task_idx: usize) {
        let task = &self.tasks[task_idx];
        debug!(crew = %self.name, task_id = %task.id, "Task started");
        self.events
            .emit(
                CREW_TASK_STARTED,
                json!({
                    "crew": self.name,
                    "task_id": task.id,
                    "agent_id": task.assigned_to,
                }),
            )
            .await;
    }
}

impl std::fmt::Debug for Crew {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crew")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("config", &self.config)
            .field("members", &self.members)
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

fn task_json(task: &Task) -> Value {
    json!({
        "id": task.id,
        "description": task.description,
        "priority": task.priority,
        "required_skills": task.required_skills,
        "metadata": task.metadata,
    })
}
