//! Workflow graph structure and construction-time validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

use super::predicate::{Predicate, PredicateError};
use super::retry::RetryPolicy;
use crate::error::{OrchestrationError, OrchestrationResult};

fn default_input_template() -> String {
    "{input}".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNodeConfig {
    pub agent_id: String,
    /// `{variable}` placeholders are filled from the run's variables.
    #[serde(default = "default_input_template")]
    pub input_template: String,
    /// Variable receiving the agent's output.
    #[serde(default)]
    pub output_key: Option<String>,
}

impl AgentNodeConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            input_template: default_input_template(),
            output_key: None,
        }
    }

    pub fn input_template(mut self, template: impl Into<String>) -> Self {
        self.input_template = template.into();
        self
    }

    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionNodeConfig {
    pub predicate: Predicate,
    pub output_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointNodeConfig {
    /// Snapshot name; defaults to the node id.
    #[serde(default)]
    pub name: Option<String>,
    /// Pause until approved.
    #[serde(default)]
    pub manual_approval: bool,
    /// How long a pause may last before it expires.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl CheckpointNodeConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn manual_approval(mut self) -> Self {
        self.manual_approval = true;
        self
    }

    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelNodeConfig {
    pub children: Vec<String>,
    #[serde(default)]
    pub tolerate_partial_failure: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlerConfig {
    /// Times the failed node is re-run before giving up.
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default)]
    pub fallback_node: Option<String>,
}

/// Node type with its type-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    End,
    Agent(AgentNodeConfig),
    Condition(ConditionNodeConfig),
    Checkpoint(CheckpointNodeConfig),
    Parallel(ParallelNodeConfig),
    ErrorHandler(ErrorHandlerConfig),
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::Agent(_) => "agent",
            NodeKind::Condition(_) => "condition",
            NodeKind::Checkpoint(_) => "checkpoint",
            NodeKind::Parallel(_) => "parallel",
            NodeKind::ErrorHandler(_) => "error_handler",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            retry: None,
            metadata: HashMap::new(),
        }
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Start)
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::End)
    }

    pub fn agent(id: impl Into<String>, config: AgentNodeConfig) -> Self {
        Self::new(id, NodeKind::Agent(config))
    }

    pub fn condition(
        id: impl Into<String>,
        predicate: Predicate,
        output_key: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            NodeKind::Condition(ConditionNodeConfig {
                predicate,
                output_key: output_key.into(),
            }),
        )
    }

    pub fn checkpoint(id: impl Into<String>, config: CheckpointNodeConfig) -> Self {
        Self::new(id, NodeKind::Checkpoint(config))
    }

    pub fn parallel<I, S>(id: impl Into<String>, children: I, tolerate_partial_failure: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            id,
            NodeKind::Parallel(ParallelNodeConfig {
                children: children.into_iter().map(Into::into).collect(),
                tolerate_partial_failure,
            }),
        )
    }

    pub fn error_handler(id: impl Into<String>, config: ErrorHandlerConfig) -> Self {
        Self::new(id, NodeKind::ErrorHandler(config))
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_end(&self) -> bool {
        matches!(self.kind, NodeKind::End)
    }
}

/// When an edge may be taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    Always,
    OnSuccess,
    OnFailure,
    Conditional(Predicate),
}

impl EdgeCondition {
    /// Conditional edge from an expression.
    pub fn when(expression: &str) -> Result<Self, PredicateError> {
        Predicate::parse(expression).map(EdgeCondition::Conditional)
    }

    pub fn is_satisfied(&self, succeeded: bool, vars: &HashMap<String, Value>) -> bool {
        match self {
            EdgeCondition::Always => true,
            EdgeCondition::OnSuccess => succeeded,
            EdgeCondition::OnFailure => !succeeded,
            EdgeCondition::Conditional(predicate) => predicate.evaluate(vars),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: EdgeCondition,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, condition: EdgeCondition) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition,
        }
    }
}

/// A graph as supplied by a configuration loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowDefinition {
    pub fn build(self) -> OrchestrationResult<WorkflowGraph> {
        WorkflowGraph::new(self.name, self.nodes, self.edges)
    }
}

/// A validated, immutable workflow graph.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowGraph {
    name: String,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    start: String,
}

impl WorkflowGraph {
    /// Validate and build. Fails on duplicate or empty ids, a missing or
    /// repeated START, dangling references, and cycles with no way out.
    pub fn new(name: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> OrchestrationResult<Self> {
        let name = name.into();
        let invalid = |msg: String| Err(OrchestrationError::InvalidGraph(format!("{}: {}", name, msg)));

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                return invalid("node id must not be empty".to_string());
            }
            if index.insert(node.id.clone(), i).is_some() {
                return invalid(format!("duplicate node id '{}'", node.id));
            }
        }

        let starts: Vec<&Node> = nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Start))
            .collect();
        let start = match starts.as_slice() {
            [only] => only.id.clone(),
            [] => return invalid("no START node".to_string()),
            _ => return invalid(format!("{} START nodes, expected one", starts.len())),
        };

        for edge in &edges {
            for end in [&edge.from, &edge.to] {
                if !index.contains_key(end) {
                    return invalid(format!(
                        "edge {} -> {} references unknown node '{}'",
                        edge.from, edge.to, end
                    ));
                }
            }
            if edge.to == start {
                return invalid(format!("edge {} -> {} enters the START node", edge.from, edge.to));
            }
        }

        for node in &nodes {
            match &node.kind {
                NodeKind::Agent(cfg) if cfg.agent_id.trim().is_empty() => {
                    return invalid(format!("agent node '{}' has no agent_id", node.id));
                }
                NodeKind::Condition(cfg) if cfg.output_key.trim().is_empty() => {
                    return invalid(format!("condition node '{}' has no output_key", node.id));
                }
                NodeKind::Parallel(cfg) => {
                    if cfg.children.is_empty() {
                        return invalid(format!("parallel node '{}' has no children", node.id));
                    }
                    for child in &cfg.children {
                        if !index.contains_key(child) || *child == start || *child == node.id {
                            return invalid(format!(
                                "parallel node '{}' has invalid child '{}'",
                                node.id, child
                            ));
                        }
                    }
                }
                NodeKind::ErrorHandler(cfg) => {
                    if let Some(fallback) = &cfg.fallback_node
                        && !index.contains_key(fallback)
                    {
                        return invalid(format!(
                            "error handler '{}' falls back to unknown node '{}'",
                            node.id, fallback
                        ));
                    }
                }
                _ => {}
            }
        }

        let graph = Self {
            name,
            nodes,
            index,
            edges,
            start,
        };
        if let Some(trapped) = graph.find_trapped_node() {
            return Err(OrchestrationError::InvalidGraph(format!(
                "{}: node '{}' is on a cycle with no terminal",
                graph.name, trapped
            )));
        }
        Ok(graph)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_node(&self) -> &str {
        &self.start
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Outgoing edges in declaration order.
    pub fn outgoing<'a>(&'a self, node_id: &str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// First outgoing edge whose condition holds.
    pub fn next_node(&self, node_id: &str, succeeded: bool, vars: &HashMap<String, Value>) -> Option<&str> {
        self.outgoing(node_id)
            .find(|e| e.condition.is_satisfied(succeeded, vars))
            .map(|e| e.to.as_str())
    }

    /// Back to a plain definition, e.g. for persistence.
    pub fn to_definition(&self) -> WorkflowDefinition {
        WorkflowDefinition {
            name: self.name.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Whether traversal can stop at this node: END, a node without exits,
    /// or one whose exits are all conditional on its outcome or variables.
    fn can_stop_at(&self, node: &Node) -> bool {
        if node.is_end() {
            return true;
        }
        let mut on_success = false;
        let mut on_failure = false;
        for edge in self.outgoing(&node.id) {
            match edge.condition {
                EdgeCondition::Always => return false,
                EdgeCondition::OnSuccess => on_success = true,
                EdgeCondition::OnFailure => on_failure = true,
                EdgeCondition::Conditional(_) => {}
            }
        }
        !(on_success && on_failure)
    }

    /// Nodes a traversal may move to from `node`, including PARALLEL
    /// children and error-handler fallbacks.
    fn successors<'a>(&'a self, node: &'a Node) -> Vec<&'a str> {
        let mut next: Vec<&str> = self.outgoing(&node.id).map(|e| e.to.as_str()).collect();
        match &node.kind {
            NodeKind::Parallel(cfg) => next.extend(cfg.children.iter().map(String::as_str)),
            NodeKind::ErrorHandler(cfg) => next.extend(cfg.fallback_node.as_deref()),
            _ => {}
        }
        next
    }

    /// A node reachable from START from which no stopping point is
    /// reachable.
    fn find_trapped_node(&self) -> Option<String> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([self.start.as_str()]);
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(node) = self.node(id) {
                queue.extend(self.successors(node));
            }
        }

        let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.nodes {
            for next in self.successors(node) {
                predecessors.entry(next).or_default().push(&node.id);
            }
        }

        let mut can_finish: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .filter(|n| self.can_stop_at(n))
            .map(|n| n.id.as_str())
            .collect();
        while let Some(id) = queue.pop_front() {
            if !can_finish.insert(id) {
                continue;
            }
            if let Some(preds) = predecessors.get(id) {
                queue.extend(preds.iter().copied());
            }
        }

        self.nodes
            .iter()
            .find(|n| reachable.contains(n.id.as_str()) && !can_finish.contains(n.id.as_str()))
            .map(|n| n.id.clone())
    }
}

/// Fluent construction of a [`WorkflowGraph`].
///
/// ```rust
/// use conductor_orchestration::workflow::{AgentNodeConfig, Node, WorkflowBuilder};
///
/// let graph = WorkflowBuilder::new("summarise")
///     .node(Node::start("start"))
///     .node(Node::agent("summary", AgentNodeConfig::new("writer").output_key("summary")))
///     .node(Node::end("end"))
///     .always("start", "summary")
///     .on_success("summary", "end")
///     .build()
///     .unwrap();
/// assert_eq!(graph.start_node(), "start");
/// ```
#[derive(Debug, Clone, Default)]
pub struct WorkflowBuilder {
    name: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>, condition: EdgeCondition) -> Self {
        self.edges.push(Edge::new(from, to, condition));
        self
    }

    pub fn always(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edge(from, to, EdgeCondition::Always)
    }

    pub fn on_success(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edge(from, to, EdgeCondition::OnSuccess)
    }

    pub fn on_failure(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edge(from, to, EdgeCondition::OnFailure)
    }

    pub fn when(self, from: impl Into<String>, to: impl Into<String>, predicate: Predicate) -> Self {
        self.edge(from, to, EdgeCondition::Conditional(predicate))
    }

    pub fn build(self) -> OrchestrationResult<WorkflowGraph> {
        WorkflowGraph::new(self.name, self.nodes, self.edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> WorkflowBuilder {
        WorkflowBuilder::new("wf")
            .node(Node::start("start"))
            .node(Node::agent("a", AgentNodeConfig::new("agent")))
            .node(Node::end("end"))
            .always("start", "a")
            .on_success("a", "end")
    }

    fn message(result: OrchestrationResult<WorkflowGraph>) -> String {
        match result {
            Err(OrchestrationError::InvalidGraph(msg)) => msg,
            other => panic!("expected InvalidGraph, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_graph() {
        let graph = linear().build().unwrap();
        assert_eq!(graph.name(), "wf");
        assert_eq!(graph.next_node("start", true, &HashMap::new()), Some("a"));
        assert_eq!(graph.next_node("a", false, &HashMap::new()), None);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let msg = message(linear().node(Node::end("end")).build());
        assert!(msg.contains("duplicate node id 'end'"));
    }

    #[test]
    fn test_start_count_enforced() {
        let msg = message(linear().node(Node::start("start2")).build());
        assert!(msg.contains("START nodes"));

        let msg = message(
            WorkflowBuilder::new("wf")
                .node(Node::end("end"))
                .build(),
        );
        assert!(msg.contains("no START node"));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let msg = message(linear().always("a", "nowhere").build());
        assert!(msg.contains("unknown node 'nowhere'"));
    }

    #[test]
    fn test_cycle_without_exit_rejected() {
        let msg = message(
            WorkflowBuilder::new("loop")
                .node(Node::start("start"))
                .node(Node::agent("a", AgentNodeConfig::new("x")))
                .node(Node::agent("b", AgentNodeConfig::new("y")))
                .always("start", "a")
                .always("a", "b")
                .always("b", "a")
                .build(),
        );
        assert!(msg.contains("cycle with no terminal"));
    }

    #[test]
    fn test_retry_loop_with_exit_accepted() {
        WorkflowBuilder::new("retry")
            .node(Node::start("start"))
            .node(Node::agent("a", AgentNodeConfig::new("x")))
            .node(Node::end("end"))
            .always("start", "a")
            .on_success("a", "end")
            .on_failure("a", "a")
            .build()
            .unwrap();
    }

    #[test]
    fn test_parallel_children_validated() {
        let msg = message(
            linear()
                .node(Node::parallel("fan", ["a", "ghost"], false))
                .build(),
        );
        assert!(msg.contains("invalid child 'ghost'"));
    }

    #[test]
    fn test_definition_from_json() {
        let definition: WorkflowDefinition = serde_json::from_str(
            r#"{
                "name": "wf",
                "nodes": [
                    {"id": "start", "type": "start"},
                    {"id": "research", "type": "agent", "agent_id": "researcher", "output_key": "research_data",
                     "retry": {"max_retries": 2}},
                    {"id": "gate", "type": "checkpoint", "manual_approval": true},
                    {"id": "end", "type": "end"}
                ],
                "edges": [
                    {"from": "start", "to": "research", "condition": "always"},
                    {"from": "research", "to": "gate", "condition": "on_success"},
                    {"from": "gate", "to": "end", "condition": {"conditional": {"kind": "truthy", "path": "research_data"}}}
                ]
            }"#,
        )
        .unwrap();

        let graph = definition.build().unwrap();
        match &graph.node("research").unwrap().kind {
            NodeKind::Agent(cfg) => {
                assert_eq!(cfg.input_template, "{input}");
                assert_eq!(cfg.output_key.as_deref(), Some("research_data"));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(graph.node("research").unwrap().retry.as_ref().unwrap().max_retries, 2);
        assert_eq!(graph.to_definition().build().unwrap(), graph);
    }
}
