//! Pipeline domain model.
//!
//! A pipeline is a validated DAG of heterogeneous nodes. Topology rules
//! are enforced at creation time so the engine can assume a well-formed
//! graph: a single trigger root, full reachability, two labeled edges per
//! condition, and a single join per parallel fan-out.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::PipelineError;

/// Kind of work a node performs. Config is opaque per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point; succeeds immediately with the run's input payload.
    Trigger,
    /// Calls the Worker with a configured prompt.
    Agent,
    /// Evaluates a predicate and takes the true or false edge.
    Condition,
    /// Invokes a named side effect from the action registry.
    Action,
    /// Fans out to all successors simultaneously.
    Parallel,
    /// Succeeds after a configured duration.
    Delay,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Agent => "agent",
            Self::Condition => "condition",
            Self::Action => "action",
            Self::Parallel => "parallel",
            Self::Delay => "delay",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trigger" => Some(Self::Trigger),
            "agent" => Some(Self::Agent),
            "condition" => Some(Self::Condition),
            "action" => Some(Self::Action),
            "parallel" => Some(Self::Parallel),
            "delay" => Some(Self::Delay),
            _ => None,
        }
    }
}

/// One unit of pipeline work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Stable id, unique within the pipeline.
    pub id: String,
    pub kind: NodeKind,
    /// Per-kind configuration, opaque to the topology layer.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Branch label on a condition's outgoing edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchLabel {
    True,
    False,
}

impl BranchLabel {
    pub fn as_bool(&self) -> bool {
        matches!(self, Self::True)
    }
}

/// Directed edge between nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_node: String,
    pub to_node: String,
    /// Set only on edges leaving a condition node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchLabel>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_node: from.into(),
            to_node: to.into(),
            branch: None,
        }
    }

    pub fn branched(from: impl Into<String>, to: impl Into<String>, branch: BranchLabel) -> Self {
        Self {
            from_node: from.into(),
            to_node: to.into(),
            branch: Some(branch),
        }
    }
}

/// Lifecycle status of a pipeline definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Active,
    Paused,
    Draft,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Draft => "draft",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "draft" => Some(Self::Draft),
            _ => None,
        }
    }
}

/// Aggregate run counters, updated on terminal run transitions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineCounters {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub avg_duration_ms: f64,
}

impl PipelineCounters {
    /// Fold one terminal run into the counters.
    pub fn record_run(&mut self, succeeded: bool, duration_ms: u64) {
        let n = self.total_runs as f64;
        self.avg_duration_ms = (self.avg_duration_ms * n + duration_ms as f64) / (n + 1.0);
        self.total_runs += 1;
        if succeeded {
            self.successful_runs += 1;
        }
    }
}

/// A validated DAG of nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub status: PipelineStatus,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Wall-clock budget for one run.
    pub timeout_seconds: u64,
    pub counters: PipelineCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: PipelineStatus::Draft,
            nodes,
            edges,
            timeout_seconds: 3600,
            counters: PipelineCounters::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.from_node == id)
    }

    /// Incoming edges of a node.
    pub fn edges_to<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.to_node == id)
    }

    /// The single trigger node. Only meaningful after `validate`.
    pub fn trigger(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.kind == NodeKind::Trigger)
    }

    /// Enforce every topology invariant. Called at create/update time;
    /// the engine assumes a validated graph.
    pub fn validate(&self) -> Result<(), PipelineError> {
        // Edges must reference declared nodes.
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &self.edges {
            if !ids.contains(edge.from_node.as_str()) {
                return Err(PipelineError::UnknownNode(edge.from_node.clone()));
            }
            if !ids.contains(edge.to_node.as_str()) {
                return Err(PipelineError::UnknownNode(edge.to_node.clone()));
            }
        }

        // Exactly one in-degree-0 node, and it must be the trigger.
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            *in_degree.get_mut(edge.to_node.as_str()).unwrap() += 1;
        }
        let roots: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| in_degree[n.id.as_str()] == 0)
            .collect();
        let trigger_roots = roots
            .iter()
            .filter(|n| n.kind == NodeKind::Trigger)
            .count();
        if roots.len() != 1 || trigger_roots != 1 {
            return Err(PipelineError::BadTriggerCount(trigger_roots));
        }
        let trigger_id = roots[0].id.clone();

        // Kahn's algorithm: all nodes drain iff the graph is acyclic.
        let mut degrees = in_degree.clone();
        let mut queue: VecDeque<&str> = VecDeque::from([trigger_id.as_str()]);
        let mut drained = 0usize;
        while let Some(id) = queue.pop_front() {
            drained += 1;
            for edge in self.edges_from(id) {
                let d = degrees.get_mut(edge.to_node.as_str()).unwrap();
                *d -= 1;
                if *d == 0 {
                    queue.push_back(edge.to_node.as_str());
                }
            }
        }
        if drained != self.nodes.len() {
            return Err(PipelineError::CyclicGraph);
        }

        // Every non-trigger node reachable from the trigger.
        let mut seen: HashSet<&str> = HashSet::from([trigger_id.as_str()]);
        let mut stack = vec![trigger_id.as_str()];
        while let Some(id) = stack.pop() {
            for edge in self.edges_from(id) {
                if seen.insert(edge.to_node.as_str()) {
                    stack.push(edge.to_node.as_str());
                }
            }
        }
        for node in &self.nodes {
            if !seen.contains(node.id.as_str()) {
                return Err(PipelineError::UnreachableNode(node.id.clone()));
            }
        }

        // Condition nodes: exactly two edges, labeled true and false.
        for node in self.nodes.iter().filter(|n| n.kind == NodeKind::Condition) {
            let out: Vec<&Edge> = self.edges_from(&node.id).collect();
            let has_true = out
                .iter()
                .any(|e| e.branch == Some(BranchLabel::True));
            let has_false = out
                .iter()
                .any(|e| e.branch == Some(BranchLabel::False));
            if out.len() != 2 || !has_true || !has_false {
                return Err(PipelineError::BadConditionEdges {
                    node: node.id.clone(),
                });
            }
        }

        // Parallel nodes: every branch must fan back into a single join.
        for node in self.nodes.iter().filter(|n| n.kind == NodeKind::Parallel) {
            let branches: Vec<&str> = self
                .edges_from(&node.id)
                .map(|e| e.to_node.as_str())
                .collect();
            if branches.len() < 2 {
                return Err(PipelineError::BadParallelJoin {
                    node: node.id.clone(),
                });
            }
            let mut joins: Option<HashSet<&str>> = None;
            for branch in &branches {
                let targets: HashSet<&str> = self
                    .edges_from(branch)
                    .map(|e| e.to_node.as_str())
                    .collect();
                joins = Some(match joins {
                    None => targets,
                    Some(acc) => acc.intersection(&targets).copied().collect(),
                });
            }
            let join_count = joins.map(|j| j.len()).unwrap_or(0);
            if join_count != 1 {
                return Err(PipelineError::BadParallelJoin {
                    node: node.id.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Per-node execution state inside one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Skipped counts as satisfied for successor readiness.
    pub fn satisfies_successor(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

/// Status of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Timeout,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

/// One execution of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub status: RunStatus,
    /// node id -> state.
    pub node_states: HashMap<String, NodeState>,
    /// Append-only map of node id -> output, readable by later nodes.
    pub context: serde_json::Map<String, serde_json::Value>,
    pub trigger_payload: serde_json::Value,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(pipeline: &Pipeline, trigger_payload: serde_json::Value) -> Self {
        let node_states = pipeline
            .nodes
            .iter()
            .map(|n| (n.id.clone(), NodeState::Pending))
            .collect();
        Self {
            id: Uuid::new_v4(),
            pipeline_id: pipeline.id,
            status: RunStatus::Pending,
            node_states,
            context: serde_json::Map::new(),
            trigger_payload,
            error: None,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some(f.signed_duration_since(s).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_pipeline() -> Pipeline {
        Pipeline::new(
            "linear",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("work", NodeKind::Agent),
                Node::new("done", NodeKind::Action),
            ],
            vec![Edge::new("start", "work"), Edge::new("work", "done")],
        )
    }

    #[test]
    fn test_valid_linear_pipeline() {
        assert!(linear_pipeline().validate().is_ok());
    }

    #[test]
    fn test_cycle_rejected() {
        let p = Pipeline::new(
            "cyclic",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("a", NodeKind::Agent),
                Node::new("b", NodeKind::Agent),
            ],
            vec![
                Edge::new("start", "a"),
                Edge::new("a", "b"),
                Edge::new("b", "a"),
            ],
        );
        assert_eq!(p.validate(), Err(PipelineError::CyclicGraph));
    }

    #[test]
    fn test_missing_trigger_rejected() {
        let p = Pipeline::new(
            "no-trigger",
            vec![Node::new("a", NodeKind::Agent), Node::new("b", NodeKind::Agent)],
            vec![Edge::new("a", "b")],
        );
        assert!(matches!(p.validate(), Err(PipelineError::BadTriggerCount(_))));
    }

    #[test]
    fn test_two_roots_rejected() {
        let p = Pipeline::new(
            "two-roots",
            vec![
                Node::new("t1", NodeKind::Trigger),
                Node::new("t2", NodeKind::Trigger),
                Node::new("a", NodeKind::Agent),
            ],
            vec![Edge::new("t1", "a"), Edge::new("t2", "a")],
        );
        assert!(matches!(p.validate(), Err(PipelineError::BadTriggerCount(_))));
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let p = Pipeline::new(
            "island",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("a", NodeKind::Agent),
                Node::new("island", NodeKind::Agent),
                Node::new("island2", NodeKind::Agent),
            ],
            vec![
                Edge::new("start", "a"),
                Edge::new("island", "island2"),
                Edge::new("island2", "island"),
            ],
        );
        // The island forms a cycle, caught first by the DAG check.
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_condition_needs_two_labeled_edges() {
        let p = Pipeline::new(
            "one-edge",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("check", NodeKind::Condition),
                Node::new("yes", NodeKind::Agent),
            ],
            vec![
                Edge::new("start", "check"),
                Edge::branched("check", "yes", BranchLabel::True),
            ],
        );
        assert!(matches!(
            p.validate(),
            Err(PipelineError::BadConditionEdges { .. })
        ));
    }

    #[test]
    fn test_parallel_needs_single_join() {
        // Branches that never converge.
        let p = Pipeline::new(
            "no-join",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("fan", NodeKind::Parallel),
                Node::new("x", NodeKind::Agent),
                Node::new("y", NodeKind::Agent),
                Node::new("x_end", NodeKind::Action),
                Node::new("y_end", NodeKind::Action),
            ],
            vec![
                Edge::new("start", "fan"),
                Edge::new("fan", "x"),
                Edge::new("fan", "y"),
                Edge::new("x", "x_end"),
                Edge::new("y", "y_end"),
            ],
        );
        assert!(matches!(
            p.validate(),
            Err(PipelineError::BadParallelJoin { .. })
        ));

        // Converging branches validate.
        let p = Pipeline::new(
            "join",
            vec![
                Node::new("start", NodeKind::Trigger),
                Node::new("fan", NodeKind::Parallel),
                Node::new("x", NodeKind::Agent),
                Node::new("y", NodeKind::Agent),
                Node::new("join", NodeKind::Action),
            ],
            vec![
                Edge::new("start", "fan"),
                Edge::new("fan", "x"),
                Edge::new("fan", "y"),
                Edge::new("x", "join"),
                Edge::new("y", "join"),
            ],
        );
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_edge_to_unknown_node_rejected() {
        let p = Pipeline::new(
            "dangling",
            vec![Node::new("start", NodeKind::Trigger)],
            vec![Edge::new("start", "ghost")],
        );
        assert_eq!(p.validate(), Err(PipelineError::UnknownNode("ghost".into())));
    }

    #[test]
    fn test_run_initializes_all_nodes_pending() {
        let p = linear_pipeline();
        let run = PipelineRun::new(&p, serde_json::json!({"input": 1}));
        assert_eq!(run.node_states.len(), 3);
        assert!(run
            .node_states
            .values()
            .all(|s| *s == NodeState::Pending));
        assert_eq!(run.status, RunStatus::Pending);
    }

    #[test]
    fn test_counters_fold() {
        let mut c = PipelineCounters::default();
        c.record_run(true, 100);
        c.record_run(false, 300);
        assert_eq!(c.total_runs, 2);
        assert_eq!(c.successful_runs, 1);
        assert!((c.avg_duration_ms - 200.0).abs() < 1e-9);
    }
}
