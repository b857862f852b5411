use crate::{ActorId, EngineError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Version tag of the graph serialization format
pub const GRAPH_FORMAT_VERSION: &str = "1.0";

/// Value object: Workflow definition ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value object: Node ID, unique within a definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-type node parameters
///
/// The node type and its configuration travel together on the wire as the
/// `node_type` / `config` pair, so malformed configuration for a given
/// type is rejected at deserialization time instead of inside a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", content = "config", rename_all = "lowercase")]
pub enum NodeConfig {
    /// Entry point of the graph
    Start {},

    /// Waits for a decision from the configured approver
    Approval {
        /// Actor expected to approve or reject
        approver_id: ActorId,
    },

    /// Records an assignment to the configured assignee
    Assign {
        /// Actor the task is assigned to
        assignee_id: ActorId,
    },

    /// Sends a message to each recipient via the notification collaborator
    Notify {
        /// Actors to notify
        recipients: Vec<ActorId>,
        /// Message template
        #[serde(default)]
        message: String,
    },

    /// Pure branching point; edge conditions select the successor
    Condition {},

    /// Terminal node
    End {},
}

impl NodeConfig {
    /// Wire name of the node type
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeConfig::Start {} => "start",
            NodeConfig::Approval { .. } => "approval",
            NodeConfig::Assign { .. } => "assign",
            NodeConfig::Notify { .. } => "notify",
            NodeConfig::Condition {} => "condition",
            NodeConfig::End {} => "end",
        }
    }

    /// Whether this node type is terminal
    #[inline]
    pub fn is_end(&self) -> bool {
        matches!(self, NodeConfig::End {})
    }

    /// Whether execution suspends at this node awaiting an external decision
    #[inline]
    pub fn is_suspending(&self) -> bool {
        matches!(self, NodeConfig::Approval { .. })
    }
}

/// A directed, optionally conditional edge to a candidate next node
///
/// Edges are evaluated in list order; the first edge whose condition is
/// absent or evaluates true wins. At most one edge may carry no condition
/// and it must be last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    /// Target node
    pub node_id: NodeId,

    /// Boolean expression over instance data; `None` is the default edge
    pub condition: Option<String>,
}

/// A typed step in a definition graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// ID of the node, unique within the definition
    pub node_id: NodeId,

    /// Node type and its type-specific configuration
    #[serde(flatten)]
    pub config: NodeConfig,

    /// Ordered outgoing edges
    #[serde(default)]
    pub next_nodes: Vec<EdgeDefinition>,
}

impl NodeDefinition {
    /// Create a node with no outgoing edges
    pub fn new(node_id: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            node_id: NodeId(node_id.into()),
            config,
            next_nodes: Vec::new(),
        }
    }

    /// Append an outgoing edge
    pub fn with_edge(mut self, target: impl Into<String>, condition: Option<&str>) -> Self {
        self.next_nodes.push(EdgeDefinition {
            node_id: NodeId(target.into()),
            condition: condition.map(str::to_string),
        });
        self
    }
}

/// Canonical serialized form of a definition's graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Format version of the serialization, currently "1.0"
    pub version: String,

    /// Nodes of the graph
    pub nodes: Vec<NodeDefinition>,
}

impl WorkflowGraph {
    /// Build a graph in the current serialization format
    pub fn new(nodes: Vec<NodeDefinition>) -> Self {
        Self {
            version: GRAPH_FORMAT_VERSION.to_string(),
            nodes,
        }
    }

    /// Look up a node by id
    pub fn node(&self, id: &NodeId) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| &n.node_id == id)
    }

    /// The unique start node; validation guarantees exactly one exists
    pub fn start_node(&self) -> Option<&NodeDefinition> {
        self.nodes
            .iter()
            .find(|n| matches!(n.config, NodeConfig::Start {}))
    }

    /// Validate the graph, collecting every violated invariant
    ///
    /// Unlike fail-fast validation this reports all problems at once so a
    /// definition author can fix a malformed graph in one round trip.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut violations = Vec::new();

        if self.nodes.is_empty() {
            violations.push("definition must have at least one node".to_string());
            return Err(EngineError::ValidationFailed(violations));
        }

        // Unique node ids
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.node_id.0.as_str()) {
                violations.push(format!("duplicate node id: '{}'", node.node_id));
            }
        }

        // Exactly one start, at least one end
        let start_count = self
            .nodes
            .iter()
            .filter(|n| matches!(n.config, NodeConfig::Start {}))
            .count();
        if start_count != 1 {
            violations.push(format!(
                "definition must have exactly one start node, found {}",
                start_count
            ));
        }
        if !self.nodes.iter().any(|n| n.config.is_end()) {
            violations.push("definition must have at least one end node".to_string());
        }

        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.node_id.0.as_str()).collect();

        for node in &self.nodes {
            // Edge targets must exist
            for edge in &node.next_nodes {
                if !ids.contains(edge.node_id.0.as_str()) {
                    violations.push(format!(
                        "node '{}' has an edge to unknown node '{}'",
                        node.node_id, edge.node_id
                    ));
                }
            }

            // At most one unconditioned edge, and it must come last
            let default_edges = node
                .next_nodes
                .iter()
                .enumerate()
                .filter(|(_, e)| e.condition.is_none())
                .collect::<Vec<_>>();
            if default_edges.len() > 1 {
                violations.push(format!(
                    "node '{}' has {} unconditioned edges, at most one is allowed",
                    node.node_id,
                    default_edges.len()
                ));
            } else if let Some((idx, _)) = default_edges.first() {
                if *idx != node.next_nodes.len() - 1 {
                    violations.push(format!(
                        "node '{}' places its unconditioned edge before conditioned ones",
                        node.node_id
                    ));
                }
            }

            if node.config.is_end() {
                if !node.next_nodes.is_empty() {
                    violations.push(format!(
                        "end node '{}' must not have outgoing edges",
                        node.node_id
                    ));
                }
            } else if node.next_nodes.is_empty() {
                violations.push(format!(
                    "node '{}' has no outgoing edges and is not an end node",
                    node.node_id
                ));
            }
        }

        // Every node must be able to reach an end node
        let reaches_end = self.nodes_reaching_end();
        for node in &self.nodes {
            if !node.config.is_end() && !reaches_end.contains(node.node_id.0.as_str()) {
                violations.push(format!(
                    "node '{}' cannot reach an end node",
                    node.node_id
                ));
            }
        }

        // A cycle with no approval gate would never suspend and therefore
        // never terminate. Cycles that pass through an approval node are
        // legal (re-submission loops).
        self.check_auto_advance_cycles(&mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ValidationFailed(violations))
        }
    }

    /// Reverse reachability from every end node
    fn nodes_reaching_end(&self) -> HashSet<&str> {
        // Build reverse adjacency
        let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.nodes {
            for edge in &node.next_nodes {
                reverse
                    .entry(edge.node_id.0.as_str())
                    .or_default()
                    .push(node.node_id.0.as_str());
            }
        }

        let mut reached = HashSet::new();
        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .filter(|n| n.config.is_end())
            .map(|n| n.node_id.0.as_str())
            .collect();

        while let Some(id) = queue.pop_front() {
            if !reached.insert(id) {
                continue;
            }
            if let Some(preds) = reverse.get(id) {
                for pred in preds {
                    if !reached.contains(pred) {
                        queue.push_back(pred);
                    }
                }
            }
        }

        reached
    }

    /// DFS for cycles over the subgraph of auto-advancing nodes
    fn check_auto_advance_cycles(&self, violations: &mut Vec<String>) {
        let auto_nodes: HashSet<&str> = self
            .nodes
            .iter()
            .filter(|n| !n.config.is_suspending())
            .map(|n| n.node_id.0.as_str())
            .collect();

        let adjacency: HashMap<&str, Vec<&str>> = self
            .nodes
            .iter()
            .filter(|n| auto_nodes.contains(n.node_id.0.as_str()))
            .map(|n| {
                let targets = n
                    .next_nodes
                    .iter()
                    .map(|e| e.node_id.0.as_str())
                    .filter(|t| auto_nodes.contains(t))
                    .collect();
                (n.node_id.0.as_str(), targets)
            })
            .collect();

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        for node in &self.nodes {
            let id = node.node_id.0.as_str();
            if auto_nodes.contains(id) && Self::is_cyclic(id, &adjacency, &mut visited, &mut rec_stack)
            {
                violations.push(format!(
                    "auto-advance cycle with no approval gate involving node '{}'",
                    id
                ));
                return;
            }
        }
    }

    fn is_cyclic<'a>(
        id: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> bool {
        if !visited.contains(id) {
            visited.insert(id);
            rec_stack.insert(id);

            if let Some(targets) = adjacency.get(id) {
                for target in targets {
                    if (!visited.contains(target)
                        && Self::is_cyclic(target, adjacency, visited, rec_stack))
                        || rec_stack.contains(target)
                    {
                        return true;
                    }
                }
            }
        }

        rec_stack.remove(id);
        false
    }
}

/// Aggregate: a versioned, immutable workflow definition
///
/// Definitions are never updated in place. "Editing" stores a new version
/// so that in-flight instances keep executing against the graph they were
/// started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier
    pub id: WorkflowId,

    /// Human-readable name
    pub name: String,

    /// Description of the business process
    pub description: Option<String>,

    /// Free-form process category, e.g. "expense_claim"
    pub category: String,

    /// Monotonically increasing version, starting at 1
    pub version: u32,

    /// The validated node graph
    pub graph: WorkflowGraph,

    /// Authoring actor
    pub created_by: ActorId,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Create version 1 of a new definition. The graph must already have
    /// passed validation; `DefinitionService` enforces this.
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        category: impl Into<String>,
        graph: WorkflowGraph,
        created_by: ActorId,
    ) -> Self {
        Self {
            id: WorkflowId(uuid::Uuid::new_v4().to_string()),
            name: name.into(),
            description,
            category: category.into(),
            version: 1,
            graph,
            created_by,
            created_at: Utc::now(),
        }
    }

    /// Derive the next version of this definition with a replacement graph
    pub fn next_version(&self, graph: WorkflowGraph, created_by: ActorId) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            version: self.version + 1,
            graph,
            created_by,
            created_at: Utc::now(),
        }
    }
}
