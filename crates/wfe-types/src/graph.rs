use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    ToolCall,
    LlmReason,
    Approval,
    Branch,
    Wait,
    Merge,
    Finalize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePolicy {
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePayment {
    #[serde(default)]
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_atomic: Option<u128>,
}

/// A single node in a run's graph: a discriminated sum over `node_type`;
/// type-specific fields are optional at this layer and enforced by
/// `Graph::validate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub node_type: NodeType,
    pub label: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub policy: NodePolicy,

    // tool_call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_template: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<NodePayment>,

    // llm_reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    // finalize
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_template: Option<String>,

    // branch — a dotted path into the merged step inputs (e.g.
    // "classify.category"); its resolved value is matched against outgoing
    // `conditional` edges' `condition` by `RunLifecycle` (see DESIGN.md).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_expr: Option<String>,

    // wait (external async target, §4.6 stub contract)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Success,
    Failure,
    Conditional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub entry_node_id: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),
    #[error("edge endpoint does not exist: {0}")]
    MissingEndpoint(String),
    #[error("self-loop on node: {0}")]
    SelfLoop(String),
    #[error("entry node has an incoming success edge: {0}")]
    EntryHasIncomingSuccess(String),
    #[error("entry node does not exist: {0}")]
    MissingEntryNode(String),
    #[error("graph contains a cycle")]
    Cycle,
    #[error("tool_call node {0} is missing toolId")]
    ToolCallMissingToolId(String),
}

impl Graph {
    /// Validates the graph's structural invariants: unique node ids,
    /// existing edge endpoints, no self-loops, acyclic, entry node has no
    /// incoming success edge, every `tool_call` carries a `toolId`.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNodeId(node.id.clone()));
            }
        }
        if !seen.contains(self.entry_node_id.as_str()) {
            return Err(GraphError::MissingEntryNode(self.entry_node_id.clone()));
        }
        for edge in &self.edges {
            if edge.from == edge.to {
                return Err(GraphError::SelfLoop(edge.from.clone()));
            }
            if !seen.contains(edge.from.as_str()) {
                return Err(GraphError::MissingEndpoint(edge.from.clone()));
            }
            if !seen.contains(edge.to.as_str()) {
                return Err(GraphError::MissingEndpoint(edge.to.clone()));
            }
            if matches!(edge.edge_type, EdgeType::Success | EdgeType::Conditional)
                && edge.to == self.entry_node_id
            {
                return Err(GraphError::EntryHasIncomingSuccess(
                    self.entry_node_id.clone(),
                ));
            }
        }
        for node in &self.nodes {
            if node.node_type == NodeType::ToolCall && node.tool_id.is_none() {
                return Err(GraphError::ToolCallMissingToolId(node.id.clone()));
            }
        }
        if self.has_cycle() {
            return Err(GraphError::Cycle);
        }
        Ok(())
    }

    fn has_cycle(&self) -> bool {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Temp,
            Done,
        }
        let adjacency = self.success_and_explicit_adjacency();
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            node: &'a str,
            adjacency: &HashMap<&'a str, Vec<&'a str>>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> bool {
            match marks.get(node) {
                Some(Mark::Done) => return false,
                Some(Mark::Temp) => return true,
                None => {}
            }
            marks.insert(node, Mark::Temp);
            if let Some(children) = adjacency.get(node) {
                for &child in children {
                    if visit(child, adjacency, marks) {
                        return true;
                    }
                }
            }
            marks.insert(node, Mark::Done);
            false
        }

        for node in &self.nodes {
            if visit(node.id.as_str(), &adjacency, &mut marks) {
                return true;
            }
        }
        false
    }

    /// Adjacency built from success/conditional edges plus explicit
    /// `dependsOn` (reversed: a node's dependency is drawn as dependency ->
    /// node).
    fn success_and_explicit_adjacency(&self) -> HashMap<&str, Vec<&str>> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            if matches!(edge.edge_type, EdgeType::Success | EdgeType::Conditional) {
                adjacency.entry(&edge.from).or_default().push(&edge.to);
            }
        }
        for node in &self.nodes {
            for dep in &node.depends_on {
                adjacency
                    .entry(dep.as_str())
                    .or_default()
                    .push(node.id.as_str());
            }
        }
        adjacency
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All dependency node ids for `node_id`: incoming success or
    /// conditional edges union explicit `dependsOn`. Conditional edges count
    /// as dependencies so a branch target stays `blocked` until the branch
    /// step resolves, same as an ordinary predecessor.
    pub fn dependencies_of(&self, node_id: &str) -> HashSet<String> {
        let mut deps: HashSet<String> = self
            .edges
            .iter()
            .filter(|e| {
                matches!(e.edge_type, EdgeType::Success | EdgeType::Conditional) && e.to == node_id
            })
            .map(|e| e.from.clone())
            .collect();
        if let Some(node) = self.node(node_id) {
            deps.extend(node.depends_on.iter().cloned());
        }
        deps
    }

    /// The `Conditional` edge from `from` to `to`, if the graph has one.
    /// Used to resolve whether a branch's chosen value reaches `to`.
    pub fn conditional_edge(&self, from: &str, to: &str) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| e.edge_type == EdgeType::Conditional && e.from == from && e.to == to)
    }

    /// All node ids with a success or conditional edge from `node_id`, union
    /// of nodes whose `dependsOn` contains `node_id`.
    pub fn dependents_of(&self, node_id: &str) -> HashSet<String> {
        let mut out: HashSet<String> = self
            .edges
            .iter()
            .filter(|e| {
                matches!(e.edge_type, EdgeType::Success | EdgeType::Conditional) && e.from == node_id
            })
            .map(|e| e.to.clone())
            .collect();
        for node in &self.nodes {
            if node.depends_on.iter().any(|d| d == node_id) {
                out.insert(node.id.clone());
            }
        }
        out
    }

    /// True when a node has no dependencies and is not the entry node target
    /// of a success edge — i.e. it is ready to run at materialize time.
    pub fn is_initially_ready(&self, node_id: &str) -> bool {
        node_id == self.entry_node_id || self.dependencies_of(node_id).is_empty()
    }

    /// A topological ordering of node ids, used by validation and by tests
    /// that assert readiness. Panics never — callers must validate first.
    pub fn topo_order(&self) -> Vec<String> {
        let adjacency = self.success_and_explicit_adjacency();
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for children in adjacency.values() {
            for child in children {
                *in_degree.entry(child).or_insert(0) += 1;
            }
        }
        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();
        queue.sort();
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::from(queue);
        while let Some(n) = queue.pop_front() {
            order.push(n.to_string());
            if let Some(children) = adjacency.get(n) {
                let mut next_ready = Vec::new();
                for &child in children {
                    let entry = in_degree.get_mut(child).unwrap();
                    *entry -= 1;
                    if *entry == 0 {
                        next_ready.push(child);
                    }
                }
                next_ready.sort();
                for c in next_ready {
                    queue.push_back(c);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, depends_on: &[&str]) -> Node {
        Node {
            id: id.to_string(),
            node_type: NodeType::Finalize,
            label: id.to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            policy: NodePolicy::default(),
            tool_id: None,
            endpoint: None,
            request_template: None,
            payment: None,
            system_prompt: None,
            user_prompt_template: None,
            output_format: None,
            output_template: None,
            branch_expr: None,
            status_url: None,
            completion_field: None,
            completion_value: None,
        }
    }

    #[test]
    fn rejects_cycle() {
        let graph = Graph {
            nodes: vec![node("a", &["b"]), node("b", &["a"])],
            edges: vec![],
            entry_node_id: "a".to_string(),
        };
        assert_eq!(graph.validate(), Err(GraphError::Cycle));
    }

    #[test]
    fn accepts_linear_dag() {
        let graph = Graph {
            nodes: vec![node("a", &[]), node("b", &["a"])],
            edges: vec![Edge {
                from: "a".to_string(),
                to: "b".to_string(),
                edge_type: EdgeType::Success,
                condition: None,
            }],
            entry_node_id: "a".to_string(),
        };
        assert!(graph.validate().is_ok());
        assert!(graph.is_initially_ready("a"));
        assert!(!graph.is_initially_ready("b"));
        assert_eq!(graph.topo_order(), vec!["a", "b"]);
    }

    #[test]
    fn rejects_incoming_success_edge_into_entry() {
        let graph = Graph {
            nodes: vec![node("a", &[]), node("b", &[])],
            edges: vec![Edge {
                from: "b".to_string(),
                to: "a".to_string(),
                edge_type: EdgeType::Success,
                condition: None,
            }],
            entry_node_id: "a".to_string(),
        };
        assert_eq!(
            graph.validate(),
            Err(GraphError::EntryHasIncomingSuccess("a".to_string()))
        );
    }

    /// Builds a graph over `n` nodes named `n0..n{n-1}` where every edge in
    /// `forward_edges` goes from a lower index to a higher one, plus an
    /// optional single back-edge from a higher index to a lower one.
    fn graph_from_indices(n: usize, forward_edges: &[(usize, usize)], back_edge: Option<(usize, usize)>) -> Graph {
        let ids: Vec<String> = (0..n).map(|i| format!("n{i}")).collect();
        let mut edges: Vec<Edge> = forward_edges
            .iter()
            .filter(|&&(from, to)| from < to)
            .map(|&(from, to)| Edge {
                from: ids[from].clone(),
                to: ids[to].clone(),
                edge_type: EdgeType::Success,
                condition: None,
            })
            .collect();
        if let Some((from, to)) = back_edge {
            edges.push(Edge {
                from: ids[from].clone(),
                to: ids[to].clone(),
                edge_type: EdgeType::Success,
                condition: None,
            });
        }
        Graph {
            nodes: ids.iter().map(|id| node(id, &[])).collect(),
            edges,
            entry_node_id: ids[0].clone(),
        }
    }

    proptest::proptest! {
        /// Any graph whose success edges all point from a lower node index
        /// to a higher one is acyclic — a forward-only DAG can never close
        /// a loop no matter which subset of forward edges is present.
        #[test]
        fn forward_only_edges_are_always_acyclic(
            n in 2usize..12,
            raw_pairs in proptest::collection::vec((0usize..12, 0usize..12), 0..20),
        ) {
            let forward_edges: Vec<(usize, usize)> = raw_pairs
                .into_iter()
                .filter(|&(a, b)| a < n && b < n && a != b)
                .collect();
            let graph = graph_from_indices(n, &forward_edges, None);
            proptest::prop_assert!(!graph.has_cycle());
        }

        /// Adding a single back-edge on top of an otherwise forward-only
        /// graph always introduces a cycle (the back-edge plus the forward
        /// path it closes over).
        #[test]
        fn a_single_back_edge_always_creates_a_cycle(n in 2usize..10) {
            let chain: Vec<(usize, usize)> = (0..n - 1).map(|i| (i, i + 1)).collect();
            let graph = graph_from_indices(n, &chain, Some((n - 1, 0)));
            proptest::prop_assert!(graph.has_cycle());
        }
    }
}
