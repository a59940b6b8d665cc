//! Workflow model: the immutable DAG a workflow execution runs over.
//!
//! A [`Workflow`] is a set of declarative [`NodeSpec`]s plus directed
//! [`Edge`]s. It is constructed through [`WorkflowBuilder`], which
//! validates the whole structure at `build()`; after that the workflow
//! never changes.
//!
//! Validation enforces, in order: a non-empty id, at least one node,
//! unique node ids, edges whose endpoints exist, no self-loops, and an
//! acyclic graph (Kahn's algorithm doubles as the topological-order
//! computation the scheduler uses).
//!
//! # Examples
//!
//! ```rust
//! use flowloom::model::{NodeSpec, WorkflowBuilder};
//! use flowloom::types::NodeType;
//! use serde_json::json;
//!
//! let workflow = WorkflowBuilder::new("wf-demo")
//!     .name("demo")
//!     .add_node(NodeSpec::new("a", "seed", NodeType::Input).with_config_value("data", json!({"x": 1})))
//!     .add_node(NodeSpec::new("b", "double", NodeType::Script))
//!     .add_edge("a", "b")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(workflow.topo_order(), vec!["a".to_string(), "b".to_string()]);
//! ```

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use thiserror::Error;

use crate::node::{ValidationIssue, ValidationReport};
use crate::types::NodeType;
use crate::utils::collections::ValueMap;

/// Declarative description of one node: identity, kind, and the
/// kind-specific config the concrete executor is built from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub name: String,
    pub node_type: NodeType,
    /// Disabled nodes are validated and counted but never executed.
    pub enabled: bool,
    /// Kind-specific configuration, interpreted by the node factory.
    pub config: Map<String, Value>,
    /// Canvas position for visual editors; carries no semantics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64)>,
}

impl NodeSpec {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type,
            enabled: true,
            config: Map::new(),
            position: None,
        }
    }

    /// Replace the whole config map.
    #[must_use]
    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Insert a single config entry.
    #[must_use]
    pub fn with_config_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Mark the node disabled (skipped with a synthetic success).
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A directed dependency: `to` runs after `from` and only if `from`
/// succeeded.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Errors from workflow construction.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkflowError {
    /// The workflow failed structural validation; the report lists
    /// every problem found.
    #[error("invalid workflow '{workflow_id}': {summary}")]
    #[diagnostic(code(flowloom::model::invalid_workflow))]
    Invalid {
        workflow_id: String,
        summary: String,
        report: ValidationReport,
    },
}

impl WorkflowError {
    /// The full validation report behind this error.
    #[must_use]
    pub fn report(&self) -> &ValidationReport {
        match self {
            WorkflowError::Invalid { report, .. } => report,
        }
    }
}

/// An immutable, validated DAG of nodes.
///
/// Construct through [`WorkflowBuilder`]; every accessor is read-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    id: String,
    name: String,
    description: String,
    version: String,
    metadata: ValueMap,
    nodes: Vec<NodeSpec>,
    edges: Vec<Edge>,
    /// Topological order over all nodes, fixed at build time.
    topo: Vec<String>,
}

impl Workflow {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn metadata(&self) -> &ValueMap {
        &self.metadata
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The topological order computed at build time (includes disabled
    /// nodes; the scheduler records those as skipped).
    #[must_use]
    pub fn topo_order(&self) -> Vec<String> {
        self.topo.clone()
    }

    /// Direct predecessors of a node.
    #[must_use]
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Direct successors of a node.
    #[must_use]
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Re-run structural validation on the already-built workflow.
    ///
    /// Pure and idempotent: a built workflow always passes, and calling
    /// this twice performs no state change either time.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let (report, _) = validate_structure(
            &self.id,
            &self.nodes,
            &self.edges,
        );
        report
    }
}

/// Fluent builder for [`Workflow`], validating at `build()`.
#[derive(Debug, Default)]
pub struct WorkflowBuilder {
    id: String,
    name: String,
    description: String,
    version: String,
    metadata: ValueMap,
    nodes: Vec<NodeSpec>,
    edges: Vec<Edge>,
}

impl WorkflowBuilder {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: "1.0.0".into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn add_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    /// Validate the assembled structure and freeze it into a
    /// [`Workflow`].
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        let (report, topo) = validate_structure(&self.id, &self.nodes, &self.edges);
        if !report.is_valid() {
            return Err(WorkflowError::Invalid {
                workflow_id: self.id,
                summary: report.summary(),
                report,
            });
        }
        let name = if self.name.is_empty() {
            self.id.clone()
        } else {
            self.name
        };
        Ok(Workflow {
            id: self.id,
            name,
            description: self.description,
            version: self.version,
            metadata: self.metadata,
            nodes: self.nodes,
            edges: self.edges,
            topo,
        })
    }
}

/// Structural validation shared by the builder and `Workflow::validate`.
///
/// Returns the report plus the topological order (empty when the graph
/// is invalid).
fn validate_structure(
    id: &str,
    nodes: &[NodeSpec],
    edges: &[Edge],
) -> (ValidationReport, Vec<String>) {
    let mut report = ValidationReport::ok();

    if id.trim().is_empty() {
        report.error("workflow.id", "must not be empty");
    }
    if nodes.is_empty() {
        report.error("workflow.nodes", "workflow must contain at least one node");
    }

    // Unique node ids.
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for node in nodes {
        if node.id.trim().is_empty() {
            report.error("nodes[].id", "node id must not be empty");
        } else if !seen.insert(node.id.as_str()) {
            report.error(
                format!("nodes[{}]", node.id),
                "duplicate node id",
            );
        }
    }

    // Edge endpoints exist; no self-loops.
    let ids: FxHashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in edges {
        if !ids.contains(edge.from.as_str()) {
            report.error(
                format!("connections[{} -> {}].from", edge.from, edge.to),
                "references unknown node",
            );
        }
        if !ids.contains(edge.to.as_str()) {
            report.error(
                format!("connections[{} -> {}].to", edge.from, edge.to),
                "references unknown node",
            );
        }
        if edge.from == edge.to {
            report.error(
                format!("connections[{} -> {}]", edge.from, edge.to),
                "self-loops are not allowed",
            );
        }
    }

    if !report.is_valid() {
        return (report, Vec::new());
    }

    // Kahn's algorithm: topological sort doubles as cycle detection.
    let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();
    for node in nodes {
        adjacency.entry(node.id.as_str()).or_default();
        in_degree.entry(node.id.as_str()).or_insert(0);
    }
    for edge in edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
        *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
    }

    // Seed with sources in declaration order so the order is stable.
    let mut queue: VecDeque<&str> = nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(nodes.len());
    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());
        if let Some(next) = adjacency.get(node_id) {
            for &succ in next {
                let deg = in_degree.get_mut(succ).expect("successor tracked");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(succ);
                }
            }
        }
    }

    if sorted.len() != nodes.len() {
        let stuck: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, &d)| d > 0)
            .map(|(&id, _)| id)
            .collect();
        report.errors.push(ValidationIssue::new(
            "connections",
            format!("cycle detected involving: {}", stuck.join(", ")),
        ));
        return (report, Vec::new());
    }

    (report, sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str) -> NodeSpec {
        NodeSpec::new(id, id, NodeType::Script)
    }

    #[test]
    fn linear_workflow_sorts_in_order() {
        let wf = WorkflowBuilder::new("wf")
            .add_node(node("a"))
            .add_node(node("b"))
            .add_node(node("c"))
            .add_edge("a", "b")
            .add_edge("b", "c")
            .build()
            .unwrap();
        assert_eq!(wf.topo_order(), vec!["a", "b", "c"]);
        assert_eq!(wf.predecessors("c"), vec!["b"]);
        assert_eq!(wf.successors("a"), vec!["b"]);
    }

    #[test]
    fn diamond_keeps_endpoints_pinned() {
        let wf = WorkflowBuilder::new("wf")
            .add_node(node("a"))
            .add_node(node("b"))
            .add_node(node("c"))
            .add_node(node("d"))
            .add_edge("a", "b")
            .add_edge("a", "c")
            .add_edge("b", "d")
            .add_edge("c", "d")
            .build()
            .unwrap();
        let order = wf.topo_order();
        assert_eq!(order.first().unwrap(), "a");
        assert_eq!(order.last().unwrap(), "d");
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn empty_workflow_is_rejected() {
        let err = WorkflowBuilder::new("wf").build().unwrap_err();
        assert!(err.to_string().contains("at least one node"));
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let err = WorkflowBuilder::new("wf")
            .add_node(node("a"))
            .add_node(node("a"))
            .build()
            .unwrap_err();
        assert!(err.report().summary().contains("duplicate"));
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let err = WorkflowBuilder::new("wf")
            .add_node(node("a"))
            .add_edge("a", "ghost")
            .build()
            .unwrap_err();
        assert!(err.report().summary().contains("unknown node"));
    }

    #[test]
    fn self_loop_is_rejected() {
        let err = WorkflowBuilder::new("wf")
            .add_node(node("a"))
            .add_edge("a", "a")
            .build()
            .unwrap_err();
        assert!(err.report().summary().contains("self-loops"));
    }

    #[test]
    fn cycle_is_rejected() {
        let err = WorkflowBuilder::new("wf")
            .add_node(node("a"))
            .add_node(node("b"))
            .add_node(node("c"))
            .add_edge("a", "b")
            .add_edge("b", "c")
            .add_edge("c", "a")
            .build()
            .unwrap_err();
        assert!(err.report().summary().contains("cycle"));
    }

    #[test]
    fn empty_workflow_id_is_rejected() {
        let err = WorkflowBuilder::new("  ")
            .add_node(node("a"))
            .build()
            .unwrap_err();
        assert!(err.report().summary().contains("workflow.id"));
    }

    #[test]
    fn revalidation_is_idempotent() {
        let wf = WorkflowBuilder::new("wf")
            .add_node(node("a"))
            .add_node(node("b"))
            .add_edge("a", "b")
            .build()
            .unwrap();
        let first = wf.validate();
        let second = wf.validate();
        assert!(first.is_valid());
        assert_eq!(first, second);
    }

    #[test]
    fn disabled_nodes_stay_in_the_order() {
        let wf = WorkflowBuilder::new("wf")
            .add_node(node("a"))
            .add_node(node("b").disabled())
            .add_edge("a", "b")
            .build()
            .unwrap();
        assert_eq!(wf.topo_order().len(), 2);
        assert!(!wf.node("b").unwrap().enabled);
    }

    #[test]
    fn builder_carries_metadata_and_config() {
        let wf = WorkflowBuilder::new("wf")
            .name("named")
            .metadata("team", json!("ops"))
            .add_node(node("a").with_config_value("outputKey", json!("x")))
            .build()
            .unwrap();
        assert_eq!(wf.name(), "named");
        assert_eq!(wf.metadata().get("team"), Some(&json!("ops")));
        assert_eq!(wf.node("a").unwrap().config["outputKey"], json!("x"));
    }
}
