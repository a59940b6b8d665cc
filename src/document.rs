//! Declarative workflow documents (the YAML-shaped external interface).
//!
//! The document shape is fixed: a `workflow` header, an optional
//! `globalConfig`, a `nodes` list, and a `connections` list. Loading a
//! document produces a validated [`Workflow`]; saving a workflow
//! produces a document that loads back into an isomorphic DAG (same
//! node ids, edges, and semantic config).
//!
//! ```yaml
//! workflow:
//!   id: log-triage
//!   name: Log triage
//! globalConfig:
//!   maxConcurrentNodes: 4
//! nodes:
//!   - id: collect
//!     name: Collect
//!     type: plugin
//!     config:
//!       pluginType: file
//!       outputKey: records
//! connections:
//!   - from: collect
//!     to: analyze
//! ```

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{NodeSpec, Workflow, WorkflowBuilder, WorkflowError};
use crate::types::NodeType;

/// Errors from loading or saving workflow documents.
#[derive(Debug, Error, Diagnostic)]
pub enum DocumentError {
    /// The YAML could not be parsed at all.
    #[error("malformed workflow document: {0}")]
    #[diagnostic(code(flowloom::document::parse))]
    Parse(#[from] serde_yaml::Error),

    /// A node declared a type outside the closed set.
    #[error("unknown node type '{node_type}' on node '{node_id}'")]
    #[diagnostic(
        code(flowloom::document::unknown_node_type),
        help("Valid types: input, output, script, diagnosis, plugin, reference.")
    )]
    UnknownNodeType { node_id: String, node_type: String },

    /// The document parsed but the resulting workflow is invalid.
    #[error(transparent)]
    #[diagnostic(code(flowloom::document::invalid_workflow))]
    Invalid(#[from] WorkflowError),
}

/// The `workflow:` header block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// The optional `globalConfig:` block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_nodes: Option<usize>,
}

/// One entry of the `nodes:` list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64)>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

/// One entry of the `connections:` list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDocument {
    pub from: String,
    pub to: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// A complete declarative workflow document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub workflow: DocumentHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_config: Option<GlobalConfig>,
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
    #[serde(default)]
    pub connections: Vec<ConnectionDocument>,
}

impl WorkflowDocument {
    /// Parse a document from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, DocumentError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Render this document as YAML text.
    pub fn to_yaml(&self) -> Result<String, DocumentError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Convert into a validated [`Workflow`].
    ///
    /// Applies the load-time rules: node types from the closed set,
    /// unique ids, existing edge endpoints, acyclic. Disabled nodes are
    /// kept (validated and counted, never executed). Disabled
    /// connections are dropped from the DAG.
    pub fn into_workflow(self) -> Result<Workflow, DocumentError> {
        let mut builder = WorkflowBuilder::new(self.workflow.id.clone())
            .name(self.workflow.name.clone())
            .description(self.workflow.description.clone());
        if let Some(version) = &self.workflow.version {
            builder = builder.version(version.clone());
        }
        if let Some(author) = &self.workflow.author {
            builder = builder.metadata("author", Value::String(author.clone()));
        }
        for (key, value) in &self.workflow.metadata {
            builder = builder.metadata(key.clone(), value.clone());
        }
        if let Some(global) = &self.global_config {
            builder = builder.metadata(
                "globalConfig",
                serde_json::to_value(global).expect("globalConfig serializes"),
            );
        }

        for node in self.nodes {
            let Some(node_type) = NodeType::parse(&node.node_type) else {
                return Err(DocumentError::UnknownNodeType {
                    node_id: node.id,
                    node_type: node.node_type,
                });
            };
            let mut spec = NodeSpec::new(node.id, node.name, node_type).with_config(node.config);
            spec.enabled = node.enabled;
            spec.position = node.position;
            builder = builder.add_node(spec);
        }

        for conn in self.connections {
            if !conn.enabled {
                continue;
            }
            builder = builder.add_edge(conn.from, conn.to);
        }

        Ok(builder.build()?)
    }

    /// Build a document from an existing workflow, suitable for saving.
    #[must_use]
    pub fn from_workflow(workflow: &Workflow) -> Self {
        let mut metadata = Map::new();
        let mut author = None;
        let mut global_config = None;
        for (key, value) in workflow.metadata() {
            match key.as_str() {
                "author" => author = value.as_str().map(str::to_owned),
                "globalConfig" => {
                    global_config = serde_json::from_value(value.clone()).ok();
                }
                _ => {
                    metadata.insert(key.clone(), value.clone());
                }
            }
        }
        Self {
            workflow: DocumentHeader {
                id: workflow.id().to_owned(),
                name: workflow.name().to_owned(),
                description: workflow.description().to_owned(),
                version: Some(workflow.version().to_owned()),
                author,
                metadata,
            },
            global_config,
            nodes: workflow
                .nodes()
                .iter()
                .map(|spec| NodeDocument {
                    id: spec.id.clone(),
                    name: spec.name.clone(),
                    node_type: spec.node_type.as_str().to_owned(),
                    enabled: spec.enabled,
                    position: spec.position,
                    config: spec.config.clone(),
                })
                .collect(),
            connections: workflow
                .edges()
                .iter()
                .map(|edge| ConnectionDocument {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    enabled: true,
                    condition: None,
                })
                .collect(),
        }
    }
}

/// Load a workflow directly from YAML text.
pub fn load_workflow(text: &str) -> Result<Workflow, DocumentError> {
    WorkflowDocument::from_yaml(text)?.into_workflow()
}

/// Save a workflow as YAML text.
pub fn save_workflow(workflow: &Workflow) -> Result<String, DocumentError> {
    WorkflowDocument::from_workflow(workflow).to_yaml()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOC: &str = r#"
workflow:
  id: triage
  name: Log triage
  version: "2.1.0"
globalConfig:
  maxConcurrentNodes: 4
nodes:
  - id: seed
    name: Seed
    type: input
    config:
      data:
        x: 10
  - id: double
    name: Double
    type: script
    config:
      script: "input * 2"
      inputKey: x
      outputKey: y
connections:
  - from: seed
    to: double
"#;

    #[test]
    fn document_loads_into_a_workflow() {
        let wf = load_workflow(DOC).unwrap();
        assert_eq!(wf.id(), "triage");
        assert_eq!(wf.version(), "2.1.0");
        assert_eq!(wf.nodes().len(), 2);
        assert_eq!(wf.edges().len(), 1);
        assert_eq!(
            wf.node("double").unwrap().config["script"],
            json!("input * 2")
        );
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let text = DOC.replace("type: script", "type: webhook");
        let err = load_workflow(&text).unwrap_err();
        assert!(matches!(err, DocumentError::UnknownNodeType { .. }));
    }

    #[test]
    fn disabled_connections_are_dropped() {
        let text = DOC.replace("  - from: seed", "  - enabled: false\n    from: seed");
        let wf = load_workflow(&text).unwrap();
        assert!(wf.edges().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let wf = load_workflow(DOC).unwrap();
        let yaml = save_workflow(&wf).unwrap();
        let reloaded = load_workflow(&yaml).unwrap();
        assert_eq!(wf.id(), reloaded.id());
        assert_eq!(wf.nodes(), reloaded.nodes());
        assert_eq!(wf.edges(), reloaded.edges());
        assert_eq!(wf.metadata(), reloaded.metadata());
    }

    #[test]
    fn global_config_survives_the_round_trip() {
        let wf = load_workflow(DOC).unwrap();
        let doc = WorkflowDocument::from_workflow(&wf);
        assert_eq!(
            doc.global_config.unwrap().max_concurrent_nodes,
            Some(4)
        );
    }
}
