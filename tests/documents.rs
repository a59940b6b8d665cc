//! Workflow document loading, validation totality, and the round-trip
//! law: save(load(doc)) loads back into an isomorphic DAG.

use flowloom::document::{load_workflow, save_workflow, DocumentError, WorkflowDocument};
use flowloom::model::{NodeSpec, WorkflowBuilder};
use flowloom::types::NodeType;
use proptest::prelude::*;
use serde_json::json;

const VALID: &str = r#"
workflow:
  id: triage
  name: Log triage
nodes:
  - id: seed
    name: Seed
    type: input
    config:
      data:
        x: 1
  - id: analyze
    name: Analyze
    type: diagnosis
    enabled: false
    config:
      diagnosisType: error_detection
      inputKey: records
      outputKey: finding
connections:
  - from: seed
    to: analyze
"#;

#[test]
fn valid_document_loads_with_disabled_nodes_counted() {
    let wf = load_workflow(VALID).unwrap();
    assert_eq!(wf.nodes().len(), 2);
    assert!(!wf.node("analyze").unwrap().enabled);
    assert_eq!(wf.edges().len(), 1);
}

#[test]
fn unknown_type_duplicate_id_and_cycle_are_all_rejected() {
    let unknown = VALID.replace("type: diagnosis", "type: teleport");
    assert!(matches!(
        load_workflow(&unknown).unwrap_err(),
        DocumentError::UnknownNodeType { .. }
    ));

    let duplicate = VALID.replace("id: analyze", "id: seed");
    assert!(load_workflow(&duplicate).is_err());

    let cycle = format!("{VALID}  - from: analyze\n    to: seed\n");
    assert!(load_workflow(&cycle).is_err());
}

#[test]
fn dangling_connection_is_rejected() {
    let dangling = VALID.replace("to: analyze", "to: nowhere");
    assert!(load_workflow(&dangling).is_err());
}

#[test]
fn empty_document_is_rejected() {
    let doc = "workflow:\n  id: hollow\nnodes: []\nconnections: []\n";
    assert!(load_workflow(doc).is_err());
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    assert!(matches!(
        load_workflow("workflow: [not a map").unwrap_err(),
        DocumentError::Parse(_)
    ));
}

#[test]
fn round_trip_preserves_nodes_edges_and_config() {
    let wf = load_workflow(VALID).unwrap();
    let yaml = save_workflow(&wf).unwrap();
    let back = load_workflow(&yaml).unwrap();
    assert_eq!(wf.id(), back.id());
    assert_eq!(wf.nodes(), back.nodes());
    assert_eq!(wf.edges(), back.edges());
}

#[test]
fn revalidation_is_idempotent_and_pure() {
    let wf = load_workflow(VALID).unwrap();
    let first = wf.validate();
    let second = wf.validate();
    assert!(first.is_valid());
    assert_eq!(first, second);
    // The workflow itself is untouched.
    assert_eq!(wf.nodes().len(), 2);
}

// ----------------------------------------------------------------------------
// Property: any builder-valid DAG survives the document round trip.
// ----------------------------------------------------------------------------

fn node_type_for(index: usize) -> NodeType {
    match index % 3 {
        0 => NodeType::Input,
        1 => NodeType::Script,
        _ => NodeType::Diagnosis,
    }
}

proptest! {
    #[test]
    fn round_trip_is_isomorphic(
        node_count in 1usize..8,
        // Edge picks as (from, to) index pairs; forced forward so the
        // graph is acyclic by construction.
        raw_edges in proptest::collection::vec((0usize..8, 0usize..8), 0..12),
        flags in proptest::collection::vec(any::<bool>(), 8),
    ) {
        let mut builder = WorkflowBuilder::new("generated").name("Generated");
        for i in 0..node_count {
            let mut spec = NodeSpec::new(
                format!("n{i}"),
                format!("node {i}"),
                node_type_for(i),
            )
            .with_config_value("marker", json!(i));
            spec.enabled = flags[i];
            builder = builder.add_node(spec);
        }
        let mut seen = std::collections::HashSet::new();
        for (a, b) in raw_edges {
            let (from, to) = (a % node_count, b % node_count);
            if from < to && seen.insert((from, to)) {
                builder = builder.add_edge(format!("n{from}"), format!("n{to}"));
            }
        }
        let workflow = builder.build().unwrap();

        let yaml = WorkflowDocument::from_workflow(&workflow).to_yaml().unwrap();
        let reloaded = load_workflow(&yaml).unwrap();

        prop_assert_eq!(workflow.id(), reloaded.id());
        prop_assert_eq!(workflow.nodes(), reloaded.nodes());
        prop_assert_eq!(workflow.edges(), reloaded.edges());
        prop_assert_eq!(workflow.topo_order(), reloaded.topo_order());
    }
}
