//! Plugin runtime end-to-end: registration, scan rejection, workflow
//! integration, lifecycle pairing, isolation, and eviction.

mod common;

use std::sync::Arc;

use flowloom::config::EngineConfig;
use flowloom::model::{NodeSpec, WorkflowBuilder};
use flowloom::plugin::isolation::{PrefixSets, SymbolSource, SymbolSpace, TableSource};
use flowloom::plugin::registry::{PluginRegistry, PluginRegistryConfig};
use flowloom::plugin::resources::{PluginResourceManager, ResourceManagerConfig};
use flowloom::plugin::PluginError;
use flowloom::types::NodeType;
use flowloom::utils::collections::ValueMap;
use flowloom::utils::testing::{FixedGauge, MockSourcePlugin};
use serde_json::{json, Value};

use common::harness;

fn plugin_node(id: &str, config: Value) -> NodeSpec {
    NodeSpec::new(id, id, NodeType::Plugin).with_config(config.as_object().unwrap().clone())
}

#[tokio::test]
async fn workflow_reads_through_a_registered_plugin() {
    let h = harness(EngineConfig::default().sequential());
    let plugin = MockSourcePlugin::new("logs", json!([{"level": "ERROR", "module": "db"}]));
    let counters = plugin.counters();
    h.plugins.register(Arc::new(plugin)).await.unwrap();

    let workflow = WorkflowBuilder::new("ingest")
        .add_node(plugin_node(
            "fetch",
            json!({"pluginType": "logs", "outputKey": "records"}),
        ))
        .add_node(
            NodeSpec::new("diag", "diag", NodeType::Diagnosis)
                .with_config_value("diagnosisType", json!("error_detection"))
                .with_config_value("inputKey", json!("records"))
                .with_config_value("outputKey", json!("finding")),
        )
        .add_edge("fetch", "diag")
        .build()
        .unwrap();

    let result = h.engine.execute(&workflow, ValueMap::default()).await.unwrap();
    assert!(result.success, "message: {:?}", result.message);
    assert_eq!(result.context["finding"]["issueCount"], json!(1));
    assert_eq!(counters.connections_opened(), 1);
    assert_eq!(counters.connections_closed(), 1);
}

#[tokio::test]
async fn archive_without_spi_descriptor_is_rejected_and_absent() {
    let registry = PluginRegistry::new(PluginRegistryConfig::default());
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("plugin.so"), "some bytes").unwrap();

    let err = registry.register_archive(dir.path()).await.unwrap_err();
    assert!(matches!(err, PluginError::ScanRejected { .. }));
    assert!(err.to_string().contains("missing-spi"));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn archive_with_blocklisted_symbol_is_rejected() {
    let registry = PluginRegistry::new(PluginRegistryConfig::default());
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("plugin.spi"), "create_plugin\n").unwrap();
    std::fs::write(
        dir.path().join("plugin.so"),
        b"payload with std::process::Command inside",
    )
    .unwrap();

    let err = registry.register_archive(dir.path()).await.unwrap_err();
    assert!(matches!(err, PluginError::ScanRejected { .. }));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn initialize_destroy_pair_exactly_once_over_the_lifecycle() {
    let registry = PluginRegistry::new(PluginRegistryConfig::default());
    let plugin = MockSourcePlugin::new("paired", json!(1));
    let counters = plugin.counters();
    registry.register(Arc::new(plugin)).await.unwrap();

    // Plenty of lookups; no extra lifecycle calls.
    for _ in 0..5 {
        assert!(registry.get_plugin("paired").is_some());
    }
    registry.unregister("paired").await.unwrap();

    assert_eq!(counters.initialize_calls(), 1);
    assert_eq!(counters.destroy_calls(), 1);
}

#[test]
fn two_plugins_bundle_private_library_versions_without_collision() {
    // Two symbol spaces, each bundling serde_json at "its own version"
    // (modeled as distinct handles), resolved concurrently.
    let host = Arc::new(flowloom::plugin::isolation::HostExports::new());
    host.export("flowloom::context::get", 0x100);

    let space_a = Arc::new(SymbolSpace::new(
        "plugin-a",
        Arc::clone(&host) as Arc<dyn SymbolSource>,
        Box::new(TableSource::new().with("serde_json::to_value", 0xA1)),
        PrefixSets::default(),
    ));
    let space_b = Arc::new(SymbolSpace::new(
        "plugin-b",
        Arc::clone(&host) as Arc<dyn SymbolSource>,
        Box::new(TableSource::new().with("serde_json::to_value", 0xB1)),
        PrefixSets::default(),
    ));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let a = Arc::clone(&space_a);
        let b = Arc::clone(&space_b);
        handles.push(std::thread::spawn(move || {
            for _ in 0..100 {
                assert_eq!(a.resolve("serde_json::to_value").unwrap(), 0xA1);
                assert_eq!(b.resolve("serde_json::to_value").unwrap(), 0xB1);
                // Shared engine symbols come from the host for both.
                assert_eq!(a.resolve("flowloom::context::get").unwrap(), 0x100);
                assert_eq!(b.resolve("flowloom::context::get").unwrap(), 0x100);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[tokio::test]
async fn eviction_goes_through_the_standard_unregister_path() {
    let registry = Arc::new(PluginRegistry::new(PluginRegistryConfig::default()));
    let plugin = MockSourcePlugin::new("victim", json!(null));
    let counters = plugin.counters();
    registry.register(Arc::new(plugin)).await.unwrap();

    let manager = PluginResourceManager::new(
        Arc::clone(&registry),
        ResourceManagerConfig {
            idle_timeout: std::time::Duration::from_secs(0),
            ..ResourceManagerConfig::default()
        },
        Arc::new(FixedGauge::new(0.0)),
    );
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    manager.sweep_once().await;

    assert!(!registry.contains("victim"));
    // destroy ran through unregister, exactly once.
    assert_eq!(counters.destroy_calls(), 1);
}

#[tokio::test]
async fn executions_using_two_plugins_concurrently_succeed() {
    let h = harness(EngineConfig::default().with_max_concurrent_nodes(2));
    h.plugins
        .register(Arc::new(MockSourcePlugin::new("alpha", json!([1, 2]))))
        .await
        .unwrap();
    h.plugins
        .register(Arc::new(MockSourcePlugin::new("beta", json!([3]))))
        .await
        .unwrap();

    let workflow = WorkflowBuilder::new("dual")
        .add_node(plugin_node(
            "a",
            json!({"pluginType": "alpha", "outputKey": "first"}),
        ))
        .add_node(plugin_node(
            "b",
            json!({"pluginType": "beta", "outputKey": "second"}),
        ))
        .build()
        .unwrap();

    let result = h.engine.execute(&workflow, ValueMap::default()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.context["first"], json!([1, 2]));
    assert_eq!(result.context["second"], json!([3]));
}
