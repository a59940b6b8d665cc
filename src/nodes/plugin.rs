//! Plugin node: delegates data acquisition to a registered
//! data-source plugin.
//!
//! The execute protocol is fixed: resolve plugin → validate config →
//! open connection → read → write `outputKey` → close. The connection
//! is closed on every exit path, success or failure.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::model::NodeSpec;
use crate::node::{Node, NodeError, NodeExecutionResult, ValidationReport};
use crate::plugin::{PluginError, PluginRegistry, TestReport};
use crate::utils::value::opt_str;

pub struct PluginNode {
    node_id: String,
    plugin_id: Option<String>,
    output_key: Option<String>,
    config: Map<String, Value>,
    registry: Arc<PluginRegistry>,
}

impl PluginNode {
    pub fn from_spec(spec: &NodeSpec, registry: Arc<PluginRegistry>) -> Result<Self, NodeError> {
        // `sourceType` is the legacy alias for `pluginType`.
        let plugin_id =
            opt_str(&spec.config, "pluginType").or_else(|| opt_str(&spec.config, "sourceType"));
        Ok(Self {
            node_id: spec.id.clone(),
            plugin_id,
            output_key: opt_str(&spec.config, "outputKey"),
            config: spec.config.clone(),
            registry,
        })
    }

    fn plugin_id(&self) -> Result<&str, NodeError> {
        self.plugin_id
            .as_deref()
            .ok_or_else(|| NodeError::InvalidConfig {
                message: "pluginType is required".into(),
            })
    }

    /// Out-of-band connectivity probe for config tooling; not part of
    /// the normal execute path.
    pub async fn test_connection(&self) -> Result<TestReport, NodeError> {
        let plugin_id = self.plugin_id()?;
        self.registry
            .test_connection(plugin_id, &self.config)
            .await
            .map_err(|e| map_plugin_error(plugin_id, e))
    }
}

fn map_plugin_error(plugin_id: &str, err: PluginError) -> NodeError {
    match err {
        PluginError::NotFound { .. } => NodeError::PluginNotFound {
            plugin: plugin_id.to_owned(),
        },
        PluginError::InvalidConfig { summary } => NodeError::InvalidConfig { message: summary },
        PluginError::Connection { message } => NodeError::ConnectionFailed { message },
        PluginError::Read { message } => NodeError::ReadFailed { message },
        other => NodeError::ReadFailed {
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl Node for PluginNode {
    fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::ok();
        match &self.plugin_id {
            None => report.error("config.pluginType", "pluginType is required"),
            Some(plugin_id) => {
                // Plugin-declared parameter checks run here when the
                // plugin is already registered; otherwise execution
                // reports PLUGIN_NOT_FOUND.
                if let Some(plugin) = self.registry.get_plugin(plugin_id) {
                    report.merge(plugin.validate_config(&self.config));
                }
            }
        }
        if self.output_key.is_none() {
            report.error("config.outputKey", "outputKey is required");
        }
        report
    }

    async fn execute(
        &self,
        _input: Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        let plugin_id = self.plugin_id()?;

        let mut connection = self
            .registry
            .create_connection(plugin_id, &self.config, ctx)
            .await
            .map_err(|e| map_plugin_error(plugin_id, e))?;

        let info = connection.connection_info();
        let read = connection.read_data(ctx).await;
        // Close on both paths before surfacing the read outcome.
        let closed = connection.close().await;
        if let Err(e) = closed {
            tracing::warn!(plugin = %plugin_id, error = %e, "connection close failed");
        }

        let payload = read.map_err(|e| map_plugin_error(plugin_id, e))?;

        if let Some(key) = &self.output_key {
            ctx.set(key.clone(), payload.clone());
        }

        Ok(NodeExecutionResult::success(&self.node_id)
            .with_output(payload)
            .with_metadata("plugin", json!(plugin_id))
            .with_metadata("connection", json!(info)))
    }

    async fn destroy(&self) {
        // Connections are per-execute; nothing cached to release.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::registry::PluginRegistryConfig;
    use crate::types::NodeType;
    use crate::utils::testing::MockSourcePlugin;

    async fn registry_with(plugin: MockSourcePlugin) -> Arc<PluginRegistry> {
        let registry = Arc::new(PluginRegistry::new(PluginRegistryConfig::default()));
        registry.register(Arc::new(plugin)).await.unwrap();
        registry
    }

    fn node(config: Value, registry: Arc<PluginRegistry>) -> PluginNode {
        let spec = NodeSpec::new("src", "src", NodeType::Plugin)
            .with_config(config.as_object().unwrap().clone());
        PluginNode::from_spec(&spec, registry).unwrap()
    }

    #[tokio::test]
    async fn read_lands_under_the_output_key_and_closes() {
        let plugin = MockSourcePlugin::new("mock", json!([1, 2, 3]));
        let counters = plugin.counters();
        let registry = registry_with(plugin).await;
        let node = node(
            json!({"pluginType": "mock", "outputKey": "records"}),
            registry,
        );
        let ctx = ExecutionContext::new("wf");
        let result = node.execute(Value::Null, &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(ctx.get("records"), Some(json!([1, 2, 3])));
        assert_eq!(counters.connections_opened(), 1);
        assert_eq!(counters.connections_closed(), 1);
    }

    #[tokio::test]
    async fn failing_read_still_closes_the_connection() {
        let plugin = MockSourcePlugin::new("mock", json!(null)).failing_read();
        let counters = plugin.counters();
        let registry = registry_with(plugin).await;
        let node = node(json!({"pluginType": "mock", "outputKey": "out"}), registry);
        let ctx = ExecutionContext::new("wf");
        let err = node.execute(Value::Null, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "READ_FAILED");
        assert_eq!(counters.connections_opened(), 1);
        assert_eq!(counters.connections_closed(), 1);
        assert_eq!(ctx.get("out"), None);
    }

    #[tokio::test]
    async fn unknown_plugin_reports_plugin_not_found() {
        let registry = Arc::new(PluginRegistry::new(PluginRegistryConfig::default()));
        let node = node(json!({"pluginType": "ghost", "outputKey": "out"}), registry);
        let ctx = ExecutionContext::new("wf");
        let err = node.execute(Value::Null, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "PLUGIN_NOT_FOUND");
    }

    #[tokio::test]
    async fn source_type_alias_still_resolves() {
        let registry = registry_with(MockSourcePlugin::new("mock", json!(7))).await;
        let node = node(json!({"sourceType": "mock", "outputKey": "n"}), registry);
        let ctx = ExecutionContext::new("wf");
        node.execute(Value::Null, &ctx).await.unwrap();
        assert_eq!(ctx.get("n"), Some(json!(7)));
    }

    #[tokio::test]
    async fn invalid_config_surfaces_plugin_errors_verbatim() {
        let registry = registry_with(MockSourcePlugin::new("mock", json!(null)).requiring("path")).await;
        let node = node(json!({"pluginType": "mock", "outputKey": "out"}), registry);
        let ctx = ExecutionContext::new("wf");
        let err = node.execute(Value::Null, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
        assert!(err.to_string().contains("path"));
    }
}
