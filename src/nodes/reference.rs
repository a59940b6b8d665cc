//! Reference node: invokes another workflow as a node.
//!
//! The heavy lifting lives in [`crate::reference`]; this type parses
//! the config, records the caller → callee dependency edge at build
//! time, and adapts the executor to the node contract.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::model::NodeSpec;
use crate::node::{Node, NodeError, NodeExecutionResult, ValidationReport};
use crate::reference::{ReferenceConfig, ReferenceExecutor, WorkflowInvoker};
use crate::registry::WorkflowRegistry;
use crate::script::ScriptHost;

pub struct ReferenceNode {
    node_id: String,
    workflow_id: String,
    config: ReferenceConfig,
    executor: ReferenceExecutor,
}

impl ReferenceNode {
    pub fn from_spec(
        workflow_id: &str,
        spec: &NodeSpec,
        workflows: Arc<WorkflowRegistry>,
        invoker: Arc<dyn WorkflowInvoker>,
        script_host: Arc<dyn ScriptHost>,
    ) -> Result<Self, NodeError> {
        let config = ReferenceConfig::from_config(&spec.config)?;

        // Dependency edges are recorded at build time so cycle checks
        // run before any invocation.
        for callee in config
            .workflow_id
            .iter()
            .chain(config.workflow_ids.iter())
        {
            workflows.record_dependency(workflow_id, callee.clone());
        }

        Ok(Self {
            node_id: spec.id.clone(),
            workflow_id: workflow_id.to_owned(),
            config,
            executor: ReferenceExecutor::new(workflows, invoker, script_host),
        })
    }
}

#[async_trait]
impl Node for ReferenceNode {
    fn validate(&self) -> ValidationReport {
        self.config.validate()
    }

    async fn execute(
        &self,
        _input: Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        self.executor
            .run(&self.workflow_id, &self.node_id, &self.config, ctx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionMode, NodeType};
    use serde_json::json;

    #[test]
    fn config_parses_modes_and_mappings() {
        let config = ReferenceConfig::from_config(
            json!({
                "executionMode": "LOOP",
                "workflowId": "child",
                "loopDataKey": "batches",
                "maxIterations": 3,
                "inputMappings": {"a": "b"},
                "outputMappings": {"sum": "sums"},
            })
            .as_object()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(config.mode, ExecutionMode::Loop);
        assert_eq!(config.max_iterations, Some(3));
        assert_eq!(config.input_mappings["a"], "b");
        assert!(config.validate().is_valid());
    }

    #[test]
    fn parallel_mode_rejects_output_mappings() {
        let config = ReferenceConfig::from_config(
            json!({
                "executionMode": "PARALLEL",
                "workflowIds": ["a", "b"],
                "outputMappings": {"x": "y"},
            })
            .as_object()
            .unwrap(),
        )
        .unwrap();
        let report = config.validate();
        assert!(!report.is_valid());
        assert!(report.summary().contains("does not map outputs"));
    }

    #[test]
    fn sync_mode_requires_a_workflow_id() {
        let config =
            ReferenceConfig::from_config(json!({"executionMode": "SYNC"}).as_object().unwrap())
                .unwrap();
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn build_records_dependency_edges() {
        let workflows = Arc::new(WorkflowRegistry::new());
        let spec = NodeSpec::new("ref", "ref", NodeType::Reference)
            .with_config(
                json!({"executionMode": "SYNC", "workflowId": "child"})
                    .as_object()
                    .unwrap()
                    .clone(),
            );
        let invoker = crate::utils::testing::StaticInvoker::succeeding();
        let _node = ReferenceNode::from_spec(
            "parent",
            &spec,
            Arc::clone(&workflows),
            invoker,
            Arc::new(crate::script::ExprHost),
        )
        .unwrap();
        assert!(workflows.would_close_cycle("child", "parent"));
    }
}
