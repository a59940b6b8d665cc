//! Script node: runs a user-supplied expression through the script
//! host against the fixed bindings surface.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::model::NodeSpec;
use crate::node::{Node, NodeError, NodeExecutionResult, ValidationReport};
use crate::script::{ScriptBindings, ScriptHost};
use crate::utils::value::opt_str;

pub struct ScriptNode {
    node_id: String,
    script: String,
    output_key: Option<String>,
    host: Arc<dyn ScriptHost>,
}

impl ScriptNode {
    pub fn from_spec(spec: &NodeSpec, host: Arc<dyn ScriptHost>) -> Result<Self, NodeError> {
        Ok(Self {
            node_id: spec.id.clone(),
            script: opt_str(&spec.config, "script").unwrap_or_default(),
            output_key: opt_str(&spec.config, "outputKey"),
            host,
        })
    }
}

#[async_trait]
impl Node for ScriptNode {
    fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::ok();
        if self.script.trim().is_empty() {
            report.error("config.script", "script must not be empty");
        }
        if self.output_key.as_deref() == Some("") {
            report.error("config.outputKey", "outputKey must not be empty");
        }
        report
    }

    async fn execute(
        &self,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        let bindings = ScriptBindings::new(input, ctx);
        // Failures leave the context exactly as the script left it; the
        // host performs no rollback.
        let value = self
            .host
            .eval(&self.script, &bindings)
            .await
            .map_err(|e| NodeError::Script {
                message: e.to_string(),
            })?;

        if let Some(key) = &self.output_key {
            ctx.set(key.clone(), value.clone());
        }

        Ok(NodeExecutionResult::success(&self.node_id).with_output(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ExprHost;
    use crate::types::NodeType;
    use serde_json::json;

    fn node(config: Value) -> ScriptNode {
        let spec = NodeSpec::new("calc", "calc", NodeType::Script)
            .with_config(config.as_object().unwrap().clone());
        ScriptNode::from_spec(&spec, Arc::new(ExprHost)).unwrap()
    }

    #[tokio::test]
    async fn result_lands_under_the_output_key() {
        let node = node(json!({"script": "input * 2", "outputKey": "y"}));
        let ctx = ExecutionContext::new("wf");
        let result = node.execute(json!(10), &ctx).await.unwrap();
        assert_eq!(result.output, Some(json!(20)));
        assert_eq!(ctx.get("y"), Some(json!(20)));
    }

    #[tokio::test]
    async fn script_errors_become_node_errors() {
        let node = node(json!({"script": "1 +", "outputKey": "y"}));
        let ctx = ExecutionContext::new("wf");
        let err = node.execute(Value::Null, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "SCRIPT_ERROR");
        assert_eq!(ctx.get("y"), None);
    }

    #[test]
    fn empty_script_fails_validation() {
        let node = node(json!({"script": "  "}));
        assert!(!node.validate().is_valid());
    }
}
