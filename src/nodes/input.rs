//! Input node: data ingress from literal config.
//!
//! Writes the entries of its `data` object into the context (or, when
//! `outputKey` is configured, the whole payload under that one slot).

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::model::NodeSpec;
use crate::node::{Node, NodeError, NodeExecutionResult, ValidationReport};
use crate::utils::value::opt_str;

pub struct InputNode {
    node_id: String,
    data: Value,
    output_key: Option<String>,
}

impl InputNode {
    pub fn from_spec(spec: &NodeSpec) -> Result<Self, NodeError> {
        Ok(Self {
            node_id: spec.id.clone(),
            data: spec.config.get("data").cloned().unwrap_or(Value::Null),
            output_key: opt_str(&spec.config, "outputKey"),
        })
    }
}

#[async_trait]
impl Node for InputNode {
    fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::ok();
        if self.data.is_null() {
            report.error("config.data", "input node requires a data payload");
        } else if self.output_key.is_none() && !self.data.is_object() {
            report.error(
                "config.outputKey",
                "non-object data requires an outputKey to land under",
            );
        }
        report
    }

    async fn execute(
        &self,
        _input: Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        let mut written = 0usize;
        match (&self.output_key, &self.data) {
            (Some(key), data) => {
                ctx.set(key.clone(), data.clone());
                written = 1;
            }
            (None, Value::Object(entries)) => {
                for (key, value) in entries {
                    ctx.set(key.clone(), value.clone());
                    written += 1;
                }
            }
            (None, _) => {
                return Err(NodeError::InvalidConfig {
                    message: "non-object data requires an outputKey".into(),
                });
            }
        }

        Ok(NodeExecutionResult::success(&self.node_id)
            .with_output(self.data.clone())
            .with_metadata("slots_written", Value::from(written as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeType;
    use serde_json::json;

    fn spec(config: Value) -> NodeSpec {
        NodeSpec::new("in", "in", NodeType::Input)
            .with_config(config.as_object().unwrap().clone())
    }

    #[tokio::test]
    async fn object_data_seeds_individual_slots() {
        let node = InputNode::from_spec(&spec(json!({"data": {"x": 10, "y": "s"}}))).unwrap();
        assert!(node.validate().is_valid());
        let ctx = ExecutionContext::new("wf");
        let result = node.execute(Value::Null, &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(ctx.get("x"), Some(json!(10)));
        assert_eq!(ctx.get("y"), Some(json!("s")));
        assert_eq!(result.metadata["slots_written"], json!(2));
    }

    #[tokio::test]
    async fn output_key_wraps_the_whole_payload() {
        let node =
            InputNode::from_spec(&spec(json!({"data": [1, 2], "outputKey": "records"}))).unwrap();
        let ctx = ExecutionContext::new("wf");
        node.execute(Value::Null, &ctx).await.unwrap();
        assert_eq!(ctx.get("records"), Some(json!([1, 2])));
    }

    #[test]
    fn missing_data_fails_validation() {
        let node = InputNode::from_spec(&spec(json!({}))).unwrap();
        assert!(!node.validate().is_valid());
    }

    #[test]
    fn scalar_data_without_output_key_fails_validation() {
        let node = InputNode::from_spec(&spec(json!({"data": 42}))).unwrap();
        assert!(!node.validate().is_valid());
    }
}
