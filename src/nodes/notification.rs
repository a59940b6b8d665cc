//! Notification (output) node: renders a templated message and
//! dispatches it through a registered provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::model::NodeSpec;
use crate::node::{Node, NodeError, NodeExecutionResult, ValidationReport};
use crate::notify::{template, NotificationDispatcher, NotificationMessage};
use crate::types::{MessageType, Priority};
use crate::utils::collections::ValueMap;
use crate::utils::value::{opt_str, opt_string_list, str_or};

pub struct NotificationNode {
    node_id: String,
    provider_type: String,
    provider_config: Map<String, Value>,
    title: String,
    content_template: String,
    message_type: Result<MessageType, String>,
    priority: Result<Priority, String>,
    recipients: Vec<String>,
    cc_recipients: Vec<String>,
    attachments: ValueMap,
    schedule_time: Option<DateTime<Utc>>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl NotificationNode {
    pub fn from_spec(
        spec: &NodeSpec,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Result<Self, NodeError> {
        let message_type = match opt_str(&spec.config, "messageType") {
            Some(raw) => raw.parse::<MessageType>(),
            None => Ok(MessageType::default()),
        };
        let priority = match opt_str(&spec.config, "priority") {
            Some(raw) => raw.parse::<Priority>(),
            None => Ok(Priority::default()),
        };
        let schedule_time = opt_str(&spec.config, "scheduleTime")
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let attachments = spec
            .config
            .get("attachments")
            .and_then(Value::as_object)
            .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Ok(Self {
            node_id: spec.id.clone(),
            provider_type: str_or(&spec.config, "providerType", "console"),
            provider_config: spec
                .config
                .get("providerConfig")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            title: str_or(&spec.config, "title", ""),
            content_template: str_or(&spec.config, "contentTemplate", ""),
            message_type,
            priority,
            recipients: opt_string_list(&spec.config, "recipients"),
            cc_recipients: opt_string_list(&spec.config, "ccRecipients"),
            attachments,
            schedule_time,
            dispatcher,
        })
    }
}

#[async_trait]
impl Node for NotificationNode {
    fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::ok();
        if self.content_template.is_empty() {
            report.error("config.contentTemplate", "contentTemplate is required");
        }
        if let Err(raw) = &self.message_type {
            report.error("config.messageType", raw.clone());
        }
        if let Err(raw) = &self.priority {
            report.error("config.priority", raw.clone());
        }
        if self.dispatcher.provider(&self.provider_type).is_none() {
            report.warning(
                "config.providerType",
                format!("provider '{}' is not registered", self.provider_type),
            );
        }
        report
    }

    async fn execute(
        &self,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        let message_type = self
            .message_type
            .clone()
            .map_err(|raw| NodeError::InvalidConfig { message: raw })?;
        let priority = self
            .priority
            .clone()
            .map_err(|raw| NodeError::InvalidConfig { message: raw })?;

        let content = template::render(&self.content_template, &input, ctx);
        let title = template::render(&self.title, &input, ctx);

        let mut message = NotificationMessage::new(title, content)
            .with_type(message_type)
            .with_priority(priority)
            .with_recipients(self.recipients.clone());
        message.cc_recipients = self.cc_recipients.clone();
        message.attachments = self.attachments.clone();
        message.schedule_time = self.schedule_time;
        message
            .metadata
            .insert("workflowId".into(), json!(ctx.workflow_id()));
        message
            .metadata
            .insert("executionId".into(), json!(ctx.execution_id()));

        let receipt = self
            .dispatcher
            .dispatch(&self.provider_type, &self.provider_config, &message)
            .await
            .map_err(|e| NodeError::Notification {
                message: e.to_string(),
            })?;

        Ok(NodeExecutionResult::success(&self.node_id)
            .with_output(json!({
                "messageId": receipt.message_id,
                "provider": receipt.provider,
                "content": message.content,
            }))
            .with_metadata("provider", json!(receipt.provider))
            .with_metadata("latency_ms", json!(receipt.latency_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeType;
    use crate::utils::testing::RecordingProvider;

    fn node(config: Value, dispatcher: Arc<NotificationDispatcher>) -> NotificationNode {
        let spec = NodeSpec::new("notify", "notify", NodeType::Output)
            .with_config(config.as_object().unwrap().clone());
        NotificationNode::from_spec(&spec, dispatcher).unwrap()
    }

    fn dispatcher_with_memo() -> (Arc<NotificationDispatcher>, Arc<RecordingProvider>) {
        let dispatcher = Arc::new(NotificationDispatcher::new());
        let provider = Arc::new(RecordingProvider::new("memo"));
        dispatcher.register(provider.clone());
        (dispatcher, provider)
    }

    #[tokio::test]
    async fn template_renders_against_context_and_input() {
        let (dispatcher, provider) = dispatcher_with_memo();
        let node = node(
            json!({
                "providerType": "memo",
                "title": "report",
                "contentTemplate": "y=${ctx.y}",
            }),
            dispatcher,
        );
        let ctx = ExecutionContext::new("wf");
        ctx.set("y", json!(20));
        let result = node.execute(Value::Null, &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(provider.sent(), vec!["y=20".to_owned()]);
    }

    #[tokio::test]
    async fn missing_provider_is_a_notification_error() {
        let dispatcher = Arc::new(NotificationDispatcher::new());
        let node = node(
            json!({"providerType": "ghost", "contentTemplate": "x"}),
            dispatcher,
        );
        let ctx = ExecutionContext::new("wf");
        let err = node.execute(Value::Null, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "NOTIFICATION_ERROR");
    }

    #[tokio::test]
    async fn bad_message_type_fails_validation_and_execution() {
        let (dispatcher, _) = dispatcher_with_memo();
        let node = node(
            json!({
                "providerType": "memo",
                "contentTemplate": "x",
                "messageType": "CARRIER_PIGEON",
            }),
            dispatcher,
        );
        assert!(!node.validate().is_valid());
        let ctx = ExecutionContext::new("wf");
        let err = node.execute(Value::Null, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }
}
