//! Console notification provider: the in-crate reference transport.
//!
//! Writes messages to stdout and keeps the last few in memory so tests
//! and local runs can assert on delivered content.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::{NotificationMessage, NotificationProvider, NotifyError, ProviderProbe};
use crate::node::ValidationReport;
use crate::types::MessageType;

/// How many delivered messages the provider retains for inspection.
const RETAINED: usize = 32;

/// Stdout-backed provider supporting TEXT, MARKDOWN, and JSON bodies.
#[derive(Debug, Default)]
pub struct ConsoleProvider {
    delivered: Mutex<Vec<NotificationMessage>>,
}

impl ConsoleProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The retained tail of delivered messages, oldest first.
    #[must_use]
    pub fn delivered(&self) -> Vec<NotificationMessage> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl NotificationProvider for ConsoleProvider {
    fn provider_type(&self) -> &str {
        "console"
    }

    async fn initialize(&self, _config: &Map<String, Value>) -> Result<(), NotifyError> {
        Ok(())
    }

    fn validate_configuration(&self, config: &Map<String, Value>) -> ValidationReport {
        let mut report = ValidationReport::ok();
        if let Some(colored) = config.get("colored") {
            if !colored.is_boolean() {
                report.error("providerConfig.colored", "must be a boolean");
            }
        }
        report
    }

    async fn send(&self, message: &NotificationMessage) -> Result<Value, NotifyError> {
        let rendered = match message.message_type {
            MessageType::Json => serde_json::to_string(message).map_err(|e| {
                NotifyError::SendFailed {
                    provider: "console".into(),
                    message: e.to_string(),
                }
            })?,
            _ => format!("[{}] {}: {}", message.priority, message.title, message.content),
        };
        println!("{rendered}");

        let mut delivered = self.delivered.lock();
        if delivered.len() == RETAINED {
            delivered.remove(0);
        }
        delivered.push(message.clone());

        Ok(json!({"rendered_bytes": rendered.len()}))
    }

    async fn test_connection(&self) -> Result<ProviderProbe, NotifyError> {
        Ok(ProviderProbe {
            healthy: true,
            detail: "stdout is always reachable".into(),
        })
    }

    async fn destroy(&self) -> Result<(), NotifyError> {
        self.delivered.lock().clear();
        Ok(())
    }

    fn supported_message_types(&self) -> Vec<MessageType> {
        vec![MessageType::Text, MessageType::Markdown, MessageType::Json]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn console_retains_delivered_messages() {
        let provider = ConsoleProvider::new();
        let message = NotificationMessage::new("title", "body");
        provider.send(&message).await.unwrap();
        let delivered = provider.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].content, "body");
    }

    #[tokio::test]
    async fn html_is_not_supported() {
        let provider = ConsoleProvider::new();
        assert!(!provider
            .supported_message_types()
            .contains(&MessageType::Html));
    }

    #[test]
    fn colored_flag_must_be_boolean() {
        let provider = ConsoleProvider::new();
        let mut config = Map::new();
        config.insert("colored".into(), Value::String("yes".into()));
        assert!(!provider.validate_configuration(&config).is_valid());
    }
}
