//! Notification dispatch: providers, the message wire shape, and the
//! templated dispatcher used by output nodes.
//!
//! Providers are process-wide: registered once on the
//! [`NotificationDispatcher`](dispatcher::NotificationDispatcher) and
//! shared by every notification node. The crate ships a console
//! provider as the reference implementation; real transports (email,
//! chat webhooks) implement [`NotificationProvider`] out of crate.

pub mod console;
pub mod dispatcher;
pub mod template;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::node::ValidationReport;
use crate::types::{MessageType, Priority};
use crate::utils::collections::ValueMap;

pub use console::ConsoleProvider;
pub use dispatcher::{DispatchReceipt, NotificationDispatcher, ProviderMetricsSnapshot};

/// The wire shape of a notification message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// Opaque unique id, assigned at construction.
    pub message_id: String,
    pub title: String,
    pub content: String,
    pub message_type: MessageType,
    pub priority: Priority,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub cc_recipients: Vec<String>,
    /// Template variables already applied; kept for provider-side
    /// re-rendering (TEMPLATE message type).
    #[serde(default)]
    pub variables: ValueMap,
    #[serde(default)]
    pub metadata: ValueMap,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Attachment name → path.
    #[serde(default)]
    pub attachments: ValueMap,
}

impl NotificationMessage {
    /// Create a message with defaults (TEXT, NORMAL, fresh id).
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            message_type: MessageType::default(),
            priority: Priority::default(),
            recipients: Vec::new(),
            cc_recipients: Vec::new(),
            variables: ValueMap::default(),
            metadata: ValueMap::default(),
            created_at: Utc::now(),
            schedule_time: None,
            template_id: None,
            attachments: ValueMap::default(),
        }
    }

    #[must_use]
    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }
}

/// Errors from providers and the dispatcher.
#[derive(Debug, Error, Diagnostic)]
pub enum NotifyError {
    /// No provider registered under the requested type.
    #[error("notification provider not found: {provider}")]
    #[diagnostic(code(flowloom::notify::provider_not_found))]
    ProviderNotFound { provider: String },

    /// The provider rejected its configuration.
    #[error("invalid provider configuration: {summary}")]
    #[diagnostic(code(flowloom::notify::invalid_config))]
    InvalidConfiguration { summary: String },

    /// The message type is outside the provider's supported set.
    #[error("provider '{provider}' does not support message type {message_type}")]
    #[diagnostic(code(flowloom::notify::unsupported_message_type))]
    UnsupportedMessageType {
        provider: String,
        message_type: MessageType,
    },

    /// The send itself failed.
    #[error("send failed via '{provider}': {message}")]
    #[diagnostic(code(flowloom::notify::send_failed))]
    SendFailed { provider: String, message: String },

    /// Template interpolation failed.
    #[error("template error: {message}")]
    #[diagnostic(code(flowloom::notify::template))]
    Template { message: String },
}

/// Result of a provider-specific connectivity probe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderProbe {
    pub healthy: bool,
    pub detail: String,
}

/// A notification transport.
///
/// Implementations must be safe to share: one instance serves every
/// notification node in the process.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Stable identifier (`console`, `email`, ...), matched against the
    /// node's `providerType`.
    fn provider_type(&self) -> &str;

    /// One-time setup with the provider-wide configuration.
    async fn initialize(&self, config: &Map<String, Value>) -> Result<(), NotifyError>;

    /// Validate a node's provider-specific config block.
    fn validate_configuration(&self, config: &Map<String, Value>) -> ValidationReport;

    /// Deliver a message. Returns provider-specific detail for the
    /// receipt.
    async fn send(&self, message: &NotificationMessage) -> Result<Value, NotifyError>;

    /// Out-of-band connectivity probe for config tooling.
    async fn test_connection(&self) -> Result<ProviderProbe, NotifyError>;

    /// Tear down any transport state.
    async fn destroy(&self) -> Result<(), NotifyError>;

    /// The message types this provider can render.
    fn supported_message_types(&self) -> Vec<MessageType>;
}
