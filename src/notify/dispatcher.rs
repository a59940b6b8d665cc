//! The process-wide notification dispatcher.
//!
//! Holds the provider registry and runs the dispatch pipeline for
//! every notification node: validate provider config → check the
//! message type against the provider's supported set → send → record
//! metrics → return a receipt.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::{NotificationMessage, NotificationProvider, NotifyError, ProviderProbe};

/// Outcome of a successful dispatch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub provider: String,
    pub message_id: String,
    pub latency_ms: u64,
    /// Provider-specific detail returned from `send`.
    pub detail: Value,
}

/// Point-in-time metrics for one provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetricsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub average_latency_ms: f64,
}

#[derive(Debug, Default)]
struct ProviderMetrics {
    attempts: u64,
    successes: u64,
    failures: u64,
    total_latency_ms: u64,
}

impl ProviderMetrics {
    fn snapshot(&self) -> ProviderMetricsSnapshot {
        ProviderMetricsSnapshot {
            attempts: self.attempts,
            successes: self.successes,
            failures: self.failures,
            average_latency_ms: if self.successes == 0 {
                0.0
            } else {
                self.total_latency_ms as f64 / self.successes as f64
            },
        }
    }
}

/// Provider registry plus dispatch pipeline. One per process; the
/// engine takes it as an explicit dependency.
pub struct NotificationDispatcher {
    providers: RwLock<FxHashMap<String, Arc<dyn NotificationProvider>>>,
    metrics: RwLock<FxHashMap<String, ProviderMetrics>>,
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(FxHashMap::default()),
            metrics: RwLock::new(FxHashMap::default()),
        }
    }

    /// Register a provider under its `provider_type`. Later
    /// registrations replace earlier ones.
    pub fn register(&self, provider: Arc<dyn NotificationProvider>) {
        let key = provider.provider_type().to_owned();
        debug!(provider = %key, "registering notification provider");
        self.providers.write().insert(key, provider);
    }

    /// Remove a provider, calling its `destroy`.
    pub async fn unregister(&self, provider_type: &str) -> Result<(), NotifyError> {
        let removed = self.providers.write().remove(provider_type);
        match removed {
            Some(provider) => provider.destroy().await,
            None => Err(NotifyError::ProviderNotFound {
                provider: provider_type.to_owned(),
            }),
        }
    }

    /// Look up a provider by type.
    #[must_use]
    pub fn provider(&self, provider_type: &str) -> Option<Arc<dyn NotificationProvider>> {
        self.providers.read().get(provider_type).cloned()
    }

    /// Registered provider types.
    #[must_use]
    pub fn provider_types(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    /// Run the full dispatch pipeline for one message.
    pub async fn dispatch(
        &self,
        provider_type: &str,
        provider_config: &Map<String, Value>,
        message: &NotificationMessage,
    ) -> Result<DispatchReceipt, NotifyError> {
        let provider =
            self.provider(provider_type)
                .ok_or_else(|| NotifyError::ProviderNotFound {
                    provider: provider_type.to_owned(),
                })?;

        let report = provider.validate_configuration(provider_config);
        if !report.is_valid() {
            return Err(NotifyError::InvalidConfiguration {
                summary: report.summary(),
            });
        }

        if !provider
            .supported_message_types()
            .contains(&message.message_type)
        {
            return Err(NotifyError::UnsupportedMessageType {
                provider: provider_type.to_owned(),
                message_type: message.message_type,
            });
        }

        let start = Instant::now();
        let outcome = provider.send(message).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        self.record(provider_type, outcome.is_ok(), latency_ms);

        match outcome {
            Ok(detail) => Ok(DispatchReceipt {
                provider: provider_type.to_owned(),
                message_id: message.message_id.clone(),
                latency_ms,
                detail,
            }),
            Err(err) => {
                warn!(provider = %provider_type, error = %err, "notification send failed");
                Err(err)
            }
        }
    }

    /// Probe a provider's connectivity (config tooling path).
    pub async fn test_connection(&self, provider_type: &str) -> Result<ProviderProbe, NotifyError> {
        let provider =
            self.provider(provider_type)
                .ok_or_else(|| NotifyError::ProviderNotFound {
                    provider: provider_type.to_owned(),
                })?;
        provider.test_connection().await
    }

    /// Metrics for one provider, if it has been dispatched to.
    #[must_use]
    pub fn metrics(&self, provider_type: &str) -> Option<ProviderMetricsSnapshot> {
        self.metrics
            .read()
            .get(provider_type)
            .map(ProviderMetrics::snapshot)
    }

    fn record(&self, provider_type: &str, success: bool, latency_ms: u64) {
        let mut metrics = self.metrics.write();
        let entry = metrics.entry(provider_type.to_owned()).or_default();
        entry.attempts += 1;
        if success {
            entry.successes += 1;
            entry.total_latency_ms += latency_ms;
        } else {
            entry.failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;
    use crate::utils::testing::{FlakyProvider, RecordingProvider};

    #[tokio::test]
    async fn dispatch_reaches_the_provider_and_records_metrics() {
        let dispatcher = NotificationDispatcher::new();
        let provider = Arc::new(RecordingProvider::new("memo"));
        dispatcher.register(provider.clone());

        let message = NotificationMessage::new("t", "hello");
        let receipt = dispatcher
            .dispatch("memo", &Map::new(), &message)
            .await
            .unwrap();
        assert_eq!(receipt.provider, "memo");
        assert_eq!(provider.sent(), vec!["hello".to_owned()]);

        let metrics = dispatcher.metrics("memo").unwrap();
        assert_eq!(metrics.attempts, 1);
        assert_eq!(metrics.successes, 1);
    }

    #[tokio::test]
    async fn unknown_provider_is_an_error() {
        let dispatcher = NotificationDispatcher::new();
        let message = NotificationMessage::new("t", "c");
        let err = dispatcher
            .dispatch("ghost", &Map::new(), &message)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::ProviderNotFound { .. }));
    }

    #[tokio::test]
    async fn unsupported_message_type_is_rejected_before_send() {
        let dispatcher = NotificationDispatcher::new();
        let provider = Arc::new(RecordingProvider::new("memo"));
        dispatcher.register(provider.clone());

        let message = NotificationMessage::new("t", "c").with_type(MessageType::Html);
        let err = dispatcher
            .dispatch("memo", &Map::new(), &message)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::UnsupportedMessageType { .. }));
        assert!(provider.sent().is_empty());
    }

    #[tokio::test]
    async fn failures_count_against_metrics() {
        let dispatcher = NotificationDispatcher::new();
        dispatcher.register(Arc::new(FlakyProvider::new("flaky")));

        let message = NotificationMessage::new("t", "c");
        let _ = dispatcher.dispatch("flaky", &Map::new(), &message).await;
        let metrics = dispatcher.metrics("flaky").unwrap();
        assert_eq!(metrics.attempts, 1);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.average_latency_ms, 0.0);
    }
}
