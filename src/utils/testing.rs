//! Test fixtures shared by unit and integration tests: a mock
//! data-source plugin with lifecycle counters, recording/flaky
//! notification providers, a settable memory gauge, a canned workflow
//! invoker, and a sleep-capable script host.
//!
//! Lives in the library (not `#[cfg(test)]`) so integration tests in
//! `tests/` can use the same fixtures as in-module unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::engine::WorkflowExecutionResult;
use crate::model::Workflow;
use crate::node::ValidationReport;
use crate::notify::{NotificationMessage, NotificationProvider, NotifyError, ProviderProbe};
use crate::plugin::resources::MemoryGauge;
use crate::plugin::{
    Connection, DataSourcePlugin, ParameterSpec, ParameterType, PluginError, PluginInfo,
    TestReport,
};
use crate::reference::WorkflowInvoker;
use crate::script::{ExprHost, ScriptBindings, ScriptError, ScriptHost};
use crate::types::MessageType;
use crate::utils::collections::ValueMap;

// ============================================================================
// Plugin fixtures
// ============================================================================

/// Lifecycle counters shared between a [`MockSourcePlugin`] and the
/// test observing it.
#[derive(Debug, Default)]
pub struct MockCounters {
    initialize: AtomicU64,
    destroy: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
}

impl MockCounters {
    #[must_use]
    pub fn initialize_calls(&self) -> u64 {
        self.initialize.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn destroy_calls(&self) -> u64 {
        self.destroy.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-process data-source plugin returning a fixed payload, with
/// switches for the failure paths tests need.
pub struct MockSourcePlugin {
    info: PluginInfo,
    payload: Value,
    counters: Arc<MockCounters>,
    fail_initialize: bool,
    fail_read: bool,
    parameters: Vec<ParameterSpec>,
}

impl MockSourcePlugin {
    #[must_use]
    pub fn new(plugin_id: &str, payload: Value) -> Self {
        Self {
            info: PluginInfo::new(plugin_id, format!("{plugin_id} (mock)"))
                .with_version("1.0.0")
                .with_author("tests"),
            payload,
            counters: Arc::new(MockCounters::default()),
            fail_initialize: false,
            fail_read: false,
            parameters: Vec::new(),
        }
    }

    /// Shared handle to this plugin's lifecycle counters.
    #[must_use]
    pub fn counters(&self) -> Arc<MockCounters> {
        Arc::clone(&self.counters)
    }

    /// Make `initialize` fail.
    #[must_use]
    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Make every `read_data` fail after the connection opens.
    #[must_use]
    pub fn failing_read(mut self) -> Self {
        self.fail_read = true;
        self
    }

    /// Declare a required file-path parameter named `name`.
    #[must_use]
    pub fn requiring(mut self, name: &str) -> Self {
        self.parameters
            .push(ParameterSpec::new(name, ParameterType::FilePath).required());
        self
    }

    /// Declare a sensitive password parameter named `name`.
    #[must_use]
    pub fn with_password_param(mut self, name: &str) -> Self {
        self.parameters
            .push(ParameterSpec::new(name, ParameterType::Password).sensitive());
        self
    }
}

#[async_trait]
impl DataSourcePlugin for MockSourcePlugin {
    fn info(&self) -> PluginInfo {
        self.info.clone()
    }

    fn supported_parameters(&self) -> Vec<ParameterSpec> {
        self.parameters.clone()
    }

    async fn initialize(&self, _global_config: &Map<String, Value>) -> Result<(), PluginError> {
        self.counters.initialize.fetch_add(1, Ordering::SeqCst);
        if self.fail_initialize {
            return Err(PluginError::Initialize {
                message: "mock initialize failure".into(),
            });
        }
        Ok(())
    }

    async fn create_connection(
        &self,
        _config: &Map<String, Value>,
        _ctx: &ExecutionContext,
    ) -> Result<Box<dyn Connection>, PluginError> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            payload: self.payload.clone(),
            fail_read: self.fail_read,
            counters: Arc::clone(&self.counters),
            open: true,
        }))
    }

    async fn test_connection(
        &self,
        _config: &Map<String, Value>,
    ) -> Result<TestReport, PluginError> {
        Ok(TestReport {
            reachable: true,
            detail: "mock source is always reachable".into(),
            latency_ms: Some(0),
        })
    }

    async fn destroy(&self) -> Result<(), PluginError> {
        self.counters.destroy.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockConnection {
    payload: Value,
    fail_read: bool,
    counters: Arc<MockCounters>,
    open: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn read_data(&mut self, _ctx: &ExecutionContext) -> Result<Value, PluginError> {
        if self.fail_read {
            return Err(PluginError::Read {
                message: "mock read failure".into(),
            });
        }
        Ok(self.payload.clone())
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    fn connection_info(&self) -> String {
        "mock://fixture".into()
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        if self.open {
            self.open = false;
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ============================================================================
// Notification fixtures
// ============================================================================

/// Provider that records the content of every message it "delivers".
pub struct RecordingProvider {
    name: String,
    sent: Mutex<Vec<String>>,
}

impl RecordingProvider {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Contents delivered so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationProvider for RecordingProvider {
    fn provider_type(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _config: &Map<String, Value>) -> Result<(), NotifyError> {
        Ok(())
    }

    fn validate_configuration(&self, _config: &Map<String, Value>) -> ValidationReport {
        ValidationReport::ok()
    }

    async fn send(&self, message: &NotificationMessage) -> Result<Value, NotifyError> {
        self.sent.lock().push(message.content.clone());
        Ok(json!({"delivered": true}))
    }

    async fn test_connection(&self) -> Result<ProviderProbe, NotifyError> {
        Ok(ProviderProbe {
            healthy: true,
            detail: "recording provider".into(),
        })
    }

    async fn destroy(&self) -> Result<(), NotifyError> {
        Ok(())
    }

    fn supported_message_types(&self) -> Vec<MessageType> {
        vec![MessageType::Text]
    }
}

/// Provider whose every send fails.
pub struct FlakyProvider {
    name: String,
}

impl FlakyProvider {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

#[async_trait]
impl NotificationProvider for FlakyProvider {
    fn provider_type(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _config: &Map<String, Value>) -> Result<(), NotifyError> {
        Ok(())
    }

    fn validate_configuration(&self, _config: &Map<String, Value>) -> ValidationReport {
        ValidationReport::ok()
    }

    async fn send(&self, _message: &NotificationMessage) -> Result<Value, NotifyError> {
        Err(NotifyError::SendFailed {
            provider: self.name.clone(),
            message: "flaky provider always fails".into(),
        })
    }

    async fn test_connection(&self) -> Result<ProviderProbe, NotifyError> {
        Ok(ProviderProbe {
            healthy: false,
            detail: "flaky".into(),
        })
    }

    async fn destroy(&self) -> Result<(), NotifyError> {
        Ok(())
    }

    fn supported_message_types(&self) -> Vec<MessageType> {
        vec![MessageType::Text]
    }
}

// ============================================================================
// Resource / invoker / script fixtures
// ============================================================================

/// Settable memory gauge for eviction tests.
pub struct FixedGauge {
    value: Mutex<f64>,
}

impl FixedGauge {
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub fn set(&self, value: f64) {
        *self.value.lock() = value;
    }
}

impl MemoryGauge for FixedGauge {
    fn utilization(&self) -> f64 {
        *self.value.lock()
    }
}

/// Invoker returning a canned outcome, echoing the seed map back as
/// the callee's final context.
pub struct StaticInvoker {
    succeed: bool,
    invocations: Mutex<Vec<ValueMap>>,
}

impl StaticInvoker {
    #[must_use]
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            succeed: true,
            invocations: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            succeed: false,
            invocations: Mutex::new(Vec::new()),
        })
    }

    /// Seed maps of every invocation so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<ValueMap> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl WorkflowInvoker for StaticInvoker {
    async fn invoke(&self, workflow: Arc<Workflow>, initial: ValueMap) -> WorkflowExecutionResult {
        self.invocations.lock().push(initial.clone());
        if self.succeed {
            WorkflowExecutionResult::aggregate(
                Uuid::new_v4().to_string(),
                workflow.id(),
                &[],
                rustc_hash::FxHashMap::default(),
                initial,
            )
        } else {
            WorkflowExecutionResult::validation_failure(
                Uuid::new_v4().to_string(),
                workflow.id(),
                "static invoker failure",
            )
        }
    }
}

/// Expression host extended with `sleep <ms>` scripts, for timing
/// tests. Anything else delegates to [`ExprHost`].
pub struct SleepHost;

#[async_trait]
impl ScriptHost for SleepHost {
    async fn eval(
        &self,
        script: &str,
        bindings: &ScriptBindings<'_>,
    ) -> Result<Value, ScriptError> {
        if let Some(ms) = script.strip_prefix("sleep ") {
            let ms: u64 = ms.trim().parse().map_err(|_| ScriptError::Eval {
                message: format!("bad sleep duration '{ms}'"),
            })?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            return Ok(bindings.input().clone());
        }
        ExprHost.eval(script, bindings).await
    }
}

/// A log-style record for diagnosis tests.
#[must_use]
pub fn log_record(level: &str, module: &str, message: &str) -> Value {
    json!({"level": level, "module": module, "message": message})
}
