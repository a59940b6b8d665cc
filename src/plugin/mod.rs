//! The plugin runtime: data-source plugins, their lifecycle, isolation,
//! scanning, and resource management.
//!
//! A plugin supplies data to plugin nodes through short-lived
//! [`Connection`]s. Plugins enter the process two ways: in-process
//! registration (compiled into the host) or loading from an archive on
//! disk (a directory holding an SPI descriptor, a shared library, and
//! an optional manifest). Archive plugins get an isolated
//! [`SymbolSpace`](isolation::SymbolSpace) and pass a structural
//! security scan before registration.
//!
//! Lifecycle contract, enforced by the
//! [`PluginRegistry`](registry::PluginRegistry):
//! discover → scan → `initialize` → (validate / connect / read)* →
//! `destroy`. `initialize` and `destroy` are serialized per plugin;
//! everything between them must tolerate concurrent callers.

pub mod artifacts;
pub mod isolation;
pub mod loader;
pub mod manifest;
pub mod params;
pub mod registry;
pub mod resources;
pub mod scan;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::node::ValidationReport;

pub use isolation::{HostExports, SymbolSpace};
pub use loader::PluginArchive;
pub use manifest::PluginManifest;
pub use params::{ParameterSpec, ParameterType};
pub use registry::{PluginRegistry, PluginUsage};
pub use resources::{MemoryGauge, PluginResourceManager, ResourceManagerConfig};
pub use scan::{ScanFinding, ScanReport, Severity};

/// Self-reported identity of a plugin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
}

impl PluginInfo {
    #[must_use]
    pub fn new(plugin_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            name: name.into(),
            version: "0.0.0".into(),
            author: String::new(),
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Result of a plugin's out-of-band connection probe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestReport {
    pub reachable: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// One page of a paged read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<Value>,
    pub page_number: usize,
    pub has_more: bool,
}

/// Errors from plugin implementations and the registry.
#[derive(Debug, Error, Diagnostic)]
pub enum PluginError {
    #[error("plugin not found: {plugin_id}")]
    #[diagnostic(code(flowloom::plugin::not_found))]
    NotFound { plugin_id: String },

    #[error("plugin '{plugin_id}' is already registered")]
    #[diagnostic(code(flowloom::plugin::duplicate))]
    Duplicate { plugin_id: String },

    #[error("plugin initialization failed: {message}")]
    #[diagnostic(code(flowloom::plugin::initialize))]
    Initialize { message: String },

    #[error("plugin configuration invalid: {summary}")]
    #[diagnostic(code(flowloom::plugin::invalid_config))]
    InvalidConfig { summary: String },

    #[error("connection failed: {message}")]
    #[diagnostic(code(flowloom::plugin::connection))]
    Connection { message: String },

    #[error("read failed: {message}")]
    #[diagnostic(code(flowloom::plugin::read))]
    Read { message: String },

    #[error("operation not supported: {operation}")]
    #[diagnostic(code(flowloom::plugin::unsupported))]
    Unsupported { operation: String },

    #[error("plugin destroy failed: {message}")]
    #[diagnostic(code(flowloom::plugin::destroy))]
    Destroy { message: String },

    #[error("security scan rejected plugin: {summary}")]
    #[diagnostic(
        code(flowloom::plugin::scan_rejected),
        help("Inspect the scan findings; CRITICAL findings block registration.")
    )]
    ScanRejected { summary: String },

    #[error(transparent)]
    #[diagnostic(code(flowloom::plugin::load))]
    Load(#[from] loader::LoadError),
}

/// A data-source plugin.
///
/// One instance serves the whole process; connections are the per-read
/// scoped resource. `validate_config`, `create_connection`, and
/// `test_connection` may be called concurrently.
#[async_trait]
pub trait DataSourcePlugin: Send + Sync {
    /// Identity and display metadata.
    fn info(&self) -> PluginInfo;

    /// The parameters this plugin accepts, used for config validation
    /// and operator artifact generation.
    fn supported_parameters(&self) -> Vec<ParameterSpec>;

    /// One-time setup with the registry's global configuration.
    async fn initialize(&self, global_config: &Map<String, Value>) -> Result<(), PluginError>;

    /// Validate a node's plugin config block (defaults to checking the
    /// declared parameters).
    fn validate_config(&self, config: &Map<String, Value>) -> ValidationReport {
        params::validate_against(&self.supported_parameters(), config)
    }

    /// Open a connection for a single read operation.
    async fn create_connection(
        &self,
        config: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Box<dyn Connection>, PluginError>;

    /// Out-of-band connectivity probe.
    async fn test_connection(&self, config: &Map<String, Value>) -> Result<TestReport, PluginError>;

    /// Optional data schema for editors.
    fn schema(&self, _config: &Map<String, Value>) -> Option<Value> {
        None
    }

    /// Declared runtime dependencies (informational; scanned for
    /// suspicious names at registration).
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Final teardown before the plugin leaves the registry.
    async fn destroy(&self) -> Result<(), PluginError>;
}

/// A scoped read resource owned by exactly one plugin node execution.
///
/// The owner must call [`close`](Connection::close) on every exit path;
/// the plugin node does so for both success and failure.
#[async_trait]
pub trait Connection: Send {
    /// Read the payload this connection was opened for.
    async fn read_data(&mut self, ctx: &ExecutionContext) -> Result<Value, PluginError>;

    /// Optional paged read.
    async fn read_paged(&mut self, _page_size: usize, _page_number: usize) -> Result<Page, PluginError> {
        Err(PluginError::Unsupported {
            operation: "read_paged".into(),
        })
    }

    /// Optional streaming read delivering records one at a time;
    /// returns the record count.
    async fn read_stream(
        &mut self,
        _on_record: &mut (dyn FnMut(Value) + Send),
    ) -> Result<usize, PluginError> {
        Err(PluginError::Unsupported {
            operation: "read_stream".into(),
        })
    }

    /// Whether the connection is still usable.
    fn is_connected(&self) -> bool;

    /// Human-readable description of the endpoint.
    fn connection_info(&self) -> String;

    /// Release the underlying resource. Idempotent.
    async fn close(&mut self) -> Result<(), PluginError>;
}
