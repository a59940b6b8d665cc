//! Node execution contract for the flowloom engine.
//!
//! This module provides the shared operation surface every node kind
//! implements: the [`Node`] trait (validate / execute / destroy), the
//! per-node result record, the validation report shape, and the node
//! error taxonomy with its stable user-facing codes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::utils::collections::ValueMap;

// ============================================================================
// Core Trait
// ============================================================================

/// A single unit of work within a workflow.
///
/// Implementations are built once from a node's declarative config and
/// then driven by the scheduler:
///
/// - [`validate`](Node::validate) is pure: it inspects config only and
///   reports problems as field-scoped errors and warnings.
/// - [`execute`](Node::execute) does the work. It receives the resolved
///   `input` payload (see [`crate::inputs`]) and the shared execution
///   context. Errors returned here are caught by the scheduler and
///   converted into failure results; they never abort the workflow.
/// - [`destroy`](Node::destroy) is optional teardown for nodes holding
///   long-lived handles.
///
/// Duration is measured by the scheduler, not the node.
#[async_trait]
pub trait Node: Send + Sync {
    /// Validate this node's configuration without touching any context.
    fn validate(&self) -> ValidationReport;

    /// Execute this node against the shared context.
    async fn execute(
        &self,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError>;

    /// Tear down any long-lived resources. Default: nothing to do.
    async fn destroy(&self) {}
}

// ============================================================================
// Validation
// ============================================================================

/// One validation finding, anchored to a config field path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dotted path of the offending field (e.g. `config.outputKey`).
    pub field: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Outcome of validating a node or workflow: errors block execution,
/// warnings are advisory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// An empty (passing) report.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Record an error against a field.
    pub fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue::new(field, message));
    }

    /// Record a warning against a field.
    pub fn warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue::new(field, message));
    }

    /// Whether the subject passed validation (warnings do not fail).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// One-line summary of all errors, for workflow-level messages.
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|issue| format!("{}: {}", issue.field, issue.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of a single node execution.
///
/// The scheduler records one of these per node, whether the node ran,
/// was skipped (disabled), or was gated out by a failed predecessor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub success: bool,
    /// Whether the node's `execute` actually ran. Synthetic results
    /// (disabled skip, predecessor gate) leave this false.
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The node's output payload, if any. Also written to the context
    /// under the node's output key when one is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Free-form counters and markers (`skipped`, record counts, ...).
    #[serde(default)]
    pub metadata: ValueMap,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl NodeExecutionResult {
    /// A passing result with no payload.
    #[must_use]
    pub fn success(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            success: true,
            executed: true,
            message: None,
            output: None,
            metadata: ValueMap::default(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// A failing result carrying a human message.
    #[must_use]
    pub fn failure(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            success: false,
            executed: true,
            message: Some(message.into()),
            output: None,
            metadata: ValueMap::default(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// A synthetic success for a disabled node: never executed, zero
    /// duration, `skipped=true` in metadata.
    #[must_use]
    pub fn skipped(node_id: impl Into<String>) -> Self {
        let mut result = Self::success(node_id);
        result.executed = false;
        result
            .metadata
            .insert("skipped".into(), Value::Bool(true));
        result
    }

    /// A synthetic failure for a node whose predecessor did not
    /// succeed. Not executed, no side effects.
    #[must_use]
    pub fn predecessor_failed(node_id: impl Into<String>, predecessor: &str) -> Self {
        let mut result = Self::failure(
            node_id,
            format!("predecessor failed: {predecessor}"),
        );
        result.executed = false;
        result
            .metadata
            .insert("code".into(), Value::String("PREDECESSOR_FAILED".into()));
        result
    }

    /// Attach an informational message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach the node's output payload.
    #[must_use]
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during node execution.
///
/// Every variant maps to a stable code (see [`NodeError::code`]) that
/// survives into failure messages so operators can match on it.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// A required input slot was absent from the context.
    #[error("missing input: {key}")]
    #[diagnostic(
        code(flowloom::node::missing_input),
        help("Check that an upstream node writes '{key}' before this node runs.")
    )]
    MissingInput { key: String },

    /// Multi-input resolution failed before the node could run.
    #[error("input resolution failed: {message}")]
    #[diagnostic(code(flowloom::node::input_resolution))]
    InputResolution { message: String },

    /// The node's configuration is unusable at execution time.
    #[error("invalid config: {message}")]
    #[diagnostic(code(flowloom::node::invalid_config))]
    InvalidConfig { message: String },

    /// The script host reported a syntax or runtime error.
    #[error("script error: {message}")]
    #[diagnostic(code(flowloom::node::script))]
    Script { message: String },

    /// A diagnosis precondition failed (missing or malformed input).
    #[error("diagnosis error: {message}")]
    #[diagnostic(code(flowloom::node::diagnosis))]
    Diagnosis { message: String },

    /// The requested plugin is not registered.
    #[error("plugin not found: {plugin}")]
    #[diagnostic(
        code(flowloom::node::plugin_not_found),
        help("Register the plugin or fix the node's pluginType.")
    )]
    PluginNotFound { plugin: String },

    /// The plugin could not open a connection.
    #[error("connection failed: {message}")]
    #[diagnostic(code(flowloom::node::connection_failed))]
    ConnectionFailed { message: String },

    /// The plugin connection failed while reading data.
    #[error("read failed: {message}")]
    #[diagnostic(code(flowloom::node::read_failed))]
    ReadFailed { message: String },

    /// The notification provider rejected or failed the dispatch.
    #[error("notification error: {message}")]
    #[diagnostic(code(flowloom::node::notification))]
    Notification { message: String },

    /// A reference target workflow was absent or not active.
    #[error("workflow not found: {workflow}")]
    #[diagnostic(code(flowloom::node::workflow_not_found))]
    WorkflowNotFound { workflow: String },

    /// Invoking the reference target would close a dependency cycle.
    #[error("circular workflow dependency: {workflow}")]
    #[diagnostic(
        code(flowloom::node::circular_dependency),
        help("Break the reference cycle between these workflows.")
    )]
    CircularDependency { workflow: String },

    /// A sub-workflow invocation exceeded its timeout.
    #[error("timed out after {millis} ms")]
    #[diagnostic(code(flowloom::node::timeout))]
    Timeout { millis: u64 },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(flowloom::node::serde_json))]
    Serde(#[from] serde_json::Error),
}

impl NodeError {
    /// The stable code operators can match on in failure messages.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            NodeError::MissingInput { .. } => "MISSING_INPUT",
            NodeError::InputResolution { .. } => "INPUT_RESOLUTION",
            NodeError::InvalidConfig { .. } => "INVALID_CONFIG",
            NodeError::Script { .. } => "SCRIPT_ERROR",
            NodeError::Diagnosis { .. } => "DIAGNOSIS_ERROR",
            NodeError::PluginNotFound { .. } => "PLUGIN_NOT_FOUND",
            NodeError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            NodeError::ReadFailed { .. } => "READ_FAILED",
            NodeError::Notification { .. } => "NOTIFICATION_ERROR",
            NodeError::WorkflowNotFound { .. } => "WORKFLOW_NOT_FOUND",
            NodeError::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            NodeError::Timeout { .. } => "TIMEOUT",
            NodeError::Serde(_) => "SERDE_ERROR",
        }
    }

    /// Convert this error into the failure result the scheduler records.
    #[must_use]
    pub fn into_result(self, node_id: &str) -> NodeExecutionResult {
        let mut result =
            NodeExecutionResult::failure(node_id, format!("[{}] {}", self.code(), self));
        result
            .metadata
            .insert("code".into(), Value::String(self.code().into()));
        if let NodeError::InputResolution { .. } = self {
            result
                .metadata
                .insert("phase".into(), Value::String("input-resolution".into()));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn skipped_results_are_marked_and_unexecuted() {
        let r = NodeExecutionResult::skipped("n1");
        assert!(r.success);
        assert!(!r.executed);
        assert_eq!(r.metadata.get("skipped"), Some(&json!(true)));
        assert_eq!(r.duration_ms, 0);
    }

    #[test]
    fn predecessor_failure_is_synthetic() {
        let r = NodeExecutionResult::predecessor_failed("b", "a");
        assert!(!r.success);
        assert!(!r.executed);
        assert!(r.message.unwrap().contains("a"));
    }

    #[test]
    fn error_results_carry_stable_codes() {
        let err = NodeError::PluginNotFound {
            plugin: "csv".into(),
        };
        assert_eq!(err.code(), "PLUGIN_NOT_FOUND");
        let result = err.into_result("p1");
        assert!(result.message.unwrap().starts_with("[PLUGIN_NOT_FOUND]"));
    }

    #[test]
    fn input_resolution_errors_record_their_phase() {
        let err = NodeError::InputResolution {
            message: "required slot 'x' missing".into(),
        };
        let result = err.into_result("n");
        assert_eq!(
            result.metadata.get("phase"),
            Some(&json!("input-resolution"))
        );
    }

    #[test]
    fn validation_report_merges_and_summarizes() {
        let mut report = ValidationReport::ok();
        report.error("config.outputKey", "must not be empty");
        let mut other = ValidationReport::ok();
        other.warning("config.timeout", "very large");
        report.merge(other);
        assert!(!report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.summary().contains("outputKey"));
    }
}
