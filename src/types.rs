//! Core types for the flowloom dataflow engine.
//!
//! This module defines the closed vocabularies the engine is built on:
//! the node kinds a workflow may contain, the lifecycle states a
//! registered workflow moves through, and the execution modes a
//! reference node can invoke a sub-workflow with.
//!
//! For runtime types (execution ids, results), see [`crate::context`]
//! and [`crate::node`].
//!
//! # Examples
//!
//! ```rust
//! use flowloom::types::{NodeType, ExecutionMode};
//!
//! let kind = NodeType::parse("script").unwrap();
//! assert_eq!(kind, NodeType::Script);
//! assert_eq!(kind.as_str(), "script");
//!
//! let mode: ExecutionMode = "LOOP".parse().unwrap();
//! assert_eq!(mode, ExecutionMode::Loop);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies the kind of a node within a workflow.
///
/// The set is closed: the declarative document may only use these six
/// kinds, and the engine builds a concrete executor for each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Data ingress: seeds the execution context from literal config.
    Input,
    /// Data egress: renders a templated message and dispatches it
    /// through a notification provider.
    Output,
    /// Runs a user-supplied expression against context bindings.
    Script,
    /// Analyzes an input collection and emits a structured finding.
    Diagnosis,
    /// Delegates data acquisition to a registered data-source plugin.
    Plugin,
    /// Recursively invokes another workflow from the registry.
    Reference,
}

impl NodeType {
    /// The document spelling of this node type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Input => "input",
            NodeType::Output => "output",
            NodeType::Script => "script",
            NodeType::Diagnosis => "diagnosis",
            NodeType::Plugin => "plugin",
            NodeType::Reference => "reference",
        }
    }

    /// Parse a document spelling. Returns `None` for anything outside
    /// the closed set.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "input" => Some(NodeType::Input),
            "output" => Some(NodeType::Output),
            "script" => Some(NodeType::Script),
            "diagnosis" => Some(NodeType::Diagnosis),
            "plugin" => Some(NodeType::Plugin),
            "reference" => Some(NodeType::Reference),
            _ => None,
        }
    }

    /// All members of the closed set, in document order.
    #[must_use]
    pub fn all() -> [NodeType; 6] {
        [
            NodeType::Input,
            NodeType::Output,
            NodeType::Script,
            NodeType::Diagnosis,
            NodeType::Plugin,
            NodeType::Reference,
        ]
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a workflow in the workflow registry.
///
/// Only [`Active`](WorkflowStatus::Active) workflows are returned by
/// normal lookup; the other states exist so operators can park or
/// retire a workflow without deleting its history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    #[default]
    Active,
    Inactive,
    Deprecated,
    Draft,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Active => "ACTIVE",
            WorkflowStatus::Inactive => "INACTIVE",
            WorkflowStatus::Deprecated => "DEPRECATED",
            WorkflowStatus::Draft => "DRAFT",
        };
        f.write_str(s)
    }
}

/// How a reference node invokes its target workflow(s).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Invoke inline and block until the sub-workflow finishes.
    #[default]
    Sync,
    /// Invoke on a background task; optionally join with a timeout.
    Async,
    /// Invoke as `Sync` only when a context predicate holds.
    Conditional,
    /// Invoke once per element of a context collection.
    Loop,
    /// Invoke several target workflows concurrently.
    Parallel,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SYNC" => Ok(ExecutionMode::Sync),
            "ASYNC" => Ok(ExecutionMode::Async),
            "CONDITIONAL" => Ok(ExecutionMode::Conditional),
            "LOOP" => Ok(ExecutionMode::Loop),
            "PARALLEL" => Ok(ExecutionMode::Parallel),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Sync => "SYNC",
            ExecutionMode::Async => "ASYNC",
            ExecutionMode::Conditional => "CONDITIONAL",
            ExecutionMode::Loop => "LOOP",
            ExecutionMode::Parallel => "PARALLEL",
        };
        f.write_str(s)
    }
}

/// Body format of a notification message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Text,
    Html,
    Markdown,
    Json,
    Template,
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Ok(MessageType::Text),
            "HTML" => Ok(MessageType::Html),
            "MARKDOWN" => Ok(MessageType::Markdown),
            "JSON" => Ok(MessageType::Json),
            "TEMPLATE" => Ok(MessageType::Template),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Text => "TEXT",
            MessageType::Html => "HTML",
            MessageType::Markdown => "MARKDOWN",
            MessageType::Json => "JSON",
            MessageType::Template => "TEMPLATE",
        };
        f.write_str(s)
    }
}

/// Delivery priority of a notification message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "NORMAL" => Ok(Priority::Normal),
            "HIGH" => Ok(Priority::High),
            "URGENT" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        };
        f.write_str(s)
    }
}

/// The fixed analysis algorithms a diagnosis node can run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisType {
    /// Count ERROR/FATAL records and group them by module.
    ErrorDetection,
    /// Surface the most frequently repeated messages.
    PatternAnalysis,
    /// Flag numeric values beyond three standard deviations of the mean.
    AnomalyDetection,
    /// Partition records by a slow-threshold on their `value`.
    PerformanceAnalysis,
}

impl FromStr for DiagnosisType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error_detection" => Ok(DiagnosisType::ErrorDetection),
            "pattern_analysis" => Ok(DiagnosisType::PatternAnalysis),
            "anomaly_detection" => Ok(DiagnosisType::AnomalyDetection),
            "performance_analysis" => Ok(DiagnosisType::PerformanceAnalysis),
            other => Err(format!("unknown diagnosis type: {other}")),
        }
    }
}

impl fmt::Display for DiagnosisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosisType::ErrorDetection => "error_detection",
            DiagnosisType::PatternAnalysis => "pattern_analysis",
            DiagnosisType::AnomalyDetection => "anomaly_detection",
            DiagnosisType::PerformanceAnalysis => "performance_analysis",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_round_trips_through_str() {
        for kind in NodeType::all() {
            assert_eq!(NodeType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeType::parse("webhook"), None);
    }

    #[test]
    fn execution_mode_parse_is_case_insensitive() {
        assert_eq!("sync".parse::<ExecutionMode>().unwrap(), ExecutionMode::Sync);
        assert_eq!(
            "Parallel".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::Parallel
        );
        assert!("STREAMING".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn priority_orders_by_urgency() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::High < Priority::Urgent);
    }

    #[test]
    fn diagnosis_type_uses_snake_case_spelling() {
        assert_eq!(
            "performance_analysis".parse::<DiagnosisType>().unwrap(),
            DiagnosisType::PerformanceAnalysis
        );
        assert_eq!(DiagnosisType::ErrorDetection.to_string(), "error_detection");
    }
}
