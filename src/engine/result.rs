//! Workflow-level execution results and statistics.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::node::NodeExecutionResult;
use crate::utils::collections::ValueMap;

/// Aggregate statistics computed from the node results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_nodes: usize,
    pub succeeded_nodes: usize,
    pub failed_nodes: usize,
    /// Mean duration over nodes that actually executed.
    pub average_node_duration_ms: f64,
}

/// The outcome of one workflow execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    pub execution_id: String,
    pub workflow_id: String,
    /// Conjunction over all recorded node results.
    pub success: bool,
    /// Summary of the first failure in topological order, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub node_results: FxHashMap<String, NodeExecutionResult>,
    /// Final snapshot of the execution context.
    pub context: ValueMap,
    pub stats: ExecutionStats,
}

impl WorkflowExecutionResult {
    /// Aggregate node results into the workflow-level outcome.
    ///
    /// `order` is the topological order; the first failing node in it
    /// supplies the workflow message.
    #[must_use]
    pub fn aggregate(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        order: &[String],
        node_results: FxHashMap<String, NodeExecutionResult>,
        context: ValueMap,
    ) -> Self {
        let success = node_results.values().all(|r| r.success);
        let message = order
            .iter()
            .filter_map(|id| node_results.get(id))
            .find(|r| !r.success)
            .map(|r| {
                format!(
                    "node '{}' failed: {}",
                    r.node_id,
                    r.message.as_deref().unwrap_or("no detail")
                )
            });

        let executed: Vec<&NodeExecutionResult> =
            node_results.values().filter(|r| r.executed).collect();
        let average_node_duration_ms = if executed.is_empty() {
            0.0
        } else {
            executed.iter().map(|r| r.duration_ms as f64).sum::<f64>() / executed.len() as f64
        };

        let stats = ExecutionStats {
            total_nodes: node_results.len(),
            succeeded_nodes: node_results.values().filter(|r| r.success).count(),
            failed_nodes: node_results.values().filter(|r| !r.success).count(),
            average_node_duration_ms,
        };

        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            success,
            message,
            node_results,
            context,
            stats,
        }
    }

    /// A workflow-level failure with zero node results (pre-flight
    /// validation).
    #[must_use]
    pub fn validation_failure(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            success: false,
            message: Some(message.into()),
            node_results: FxHashMap::default(),
            context: ValueMap::default(),
            stats: ExecutionStats::default(),
        }
    }

    /// Result for one node, if recorded.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&NodeExecutionResult> {
        self.node_results.get(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(pairs: &[(&str, bool)]) -> FxHashMap<String, NodeExecutionResult> {
        pairs
            .iter()
            .map(|(id, ok)| {
                let r = if *ok {
                    NodeExecutionResult::success(*id)
                } else {
                    NodeExecutionResult::failure(*id, "boom")
                };
                ((*id).to_owned(), r)
            })
            .collect()
    }

    #[test]
    fn success_is_the_conjunction() {
        let order = vec!["a".to_owned(), "b".to_owned()];
        let ok = WorkflowExecutionResult::aggregate(
            "e1",
            "wf",
            &order,
            results(&[("a", true), ("b", true)]),
            ValueMap::default(),
        );
        assert!(ok.success);
        assert!(ok.message.is_none());

        let bad = WorkflowExecutionResult::aggregate(
            "e2",
            "wf",
            &order,
            results(&[("a", true), ("b", false)]),
            ValueMap::default(),
        );
        assert!(!bad.success);
        assert!(bad.message.unwrap().contains("'b'"));
    }

    #[test]
    fn message_names_the_first_failure_in_order() {
        let order = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let result = WorkflowExecutionResult::aggregate(
            "e",
            "wf",
            &order,
            results(&[("a", true), ("b", false), ("c", false)]),
            ValueMap::default(),
        );
        assert!(result.message.unwrap().contains("'b'"));
    }

    #[test]
    fn stats_count_by_outcome() {
        let order = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let result = WorkflowExecutionResult::aggregate(
            "e",
            "wf",
            &order,
            results(&[("a", true), ("b", false), ("c", true)]),
            ValueMap::default(),
        );
        assert_eq!(result.stats.total_nodes, 3);
        assert_eq!(result.stats.succeeded_nodes, 2);
        assert_eq!(result.stats.failed_nodes, 1);
    }

    #[test]
    fn validation_failure_has_zero_node_results() {
        let result = WorkflowExecutionResult::validation_failure("e", "wf", "bad config");
        assert!(!result.success);
        assert!(result.node_results.is_empty());
        assert_eq!(result.stats.total_nodes, 0);
    }
}
