//! Per-execution shared state for workflow runs.
//!
//! Every top-level workflow invocation gets one [`ExecutionContext`]:
//! an identity (workflow id + fresh execution id) plus a thread-safe
//! keyed map of opaque JSON values that nodes read and write as their
//! communication medium. Sub-workflow invocations never share a
//! context; the reference executor seeds a fresh one from its input
//! mappings and copies mapped slots back afterwards.
//!
//! # Concurrency
//!
//! `get`/`set`/`remove` are atomic per key. Sibling nodes writing the
//! same key race to a last-writer-wins outcome; workflows that need an
//! ordering must encode it as an edge.
//!
//! # Examples
//!
//! ```rust
//! use flowloom::context::ExecutionContext;
//! use serde_json::json;
//!
//! let ctx = ExecutionContext::new("wf-1");
//! ctx.set("threshold", json!(200));
//! assert_eq!(ctx.get("threshold"), Some(json!(200)));
//! assert_eq!(ctx.get("missing"), None);
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::utils::collections::ValueMap;

/// Shared state for a single workflow execution.
///
/// Cheap to share: callers hold it behind an `Arc` and every node of
/// the execution sees the same map.
#[derive(Debug)]
pub struct ExecutionContext {
    workflow_id: String,
    execution_id: String,
    started_at: DateTime<Utc>,
    data: DashMap<String, Value>,
}

impl ExecutionContext {
    /// Create an empty context for the given workflow with a fresh
    /// execution id.
    #[must_use]
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            data: DashMap::new(),
        }
    }

    /// Create a context pre-seeded with initial data (the engine's
    /// entry path and the reference executor's input mappings).
    #[must_use]
    pub fn seeded(workflow_id: impl Into<String>, initial: ValueMap) -> Self {
        let ctx = Self::new(workflow_id);
        for (k, v) in initial {
            ctx.data.insert(k, v);
        }
        ctx
    }

    /// The id of the workflow this execution belongs to.
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// The unique id of this execution.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// When this execution started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Read a slot. Returns a clone; the stored value may change after
    /// this call returns.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|v| v.clone())
    }

    /// Write a slot, returning the previous value if any.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    /// Delete a slot, returning the removed value if any.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    /// Whether a slot exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Number of populated slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the context holds no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Point-in-time copy of the whole map. Used for the final snapshot
    /// embedded in the workflow result and for template interpolation.
    #[must_use]
    pub fn snapshot(&self) -> ValueMap {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
