//! The workflow registry: a named catalog of workflows plus the
//! reference-dependency graph.
//!
//! Reference nodes resolve their targets here. Normal lookup returns
//! only ACTIVE workflows and bumps the entry's last-access time. The
//! registry also tracks caller → callee dependency edges, recorded
//! when reference nodes are built, so circular references are detected
//! before any invocation rather than at runtime stack depth.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::model::Workflow;
use crate::types::WorkflowStatus;

/// Catalog entry bookkeeping.
#[derive(Clone, Debug)]
pub struct WorkflowEntry {
    pub workflow: Arc<Workflow>,
    pub status: WorkflowStatus,
    pub version: String,
    pub description: String,
    pub registered_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

/// Errors from registry operations.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("workflow not found: {workflow_id}")]
    #[diagnostic(code(flowloom::registry::not_found))]
    NotFound { workflow_id: String },

    #[error("workflow '{workflow_id}' is already registered")]
    #[diagnostic(code(flowloom::registry::duplicate))]
    Duplicate { workflow_id: String },
}

/// Aggregate statistics over the catalog.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub dependency_edges: usize,
}

/// The process-wide workflow catalog.
#[derive(Default)]
pub struct WorkflowRegistry {
    entries: RwLock<FxHashMap<String, WorkflowEntry>>,
    /// caller workflow id → callee workflow ids.
    dependencies: RwLock<FxHashMap<String, FxHashSet<String>>>,
}

impl WorkflowRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow as ACTIVE. Fails on duplicate ids.
    pub fn register(&self, workflow: Workflow) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        let id = workflow.id().to_owned();
        if entries.contains_key(&id) {
            return Err(RegistryError::Duplicate { workflow_id: id });
        }
        let now = Utc::now();
        debug!(workflow = %id, "registering workflow");
        entries.insert(
            id,
            WorkflowEntry {
                version: workflow.version().to_owned(),
                description: workflow.description().to_owned(),
                workflow: Arc::new(workflow),
                status: WorkflowStatus::Active,
                registered_at: now,
                last_access: now,
            },
        );
        Ok(())
    }

    /// Remove a workflow and every dependency edge that names it.
    pub fn unregister(&self, workflow_id: &str) -> Result<(), RegistryError> {
        let removed = self.entries.write().remove(workflow_id);
        if removed.is_none() {
            return Err(RegistryError::NotFound {
                workflow_id: workflow_id.to_owned(),
            });
        }
        let mut deps = self.dependencies.write();
        deps.remove(workflow_id);
        for callees in deps.values_mut() {
            callees.remove(workflow_id);
        }
        Ok(())
    }

    /// Normal lookup: ACTIVE workflows only, bumps last-access.
    #[must_use]
    pub fn lookup(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(workflow_id)?;
        if entry.status != WorkflowStatus::Active {
            return None;
        }
        entry.last_access = Utc::now();
        Some(Arc::clone(&entry.workflow))
    }

    /// Catalog entry (any status), without touching last-access.
    #[must_use]
    pub fn entry(&self, workflow_id: &str) -> Option<WorkflowEntry> {
        self.entries.read().get(workflow_id).cloned()
    }

    /// Change a workflow's lifecycle status.
    pub fn set_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(workflow_id)
            .ok_or_else(|| RegistryError::NotFound {
                workflow_id: workflow_id.to_owned(),
            })?;
        entry.status = status;
        Ok(())
    }

    /// Case-insensitive search over id, name, and description.
    /// Returns ids, sorted.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<String> {
        let needle = query.to_ascii_lowercase();
        let mut hits: Vec<String> = self
            .entries
            .read()
            .values()
            .filter(|entry| {
                entry.workflow.id().to_ascii_lowercase().contains(&needle)
                    || entry.workflow.name().to_ascii_lowercase().contains(&needle)
                    || entry.description.to_ascii_lowercase().contains(&needle)
            })
            .map(|entry| entry.workflow.id().to_owned())
            .collect();
        hits.sort();
        hits
    }

    /// All registered workflow ids, sorted.
    #[must_use]
    pub fn workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Record a caller → callee reference edge (called when a
    /// reference node is built).
    pub fn record_dependency(&self, caller: impl Into<String>, callee: impl Into<String>) {
        self.dependencies
            .write()
            .entry(caller.into())
            .or_default()
            .insert(callee.into());
    }

    /// Whether the workflow participates in a dependency cycle.
    #[must_use]
    pub fn has_circular_dependency(&self, workflow_id: &str) -> bool {
        self.reaches(workflow_id, workflow_id)
    }

    /// Whether adding `caller → callee` would close a cycle: true when
    /// `callee` already reaches `caller` (or is the caller itself).
    #[must_use]
    pub fn would_close_cycle(&self, caller: &str, callee: &str) -> bool {
        caller == callee || self.reaches(callee, caller)
    }

    /// DFS over the dependency edges: does `from` reach `target`?
    fn reaches(&self, from: &str, target: &str) -> bool {
        let deps = self.dependencies.read();
        let mut stack: Vec<&str> = vec![from];
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        while let Some(node) = stack.pop() {
            let Some(callees) = deps.get(node) else {
                continue;
            };
            for callee in callees {
                if callee == target {
                    return true;
                }
                if seen.insert(callee) {
                    stack.push(callee);
                }
            }
        }
        false
    }

    /// Aggregate catalog statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.read();
        RegistryStats {
            total: entries.len(),
            active: entries
                .values()
                .filter(|e| e.status == WorkflowStatus::Active)
                .count(),
            dependency_edges: self
                .dependencies
                .read()
                .values()
                .map(FxHashSet::len)
                .sum(),
        }
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.workflow_ids())
            .finish()
    }
}
