//! The DAG scheduler: validated workflows in, execution results out.
//!
//! [`WorkflowEngine`] owns the process-level services (plugin registry,
//! workflow registry, notification dispatcher, script host) and drives
//! executions through them:
//!
//! 1. **Pre-flight** — structural re-validation plus per-node config
//!    validation; failures produce a workflow-level failure result
//!    with zero node results.
//! 2. **Context** — one fresh [`ExecutionContext`] seeded from the
//!    caller's initial data.
//! 3. **Execution** — sequential when the concurrency limit is 1,
//!    otherwise bounded-parallel over the topological order. Either
//!    way a node runs only when every predecessor succeeded; a failed
//!    predecessor cascades as synthetic `PREDECESSOR_FAILED` results.
//! 4. **Aggregation** — workflow success is the conjunction over all
//!    recorded results; statistics come from the same map.
//!
//! The engine also implements [`WorkflowInvoker`], which is how
//! reference nodes recurse into it.

pub mod result;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::inputs;
use crate::model::Workflow;
use crate::node::{Node, NodeExecutionResult, ValidationReport};
use crate::nodes::{self, NodeServices};
use crate::notify::NotificationDispatcher;
use crate::plugin::PluginRegistry;
use crate::reference::WorkflowInvoker;
use crate::registry::WorkflowRegistry;
use crate::script::ScriptHost;
use crate::utils::collections::ValueMap;

use miette::Diagnostic;

pub use result::{ExecutionStats, WorkflowExecutionResult};

/// Errors from the engine's own lifecycle (node and validation
/// failures are reported through results, never through this type).
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// The engine refused the execution because shutdown has begun.
    #[error("engine is shutting down; new executions are refused")]
    #[diagnostic(code(flowloom::engine::shutting_down))]
    ShuttingDown,

    /// The execution was cancelled by shutdown after the drain window
    /// elapsed.
    #[error("execution cancelled during engine shutdown")]
    #[diagnostic(code(flowloom::engine::cancelled))]
    Cancelled,

    /// The execution task failed to join for a reason other than
    /// cancellation.
    #[error("workflow task join error: {0}")]
    #[diagnostic(code(flowloom::engine::join))]
    Join(#[from] JoinError),
}

/// The scheduler. Construct with [`WorkflowEngine::new`]; it is always
/// held behind an `Arc` so reference nodes can recurse into it.
pub struct WorkflowEngine {
    plugins: Arc<PluginRegistry>,
    workflows: Arc<WorkflowRegistry>,
    notifications: Arc<NotificationDispatcher>,
    script_host: Arc<dyn ScriptHost>,
    config: EngineConfig,
    accepting: AtomicBool,
    inflight: AtomicUsize,
    drained: Notify,
    /// Abort handles for in-flight execution tasks, so shutdown can
    /// cancel work that outlives the drain window.
    running: Mutex<Vec<AbortHandle>>,
    self_ref: Weak<WorkflowEngine>,
}

impl WorkflowEngine {
    /// Create an engine over explicitly constructed services.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        plugins: Arc<PluginRegistry>,
        workflows: Arc<WorkflowRegistry>,
        notifications: Arc<NotificationDispatcher>,
        script_host: Arc<dyn ScriptHost>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            plugins,
            workflows,
            notifications,
            script_host,
            config,
            accepting: AtomicBool::new(true),
            inflight: AtomicUsize::new(0),
            drained: Notify::new(),
            running: Mutex::new(Vec::new()),
            self_ref: weak.clone(),
        })
    }

    #[must_use]
    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    #[must_use]
    pub fn workflows(&self) -> &Arc<WorkflowRegistry> {
        &self.workflows
    }

    #[must_use]
    pub fn notifications(&self) -> &Arc<NotificationDispatcher> {
        &self.notifications
    }

    /// Register every plugin archive found under the configured
    /// plugin directory. Returns the number of successful
    /// registrations; per-archive failures are logged by the registry.
    pub async fn bootstrap_plugins(&self) -> usize {
        let Some(dir) = &self.config.plugin_dir else {
            return 0;
        };
        self.plugins
            .load_directory(dir)
            .await
            .iter()
            .filter(|(_, outcome)| outcome.is_ok())
            .count()
    }

    fn node_services(&self) -> NodeServices {
        let invoker: Arc<dyn WorkflowInvoker> = self
            .self_ref
            .upgrade()
            .expect("engine is alive while executing");
        NodeServices {
            plugins: Arc::clone(&self.plugins),
            workflows: Arc::clone(&self.workflows),
            notifications: Arc::clone(&self.notifications),
            script_host: Arc::clone(&self.script_host),
            invoker,
        }
    }

    /// Execute a workflow against the given initial data.
    ///
    /// The execution runs on its own task, tracked by the engine, so
    /// [`shutdown`](Self::shutdown) can cancel it if it outlives the
    /// drain window. A cancelled execution surfaces as
    /// [`EngineError::Cancelled`].
    #[instrument(skip(self, workflow, initial), fields(workflow = %workflow.id()), err)]
    pub async fn execute(
        &self,
        workflow: &Workflow,
        initial: ValueMap,
    ) -> Result<WorkflowExecutionResult, EngineError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        self.inflight.fetch_add(1, Ordering::SeqCst);
        // Decrements even if this future is dropped mid-await (the
        // caller's own task may be one of the aborted ones).
        let _guard = InflightGuard(self);

        let engine = self
            .self_ref
            .upgrade()
            .expect("engine is alive while executing");
        let workflow = workflow.clone();
        let handle =
            tokio::spawn(async move { engine.execute_inner(&workflow, initial).await });
        {
            let mut running = self.running.lock();
            running.retain(|h| !h.is_finished());
            running.push(handle.abort_handle());
        }

        match handle.await {
            Ok(result) => Ok(result),
            Err(e) if e.is_cancelled() => Err(EngineError::Cancelled),
            Err(e) => Err(EngineError::Join(e)),
        }
    }

    async fn execute_inner(&self, workflow: &Workflow, initial: ValueMap) -> WorkflowExecutionResult {
        let execution_id = Uuid::new_v4().to_string();

        // Pre-flight: structure, then per-node config.
        let structural = workflow.validate();
        if !structural.is_valid() {
            return WorkflowExecutionResult::validation_failure(
                execution_id,
                workflow.id(),
                structural.summary(),
            );
        }
        let (built, node_report) = self.build_and_validate(workflow);
        if !node_report.is_valid() {
            return WorkflowExecutionResult::validation_failure(
                execution_id,
                workflow.id(),
                node_report.summary(),
            );
        }

        let ctx = Arc::new(ExecutionContext::seeded(workflow.id(), initial));
        let order = workflow.topo_order();
        let limit = self.effective_limit(workflow);
        debug!(execution = %execution_id, nodes = order.len(), limit, "starting execution");

        let node_results = if limit <= 1 {
            self.run_sequential(workflow, &built, &order, &ctx).await
        } else {
            self.run_parallel(workflow, &built, &order, &ctx, limit).await
        };

        for node in built.values() {
            node.destroy().await;
        }

        WorkflowExecutionResult::aggregate(
            execution_id,
            workflow.id(),
            &order,
            node_results,
            ctx.snapshot(),
        )
    }

    /// Build executors for every node (disabled included, so they are
    /// validated and counted) and aggregate their validation reports.
    fn build_and_validate(
        &self,
        workflow: &Workflow,
    ) -> (FxHashMap<String, Arc<dyn Node>>, ValidationReport) {
        let services = self.node_services();
        let mut built: FxHashMap<String, Arc<dyn Node>> = FxHashMap::default();
        let mut report = ValidationReport::ok();
        for spec in workflow.nodes() {
            match nodes::build_node(workflow.id(), spec, &services) {
                Ok(node) => {
                    let node_report = node.validate();
                    for issue in node_report.errors {
                        report.error(format!("nodes[{}].{}", spec.id, issue.field), issue.message);
                    }
                    for issue in node_report.warnings {
                        report
                            .warning(format!("nodes[{}].{}", spec.id, issue.field), issue.message);
                    }
                    built.insert(spec.id.clone(), node);
                }
                Err(e) => {
                    report.error(format!("nodes[{}]", spec.id), e.to_string());
                }
            }
        }
        (built, report)
    }

    fn effective_limit(&self, workflow: &Workflow) -> usize {
        workflow
            .metadata()
            .get("globalConfig")
            .and_then(|g| g.get("maxConcurrentNodes"))
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(self.config.max_concurrent_nodes)
            .max(1)
    }

    async fn run_sequential(
        &self,
        workflow: &Workflow,
        built: &FxHashMap<String, Arc<dyn Node>>,
        order: &[String],
        ctx: &Arc<ExecutionContext>,
    ) -> FxHashMap<String, NodeExecutionResult> {
        let mut results: FxHashMap<String, NodeExecutionResult> = FxHashMap::default();
        for node_id in order {
            let spec = workflow.node(node_id).expect("node in topo order");
            if !spec.enabled {
                results.insert(node_id.clone(), NodeExecutionResult::skipped(node_id));
                continue;
            }
            if let Some(failed_pred) = failed_predecessor(workflow, node_id, &results) {
                results.insert(
                    node_id.clone(),
                    NodeExecutionResult::predecessor_failed(node_id, &failed_pred),
                );
                continue;
            }
            let node = Arc::clone(built.get(node_id).expect("node built in pre-flight"));
            let result =
                run_node(node, node_id.clone(), spec.config.clone(), Arc::clone(ctx)).await;
            results.insert(node_id.clone(), result);
        }
        results
    }

    async fn run_parallel(
        &self,
        workflow: &Workflow,
        built: &FxHashMap<String, Arc<dyn Node>>,
        order: &[String],
        ctx: &Arc<ExecutionContext>,
        limit: usize,
    ) -> FxHashMap<String, NodeExecutionResult> {
        let mut results: FxHashMap<String, NodeExecutionResult> = FxHashMap::default();
        let mut in_degree: FxHashMap<String, usize> = order
            .iter()
            .map(|id| (id.clone(), workflow.predecessors(id).len()))
            .collect();
        let mut ready: VecDeque<String> = order
            .iter()
            .filter(|id| in_degree[*id] == 0)
            .cloned()
            .collect();
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut inflight: JoinSet<(String, NodeExecutionResult)> = JoinSet::new();

        while results.len() < order.len() {
            // Launch (or synthetically resolve) everything ready.
            while let Some(node_id) = ready.pop_front() {
                let spec = workflow.node(&node_id).expect("node in topo order");
                if !spec.enabled {
                    results.insert(node_id.clone(), NodeExecutionResult::skipped(&node_id));
                    release_successors(workflow, &node_id, &mut in_degree, &mut ready);
                    continue;
                }
                if let Some(failed_pred) = failed_predecessor(workflow, &node_id, &results) {
                    results.insert(
                        node_id.clone(),
                        NodeExecutionResult::predecessor_failed(&node_id, &failed_pred),
                    );
                    release_successors(workflow, &node_id, &mut in_degree, &mut ready);
                    continue;
                }

                let node = Arc::clone(built.get(&node_id).expect("node built in pre-flight"));
                let config = spec.config.clone();
                let ctx = Arc::clone(ctx);
                let permit_source = Arc::clone(&semaphore);
                inflight.spawn(async move {
                    let _permit = permit_source
                        .acquire()
                        .await
                        .expect("semaphore never closed");
                    let result = run_node(node, node_id.clone(), config, ctx).await;
                    (node_id, result)
                });
            }

            if results.len() == order.len() {
                break;
            }
            match inflight.join_next().await {
                Some(Ok((node_id, result))) => {
                    results.insert(node_id.clone(), result);
                    release_successors(workflow, &node_id, &mut in_degree, &mut ready);
                }
                Some(Err(join_err)) => {
                    // run_node catches panics, so this is cancellation
                    // noise at worst.
                    warn!(error = %join_err, "worker task join failed");
                }
                None => break,
            }
        }
        results
    }

    /// Refuse new executions, wait for in-flight work to drain up to
    /// the configured timeout, then cancel whatever remains. Returns
    /// whether the drain completed without cancellation.
    pub async fn shutdown(&self) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            loop {
                if self.inflight.load(Ordering::SeqCst) == 0 {
                    return;
                }
                self.drained.notified().await;
            }
        })
        .await
        .is_ok();
        if !drained {
            let handles: Vec<AbortHandle> = self.running.lock().drain(..).collect();
            warn!(
                cancelled = handles.len(),
                "shutdown drain timed out; cancelling remaining executions"
            );
            // Aborting an execution task also tears down the node
            // tasks it owns: its JoinSet aborts them on drop.
            for handle in handles {
                handle.abort();
            }
        }
        drained
    }

    /// Whether the engine still accepts new executions.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowInvoker for WorkflowEngine {
    async fn invoke(&self, workflow: Arc<Workflow>, initial: ValueMap) -> WorkflowExecutionResult {
        match self.execute(&workflow, initial).await {
            Ok(result) => result,
            Err(e) => WorkflowExecutionResult::validation_failure(
                Uuid::new_v4().to_string(),
                workflow.id(),
                e.to_string(),
            ),
        }
    }
}

/// Decrements the in-flight counter when an execution ends, however
/// it ends (completion, error, or the caller's future being dropped
/// by a shutdown abort).
struct InflightGuard<'a>(&'a WorkflowEngine);

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if self.0.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

/// First predecessor whose result is failed or missing, if any.
fn failed_predecessor(
    workflow: &Workflow,
    node_id: &str,
    results: &FxHashMap<String, NodeExecutionResult>,
) -> Option<String> {
    workflow
        .predecessors(node_id)
        .into_iter()
        .find(|pred| results.get(*pred).is_none_or(|r| !r.success))
        .map(str::to_owned)
}

/// Release `node_id`'s successors: decrement their in-degree and queue
/// the ones that became ready.
fn release_successors(
    workflow: &Workflow,
    node_id: &str,
    in_degree: &mut FxHashMap<String, usize>,
    ready: &mut VecDeque<String>,
) {
    for succ in workflow.successors(node_id) {
        let degree = in_degree.get_mut(succ).expect("successor tracked");
        *degree -= 1;
        if *degree == 0 {
            ready.push_back(succ.to_owned());
        }
    }
}

/// Run one node: resolve input, execute under a panic guard, stamp
/// timing. Duration is measured here, not by the node.
async fn run_node(
    node: Arc<dyn Node>,
    node_id: String,
    config: Map<String, Value>,
    ctx: Arc<ExecutionContext>,
) -> NodeExecutionResult {
    let started_at = Utc::now();
    let timer = Instant::now();

    let input = match inputs::resolve_input(&config, &ctx) {
        Ok(input) => input,
        Err(e) => {
            let mut result = e.into_result(&node_id);
            result.started_at = started_at;
            return result;
        }
    };

    let outcome = AssertUnwindSafe(node.execute(input, &ctx))
        .catch_unwind()
        .await;

    let mut result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => e.into_result(&node_id),
        Err(_) => NodeExecutionResult::failure(&node_id, "node panicked during execution"),
    };
    result.node_id = node_id;
    result.started_at = started_at;
    result.duration_ms = timer.elapsed().as_millis() as u64;
    result
}
