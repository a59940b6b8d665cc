//! Sub-workflow invocation for reference nodes.
//!
//! A reference node invokes another workflow from the registry in one
//! of five modes:
//!
//! - **SYNC** — inline, blocking the caller's worker.
//! - **ASYNC** — on a spawned task; with `waitForResult` the node
//!   joins under `timeoutMs`, otherwise it succeeds immediately and
//!   the detached execution's outcome is only logged.
//! - **CONDITIONAL** — SYNC, gated on a context predicate.
//! - **LOOP** — once per element of a context collection, the element
//!   bound under `loopItem` in the callee's fresh context.
//! - **PARALLEL** — all listed workflows concurrently, joined under
//!   `parallelTimeoutMs`.
//!
//! Every invocation runs the callee with a **fresh** context seeded
//! from `inputMappings`; `outputMappings` copy slots back into the
//! caller's context afterwards. Before any invocation the registry's
//! dependency edges are consulted so a reference that would close a
//! cycle fails with `CIRCULAR_DEPENDENCY` instead of recursing.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::engine::result::WorkflowExecutionResult;
use crate::model::Workflow;
use crate::node::{NodeError, NodeExecutionResult, ValidationReport};
use crate::registry::WorkflowRegistry;
use crate::script::{eval_condition, ScriptHost};
use crate::types::ExecutionMode;
use crate::utils::collections::ValueMap;
use crate::utils::value::{bool_or, opt_str, opt_string_list, opt_u64};

/// Context key a LOOP iteration's element is bound under in the callee.
pub const LOOP_ITEM_KEY: &str = "loopItem";

/// Default join timeout for ASYNC with `waitForResult` (ms).
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Default join timeout for PARALLEL fan-out (ms).
const DEFAULT_PARALLEL_TIMEOUT_MS: u64 = 60_000;

/// The seam the executor invokes sub-workflows through; the engine
/// implements it.
#[async_trait]
pub trait WorkflowInvoker: Send + Sync {
    /// Execute `workflow` with a fresh context seeded from `initial`.
    async fn invoke(&self, workflow: Arc<Workflow>, initial: ValueMap) -> WorkflowExecutionResult;
}

/// Parsed reference-node configuration.
#[derive(Clone, Debug)]
pub struct ReferenceConfig {
    pub mode: ExecutionMode,
    pub workflow_id: Option<String>,
    pub workflow_ids: Vec<String>,
    /// caller-context key → callee-context key.
    pub input_mappings: FxHashMap<String, String>,
    /// callee-context key → caller-context key.
    pub output_mappings: FxHashMap<String, String>,
    pub condition: Option<String>,
    pub wait_for_result: bool,
    pub timeout_ms: u64,
    pub loop_data_key: Option<String>,
    pub max_iterations: Option<usize>,
    pub parallel_timeout_ms: u64,
}

impl ReferenceConfig {
    /// Parse from a node's config map.
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, NodeError> {
        let mode = match opt_str(config, "executionMode") {
            Some(raw) => raw
                .parse::<ExecutionMode>()
                .map_err(|message| NodeError::InvalidConfig { message })?,
            None => ExecutionMode::default(),
        };
        Ok(Self {
            mode,
            workflow_id: opt_str(config, "workflowId"),
            workflow_ids: opt_string_list(config, "workflowIds"),
            input_mappings: string_map(config, "inputMappings"),
            output_mappings: string_map(config, "outputMappings"),
            condition: opt_str(config, "condition"),
            wait_for_result: bool_or(config, "waitForResult", true),
            timeout_ms: opt_u64(config, "timeoutMs").unwrap_or(DEFAULT_TIMEOUT_MS),
            loop_data_key: opt_str(config, "loopDataKey"),
            max_iterations: opt_u64(config, "maxIterations").map(|n| n as usize),
            parallel_timeout_ms: opt_u64(config, "parallelTimeoutMs")
                .unwrap_or(DEFAULT_PARALLEL_TIMEOUT_MS),
        })
    }

    /// Mode-specific structural validation.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::ok();
        match self.mode {
            ExecutionMode::Parallel => {
                if self.workflow_ids.is_empty() {
                    report.error("config.workflowIds", "parallel mode requires workflowIds");
                }
                if !self.output_mappings.is_empty() {
                    report.error(
                        "config.outputMappings",
                        "parallel mode does not map outputs",
                    );
                }
            }
            mode => {
                if self.workflow_id.is_none() {
                    report.error("config.workflowId", format!("{mode} mode requires workflowId"));
                }
                if mode == ExecutionMode::Conditional && self.condition.is_none() {
                    report.error("config.condition", "conditional mode requires a condition");
                }
                if mode == ExecutionMode::Loop && self.loop_data_key.is_none() {
                    report.error("config.loopDataKey", "loop mode requires loopDataKey");
                }
            }
        }
        report
    }
}

fn string_map(config: &Map<String, Value>, key: &str) -> FxHashMap<String, String> {
    config
        .get(key)
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
                .collect()
        })
        .unwrap_or_default()
}

/// Executes sub-workflow invocations on behalf of reference nodes.
pub struct ReferenceExecutor {
    workflows: Arc<WorkflowRegistry>,
    invoker: Arc<dyn WorkflowInvoker>,
    script_host: Arc<dyn ScriptHost>,
}

impl ReferenceExecutor {
    #[must_use]
    pub fn new(
        workflows: Arc<WorkflowRegistry>,
        invoker: Arc<dyn WorkflowInvoker>,
        script_host: Arc<dyn ScriptHost>,
    ) -> Self {
        Self {
            workflows,
            invoker,
            script_host,
        }
    }

    /// Run one reference invocation for the node `node_id` of workflow
    /// `caller`.
    pub async fn run(
        &self,
        caller: &str,
        node_id: &str,
        config: &ReferenceConfig,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        match config.mode {
            ExecutionMode::Sync => self.run_sync(caller, node_id, config, ctx).await,
            ExecutionMode::Async => self.run_async(caller, node_id, config, ctx).await,
            ExecutionMode::Conditional => self.run_conditional(caller, node_id, config, ctx).await,
            ExecutionMode::Loop => self.run_loop(caller, node_id, config, ctx).await,
            ExecutionMode::Parallel => self.run_parallel(caller, node_id, config, ctx).await,
        }
    }

    /// Resolve the configured single target, enforcing the cycle guard
    /// and ACTIVE-status lookup.
    fn resolve_target(
        &self,
        caller: &str,
        config: &ReferenceConfig,
    ) -> Result<Arc<Workflow>, NodeError> {
        let target_id = config
            .workflow_id
            .as_deref()
            .ok_or_else(|| NodeError::InvalidConfig {
                message: "workflowId is required".into(),
            })?;
        self.resolve_id(caller, target_id)
    }

    fn resolve_id(&self, caller: &str, target_id: &str) -> Result<Arc<Workflow>, NodeError> {
        if self.workflows.would_close_cycle(caller, target_id) {
            return Err(NodeError::CircularDependency {
                workflow: target_id.to_owned(),
            });
        }
        self.workflows
            .lookup(target_id)
            .ok_or_else(|| NodeError::WorkflowNotFound {
                workflow: target_id.to_owned(),
            })
    }

    /// Seed a callee context map from the caller's context.
    fn seed(&self, config: &ReferenceConfig, ctx: &ExecutionContext) -> ValueMap {
        let mut initial = ValueMap::default();
        for (caller_key, callee_key) in &config.input_mappings {
            if let Some(value) = ctx.get(caller_key) {
                initial.insert(callee_key.clone(), value);
            }
        }
        initial
    }

    /// Copy mapped slots from a finished callee back into the caller.
    fn copy_outputs(
        &self,
        config: &ReferenceConfig,
        result: &WorkflowExecutionResult,
        ctx: &ExecutionContext,
    ) {
        for (callee_key, caller_key) in &config.output_mappings {
            if let Some(value) = result.context.get(callee_key) {
                ctx.set(caller_key.clone(), value.clone());
            }
        }
    }

    async fn run_sync(
        &self,
        caller: &str,
        node_id: &str,
        config: &ReferenceConfig,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        let target = self.resolve_target(caller, config)?;
        let initial = self.seed(config, ctx);
        let result = self.invoker.invoke(Arc::clone(&target), initial).await;

        if result.success {
            self.copy_outputs(config, &result, ctx);
            Ok(NodeExecutionResult::success(node_id)
                .with_metadata("mode", json!("SYNC"))
                .with_metadata("target", json!(target.id()))
                .with_metadata("subExecutionId", json!(result.execution_id)))
        } else {
            Ok(NodeExecutionResult::failure(
                node_id,
                format!(
                    "sub-workflow '{}' failed: {}",
                    target.id(),
                    result.message.as_deref().unwrap_or("no detail")
                ),
            )
            .with_metadata("mode", json!("SYNC"))
            .with_metadata("subExecutionId", json!(result.execution_id)))
        }
    }

    async fn run_async(
        &self,
        caller: &str,
        node_id: &str,
        config: &ReferenceConfig,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        let target = self.resolve_target(caller, config)?;
        let initial = self.seed(config, ctx);
        let invoker = Arc::clone(&self.invoker);
        let target_for_task = Arc::clone(&target);
        let handle =
            tokio::spawn(async move { invoker.invoke(target_for_task, initial).await });

        if !config.wait_for_result {
            // Detached: outcome is observed only through logs.
            let target_id = target.id().to_owned();
            tokio::spawn(async move {
                match handle.await {
                    Ok(result) if result.success => {
                        debug!(target = %target_id, execution = %result.execution_id, "detached sub-workflow completed");
                    }
                    Ok(result) => {
                        warn!(target = %target_id, message = ?result.message, "detached sub-workflow failed");
                    }
                    Err(e) => warn!(target = %target_id, error = %e, "detached sub-workflow panicked"),
                }
            });
            return Ok(NodeExecutionResult::success(node_id)
                .with_metadata("mode", json!("ASYNC"))
                .with_metadata("detached", json!(true)));
        }

        let timeout = Duration::from_millis(config.timeout_ms);
        let abort = handle.abort_handle();
        match tokio::time::timeout(timeout, handle).await {
            Err(_) => {
                // Abandon the sub-invocation; abort lands at its next
                // await point.
                abort.abort();
                Err(NodeError::Timeout {
                    millis: config.timeout_ms,
                })
            }
            Ok(Err(join_err)) => Ok(NodeExecutionResult::failure(
                node_id,
                format!("sub-workflow task failed: {join_err}"),
            )),
            Ok(Ok(result)) => {
                if result.success {
                    self.copy_outputs(config, &result, ctx);
                    Ok(NodeExecutionResult::success(node_id)
                        .with_metadata("mode", json!("ASYNC"))
                        .with_metadata("subExecutionId", json!(result.execution_id)))
                } else {
                    Ok(NodeExecutionResult::failure(
                        node_id,
                        format!(
                            "sub-workflow '{}' failed: {}",
                            target.id(),
                            result.message.as_deref().unwrap_or("no detail")
                        ),
                    ))
                }
            }
        }
    }

    async fn run_conditional(
        &self,
        caller: &str,
        node_id: &str,
        config: &ReferenceConfig,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        let condition = config
            .condition
            .as_deref()
            .ok_or_else(|| NodeError::InvalidConfig {
                message: "conditional mode requires a condition".into(),
            })?;
        let holds = eval_condition(self.script_host.as_ref(), condition, ctx)
            .await
            .map_err(|e| NodeError::Script {
                message: e.to_string(),
            })?;

        if !holds {
            return Ok(NodeExecutionResult::success(node_id)
                .with_metadata("mode", json!("CONDITIONAL"))
                .with_metadata("skipped", json!(true)));
        }
        let mut result = self.run_sync(caller, node_id, config, ctx).await?;
        result.metadata.insert("mode".into(), json!("CONDITIONAL"));
        Ok(result)
    }

    async fn run_loop(
        &self,
        caller: &str,
        node_id: &str,
        config: &ReferenceConfig,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        let loop_key = config
            .loop_data_key
            .as_deref()
            .ok_or_else(|| NodeError::InvalidConfig {
                message: "loop mode requires loopDataKey".into(),
            })?;
        let collection = ctx.get(loop_key).ok_or_else(|| NodeError::MissingInput {
            key: loop_key.to_owned(),
        })?;
        let Value::Array(elements) = collection else {
            return Err(NodeError::InputResolution {
                message: format!("'{loop_key}' is not a collection"),
            });
        };

        let target = self.resolve_target(caller, config)?;
        let limit = config.max_iterations.unwrap_or(elements.len());
        let mut failures = 0usize;
        let mut iterations = 0usize;
        // Per mapped caller key, one array entry per iteration.
        let mut collected: FxHashMap<&String, Vec<Value>> =
            config.output_mappings.values().map(|k| (k, Vec::new())).collect();

        for element in elements.into_iter().take(limit) {
            let mut initial = self.seed(config, ctx);
            initial.insert(LOOP_ITEM_KEY.to_owned(), element);
            let result = self.invoker.invoke(Arc::clone(&target), initial).await;
            iterations += 1;
            if !result.success {
                failures += 1;
            }
            for (callee_key, caller_key) in &config.output_mappings {
                let value = result.context.get(callee_key).cloned().unwrap_or(Value::Null);
                collected
                    .get_mut(caller_key)
                    .expect("collector pre-seeded")
                    .push(value);
            }
        }

        for (caller_key, values) in collected {
            ctx.set(caller_key.clone(), Value::Array(values));
        }

        let mut result = if failures == 0 {
            NodeExecutionResult::success(node_id)
        } else {
            NodeExecutionResult::failure(
                node_id,
                format!("{failures} of {iterations} iteration(s) failed"),
            )
        };
        result.metadata.insert("mode".into(), json!("LOOP"));
        result
            .metadata
            .insert("iterations".into(), json!(iterations));
        Ok(result)
    }

    async fn run_parallel(
        &self,
        caller: &str,
        node_id: &str,
        config: &ReferenceConfig,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, NodeError> {
        if config.workflow_ids.is_empty() {
            return Err(NodeError::InvalidConfig {
                message: "parallel mode requires workflowIds".into(),
            });
        }

        // Resolve everything up front so the cycle guard fires before
        // any execution starts.
        let mut targets = Vec::with_capacity(config.workflow_ids.len());
        for id in &config.workflow_ids {
            targets.push(self.resolve_id(caller, id)?);
        }

        let mut handles = Vec::with_capacity(targets.len());
        for target in &targets {
            let invoker = Arc::clone(&self.invoker);
            let target = Arc::clone(target);
            let initial = self.seed(config, ctx);
            handles.push(tokio::spawn(async move {
                invoker.invoke(target, initial).await
            }));
        }

        let timeout = Duration::from_millis(config.parallel_timeout_ms);
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let joined = tokio::time::timeout(timeout, async {
            let mut outcomes = Vec::with_capacity(handles.len());
            for handle in handles {
                outcomes.push(handle.await);
            }
            outcomes
        })
        .await;

        let outcomes = match joined {
            Ok(outcomes) => outcomes,
            Err(_) => {
                for abort in &aborts {
                    abort.abort();
                }
                return Err(NodeError::Timeout {
                    millis: config.parallel_timeout_ms,
                });
            }
        };

        let mut failed: Vec<String> = Vec::new();
        for (target, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(result) if result.success => {}
                Ok(_) | Err(_) => failed.push(target.id().to_owned()),
            }
        }

        let mut result = if failed.is_empty() {
            NodeExecutionResult::success(node_id)
        } else {
            NodeExecutionResult::failure(
                node_id,
                format!("parallel targets failed: {}", failed.join(", ")),
            )
        };
        result.metadata.insert("mode".into(), json!("PARALLEL"));
        result
            .metadata
            .insert("targets".into(), json!(config.workflow_ids));
        Ok(result)
    }
}
