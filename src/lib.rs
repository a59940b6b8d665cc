//! # Flowloom: Declarative DAG Dataflow Engine
//!
//! Flowloom executes directed acyclic graphs of processing nodes
//! described in declarative documents. Nodes communicate by reading
//! and writing named slots in a per-execution context; edges impose
//! happens-before ordering and gate each node on the success of its
//! predecessors.
//!
//! ## Core Concepts
//!
//! - **Workflow**: an immutable, validated DAG of typed nodes
//! - **Node**: one of six kinds — input, output (notification),
//!   script, diagnosis, plugin, reference
//! - **ExecutionContext**: the per-run shared keyed store
//! - **Engine**: topological scheduling, sequential or bounded-parallel
//! - **Plugin runtime**: isolated loading of data-source plugins with
//!   scanning and eviction
//! - **Reference node**: recursive invocation of another workflow in
//!   five execution modes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowloom::config::EngineConfig;
//! use flowloom::engine::WorkflowEngine;
//! use flowloom::model::{NodeSpec, WorkflowBuilder};
//! use flowloom::notify::{ConsoleProvider, NotificationDispatcher};
//! use flowloom::plugin::registry::{PluginRegistry, PluginRegistryConfig};
//! use flowloom::registry::WorkflowRegistry;
//! use flowloom::script::ExprHost;
//! use flowloom::types::NodeType;
//! use flowloom::utils::collections::value_map_from;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let notifications = Arc::new(NotificationDispatcher::new());
//! notifications.register(Arc::new(ConsoleProvider::new()));
//!
//! let engine = WorkflowEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(PluginRegistry::new(PluginRegistryConfig::default())),
//!     Arc::new(WorkflowRegistry::new()),
//!     notifications,
//!     Arc::new(ExprHost),
//! );
//!
//! let workflow = WorkflowBuilder::new("double")
//!     .add_node(
//!         NodeSpec::new("calc", "Double it", NodeType::Script)
//!             .with_config_value("script", json!("input * 2"))
//!             .with_config_value("inputKey", json!("x"))
//!             .with_config_value("outputKey", json!("y")),
//!     )
//!     .build()?;
//!
//! let result = engine
//!     .execute(&workflow, value_map_from([("x", json!(21))]))
//!     .await?;
//! assert!(result.success);
//! assert_eq!(result.context["y"], json!(42));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`model`] - Workflow, node specs, edges, build-time validation
//! - [`document`] - The YAML document shape and round-trip loading
//! - [`engine`] - The DAG scheduler and execution results
//! - [`node`] - The node contract shared by all kinds
//! - [`nodes`] - The six concrete node kinds
//! - [`inputs`] - Multi-input resolution (single/multiple/merged)
//! - [`script`] - Script host seam and the built-in expression host
//! - [`plugin`] - Plugin contract, registry, isolation, scan, eviction
//! - [`registry`] - The workflow catalog and dependency edges
//! - [`notify`] - Notification providers and the dispatcher
//! - [`reference`] - Sub-workflow invocation modes

pub mod config;
pub mod context;
pub mod document;
pub mod engine;
pub mod inputs;
pub mod model;
pub mod node;
pub mod nodes;
pub mod notify;
pub mod plugin;
pub mod reference;
pub mod registry;
pub mod script;
pub mod telemetry;
pub mod types;
pub mod utils;
