//! Concrete node kinds and the factory that builds them from
//! declarative specs.
//!
//! Each kind parses its config once at build time; bad config surfaces
//! through `validate()` (aggregated by the engine's pre-flight) and,
//! where it would make execution meaningless, as a build error.

pub mod diagnosis;
pub mod input;
pub mod notification;
pub mod plugin;
pub mod reference;
pub mod script;

use std::sync::Arc;

use crate::model::NodeSpec;
use crate::node::{Node, NodeError};
use crate::notify::NotificationDispatcher;
use crate::plugin::PluginRegistry;
use crate::reference::WorkflowInvoker;
use crate::registry::WorkflowRegistry;
use crate::script::ScriptHost;
use crate::types::NodeType;

pub use diagnosis::DiagnosisNode;
pub use input::InputNode;
pub use notification::NotificationNode;
pub use plugin::PluginNode;
pub use reference::ReferenceNode;
pub use script::ScriptNode;

/// Everything a node implementation may need from its environment.
/// The engine owns one of these and hands it to the factory.
#[derive(Clone)]
pub struct NodeServices {
    pub plugins: Arc<PluginRegistry>,
    pub workflows: Arc<WorkflowRegistry>,
    pub notifications: Arc<NotificationDispatcher>,
    pub script_host: Arc<dyn ScriptHost>,
    pub invoker: Arc<dyn WorkflowInvoker>,
}

/// Build the executor for one node spec.
///
/// `workflow_id` identifies the owning workflow; reference nodes use
/// it to record their dependency edge in the workflow registry at
/// build time.
pub fn build_node(
    workflow_id: &str,
    spec: &NodeSpec,
    services: &NodeServices,
) -> Result<Arc<dyn Node>, NodeError> {
    let node: Arc<dyn Node> = match spec.node_type {
        NodeType::Input => Arc::new(InputNode::from_spec(spec)?),
        NodeType::Script => Arc::new(ScriptNode::from_spec(
            spec,
            Arc::clone(&services.script_host),
        )?),
        NodeType::Diagnosis => Arc::new(DiagnosisNode::from_spec(spec)?),
        NodeType::Output => Arc::new(NotificationNode::from_spec(
            spec,
            Arc::clone(&services.notifications),
        )?),
        NodeType::Plugin => Arc::new(PluginNode::from_spec(
            spec,
            Arc::clone(&services.plugins),
        )?),
        NodeType::Reference => Arc::new(ReferenceNode::from_spec(
            workflow_id,
            spec,
            Arc::clone(&services.workflows),
            Arc::clone(&services.invoker),
            Arc::clone(&services.script_host),
        )?),
    };
    Ok(node)
}
