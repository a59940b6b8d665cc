//! Shared harness for integration tests: an engine wired over fresh
//! process services, with a console provider and a sleep-capable
//! script host installed.

use std::sync::Arc;

use flowloom::config::EngineConfig;
use flowloom::engine::WorkflowEngine;
use flowloom::notify::{ConsoleProvider, NotificationDispatcher, NotificationProvider};
use flowloom::plugin::registry::{PluginRegistry, PluginRegistryConfig};
use flowloom::registry::WorkflowRegistry;
use flowloom::script::ScriptHost;
use flowloom::utils::testing::SleepHost;

pub struct Harness {
    pub engine: Arc<WorkflowEngine>,
    pub plugins: Arc<PluginRegistry>,
    pub workflows: Arc<WorkflowRegistry>,
    pub notifications: Arc<NotificationDispatcher>,
    pub console: Arc<ConsoleProvider>,
}

pub fn harness(config: EngineConfig) -> Harness {
    harness_with_host(config, Arc::new(SleepHost))
}

pub fn harness_with_host(config: EngineConfig, host: Arc<dyn ScriptHost>) -> Harness {
    let plugins = Arc::new(PluginRegistry::new(PluginRegistryConfig::default()));
    let workflows = Arc::new(WorkflowRegistry::new());
    let notifications = Arc::new(NotificationDispatcher::new());
    let console = Arc::new(ConsoleProvider::new());
    notifications.register(Arc::clone(&console) as Arc<dyn NotificationProvider>);

    let engine = WorkflowEngine::new(
        config,
        Arc::clone(&plugins),
        Arc::clone(&workflows),
        Arc::clone(&notifications),
        host,
    );

    Harness {
        engine,
        plugins,
        workflows,
        notifications,
        console,
    }
}
