//! The plugin registry: catalog, lifecycle, and connection factory.
//!
//! Registration paths:
//!
//! - [`register`](PluginRegistry::register) for in-process plugins
//!   (compiled into the host),
//! - [`register_archive`](PluginRegistry::register_archive) for disk
//!   archives: security scan → load → isolate → `initialize`.
//!
//! If any step fails the plugin is not added. Unregistration runs
//! `destroy` first, then disposes the symbol space, so plugin code is
//! never unmapped while teardown is executing. `initialize` and
//! `destroy` are serialized per plugin by a lifecycle lock; the data
//! path (`validate_config` / `create_connection` / `test_connection`)
//! is lock-free and concurrent.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::isolation::{HostExports, PrefixSets, SymbolSpace};
use super::loader::{self, PluginArchive};
use super::scan::{self, ScanOptions, ScanReport, Severity};
use super::{Connection, DataSourcePlugin, PluginError, TestReport};
use crate::context::ExecutionContext;

/// Accesses within this window update the count but not the
/// last-access timestamp, keeping hot plugins cheap to track.
const ACCESS_DEBOUNCE_SECS: i64 = 60;

/// Usage bookkeeping per loaded plugin, consumed by the resource
/// manager's eviction policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginUsage {
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub access_count: u64,
}

impl PluginUsage {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_access: now,
            access_count: 0,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        if now - self.last_access >= Duration::seconds(ACCESS_DEBOUNCE_SECS) {
            self.last_access = now;
        }
    }
}

struct Registered {
    plugin: Arc<dyn DataSourcePlugin>,
    space: Option<Arc<SymbolSpace>>,
    usage: Mutex<PluginUsage>,
    /// Serializes initialize/destroy for this plugin.
    lifecycle: tokio::sync::Mutex<()>,
}

/// Registry configuration.
#[derive(Clone, Debug, Default)]
pub struct PluginRegistryConfig {
    /// Global config handed to every plugin's `initialize`.
    pub global_config: Map<String, Value>,
    /// Enable the strict scan probes at registration.
    pub strict_scan: bool,
}

/// The process-wide plugin catalog.
pub struct PluginRegistry {
    catalog: DashMap<String, Arc<Registered>>,
    host_exports: Arc<HostExports>,
    config: PluginRegistryConfig,
    system_critical: RwLock<FxHashSet<String>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new(config: PluginRegistryConfig) -> Self {
        Self {
            catalog: DashMap::new(),
            host_exports: Arc::new(HostExports::new()),
            config,
            system_critical: RwLock::new(FxHashSet::default()),
        }
    }

    /// The host export table plugins resolve shared symbols from.
    #[must_use]
    pub fn host_exports(&self) -> Arc<HostExports> {
        Arc::clone(&self.host_exports)
    }

    /// Register an in-process plugin. Runs the dependency scan (logged
    /// only) and `initialize`; on failure the plugin is not added.
    #[instrument(skip(self, plugin), err)]
    pub async fn register(&self, plugin: Arc<dyn DataSourcePlugin>) -> Result<(), PluginError> {
        let info = plugin.info();
        let plugin_id = info.plugin_id.clone();
        if self.catalog.contains_key(&plugin_id) {
            return Err(PluginError::Duplicate { plugin_id });
        }

        let dep_report = scan::scan_dependencies(&plugin.dependencies());
        self.log_findings(&plugin_id, &dep_report);

        self.install(plugin_id, plugin, None).await
    }

    /// Register a plugin from an archive on disk: scan, load, isolate,
    /// initialize.
    #[instrument(skip(self), err)]
    pub async fn register_archive(&self, archive: &Path) -> Result<(), PluginError> {
        self.register_archive_with(archive, PrefixSets::default())
            .await
    }

    /// Archive registration with per-plugin prefix configuration.
    pub async fn register_archive_with(
        &self,
        archive: &Path,
        prefixes: PrefixSets,
    ) -> Result<(), PluginError> {
        let report = scan::scan_archive(
            archive,
            ScanOptions {
                strict: self.config.strict_scan,
            },
        )
        .map_err(loader::LoadError::Io)?;
        if report.rejected() {
            return Err(PluginError::ScanRejected {
                summary: report.summary(),
            });
        }

        let loaded: PluginArchive = loader::load_archive(archive)?;
        let (plugin, manifest, library) = loaded.split();
        let plugin: Arc<dyn DataSourcePlugin> = Arc::from(plugin);

        // The manifest id wins when present; otherwise the plugin's
        // self-reported identity is authoritative.
        let plugin_id = manifest
            .as_ref()
            .filter(|m| !m.id.is_empty())
            .map(|m| m.id.clone())
            .unwrap_or_else(|| plugin.info().plugin_id);

        if self.catalog.contains_key(&plugin_id) {
            return Err(PluginError::Duplicate { plugin_id });
        }

        self.log_findings(&plugin_id, &report);

        let space = Arc::new(SymbolSpace::new(
            plugin_id.clone(),
            self.host_exports() as Arc<dyn super::isolation::SymbolSource>,
            Box::new(library),
            prefixes,
        ));

        let result = self.install(plugin_id.clone(), plugin, Some(Arc::clone(&space))).await;
        if result.is_err() {
            // Never leave a half-registered space behind.
            space.dispose();
        }
        result
    }

    async fn install(
        &self,
        plugin_id: String,
        plugin: Arc<dyn DataSourcePlugin>,
        space: Option<Arc<SymbolSpace>>,
    ) -> Result<(), PluginError> {
        let entry = Arc::new(Registered {
            plugin: Arc::clone(&plugin),
            space,
            usage: Mutex::new(PluginUsage::new(Utc::now())),
            lifecycle: tokio::sync::Mutex::new(()),
        });

        {
            let _guard = entry.lifecycle.lock().await;
            plugin.initialize(&self.config.global_config).await?;
        }

        if self.config.strict_scan {
            if let Err(e) = plugin.test_connection(&Map::new()).await {
                warn!(plugin = %plugin_id, error = %e, "strict-mode connection probe failed");
            }
        }

        info!(plugin = %plugin_id, "plugin registered");
        self.catalog.insert(plugin_id, entry);
        Ok(())
    }

    /// Register every archive found under `root`, returning one result
    /// per archive in discovery order.
    pub async fn load_directory(&self, root: &Path) -> Vec<(String, Result<(), PluginError>)> {
        let archives = match loader::discover_archives(root) {
            Ok(archives) => archives,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "plugin discovery failed");
                return Vec::new();
            }
        };
        let mut results = Vec::with_capacity(archives.len());
        for archive in archives {
            let label = archive.display().to_string();
            let outcome = self.register_archive(&archive).await;
            if let Err(e) = &outcome {
                warn!(archive = %label, error = %e, "archive registration failed");
            }
            results.push((label, outcome));
        }
        results
    }

    /// Look up a plugin, recording the access for eviction policy.
    #[must_use]
    pub fn get_plugin(&self, plugin_id: &str) -> Option<Arc<dyn DataSourcePlugin>> {
        let entry = self.catalog.get(plugin_id)?;
        entry.usage.lock().touch(Utc::now());
        Some(Arc::clone(&entry.plugin))
    }

    /// Usage info for one plugin.
    #[must_use]
    pub fn usage(&self, plugin_id: &str) -> Option<PluginUsage> {
        self.catalog
            .get(plugin_id)
            .map(|entry| *entry.usage.lock())
    }

    /// The isolated symbol space of an archive plugin, if any.
    #[must_use]
    pub fn symbol_space(&self, plugin_id: &str) -> Option<Arc<SymbolSpace>> {
        self.catalog.get(plugin_id)?.space.clone()
    }

    /// Validate a config and open a connection in one step (the plugin
    /// node's path).
    pub async fn create_connection(
        &self,
        plugin_id: &str,
        config: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Box<dyn Connection>, PluginError> {
        let plugin = self
            .get_plugin(plugin_id)
            .ok_or_else(|| PluginError::NotFound {
                plugin_id: plugin_id.to_owned(),
            })?;

        let report = plugin.validate_config(config);
        if !report.is_valid() {
            return Err(PluginError::InvalidConfig {
                summary: report.summary(),
            });
        }

        plugin.create_connection(config, ctx).await
    }

    /// Out-of-band connectivity probe (config tooling path).
    pub async fn test_connection(
        &self,
        plugin_id: &str,
        config: &Map<String, Value>,
    ) -> Result<TestReport, PluginError> {
        let plugin = self
            .get_plugin(plugin_id)
            .ok_or_else(|| PluginError::NotFound {
                plugin_id: plugin_id.to_owned(),
            })?;
        plugin.test_connection(config).await
    }

    /// Remove a plugin: `destroy` (serialized), then dispose the
    /// symbol space so cached handles cannot outlive teardown.
    #[instrument(skip(self), err)]
    pub async fn unregister(&self, plugin_id: &str) -> Result<(), PluginError> {
        let (_, entry) = self
            .catalog
            .remove(plugin_id)
            .ok_or_else(|| PluginError::NotFound {
                plugin_id: plugin_id.to_owned(),
            })?;

        {
            let _guard = entry.lifecycle.lock().await;
            if let Err(e) = entry.plugin.destroy().await {
                warn!(plugin = %plugin_id, error = %e, "plugin destroy failed");
            }
        }
        if let Some(space) = &entry.space {
            space.dispose();
        }
        info!(plugin = %plugin_id, "plugin unregistered");
        Ok(())
    }

    /// Mark a plugin system-critical: the resource manager never
    /// evicts it.
    pub fn mark_system_critical(&self, plugin_id: impl Into<String>) {
        self.system_critical.write().insert(plugin_id.into());
    }

    #[must_use]
    pub fn is_system_critical(&self, plugin_id: &str) -> bool {
        self.system_critical.read().contains(plugin_id)
    }

    /// Ids of all registered plugins.
    #[must_use]
    pub fn plugin_ids(&self) -> Vec<String> {
        self.catalog.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.catalog.contains_key(plugin_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    fn log_findings(&self, plugin_id: &str, report: &ScanReport) {
        for finding in &report.findings {
            match finding.severity {
                Severity::Critical | Severity::Warning => {
                    warn!(plugin = %plugin_id, rule = %finding.rule, "{}", finding.message);
                }
                Severity::Minor | Severity::Info => {
                    info!(plugin = %plugin_id, rule = %finding.rule, "{}", finding.message);
                }
            }
        }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("count", &self.catalog.len())
            .field("plugins", &self.plugin_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::MockSourcePlugin;
    use serde_json::json;

    fn registry() -> PluginRegistry {
        PluginRegistry::new(PluginRegistryConfig::default())
    }

    #[tokio::test]
    async fn register_initializes_exactly_once() {
        let reg = registry();
        let plugin = Arc::new(MockSourcePlugin::new("mock", json!([1, 2])));
        reg.register(plugin.clone()).await.unwrap();
        assert_eq!(plugin.counters().initialize_calls(), 1);
        assert!(reg.contains("mock"));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let reg = registry();
        reg.register(Arc::new(MockSourcePlugin::new("mock", json!(null))))
            .await
            .unwrap();
        let err = reg
            .register(Arc::new(MockSourcePlugin::new("mock", json!(null))))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn failed_initialize_keeps_plugin_out() {
        let reg = registry();
        let plugin = Arc::new(MockSourcePlugin::new("broken", json!(null)).failing_initialize());
        let err = reg.register(plugin).await.unwrap_err();
        assert!(matches!(err, PluginError::Initialize { .. }));
        assert!(!reg.contains("broken"));
    }

    #[tokio::test]
    async fn unregister_destroys_exactly_once() {
        let reg = registry();
        let plugin = Arc::new(MockSourcePlugin::new("mock", json!(null)));
        reg.register(plugin.clone()).await.unwrap();
        reg.unregister("mock").await.unwrap();
        assert_eq!(plugin.counters().destroy_calls(), 1);
        assert!(!reg.contains("mock"));
        assert!(matches!(
            reg.unregister("mock").await.unwrap_err(),
            PluginError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn access_count_grows_but_last_access_debounces() {
        let reg = registry();
        reg.register(Arc::new(MockSourcePlugin::new("mock", json!(null))))
            .await
            .unwrap();
        let before = reg.usage("mock").unwrap();
        let _ = reg.get_plugin("mock");
        let _ = reg.get_plugin("mock");
        let after = reg.usage("mock").unwrap();
        assert_eq!(after.access_count, 2);
        // Within the debounce window the timestamp stays put.
        assert_eq!(after.last_access, before.last_access);
    }

    #[tokio::test]
    async fn create_connection_validates_config_first() {
        let reg = registry();
        reg.register(Arc::new(
            MockSourcePlugin::new("mock", json!([1])).requiring("path"),
        ))
        .await
        .unwrap();

        let ctx = ExecutionContext::new("wf");
        let err = reg
            .create_connection("mock", &Map::new(), &ctx)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::InvalidConfig { .. }));

        let mut config = Map::new();
        config.insert("path".into(), json!("/tmp/data"));
        let mut conn = reg.create_connection("mock", &config, &ctx).await.unwrap();
        assert_eq!(conn.read_data(&ctx).await.unwrap(), json!([1]));
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_plugin_is_not_found() {
        let reg = registry();
        let ctx = ExecutionContext::new("wf");
        let err = reg
            .create_connection("ghost", &Map::new(), &ctx)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::NotFound { .. }));
    }
}
