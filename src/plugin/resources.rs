//! Background resource management for loaded plugins.
//!
//! A [`PluginResourceManager`] runs on its own cadence, independent of
//! any workflow execution, and unloads plugins through the registry's
//! standard unregister path. Three policies apply on the regular sweep:
//!
//! - **Idle**: unload plugins whose idle time exceeds the timeout.
//! - **Memory pressure**: above the utilization threshold, unload
//!   least-used plugins (access count, then last access) until
//!   pressure abates, capped per pass.
//! - **Capacity**: above `max_plugins`, unload lowest-priority plugins
//!   until at the cap.
//!
//! An emergency pass runs on a tighter cadence and fires only above
//! the emergency threshold. System-critical plugins are never evicted.
//! Eviction failures are logged, never surfaced to user code.

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::{PluginRegistry, PluginUsage};

/// Source of the memory-utilization signal (0.0 ..= 1.0).
pub trait MemoryGauge: Send + Sync {
    fn utilization(&self) -> f64;
}

/// Linux `/proc`-backed gauge: process RSS against total system
/// memory. Reports 0.0 wherever `/proc` is unavailable, which disables
/// the memory policies without affecting idle/capacity eviction.
#[derive(Debug, Default)]
pub struct ProcessMemoryGauge;

impl MemoryGauge for ProcessMemoryGauge {
    fn utilization(&self) -> f64 {
        read_proc_utilization().unwrap_or(0.0)
    }
}

fn read_proc_utilization() -> Option<f64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: f64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let total_kb: f64 = meminfo
        .lines()
        .find(|l| l.starts_with("MemTotal:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;
    // Page size is 4 KiB on every platform this gauge runs on.
    Some((rss_pages * 4.0) / total_kb)
}

/// Tunables for the manager.
#[derive(Clone, Debug)]
pub struct ResourceManagerConfig {
    /// Regular sweep cadence.
    pub sweep_interval: Duration,
    /// Idle time after which a plugin is unloaded.
    pub idle_timeout: Duration,
    /// Memory utilization above which the pressure policy engages.
    pub memory_threshold: f64,
    /// Utilization above which the emergency pass engages.
    pub emergency_threshold: f64,
    /// Emergency pass cadence.
    pub emergency_interval: Duration,
    /// Loaded-plugin ceiling for the capacity policy.
    pub max_plugins: usize,
    /// Per-pass ceiling for memory-pressure evictions.
    pub max_memory_evictions: usize,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5 * 60),
            idle_timeout: Duration::from_secs(30 * 60),
            memory_threshold: 0.8,
            emergency_threshold: 0.9,
            emergency_interval: Duration::from_secs(30),
            max_plugins: 50,
            max_memory_evictions: 5,
        }
    }
}

/// The background eviction manager.
pub struct PluginResourceManager {
    registry: Arc<PluginRegistry>,
    config: ResourceManagerConfig,
    gauge: Arc<dyn MemoryGauge>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PluginResourceManager {
    #[must_use]
    pub fn new(
        registry: Arc<PluginRegistry>,
        config: ResourceManagerConfig,
        gauge: Arc<dyn MemoryGauge>,
    ) -> Self {
        Self {
            registry,
            config,
            gauge,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the sweep and emergency loops on the current runtime.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let manager = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                manager.sweep_once().await;
            }
        }));

        let manager = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.emergency_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.emergency_once().await;
            }
        }));
    }

    /// Stop the background loops. Any in-flight sweep finishes its
    /// current eviction before the task is dropped.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// One regular sweep: idle, then memory pressure, then capacity.
    /// Public so deployments (and tests) can force a pass.
    pub async fn sweep_once(&self) {
        let evicted_idle = self.evict_idle().await;
        let evicted_memory = self.evict_memory_pressure().await;
        let evicted_capacity = self.evict_over_capacity().await;
        debug!(
            idle = evicted_idle,
            memory = evicted_memory,
            capacity = evicted_capacity,
            "resource sweep complete"
        );
    }

    /// One emergency pass: memory pressure only, above the emergency
    /// threshold.
    pub async fn emergency_once(&self) {
        if self.gauge.utilization() > self.config.emergency_threshold {
            warn!("emergency memory pass engaged");
            self.evict_memory_pressure().await;
        }
    }

    async fn evict_idle(&self) -> usize {
        let now = Utc::now();
        let idle_cutoff = ChronoDuration::from_std(self.config.idle_timeout)
            .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 2));
        let mut evicted = 0;
        for (plugin_id, usage) in self.evictable() {
            if now - usage.last_access > idle_cutoff {
                self.evict(&plugin_id, "idle").await;
                evicted += 1;
            }
        }
        evicted
    }

    async fn evict_memory_pressure(&self) -> usize {
        let mut evicted = 0;
        while self.gauge.utilization() > self.config.memory_threshold
            && evicted < self.config.max_memory_evictions
        {
            let mut candidates = self.evictable();
            if candidates.is_empty() {
                break;
            }
            candidates.sort_by_key(|(_, usage)| (usage.access_count, usage.last_access));
            let (plugin_id, _) = &candidates[0];
            self.evict(plugin_id, "memory-pressure").await;
            evicted += 1;
        }
        evicted
    }

    async fn evict_over_capacity(&self) -> usize {
        let mut evicted = 0;
        loop {
            if self.registry.len() <= self.config.max_plugins {
                break;
            }
            let mut candidates = self.evictable();
            if candidates.is_empty() {
                break;
            }
            candidates.sort_by_key(|(_, usage)| (usage.access_count, usage.last_access));
            let (plugin_id, _) = &candidates[0];
            self.evict(plugin_id, "capacity").await;
            evicted += 1;
        }
        evicted
    }

    /// Registered plugins eligible for eviction, with their usage.
    fn evictable(&self) -> Vec<(String, PluginUsage)> {
        self.registry
            .plugin_ids()
            .into_iter()
            .filter(|id| !self.registry.is_system_critical(id))
            .filter_map(|id| self.registry.usage(&id).map(|usage| (id, usage)))
            .collect()
    }

    async fn evict(&self, plugin_id: &str, policy: &str) {
        match self.registry.unregister(plugin_id).await {
            Ok(()) => info!(plugin = %plugin_id, policy, "plugin evicted"),
            Err(e) => warn!(plugin = %plugin_id, policy, error = %e, "eviction failed"),
        }
    }
}

impl Drop for PluginResourceManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::registry::PluginRegistryConfig;
    use crate::utils::testing::{FixedGauge, MockSourcePlugin};
    use serde_json::json;

    async fn registry_with(ids: &[&str]) -> Arc<PluginRegistry> {
        let registry = Arc::new(PluginRegistry::new(PluginRegistryConfig::default()));
        for id in ids {
            registry
                .register(Arc::new(MockSourcePlugin::new(*id, json!(null))))
                .await
                .unwrap();
        }
        registry
    }

    fn manager(
        registry: Arc<PluginRegistry>,
        config: ResourceManagerConfig,
        gauge: Arc<FixedGauge>,
    ) -> PluginResourceManager {
        PluginResourceManager::new(registry, config, gauge)
    }

    #[tokio::test]
    async fn idle_plugins_are_evicted() {
        let registry = registry_with(&["stale"]).await;
        let config = ResourceManagerConfig {
            idle_timeout: Duration::from_secs(0),
            ..ResourceManagerConfig::default()
        };
        let mgr = manager(Arc::clone(&registry), config, Arc::new(FixedGauge::new(0.0)));
        // Give last_access a moment to fall behind the zero timeout.
        tokio::time::sleep(Duration::from_millis(5)).await;
        mgr.sweep_once().await;
        assert!(!registry.contains("stale"));
    }

    #[tokio::test]
    async fn memory_pressure_evicts_least_used_first() {
        let registry = registry_with(&["cold", "hot"]).await;
        // Make "hot" the more-used plugin.
        let _ = registry.get_plugin("hot");
        let _ = registry.get_plugin("hot");
        let gauge = Arc::new(FixedGauge::new(0.95));
        let config = ResourceManagerConfig {
            idle_timeout: Duration::from_secs(3600),
            max_memory_evictions: 1,
            ..ResourceManagerConfig::default()
        };
        let mgr = manager(Arc::clone(&registry), config, gauge);
        mgr.sweep_once().await;
        assert!(!registry.contains("cold"));
        assert!(registry.contains("hot"));
    }

    #[tokio::test]
    async fn memory_pass_respects_the_per_pass_cap() {
        let registry = registry_with(&["a", "b", "c"]).await;
        let gauge = Arc::new(FixedGauge::new(0.95));
        let config = ResourceManagerConfig {
            idle_timeout: Duration::from_secs(3600),
            max_memory_evictions: 2,
            ..ResourceManagerConfig::default()
        };
        let mgr = manager(Arc::clone(&registry), config, gauge);
        mgr.sweep_once().await;
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn system_critical_plugins_survive_every_policy() {
        let registry = registry_with(&["vital", "spare"]).await;
        registry.mark_system_critical("vital");
        let gauge = Arc::new(FixedGauge::new(0.95));
        let config = ResourceManagerConfig {
            idle_timeout: Duration::from_secs(0),
            max_plugins: 0,
            ..ResourceManagerConfig::default()
        };
        let mgr = manager(Arc::clone(&registry), config, gauge);
        tokio::time::sleep(Duration::from_millis(5)).await;
        mgr.sweep_once().await;
        assert!(registry.contains("vital"));
        assert!(!registry.contains("spare"));
    }

    #[tokio::test]
    async fn capacity_policy_trims_to_the_cap() {
        let registry = registry_with(&["a", "b", "c"]).await;
        let config = ResourceManagerConfig {
            idle_timeout: Duration::from_secs(3600),
            max_plugins: 2,
            ..ResourceManagerConfig::default()
        };
        let mgr = manager(
            Arc::clone(&registry),
            config,
            Arc::new(FixedGauge::new(0.0)),
        );
        mgr.sweep_once().await;
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn emergency_pass_only_fires_above_threshold() {
        let registry = registry_with(&["only"]).await;
        let gauge = Arc::new(FixedGauge::new(0.85));
        let config = ResourceManagerConfig {
            idle_timeout: Duration::from_secs(3600),
            ..ResourceManagerConfig::default()
        };
        let mgr = manager(Arc::clone(&registry), config, Arc::clone(&gauge));
        mgr.emergency_once().await;
        assert!(registry.contains("only"));

        gauge.set(0.95);
        mgr.emergency_once().await;
        assert!(!registry.contains("only"));
    }
}
