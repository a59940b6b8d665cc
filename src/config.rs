//! Engine configuration.
//!
//! Explicit construction is the normal path; [`EngineConfig::from_env`]
//! layers `FLOWLOOM_*` environment variables (including a `.env` file
//! via dotenvy) over the defaults for deployments that configure
//! through the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for [`WorkflowEngine`](crate::engine::WorkflowEngine).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Worker bound for parallel execution; 1 selects the sequential
    /// scheduler. A workflow's `globalConfig.maxConcurrentNodes`
    /// overrides this per execution.
    pub max_concurrent_nodes: usize,
    /// How long `shutdown` waits for in-flight executions.
    pub drain_timeout: Duration,
    /// Directory scanned for plugin archives at startup, if any.
    pub plugin_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            drain_timeout: Duration::from_secs(60),
            plugin_dir: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `FLOWLOOM_*` environment variables:
    /// `FLOWLOOM_MAX_CONCURRENT_NODES`, `FLOWLOOM_DRAIN_TIMEOUT_SECS`,
    /// `FLOWLOOM_PLUGIN_DIR`.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        if let Some(n) = env_parse::<usize>("FLOWLOOM_MAX_CONCURRENT_NODES") {
            config.max_concurrent_nodes = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>("FLOWLOOM_DRAIN_TIMEOUT_SECS") {
            config.drain_timeout = Duration::from_secs(secs);
        }
        if let Ok(dir) = std::env::var("FLOWLOOM_PLUGIN_DIR") {
            if !dir.is_empty() {
                config.plugin_dir = Some(PathBuf::from(dir));
            }
        }
        config
    }

    /// Force the sequential scheduler.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.max_concurrent_nodes = 1;
        self
    }

    /// Set the parallel worker bound.
    #[must_use]
    pub fn with_max_concurrent_nodes(mut self, limit: usize) -> Self {
        self.max_concurrent_nodes = limit.max(1);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.max_concurrent_nodes >= 1);
        assert_eq!(config.drain_timeout, Duration::from_secs(60));
        assert!(config.plugin_dir.is_none());
    }

    #[test]
    fn builders_clamp_to_one_worker() {
        let config = EngineConfig::default().with_max_concurrent_nodes(0);
        assert_eq!(config.max_concurrent_nodes, 1);
        assert_eq!(EngineConfig::default().sequential().max_concurrent_nodes, 1);
    }
}
