//! Per-plugin symbol isolation.
//!
//! Each archive-loaded plugin owns a [`SymbolSpace`]: a resolver that
//! decides, per symbol name, whether to serve the host's export table
//! or the plugin's own library. The precedence is fixed:
//!
//! 1. Names under a **shared prefix** (engine runtime and core
//!    interfaces) always resolve against the host.
//! 2. Everything else tries the plugin library first.
//! 3. On a miss, resolution falls back to the host — unless the name
//!    is under a **plugin prefix** (private third-party bundles such
//!    as database drivers, serializers, HTTP clients), which never
//!    escape the plugin.
//!
//! Two plugins may therefore bundle the same library at different
//! versions without observing each other: each space serves its own
//! copy and never the neighbour's.
//!
//! Disposing a space invalidates every cached handle; lookups on a
//! disposed space fail rather than touching a dropped library.

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

/// An opaque resolved symbol (raw address or token, depending on the
/// backing source).
pub type SymbolHandle = usize;

/// Shared prefixes applied when a plugin does not configure its own:
/// the engine's interfaces plus the language runtime.
pub const DEFAULT_SHARED_PREFIXES: &[&str] = &["flowloom", "std", "core", "alloc"];

/// Plugin-private prefixes applied by default: common third-party
/// libraries a plugin is likely to bundle at its own version.
pub const DEFAULT_PLUGIN_PREFIXES: &[&str] = &[
    "serde",
    "serde_json",
    "sqlx",
    "rusqlite",
    "postgres",
    "mysql",
    "reqwest",
    "hyper",
    "ureq",
];

/// Anything that can resolve symbol names.
pub trait SymbolSource: Send + Sync {
    fn lookup(&self, symbol: &str) -> Option<SymbolHandle>;
}

/// Errors from symbol resolution.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum IsolationError {
    #[error("symbol space for plugin '{plugin_id}' is disposed")]
    #[diagnostic(code(flowloom::isolation::disposed))]
    Disposed { plugin_id: String },

    #[error("symbol '{symbol}' not found for plugin '{plugin_id}'")]
    #[diagnostic(code(flowloom::isolation::not_found))]
    NotFound { plugin_id: String, symbol: String },
}

/// The host's export table: engine services made visible to plugins.
#[derive(Default)]
pub struct HostExports {
    table: Mutex<FxHashMap<String, SymbolHandle>>,
}

impl HostExports {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Export a host symbol to plugins.
    pub fn export(&self, symbol: impl Into<String>, handle: SymbolHandle) {
        self.table.lock().insert(symbol.into(), handle);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

impl SymbolSource for HostExports {
    fn lookup(&self, symbol: &str) -> Option<SymbolHandle> {
        self.table.lock().get(symbol).copied()
    }
}

/// An in-memory symbol table; the test stand-in for a loaded library.
#[derive(Default)]
pub struct TableSource {
    table: FxHashMap<String, SymbolHandle>,
}

impl TableSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, symbol: impl Into<String>, handle: SymbolHandle) -> Self {
        self.table.insert(symbol.into(), handle);
        self
    }
}

impl SymbolSource for TableSource {
    fn lookup(&self, symbol: &str) -> Option<SymbolHandle> {
        self.table.get(symbol).copied()
    }
}

/// Per-plugin prefix configuration.
#[derive(Clone, Debug)]
pub struct PrefixSets {
    pub shared: Vec<String>,
    pub plugin: Vec<String>,
}

impl Default for PrefixSets {
    fn default() -> Self {
        Self {
            shared: DEFAULT_SHARED_PREFIXES.iter().map(|s| (*s).to_owned()).collect(),
            plugin: DEFAULT_PLUGIN_PREFIXES.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

fn matches_prefix(symbol: &str, prefixes: &[String]) -> bool {
    // A prefix matches whole path segments only: `serde` covers
    // `serde::to_value` but not `serde_json` (which needs its own
    // entry).
    prefixes.iter().any(|p| {
        symbol == p
            || symbol
                .strip_prefix(p.as_str())
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

/// The per-plugin resolver.
pub struct SymbolSpace {
    plugin_id: String,
    prefixes: PrefixSets,
    host: Arc<dyn SymbolSource>,
    library: Mutex<Option<Box<dyn SymbolSource>>>,
    cache: Mutex<FxHashMap<String, SymbolHandle>>,
}

impl SymbolSpace {
    #[must_use]
    pub fn new(
        plugin_id: impl Into<String>,
        host: Arc<dyn SymbolSource>,
        library: Box<dyn SymbolSource>,
        prefixes: PrefixSets,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            prefixes,
            host,
            library: Mutex::new(Some(library)),
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Whether this space has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.library.lock().is_none()
    }

    /// Resolve a symbol according to the shared/plugin prefix policy.
    pub fn resolve(&self, symbol: &str) -> Result<SymbolHandle, IsolationError> {
        if let Some(handle) = self.cache.lock().get(symbol) {
            return Ok(*handle);
        }

        let library = self.library.lock();
        let Some(library) = library.as_deref() else {
            return Err(IsolationError::Disposed {
                plugin_id: self.plugin_id.clone(),
            });
        };

        let resolved = if matches_prefix(symbol, &self.prefixes.shared) {
            self.host.lookup(symbol)
        } else {
            library.lookup(symbol).or_else(|| {
                if matches_prefix(symbol, &self.prefixes.plugin) {
                    None
                } else {
                    self.host.lookup(symbol)
                }
            })
        };

        match resolved {
            Some(handle) => {
                self.cache.lock().insert(symbol.to_owned(), handle);
                Ok(handle)
            }
            None => Err(IsolationError::NotFound {
                plugin_id: self.plugin_id.clone(),
                symbol: symbol.to_owned(),
            }),
        }
    }

    /// Drop the library and invalidate every cached handle. Further
    /// lookups fail with [`IsolationError::Disposed`].
    pub fn dispose(&self) {
        self.cache.lock().clear();
        *self.library.lock() = None;
    }
}

impl std::fmt::Debug for SymbolSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolSpace")
            .field("plugin_id", &self.plugin_id)
            .field("disposed", &self.is_disposed())
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(library: TableSource, host: Arc<HostExports>) -> SymbolSpace {
        SymbolSpace::new("p1", host, Box::new(library), PrefixSets::default())
    }

    #[test]
    fn shared_prefixes_route_to_the_host() {
        let host = Arc::new(HostExports::new());
        host.export("flowloom::context::get", 0xA);
        // The library also claims the symbol; the host must win.
        let library = TableSource::new().with("flowloom::context::get", 0xB);
        let space = space(library, host);
        assert_eq!(space.resolve("flowloom::context::get"), Ok(0xA));
    }

    #[test]
    fn plugin_symbols_resolve_from_the_library_first() {
        let host = Arc::new(HostExports::new());
        host.export("helper::compute", 0x1);
        let library = TableSource::new().with("helper::compute", 0x2);
        let space = space(library, host);
        assert_eq!(space.resolve("helper::compute"), Ok(0x2));
    }

    #[test]
    fn library_misses_fall_back_to_the_host() {
        let host = Arc::new(HostExports::new());
        host.export("helper::compute", 0x1);
        let space = space(TableSource::new(), host);
        assert_eq!(space.resolve("helper::compute"), Ok(0x1));
    }

    #[test]
    fn plugin_prefixes_never_escape_to_the_host() {
        let host = Arc::new(HostExports::new());
        host.export("serde_json::to_value", 0x1);
        let space = space(TableSource::new(), host);
        let err = space.resolve("serde_json::to_value").unwrap_err();
        assert!(matches!(err, IsolationError::NotFound { .. }));
    }

    #[test]
    fn two_spaces_serve_their_own_library_versions() {
        let host = Arc::new(HostExports::new());
        let a = SymbolSpace::new(
            "a",
            Arc::clone(&host) as Arc<dyn SymbolSource>,
            Box::new(TableSource::new().with("serde_json::to_value", 0x10)),
            PrefixSets::default(),
        );
        let b = SymbolSpace::new(
            "b",
            host as Arc<dyn SymbolSource>,
            Box::new(TableSource::new().with("serde_json::to_value", 0x20)),
            PrefixSets::default(),
        );
        assert_eq!(a.resolve("serde_json::to_value"), Ok(0x10));
        assert_eq!(b.resolve("serde_json::to_value"), Ok(0x20));
    }

    #[test]
    fn disposal_invalidates_cached_handles() {
        let host = Arc::new(HostExports::new());
        let library = TableSource::new().with("x::y", 0x5);
        let space = space(library, host);
        assert_eq!(space.resolve("x::y"), Ok(0x5));
        space.dispose();
        assert!(space.is_disposed());
        assert_eq!(
            space.resolve("x::y"),
            Err(IsolationError::Disposed {
                plugin_id: "p1".into()
            })
        );
    }
}
