//! Loading data-source plugins from archives on disk.
//!
//! An archive is a directory containing the SPI descriptor
//! (`plugin.spi`, naming the exported constructor symbol), the
//! plugin's shared library, and optionally a `plugin.yml` manifest.
//! The constructor must have the signature
//! `fn() -> Box<dyn DataSourcePlugin>`.
//!
//! Loaded libraries stay alive as long as their [`PluginArchive`];
//! dropping the archive (via symbol-space disposal) unmaps the code,
//! which is why disposal must follow `destroy` and never precede it.

// FFI into plugin libraries requires unsafe.
#![allow(unsafe_code)]

use libloading::Library;
use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::isolation::{SymbolHandle, SymbolSource};
use super::manifest::{self, PluginManifest};
use super::DataSourcePlugin;

/// Platform-specific shared-library extension.
#[must_use]
pub fn library_extension() -> &'static str {
    if cfg!(target_os = "windows") {
        "dll"
    } else if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    }
}

/// Errors from the archive loading layer.
#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("archive not found: {path}")]
    #[diagnostic(code(flowloom::loader::missing_archive))]
    MissingArchive { path: String },

    #[error("archive '{path}' has no SPI descriptor")]
    #[diagnostic(
        code(flowloom::loader::missing_spi),
        help("Add a plugin.spi file naming the exported constructor symbol.")
    )]
    MissingSpi { path: String },

    #[error("archive '{path}' contains no shared library")]
    #[diagnostic(code(flowloom::loader::missing_library))]
    MissingLibrary { path: String },

    #[error("failed to load library '{path}': {reason}")]
    #[diagnostic(code(flowloom::loader::library))]
    Library { path: String, reason: String },

    #[error("constructor symbol '{symbol}' not found in '{path}': {reason}")]
    #[diagnostic(code(flowloom::loader::symbol))]
    Symbol {
        symbol: String,
        path: String,
        reason: String,
    },

    #[error("plugin constructor panicked in '{path}'")]
    #[diagnostic(code(flowloom::loader::panic))]
    ConstructorPanic { path: String },

    #[error("archive read error: {0}")]
    #[diagnostic(code(flowloom::loader::io))]
    Io(#[from] std::io::Error),
}

/// A loaded plugin archive: the constructed plugin, the library kept
/// alive behind it, and the manifest if one was present.
pub struct PluginArchive {
    pub path: PathBuf,
    pub plugin: Box<dyn DataSourcePlugin>,
    pub manifest: Option<PluginManifest>,
    library: Library,
}

impl PluginArchive {
    /// Split the archive into its plugin, manifest, and a
    /// [`SymbolSource`] wrapping the library. The library stays alive
    /// inside the returned source; the plugin's code is unmapped only
    /// when the source (via its symbol space) is disposed.
    #[must_use]
    pub fn split(self) -> (Box<dyn DataSourcePlugin>, Option<PluginManifest>, LibrarySource) {
        (
            self.plugin,
            self.manifest,
            LibrarySource {
                library: self.library,
            },
        )
    }
}

impl std::fmt::Debug for PluginArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginArchive")
            .field("path", &self.path)
            .field("manifest", &self.manifest.as_ref().map(|m| &m.id))
            .finish()
    }
}

/// Find the shared library inside an archive directory.
pub fn find_library(archive: &Path) -> Result<PathBuf, LoadError> {
    let ext = library_extension();
    let entries = std::fs::read_dir(archive)?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(ext) {
            return Ok(path);
        }
    }
    Err(LoadError::MissingLibrary {
        path: archive.display().to_string(),
    })
}

/// Load a plugin from an archive directory.
///
/// Reads the SPI descriptor, opens the library, resolves the
/// constructor, and calls it under a panic guard.
pub fn load_archive(archive: &Path) -> Result<PluginArchive, LoadError> {
    if !archive.is_dir() {
        return Err(LoadError::MissingArchive {
            path: archive.display().to_string(),
        });
    }

    let symbol = manifest::read_spi_symbol(archive)?.ok_or_else(|| LoadError::MissingSpi {
        path: archive.display().to_string(),
    })?;
    let library_path = find_library(archive)?;
    let manifest = PluginManifest::load_from(archive)?;

    debug!(
        archive = %archive.display(),
        library = %library_path.display(),
        %symbol,
        "loading plugin archive"
    );

    // SAFETY: we trust the archive (it passed the security scan) to
    // export the constructor with the documented signature.
    let library = unsafe {
        Library::new(&library_path).map_err(|e| LoadError::Library {
            path: library_path.display().to_string(),
            reason: e.to_string(),
        })?
    };

    let plugin = {
        let constructor = unsafe {
            library
                .get::<fn() -> Box<dyn DataSourcePlugin>>(symbol.as_bytes())
                .map_err(|e| LoadError::Symbol {
                    symbol: symbol.clone(),
                    path: library_path.display().to_string(),
                    reason: e.to_string(),
                })?
        };
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| constructor())).map_err(
            |_| LoadError::ConstructorPanic {
                path: library_path.display().to_string(),
            },
        )?
    };

    Ok(PluginArchive {
        path: archive.to_path_buf(),
        plugin,
        manifest,
        library,
    })
}

/// Scan a directory for plugin archives (immediate subdirectories that
/// carry an SPI descriptor).
pub fn discover_archives(root: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut found = Vec::new();
    if !root.is_dir() {
        return Ok(found);
    }
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() && path.join(manifest::SPI_DESCRIPTOR).exists() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// A loaded library exposed as a symbol source for [`SymbolSpace`]
/// resolution.
///
/// [`SymbolSpace`]: super::isolation::SymbolSpace
pub struct LibrarySource {
    library: Library,
}

impl SymbolSource for LibrarySource {
    fn lookup(&self, symbol: &str) -> Option<SymbolHandle> {
        // SAFETY: the handle is only used as an opaque token; callers
        // re-resolve through the space before any FFI call.
        unsafe {
            self.library
                .get::<*const ()>(symbol.as_bytes())
                .ok()
                .map(|sym| *sym as SymbolHandle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::manifest::SPI_DESCRIPTOR;

    #[test]
    fn loading_a_missing_archive_fails() {
        let err = load_archive(Path::new("/nonexistent/archive")).unwrap_err();
        assert!(matches!(err, LoadError::MissingArchive { .. }));
    }

    #[test]
    fn archive_without_descriptor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_archive(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::MissingSpi { .. }));
    }

    #[test]
    fn archive_without_library_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SPI_DESCRIPTOR), "create_plugin\n").unwrap();
        let err = load_archive(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::MissingLibrary { .. }));
    }

    #[test]
    fn discovery_only_finds_descriptor_carrying_directories() {
        let root = tempfile::tempdir().unwrap();
        let with = root.path().join("real-plugin");
        std::fs::create_dir(&with).unwrap();
        std::fs::write(with.join(SPI_DESCRIPTOR), "create_plugin\n").unwrap();
        let without = root.path().join("not-a-plugin");
        std::fs::create_dir(&without).unwrap();

        let found = discover_archives(root.path()).unwrap();
        assert_eq!(found, vec![with]);
    }

    #[test]
    fn discovery_of_a_missing_root_is_empty() {
        assert!(discover_archives(Path::new("/nonexistent")).unwrap().is_empty());
    }
}
