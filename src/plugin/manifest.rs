//! Plugin archive manifests.
//!
//! An archive is a directory holding:
//!
//! - `plugin.spi` — the SPI descriptor: one line naming the exported
//!   constructor symbol (conventionally `create_plugin`),
//! - the plugin's shared library,
//! - optionally `plugin.yml` — the manifest below.
//!
//! A manifest is optional but recommended; when absent, the plugin's
//! self-reported [`PluginInfo`](super::PluginInfo) is authoritative.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use super::params::ParameterSpec;

/// File name of the SPI descriptor inside an archive.
pub const SPI_DESCRIPTOR: &str = "plugin.spi";
/// File name of the optional manifest inside an archive.
pub const MANIFEST_FILE: &str = "plugin.yml";

/// Version compatibility bounds declared by a manifest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compatibility {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_engine_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_engine_version: Option<String>,
}

/// The `plugin.yml` manifest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterSpec>,
    /// Named example config blocks for documentation.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub examples: Map<String, Value>,
    #[serde(default, skip_serializing_if = "is_default_compat")]
    pub compatibility: Compatibility,
}

fn is_default_compat(c: &Compatibility) -> bool {
    *c == Compatibility::default()
}

impl PluginManifest {
    /// Parse a manifest from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Load the manifest from an archive directory, if present.
    pub fn load_from(archive: &Path) -> std::io::Result<Option<Self>> {
        let path = archive.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        match Self::from_yaml(&text) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            )),
        }
    }
}

/// Read the SPI descriptor from an archive directory: the first
/// non-empty, non-comment line is the constructor symbol name.
pub fn read_spi_symbol(archive: &Path) -> std::io::Result<Option<String>> {
    let path = archive.join(SPI_DESCRIPTOR);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_parses_the_documented_shape() {
        let yaml = r#"
id: file-source
name: File source
version: "1.2.0"
author: data-team
tags: [files, local]
parameters:
  - name: path
    type: file-path
    required: true
examples:
  basic:
    path: /var/log/app.log
"#;
        let manifest = PluginManifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.id, "file-source");
        assert_eq!(manifest.parameters.len(), 1);
        assert!(manifest.examples.contains_key("basic"));
    }

    #[test]
    fn spi_descriptor_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SPI_DESCRIPTOR),
            "# constructor symbol\ncreate_plugin\n",
        )
        .unwrap();
        let symbol = read_spi_symbol(dir.path()).unwrap();
        assert_eq!(symbol.as_deref(), Some("create_plugin"));
    }

    #[test]
    fn missing_descriptor_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_spi_symbol(dir.path()).unwrap(), None);
    }
}
