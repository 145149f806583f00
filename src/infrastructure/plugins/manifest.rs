//! Plugin manifest definition

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::application::errors::{HostError, HostResult};

static PLUGIN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("plugin name regex is valid"));

/// Whether `name` is usable as a plugin (and directory) name
pub fn is_valid_plugin_name(name: &str) -> bool {
    PLUGIN_NAME.is_match(name)
}

/// Plugin metadata, read from the manifest file in the plugin directory
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginManifest {
    /// Plugin name (required)
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    pub description: Option<String>,

    pub author: Option<String>,

    /// Shared library exporting the plugin constructor, relative to the
    /// plugin directory
    pub library: Option<PathBuf>,

    /// Name of an in-process factory; defaults to the plugin name
    pub entry: Option<String>,

    /// Free-form settings handed to the factory
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

impl PluginManifest {
    pub fn from_file(path: impl AsRef<Path>) -> HostResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HostError::PluginNotInstantiated(format!("Failed to read manifest {}: {}", path.display(), e))
        })?;

        let manifest: PluginManifest = serde_yaml::from_str(&content).map_err(|e| {
            HostError::PluginNotInstantiated(format!("Failed to parse manifest {}: {}", path.display(), e))
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> HostResult<()> {
        if !is_valid_plugin_name(&self.name) {
            return Err(HostError::PluginNotInstantiated(format!(
                "Invalid plugin name '{}'",
                self.name
            )));
        }
        if self.version.trim().is_empty() {
            return Err(HostError::PluginNotInstantiated(format!(
                "Plugin '{}' has an empty version",
                self.name
            )));
        }
        if self.library.is_some() && self.entry.is_some() {
            return Err(HostError::PluginNotInstantiated(format!(
                "Plugin '{}' declares both library and entry",
                self.name
            )));
        }
        Ok(())
    }

    /// Factory name for in-process plugins
    pub fn entry_name(&self) -> &str {
        self.entry.as_deref().unwrap_or(&self.name)
    }
}
