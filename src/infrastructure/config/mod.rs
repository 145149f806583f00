//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::application::errors::{ConfigError, HostError};
use crate::application::messaging::PermissionResolver;
use crate::domain::traits::SettingStore;
use crate::infrastructure::database::SqliteSettingStore;
use crate::infrastructure::storage::MemorySettingStore;

/// Host configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub host: HostConfig,
    pub accounts: Vec<AccountConfig>,
    pub plugins: PluginsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HostConfig {
    pub name: String,
    /// Prefix every command must start with; empty accepts bare commands.
    pub prefix: String,
    /// User ids trusted on every account.
    pub maintainers: Vec<String>,
}

/// One chat account the host logs in as
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AccountConfig {
    pub id: String,
    /// User ids trusted on this account only.
    pub masters: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PluginsConfig {
    /// Installed plugin packages, each in a `<module-prefix><name>` directory.
    pub module_dir: PathBuf,
    /// Plugins under development; searched before `module-dir`.
    pub local_dir: PathBuf,
    pub module_prefix: String,
    /// Manifest file name inside a plugin directory.
    pub manifest: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: "plughost".to_string(),
            prefix: String::new(),
            maintainers: Vec::new(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            module_dir: PathBuf::from("./modules"),
            local_dir: PathBuf::from("./plugins"),
            module_prefix: "plughost-plugin-".to_string(),
            manifest: "plugin.yaml".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: PathBuf::from("data/settings.db"),
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| ConfigError::InvalidValue(format!("Failed to write config: {}", e)))
    }

    /// Defaults with environment overrides applied
    pub fn load_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// `PLUGHOST_PREFIX` replaces the command prefix, `PLUGHOST_MAINTAINERS`
    /// (comma separated) extends the maintainer list.
    pub fn apply_env(&mut self) {
        if let Ok(prefix) = std::env::var("PLUGHOST_PREFIX") {
            self.host.prefix = prefix;
        }

        if let Ok(maintainers) = std::env::var("PLUGHOST_MAINTAINERS") {
            for id in maintainers.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if !self.host.maintainers.iter().any(|m| m == id) {
                    self.host.maintainers.push(id.to_string());
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, account) in self.accounts.iter().enumerate() {
            if account.id.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("accounts[{index}].id")));
            }
        }
        if self.plugins.manifest.trim().is_empty() {
            return Err(ConfigError::MissingField("plugins.manifest".to_string()));
        }
        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("storage.path".to_string()));
        }
        Ok(())
    }

    pub fn permission_resolver(&self) -> PermissionResolver {
        self.accounts.iter().fold(
            PermissionResolver::new(self.host.maintainers.iter().cloned()),
            |resolver, account| resolver.with_masters(account.id.clone(), account.masters.iter().cloned()),
        )
    }

    pub fn setting_store(&self) -> Result<Arc<dyn SettingStore>, HostError> {
        Ok(match self.storage.backend {
            StorageBackend::Memory => Arc::new(MemorySettingStore::new()),
            StorageBackend::Sqlite => Arc::new(SqliteSettingStore::open(&self.storage.path)?),
        })
    }
}
