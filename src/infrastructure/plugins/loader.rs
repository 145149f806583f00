//! Plugin loader - Finds plugin directories and instantiates plugins
//!
//! A plugin directory holds a manifest. The manifest either names a shared
//! library exporting [`CREATE_SYMBOL`] or an in-process factory registered
//! with [`PluginLoader::register_factory`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use libloading::Symbol;
use tracing::{debug, info, warn};

use super::cache::{CachedModule, ModuleCache, ModuleToken};
use super::library::PluginLibrary;
use super::manifest::{is_valid_plugin_name, PluginManifest};
use crate::application::errors::{HostError, HostResult};
use crate::infrastructure::config::PluginsConfig;
use crate::plugins::Plugin;

/// Symbol every plugin library exports, see [`crate::declare_plugin`].
pub const CREATE_SYMBOL: &[u8] = b"plughost_plugin_create";

/// Function signature for plugin construction
pub type PluginCreateFn = unsafe extern "C" fn() -> *mut Plugin;

/// Builds an in-process plugin from its manifest
pub type PluginFactory = Arc<dyn Fn(&PluginManifest) -> HostResult<Plugin> + Send + Sync>;

/// Exports a plugin constructor from a `cdylib` crate.
///
/// The library must be built against the same version of this crate as the
/// host.
#[macro_export]
macro_rules! declare_plugin {
    ($constructor:path) => {
        #[no_mangle]
        pub extern "C" fn plughost_plugin_create() -> *mut $crate::plugins::Plugin {
            let plugin: $crate::plugins::Plugin = $constructor();
            Box::into_raw(Box::new(plugin))
        }
    };
}

/// Plugin names found on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    /// Installed packages, full directory names (prefix included)
    pub modules: Vec<String>,
    /// Local development plugins
    pub local: Vec<String>,
}

/// A resolved plugin directory
#[derive(Debug, Clone)]
pub struct PluginSource {
    /// Registry name (module prefix stripped)
    pub name: String,
    pub dir: PathBuf,
    pub manifest: PluginManifest,
    pub token: ModuleToken,
}

/// Plugin loader
pub struct PluginLoader {
    module_dir: PathBuf,
    local_dir: PathBuf,
    module_prefix: String,
    manifest_file: String,
    factories: RwLock<HashMap<String, PluginFactory>>,
    cache: Mutex<ModuleCache>,
}

impl PluginLoader {
    pub fn new(module_dir: impl Into<PathBuf>, local_dir: impl Into<PathBuf>) -> Self {
        let defaults = PluginsConfig::default();
        Self {
            module_dir: module_dir.into(),
            local_dir: local_dir.into(),
            module_prefix: defaults.module_prefix,
            manifest_file: defaults.manifest,
            factories: RwLock::new(HashMap::new()),
            cache: Mutex::new(ModuleCache::new()),
        }
    }

    pub fn from_config(config: &PluginsConfig) -> Self {
        Self::new(&config.module_dir, &config.local_dir)
            .with_module_prefix(&config.module_prefix)
            .with_manifest_file(&config.manifest)
    }

    pub fn with_module_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.module_prefix = prefix.into();
        self
    }

    pub fn with_manifest_file(mut self, file: impl Into<String>) -> Self {
        self.manifest_file = file.into();
        self
    }

    pub fn module_prefix(&self) -> &str {
        &self.module_prefix
    }

    fn cache(&self) -> MutexGuard<'_, ModuleCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `entry` available to manifests without a library.
    pub fn register_factory<F>(&self, entry: impl Into<String>, factory: F)
    where
        F: Fn(&PluginManifest) -> HostResult<Plugin> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.into(), Arc::new(factory));
    }

    /// `weather` and `plughost-plugin-weather` both name the same plugin.
    pub fn short_name<'a>(&self, name: &'a str) -> &'a str {
        name.strip_prefix(self.module_prefix.as_str())
            .filter(|rest| !rest.is_empty())
            .unwrap_or(name)
    }

    /// Scans both plugin roots. Missing roots are created; unreadable ones
    /// contribute nothing.
    pub fn find_candidates(&self) -> Candidates {
        Candidates {
            modules: self.scan(&self.module_dir, Some(&self.module_prefix)),
            local: self.scan(&self.local_dir, None),
        }
    }

    fn scan(&self, root: &Path, required_prefix: Option<&str>) -> Vec<String> {
        if let Err(e) = std::fs::create_dir_all(root) {
            warn!("Failed to create plugin directory {}: {}", root.display(), e);
        }
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read plugin directory {}: {}", root.display(), e);
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .filter(|name| required_prefix.map_or(true, |prefix| name.starts_with(prefix)))
            .filter(|name| is_valid_plugin_name(self.short_name(name)))
            .filter(|name| root.join(name).join(&self.manifest_file).is_file())
            .collect();
        names.sort();
        names
    }

    /// Finds the directory for `name`, local plugins first.
    pub fn resolve(&self, name: &str) -> HostResult<PluginSource> {
        let short = self.short_name(name);
        if !is_valid_plugin_name(short) {
            return Err(HostError::PluginNotFound(name.to_string()));
        }
        let prefixed = format!("{}{}", self.module_prefix, short);
        let candidates = self.find_candidates();

        let dir = if let Some(found) = candidates.local.iter().find(|n| *n == short || **n == prefixed) {
            self.local_dir.join(found)
        } else if let Some(found) = candidates.modules.iter().find(|n| **n == prefixed || *n == short) {
            self.module_dir.join(found)
        } else {
            return Err(HostError::PluginNotFound(name.to_string()));
        };
        let dir = std::fs::canonicalize(&dir).unwrap_or(dir);

        let (manifest, token) = self.read_manifest(&dir)?;
        Ok(PluginSource {
            name: short.to_string(),
            dir,
            manifest,
            token,
        })
    }

    fn read_manifest(&self, dir: &Path) -> HostResult<(PluginManifest, ModuleToken)> {
        let path = dir.join(&self.manifest_file);
        if let Some(CachedModule::Manifest { manifest, token }) = self.cache().get(&path) {
            debug!(path = %path.display(), "Manifest served from cache");
            return Ok((manifest.clone(), *token));
        }

        let manifest = PluginManifest::from_file(&path)?;
        let token = ModuleToken::compute(dir)
            .map_err(|e| HostError::PluginNotInstantiated(format!("{}: {}", dir.display(), e)))?;
        self.cache().insert(
            path,
            CachedModule::Manifest {
                manifest: manifest.clone(),
                token,
            },
        );
        Ok((manifest, token))
    }

    /// Instantiates the plugin `source` describes.
    pub fn load(&self, source: &PluginSource) -> HostResult<Plugin> {
        let mut plugin = match &source.manifest.library {
            Some(library) => self.load_library(source, &source.dir.join(library))?,
            None => {
                let entry = source.manifest.entry_name();
                let factory = self
                    .factories
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(entry)
                    .cloned()
                    .ok_or_else(|| {
                        HostError::PluginNotInstantiated(format!(
                            "{}: no plugin factory named '{}'",
                            source.name, entry
                        ))
                    })?;
                factory(&source.manifest)?
            }
        };

        plugin.assign_source(&source.name, source.dir.clone(), &source.manifest, source.token);
        info!("Loaded plugin: {} v{}", plugin.name(), plugin.version());
        Ok(plugin)
    }

    fn load_library(&self, source: &PluginSource, path: &Path) -> HostResult<Plugin> {
        let library = match self.cache().get(path) {
            Some(CachedModule::Library(library)) => Some(library.clone()),
            _ => None,
        };
        let library = match library {
            Some(library) => library,
            None => {
                let library = Arc::new(PluginLibrary::open(&source.name, path, source.token)?);
                self.cache()
                    .insert(path.to_path_buf(), CachedModule::Library(library.clone()));
                library
            }
        };

        // SAFETY: the symbol is generated by `declare_plugin!` with the
        // matching signature; a null return is checked below.
        let raw = unsafe {
            let create: Symbol<PluginCreateFn> = library.get(CREATE_SYMBOL).map_err(|e| {
                HostError::PluginNotInstantiated(format!("{}: missing constructor: {}", source.name, e))
            })?;
            create()
        };
        if raw.is_null() {
            return Err(HostError::PluginNotInstantiated(format!(
                "{}: constructor returned null",
                source.name
            )));
        }

        // SAFETY: produced by `Box::into_raw` in `declare_plugin!`.
        let mut plugin = unsafe { *Box::from_raw(raw) };
        plugin.attach_library(library);
        Ok(plugin)
    }

    /// Forgets everything cached from `dir` and below.
    pub fn invalidate(&self, dir: &Path) -> usize {
        let removed = self.cache().invalidate(dir);
        debug!(dir = %dir.display(), removed, "Module cache invalidated");
        removed
    }

    /// True when the plugin's directory changed since it was loaded.
    pub fn is_outdated(&self, plugin: &Plugin) -> bool {
        match (plugin.source_path(), plugin.token()) {
            (Some(dir), Some(loaded)) => ModuleToken::compute(dir).map_or(false, |current| current != loaded),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_plugin(root: &Path, dir: &str, manifest: &str) {
        std::fs::create_dir_all(root.join(dir)).unwrap();
        std::fs::write(root.join(dir).join("plugin.yaml"), manifest).unwrap();
    }

    fn loader(root: &Path) -> PluginLoader {
        PluginLoader::new(root.join("modules"), root.join("plugins"))
    }

    #[test]
    fn test_find_candidates_creates_roots() {
        let root = tempfile::tempdir().unwrap();
        let loader = loader(root.path());
        assert_eq!(loader.find_candidates(), Candidates::default());
        assert!(root.path().join("modules").is_dir());
        assert!(root.path().join("plugins").is_dir());
    }

    #[test]
    fn test_find_candidates_filters() {
        let root = tempfile::tempdir().unwrap();
        let modules = root.path().join("modules");
        write_plugin(&modules, "plughost-plugin-weather", "name: weather\n");
        write_plugin(&modules, "unrelated-package", "name: unrelated\n");
        std::fs::create_dir_all(modules.join("plughost-plugin-empty")).unwrap();
        write_plugin(&root.path().join("plugins"), "dice", "name: dice\n");

        let candidates = loader(root.path()).find_candidates();
        assert_eq!(candidates.modules, vec!["plughost-plugin-weather"]);
        assert_eq!(candidates.local, vec!["dice"]);
    }

    #[test]
    fn test_local_plugin_shadows_module() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(&root.path().join("modules"), "plughost-plugin-dice", "name: dice\nversion: 1.0.0\n");
        write_plugin(&root.path().join("plugins"), "dice", "name: dice\nversion: 2.0.0-dev\n");

        let loader = loader(root.path());
        let source = loader.resolve("plughost-plugin-dice").unwrap();
        assert_eq!(source.name, "dice");
        assert_eq!(source.manifest.version, "2.0.0-dev");
    }

    #[test]
    fn test_resolve_unknown() {
        let root = tempfile::tempdir().unwrap();
        let err = loader(root.path()).resolve("ghost").unwrap_err();
        assert!(matches!(err, HostError::PluginNotFound(_)));
    }

    #[test]
    fn test_factory_load_and_missing_factory() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(&root.path().join("plugins"), "dice", "name: dice\nversion: 1.1.0\n");
        write_plugin(&root.path().join("plugins"), "coin", "name: coin\n");

        let loader = loader(root.path());
        loader.register_factory("dice", |_manifest| Ok(Plugin::new("anything")));

        let plugin = loader.load(&loader.resolve("dice").unwrap()).unwrap();
        assert_eq!(plugin.name(), "dice");
        assert_eq!(plugin.version(), "1.1.0");
        assert!(plugin.source_path().is_some());

        let err = loader.load(&loader.resolve("coin").unwrap()).unwrap_err();
        assert!(matches!(err, HostError::PluginNotInstantiated(_)));
    }

    #[test]
    fn test_cached_manifest_until_invalidated() {
        let root = tempfile::tempdir().unwrap();
        let plugins = root.path().join("plugins");
        write_plugin(&plugins, "dice", "name: dice\nversion: 1.0.0\n");

        let loader = loader(root.path());
        let first = loader.resolve("dice").unwrap();
        write_plugin(&plugins, "dice", "name: dice\nversion: 1.0.1-changed\n");
        assert_eq!(loader.resolve("dice").unwrap().manifest.version, "1.0.0");

        assert_eq!(loader.invalidate(&first.dir), 1);
        assert_eq!(loader.resolve("dice").unwrap().manifest.version, "1.0.1-changed");
    }

    #[test]
    fn test_missing_library_file() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(&root.path().join("plugins"), "native", "name: native\nlibrary: libnative.so\n");
        let loader = loader(root.path());
        let err = loader.load(&loader.resolve("native").unwrap()).unwrap_err();
        assert!(err.to_string().contains("library not found"));
    }
}
