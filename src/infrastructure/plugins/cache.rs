//! Module cache keyed by file path, with per-directory version tokens
//!
//! A token fingerprints every file under a plugin directory. The registry
//! remembers the token of the code it loaded; comparing it with a fresh one
//! tells whether the directory changed since.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use super::library::PluginLibrary;
use super::manifest::PluginManifest;

/// Fingerprint of a plugin directory's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleToken(u64);

impl ModuleToken {
    /// Hashes relative path, size and mtime of every file under `dir`.
    pub fn compute(dir: &Path) -> io::Result<Self> {
        let mut files = Vec::new();
        collect_files(dir, dir, &mut files)?;
        files.sort();

        let mut hasher = DefaultHasher::new();
        for entry in &files {
            entry.hash(&mut hasher);
        }
        Ok(ModuleToken(hasher.finish()))
    }
}

impl fmt::Display for ModuleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, u64, u128)>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = entry.metadata()?;
        if meta.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        out.push((relative, meta.len(), modified));
    }
    Ok(())
}

/// Something loaded from a plugin directory
#[derive(Clone)]
pub enum CachedModule {
    Manifest {
        manifest: PluginManifest,
        token: ModuleToken,
    },
    Library(Arc<PluginLibrary>),
}

#[derive(Default)]
pub struct ModuleCache {
    entries: HashMap<PathBuf, CachedModule>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&CachedModule> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, path: PathBuf, module: CachedModule) {
        self.entries.insert(path, module);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Drops every entry at or below `dir`. Returns how many were removed.
    pub fn invalidate(&mut self, dir: &Path) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| !path.starts_with(dir));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str) -> PluginManifest {
        serde_yaml::from_str(&format!("name: {name}\n")).unwrap()
    }

    #[test]
    fn test_token_changes_with_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plugin.yaml"), "name: a\n").unwrap();
        let first = ModuleToken::compute(dir.path()).unwrap();
        assert_eq!(first, ModuleToken::compute(dir.path()).unwrap());

        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib").join("extra.txt"), "more").unwrap();
        assert_ne!(first, ModuleToken::compute(dir.path()).unwrap());
    }

    #[test]
    fn test_invalidate_is_recursive_and_scoped() {
        let token = ModuleToken(1);
        let mut cache = ModuleCache::new();
        let entry = |name: &str| CachedModule::Manifest { manifest: manifest(name), token };
        cache.insert(PathBuf::from("/p/weather/plugin.yaml"), entry("weather"));
        cache.insert(PathBuf::from("/p/weather/nested/plugin.yaml"), entry("nested"));
        cache.insert(PathBuf::from("/p/weather-extra/plugin.yaml"), entry("extra"));

        assert_eq!(cache.invalidate(Path::new("/p/weather")), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(Path::new("/p/weather-extra/plugin.yaml")));
    }
}
