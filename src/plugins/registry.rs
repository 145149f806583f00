//! Plugin registry - Owns live plugins and the accounts they bind to
//!
//! Mutations of one plugin name are serialized; operations on different
//! names run concurrently.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use crate::application::errors::{HostError, HostResult};
use crate::application::messaging::HostServices;
use crate::domain::traits::Session;
use crate::infrastructure::plugins::{Candidates, PluginLoader};
use crate::plugins::plugin::Plugin;

/// Summary of a registered plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub source: Option<PathBuf>,
    pub accounts: Vec<String>,
    pub commands: usize,
}

impl PluginInfo {
    fn of(plugin: &Plugin) -> Self {
        Self {
            name: plugin.name().to_string(),
            version: plugin.version().to_string(),
            description: plugin.description().map(str::to_string),
            source: plugin.source_path().map(|p| p.to_path_buf()),
            accounts: plugin.bound_accounts(),
            commands: plugin.commands().len(),
        }
    }
}

pub struct PluginRegistry {
    loader: PluginLoader,
    services: Arc<HostServices>,
    plugins: RwLock<BTreeMap<String, Arc<Plugin>>>,
    accounts: RwLock<BTreeMap<String, Arc<dyn Session>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PluginRegistry {
    pub fn new(loader: PluginLoader, services: Arc<HostServices>) -> Self {
        Self {
            loader,
            services,
            plugins: RwLock::new(BTreeMap::new()),
            accounts: RwLock::new(BTreeMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn services(&self) -> &Arc<HostServices> {
        &self.services
    }

    fn name_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Hands back a lock taken with `name_lock`. The entry is forgotten when
    /// no plugin of that name is registered and nobody else holds or waits
    /// on it.
    fn release_name_lock(&self, name: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 && self.get(name).is_none() {
            locks.remove(name);
        }
    }

    // ---- lookups ----

    pub fn get(&self, name: &str) -> Option<Arc<Plugin>> {
        let name = self.loader.short_name(name);
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered plugins, ordered by name
    pub fn plugins(&self) -> Vec<Arc<Plugin>> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn describe(&self) -> Vec<PluginInfo> {
        self.plugins().iter().map(|p| PluginInfo::of(p)).collect()
    }

    pub fn find_candidates(&self) -> Candidates {
        self.loader.find_candidates()
    }

    /// Plugins bound to `account_id`, ordered by name
    pub fn bound_plugins(&self, account_id: &str) -> Vec<Arc<Plugin>> {
        self.plugins().into_iter().filter(|p| p.is_bound(account_id)).collect()
    }

    pub fn bound_accounts(&self, name: &str) -> HostResult<Vec<String>> {
        self.get(name)
            .map(|p| p.bound_accounts())
            .ok_or_else(|| HostError::PluginUndefined(name.to_string()))
    }

    /// True when `name`'s directory changed since the registered instance
    /// was loaded.
    pub fn is_outdated(&self, name: &str) -> HostResult<bool> {
        self.get(name)
            .map(|p| self.loader.is_outdated(&p))
            .ok_or_else(|| HostError::PluginUndefined(name.to_string()))
    }

    // ---- accounts ----

    pub fn add_account(&self, session: Arc<dyn Session>) {
        let account_id = session.account_id().to_string();
        info!(account = %account_id, "Account online");
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account_id, session);
    }

    pub fn account(&self, account_id: &str) -> HostResult<Arc<dyn Session>> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account_id)
            .cloned()
            .ok_or_else(|| HostError::AccountUndefined(account_id.to_string()))
    }

    pub fn accounts(&self) -> Vec<String> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Takes an account offline: every plugin stops listening to it. Stored
    /// settings stay so the account can be restored later.
    pub async fn remove_account(&self, account_id: &str) -> HostResult<()> {
        let removed = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(account_id);
        if removed.is_none() {
            return Err(HostError::AccountUndefined(account_id.to_string()));
        }

        for plugin in self.bound_plugins(account_id) {
            let lock = self.name_lock(plugin.name());
            let _guard = lock.lock().await;
            if let Err(e) = plugin.unbind_bot(account_id) {
                warn!(plugin = %plugin.name(), account = %account_id, error = %e, "Unbind on account removal failed");
            }
        }
        info!(account = %account_id, "Account offline");
        Ok(())
    }

    /// Rebinds every plugin stored for `account_id`. Returns the names bound;
    /// failures are logged and skipped.
    pub async fn restore_account(&self, account_id: &str) -> HostResult<Vec<String>> {
        self.account(account_id)?;
        let setting = self.services.settings.get(account_id).await?;

        let mut bound = Vec::new();
        for name in setting.plugins {
            match self.bind_bot(&name, account_id).await {
                Ok(()) => bound.push(name),
                Err(HostError::AlreadyBound { .. }) => {}
                Err(e) => error!(plugin = %name, account = %account_id, error = %e, "Failed to restore plugin"),
            }
        }
        Ok(bound)
    }

    /// Merges every bound plugin's default option into every group the
    /// account is currently in. Returns how many (group, plugin) pairs were written.
    pub async fn sync_group_options(&self, account_id: &str) -> HostResult<usize> {
        let session = self.account(account_id)?;
        let mut written = 0;
        for plugin in self.bound_plugins(account_id) {
            written += self.merge_roster_options(&plugin, &session).await?;
        }
        Ok(written)
    }

    async fn merge_roster_options(&self, plugin: &Plugin, session: &Arc<dyn Session>) -> HostResult<usize> {
        let roster = session.group_roster().await?;
        let template = plugin.get_option();
        for (group_id, info) in &roster {
            self.services
                .settings
                .merge_group_option(session.account_id(), group_id, &info.group_name, plugin.name(), &template)
                .await?;
        }
        Ok(roster.len())
    }

    // ---- plugin lifecycle ----

    /// Registers an already constructed plugin (no source directory, so it
    /// can be destroyed but not reloaded).
    pub async fn install(&self, plugin: Plugin) -> HostResult<Arc<Plugin>> {
        let name = plugin.name().to_string();
        let lock = self.name_lock(&name);
        let _guard = lock.lock().await;

        if self.get(&name).is_some() {
            return Err(HostError::AlreadyRegistered(name));
        }
        let plugin = Arc::new(plugin);
        plugin.run_init()?;
        self.plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), plugin.clone());
        info!(plugin = %name, "Plugin installed");
        Ok(plugin)
    }

    /// Loads `name` unless it is already registered, in which case the live
    /// instance is returned.
    pub async fn import(&self, name: &str) -> HostResult<Arc<Plugin>> {
        let short = self.loader.short_name(name).to_string();
        let lock = self.name_lock(&short);
        let result = {
            let _guard = lock.lock().await;
            self.import_locked(&short)
        };
        self.release_name_lock(&short, lock);
        result
    }

    fn import_locked(&self, name: &str) -> HostResult<Arc<Plugin>> {
        if let Some(plugin) = self.get(name) {
            return Ok(plugin);
        }
        let source = self.loader.resolve(name)?;
        let plugin = Arc::new(self.loader.load(&source)?);
        plugin.run_init()?;

        self.plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), plugin.clone());
        info!(plugin = %name, version = %plugin.version(), token = %source.token, "Plugin registered");
        Ok(plugin)
    }

    /// Unbinds `name` everywhere, unregisters it and drops its cached code.
    /// A later import reads the plugin from disk again.
    pub async fn destroy(&self, name: &str) -> HostResult<()> {
        let short = self.loader.short_name(name).to_string();
        let lock = self.name_lock(&short);
        let result = {
            let _guard = lock.lock().await;
            self.destroy_locked(&short)
        };
        self.release_name_lock(&short, lock);
        result
    }

    fn destroy_locked(&self, name: &str) -> HostResult<()> {
        let plugin = self
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| HostError::PluginUndefined(name.to_string()))?;

        let result = plugin.destroy();
        if let Some(dir) = plugin.source_path() {
            self.loader.invalidate(dir);
        }
        result
    }

    /// Destroys `name` and imports it again, rebinding every account the old
    /// instance was bound to.
    pub async fn reload(&self, name: &str) -> HostResult<Arc<Plugin>> {
        let short = self.loader.short_name(name).to_string();
        let lock = self.name_lock(&short);
        let _guard = lock.lock().await;

        let old = self.get(&short).ok_or_else(|| HostError::PluginUndefined(short.clone()))?;
        if old.source_path().is_none() {
            return Err(HostError::PluginNotFound(format!("{short}: installed in-process, nothing to reload")));
        }
        let sessions = old.bound_sessions();

        match self.destroy_locked(&short) {
            Ok(()) => {}
            Err(e @ HostError::DestroyIncomplete { .. }) => warn!(plugin = %short, error = %e, "Reloading after incomplete destroy"),
            Err(e) => return Err(e),
        }
        drop(old);

        let plugin = self.import_locked(&short)?;
        let mut first_failure = None;
        for session in sessions {
            if let Err(e) = plugin.bind_bot(session.clone(), self.services.clone()) {
                error!(plugin = %short, account = %session.account_id(), error = %e, "Rebind after reload failed");
                first_failure.get_or_insert(e);
            }
        }
        info!(plugin = %short, version = %plugin.version(), "Plugin reloaded");
        first_failure.map_or(Ok(plugin), Err)
    }

    /// Reloads every plugin whose directory changed since it was loaded.
    pub async fn reload_outdated(&self) -> Vec<String> {
        let outdated: Vec<String> = self
            .plugins()
            .iter()
            .filter(|p| self.loader.is_outdated(p))
            .map(|p| p.name().to_string())
            .collect();

        let mut reloaded = Vec::new();
        for name in outdated {
            match self.reload(&name).await {
                Ok(_) => reloaded.push(name),
                Err(e) => error!(plugin = %name, error = %e, "Reload of changed plugin failed"),
            }
        }
        reloaded
    }

    /// Imports `name` if needed, binds it to the account and records the
    /// binding in the setting store. Either all of that happens or, on
    /// failure, none of the binding is left behind.
    pub async fn bind_bot(&self, name: &str, account_id: &str) -> HostResult<()> {
        let session = self.account(account_id)?;
        let short = self.loader.short_name(name).to_string();
        let lock = self.name_lock(&short);
        let result = {
            let _guard = lock.lock().await;
            self.bind_locked(&short, &session).await
        };
        self.release_name_lock(&short, lock);
        result
    }

    async fn bind_locked(&self, name: &str, session: &Arc<dyn Session>) -> HostResult<()> {
        let account_id = session.account_id();
        let plugin = self.import_locked(name)?;
        plugin.bind_bot(session.clone(), self.services.clone())?;

        if let Err(e) = self.record_binding(&plugin, session).await {
            warn!(plugin = %name, account = %account_id, error = %e, "Bind not recorded, rolling back");
            if let Err(undo) = plugin.unbind_bot(account_id) {
                warn!(plugin = %name, account = %account_id, error = %undo, "Rollback unbind failed");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn record_binding(&self, plugin: &Plugin, session: &Arc<dyn Session>) -> HostResult<()> {
        let settings = &self.services.settings;
        let account_id = session.account_id();
        let listed = settings.get(account_id).await?.has_plugin(plugin.name());

        settings.add_plugin(account_id, plugin.name()).await?;
        match self.merge_roster_options(plugin, session).await {
            Ok(groups) => {
                debug!(plugin = %plugin.name(), account = %account_id, groups, "Group options merged");
                Ok(())
            }
            Err(e) => {
                if !listed {
                    if let Err(undo) = self.forget_binding(account_id, plugin.name()).await {
                        warn!(plugin = %plugin.name(), account = %account_id, error = %undo, "Failed to clear stored binding");
                    }
                }
                Err(e)
            }
        }
    }

    /// Drops `name` from the account's plugin list and from every group.
    async fn forget_binding(&self, account_id: &str, name: &str) -> HostResult<()> {
        let settings = &self.services.settings;
        settings.remove_plugin(account_id, name).await?;
        let stored = settings.get(account_id).await?;
        for (group_id, group) in &stored.groups {
            if group.plugin.contains_key(name) {
                settings.remove_group_option(account_id, group_id, name).await?;
            }
        }
        Ok(())
    }

    /// Unbinds `name` from the account and removes its stored entries.
    pub async fn unbind_bot(&self, name: &str, account_id: &str) -> HostResult<()> {
        let short = self.loader.short_name(name).to_string();
        {
            let lock = self.name_lock(&short);
            let _guard = lock.lock().await;
            let plugin = self.get(&short).ok_or_else(|| HostError::PluginUndefined(short.clone()))?;
            plugin.unbind_bot(account_id)?;
        }
        self.forget_binding(account_id, &short).await
    }

    /// Binds `name` to every known account it is not bound to yet.
    /// Returns the accounts newly bound.
    pub async fn bind_all_accounts(&self, name: &str) -> HostResult<Vec<String>> {
        let mut bound = Vec::new();
        for account_id in self.accounts() {
            match self.bind_bot(name, &account_id).await {
                Ok(()) => bound.push(account_id),
                Err(HostError::AlreadyBound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(bound)
    }
}
