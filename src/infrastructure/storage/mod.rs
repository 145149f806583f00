//! In-memory setting store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::application::errors::StorageError;
use crate::domain::entities::{AccountSetting, PluginOption};
use crate::domain::traits::SettingStore;

/// Settings kept in process memory, lost on exit
#[derive(Default, Clone)]
pub struct MemorySettingStore {
    accounts: Arc<RwLock<HashMap<String, AccountSetting>>>,
}

impl MemorySettingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store, e.g. from a fixture.
    pub async fn insert(&self, account_id: impl Into<String>, setting: AccountSetting) {
        self.accounts.write().await.insert(account_id.into(), setting);
    }
}

#[async_trait]
impl SettingStore for MemorySettingStore {
    async fn get(&self, account_id: &str) -> Result<AccountSetting, StorageError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(account_id).cloned().unwrap_or_default())
    }

    async fn add_plugin(&self, account_id: &str, plugin: &str) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().await;
        let setting = accounts.entry(account_id.to_string()).or_default();
        if !setting.has_plugin(plugin) {
            setting.plugins.push(plugin.to_string());
        }
        Ok(())
    }

    async fn remove_plugin(&self, account_id: &str, plugin: &str) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().await;
        if let Some(setting) = accounts.get_mut(account_id) {
            setting.plugins.retain(|p| p != plugin);
        }
        Ok(())
    }

    async fn group_option(
        &self,
        account_id: &str,
        group_id: &str,
        plugin: &str,
    ) -> Result<Option<PluginOption>, StorageError> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .get(account_id)
            .and_then(|s| s.group_option(group_id, plugin))
            .cloned())
    }

    async fn merge_group_option(
        &self,
        account_id: &str,
        group_id: &str,
        group_name: &str,
        plugin: &str,
        template: &PluginOption,
    ) -> Result<PluginOption, StorageError> {
        let mut accounts = self.accounts.write().await;
        let group = accounts
            .entry(account_id.to_string())
            .or_default()
            .groups
            .entry(group_id.to_string())
            .or_default();
        group.group_name = group_name.to_string();

        let merged = PluginOption::resolve(template, group.plugin.get(plugin));
        group.plugin.insert(plugin.to_string(), merged.clone());
        Ok(merged)
    }

    async fn set_group_option(
        &self,
        account_id: &str,
        group_id: &str,
        plugin: &str,
        option: PluginOption,
    ) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().await;
        accounts
            .entry(account_id.to_string())
            .or_default()
            .groups
            .entry(group_id.to_string())
            .or_default()
            .plugin
            .insert(plugin.to_string(), option);
        Ok(())
    }

    async fn remove_group_option(
        &self,
        account_id: &str,
        group_id: &str,
        plugin: &str,
    ) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().await;
        if let Some(group) = accounts.get_mut(account_id).and_then(|s| s.groups.get_mut(group_id)) {
            group.plugin.remove(plugin);
        }
        Ok(())
    }
}
