use async_trait::async_trait;

use crate::application::errors::StorageError;
use crate::domain::entities::{AccountSetting, PluginOption};

/// SettingStore trait - per-account plugin list and per-group option table.
///
/// Group-level mutations touch a single group so concurrent binds on
/// different groups of one account never overwrite each other.
#[async_trait]
pub trait SettingStore: Send + Sync {
    /// Snapshot of an account's settings; empty if nothing is stored yet.
    async fn get(&self, account_id: &str) -> Result<AccountSetting, StorageError>;

    /// Appends `plugin` to the account's plugin list unless already present.
    async fn add_plugin(&self, account_id: &str, plugin: &str) -> Result<(), StorageError>;

    async fn remove_plugin(&self, account_id: &str, plugin: &str) -> Result<(), StorageError>;

    async fn group_option(
        &self,
        account_id: &str,
        group_id: &str,
        plugin: &str,
    ) -> Result<Option<PluginOption>, StorageError>;

    /// Layers the stored group-local option over `template` and stores the
    /// result. Returns the merged option.
    async fn merge_group_option(
        &self,
        account_id: &str,
        group_id: &str,
        group_name: &str,
        plugin: &str,
        template: &PluginOption,
    ) -> Result<PluginOption, StorageError>;

    async fn set_group_option(
        &self,
        account_id: &str,
        group_id: &str,
        plugin: &str,
        option: PluginOption,
    ) -> Result<(), StorageError>;

    async fn remove_group_option(
        &self,
        account_id: &str,
        group_id: &str,
        plugin: &str,
    ) -> Result<(), StorageError>;
}
