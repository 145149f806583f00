use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::PluginOption;

/// Stored options of one group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSetting {
    pub group_name: String,
    #[serde(default)]
    pub plugin: BTreeMap<String, PluginOption>,
}

/// Everything stored for one account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSetting {
    /// Plugins bound to this account, in bind order.
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupSetting>,
}

impl AccountSetting {
    pub fn group_option(&self, group_id: &str, plugin: &str) -> Option<&PluginOption> {
        self.groups.get(group_id)?.plugin.get(plugin)
    }

    pub fn has_plugin(&self, plugin: &str) -> bool {
        self.plugins.iter().any(|p| p == plugin)
    }
}
