//! SQLite-backed setting store

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::application::errors::StorageError;
use crate::domain::entities::{AccountSetting, GroupSetting, PluginOption};
use crate::domain::traits::SettingStore;

/// One row per bound plugin and one row per (group, plugin) option, so
/// every mutation touches only the rows it names.
pub struct SqliteSettingStore {
    conn: Mutex<Connection>,
}

impl SqliteSettingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let store = Self { conn: Mutex::new(conn) };
        store.init_tables()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_tables(&self) -> Result<(), StorageError> {
        let conn = self.conn();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS account_plugins (
                account_id TEXT NOT NULL,
                plugin TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (account_id, plugin)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS group_options (
                account_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                plugin TEXT NOT NULL,
                group_name TEXT NOT NULL DEFAULT '',
                option TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (account_id, group_id, plugin)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_group_options_account ON group_options(account_id)",
            [],
        )?;
        Ok(())
    }

    fn read_option(
        conn: &Connection,
        account_id: &str,
        group_id: &str,
        plugin: &str,
    ) -> Result<Option<PluginOption>, StorageError> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT option FROM group_options WHERE account_id = ?1 AND group_id = ?2 AND plugin = ?3",
                params![account_id, group_id, plugin],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SettingStore for SqliteSettingStore {
    async fn get(&self, account_id: &str) -> Result<AccountSetting, StorageError> {
        let conn = self.conn();
        let mut setting = AccountSetting::default();

        let mut stmt = conn.prepare(
            "SELECT plugin FROM account_plugins WHERE account_id = ?1 ORDER BY position",
        )?;
        let plugins = stmt.query_map([account_id], |row| row.get::<_, String>(0))?;
        for plugin in plugins {
            setting.plugins.push(plugin?);
        }

        let mut stmt = conn.prepare(
            "SELECT group_id, group_name, plugin, option FROM group_options
             WHERE account_id = ?1 ORDER BY group_id, plugin",
        )?;
        let rows = stmt.query_map([account_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        for row in rows {
            let (group_id, group_name, plugin, raw) = row?;
            let group = setting.groups.entry(group_id).or_insert_with(|| GroupSetting {
                group_name: group_name.clone(),
                ..Default::default()
            });
            if group.group_name.is_empty() {
                group.group_name = group_name;
            }
            group.plugin.insert(plugin, serde_json::from_str(&raw)?);
        }
        Ok(setting)
    }

    async fn add_plugin(&self, account_id: &str, plugin: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO account_plugins (account_id, plugin, position)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(position), -1) + 1 FROM account_plugins WHERE account_id = ?1))",
            params![account_id, plugin],
        )?;
        Ok(())
    }

    async fn remove_plugin(&self, account_id: &str, plugin: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "DELETE FROM account_plugins WHERE account_id = ?1 AND plugin = ?2",
            params![account_id, plugin],
        )?;
        Ok(())
    }

    async fn group_option(
        &self,
        account_id: &str,
        group_id: &str,
        plugin: &str,
    ) -> Result<Option<PluginOption>, StorageError> {
        Self::read_option(&self.conn(), account_id, group_id, plugin)
    }

    async fn merge_group_option(
        &self,
        account_id: &str,
        group_id: &str,
        group_name: &str,
        plugin: &str,
        template: &PluginOption,
    ) -> Result<PluginOption, StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let local = Self::read_option(&tx, account_id, group_id, plugin)?;
        let merged = PluginOption::resolve(template, local.as_ref());
        tx.execute(
            "INSERT INTO group_options (account_id, group_id, plugin, group_name, option)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (account_id, group_id, plugin)
             DO UPDATE SET group_name = excluded.group_name, option = excluded.option, updated_at = datetime('now')",
            params![account_id, group_id, plugin, group_name, serde_json::to_string(&merged)?],
        )?;
        tx.commit()?;
        Ok(merged)
    }

    async fn set_group_option(
        &self,
        account_id: &str,
        group_id: &str,
        plugin: &str,
        option: PluginOption,
    ) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO group_options (account_id, group_id, plugin, option)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (account_id, group_id, plugin)
             DO UPDATE SET option = excluded.option, updated_at = datetime('now')",
            params![account_id, group_id, plugin, serde_json::to_string(&option)?],
        )?;
        Ok(())
    }

    async fn remove_group_option(
        &self,
        account_id: &str,
        group_id: &str,
        plugin: &str,
    ) -> Result<(), StorageError> {
        self.conn().execute(
            "DELETE FROM group_options WHERE account_id = ?1 AND group_id = ?2 AND plugin = ?3",
            params![account_id, group_id, plugin],
        )?;
        Ok(())
    }
}
