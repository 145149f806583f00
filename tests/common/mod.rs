//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use plughost::domain::entities::Sender;
use plughost::infrastructure::adapters::ConsoleSession;
use plughost::infrastructure::storage::MemorySettingStore;
use plughost::{Command, HostServices, PermissionResolver, Plugin, PluginLoader, PluginRegistry};
use tempfile::TempDir;

static INIT: Once = Once::new();

pub fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

pub const MAINTAINER: &str = "9000";

/// Master of account `10001` only.
pub const MASTER: &str = "5000";

pub struct Host {
    pub root: TempDir,
    pub registry: Arc<PluginRegistry>,
    pub store: Arc<MemorySettingStore>,
}

impl Host {
    pub fn local_dir(&self) -> PathBuf {
        self.root.path().join("plugins")
    }

    pub fn module_dir(&self) -> PathBuf {
        self.root.path().join("modules")
    }

    /// Writes (or rewrites) a local plugin manifest.
    pub fn write_local(&self, dir: &str, manifest: &str) {
        write_manifest(&self.local_dir().join(dir), manifest);
    }

    pub fn write_module(&self, dir: &str, manifest: &str) {
        write_manifest(&self.module_dir().join(dir), manifest);
    }

    /// Registers an online console account in the given groups.
    pub fn account(&self, id: &str, groups: &[(&str, &str)]) -> Arc<ConsoleSession> {
        let session = ConsoleSession::new(id).quiet();
        for (group_id, name) in groups {
            session.join_group(*group_id, *name);
        }
        let session = Arc::new(session);
        self.registry.add_account(session.clone());
        session
    }
}

pub fn write_manifest(dir: &Path, manifest: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("plugin.yaml"), manifest).unwrap();
}

pub fn host() -> Host {
    host_with_prefix("")
}

pub fn host_with_prefix(prefix: &str) -> Host {
    ensure_init();
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemorySettingStore::new());
    let services = HostServices::new(PermissionResolver::new([MAINTAINER]).with_masters("10001", [MASTER]), store.clone())
        .with_command_prefix(prefix);
    let loader = PluginLoader::new(root.path().join("modules"), root.path().join("plugins"));
    register_test_factories(&loader);

    Host {
        registry: Arc::new(PluginRegistry::new(loader, Arc::new(services))),
        root,
        store,
    }
}

/// `greeter`: replies to `hello` with the manifest's `config.reply`.
fn register_test_factories(loader: &PluginLoader) {
    loader.register_factory("greeter", |manifest| {
        let reply = manifest.config["reply"].as_str().unwrap_or("hello").to_string();
        let plugin = Plugin::new(manifest.name.clone());
        plugin.command(Command::new("hello")?.with_handler(move |ctx, _args| {
            let reply = reply.clone();
            async move {
                ctx.reply(reply).await?;
                Ok(())
            }
        }));
        Ok(plugin)
    });
}

pub fn member(id: &str) -> Sender {
    Sender::new(id)
}

pub fn maintainer() -> Sender {
    Sender::new(MAINTAINER)
}

pub fn master() -> Sender {
    Sender::new(MASTER)
}

/// Lets subscription tasks drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
