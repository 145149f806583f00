//! Registry lifecycle integration tests
//! Run with: cargo test --test lifecycle_test

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{host, member, settle};
use plughost::domain::entities::{Event, PluginOption, Target};
use plughost::domain::traits::GroupInfo;
use plughost::infrastructure::adapters::ConsoleSession;
use plughost::plugins::Lifecycle;
use plughost::{HostError, HostResult, Plugin, Session, SettingStore};

/// Console account whose group roster fails until `roster_online` is set.
struct FlakyRoster {
    inner: ConsoleSession,
    roster_online: AtomicBool,
}

impl FlakyRoster {
    fn new(account_id: &str) -> Self {
        Self {
            inner: ConsoleSession::new(account_id).quiet(),
            roster_online: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Session for FlakyRoster {
    fn account_id(&self) -> &str {
        self.inner.account_id()
    }

    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.inner.subscribe()
    }

    async fn send_message(&self, target: &Target, text: &str) -> HostResult<String> {
        self.inner.send_message(target, text).await
    }

    async fn group_roster(&self) -> HostResult<BTreeMap<String, GroupInfo>> {
        if self.roster_online.load(Ordering::SeqCst) {
            self.inner.group_roster().await
        } else {
            Err(HostError::Session("roster unavailable".to_string()))
        }
    }
}

#[tokio::test]
async fn test_import_bind_dispatch_unbind() {
    let host = host();
    host.write_local("greeter", "name: greeter\nversion: 1.0.0\nconfig:\n  reply: hi there\n");
    let account = host.account("10001", &[]);

    let plugin = host.registry.import("greeter").await.unwrap();
    assert_eq!(plugin.version(), "1.0.0");
    assert!(Arc::ptr_eq(&plugin, &host.registry.import("greeter").await.unwrap()));

    host.registry.bind_bot("greeter", "10001").await.unwrap();
    account.post_private(member("42"), "hello");
    settle().await;
    assert_eq!(account.sent_texts(), vec!["hi there".to_string()]);

    host.registry.unbind_bot("greeter", "10001").await.unwrap();
    account.post_private(member("42"), "hello");
    settle().await;
    assert_eq!(account.sent_texts().len(), 1);
}

#[tokio::test]
async fn test_module_prefix_names_same_plugin() {
    let host = host();
    host.write_module("plughost-plugin-greeter", "name: greeter\n");
    host.account("10001", &[]);

    host.registry.bind_bot("plughost-plugin-greeter", "10001").await.unwrap();
    assert!(host.registry.get("greeter").is_some());
    assert_eq!(host.registry.bound_accounts("greeter").unwrap(), vec!["10001".to_string()]);

    let err = host.registry.bind_bot("greeter", "10001").await.unwrap_err();
    assert!(matches!(err, HostError::AlreadyBound { .. }));
}

#[tokio::test]
async fn test_bind_records_settings_and_unbind_clears_them() {
    let host = host();
    host.write_local("greeter", "name: greeter\n");
    host.account("10001", &[("g1", "Friends"), ("g2", "Family")]);

    host.registry.bind_bot("greeter", "10001").await.unwrap();
    let setting = host.store.get("10001").await.unwrap();
    assert_eq!(setting.plugins, vec!["greeter".to_string()]);
    assert_eq!(setting.groups.len(), 2);
    assert_eq!(setting.groups["g1"].group_name, "Friends");
    assert_eq!(setting.group_option("g2", "greeter"), Some(&PluginOption::default()));

    host.registry.unbind_bot("greeter", "10001").await.unwrap();
    let setting = host.store.get("10001").await.unwrap();
    assert!(setting.plugins.is_empty());
    assert!(setting.group_option("g1", "greeter").is_none());
    assert!(setting.group_option("g2", "greeter").is_none());
}

#[tokio::test]
async fn test_bind_keeps_existing_group_override() {
    let host = host();
    host.write_local("greeter", "name: greeter\n");
    host.account("10001", &[("g1", "Friends")]);
    host.store
        .set_group_option("10001", "g1", "greeter", PluginOption::empty().with("apply", false))
        .await
        .unwrap();

    host.registry.bind_bot("greeter", "10001").await.unwrap();
    let option = host.store.group_option("10001", "g1", "greeter").await.unwrap().unwrap();
    assert!(!option.apply());
    assert!(!option.lock());
}

#[tokio::test]
async fn test_destroy_cascades_to_every_account() {
    let host = host();
    host.write_local("greeter", "name: greeter\n");
    let first = host.account("10001", &[]);
    let second = host.account("10002", &[]);

    host.registry.bind_bot("greeter", "10001").await.unwrap();
    host.registry.bind_bot("greeter", "10002").await.unwrap();
    let old = host.registry.get("greeter").unwrap();
    let mut lifecycle = old.lifecycle();

    host.registry.destroy("greeter").await.unwrap();
    assert!(host.registry.get("greeter").is_none());
    assert!(old.bound_accounts().is_empty());
    assert!(old.is_destroyed());

    first.post_private(member("42"), "hello");
    second.post_private(member("42"), "hello");
    settle().await;
    assert!(first.sent().is_empty());
    assert!(second.sent().is_empty());

    let mut events = Vec::new();
    while let Ok(event) = lifecycle.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            Lifecycle::Unbound("10001".to_string()),
            Lifecycle::Unbound("10002".to_string()),
            Lifecycle::Destroyed,
        ]
    );

    let fresh = host.registry.import("greeter").await.unwrap();
    assert!(!Arc::ptr_eq(&old, &fresh));
    assert!(fresh.bound_accounts().is_empty());
}

#[tokio::test]
async fn test_destroyed_instance_refuses_bind() {
    let host = host();
    host.write_local("greeter", "name: greeter\n");
    let account = host.account("10001", &[]);

    let old = host.registry.import("greeter").await.unwrap();
    host.registry.destroy("greeter").await.unwrap();
    let err = old
        .bind_bot(account, host.registry.services().clone())
        .unwrap_err();
    assert!(matches!(err, HostError::PluginDestroyed(_)));
}

#[tokio::test]
async fn test_bind_all_and_restore() {
    let host = host();
    host.write_local("greeter", "name: greeter\n");
    host.account("10001", &[]);
    host.account("10002", &[]);

    host.registry.bind_bot("greeter", "10002").await.unwrap();
    let newly = host.registry.bind_all_accounts("greeter").await.unwrap();
    assert_eq!(newly, vec!["10001".to_string()]);

    host.registry.remove_account("10001").await.unwrap();
    assert_eq!(host.registry.bound_accounts("greeter").unwrap(), vec!["10002".to_string()]);
    assert!(host.store.get("10001").await.unwrap().has_plugin("greeter"));

    let account = host.account("10001", &[]);
    let restored = host.registry.restore_account("10001").await.unwrap();
    assert_eq!(restored, vec!["greeter".to_string()]);
    account.post_private(member("7"), "hello");
    settle().await;
    assert_eq!(account.sent_texts(), vec!["hello".to_string()]);
}

#[tokio::test]
async fn test_unbind_cancels_scheduled_jobs() {
    let host = host();
    host.account("10001", &[]);

    let plugin = Plugin::new("ticker");
    plugin.on_bind(|ctx| {
        ctx.plugin.schedule_every(Duration::from_secs(3600), || async { Ok(()) })?;
        ctx.plugin.schedule("0 0 * * * *", || async { Ok(()) })?;
        Ok(None)
    });
    let plugin = host.registry.install(plugin).await.unwrap();

    host.registry.bind_bot("ticker", "10001").await.unwrap();
    assert_eq!(plugin.job_count(), 2);

    host.registry.unbind_bot("ticker", "10001").await.unwrap();
    assert_eq!(plugin.job_count(), 0);
}

#[tokio::test]
async fn test_invalid_cron_rejected() {
    let plugin = Plugin::new("ticker");
    let err = plugin.schedule("not a cron", || async { Ok(()) }).unwrap_err();
    assert!(matches!(err, HostError::InvalidSchedule { .. }));
    assert_eq!(plugin.job_count(), 0);
}

#[tokio::test]
async fn test_sync_group_options_covers_new_groups() {
    let host = host();
    host.write_local("greeter", "name: greeter\n");
    let account = host.account("10001", &[("g1", "Friends")]);
    host.registry.bind_bot("greeter", "10001").await.unwrap();

    account.join_group("g2", "Newcomers");
    let written = host.registry.sync_group_options("10001").await.unwrap();
    assert_eq!(written, 2);
    assert!(host.store.group_option("10001", "g2", "greeter").await.unwrap().is_some());
}

#[tokio::test]
async fn test_unknown_account_and_plugin() {
    let host = host();
    host.write_local("greeter", "name: greeter\n");
    assert!(matches!(
        host.registry.bind_bot("greeter", "nobody").await,
        Err(HostError::AccountUndefined(_))
    ));
    host.account("10001", &[]);
    assert!(matches!(
        host.registry.bind_bot("ghost", "10001").await,
        Err(HostError::PluginNotFound(_))
    ));
    host.write_local("orphan", "name: orphan\nentry: nowhere\n");
    assert!(matches!(
        host.registry.bind_bot("orphan", "10001").await,
        Err(HostError::PluginNotInstantiated(_))
    ));
}

#[tokio::test]
async fn test_rebind_restores_delivery_without_replaying_the_gap() {
    let host = host();
    host.write_local("greeter", "name: greeter\n");
    let account = host.account("10001", &[]);

    host.registry.bind_bot("greeter", "10001").await.unwrap();
    host.registry.unbind_bot("greeter", "10001").await.unwrap();
    account.post_private(member("42"), "hello");
    settle().await;
    assert!(account.sent().is_empty());

    host.registry.bind_bot("greeter", "10001").await.unwrap();
    account.post_private(member("42"), "hello");
    settle().await;
    assert_eq!(account.sent_texts(), vec!["hello".to_string()]);
}

#[tokio::test]
async fn test_failed_bind_leaves_nothing_behind() {
    let host = host();
    host.write_local("greeter", "name: greeter\n");
    let session = Arc::new(FlakyRoster::new("10001"));
    host.registry.add_account(session.clone());

    let err = host.registry.bind_bot("greeter", "10001").await.unwrap_err();
    assert!(matches!(err, HostError::Session(_)));
    assert!(host.registry.bound_accounts("greeter").unwrap().is_empty());
    assert!(!host.store.get("10001").await.unwrap().has_plugin("greeter"));

    session.roster_online.store(true, Ordering::SeqCst);
    host.registry.bind_bot("greeter", "10001").await.unwrap();
    assert_eq!(host.registry.bound_accounts("greeter").unwrap(), vec!["10001".to_string()]);
    assert!(host.store.get("10001").await.unwrap().has_plugin("greeter"));
}

#[tokio::test]
async fn test_failed_bind_keeps_previously_stored_listing() {
    let host = host();
    host.write_local("greeter", "name: greeter\n");
    host.store.add_plugin("10001", "greeter").await.unwrap();
    host.registry.add_account(Arc::new(FlakyRoster::new("10001")));

    assert!(host.registry.restore_account("10001").await.unwrap().is_empty());
    assert!(host.registry.bound_accounts("greeter").unwrap().is_empty());
    assert!(host.store.get("10001").await.unwrap().has_plugin("greeter"));
}
