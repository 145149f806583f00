//! Management plugin integration tests
//! Run with: cargo test --test admin_test

mod common;

use common::{host, maintainer, master, member, settle, Host};
use plughost::domain::entities::MemberRole;
use plughost::infrastructure::adapters::ConsoleSession;
use plughost::plugins::install_admin;
use plughost::SettingStore;
use std::sync::Arc;

async fn admin_host() -> (Host, Arc<ConsoleSession>) {
    let host = host();
    let account = host.account("10001", &[("g1", "Friends")]);
    install_admin(&host.registry).await.unwrap();
    host.registry.bind_bot("admin", "10001").await.unwrap();
    (host, account)
}

#[tokio::test]
async fn test_bind_and_list_from_chat() {
    let (host, account) = admin_host().await;
    host.write_local("greeter", "name: greeter\nversion: 0.3.0\n");

    account.post_private(maintainer(), "plugins");
    settle().await;
    let listing = account.take_sent().pop().unwrap().1;
    assert!(listing.contains("admin v"));
    assert!(listing.contains("available: greeter"));

    account.post_private(maintainer(), "bind greeter");
    settle().await;
    assert_eq!(account.take_sent().pop().unwrap().1, "Bound greeter");

    account.post_private(maintainer(), "plugins");
    settle().await;
    let listing = account.take_sent().pop().unwrap().1;
    assert!(listing.contains("greeter v0.3.0 (bound: 10001)"));
}

#[tokio::test]
async fn test_members_cannot_manage() {
    let (host, account) = admin_host().await;
    host.write_local("greeter", "name: greeter\n");

    account.post_group("g1", member("42").with_role(MemberRole::Owner), "bind greeter");
    settle().await;
    assert_eq!(
        account.sent_texts(),
        vec!["Insufficient permission (requires tier 5, you have 4)".to_string()]
    );
    assert!(host.registry.get("greeter").is_none());
}

#[tokio::test]
async fn test_lifecycle_errors_are_replied() {
    let (_host, account) = admin_host().await;

    account.post_private(maintainer(), "destroy ghost");
    account.post_private(maintainer(), "bind ghost");
    settle().await;
    assert_eq!(
        account.sent_texts(),
        vec![
            "Plugin undefined: ghost".to_string(),
            "Plugin not found: ghost".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_reload_and_unbind_from_chat() {
    let (host, account) = admin_host().await;
    host.write_local("greeter", "name: greeter\nversion: 1.0.0\n");
    host.registry.bind_bot("greeter", "10001").await.unwrap();

    host.write_local("greeter", "name: greeter\nversion: 1.0.1\n");
    account.post_private(maintainer(), "reload greeter");
    settle().await;
    assert_eq!(account.take_sent().pop().unwrap().1, "Reloaded greeter v1.0.1");
    assert_eq!(host.registry.bound_accounts("greeter").unwrap(), vec!["10001".to_string()]);

    account.post_private(maintainer(), "unbind greeter");
    settle().await;
    assert_eq!(account.take_sent().pop().unwrap().1, "Unbound greeter");
    assert!(host.registry.bound_accounts("greeter").unwrap().is_empty());
}

#[tokio::test]
async fn test_option_override_and_lock() {
    let (host, account) = admin_host().await;
    host.write_local("greeter", "name: greeter\n");
    host.registry.bind_bot("greeter", "10001").await.unwrap();

    account.post_group("g1", master(), "option greeter greeting good morning");
    settle().await;
    assert_eq!(account.take_sent().pop().unwrap().1, "greeter.greeting = good morning");
    let option = host.store.group_option("10001", "g1", "greeter").await.unwrap().unwrap();
    assert_eq!(option.get("greeting"), Some(&serde_json::json!("good morning")));

    account.post_group("g1", master(), "option greeter apply false");
    settle().await;
    assert_eq!(account.take_sent().pop().unwrap().1, "greeter.apply = false");
    let option = host.store.group_option("10001", "g1", "greeter").await.unwrap().unwrap();
    assert!(!option.apply());

    let locked = option.clone().with("lock", true);
    host.store
        .set_group_option("10001", "g1", "greeter", locked)
        .await
        .unwrap();
    account.post_group("g1", master(), "option greeter apply true");
    settle().await;
    assert_eq!(
        account.take_sent().pop().unwrap().1,
        "Options of greeter are locked in this group"
    );
    assert!(!host.store.group_option("10001", "g1", "greeter").await.unwrap().unwrap().apply());

    account.post_group("g1", maintainer(), "option greeter apply true");
    settle().await;
    assert_eq!(account.take_sent().pop().unwrap().1, "greeter.apply = true");
    assert!(host.store.group_option("10001", "g1", "greeter").await.unwrap().unwrap().apply());
}

#[tokio::test]
async fn test_option_is_group_only() {
    let (_host, account) = admin_host().await;
    account.post_private(master(), "option greeter apply false");
    settle().await;
    assert!(account.sent().is_empty());
}
