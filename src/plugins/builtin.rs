//! Builtin management plugin
//!
//! Lets account masters inspect and drive the registry from chat.

use std::sync::{Arc, Weak};

use crate::application::errors::{HostError, HostResult};
use crate::application::messaging::TrustTier;
use crate::domain::entities::option::parse_option_value;
use crate::domain::entities::{Command, CommandContext, CommandScope, PluginOption};
use crate::plugins::plugin::Plugin;
use crate::plugins::registry::PluginRegistry;

pub const ADMIN_PLUGIN: &str = "admin";

/// Builds the management plugin and installs it into `registry`.
pub async fn install_admin(registry: &Arc<PluginRegistry>) -> HostResult<Arc<Plugin>> {
    registry.install(admin_plugin(Arc::downgrade(registry))?).await
}

fn upgrade(registry: &Weak<PluginRegistry>) -> HostResult<Arc<PluginRegistry>> {
    registry
        .upgrade()
        .ok_or_else(|| HostError::Handler("plugin registry has shut down".to_string()))
}

/// Replies with the outcome of a registry call.
async fn report(ctx: &CommandContext, result: HostResult<String>) -> HostResult<()> {
    let text = match result {
        Ok(text) => text,
        Err(e) => e.to_string(),
    };
    ctx.reply(text).await?;
    Ok(())
}

pub fn admin_plugin(registry: Weak<PluginRegistry>) -> HostResult<Plugin> {
    let plugin = Plugin::new(ADMIN_PLUGIN)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_description("Plugin management commands");

    let weak = registry.clone();
    plugin.command(
        Command::new("plugins")?
            .with_description("List registered plugins")
            .with_min_tier(TrustTier::MASTER)
            .with_handler(move |ctx, _args| {
                let weak = weak.clone();
                async move {
                    let registry = upgrade(&weak)?;
                    report(&ctx, Ok(list_plugins(&registry))).await
                }
            }),
    );

    let weak = registry.clone();
    plugin.command(
        Command::new("bind <name>")?
            .with_description("Bind a plugin to this account")
            .with_min_tier(TrustTier::MASTER)
            .with_handler(move |ctx, args| {
                let weak = weak.clone();
                async move {
                    let registry = upgrade(&weak)?;
                    let name = args.get(0).unwrap_or_default().to_string();
                    let result = registry
                        .bind_bot(&name, ctx.account_id())
                        .await
                        .map(|()| format!("Bound {name}"));
                    report(&ctx, result).await
                }
            }),
    );

    let weak = registry.clone();
    plugin.command(
        Command::new("unbind <name>")?
            .with_description("Unbind a plugin from this account")
            .with_min_tier(TrustTier::MASTER)
            .with_handler(move |ctx, args| {
                let weak = weak.clone();
                async move {
                    let registry = upgrade(&weak)?;
                    let name = args.get(0).unwrap_or_default().to_string();
                    let result = registry
                        .unbind_bot(&name, ctx.account_id())
                        .await
                        .map(|()| format!("Unbound {name}"));
                    report(&ctx, result).await
                }
            }),
    );

    let weak = registry.clone();
    plugin.command(
        Command::new("reload <name>")?
            .with_description("Reload a plugin from disk, keeping its bindings")
            .with_min_tier(TrustTier::MASTER)
            .with_handler(move |ctx, args| {
                let weak = weak.clone();
                async move {
                    let registry = upgrade(&weak)?;
                    let name = args.get(0).unwrap_or_default().to_string();
                    let result = registry
                        .reload(&name)
                        .await
                        .map(|p| format!("Reloaded {} v{}", p.name(), p.version()));
                    report(&ctx, result).await
                }
            }),
    );

    let weak = registry.clone();
    plugin.command(
        Command::new("destroy <name>")?
            .with_description("Unbind a plugin everywhere and unload it")
            .with_min_tier(TrustTier::MASTER)
            .with_handler(move |ctx, args| {
                let weak = weak.clone();
                async move {
                    let registry = upgrade(&weak)?;
                    let name = args.get(0).unwrap_or_default().to_string();
                    let result = registry.destroy(&name).await.map(|()| format!("Destroyed {name}"));
                    report(&ctx, result).await
                }
            }),
    );

    let weak = registry;
    plugin.command(
        Command::new("option <plugin> <key> <...value>")?
            .with_description("Override a plugin option in this group")
            .with_scope(CommandScope::Group)
            .with_min_tier(TrustTier::MASTER)
            .with_handler(move |ctx, args| {
                let weak = weak.clone();
                async move {
                    let registry = upgrade(&weak)?;
                    let name = args.get(0).unwrap_or_default().to_string();
                    let key = args.get(1).unwrap_or_default().to_string();
                    let value = args.value(2).map(|v| v.to_text()).unwrap_or_default();
                    let result = set_option(&registry, &ctx, &name, &key, &value).await;
                    report(&ctx, result).await
                }
            }),
    );

    Ok(plugin)
}

fn list_plugins(registry: &PluginRegistry) -> String {
    let mut lines: Vec<String> = registry
        .describe()
        .into_iter()
        .map(|info| {
            let bound = if info.accounts.is_empty() {
                "unbound".to_string()
            } else {
                format!("bound: {}", info.accounts.join(", "))
            };
            format!("{} v{} ({})", info.name, info.version, bound)
        })
        .collect();

    let candidates = registry.find_candidates();
    let available: Vec<String> = candidates
        .local
        .iter()
        .chain(candidates.modules.iter())
        .map(|n| registry.loader().short_name(n).to_string())
        .filter(|n| registry.get(n).is_none())
        .collect();
    if !available.is_empty() {
        lines.push(format!("available: {}", available.join(", ")));
    }
    if lines.is_empty() {
        return "No plugins".to_string();
    }
    lines.join("\n")
}

async fn set_option(
    registry: &PluginRegistry,
    ctx: &CommandContext,
    name: &str,
    key: &str,
    value: &str,
) -> HostResult<String> {
    let plugin = registry
        .get(name)
        .ok_or_else(|| HostError::PluginUndefined(name.to_string()))?;
    let settings = &registry.services().settings;
    let group_id = &ctx.event.conversation_id;

    let stored = settings.group_option(ctx.account_id(), group_id, plugin.name()).await?;
    let mut option = PluginOption::resolve(&plugin.get_option(), stored.as_ref());
    if option.lock() && ctx.tier < TrustTier::MAINTAINER {
        return Ok(format!("Options of {} are locked in this group", plugin.name()));
    }

    option.set(key, parse_option_value(value));
    settings
        .set_group_option(ctx.account_id(), group_id, plugin.name(), option)
        .await?;
    Ok(format!("{}.{} = {}", plugin.name(), key, value))
}
