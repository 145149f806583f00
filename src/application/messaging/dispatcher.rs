//! Message dispatcher - Runs a plugin's commands against one inbound message

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::application::errors::{CommandError, HostResult};
use crate::application::messaging::matcher::Args;
use crate::application::messaging::permission::{PermissionResolver, TrustTier};
use crate::domain::entities::{
    Command, CommandContext, CommandHandler, CommandScope, MessageEvent, PluginOption,
};
use crate::domain::traits::{Session, SettingStore};
use crate::plugins::Plugin;

/// Shared collaborators every dispatch needs
pub struct HostServices {
    pub resolver: PermissionResolver,
    pub settings: Arc<dyn SettingStore>,
    /// Host-wide prefix every command must start with; empty for none.
    pub command_prefix: String,
}

impl HostServices {
    pub fn new(resolver: PermissionResolver, settings: Arc<dyn SettingStore>) -> Self {
        Self {
            resolver,
            settings,
            command_prefix: String::new(),
        }
    }

    pub fn with_command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }
}

/// What happened to one matched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The handler ran (its own errors are logged, not surfaced).
    Handled,
    /// The group has the plugin switched off; the stop fallback ran if set.
    Stopped,
    /// Validation or permission failure, replied to the conversation.
    Rejected(CommandError),
}

/// Strips the host prefix and then the plugin's namespace word.
pub fn command_text<'a>(host_prefix: &str, plugin_prefix: Option<&str>, raw: &'a str) -> Option<&'a str> {
    let text = raw.trim_start().strip_prefix(host_prefix)?;
    match plugin_prefix {
        Some(prefix) => {
            let rest = text.trim_start().strip_prefix(prefix)?;
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                Some(rest.trim_start())
            } else {
                None
            }
        }
        None => Some(text),
    }
}

/// One pass of `plugin`'s commands over `event`, in registration order.
///
/// Every command is evaluated independently; a failure in one never stops
/// the others.
pub async fn dispatch(
    plugin: &Arc<Plugin>,
    services: &HostServices,
    session: &Arc<dyn Session>,
    event: &MessageEvent,
) -> Vec<(String, Outcome)> {
    let Some(text) = command_text(&services.command_prefix, plugin.prefix(), &event.raw_text) else {
        return Vec::new();
    };

    let mut outcomes = Vec::new();
    for command in plugin.commands() {
        if !command.scope.accepts(event.kind) || !command.pattern.is_matched(text) {
            continue;
        }
        debug!(
            plugin = %plugin.name(),
            command = %command.name(),
            account = %event.account_id,
            "Command matched"
        );

        let outcome = match run_command(plugin, services, session, event, &command, text).await {
            Ok(outcome) => outcome,
            Err(rejection) => {
                if let Err(e) = session
                    .send_message(&event.reply_target(), &rejection.to_string())
                    .await
                {
                    warn!(plugin = %plugin.name(), error = %e, "Failed to send rejection reply");
                }
                Outcome::Rejected(rejection)
            }
        };
        outcomes.push((command.name().to_string(), outcome));
    }
    outcomes
}

async fn run_command(
    plugin: &Arc<Plugin>,
    services: &HostServices,
    session: &Arc<dyn Session>,
    event: &MessageEvent,
    command: &Command,
    text: &str,
) -> Result<Outcome, CommandError> {
    let args = command.pattern.parse_args(text);
    command.pattern.validate(&args)?;

    let tier = services.resolver.resolve(&event.account_id, &event.sender);
    if !command.permits(tier) {
        return Err(CommandError::InsufficientPermission {
            required: command.min_tier.unwrap_or(TrustTier::MEMBER),
            actual: tier,
        });
    }

    let option = if event.kind.is_multi_party() {
        Some(group_option(plugin, services, event).await)
    } else {
        None
    };

    let ctx = CommandContext {
        plugin: plugin.clone(),
        event: event.clone(),
        session: session.clone(),
        tier,
        option: option.clone(),
    };

    // Private chats have no group option, so they never hit the apply gate.
    let gated = plugin.prefix().is_some() && command.scope != CommandScope::Private;
    if gated && option.as_ref().is_some_and(|o| !o.apply()) {
        debug!(plugin = %plugin.name(), command = %command.name(), "Plugin disabled in group");
        if let Some(stop) = command.stop() {
            invoke(plugin, command, stop, ctx, args).await;
        }
        return Ok(Outcome::Stopped);
    }

    match command.handler() {
        Some(handler) => invoke(plugin, command, handler, ctx, args).await,
        None => debug!(plugin = %plugin.name(), command = %command.name(), "Command has no handler"),
    }
    Ok(Outcome::Handled)
}

/// Handler failures and panics end here.
async fn invoke(plugin: &Plugin, command: &Command, handler: &CommandHandler, ctx: CommandContext, args: Args) {
    let result: HostResult<()> = match AssertUnwindSafe(handler(ctx, args)).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            warn!(plugin = %plugin.name(), command = %command.name(), "Command handler panicked");
            return;
        }
    };
    if let Err(e) = result {
        warn!(plugin = %plugin.name(), command = %command.name(), error = %e, "Command handler failed");
    }
}

async fn group_option(plugin: &Plugin, services: &HostServices, event: &MessageEvent) -> PluginOption {
    let template = plugin.get_option();
    match services
        .settings
        .group_option(&event.account_id, &event.conversation_id, plugin.name())
        .await
    {
        Ok(local) => PluginOption::resolve(&template, local.as_ref()),
        Err(e) => {
            warn!(plugin = %plugin.name(), error = %e, "Failed to read group option, using defaults");
            template
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_text_without_prefixes() {
        assert_eq!(command_text("", None, "help me"), Some("help me"));
    }

    #[test]
    fn test_command_text_host_prefix() {
        assert_eq!(command_text("/", None, "/help"), Some("help"));
        assert_eq!(command_text("/", None, "help"), None);
    }

    #[test]
    fn test_command_text_plugin_namespace() {
        assert_eq!(command_text("", Some("weather"), "weather now"), Some("now"));
        assert_eq!(command_text("", Some("weather"), "weathernow"), None);
        assert_eq!(command_text("", Some("weather"), "now"), None);
        assert_eq!(command_text("/", Some("weather"), "/weather  set city"), Some("set city"));
    }
}
