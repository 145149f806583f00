use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::application::errors::{HostError, HostResult};
use crate::application::messaging::matcher::{Args, CommandPattern};
use crate::application::messaging::permission::TrustTier;
use crate::domain::entities::{ConversationKind, MessageEvent, PluginOption};
use crate::domain::traits::Session;
use crate::plugins::Plugin;

/// Notice sent by [`Command::with_disabled_notice`].
pub const DISABLED_NOTICE: &str = "This feature is disabled in this group.";

/// Which conversation kinds a command is eligible in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandScope {
    Group,
    Private,
    Discuss,
    #[default]
    All,
}

impl CommandScope {
    pub fn accepts(&self, kind: ConversationKind) -> bool {
        match self {
            CommandScope::All => true,
            CommandScope::Group => kind == ConversationKind::Group,
            CommandScope::Private => kind == ConversationKind::Private,
            CommandScope::Discuss => kind == ConversationKind::Discuss,
        }
    }
}

/// What a handler gets instead of an implicit receiver
#[derive(Clone)]
pub struct CommandContext {
    pub plugin: Arc<Plugin>,
    pub event: MessageEvent,
    pub session: Arc<dyn Session>,
    pub tier: TrustTier,
    /// Resolved per-group option; `None` in private chats.
    pub option: Option<PluginOption>,
}

impl CommandContext {
    /// Sends `text` back to the conversation the command came from.
    pub async fn reply(&self, text: impl AsRef<str>) -> HostResult<String> {
        self.session
            .send_message(&self.event.reply_target(), text.as_ref())
            .await
    }

    pub fn account_id(&self) -> &str {
        &self.event.account_id
    }
}

/// Command handler function type
pub type CommandHandler =
    Arc<dyn Fn(CommandContext, Args) -> BoxFuture<'static, HostResult<()>> + Send + Sync>;

/// A single invocable, pattern-matched action
#[derive(Clone)]
pub struct Command {
    pub pattern: CommandPattern,
    pub description: Option<String>,
    pub scope: CommandScope,
    pub min_tier: Option<TrustTier>,
    handler: Option<CommandHandler>,
    stop: Option<CommandHandler>,
}

impl Command {
    pub fn new(pattern: &str) -> Result<Self, HostError> {
        Ok(Self {
            pattern: CommandPattern::parse(pattern)?,
            description: None,
            scope: CommandScope::All,
            min_tier: None,
            handler: None,
            stop: None,
        })
    }

    pub fn name(&self) -> &str {
        self.pattern.name()
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_scope(mut self, scope: CommandScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_min_tier(mut self, tier: TrustTier) -> Self {
        self.min_tier = Some(tier);
        self
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(CommandContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostResult<()>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |ctx, args| Box::pin(handler(ctx, args))));
        self
    }

    /// Runs instead of the handler when the group has the plugin switched off.
    pub fn with_stop<F, Fut>(mut self, stop: F) -> Self
    where
        F: Fn(CommandContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostResult<()>> + Send + 'static,
    {
        self.stop = Some(Arc::new(move |ctx, args| Box::pin(stop(ctx, args))));
        self
    }

    pub fn with_disabled_notice(self) -> Self {
        self.with_stop(|ctx, _args| async move {
            ctx.reply(DISABLED_NOTICE).await?;
            Ok(())
        })
    }

    pub fn handler(&self) -> Option<&CommandHandler> {
        self.handler.as_ref()
    }

    pub fn stop(&self) -> Option<&CommandHandler> {
        self.stop.as_ref()
    }

    pub fn permits(&self, tier: TrustTier) -> bool {
        self.min_tier.map_or(true, |floor| tier >= floor)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("pattern", &self.pattern.raw())
            .field("scope", &self.scope)
            .field("min_tier", &self.min_tier)
            .field("has_handler", &self.handler.is_some())
            .field("has_stop", &self.stop.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_accepts() {
        assert!(CommandScope::All.accepts(ConversationKind::Discuss));
        assert!(CommandScope::Group.accepts(ConversationKind::Group));
        assert!(!CommandScope::Group.accepts(ConversationKind::Private));
        assert!(CommandScope::Private.accepts(ConversationKind::Private));
        assert!(!CommandScope::Discuss.accepts(ConversationKind::Group));
    }

    #[test]
    fn test_builder_and_floor() {
        let cmd = Command::new("update <key> <value>")
            .unwrap()
            .with_scope(CommandScope::Group)
            .with_min_tier(TrustTier::ADMIN)
            .with_handler(|_ctx, _args| async { Ok(()) });

        assert_eq!(cmd.name(), "update");
        assert!(cmd.handler().is_some());
        assert!(cmd.stop().is_none());
        assert!(cmd.permits(TrustTier::OWNER));
        assert!(!cmd.permits(TrustTier::SENIOR_MEMBER));
    }

    #[test]
    fn test_no_floor_permits_everyone() {
        let cmd = Command::new("help").unwrap();
        assert!(cmd.permits(TrustTier::MEMBER));
    }
}
