//! Domain entities - Core business objects

pub mod command;
pub mod message;
pub mod option;
pub mod sender;
pub mod setting;

pub use command::{Command, CommandContext, CommandHandler, CommandScope, DISABLED_NOTICE};
pub use message::{ConversationKind, Event, MessageEvent, RawEvent, Target};
pub use option::{deep_merge, PluginOption};
pub use sender::{MemberRole, Sender};
pub use setting::{AccountSetting, GroupSetting};
