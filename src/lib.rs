//! plughost - a hot-reloadable plugin host for chat bots
//!
//! Plugins declare commands, event listeners and scheduled jobs, and get
//! bound to one or more chat accounts at runtime. The registry imports,
//! reloads and destroys them without restarting the host.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;

pub use application::errors::{CommandError, HostError, HostResult};
pub use application::messaging::{HostServices, PermissionResolver, TrustTier};
pub use domain::entities::{Command, CommandContext, CommandScope, Event, MessageEvent, PluginOption, Sender};
pub use domain::traits::{Session, SettingStore};
pub use infrastructure::config::Config;
pub use infrastructure::plugins::PluginLoader;
pub use plugins::{Plugin, PluginRegistry};
