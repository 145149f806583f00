//! Plugin runtime for plughost
//!
//! Plugins are created in-process or loaded from shared libraries, kept in
//! the [`PluginRegistry`] and bound to chat accounts.

pub mod builtin;
pub mod plugin;
pub mod registry;
pub mod router;
pub mod schedule;

pub use builtin::{admin_plugin, install_admin, ADMIN_PLUGIN};
pub use plugin::{BindContext, EventInterest, Lifecycle, ListenerContext, Plugin, Teardown};
pub use registry::{PluginInfo, PluginRegistry};
pub use router::Subscription;
pub use schedule::{ScheduleManager, ScheduledJob, Trigger};
