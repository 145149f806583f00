//! Plugin sources for plughost
//!
//! Plugins live in directories holding a `plugin.yaml` manifest, either as
//! installed packages under the module directory or as local development
//! plugins. They are built by an in-process factory or loaded from a shared
//! library that exports its constructor with [`crate::declare_plugin`].

pub mod cache;
pub mod library;
pub mod loader;
pub mod manifest;

pub use cache::{CachedModule, ModuleCache, ModuleToken};
pub use library::PluginLibrary;
pub use loader::{Candidates, PluginCreateFn, PluginFactory, PluginLoader, PluginSource, CREATE_SYMBOL};
pub use manifest::{is_valid_plugin_name, PluginManifest};
