//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: YAML configuration loading
//! - Plugins: Candidate discovery, manifests, module cache, loading
//! - Storage / Database: SettingStore backends (memory, SQLite)
//! - Adapters: Session implementations (console)

pub mod adapters;
pub mod config;
pub mod database;
pub mod plugins;
pub mod storage;
