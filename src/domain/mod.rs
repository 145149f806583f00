//! Domain layer - Core business objects and collaborator abstractions
//!
//! This layer contains:
//! - Entities: Senders, events, commands, options, stored settings
//! - Traits: Abstractions for the outside world (Session, SettingStore)

pub mod entities;
pub mod traits;
