//! Application layer - Lifecycle errors and message handling
//!
//! This layer contains:
//! - Errors: Host, command, storage and configuration errors
//! - Messaging: Command matching, permission tiers, dispatching

pub mod errors;
pub mod messaging;
