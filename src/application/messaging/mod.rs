//! Message handling - Command matching, trust tiers and dispatch

pub mod dispatcher;
pub mod matcher;
pub mod permission;

pub use dispatcher::{dispatch, HostServices, Outcome};
pub use matcher::{ArgSpec, ArgValue, Args, CommandPattern};
pub use permission::{resolve_tier, PermissionResolver, TrustTier};
