//! Domain traits - Abstractions over the external collaborators

pub mod session;
pub mod store;

pub use session::{GroupInfo, Session};
pub use store::SettingStore;
