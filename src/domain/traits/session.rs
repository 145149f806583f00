use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::application::errors::HostResult;
use crate::domain::entities::{Event, Target};

/// Session trait - one logged-in chat account and its transport
#[async_trait]
pub trait Session: Send + Sync {
    /// Stable for the lifetime of the account.
    fn account_id(&self) -> &str;

    /// A fresh receiver on the account's event stream. Only events sent
    /// after this call are observed.
    fn subscribe(&self) -> broadcast::Receiver<Event>;

    /// Send a message, returning the transport's message id
    async fn send_message(&self, target: &Target, text: &str) -> HostResult<String>;

    /// Groups the account is currently a member of, keyed by group id
    async fn group_roster(&self) -> HostResult<BTreeMap<String, GroupInfo>>;
}

/// Roster entry for one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_name: String,
}

impl GroupInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { group_name: name.into() }
    }
}
