//! Console adapter for development/testing

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::application::errors::HostResult;
use crate::domain::entities::{Event, MessageEvent, Sender, Target};
use crate::domain::traits::{GroupInfo, Session};

/// In-process session: events are injected with [`ConsoleSession::emit`]
/// and outgoing messages are printed and recorded.
pub struct ConsoleSession {
    account_id: String,
    events: broadcast::Sender<Event>,
    roster: RwLock<BTreeMap<String, GroupInfo>>,
    outbox: Mutex<Vec<(Target, String)>>,
    echo: bool,
}

impl ConsoleSession {
    pub fn new(account_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            account_id: account_id.into(),
            events,
            roster: RwLock::new(BTreeMap::new()),
            outbox: Mutex::new(Vec::new()),
            echo: true,
        }
    }

    /// Records outgoing messages without printing them.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn with_group(self, group_id: impl Into<String>, group_name: impl Into<String>) -> Self {
        self.join_group(group_id, group_name);
        self
    }

    pub fn join_group(&self, group_id: impl Into<String>, group_name: impl Into<String>) {
        self.roster
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group_id.into(), GroupInfo::new(group_name));
    }

    /// Publishes `event` to every subscriber. Returns the number of receivers.
    pub fn emit(&self, event: Event) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn post_private(&self, sender: Sender, text: impl Into<String>) -> usize {
        self.emit(Event::Message(MessageEvent::private(self.account_id.clone(), sender, text)))
    }

    pub fn post_group(&self, group_id: impl Into<String>, sender: Sender, text: impl Into<String>) -> usize {
        self.emit(Event::Message(MessageEvent::group(self.account_id.clone(), group_id, sender, text)))
    }

    pub fn sent(&self) -> Vec<(Target, String)> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }

    pub fn take_sent(&self) -> Vec<(Target, String)> {
        std::mem::take(&mut *self.outbox.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub async fn read_line(&self, prompt: &str) -> Option<String> {
        use std::io::Write;
        print!("{}", prompt);
        std::io::stdout().flush().ok()?;
        let mut input = String::new();
        let read = std::io::stdin().read_line(&mut input).ok()?;
        (read > 0).then(|| input.trim().to_string())
    }
}

#[async_trait]
impl Session for ConsoleSession {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    async fn send_message(&self, target: &Target, text: &str) -> HostResult<String> {
        if self.echo {
            println!("[{} -> {}] {}", self.account_id, target, text);
        }
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((target.clone(), text.to_string()));
        Ok(Uuid::new_v4().to_string())
    }

    async fn group_roster(&self) -> HostResult<BTreeMap<String, GroupInfo>> {
        Ok(self.roster.read().unwrap_or_else(PoisonError::into_inner).clone())
    }
}
