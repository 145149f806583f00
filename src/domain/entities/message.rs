use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Sender;

/// Kind of conversation a message arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Group,
    Private,
    Discuss,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Group => "group",
            ConversationKind::Private => "private",
            ConversationKind::Discuss => "discuss",
        }
    }

    /// Group and discuss conversations carry per-group options.
    pub fn is_multi_party(&self) -> bool {
        !matches!(self, ConversationKind::Private)
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an outbound message goes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub kind: ConversationKind,
    pub id: String,
}

impl Target {
    pub fn group(id: impl Into<String>) -> Self {
        Self { kind: ConversationKind::Group, id: id.into() }
    }

    pub fn private(id: impl Into<String>) -> Self {
        Self { kind: ConversationKind::Private, id: id.into() }
    }

    pub fn discuss(id: impl Into<String>) -> Self {
        Self { kind: ConversationKind::Discuss, id: id.into() }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// An inbound chat message
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub id: String,
    pub account_id: String,
    pub kind: ConversationKind,
    /// Group id, discuss id, or the peer's user id for private chats.
    pub conversation_id: String,
    pub group_name: Option<String>,
    pub sender: Sender,
    pub raw_text: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageEvent {
    pub fn new(
        account_id: impl Into<String>,
        kind: ConversationKind,
        conversation_id: impl Into<String>,
        sender: Sender,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            kind,
            conversation_id: conversation_id.into(),
            group_name: None,
            sender,
            raw_text: raw_text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn group(
        account_id: impl Into<String>,
        group_id: impl Into<String>,
        sender: Sender,
        text: impl Into<String>,
    ) -> Self {
        Self::new(account_id, ConversationKind::Group, group_id, sender, text)
    }

    pub fn private(account_id: impl Into<String>, sender: Sender, text: impl Into<String>) -> Self {
        let peer = sender.id.clone();
        Self::new(account_id, ConversationKind::Private, peer, sender, text)
    }

    pub fn discuss(
        account_id: impl Into<String>,
        discuss_id: impl Into<String>,
        sender: Sender,
        text: impl Into<String>,
    ) -> Self {
        Self::new(account_id, ConversationKind::Discuss, discuss_id, sender, text)
    }

    pub fn with_group_name(mut self, name: impl Into<String>) -> Self {
        self.group_name = Some(name.into());
        self
    }

    pub fn category(&self) -> String {
        format!("message.{}", self.kind)
    }

    /// Replies go back to the conversation the message came from.
    pub fn reply_target(&self) -> Target {
        Target {
            kind: self.kind,
            id: self.conversation_id.clone(),
        }
    }
}

/// A non-message event (notice or system lifecycle)
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub account_id: String,
    /// Dotted category, e.g. `notice.group.increase` or `system.online`.
    pub category: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(account_id: impl Into<String>, category: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            account_id: account_id.into(),
            category: category.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Everything an account's event stream can carry
#[derive(Debug, Clone)]
pub enum Event {
    Message(MessageEvent),
    Notice(RawEvent),
    System(RawEvent),
}

impl Event {
    pub fn account_id(&self) -> &str {
        match self {
            Event::Message(m) => &m.account_id,
            Event::Notice(r) | Event::System(r) => &r.account_id,
        }
    }

    pub fn category(&self) -> String {
        match self {
            Event::Message(m) => m.category(),
            Event::Notice(r) | Event::System(r) => r.category.clone(),
        }
    }

    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            Event::Message(m) => Some(m),
            _ => None,
        }
    }

    /// True if `interest` names this event's category or one of its dotted ancestors.
    pub fn matches_category(&self, interest: &str) -> bool {
        category_matches(interest, &self.category())
    }
}

/// `notice.group` matches `notice.group` and `notice.group.increase`, not `notice.groupx`.
pub fn category_matches(interest: &str, category: &str) -> bool {
    match category.strip_prefix(interest) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}
