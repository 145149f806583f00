use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of a sender inside a group conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    #[default]
    Member,
    Admin,
    Owner,
}

/// The author of an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub nickname: Option<String>,
    pub card: Option<String>,
    pub role: MemberRole,
    /// Activity level reported by the transport, 0 when unknown.
    pub level: u32,
}

impl Sender {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nickname: None,
            card: None,
            role: MemberRole::Member,
            level: 0,
        }
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn with_card(mut self, card: impl Into<String>) -> Self {
        self.card = Some(card.into());
        self
    }

    pub fn with_role(mut self, role: MemberRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Group card first, then nickname, then the raw id.
    pub fn display_name(&self) -> String {
        self.card
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.nickname.as_deref())
            .unwrap_or(&self.id)
            .to_string()
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_card() {
        let sender = Sender::new("1").with_nickname("nick").with_card("card");
        assert_eq!(sender.display_name(), "card");

        let sender = Sender::new("1").with_nickname("nick").with_card("");
        assert_eq!(sender.display_name(), "nick");

        assert_eq!(Sender::new("1").to_string(), "1");
    }
}
