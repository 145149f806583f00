//! Trust tier resolution for message senders

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::entities::{MemberRole, Sender};

/// Discrete trust level of a sender, 0 (ordinary member) to 6 (host maintainer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrustTier(u8);

impl TrustTier {
    pub const MEMBER: TrustTier = TrustTier(0);
    pub const ACTIVE_MEMBER: TrustTier = TrustTier(1);
    pub const SENIOR_MEMBER: TrustTier = TrustTier(2);
    pub const ADMIN: TrustTier = TrustTier(3);
    pub const OWNER: TrustTier = TrustTier(4);
    pub const MASTER: TrustTier = TrustTier(5);
    pub const MAINTAINER: TrustTier = TrustTier(6);

    /// Clamps to the highest tier.
    pub fn new(value: u8) -> Self {
        TrustTier(value.min(Self::MAINTAINER.0))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Member sub-tier derived from the activity level.
    pub fn from_level(level: u32) -> Self {
        if level > 4 {
            Self::SENIOR_MEMBER
        } else if level > 2 {
            Self::ACTIVE_MEMBER
        } else {
            Self::MEMBER
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolves senders to trust tiers.
///
/// Allow-lists are handed in at construction so each host (and each test)
/// owns an isolated set.
#[derive(Debug, Clone, Default)]
pub struct PermissionResolver {
    maintainers: HashSet<String>,
    masters: HashMap<String, HashSet<String>>,
}

impl PermissionResolver {
    pub fn new(maintainers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            maintainers: maintainers.into_iter().map(Into::into).collect(),
            masters: HashMap::new(),
        }
    }

    pub fn with_masters(
        mut self,
        account_id: impl Into<String>,
        masters: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.masters
            .entry(account_id.into())
            .or_default()
            .extend(masters.into_iter().map(Into::into));
        self
    }

    pub fn masters_of(&self, account_id: &str) -> Option<&HashSet<String>> {
        self.masters.get(account_id)
    }

    /// Tier of `sender` when talking to `account_id`.
    pub fn resolve(&self, account_id: &str, sender: &Sender) -> TrustTier {
        let empty = HashSet::new();
        let masters = self.masters_of(account_id).unwrap_or(&empty);
        resolve_tier(sender, masters, &self.maintainers)
    }
}

/// First match wins, highest tier first.
pub fn resolve_tier(
    sender: &Sender,
    account_masters: &HashSet<String>,
    host_maintainers: &HashSet<String>,
) -> TrustTier {
    if host_maintainers.contains(&sender.id) {
        return TrustTier::MAINTAINER;
    }
    if account_masters.contains(&sender.id) {
        return TrustTier::MASTER;
    }
    match sender.role {
        MemberRole::Owner => TrustTier::OWNER,
        MemberRole::Admin => TrustTier::ADMIN,
        MemberRole::Member => TrustTier::from_level(sender.level),
    }
}
