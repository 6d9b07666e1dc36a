//! Admin relay table and ban set.
//!
//! Each user who writes to the admin keeps exactly one contact record: the
//! name and chat seen on their latest message. Admin replies go there.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::info;

/// Where to reach a user who contacted the admin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingContact {
    /// Username or first name
    pub name: String,
    /// Chat the user last wrote from
    pub chat_id: i64,
}

/// User id -> last known contact, last write wins
#[derive(Default)]
pub struct RelayTable {
    contacts: RwLock<HashMap<i64, PendingContact>>,
}

impl RelayTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite `user_id`'s contact record
    pub async fn record_contact(&self, user_id: i64, name: impl Into<String>, chat_id: i64) {
        let contact = PendingContact {
            name: name.into(),
            chat_id,
        };
        self.contacts.write().await.insert(user_id, contact);
    }

    /// Contact record for `user_id`
    pub async fn contact(&self, user_id: i64) -> Option<PendingContact> {
        self.contacts.read().await.get(&user_id).cloned()
    }

    /// Display name recorded for `user_id`
    pub async fn display_name(&self, user_id: i64) -> Option<String> {
        self.contacts
            .read()
            .await
            .get(&user_id)
            .map(|c| c.name.clone())
    }

    /// Snapshot of every recorded contact
    pub async fn all_contacts(&self) -> Vec<(i64, PendingContact)> {
        self.contacts
            .read()
            .await
            .iter()
            .map(|(id, c)| (*id, c.clone()))
            .collect()
    }
}

/// Users barred from queueing and forwarding
#[derive(Default)]
pub struct BanSet {
    banned: RwLock<HashSet<i64>>,
}

impl BanSet {
    /// Empty ban set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ban `user_id`; `false` if already banned
    pub async fn ban(&self, user_id: i64) -> bool {
        let added = self.banned.write().await.insert(user_id);
        if added {
            info!(user_id, "User banned");
        }
        added
    }

    /// Lift a ban; `false` if the user was not banned
    pub async fn unban(&self, user_id: i64) -> bool {
        let removed = self.banned.write().await.remove(&user_id);
        if removed {
            info!(user_id, "User unbanned");
        }
        removed
    }

    /// Membership check
    pub async fn is_banned(&self, user_id: i64) -> bool {
        self.banned.read().await.contains(&user_id)
    }
}
