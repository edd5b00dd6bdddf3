//! In-memory mailbox store, for tests and single-process use.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::Result;

use super::mailbox::{MailboxStore, MessageFilter};
use super::message::A2aMessage;

/// Mailbox keyed by file name, so iteration matches the filesystem order.
type Mailbox = BTreeMap<String, A2aMessage>;

/// Mailbox store held entirely in memory. Clones share the same mailboxes.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailboxStore {
    mailboxes: Arc<Mutex<HashMap<String, Mailbox>>>,
}

impl MemoryMailboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MailboxStore for MemoryMailboxStore {
    fn deliver(&self, message: &A2aMessage) -> Result<()> {
        let mut stored = message.clone();
        stored.delivered = true;

        self.mailboxes
            .lock()
            .entry(message.target_agent_id.clone())
            .or_default()
            .insert(message.file_name(), stored);

        tracing::debug!(
            "Message delivered to {} (memory): {}",
            message.target_agent_id,
            message.id
        );
        Ok(())
    }

    fn list(&self, agent_id: &str, filter: &MessageFilter) -> Result<Vec<A2aMessage>> {
        let now = Utc::now();
        let mut mailboxes = self.mailboxes.lock();
        let Some(mailbox) = mailboxes.get_mut(agent_id) else {
            return Ok(vec![]);
        };

        mailbox.retain(|_, message| !message.is_expired_at(now));

        Ok(mailbox
            .values()
            .filter(|message| filter.matches(message))
            .cloned()
            .collect())
    }

    fn acknowledge(&self, agent_id: &str, message_id: &str) -> Result<Option<A2aMessage>> {
        let mut mailboxes = self.mailboxes.lock();
        let found = mailboxes
            .get_mut(agent_id)
            .and_then(|mailbox| mailbox.values_mut().find(|m| m.id == message_id))
            .map(|message| {
                message.acknowledge();
                message.clone()
            });
        Ok(found)
    }

    fn count(&self, agent_id: &str) -> Result<usize> {
        Ok(self
            .mailboxes
            .lock()
            .get(agent_id)
            .map_or(0, |mailbox| mailbox.len()))
    }

    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for mailbox in self.mailboxes.lock().values_mut() {
            let before = mailbox.len();
            mailbox.retain(|_, message| message.created_at >= cutoff);
            removed += before - mailbox.len();
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{MessageType, Priority};
    use serde_json::json;

    #[test]
    fn test_memory_store_matches_fs_ordering() {
        let store = MemoryMailboxStore::new();
        for priority in [Priority::Background, Priority::Critical, Priority::High] {
            let msg = A2aMessage::builder("a", "b", MessageType::Notification)
                .priority(priority)
                .build();
            store.deliver(&msg).unwrap();
        }

        let listed = store.list("b", &MessageFilter::unread()).unwrap();
        let priorities: Vec<Priority> = listed.iter().map(|m| m.priority).collect();
        assert_eq!(
            priorities,
            vec![Priority::Critical, Priority::High, Priority::Background]
        );
        assert!(listed.iter().all(|m| m.delivered));
    }

    #[test]
    fn test_memory_store_expiry_and_ack() {
        let store = MemoryMailboxStore::new();
        let mut expired = A2aMessage::create("a", "b", MessageType::Status, json!({}));
        expired.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let live = A2aMessage::create("a", "b", MessageType::Status, json!({}));
        store.deliver(&expired).unwrap();
        store.deliver(&live).unwrap();

        assert_eq!(store.list("b", &MessageFilter::all()).unwrap().len(), 1);
        assert_eq!(store.count("b").unwrap(), 1);

        assert!(store.acknowledge("b", &live.id).unwrap().unwrap().acknowledged);
        assert!(store.list("b", &MessageFilter::unread()).unwrap().is_empty());
        assert!(store.acknowledge("b", "missing").unwrap().is_none());
    }

    #[test]
    fn test_clones_share_mailboxes() {
        let store = MemoryMailboxStore::new();
        let other = store.clone();
        store
            .deliver(&A2aMessage::create("a", "b", MessageType::Status, json!({})))
            .unwrap();
        assert_eq!(other.count("b").unwrap(), 1);
    }

    #[test]
    fn test_purge_older_than_across_mailboxes() {
        let store = MemoryMailboxStore::new();
        let now = Utc::now();

        let mut old = A2aMessage::create("a", "b", MessageType::Status, json!({}));
        old.created_at = now - chrono::Duration::days(10);
        let mut old_elsewhere = A2aMessage::create("b", "c", MessageType::Status, json!({}));
        old_elsewhere.created_at = now - chrono::Duration::days(8);
        let recent = A2aMessage::create("a", "b", MessageType::Status, json!({}));
        for msg in [&old, &old_elsewhere, &recent] {
            store.deliver(msg).unwrap();
        }

        let removed = store.purge_older_than(now - chrono::Duration::days(7)).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count("c").unwrap(), 0);

        let left = store.list("b", &MessageFilter::all()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, recent.id);

        assert_eq!(store.purge_older_than(now - chrono::Duration::days(7)).unwrap(), 0);
    }
}
