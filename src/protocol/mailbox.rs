//! Per-agent mailboxes: one JSON file per message, scoped by target agent.
//!
//! Mailbox structure:
//! - queues/<agent_id>/<priority>_<timestamp>_<id>.json
//!
//! Listing sorts file names, which yields priority-then-time order. Expired
//! messages are purged lazily, when a listing scans them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

use super::message::A2aMessage;
use super::types::MessageType;

/// Which messages a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageFilter {
    pub unread_only: bool,
    pub message_type: Option<MessageType>,
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self::unread()
    }
}

impl MessageFilter {
    /// Only messages not yet acknowledged.
    pub fn unread() -> Self {
        Self {
            unread_only: true,
            message_type: None,
        }
    }

    /// Acknowledged messages too.
    pub fn all() -> Self {
        Self {
            unread_only: false,
            message_type: None,
        }
    }

    pub fn of_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn matches(&self, message: &A2aMessage) -> bool {
        if self.unread_only && message.acknowledged {
            return false;
        }
        self.message_type
            .map_or(true, |message_type| message.message_type == message_type)
    }
}

/// Storage backing the agent mailboxes.
pub trait MailboxStore: Send + Sync + std::fmt::Debug {
    /// Store a message in its target's mailbox, marked delivered.
    fn deliver(&self, message: &A2aMessage) -> Result<()>;

    /// Pending messages of one agent in priority-then-time order.
    ///
    /// Expired messages are removed from storage and left out.
    fn list(&self, agent_id: &str, filter: &MessageFilter) -> Result<Vec<A2aMessage>>;

    /// Mark a message acknowledged. Returns the updated message, or `None`
    /// if no message with that id is in the mailbox.
    fn acknowledge(&self, agent_id: &str, message_id: &str) -> Result<Option<A2aMessage>>;

    /// Number of messages in a mailbox, acknowledged or not.
    fn count(&self, agent_id: &str) -> Result<usize>;

    /// Remove messages stored before `cutoff`, across all mailboxes.
    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Directory backing a mailbox, if the store is file based.
    fn mailbox_dir(&self, _agent_id: &str) -> Option<PathBuf> {
        None
    }
}

/// Filesystem mailbox store rooted at the `queues/` directory.
#[derive(Debug, Clone)]
pub struct FsMailboxStore {
    queues_dir: PathBuf,
}

impl FsMailboxStore {
    pub fn new(queues_dir: impl AsRef<Path>) -> Self {
        Self {
            queues_dir: queues_dir.as_ref().to_path_buf(),
        }
    }

    fn queue_dir(&self, agent_id: &str) -> PathBuf {
        self.queues_dir.join(agent_id)
    }

    /// Message files of a mailbox, sorted by name.
    fn message_files(&self, agent_id: &str) -> Result<Vec<PathBuf>> {
        let dir = self.queue_dir(agent_id);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if is_message_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Locate the file of a message by its id suffix.
    fn find_message_file(&self, agent_id: &str, message_id: &str) -> Result<Option<PathBuf>> {
        let dir = self.queue_dir(agent_id);
        let pattern = format!(
            "{}/*_{}.json",
            glob::Pattern::escape(&dir.to_string_lossy()),
            glob::Pattern::escape(message_id)
        );

        let mut matches: Vec<PathBuf> = glob::glob(&pattern)?
            .filter_map(|entry| entry.ok())
            .collect();
        matches.sort();

        if matches.len() > 1 {
            tracing::warn!(
                "{} files share message id {} in {}'s mailbox, using the first",
                matches.len(),
                message_id,
                agent_id
            );
        }
        Ok(matches.into_iter().next())
    }
}

impl MailboxStore for FsMailboxStore {
    fn deliver(&self, message: &A2aMessage) -> Result<()> {
        let dir = self.queue_dir(&message.target_agent_id);
        fs::create_dir_all(&dir)?;

        let mut stored = message.clone();
        stored.delivered = true;

        let path = dir.join(message.file_name());
        write_json_atomic(&path, &stored)?;

        tracing::info!(
            "Message delivered to {}: {}",
            message.target_agent_id,
            message.id
        );
        Ok(())
    }

    fn list(&self, agent_id: &str, filter: &MessageFilter) -> Result<Vec<A2aMessage>> {
        let now = Utc::now();
        let mut messages = Vec::new();

        for path in self.message_files(agent_id)? {
            let message = match A2aMessage::read_from(&path) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Skipping unreadable message {}: {}", path.display(), e);
                    continue;
                }
            };

            if message.is_expired_at(now) {
                match fs::remove_file(&path) {
                    Ok(()) => tracing::info!("Removed expired message {}", message.id),
                    Err(e) => tracing::warn!(
                        "Failed to remove expired message {}: {}",
                        path.display(),
                        e
                    ),
                }
                continue;
            }

            if filter.matches(&message) {
                messages.push(message);
            }
        }

        Ok(messages)
    }

    fn acknowledge(&self, agent_id: &str, message_id: &str) -> Result<Option<A2aMessage>> {
        let Some(path) = self.find_message_file(agent_id, message_id)? else {
            tracing::debug!("No message {} in {}'s mailbox to acknowledge", message_id, agent_id);
            return Ok(None);
        };

        let mut message = A2aMessage::read_from(&path)?;
        if !message.acknowledged {
            message.acknowledge();
            write_json_atomic(&path, &message)?;
            tracing::debug!("Acknowledged message {}", message_id);
        }
        Ok(Some(message))
    }

    fn count(&self, agent_id: &str) -> Result<usize> {
        Ok(self.message_files(agent_id)?.len())
    }

    fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        if !self.queues_dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.queues_dir)? {
            let mailbox = entry?.path();
            if !mailbox.is_dir() {
                continue;
            }

            for file in fs::read_dir(&mailbox)? {
                let path = file?.path();
                if !is_message_file(&path) {
                    continue;
                }

                let stale = path
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .map(|modified| DateTime::<Utc>::from(modified) < cutoff);

                match stale {
                    Ok(true) => match fs::remove_file(&path) {
                        Ok(()) => removed += 1,
                        Err(e) => {
                            tracing::warn!("Failed to clean up {}: {}", path.display(), e)
                        }
                    },
                    Ok(false) => {}
                    Err(e) => tracing::warn!("Failed to stat {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            tracing::info!("Cleaned up {} old messages", removed);
        }
        Ok(removed)
    }

    fn mailbox_dir(&self, agent_id: &str) -> Option<PathBuf> {
        Some(self.queue_dir(agent_id))
    }
}

/// Whether a path names a message file (`*.json`, not a hidden temp file).
pub fn is_message_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .map_or(true, |name| name.starts_with('.'));

    !hidden && path.extension().map_or(false, |ext| ext == "json")
}

/// Write JSON to a hidden sibling temp file, then rename it into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("message.json");
    let tmp_path = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));

    let content = serde_json::to_string_pretty(value)?;
    fs::write(&tmp_path, content)?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::Priority;
    use serde_json::json;
    use tempfile::TempDir;

    fn message(priority: Priority) -> A2aMessage {
        A2aMessage::builder("claude-code", "gemini-cli", MessageType::Request)
            .priority(priority)
            .content(json!({"text": format!("{} priority", priority)}))
            .build()
    }

    #[test]
    fn test_deliver_creates_mailbox_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailboxStore::new(temp_dir.path());
        let msg = message(Priority::High);

        store.deliver(&msg).unwrap();

        let path = temp_dir.path().join("gemini-cli").join(msg.file_name());
        assert!(path.exists());
        assert_eq!(store.count("gemini-cli").unwrap(), 1);
    }

    #[test]
    fn test_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailboxStore::new(temp_dir.path());
        let mut msg = A2aMessage::builder("claude-code", "gemini-cli", MessageType::Handoff)
            .priority(Priority::Low)
            .requires_response(true)
            .conversation_id("conv-9")
            .content(json!({"task": "review", "files": ["a.rs", "b.rs"], "depth": 2}))
            .build();

        store.deliver(&msg).unwrap();
        let listed = store.list("gemini-cli", &MessageFilter::unread()).unwrap();

        msg.delivered = true;
        assert_eq!(listed, vec![msg]);
    }

    #[test]
    fn test_priority_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailboxStore::new(temp_dir.path());

        for priority in [Priority::Low, Priority::Critical, Priority::Normal] {
            store.deliver(&message(priority)).unwrap();
        }

        let priorities: Vec<Priority> = store
            .list("gemini-cli", &MessageFilter::unread())
            .unwrap()
            .into_iter()
            .map(|m| m.priority)
            .collect();
        assert_eq!(
            priorities,
            vec![Priority::Critical, Priority::Normal, Priority::Low]
        );
    }

    #[test]
    fn test_expired_message_is_deleted_on_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailboxStore::new(temp_dir.path());

        let mut expired = message(Priority::Normal);
        expired.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        let fresh = message(Priority::Normal);

        store.deliver(&expired).unwrap();
        store.deliver(&fresh).unwrap();
        assert_eq!(store.count("gemini-cli").unwrap(), 2);

        let listed = store.list("gemini-cli", &MessageFilter::all()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, fresh.id);
        assert_eq!(store.count("gemini-cli").unwrap(), 1);
    }

    #[test]
    fn test_never_expiring_message_survives() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailboxStore::new(temp_dir.path());

        let mut msg = A2aMessage::builder("a", "b", MessageType::Status)
            .expires_in_minutes(0)
            .build();
        msg.created_at = Utc::now() - chrono::Duration::days(30);
        store.deliver(&msg).unwrap();

        assert_eq!(store.list("b", &MessageFilter::unread()).unwrap().len(), 1);
        assert_eq!(store.count("b").unwrap(), 1);
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailboxStore::new(temp_dir.path());
        let msg = message(Priority::Normal);
        store.deliver(&msg).unwrap();

        let first = store.acknowledge("gemini-cli", &msg.id).unwrap().unwrap();
        let second = store.acknowledge("gemini-cli", &msg.id).unwrap().unwrap();
        assert!(first.acknowledged);
        assert!(second.acknowledged);

        assert!(store.list("gemini-cli", &MessageFilter::unread()).unwrap().is_empty());
        let all = store.list("gemini-cli", &MessageFilter::all()).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].acknowledged);
    }

    #[test]
    fn test_acknowledge_unknown_id() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailboxStore::new(temp_dir.path());
        assert!(store.acknowledge("nobody", "missing").unwrap().is_none());
    }

    #[test]
    fn test_malformed_file_is_skipped_not_deleted() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailboxStore::new(temp_dir.path());
        store.deliver(&message(Priority::Normal)).unwrap();

        let broken = temp_dir.path().join("gemini-cli").join("03_broken_x.json");
        fs::write(&broken, "{ truncated").unwrap();

        let listed = store.list("gemini-cli", &MessageFilter::unread()).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(broken.exists());
    }

    #[test]
    fn test_type_filter() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailboxStore::new(temp_dir.path());
        store.deliver(&message(Priority::Normal)).unwrap();
        store
            .deliver(&A2aMessage::create("x", "gemini-cli", MessageType::Status, json!({})))
            .unwrap();

        let filter = MessageFilter::unread().of_type(MessageType::Status);
        let listed = store.list("gemini-cli", &filter).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].message_type, MessageType::Status);
    }

    #[test]
    fn test_purge_older_than() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsMailboxStore::new(temp_dir.path());
        store.deliver(&message(Priority::Normal)).unwrap();

        assert_eq!(store.purge_older_than(Utc::now() - chrono::Duration::days(7)).unwrap(), 0);
        assert_eq!(store.purge_older_than(Utc::now() + chrono::Duration::minutes(1)).unwrap(), 1);
        assert_eq!(store.count("gemini-cli").unwrap(), 0);
    }

    #[test]
    fn test_is_message_file() {
        assert!(is_message_file(Path::new("/q/a/03_x_y.json")));
        assert!(!is_message_file(Path::new("/q/a/.03_x_y.json.42.tmp")));
        assert!(!is_message_file(Path::new("/q/a/.hidden.json")));
        assert!(!is_message_file(Path::new("/q/a/notes.txt")));
    }
}
