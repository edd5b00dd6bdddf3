//! Per-agent activity log, one JSON object per line.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::message::A2aMessage;
use super::types::{MessageType, Priority};

/// Logged protocol action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Activity {
    Sent,
    Acknowledged,
    Responded,
}

/// One line of the activity log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub action: Activity,
    pub agent_id: String,
    pub message_id: String,
    pub target_agent: String,
    pub message_type: MessageType,
    pub priority: Priority,
}

/// Append-only activity log. Writes are best effort.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    agent_id: String,
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(agent_id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            agent_id: agent_id.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an action. Failures are logged and otherwise ignored.
    pub fn record(&self, action: Activity, message: &A2aMessage) {
        let entry = ActivityEntry {
            timestamp: Utc::now().to_rfc3339(),
            action,
            agent_id: self.agent_id.clone(),
            message_id: message.id.clone(),
            target_agent: message.target_agent_id.clone(),
            message_type: message.message_type,
            priority: message.priority,
        };

        if let Err(e) = self.append(&entry) {
            tracing::warn!(
                "Failed to write activity log {}: {}",
                self.path.display(),
                e
            );
        }
    }

    fn append(&self, entry: &ActivityEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }

    /// Read back all parseable entries.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return vec![];
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_record_appends_json_lines() {
        let temp_dir = TempDir::new().unwrap();
        let log = ActivityLog::new("claude-code", temp_dir.path().join("messages/claude-code.jsonl"));
        let msg = A2aMessage::create("claude-code", "gemini-cli", MessageType::Request, json!({}));

        log.record(Activity::Sent, &msg);
        log.record(Activity::Acknowledged, &msg);

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, Activity::Sent);
        assert_eq!(entries[1].action, Activity::Acknowledged);
        assert_eq!(entries[0].target_agent, "gemini-cli");

        let raw = fs::read_to_string(log.path()).unwrap();
        assert!(raw.lines().next().unwrap().contains("\"action\":\"SENT\""));
    }

    #[test]
    fn test_unwritable_log_does_not_panic() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let log = ActivityLog::new("a", blocker.join("nested.jsonl"));
        let msg = A2aMessage::create("a", "b", MessageType::Status, json!({}));
        log.record(Activity::Sent, &msg);
        assert!(log.entries().is_empty());
    }
}
