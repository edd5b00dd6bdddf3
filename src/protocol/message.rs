//! The mailbox message envelope and its builder.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

use crate::error::Result;

use super::timestamp;
use super::types::{MessageType, Priority};

/// Default lifetime of a message, in minutes.
pub const DEFAULT_EXPIRES_IN_MINUTES: u64 = 60;

const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// A message stored as one JSON file in the target agent's mailbox.
///
/// Immutable once created apart from `delivered`, set when the message is
/// written, and `acknowledged`, which only ever goes from false to true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct A2aMessage {
    pub id: String,
    #[serde(rename = "sender_agent")]
    pub sender_agent_id: String,
    #[serde(rename = "target_agent")]
    pub target_agent_id: String,
    pub message_type: MessageType,
    pub priority: Priority,
    /// Open payload, interpreted according to `message_type`.
    pub content: Value,
    #[serde(rename = "timestamp", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    /// `None` means the message never expires.
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub requires_response: bool,
    /// Seconds a sender is expected to wait for a response.
    #[serde(default = "default_response_timeout")]
    pub response_timeout: u64,
    #[serde(default)]
    pub delivery_attempts: u32,
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub acknowledged: bool,
}

fn default_response_timeout() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_SECS
}

fn default_max_delivery_attempts() -> u32 {
    DEFAULT_MAX_DELIVERY_ATTEMPTS
}

impl A2aMessage {
    /// Create a message with default priority, expiry and no response requested.
    pub fn create(
        sender: impl Into<String>,
        target: impl Into<String>,
        message_type: MessageType,
        content: Value,
    ) -> Self {
        MessageBuilder::new(sender, target, message_type)
            .content(content)
            .build()
    }

    /// Start building a message.
    pub fn builder(
        sender: impl Into<String>,
        target: impl Into<String>,
        message_type: MessageType,
    ) -> MessageBuilder {
        MessageBuilder::new(sender, target, message_type)
    }

    /// Build the response to `original`, addressed back to its sender.
    ///
    /// The payload is wrapped as `{original_message_id, response}` and the
    /// conversation id is carried over.
    pub fn response_to(original: &A2aMessage, responder: impl Into<String>, response: Value) -> Self {
        let mut builder = MessageBuilder::new(
            responder,
            original.sender_agent_id.clone(),
            MessageType::Response,
        )
        .content(json!({
            "original_message_id": original.id,
            "response": response,
        }));

        if let Some(conversation_id) = &original.conversation_id {
            builder = builder.conversation_id(conversation_id.clone());
        }

        builder.build()
    }

    /// Check if the message has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }

    /// Mark as acknowledged. Never resets.
    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
    }

    /// Id of the request this message answers, if it is a response.
    pub fn original_message_id(&self) -> Option<&str> {
        self.content.get("original_message_id").and_then(Value::as_str)
    }

    /// The payload a responder supplied, if this is a response.
    pub fn response_payload(&self) -> Option<&Value> {
        self.content.get("response")
    }

    /// Text preview for logs.
    pub fn text_preview(&self, max_chars: usize) -> String {
        match self.content.get("text").and_then(Value::as_str) {
            Some(text) => text.chars().take(max_chars).collect(),
            None => "No text".to_string(),
        }
    }

    /// Mailbox file name: `<priority>_<timestamp>_<id>.json`.
    ///
    /// The priority is zero-padded and the timestamp is fixed-width with all
    /// separators stripped, so sorting names lexicographically yields
    /// priority-major, time-minor order.
    pub fn file_name(&self) -> String {
        format!(
            "{:02}_{}_{}.json",
            self.priority.value(),
            filename_timestamp(&self.created_at),
            self.id
        )
    }

    /// Read a message back from a mailbox file.
    pub fn read_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn filename_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Builder for messages with the protocol defaults.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    sender: String,
    target: String,
    message_type: MessageType,
    content: Value,
    priority: Priority,
    requires_response: bool,
    expires_in_minutes: u64,
    conversation_id: Option<String>,
}

impl MessageBuilder {
    pub fn new(sender: impl Into<String>, target: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            sender: sender.into(),
            target: target.into(),
            message_type,
            content: Value::Object(Default::default()),
            priority: Priority::Normal,
            requires_response: false,
            expires_in_minutes: DEFAULT_EXPIRES_IN_MINUTES,
            conversation_id: None,
        }
    }

    pub fn content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn requires_response(mut self, requires_response: bool) -> Self {
        self.requires_response = requires_response;
        self
    }

    /// Lifetime in minutes; 0 means the message never expires.
    pub fn expires_in_minutes(mut self, minutes: u64) -> Self {
        self.expires_in_minutes = minutes;
        self
    }

    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Build the message with a fresh id and the current timestamp.
    pub fn build(self) -> A2aMessage {
        let now = Utc::now();
        let expires_at = match self.expires_in_minutes {
            0 => None,
            minutes => i64::try_from(minutes)
                .ok()
                .and_then(Duration::try_minutes)
                .and_then(|lifetime| now.checked_add_signed(lifetime)),
        };

        A2aMessage {
            id: uuid::Uuid::new_v4().to_string(),
            sender_agent_id: self.sender,
            target_agent_id: self.target,
            message_type: self.message_type,
            priority: self.priority,
            content: self.content,
            created_at: now,
            expires_at,
            conversation_id: self.conversation_id,
            requires_response: self.requires_response,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT_SECS,
            delivery_attempts: 0,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            delivered: false,
            acknowledged: false,
        }
    }
}
