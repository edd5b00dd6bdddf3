//! Message types for the agent-to-agent protocol.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Message type classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Request, usually expecting a response
    Request,
    /// Response to a request
    Response,
    /// Informational, no response expected
    Notification,
    /// Multi-agent coordination
    Coordination,
    /// Hand a task over to another agent
    Handoff,
    /// Status update
    Status,
    /// Error report
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Notification => "notification",
            MessageType::Coordination => "coordination",
            MessageType::Handoff => "handoff",
            MessageType::Status => "status",
            MessageType::Error => "error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "request" => Ok(MessageType::Request),
            "response" => Ok(MessageType::Response),
            "notification" => Ok(MessageType::Notification),
            "coordination" => Ok(MessageType::Coordination),
            "handoff" => Ok(MessageType::Handoff),
            "status" => Ok(MessageType::Status),
            "error" => Ok(MessageType::Error),
            _ => Err(format!("Unknown message type: {}", s)),
        }
    }
}

/// Message priority levels. Lower values are more urgent and sort first.
///
/// Persisted as its numeric value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
    Background = 5,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Critical),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Normal),
            4 => Ok(Priority::Low),
            5 => Ok(Priority::Background),
            other => Err(format!("Invalid priority: {}", other)),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" | "1" => Ok(Priority::Critical),
            "high" | "2" => Ok(Priority::High),
            "normal" | "3" => Ok(Priority::Normal),
            "low" | "4" => Ok(Priority::Low),
            "background" | "5" => Ok(Priority::Background),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Background => "background",
        };
        f.write_str(name)
    }
}

/// Agent status as recorded in the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Idle,
    Busy,
    Offline,
    Error,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Offline => "offline",
            AgentStatus::Error => "error",
        };
        f.write_str(name)
    }
}
