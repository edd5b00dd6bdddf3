//! Agent-to-agent messaging protocol.
//!
//! - Typed messages with priority, expiry and conversation correlation
//! - Per-agent mailboxes behind the [`MailboxStore`] trait
//! - Acknowledgement, request/response and an activity log per agent

pub mod activity;
pub mod agent;
pub mod mailbox;
pub mod memory;
pub mod message;
pub(crate) mod timestamp;
pub mod types;

pub use activity::{Activity, ActivityEntry, ActivityLog};
pub use agent::{A2aProtocol, CommunicationStats, SendOptions};
pub use mailbox::{FsMailboxStore, MailboxStore, MessageFilter};
pub use memory::MemoryMailboxStore;
pub use message::{A2aMessage, MessageBuilder};
pub use types::{AgentStatus, MessageType, Priority};
