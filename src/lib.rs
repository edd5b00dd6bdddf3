//! DevEnviro A2A: file-queue messaging between local agent processes.
//!
//! Agents exchange JSON messages through per-agent mailbox directories
//! under `<root>/a2a/queues/`, discover each other through a shared
//! registry, and can be notified of arrivals in real time.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod realtime;
pub mod registry;

pub use cli::Commands;
pub use config::{A2aConfig, A2aPaths, RealtimeConfig};
pub use error::{Error, Result};
pub use protocol::{
    A2aMessage, A2aProtocol, AgentStatus, MailboxStore, MessageFilter, MessageType, Priority,
    SendOptions,
};
pub use realtime::{RealtimeAgent, RealtimeStats};
pub use registry::{AgentRegistration, AgentRegistry, AgentType};
