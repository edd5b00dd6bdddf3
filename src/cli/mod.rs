//! CLI commands for the `a2a` operator tool using clap.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::default_root;
use crate::protocol::{A2aMessage, A2aProtocol, MessageFilter, MessageType, Priority, SendOptions};
use crate::realtime::{smart_auto_responder, RealtimeAgent};

/// DevEnviro agent-to-agent messaging.
#[derive(Parser, Debug)]
#[command(name = "a2a")]
#[command(version)]
#[command(about = "Send, read and watch DevEnviro A2A messages", long_about = None)]
pub struct Commands {
    /// Agent id to act as
    #[arg(long, short, global = true, env = "A2A_AGENT_ID", default_value = "operator")]
    pub agent: String,

    /// DevEnviro root directory (defaults to ./.devenviro)
    #[arg(long, global = true, env = "DEVENVIRO_ROOT")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a message to another agent
    Send {
        /// Target agent id
        target: String,

        /// Message text, or a JSON object with --json
        text: String,

        /// Message type
        #[arg(long = "type", short = 't', default_value = "notification")]
        message_type: MessageType,

        /// Priority name or 1-5
        #[arg(long, short, default_value = "normal")]
        priority: Priority,

        /// Ask the target to respond
        #[arg(long)]
        requires_response: bool,

        /// Conversation id to attach
        #[arg(long)]
        conversation: Option<String>,

        /// Minutes until the message expires (0 = never)
        #[arg(long, default_value_t = 60)]
        expires: u64,

        /// Treat TEXT as JSON content
        #[arg(long)]
        json: bool,
    },

    /// List messages in this agent's mailbox
    #[command(alias = "ls")]
    Inbox {
        /// Include acknowledged messages
        #[arg(long)]
        all: bool,

        /// Only messages of this type
        #[arg(long = "type", short = 't')]
        message_type: Option<MessageType>,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Acknowledge messages
    Ack {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Respond to a message that requires a response
    Respond {
        message_id: String,
        text: String,

        #[arg(long)]
        json: bool,
    },

    /// Send a request and wait for the response
    Request {
        target: String,
        text: String,

        /// Seconds to wait
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        #[arg(long)]
        json: bool,
    },

    /// List registered agents
    Agents {
        /// Include agents whose heartbeat timed out
        #[arg(long)]
        all: bool,
    },

    /// Refresh this agent's heartbeat
    Heartbeat,

    /// Show messaging stats for this agent
    Stats,

    /// Delete messages past the retention period
    Cleanup,

    /// Print messages as they arrive until Ctrl+C
    Watch {
        /// Answer requests with a canned auto-response
        #[arg(long)]
        auto_respond: bool,
    },
}

impl Commands {
    pub async fn run(&self) -> Result<()> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => default_root()?,
        };
        let protocol = A2aProtocol::open(&self.agent, &root)
            .with_context(|| format!("Failed to open A2A protocol under {}", root.display()))?;

        match &self.command {
            Command::Send {
                target,
                text,
                message_type,
                priority,
                requires_response,
                conversation,
                expires,
                json,
            } => {
                let mut options = SendOptions::new()
                    .priority(*priority)
                    .requires_response(*requires_response)
                    .expires_in_minutes(*expires);
                if let Some(conversation) = conversation {
                    options = options.conversation_id(conversation.clone());
                }
                let id = protocol.send(target, *message_type, parse_content(text, *json)?, options)?;
                println!("Sent {} to {} ({})", message_type, target, id);
                Ok(())
            }
            Command::Inbox {
                all,
                message_type,
                json,
            } => cmd_inbox(&protocol, *all, *message_type, *json),
            Command::Ack { ids } => {
                for id in ids {
                    if protocol.acknowledge(id)? {
                        println!("Acknowledged {}", id);
                    } else {
                        println!("No message {}", id);
                    }
                }
                Ok(())
            }
            Command::Respond {
                message_id,
                text,
                json,
            } => {
                let original = protocol.get_message(message_id)?;
                match protocol.respond_to(&original, parse_content(text, *json)?)? {
                    Some(id) => println!("Responded to {} ({})", original.sender_agent_id, id),
                    None => bail!("Message {} does not require a response", message_id),
                }
                Ok(())
            }
            Command::Request {
                target,
                text,
                timeout,
                json,
            } => {
                let response = protocol
                    .request_and_wait(target, parse_content(text, *json)?, Duration::from_secs(*timeout))
                    .await?;
                match response {
                    Some(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                    None => bail!("No response from {} within {}s", target, timeout),
                }
                Ok(())
            }
            Command::Agents { all } => cmd_agents(&protocol, *all),
            Command::Heartbeat => {
                protocol.heartbeat()?;
                println!("Heartbeat sent for {}", protocol.agent_id());
                Ok(())
            }
            Command::Stats => {
                let stats = protocol.stats()?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
                Ok(())
            }
            Command::Cleanup => {
                let removed = protocol.cleanup_old_messages()?;
                println!("Removed {} old message(s)", removed);
                Ok(())
            }
            Command::Watch { auto_respond } => cmd_watch(protocol, *auto_respond).await,
        }
    }
}

/// Message content from a CLI argument: JSON when asked, else `{"text": ...}`.
fn parse_content(text: &str, as_json: bool) -> Result<Value> {
    if as_json {
        serde_json::from_str(text).context("Content is not valid JSON")
    } else {
        Ok(json!({ "text": text }))
    }
}

fn format_message(message: &A2aMessage) -> String {
    let mut flags = String::new();
    if message.acknowledged {
        flags.push_str(" [acked]");
    }
    if message.requires_response {
        flags.push_str(" [needs response]");
    }

    format!(
        "{} {} p{} from {} at {}{}\n  {}",
        message.id,
        message.message_type,
        message.priority.value(),
        message.sender_agent_id,
        message.created_at.format("%Y-%m-%d %H:%M:%S"),
        flags,
        message.text_preview(120)
    )
}

fn cmd_inbox(
    protocol: &A2aProtocol,
    all: bool,
    message_type: Option<MessageType>,
    json: bool,
) -> Result<()> {
    let mut filter = if all {
        MessageFilter::all()
    } else {
        MessageFilter::unread()
    };
    if let Some(message_type) = message_type {
        filter = filter.of_type(message_type);
    }

    let messages = protocol.get_messages(&filter)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    if messages.is_empty() {
        println!("No messages for {}", protocol.agent_id());
        return Ok(());
    }
    for message in &messages {
        println!("{}", format_message(message));
    }
    Ok(())
}

fn cmd_agents(protocol: &A2aProtocol, all: bool) -> Result<()> {
    let agents = if all {
        protocol.registry().load()?.into_values().collect()
    } else {
        protocol.get_active_agents()?
    };

    if agents.is_empty() {
        println!("No agents found");
        return Ok(());
    }

    for agent in agents {
        println!(
            "{:<24} {:<20} {:<8} last heartbeat {}",
            agent.agent_id,
            agent.agent_type.as_str(),
            agent.status.to_string(),
            agent.last_heartbeat.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn cmd_watch(protocol: A2aProtocol, auto_respond: bool) -> Result<()> {
    let agent_id = protocol.agent_id().to_string();
    let mut agent = RealtimeAgent::new(Arc::new(protocol));

    agent.add_message_callback(|message: &A2aMessage| println!("{}", format_message(message)));
    if auto_respond {
        agent.set_auto_responder(smart_auto_responder(&agent_id));
    }

    agent.start().await?;
    println!("Watching mailbox of {} (Ctrl+C to stop)", agent_id);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    agent.stop().await?;
    Ok(())
}
