//! Per-agent protocol handle: send, receive, acknowledge, respond.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::{validate_agent_id, A2aConfig, A2aPaths};
use crate::error::{Error, Result};
use crate::registry::{AgentRegistration, AgentRegistry};

use super::activity::{Activity, ActivityLog};
use super::mailbox::{FsMailboxStore, MailboxStore, MessageFilter};
use super::message::{A2aMessage, DEFAULT_EXPIRES_IN_MINUTES};
use super::types::{AgentStatus, MessageType, Priority};

/// Options for [`A2aProtocol::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    pub priority: Priority,
    pub requires_response: bool,
    pub conversation_id: Option<String>,
    /// 0 means the message never expires.
    pub expires_in_minutes: u64,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            requires_response: false,
            conversation_id: None,
            expires_in_minutes: DEFAULT_EXPIRES_IN_MINUTES,
        }
    }
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn requires_response(mut self, requires_response: bool) -> Self {
        self.requires_response = requires_response;
        self
    }

    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn expires_in_minutes(mut self, minutes: u64) -> Self {
        self.expires_in_minutes = minutes;
        self
    }
}

/// Snapshot of an agent's messaging state.
#[derive(Debug, Clone, Serialize)]
pub struct CommunicationStats {
    pub agent_id: String,
    pub active_agents: usize,
    pub total_registered_agents: usize,
    pub queue_size: usize,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// One agent's view of the A2A protocol.
///
/// Opening a handle registers the agent (overwriting any previous
/// registration under the same id) and makes sure its mailbox exists.
#[derive(Debug)]
pub struct A2aProtocol {
    agent_id: String,
    paths: A2aPaths,
    config: A2aConfig,
    registry: AgentRegistry,
    store: Arc<dyn MailboxStore>,
    activity: ActivityLog,
}

impl A2aProtocol {
    /// Open the protocol for `agent_id` under a DevEnviro root, using the
    /// filesystem mailboxes and the root's `a2a_config.json`.
    pub fn open(agent_id: &str, root: impl AsRef<Path>) -> Result<Self> {
        let paths = A2aPaths::new(root);
        paths.ensure_dirs()?;
        let config = A2aConfig::load_or_init(&paths.config_file)?;
        Self::open_with_config(agent_id, paths, config)
    }

    /// Open with an explicit config instead of the one on disk.
    pub fn open_with_config(agent_id: &str, paths: A2aPaths, config: A2aConfig) -> Result<Self> {
        let store = Arc::new(FsMailboxStore::new(&paths.queues_dir));
        Self::with_store(agent_id, paths, config, store)
    }

    /// Open on top of any mailbox store.
    pub fn with_store(
        agent_id: &str,
        paths: A2aPaths,
        config: A2aConfig,
        store: Arc<dyn MailboxStore>,
    ) -> Result<Self> {
        validate_agent_id(agent_id)?;
        paths.ensure_dirs()?;

        if let Some(dir) = store.mailbox_dir(agent_id) {
            fs::create_dir_all(dir)?;
        }

        let registry = AgentRegistry::new(&paths.registry_file);
        registry.register(AgentRegistration::new(agent_id, &paths.root))?;

        let activity = ActivityLog::new(agent_id, paths.activity_log(agent_id));

        tracing::info!("A2A protocol initialized for agent: {}", agent_id);

        Ok(Self {
            agent_id: agent_id.to_string(),
            paths,
            config,
            registry,
            store,
            activity,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn paths(&self) -> &A2aPaths {
        &self.paths
    }

    pub fn config(&self) -> &A2aConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MailboxStore> {
        &self.store
    }

    /// Send a message to another agent. Returns the new message id.
    ///
    /// The target does not have to be registered; its mailbox is created on
    /// first delivery.
    pub fn send(
        &self,
        target: &str,
        message_type: MessageType,
        content: Value,
        options: SendOptions,
    ) -> Result<String> {
        let mut builder = A2aMessage::builder(self.agent_id.as_str(), target, message_type)
            .content(content)
            .priority(options.priority)
            .requires_response(options.requires_response)
            .expires_in_minutes(options.expires_in_minutes);
        if let Some(conversation_id) = options.conversation_id {
            builder = builder.conversation_id(conversation_id);
        }

        self.deliver(builder.build(), Activity::Sent)
    }

    /// Send a plain-text notification: `{"text": text}`.
    pub fn quick_send(&self, target: &str, text: &str) -> Result<String> {
        self.send(
            target,
            MessageType::Notification,
            json!({ "text": text }),
            SendOptions::default(),
        )
    }

    /// Deliver a prebuilt message.
    pub fn send_message(&self, message: A2aMessage) -> Result<String> {
        self.deliver(message, Activity::Sent)
    }

    fn deliver(&self, message: A2aMessage, action: Activity) -> Result<String> {
        validate_agent_id(&message.target_agent_id)?;

        let size = serde_json::to_vec(&message)?.len();
        let limit = self.config.max_message_size_bytes;
        if size > limit {
            return Err(Error::MessageTooLarge { size, limit });
        }

        if let Err(e) = self.store.deliver(&message) {
            tracing::error!(
                "Failed to deliver message to {}: {}",
                message.target_agent_id,
                e
            );
            return Err(e);
        }

        self.activity.record(action, &message);
        Ok(message.id)
    }

    /// Messages in this agent's mailbox.
    pub fn get_messages(&self, filter: &MessageFilter) -> Result<Vec<A2aMessage>> {
        self.store.list(&self.agent_id, filter)
    }

    /// Look up one message in this agent's mailbox, read or unread.
    pub fn get_message(&self, message_id: &str) -> Result<A2aMessage> {
        self.get_messages(&MessageFilter::all())?
            .into_iter()
            .find(|m| m.id == message_id)
            .ok_or_else(|| Error::NotFound(format!("message {}", message_id)))
    }

    /// Acknowledge a message. Idempotent; returns false if no such message.
    pub fn acknowledge(&self, message_id: &str) -> Result<bool> {
        match self.store.acknowledge(&self.agent_id, message_id)? {
            Some(message) => {
                self.activity.record(Activity::Acknowledged, &message);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Respond to a message that asked for a response.
    ///
    /// Returns the response id, or `None` without sending anything if the
    /// original did not require a response.
    pub fn respond_to(&self, original: &A2aMessage, response: Value) -> Result<Option<String>> {
        if !original.requires_response {
            tracing::warn!("Message {} does not require response", original.id);
            return Ok(None);
        }

        let message = A2aMessage::response_to(original, self.agent_id.as_str(), response);
        self.deliver(message, Activity::Responded).map(Some)
    }

    /// Send a request and poll this agent's mailbox for the matching response.
    ///
    /// Returns the response payload, or `None` if nothing arrived within
    /// `timeout`. The response is acknowledged once found.
    pub async fn request_and_wait(
        &self,
        target: &str,
        request: Value,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        let conversation_id = uuid::Uuid::new_v4().to_string();
        let message_id = self.send(
            target,
            MessageType::Request,
            request,
            SendOptions::new()
                .requires_response(true)
                .conversation_id(conversation_id.clone()),
        )?;

        let deadline = Instant::now() + timeout;
        let poll_interval = self.config.response_poll_interval();
        let filter = MessageFilter::unread().of_type(MessageType::Response);

        loop {
            let response = self.get_messages(&filter)?.into_iter().find(|m| {
                m.conversation_id.as_deref() == Some(conversation_id.as_str())
                    && m.original_message_id() == Some(message_id.as_str())
            });

            if let Some(response) = response {
                self.acknowledge(&response.id)?;
                return Ok(Some(response.response_payload().cloned().unwrap_or(Value::Null)));
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "No response from {} to request {} within {:?}",
                    target,
                    message_id,
                    timeout
                );
                return Ok(None);
            }
            sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Refresh this agent's heartbeat, re-registering if its entry is gone.
    pub fn heartbeat(&self) -> Result<()> {
        if !self.registry.heartbeat(&self.agent_id)? {
            tracing::info!("Agent {} missing from registry, re-registering", self.agent_id);
            self.registry
                .register(AgentRegistration::new(&self.agent_id, &self.paths.root))?;
        }
        Ok(())
    }

    pub fn set_status(&self, status: AgentStatus) -> Result<()> {
        self.registry.set_status(&self.agent_id, status)?;
        Ok(())
    }

    /// Other agents with a heartbeat within the configured timeout.
    pub fn get_active_agents(&self) -> Result<Vec<AgentRegistration>> {
        self.active_agents_within(self.config.agent_timeout())
    }

    pub fn active_agents_within(&self, timeout: Duration) -> Result<Vec<AgentRegistration>> {
        self.registry.active_agents(Some(&self.agent_id), timeout)
    }

    pub fn stats(&self) -> Result<CommunicationStats> {
        let registrations = self.registry.load()?;
        let now = Utc::now();
        let timeout = self.config.agent_timeout();

        Ok(CommunicationStats {
            agent_id: self.agent_id.clone(),
            active_agents: registrations
                .values()
                .filter(|r| r.agent_id != self.agent_id && r.is_active_at(now, timeout))
                .count(),
            total_registered_agents: registrations.len(),
            queue_size: self.store.count(&self.agent_id)?,
            last_heartbeat: registrations.get(&self.agent_id).map(|r| r.last_heartbeat),
        })
    }

    /// Delete messages older than the retention period from every mailbox.
    pub fn cleanup_old_messages(&self) -> Result<usize> {
        if !self.config.auto_cleanup_enabled {
            tracing::debug!("Message cleanup disabled");
            return Ok(0);
        }

        let retention = i64::try_from(self.config.message_retention_days)
            .ok()
            .and_then(chrono::Duration::try_days)
            .ok_or_else(|| Error::Config("message_retention_days out of range".to_string()))?;

        self.store.purge_older_than(Utc::now() - retention)
    }
}
