//! Push-style notification of new messages for one agent process.
//!
//! Two paths feed the same dispatcher: a filesystem watch on the agent's
//! mailbox and a background poll of unread messages. A shared
//! [`SeenMessages`] set keeps the two paths from delivering a message twice.
//! The poller also only dispatches ids that were not in its previous
//! listing, so an unacknowledged message is not redelivered once it falls
//! out of the bounded seen set.

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::config::RealtimeConfig;
use crate::error::{Error, Result};
use crate::protocol::{A2aMessage, A2aProtocol, AgentStatus, MessageFilter};

use super::dedup::SeenMessages;
use super::handler::{AsyncFnHandler, AutoResponder, FnHandler, MessageHandler};
use super::watcher::MailboxWatcher;

/// Snapshot of what the real-time layer is doing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RealtimeStats {
    pub agent_id: String,
    pub file_watcher_active: bool,
    pub background_polling_active: bool,
    pub callbacks_registered: usize,
    pub auto_responder_enabled: bool,
}

struct Dispatcher {
    protocol: Arc<A2aProtocol>,
    seen: SeenMessages,
    handlers: RwLock<Vec<Arc<dyn MessageHandler>>>,
    auto_responder: RwLock<Option<AutoResponder>>,
    log_all: bool,
}

impl Dispatcher {
    async fn dispatch(&self, message: A2aMessage) {
        if message.acknowledged || message.is_expired() {
            return;
        }
        if !self.seen.insert(&message.id) {
            tracing::debug!("Already dispatched: {}", message.id);
            return;
        }

        if self.log_all {
            tracing::info!(
                "New message from {} [{} / priority {}]: {}",
                message.sender_agent_id,
                message.message_type,
                message.priority.value(),
                message.text_preview(100)
            );
        }

        // Snapshot so registration never waits on a running callback
        let handlers: Vec<Arc<dyn MessageHandler>> = self.handlers.read().clone();
        for handler in handlers {
            if let Err(e) = handler.on_message(&message).await {
                tracing::error!("Message callback error: {}", e);
            }
        }

        if message.requires_response {
            self.auto_respond(&message);
        }
    }

    fn auto_respond(&self, message: &A2aMessage) {
        let responder = self.auto_responder.read().clone();
        let Some(responder) = responder else {
            return;
        };
        let Some(content) = responder(message) else {
            return;
        };

        match self.protocol.respond_to(message, content) {
            Ok(Some(_)) => tracing::info!("Auto-response sent to {}", message.sender_agent_id),
            Ok(None) => {}
            Err(e) => tracing::error!("Auto-response to {} failed: {}", message.id, e),
        }
    }
}

/// Real-time monitoring around an [`A2aProtocol`] handle.
pub struct RealtimeAgent {
    protocol: Arc<A2aProtocol>,
    settings: RealtimeConfig,
    dispatcher: Arc<Dispatcher>,
    watcher: Option<MailboxWatcher>,
    watch_task: Option<JoinHandle<()>>,
    poll_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl RealtimeAgent {
    /// Use the realtime settings from the protocol's config.
    pub fn new(protocol: Arc<A2aProtocol>) -> Self {
        let settings = protocol.config().realtime.clone();
        Self::with_settings(protocol, settings)
    }

    pub fn with_settings(protocol: Arc<A2aProtocol>, settings: RealtimeConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher {
            protocol: protocol.clone(),
            seen: SeenMessages::new(settings.dedup_capacity),
            handlers: RwLock::new(Vec::new()),
            auto_responder: RwLock::new(None),
            log_all: settings.log_all_notifications,
        });

        Self {
            protocol,
            settings,
            dispatcher,
            watcher: None,
            watch_task: None,
            poll_task: None,
            heartbeat_task: None,
        }
    }

    pub fn protocol(&self) -> &Arc<A2aProtocol> {
        &self.protocol
    }

    pub fn agent_id(&self) -> &str {
        self.protocol.agent_id()
    }

    pub fn add_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.dispatcher.handlers.write().push(handler);
        tracing::info!("Added message callback for {}", self.agent_id());
    }

    /// Register a plain callback, invoked in registration order.
    pub fn add_message_callback<F>(&self, callback: F)
    where
        F: Fn(&A2aMessage) + Send + Sync + 'static,
    {
        self.add_handler(Arc::new(FnHandler::new(callback)));
    }

    /// Register an async callback, invoked in registration order.
    pub fn add_async_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(A2aMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_handler(Arc::new(AsyncFnHandler::new(callback)));
    }

    pub fn set_auto_responder(&self, responder: AutoResponder) {
        *self.dispatcher.auto_responder.write() = Some(responder);
        tracing::info!("Auto-responder enabled for {}", self.agent_id());
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
            || self.watch_task.is_some()
            || self.poll_task.is_some()
            || self.heartbeat_task.is_some()
    }

    /// Start the enabled notification paths.
    ///
    /// A watcher that cannot be set up is logged and skipped; polling still
    /// runs if enabled. Must be called inside a Tokio runtime.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::Other(format!(
                "Real-time monitoring already running for {}",
                self.agent_id()
            )));
        }

        tracing::info!("Starting real-time monitoring for {}", self.agent_id());
        let started_at = Utc::now();

        if self.settings.enable_file_watching {
            self.start_file_watcher();
        }

        if self.settings.enable_background_polling {
            let protocol = self.protocol.clone();
            let dispatcher = self.dispatcher.clone();
            let poll_interval = self.settings.poll_interval();

            self.poll_task = Some(tokio::spawn(async move {
                let mut ticker = interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // Unread ids from the previous tick
                let mut listed: HashSet<String> = HashSet::new();
                loop {
                    ticker.tick().await;
                    match protocol.get_messages(&MessageFilter::unread()) {
                        Ok(messages) => {
                            let mut current = HashSet::with_capacity(messages.len());
                            for message in messages {
                                current.insert(message.id.clone());
                                if message.created_at >= started_at && !listed.contains(&message.id) {
                                    dispatcher.dispatch(message).await;
                                }
                            }
                            listed = current;
                        }
                        Err(e) => tracing::error!("Background polling error: {}", e),
                    }
                }
            }));
            tracing::info!("Background polling started (interval: {:?})", poll_interval);
        }

        if self.settings.enable_heartbeat {
            let protocol = self.protocol.clone();
            let heartbeat_interval = protocol.config().heartbeat_interval();

            self.heartbeat_task = Some(tokio::spawn(async move {
                let mut ticker = interval(heartbeat_interval);
                loop {
                    ticker.tick().await;
                    // The registry lock retries by sleeping the thread
                    let beat = protocol.clone();
                    match tokio::task::spawn_blocking(move || beat.heartbeat()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::error!("Heartbeat failed for {}: {}", protocol.agent_id(), e),
                        Err(e) => tracing::error!("Heartbeat task failed for {}: {}", protocol.agent_id(), e),
                    }
                }
            }));
        }

        tracing::info!("Real-time monitoring active for {}", self.agent_id());
        Ok(())
    }

    fn start_file_watcher(&mut self) {
        let Some(dir) = self.protocol.store().mailbox_dir(self.agent_id()) else {
            tracing::debug!("Mailbox store has no directory to watch");
            return;
        };

        let (watcher, mut rx) = match MailboxWatcher::start(&dir) {
            Ok(started) => started,
            Err(e) => {
                tracing::error!("Failed to start file watcher for {}: {}", dir.display(), e);
                return;
            }
        };

        let dispatcher = self.dispatcher.clone();
        let settle_delay = self.settings.settle_delay();

        self.watch_task = Some(tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                // Let a writer that bypasses the temp file finish
                sleep(settle_delay).await;
                match A2aMessage::read_from(&path) {
                    Ok(message) => dispatcher.dispatch(message).await,
                    // Acknowledged rewrite or cleanup raced us
                    Err(e) => tracing::debug!("Skipping {}: {}", path.display(), e),
                }
            }
        }));
        self.watcher = Some(watcher);
    }

    /// Stop watching and polling, wait for the tasks to end, and mark the
    /// agent idle.
    pub async fn stop(&mut self) -> Result<()> {
        if self.watcher.take().is_some() {
            tracing::info!("File watcher stopped");
        }

        let tasks = [
            self.watch_task.take(),
            self.poll_task.take(),
            self.heartbeat_task.take(),
        ];
        for task in tasks.into_iter().flatten() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::error!("Real-time task failed: {}", e);
                }
            }
        }

        let protocol = self.protocol.clone();
        tokio::task::spawn_blocking(move || protocol.set_status(AgentStatus::Idle))
            .await
            .map_err(|e| Error::Other(format!("Status update task failed: {}", e)))??;
        tracing::info!("Real-time monitoring stopped for {}", self.agent_id());
        Ok(())
    }

    pub fn stats(&self) -> RealtimeStats {
        RealtimeStats {
            agent_id: self.agent_id().to_string(),
            file_watcher_active: self.watcher.is_some(),
            background_polling_active: self.poll_task.is_some(),
            callbacks_registered: self.dispatcher.handlers.read().len(),
            auto_responder_enabled: self.dispatcher.auto_responder.read().is_some(),
        }
    }
}

impl Drop for RealtimeAgent {
    fn drop(&mut self) {
        for task in [&self.watch_task, &self.poll_task, &self.heartbeat_task]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}
