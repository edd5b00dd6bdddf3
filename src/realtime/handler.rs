//! Message callbacks and auto-responders.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::A2aMessage;
use crate::registry::AgentType;

/// Called for every newly arrived message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: &A2aMessage) -> Result<()>;
}

/// Produces response content for a message that requires one.
/// `None` means no response is sent.
pub type AutoResponder = Arc<dyn Fn(&A2aMessage) -> Option<Value> + Send + Sync>;

/// Adapter for a plain closure.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&A2aMessage) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&A2aMessage) + Send + Sync,
{
    async fn on_message(&self, message: &A2aMessage) -> Result<()> {
        (self.f)(message);
        Ok(())
    }
}

/// Adapter for a closure returning a future. The closure receives an owned
/// copy of the message.
pub struct AsyncFnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnHandler<F, Fut>
where
    F: Fn(A2aMessage) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for AsyncFnHandler<F, Fut>
where
    F: Fn(A2aMessage) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn on_message(&self, message: &A2aMessage) -> Result<()> {
        (self.f)(message.clone()).await;
        Ok(())
    }
}

/// Canned acknowledgement from an agent, worded by agent type.
pub fn smart_auto_responder(agent_id: &str) -> AutoResponder {
    let agent_id = agent_id.to_string();

    Arc::new(move |_message: &A2aMessage| {
        let response = match AgentType::from_agent_id(&agent_id) {
            AgentType::ClaudeCode => json!({
                "text": "Claude Code received your message. I'll analyze and provide strategic guidance.",
                "agent_type": "claude-code",
                "capabilities": ["strategic_planning", "architecture", "code_review"],
                "status": "processing",
                "auto_response": true,
            }),
            AgentType::GeminiCli => json!({
                "text": "Gemini CLI ready to assist! I can help with development and analysis.",
                "agent_type": "gemini-cli",
                "capabilities": ["development", "analysis", "debugging"],
                "status": "ready",
                "auto_response": true,
            }),
            AgentType::GeminiMemory => json!({
                "text": "Gemini Memory Engine acknowledged. I can provide context and store this interaction.",
                "agent_type": "gemini-memory",
                "capabilities": ["memory_storage", "context_retrieval", "search"],
                "status": "stored",
                "auto_response": true,
            }),
            AgentType::GeminiCodeAssist | AgentType::Unknown => json!({
                "text": format!("Agent {} received your message and is processing it.", agent_id),
                "agent_type": agent_id,
                "status": "acknowledged",
                "auto_response": true,
            }),
        };
        Some(response)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use parking_lot::Mutex;

    fn message() -> A2aMessage {
        A2aMessage::create("claude-code", "gemini-cli", MessageType::Request, json!({"text": "hi"}))
    }

    #[tokio::test]
    async fn test_fn_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = FnHandler::new(move |m: &A2aMessage| sink.lock().push(m.id.clone()));

        let msg = message();
        handler.on_message(&msg).await.unwrap();
        assert_eq!(*seen.lock(), vec![msg.id]);
    }

    #[tokio::test]
    async fn test_async_fn_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = AsyncFnHandler::new(move |m: A2aMessage| {
            let sink = sink.clone();
            async move {
                tokio::task::yield_now().await;
                sink.lock().push(m.sender_agent_id);
            }
        });

        handler.on_message(&message()).await.unwrap();
        assert_eq!(*seen.lock(), vec!["claude-code".to_string()]);
    }

    #[test]
    fn test_smart_auto_responder_by_agent_type() {
        let msg = message();

        let claude = smart_auto_responder("claude-code")(&msg).unwrap();
        assert_eq!(claude["agent_type"], "claude-code");
        assert_eq!(claude["status"], "processing");

        let memory = smart_auto_responder("gemini-memory")(&msg).unwrap();
        assert_eq!(memory["status"], "stored");

        let other = smart_auto_responder("worker-7")(&msg).unwrap();
        assert_eq!(other["agent_type"], "worker-7");
        assert_eq!(other["auto_response"], true);
        assert!(other["text"].as_str().unwrap().contains("worker-7"));
    }
}
