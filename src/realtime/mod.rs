//! Real-time notification of arriving messages.

pub mod dedup;
pub mod handler;
pub mod notifier;
pub mod watcher;

pub use dedup::SeenMessages;
pub use handler::{smart_auto_responder, AsyncFnHandler, AutoResponder, FnHandler, MessageHandler};
pub use notifier::{RealtimeAgent, RealtimeStats};
pub use watcher::MailboxWatcher;
