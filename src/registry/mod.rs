//! Agent registry - who is out there and when they last checked in.

pub mod lock;
pub mod store;

pub use store::{AgentRegistration, AgentRegistry, AgentType, Registrations};
