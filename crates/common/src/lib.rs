//! Shared types and error helpers used across the switchboard crates.

pub mod error;
pub mod types;

pub use {
    error::FromMessage,
    types::{
        AgentRecord, AgentStatus, Delivery, InboundNotification, InvalidNotification, Message,
        MessageStatus, Notification,
    },
};
