//! Domain records shared by the store-facing crates.
//!
//! Everything here is plain data with serde derives; the records are
//! persisted as JSON values inside the shared state store.

use std::collections::BTreeSet;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

// ── Inbound ─────────────────────────────────────────────────────────────────

/// Why an inbound notification was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidNotification {
    #[error("customer_id is missing or blank")]
    MissingCustomer,
    #[error("content is missing or blank")]
    MissingContent,
}

/// Notification as it arrives on the wire, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InboundNotification {
    pub customer_id: Option<String>,
    pub content: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

/// A validated customer notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub customer_id: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        customer_id: impl Into<String>,
        content: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            content: content.into(),
            received_at,
        }
    }

    /// Reject notifications with a blank customer or empty content.
    pub fn validate(&self) -> Result<(), InvalidNotification> {
        if self.customer_id.trim().is_empty() {
            return Err(InvalidNotification::MissingCustomer);
        }
        if self.content.trim().is_empty() {
            return Err(InvalidNotification::MissingContent);
        }
        Ok(())
    }
}

impl TryFrom<InboundNotification> for Notification {
    type Error = InvalidNotification;

    /// A missing `received_at` is stamped with the current time.
    fn try_from(raw: InboundNotification) -> Result<Self, Self::Error> {
        let notification = Self {
            customer_id: raw.customer_id.ok_or(InvalidNotification::MissingCustomer)?,
            content: raw.content.ok_or(InvalidNotification::MissingContent)?,
            received_at: raw.received_at.unwrap_or_else(Utc::now),
        };
        notification.validate()?;
        Ok(notification)
    }
}

// ── Messages ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Assigned,
}

/// A deduplicated inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub fingerprint: String,
    pub customer_id: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
}

impl Message {
    /// A fresh `pending` message for a notification.
    pub fn pending(fingerprint: impl Into<String>, notification: &Notification) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            customer_id: notification.customer_id.clone(),
            content: notification.content.clone(),
            received_at: notification.received_at,
            status: MessageStatus::Pending,
            assigned_agent_id: None,
        }
    }

    #[must_use]
    pub fn assigned_to(mut self, agent_id: impl Into<String>) -> Self {
        self.status = MessageStatus::Assigned;
        self.assigned_agent_id = Some(agent_id.into());
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }
}

// ── Agents ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    #[default]
    Offline,
}

/// Status and caseload of one support agent.
///
/// `session_count` always equals `active_sessions.len()`; use
/// [`AgentRecord::attach`] and [`AgentRecord::detach`] to keep it that way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub active_sessions: BTreeSet<String>,
    #[serde(default)]
    pub session_count: u64,
}

impl AgentRecord {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::Offline,
            active_sessions: BTreeSet::new(),
            session_count: 0,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == AgentStatus::Online
    }

    /// Add a customer session. Returns `false` if it was already present.
    pub fn attach(&mut self, customer_id: &str) -> bool {
        let added = self.active_sessions.insert(customer_id.to_string());
        self.session_count = self.active_sessions.len() as u64;
        added
    }

    /// Remove a customer session. Returns `false` if it was not present.
    pub fn detach(&mut self, customer_id: &str) -> bool {
        let removed = self.active_sessions.remove(customer_id);
        self.session_count = self.active_sessions.len() as u64;
        removed
    }

    /// Score used in the online ordering structure.
    pub fn load(&self) -> i64 {
        self.session_count as i64
    }
}

// ── Outbound ────────────────────────────────────────────────────────────────

/// Payload handed to the delivery sink once a message is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub fingerprint: String,
    pub customer_id: String,
    pub agent_id: String,
    pub content: String,
}

impl Delivery {
    /// Hand `message` to `agent_id`.
    pub fn new(message: &Message, agent_id: impl Into<String>) -> Self {
        Self {
            fingerprint: message.fingerprint.clone(),
            customer_id: message.customer_id.clone(),
            agent_id: agent_id.into(),
            content: message.content.clone(),
        }
    }
}
