use switchboard_common::InvalidNotification;

use crate::sink::SinkError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed notification, rejected before any state is touched.
    #[error("invalid notification: {0}")]
    InvalidInput(#[from] InvalidNotification),

    /// No agent is online. The message stays `pending`.
    #[error("no online agent available")]
    NoAgentAvailable,

    /// The store failed or timed out. Nothing was partially applied, so the
    /// call can be retried.
    #[error(transparent)]
    StoreUnavailable(#[from] switchboard_store::Error),

    #[error("unknown agent: {agent_id}")]
    UnknownAgent { agent_id: String },

    #[error("unknown message: {fingerprint}")]
    UnknownMessage { fingerprint: String },

    /// A stored record could not be decoded or encoded.
    #[error("corrupt record {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The sink refused a delivery. The assignment itself was committed.
    #[error("delivery of {fingerprint} to agent {agent_id} failed: {source}")]
    Delivery {
        fingerprint: String,
        agent_id: String,
        #[source]
        source: SinkError,
    },

    #[error("invalid dispatch config: {0}")]
    Config(#[from] switchboard_config::Error),
}

impl Error {
    #[must_use]
    pub fn unknown_agent(agent_id: impl Into<String>) -> Self {
        Self::UnknownAgent {
            agent_id: agent_id.into(),
        }
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoAgentAvailable | Self::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
