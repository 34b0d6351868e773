//! Config schema types (dispatch policy, store, metrics, seed agents).

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, duration::parse_duration};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub dispatch: DispatchConfig,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
    /// Agents registered at startup.
    pub agents: Vec<AgentSeed>,
}

/// Routing policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// How long a fingerprint suppresses identical messages (e.g. "24h").
    /// Unset means a customer can never send the same text twice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_window: Option<String>,
    /// Fixed seed for the tie-break among equally loaded agents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tie_break_seed: Option<u64>,
    /// How often to re-select when the chosen agent drops offline before
    /// the assignment is committed.
    pub selection_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dedup_window: None,
            tie_break_seed: None,
            selection_attempts: 3,
        }
    }
}

impl DispatchConfig {
    pub fn dedup_window(&self) -> Result<Option<Duration>> {
        self.dedup_window.as_deref().map(parse_duration).transpose()
    }
}

/// Shared state store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix for every map and sorted-set key.
    pub namespace: String,
    /// Deadline for a single store round-trip.
    pub op_timeout_ms: u64,
    /// Deadline for acquiring a customer or agent lease.
    pub lease_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: "switchboard".into(),
            op_timeout_ms: 2_000,
            lease_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Labels attached to every exported series.
    pub labels: HashMap<String, String>,
}

/// An agent known at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSeed {
    pub id: String,
    #[serde(default)]
    pub online: bool,
}
